mod args;
mod config;
mod transport;

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use occm_core::data::{DataIStream, DataOStream};
use occm_core::{CmError, Object, ObjectData, Session};
use occm_proto::{ChangeType, InstanceId, NodeId, ObjectId};

use crate::args::Args;
use crate::config::NodeConfig;
use crate::transport::InMemoryTransport;

/// Minimal demo payload: an opaque byte blob, committed and synced as a
/// whole (no delta encoding of its own — delta framing is the DELTA change
/// manager's job, not the payload's).
struct Blob(Vec<u8>);

impl ObjectData for Blob {
    fn get_instance_data(&self, os: &mut DataOStream) {
        os.write_bytes(&self.0);
    }

    fn apply_instance_data(&mut self, is: &mut DataIStream) -> Result<(), CmError> {
        self.0 = is.read_bytes(is.remaining())?.to_vec();
        Ok(())
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut config = NodeConfig::load(Some(&args.config)).unwrap_or_else(|err| {
        tracing::warn!(%err, "falling back to default config");
        NodeConfig::default()
    });
    if let Some(address) = args.address {
        config.listen_address = address;
    }
    info!(address = %config.listen_address, "occm-node starting");

    let master_node = NodeId(1);
    let slave_node = NodeId(2);

    let transport = Arc::new(InMemoryTransport::new());
    let master_session = Arc::new(Session::new());
    let slave_session = Arc::new(Session::new());
    let master_sink = transport.register_node(master_node, master_session.clone(), config.queue_capacity);
    let slave_sink = transport.register_node(slave_node, slave_session.clone(), config.queue_capacity);

    let master_object = Arc::new(Object::new(Blob(b"hello from master".to_vec())));
    master_object
        .attach_to_session(
            ObjectId::new(),
            InstanceId(1),
            config.default_change_type,
            true,
            InstanceId::INVALID,
        )
        .await;
    master_object
        .set_auto_obsolete(config.default_auto_obsolete_count, config.default_auto_obsolete_mode)
        .await;
    let object_id = master_object.id().await;
    master_session.register_object(object_id, master_object.clone())?;

    let slave_object = Arc::new(Object::new(Blob(Vec::new())));
    slave_object
        .attach_to_session(
            object_id,
            InstanceId(2),
            config.default_change_type,
            false,
            InstanceId(1),
        )
        .await;
    slave_session.register_object(object_id, slave_object.clone())?;

    let subscribe = occm_proto::packets::ObjectSubscribe {
        object_id,
        slave_instance_id: InstanceId(2),
        requested_start_version: occm_proto::Version::NONE,
        request_id: 1,
    };
    // Goes through the master's command router rather than calling
    // `Session::map_object` directly, exercising the same dispatch path a
    // subscribe arriving over a real wire transport would take.
    master_sink
        .router()
        .enqueue(occm_core::router::InboundPacket::Subscribe(subscribe, slave_node, slave_sink))?;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let version = slave_object.sync(occm_proto::Version::HEAD).await?;
    info!(%object_id, %version, "demo slave synced to master's initial version");
    slave_object
        .with_data(|blob| info!(payload = %String::from_utf8_lossy(&blob.0), "slave's synced payload"))
        .await;

    Ok(())
}
