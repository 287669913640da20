//! INSTANCE change type: full snapshot per version (`spec.md` §4.2).

use std::sync::Arc;

use occm_proto::packets::ObjectInstance;
use occm_proto::{packets::ObjectSubscribe, CmError, InstanceId, NodeId, ObsoleteFlags, Version};

use crate::change_manager::incoming_queue::IncomingQueue;
use crate::change_manager::master_common::MasterCommon;
use crate::change_manager::CommitToken;
use crate::data::{DataIStream, DataOStream, ObjectData};
use crate::transport::SubscriberSink;
use crate::version_store::VersionRecord;
use occm_proto::ObjectId;

pub struct FullMasterCm {
    object_id: ObjectId,
    instance_id: InstanceId,
    common: MasterCommon,
}

impl FullMasterCm {
    pub fn new(object_id: ObjectId, instance_id: InstanceId) -> Self {
        Self {
            object_id,
            instance_id,
            common: MasterCommon::new(),
        }
    }

    /// A master object always has an initial version available from
    /// construction (`spec.md` §4.2: "the initial version is FIRST at
    /// construction").
    pub fn init(&mut self, data: &dyn ObjectData) {
        let mut os = DataOStream::new();
        data.get_instance_data(&mut os);
        self.common.commit_seq += 1;
        self.common.store.push(VersionRecord {
            version: Version::FIRST,
            payload: os.into_bytes(),
            commit_seq: self.common.commit_seq,
            is_delta: false,
        });
    }

    pub fn commit_nb(&self, data: &dyn ObjectData) -> CommitToken {
        if !data.is_dirty() {
            return CommitToken::empty(self.object_id);
        }
        let mut os = DataOStream::new();
        data.get_instance_data(&mut os);
        if !os.has_data() {
            return CommitToken::empty(self.object_id);
        }
        CommitToken::with_payload(self.object_id, os.into_bytes())
    }

    pub fn commit_sync(&mut self, token: CommitToken) -> Result<Version, CmError> {
        let payload = match token.take(self.object_id)? {
            Some((payload, _is_seed)) => payload,
            None => return Ok(self.common.store.head()),
        };
        let new_version = self.common.store.head().next();
        self.common.commit_seq += 1;
        self.common.commit_count += 1;
        self.common.store.push(VersionRecord {
            version: new_version,
            payload: payload.clone(),
            commit_seq: self.common.commit_seq,
            is_delta: false,
        });
        let instance_id = self.instance_id;
        let object_id = self.object_id;
        self.common.broadcast(new_version, move |_node, _instance| ObjectInstance {
            object_id,
            instance_id,
            version: new_version,
            is_delta: false,
            payload: payload.clone(),
        });
        self.common.apply_retention();
        Ok(new_version)
    }

    pub fn set_auto_obsolete(&mut self, count: u32, mode: ObsoleteFlags) {
        self.common.auto_obsolete_count = count;
        self.common.auto_obsolete_mode = mode;
        self.common.apply_retention();
    }

    pub fn get_auto_obsolete(&self) -> u32 {
        self.common.auto_obsolete_count
    }

    pub fn get_head_version(&self) -> Version {
        self.common.store.head()
    }

    pub fn get_version(&self) -> Version {
        self.common.store.head()
    }

    pub fn get_oldest_version(&self) -> Version {
        self.common.store.oldest()
    }

    pub fn get_master_instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn obsolete(&mut self, version: Version) {
        self.common.store.obsolete_upto(version);
    }

    pub fn add_slave(
        &mut self,
        subscribe: &ObjectSubscribe,
        node: NodeId,
        sink: Arc<dyn SubscriberSink>,
        data: &dyn ObjectData,
    ) -> Result<Version, CmError> {
        let oldest = self.common.store.oldest();
        let first_usable = if subscribe.requested_start_version.is_none() || subscribe.requested_start_version < oldest {
            oldest
        } else {
            subscribe.requested_start_version
        };

        self.common.add_subscriber(node, subscribe.slave_instance_id, sink.clone());

        // INSTANCE objects always hand the new subscriber the latest
        // retained snapshot; there is no delta stream to seed.
        let snapshot = match self.common.store.get(self.common.store.head()) {
            Some(record) => record.payload.clone(),
            None => {
                let mut os = DataOStream::new();
                data.get_instance_data(&mut os);
                os.into_bytes()
            }
        };
        let head = self.common.store.head();
        let _ = sink.send_instance(ObjectInstance {
            object_id: self.object_id,
            instance_id: subscribe.slave_instance_id,
            version: head,
            is_delta: false,
            payload: snapshot,
        });
        if let Some(subscriber) = self
            .common
            .subscribers
            .iter_mut()
            .find(|s| s.record.slave_node_id == node)
        {
            subscriber.record.last_sent_version = head;
        }
        Ok(first_usable)
    }

    pub fn remove_slave(&mut self, node: NodeId) {
        self.common.remove_subscriber(node);
    }
}

pub struct FullSlaveCm {
    queue: IncomingQueue,
    master_instance_id: InstanceId,
}

impl FullSlaveCm {
    pub fn new(master_instance_id: InstanceId) -> Self {
        Self {
            queue: IncomingQueue::new(Version::NONE),
            master_instance_id,
        }
    }

    pub async fn deliver(&self, packet: ObjectInstance) {
        self.queue.deliver(packet).await;
    }

    pub async fn apply_map_data(&self, version: Version, data: &mut dyn ObjectData) -> Result<(), CmError> {
        self.queue
            .sync_to(version, |packet| {
                let mut is = DataIStream::new(packet.payload.clone());
                data.apply_instance_data(&mut is)
            })
            .await
            .map(|_| ())
    }

    pub async fn sync(&self, target: Version, data: &mut dyn ObjectData) -> Result<Version, CmError> {
        self.queue
            .sync_to(target, |packet| {
                let mut is = DataIStream::new(packet.payload.clone());
                data.apply_instance_data(&mut is)
            })
            .await
    }

    pub async fn get_version(&self) -> Version {
        self.queue.current().await
    }

    pub async fn get_head_version(&self) -> Version {
        self.queue.head().await
    }

    pub fn get_master_instance_id(&self) -> InstanceId {
        self.master_instance_id
    }

    pub async fn unmap(&self) {
        self.queue.mark_unmapping().await;
    }
}
