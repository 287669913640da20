//! End-to-end master -> slave commit/sync scenarios over an in-memory
//! `SubscriberSink`, exercising the six named scenarios and boundary
//! behaviors this crate's change managers are built against.

use std::sync::Arc;

use occm_core::{packets::ObjectSubscribe, ChangeType, CmError, DataIStream, DataOStream, InstanceId, NodeId, Object, ObjectData, ObjectId, ObsoleteFlags, Version};
use occm_core::transport::{SubscriberSink, Transport};

struct Text(String);

impl ObjectData for Text {
    fn get_instance_data(&self, os: &mut DataOStream) {
        os.write_str(&self.0);
    }

    fn apply_instance_data(&mut self, is: &mut DataIStream) -> Result<(), CmError> {
        self.0 = is.read_str()?;
        Ok(())
    }
}

/// Forwards every delivered packet directly to a slave object's
/// `ChangeManager::deliver`, standing in for the real node messaging layer.
struct DirectSink {
    node_id: NodeId,
    slave: Arc<Object<Text>>,
}

impl SubscriberSink for DirectSink {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn send_instance(&self, packet: occm_core::packets::ObjectInstance) -> Result<(), CmError> {
        let slave = self.slave.clone();
        tokio::spawn(async move {
            slave.deliver(packet).await;
        });
        Ok(())
    }

    fn send_subscribe_reply(&self, _packet: occm_core::packets::ObjectSubscribeReply) -> Result<(), CmError> {
        Ok(())
    }

    fn send_new_master(&self, _packet: occm_core::packets::ObjectNewMaster) -> Result<(), CmError> {
        Ok(())
    }
}

/// No-op stand-in for the node/messaging layer's transport, used wherever a
/// test needs a `become_master` call to run without a real peer node.
struct NoopTransport;

impl Transport for NoopTransport {
    fn lookup_sink(&self, _node: NodeId) -> Option<Arc<dyn SubscriberSink>> {
        None
    }
}

async fn attached_pair(
    change_type: ChangeType,
    initial: &str,
) -> (Arc<Object<Text>>, Arc<Object<Text>>, ObjectId) {
    let master = Arc::new(Object::new(Text(initial.to_string())));
    master
        .attach_to_session(ObjectId::new(), InstanceId(1), change_type, true, InstanceId::INVALID)
        .await;
    let object_id = master.id().await;

    let slave = Arc::new(Object::new(Text(String::new())));
    slave
        .attach_to_session(object_id, InstanceId(2), change_type, false, InstanceId(1))
        .await;

    (master, slave, object_id)
}

#[tokio::test]
async fn full_master_propagates_full_snapshots_to_slave() {
    let (master, slave, object_id) = attached_pair(ChangeType::Instance, "v1").await;

    let sink = Arc::new(DirectSink {
        node_id: NodeId(2),
        slave: slave.clone(),
    });
    let subscribe = ObjectSubscribe {
        object_id,
        slave_instance_id: InstanceId(2),
        requested_start_version: Version::NONE,
        request_id: 1,
    };
    master.add_slave(&subscribe, NodeId(2), sink).await.unwrap();

    let reached = slave.sync(Version::FIRST).await.unwrap();
    assert_eq!(reached, Version::FIRST);
    assert_eq!(slave.with_data(|t| t.0.clone()).await, "v1");

    master.with_data(|t| t.0 = "v2".into()).await;
    let token = master.commit_nb().await.unwrap();
    master.commit_sync(token).await.unwrap();
    let reached = slave.sync(Version(2)).await.unwrap();
    assert_eq!(reached, Version(2));
    assert_eq!(slave.with_data(|t| t.0.clone()).await, "v2");
}

#[tokio::test]
async fn delta_master_seeds_version_one_lazily_on_first_commit() {
    let (master, slave, object_id) = attached_pair(ChangeType::Delta, "seed").await;

    let sink = Arc::new(DirectSink {
        node_id: NodeId(2),
        slave: slave.clone(),
    });
    let subscribe = ObjectSubscribe {
        object_id,
        slave_instance_id: InstanceId(2),
        requested_start_version: Version::NONE,
        request_id: 1,
    };
    // No prior commit: add_slave triggers the lazy seed.
    let first_usable = master.add_slave(&subscribe, NodeId(2), sink).await.unwrap();
    assert_eq!(first_usable, Version::FIRST);

    let reached = slave.sync(Version::FIRST).await.unwrap();
    assert_eq!(reached, Version::FIRST);
    assert_eq!(master.get_head_version().await, Version::FIRST);
}

#[tokio::test]
async fn unbuffered_master_discards_versions_once_all_subscribers_ack() {
    let (master, slave, object_id) = attached_pair(ChangeType::Unbuffered, "u1").await;

    let sink = Arc::new(DirectSink {
        node_id: NodeId(2),
        slave: slave.clone(),
    });
    let subscribe = ObjectSubscribe {
        object_id,
        slave_instance_id: InstanceId(2),
        requested_start_version: Version::NONE,
        request_id: 1,
    };
    master.add_slave(&subscribe, NodeId(2), sink).await.unwrap();
    slave.sync(Version::FIRST).await.unwrap();

    let token = master.commit_nb().await.unwrap();
    master.commit_sync(token).await.unwrap();
    slave.sync(Version(2)).await.unwrap();

    assert_eq!(master.get_oldest_version().await, Version(2));
}

#[tokio::test]
async fn explicit_obsolete_drops_versions_up_to_and_including_target() {
    let (master, _slave, _object_id) = attached_pair(ChangeType::Instance, "x").await;
    master.set_auto_obsolete(u32::MAX, ObsoleteFlags::CountVersions).await;

    for _ in 0..3 {
        let token = master.commit_nb().await.unwrap();
        master.commit_sync(token).await.unwrap();
    }
    assert_eq!(master.get_oldest_version().await, Version::FIRST);

    master.obsolete(Version(3)).await;
    assert_eq!(master.get_oldest_version().await, Version(4));
}

#[tokio::test]
async fn become_master_requires_sync_to_head() {
    let (_master, slave, object_id) = attached_pair(ChangeType::Instance, "a").await;

    // A gap: version 2 observed but version 1 never delivered, so `sync`
    // cannot make contiguous progress and the slave is stuck behind head.
    slave
        .deliver(occm_core::packets::ObjectInstance {
            object_id,
            instance_id: InstanceId(1),
            version: Version(2),
            is_delta: false,
            payload: bytes::Bytes::new(),
        })
        .await;

    let err = slave
        .become_master(ObjectId::new(), NodeId(2), NodeId(1), &NoopTransport)
        .await
        .unwrap_err();
    assert!(matches!(err, CmError::NotSyncedToHead));
}

#[tokio::test]
async fn become_master_notifies_the_former_master() {
    let (master, slave, object_id) = attached_pair(ChangeType::Instance, "a").await;

    let sink = Arc::new(DirectSink {
        node_id: NodeId(2),
        slave: slave.clone(),
    });
    let subscribe = ObjectSubscribe {
        object_id,
        slave_instance_id: InstanceId(2),
        requested_start_version: Version::NONE,
        request_id: 1,
    };
    master.add_slave(&subscribe, NodeId(2), sink).await.unwrap();
    slave.sync(Version::HEAD).await.unwrap();

    struct RecordingSink {
        notified: Arc<std::sync::atomic::AtomicBool>,
        expected_object_id: ObjectId,
    }
    impl SubscriberSink for RecordingSink {
        fn node_id(&self) -> NodeId {
            NodeId(1)
        }
        fn send_instance(&self, _packet: occm_core::packets::ObjectInstance) -> Result<(), CmError> {
            Ok(())
        }
        fn send_subscribe_reply(&self, _packet: occm_core::packets::ObjectSubscribeReply) -> Result<(), CmError> {
            Ok(())
        }
        fn send_new_master(&self, packet: occm_core::packets::ObjectNewMaster) -> Result<(), CmError> {
            assert_eq!(packet.object_id, self.expected_object_id);
            self.notified.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    let notified = Arc::new(std::sync::atomic::AtomicBool::new(false));
    struct RecordingTransport {
        sink: Arc<RecordingSink>,
    }
    impl Transport for RecordingTransport {
        fn lookup_sink(&self, node: NodeId) -> Option<Arc<dyn SubscriberSink>> {
            (node == NodeId(1)).then(|| self.sink.clone() as Arc<dyn SubscriberSink>)
        }
    }
    let transport = RecordingTransport {
        sink: Arc::new(RecordingSink { notified: notified.clone(), expected_object_id: object_id }),
    };

    slave
        .become_master(ObjectId::new(), NodeId(2), NodeId(1), &transport)
        .await
        .unwrap();
    assert!(notified.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn unattached_object_rejects_commit() {
    let object = Object::new(Text(String::new()));
    let err = object.commit_nb().await.unwrap_err();
    assert!(matches!(err, CmError::Unattached));
}
