//! Session-registry-level subscription scenarios: late subscribers, explicit
//! unsubscribe, and the session's duplicate-id guard.

use std::sync::Arc;

use occm_core::{
    packets::ObjectSubscribe, ChangeType, CmError, DataIStream, DataOStream, InstanceId, NodeId,
    Object, ObjectData, ObjectId, Session, Version,
};
use occm_core::transport::SubscriberSink;

struct Counter(u64);

impl ObjectData for Counter {
    fn get_instance_data(&self, os: &mut DataOStream) {
        os.write_u64(self.0);
    }

    fn apply_instance_data(&mut self, is: &mut DataIStream) -> Result<(), CmError> {
        self.0 = is.read_u64()?;
        Ok(())
    }
}

struct DirectSink {
    node_id: NodeId,
    slave: Arc<Object<Counter>>,
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

#[tokio::test]
async fn map_object_errors_for_unregistered_id() {
    let session = Session::new();
    let slave = Arc::new(Object::new(Counter(0)));
    slave
        .attach_to_session(ObjectId::new(), InstanceId(2), ChangeType::Instance, false, InstanceId(1))
        .await;
    let sink = Arc::new(DirectSink {
        node_id: NodeId(9),
        slave,
    });
    let subscribe = ObjectSubscribe {
        object_id: ObjectId::new(),
        slave_instance_id: InstanceId(2),
        requested_start_version: Version::NONE,
        request_id: 1,
    };
    let err = session
        .map_object(ObjectId::new(), &subscribe, NodeId(9), sink)
        .await
        .unwrap_err();
    assert!(matches!(err, CmError::NotFound(_)));
}

#[tokio::test]
async fn late_subscriber_after_retention_starts_at_the_retained_floor() {
    let session = Session::new();
    let master = Arc::new(Object::new(Counter(0)));
    master
        .attach_to_session(ObjectId::new(), InstanceId(1), ChangeType::Instance, true, InstanceId::INVALID)
        .await;
    master.set_auto_obsolete(1, occm_core::ObsoleteFlags::CountVersions).await;
    let object_id = master.id().await;
    session.register_object(object_id, master.clone()).unwrap();

    // Commit several versions with nobody subscribed: retention has no
    // floor to respect, so only the configured count plus head survive.
    for _ in 0..5 {
        let token = master.commit_nb().await.unwrap();
        master.commit_sync(token).await.unwrap();
    }
    let oldest_before_subscribe = master.get_oldest_version().await;
    assert!(oldest_before_subscribe > Version::FIRST);

    let slave = Arc::new(Object::new(Counter(0)));
    slave
        .attach_to_session(object_id, InstanceId(2), ChangeType::Instance, false, InstanceId(1))
        .await;
    let sink = Arc::new(DirectSink {
        node_id: NodeId(2),
        slave: slave.clone(),
    });
    let subscribe = ObjectSubscribe {
        object_id,
        slave_instance_id: InstanceId(2),
        requested_start_version: Version::FIRST,
        request_id: 7,
    };
    // Requested FIRST, but it was already discarded: the subscriber is
    // handed the oldest version still retained instead.
    let first_usable = session
        .map_object(object_id, &subscribe, NodeId(2), sink)
        .await
        .unwrap();
    assert_eq!(first_usable, oldest_before_subscribe);
}

#[tokio::test]
async fn unmap_object_stops_future_delivery_without_deregistering() {
    let session = Session::new();
    let master = Arc::new(Object::new(Counter(41)));
    master
        .attach_to_session(ObjectId::new(), InstanceId(1), ChangeType::Instance, true, InstanceId::INVALID)
        .await;
    let object_id = master.id().await;
    session.register_object(object_id, master.clone()).unwrap();

    let slave = Arc::new(Object::new(Counter(0)));
    slave
        .attach_to_session(object_id, InstanceId(2), ChangeType::Instance, false, InstanceId(1))
        .await;
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
    session
        .map_object(object_id, &subscribe, NodeId(2), sink)
        .await
        .unwrap();

    slave.sync(Version::HEAD).await.unwrap();
    assert_eq!(slave.with_data(|c| c.0).await, 41);

    session.unmap_object(object_id, NodeId(2)).await.unwrap();
    assert!(session.lookup(object_id).is_some());

    let token = master.commit_nb().await.unwrap();
    master.commit_sync(token).await.unwrap();
    // No subscribers remain, so nothing blocks a further commit; the
    // removed slave simply never receives it (checked by not hanging here).
}
