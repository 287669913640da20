//! Packet -> object -> change-manager dispatch (`spec.md` §4.6).
//!
//! Mirrors the teacher's single-consumer channel-per-queue command loop:
//! inbound packets are pushed onto an `mpsc` channel and drained by one
//! task per session, so delivery order on a given object is preserved
//! without a lock held across the dispatch call.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use occm_proto::{
    packets::{ObjectInstance, ObjectNewMaster, ObjectSubscribe, ObjectSubscribeReply, ObjectUnsubscribe, SubscribeStatus},
    CmError, InstanceId, NodeId, ObjectId, Version,
};

use crate::session::Session;
use crate::transport::SubscriberSink;

/// Result of handling one inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Dispatched to the target object's change manager.
    Handled,
    /// No matching object (already unmapped, or never registered); dropped
    /// silently, matching the original's tolerance of stale subscriptions.
    Discard,
    /// A genuine protocol or application error.
    Error(CmErrorKind),
}

/// Flattened `CmError` used only for the outcome signal; the router logs
/// the full error and reports just enough to let a caller decide whether to
/// disconnect the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmErrorKind {
    NotFound,
    ProtocolViolation,
    Other,
}

impl From<&CmError> for CmErrorKind {
    fn from(value: &CmError) -> Self {
        match value {
            CmError::NotFound(_) => CmErrorKind::NotFound,
            CmError::ProtocolViolation(_) => CmErrorKind::ProtocolViolation,
            _ => CmErrorKind::Other,
        }
    }
}

/// Implemented per inbound packet type; the router calls one of these on
/// the resolved session.
#[async_trait]
pub trait ObjectCommandHandler<P>: Send + Sync {
    async fn handle(&self, session: &Session, packet: P) -> HandlerOutcome;
}

/// Routes `ObjectInstance` frames to the target object's `deliver`.
pub struct InstanceDeliveryHandler;

#[async_trait]
impl ObjectCommandHandler<ObjectInstance> for InstanceDeliveryHandler {
    async fn handle(&self, session: &Session, packet: ObjectInstance) -> HandlerOutcome {
        let object_id = packet.object_id;
        match session.lookup(object_id) {
            Some(handle) => {
                handle.deliver(packet).await;
                HandlerOutcome::Handled
            }
            None => {
                warn!(%object_id, "instance packet for unmapped object, discarding");
                HandlerOutcome::Discard
            }
        }
    }
}

/// Routes `ObjectSubscribe` requests to the target master object's
/// `add_slave`, then replies on the requester's own sink.
pub struct SubscribeHandler;

#[async_trait]
impl ObjectCommandHandler<(ObjectSubscribe, NodeId, Arc<dyn SubscriberSink>)> for SubscribeHandler {
    async fn handle(
        &self,
        session: &Session,
        (packet, node, reply_sink): (ObjectSubscribe, NodeId, Arc<dyn SubscriberSink>),
    ) -> HandlerOutcome {
        let object_id = packet.object_id;
        let handle = match resolve(session, object_id) {
            Ok(handle) => handle,
            Err(err) => {
                let _ = reply_sink.send_subscribe_reply(ObjectSubscribeReply {
                    request_id: packet.request_id,
                    first_usable_version: Version::NONE,
                    master_instance_id: InstanceId::INVALID,
                    status: SubscribeStatus::NotFound,
                });
                return HandlerOutcome::Error(CmErrorKind::from(&err));
            }
        };
        match handle.add_slave(&packet, node, reply_sink.clone()).await {
            Ok(first_usable_version) => {
                let master_instance_id = handle.get_master_instance_id().await;
                let _ = reply_sink.send_subscribe_reply(ObjectSubscribeReply {
                    request_id: packet.request_id,
                    first_usable_version,
                    master_instance_id,
                    status: SubscribeStatus::Ok,
                });
                HandlerOutcome::Handled
            }
            Err(err) => {
                let _ = reply_sink.send_subscribe_reply(ObjectSubscribeReply {
                    request_id: packet.request_id,
                    first_usable_version: Version::NONE,
                    master_instance_id: InstanceId::INVALID,
                    status: SubscribeStatus::Disconnected,
                });
                HandlerOutcome::Error(CmErrorKind::from(&err))
            }
        }
    }
}

/// Routes `ObjectUnsubscribe` requests to the target master object's
/// `remove_slave`.
pub struct UnsubscribeHandler;

#[async_trait]
impl ObjectCommandHandler<(ObjectUnsubscribe, NodeId)> for UnsubscribeHandler {
    async fn handle(&self, session: &Session, (packet, node): (ObjectUnsubscribe, NodeId)) -> HandlerOutcome {
        match resolve(session, packet.object_id) {
            Ok(handle) => {
                handle.remove_slave(node).await;
                HandlerOutcome::Handled
            }
            Err(err) => HandlerOutcome::Error(CmErrorKind::from(&err)),
        }
    }
}

/// Routes `ObjectNewMaster` notifications to the demoted object's
/// `demote_to_slave`.
pub struct NewMasterHandler;

#[async_trait]
impl ObjectCommandHandler<ObjectNewMaster> for NewMasterHandler {
    async fn handle(&self, session: &Session, packet: ObjectNewMaster) -> HandlerOutcome {
        match resolve(session, packet.object_id) {
            Ok(handle) => {
                handle.demote_to_slave(packet.new_master_instance_id).await;
                HandlerOutcome::Handled
            }
            Err(err) => HandlerOutcome::Error(CmErrorKind::from(&err)),
        }
    }
}

/// Acknowledges an `ObjectSubscribeReply` arriving at the node that issued
/// the original subscribe. Correlating it with the pending request is a
/// node/messaging-layer concern, out of this core's scope; the router's
/// job ends at logging receipt.
pub struct SubscribeReplyHandler;

#[async_trait]
impl ObjectCommandHandler<ObjectSubscribeReply> for SubscribeReplyHandler {
    async fn handle(&self, _session: &Session, packet: ObjectSubscribeReply) -> HandlerOutcome {
        debug!(request_id = packet.request_id, status = ?packet.status, "subscribe reply received");
        HandlerOutcome::Handled
    }
}

/// Every wire packet the command router can dispatch. `Subscribe`/
/// `Unsubscribe` carry the sending node and, for `Subscribe`, the sink to
/// reply on, since those aren't part of the packet's own wire fields.
pub enum InboundPacket {
    Instance(ObjectInstance),
    Subscribe(ObjectSubscribe, NodeId, Arc<dyn SubscriberSink>),
    Unsubscribe(ObjectUnsubscribe, NodeId),
    NewMaster(ObjectNewMaster),
    SubscribeReply(ObjectSubscribeReply),
}

/// Single-consumer command queue bound to one `Session`. Packets are
/// dispatched strictly in arrival order.
pub struct CommandRouter {
    sender: mpsc::Sender<InboundPacket>,
}

impl CommandRouter {
    /// Spawns the consumer loop and returns a handle to feed it. `capacity`
    /// bounds the backlog before `enqueue` starts reporting `QueueFull`
    /// instead of accepting more work.
    pub fn spawn(session: Arc<Session>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<InboundPacket>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(packet) = receiver.recv().await {
                let outcome = match packet {
                    InboundPacket::Instance(p) => InstanceDeliveryHandler.handle(&session, p).await,
                    InboundPacket::Subscribe(p, node, sink) => SubscribeHandler.handle(&session, (p, node, sink)).await,
                    InboundPacket::Unsubscribe(p, node) => UnsubscribeHandler.handle(&session, (p, node)).await,
                    InboundPacket::NewMaster(p) => NewMasterHandler.handle(&session, p).await,
                    InboundPacket::SubscribeReply(p) => SubscribeReplyHandler.handle(&session, p).await,
                };
                match outcome {
                    HandlerOutcome::Handled | HandlerOutcome::Discard => {}
                    HandlerOutcome::Error(kind) => {
                        error!(?kind, "command router: handler reported error");
                    }
                }
            }
        });
        Self { sender }
    }

    /// Enqueues an inbound packet for dispatch. Errors if the consumer loop
    /// has shut down, or if its backlog is already at `capacity`.
    pub fn enqueue(&self, packet: InboundPacket) -> Result<(), CmError> {
        use mpsc::error::TrySendError;
        match self.sender.try_send(packet) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CmError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(CmError::Disconnected),
        }
    }
}

/// Looks up a single object by id, shared by every handler above and by
/// callers that bypass the packet queue for an in-process request.
pub fn resolve(session: &Session, object_id: ObjectId) -> Result<Arc<dyn crate::object::ObjectHandle>, CmError> {
    session.lookup(object_id).ok_or(CmError::NotFound(object_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataIStream, DataOStream};
    use crate::object::Object;
    use crate::ObjectData;
    use occm_proto::{ChangeType, InstanceId, Version};
    use tokio::time::{sleep, Duration};

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

    struct NullSink(NodeId);

    impl SubscriberSink for NullSink {
        fn node_id(&self) -> NodeId {
            self.0
        }
        fn send_instance(&self, _packet: ObjectInstance) -> Result<(), CmError> {
            Ok(())
        }
        fn send_subscribe_reply(&self, _packet: ObjectSubscribeReply) -> Result<(), CmError> {
            Ok(())
        }
        fn send_new_master(&self, _packet: ObjectNewMaster) -> Result<(), CmError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn unmapped_instance_packet_is_discarded_not_errored() {
        let session = Arc::new(Session::new());
        let router = CommandRouter::spawn(session.clone(), 16);
        router
            .enqueue(InboundPacket::Instance(ObjectInstance {
                object_id: ObjectId::new(),
                instance_id: InstanceId(0),
                version: Version::FIRST,
                is_delta: false,
                payload: bytes::Bytes::new(),
            }))
            .unwrap();
        sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn queued_instance_reaches_slave_object() {
        let session = Arc::new(Session::new());
        let slave = Arc::new(Object::new(Blob(vec![])));
        slave
            .attach_to_session(ObjectId::new(), InstanceId(1), ChangeType::Instance, false, InstanceId(0))
            .await;
        let object_id = slave.id().await;
        session.register_object(object_id, slave.clone()).unwrap();

        let router = CommandRouter::spawn(session.clone(), 16);
        router
            .enqueue(InboundPacket::Instance(ObjectInstance {
                object_id,
                instance_id: InstanceId(1),
                version: Version::FIRST,
                is_delta: false,
                payload: bytes::Bytes::from_static(b"abc"),
            }))
            .unwrap();

        let version = slave.sync(Version::FIRST).await.unwrap();
        assert_eq!(version, Version::FIRST);
    }

    #[tokio::test]
    async fn queued_subscribe_reaches_master_and_replies() {
        let session = Arc::new(Session::new());
        let master = Arc::new(Object::new(Blob(b"hi".to_vec())));
        master
            .attach_to_session(ObjectId::new(), InstanceId(1), ChangeType::Instance, true, InstanceId::INVALID)
            .await;
        let object_id = master.id().await;
        session.register_object(object_id, master.clone()).unwrap();

        let router = CommandRouter::spawn(session.clone(), 16);
        let reply_sink: Arc<dyn SubscriberSink> = Arc::new(NullSink(NodeId(2)));
        router
            .enqueue(InboundPacket::Subscribe(
                ObjectSubscribe {
                    object_id,
                    slave_instance_id: InstanceId(2),
                    requested_start_version: Version::NONE,
                    request_id: 1,
                },
                NodeId(2),
                reply_sink,
            ))
            .unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(master.get_head_version().await, Version::FIRST);
    }

    #[tokio::test]
    async fn enqueue_past_capacity_reports_queue_full() {
        let session = Arc::new(Session::new());
        let router = CommandRouter::spawn(session, 1);
        // The default current-thread test runtime never polls the spawned
        // consumer task without an `.await` in between, so the channel's
        // single slot is still full when the second send is attempted.
        fn instance_packet() -> ObjectInstance {
            ObjectInstance {
                object_id: ObjectId::new(),
                instance_id: InstanceId(0),
                version: Version::FIRST,
                is_delta: false,
                payload: bytes::Bytes::new(),
            }
        }
        router.enqueue(InboundPacket::Instance(instance_packet())).unwrap();
        let second = router.enqueue(InboundPacket::Instance(instance_packet()));
        assert!(matches!(second, Err(CmError::QueueFull)));
    }
}
