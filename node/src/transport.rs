//! In-memory stand-in for the real node/messaging layer (`spec.md` §1's
//! external collaborator). Delivers packets by direct function call instead
//! of over a socket; every slave node registered here must live in the same
//! process.

use std::sync::Arc;

use dashmap::DashMap;

use occm_core::router::InboundPacket;
use occm_core::{session::Session, SubscriberSink, Transport};
use occm_proto::{
    packets::{ObjectInstance, ObjectNewMaster, ObjectSubscribeReply},
    CmError, NodeId,
};

/// One session's inbox: packets destined for it are handed straight to its
/// `CommandRouter`.
pub struct LocalSink {
    node_id: NodeId,
    router: occm_core::CommandRouter,
}

impl LocalSink {
    pub fn new(node_id: NodeId, router: occm_core::CommandRouter) -> Self {
        Self { node_id, router }
    }

    /// Exposes the underlying router so callers can enqueue packet kinds
    /// `SubscriberSink` doesn't carry an explicit method for (subscribe,
    /// unsubscribe), in addition to the sink-shaped ones it does.
    pub fn router(&self) -> &occm_core::CommandRouter {
        &self.router
    }
}

impl SubscriberSink for LocalSink {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn send_instance(&self, packet: ObjectInstance) -> Result<(), CmError> {
        self.router.enqueue(InboundPacket::Instance(packet))
    }

    fn send_subscribe_reply(&self, packet: ObjectSubscribeReply) -> Result<(), CmError> {
        self.router.enqueue(InboundPacket::SubscribeReply(packet))
    }

    fn send_new_master(&self, packet: ObjectNewMaster) -> Result<(), CmError> {
        self.router.enqueue(InboundPacket::NewMaster(packet))
    }
}

/// Registry of every node co-resident in this process, keyed by `NodeId`.
#[derive(Default)]
pub struct InMemoryTransport {
    sinks: DashMap<NodeId, Arc<LocalSink>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            sinks: DashMap::new(),
        }
    }

    /// `queue_capacity` bounds the backlog of the session's command router,
    /// per `NodeConfig::queue_capacity`.
    pub fn register_node(&self, node_id: NodeId, session: Arc<Session>, queue_capacity: usize) -> Arc<LocalSink> {
        let router = occm_core::CommandRouter::spawn(session, queue_capacity);
        let sink = Arc::new(LocalSink::new(node_id, router));
        self.sinks.insert(node_id, sink.clone());
        sink
    }
}

impl Transport for InMemoryTransport {
    fn lookup_sink(&self, node: NodeId) -> Option<Arc<dyn SubscriberSink>> {
        self.sinks.get(&node).map(|entry| entry.value().clone() as Arc<dyn SubscriberSink>)
    }
}
