//! Narrow contract toward the (external, out-of-scope) node/messaging
//! layer. The change-management core only needs "deliver this packet to
//! this slave's inbox" and "look up a master CM by node"; connection
//! establishment, routing and node identity live entirely outside this
//! crate.

use occm_proto::packets::{ObjectInstance, ObjectNewMaster, ObjectSubscribeReply};
use occm_proto::{CmError, NodeId};

/// One subscribed slave's inbox, as seen by a master change manager.
///
/// A real implementation forwards to the node's outbound connection; the
/// `node` crate's in-memory transport forwards directly to the target
/// session's `CommandRouter`.
pub trait SubscriberSink: Send + Sync {
    fn node_id(&self) -> NodeId;

    /// Delivers a version frame. `Err(CmError::Disconnected)` tells the
    /// master CM to drop this subscriber silently.
    fn send_instance(&self, packet: ObjectInstance) -> Result<(), CmError>;

    /// Delivers a subscribe acknowledgment back to the requesting node.
    fn send_subscribe_reply(&self, packet: ObjectSubscribeReply) -> Result<(), CmError>;

    /// Delivers a becomeMaster notification to the object's former master.
    fn send_new_master(&self, packet: ObjectNewMaster) -> Result<(), CmError>;
}

/// Weak handle to a slave's master node, looked up by `NodeId`. The
/// messaging layer owns node lifetime; this crate never holds it by
/// strong reference.
pub trait Transport: Send + Sync {
    fn lookup_sink(&self, node: NodeId) -> Option<std::sync::Arc<dyn SubscriberSink>>;
}
