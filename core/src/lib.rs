//! The distributed object change-management core: per-object state machines
//! that mint, retain, and propagate versions of a master's state to its
//! subscribed slaves.

pub mod change_manager;
pub mod data;
pub mod object;
pub mod router;
pub mod session;
pub mod transport;
pub mod version_store;

pub use change_manager::{ChangeManager, CommitToken};
pub use data::{DataIStream, DataOStream, ObjectData};
pub use object::{Object, ObjectCore};
pub use router::{CommandRouter, HandlerOutcome, ObjectCommandHandler};
pub use session::Session;
pub use transport::{SubscriberSink, Transport};
pub use version_store::{SubscriptionRecord, VersionRecord, VersionStore};

pub use occm_proto::{
    packets, BytesSerializable, ChangeType, CmError, InstanceId, NodeId, ObjectId, ObsoleteFlags,
    Version,
};
