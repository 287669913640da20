//! Wire-level types shared between the change-management core and the
//! (external) node/session and command-dispatch layers.

pub mod bytes_serializable;
pub mod error;
pub mod ids;
pub mod packets;
pub mod version;

pub use bytes_serializable::BytesSerializable;
pub use error::CmError;
pub use ids::{InstanceId, NodeId, ObjectId};
pub use version::{ChangeType, ObsoleteFlags, Version};
