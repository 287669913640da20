use strum::{EnumDiscriminants, FromRepr, IntoStaticStr};
use thiserror::Error;

use crate::ids::{InstanceId, ObjectId};
use crate::version::Version;

/// Errors surfaced by the change-management core, mirroring `spec.md` §7.
#[derive(Debug, Error, EnumDiscriminants, IntoStaticStr)]
#[repr(u32)]
#[strum(serialize_all = "snake_case")]
#[strum_discriminants(
    vis(pub),
    derive(FromRepr, IntoStaticStr),
    strum(serialize_all = "snake_case")
)]
pub enum CmError {
    #[error("object {0} not found in session")]
    NotFound(ObjectId) = 1,

    #[error("bad version: requested {requested}, current {current}")]
    BadVersion { requested: Version, current: Version } = 2,

    #[error("object id {0} already registered in session")]
    DuplicateId(ObjectId) = 3,

    #[error("subscriber on node disconnected")]
    Disconnected = 4,

    #[error("serialized payload of {size} bytes exceeds frame limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize } = 5,

    #[error("packet referenced unknown instance id {0}, or broke the contiguous-version invariant")]
    ProtocolViolation(InstanceId) = 6,

    #[error("operation not valid on a NullCM (object is unattached)")]
    Unattached = 7,

    #[error("commit token already consumed or unknown")]
    InvalidCommitToken = 8,

    #[error("becomeMaster called on an object that is already master")]
    AlreadyMaster = 9,

    #[error("becomeMaster called on a slave not yet synced to head")]
    NotSyncedToHead = 10,

    #[error("command router queue is at capacity")]
    QueueFull = 11,
}

impl CmError {
    pub fn as_code(&self) -> u32 {
        // SAFETY: CmError specifies #[repr(u32)] representation.
        // https://doc.rust-lang.org/reference/items/enumerations.html#pointer-casting
        unsafe { *(self as *const Self as *const u32) }
    }

    pub fn as_string(&self) -> &'static str {
        self.into()
    }

    pub fn from_code_as_string(code: u32) -> &'static str {
        CmErrorDiscriminants::from_repr(code)
            .map(|discriminant| discriminant.into())
            .unwrap_or("unknown error code")
    }
}

impl PartialEq for CmError {
    fn eq(&self, other: &Self) -> bool {
        self.as_code() == other.as_code()
    }
}
