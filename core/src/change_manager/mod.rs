//! Per-object state machine implementing one of the seven change manager
//! variants (`spec.md` §4.2). Dispatch is by tag on a single enum, per the
//! rewrite notes in `spec.md` §9 — no dynamic dispatch, no friend classes.

mod delta;
mod full;
mod incoming_queue;
mod master_common;
mod unbuffered;

use std::sync::Arc;

use bytes::Bytes;

use occm_proto::packets::{ObjectInstance, ObjectSubscribe};
use occm_proto::{CmError, InstanceId, NodeId, ObjectId, ObsoleteFlags, Version};

use crate::data::ObjectData;
use crate::transport::SubscriberSink;

pub use delta::{DeltaMasterCm, DeltaSlaveCm};
pub use full::{FullMasterCm, FullSlaveCm};
pub use unbuffered::UnbufferedMasterCm;

/// A pending commit, returned by `commitNB` and consumed exactly once by
/// `commitSync`. Ownership (not a handle table) enforces single use.
#[derive(Debug)]
pub struct CommitToken {
    object_id: ObjectId,
    payload: Option<Bytes>,
    is_seed: bool,
}

impl CommitToken {
    pub(crate) fn empty(object_id: ObjectId) -> Self {
        Self {
            object_id,
            payload: None,
            is_seed: false,
        }
    }

    pub(crate) fn with_payload(object_id: ObjectId, payload: Bytes) -> Self {
        Self {
            object_id,
            payload: Some(payload),
            is_seed: false,
        }
    }

    pub(crate) fn seed(object_id: ObjectId, payload: Bytes) -> Self {
        Self {
            object_id,
            payload: Some(payload),
            is_seed: true,
        }
    }

    pub(crate) fn take(self, expected: ObjectId) -> Result<Option<(Bytes, bool)>, CmError> {
        if self.object_id != expected {
            return Err(CmError::InvalidCommitToken);
        }
        Ok(self.payload.map(|p| (p, self.is_seed)))
    }
}

/// The per-object change manager, tagged by variant.
pub enum ChangeManager {
    /// Installed on unattached objects. All mutators error; observers
    /// return `NONE`.
    Null,
    /// Version permanently `NONE`; commit/sync are no-ops.
    StaticMaster,
    StaticSlave,
    FullMaster(FullMasterCm),
    FullSlave(FullSlaveCm),
    DeltaMaster(DeltaMasterCm),
    DeltaSlave(DeltaSlaveCm),
    /// Its slave counterpart is `FullSlave`: frames are never deltas.
    UnbufferedMaster(UnbufferedMasterCm),
}

impl ChangeManager {
    pub fn null() -> Self {
        ChangeManager::Null
    }

    pub fn static_master() -> Self {
        ChangeManager::StaticMaster
    }

    pub fn static_slave() -> Self {
        ChangeManager::StaticSlave
    }

    pub fn full_master(object_id: ObjectId, instance_id: InstanceId, data: &dyn ObjectData) -> Self {
        let mut cm = FullMasterCm::new(object_id, instance_id);
        cm.init(data);
        ChangeManager::FullMaster(cm)
    }

    pub fn full_slave(master_instance_id: InstanceId) -> Self {
        ChangeManager::FullSlave(FullSlaveCm::new(master_instance_id))
    }

    pub fn delta_master(object_id: ObjectId, instance_id: InstanceId) -> Self {
        ChangeManager::DeltaMaster(DeltaMasterCm::new(object_id, instance_id))
    }

    pub fn delta_slave(master_instance_id: InstanceId) -> Self {
        ChangeManager::DeltaSlave(DeltaSlaveCm::new(master_instance_id))
    }

    pub fn unbuffered_master(object_id: ObjectId, instance_id: InstanceId) -> Self {
        ChangeManager::UnbufferedMaster(UnbufferedMasterCm::new(object_id, instance_id))
    }

    pub fn is_master(&self) -> bool {
        matches!(
            self,
            ChangeManager::StaticMaster
                | ChangeManager::FullMaster(_)
                | ChangeManager::DeltaMaster(_)
                | ChangeManager::UnbufferedMaster(_)
        )
    }

    pub fn get_master_instance_id(&self) -> InstanceId {
        match self {
            ChangeManager::FullMaster(cm) => cm.get_master_instance_id(),
            ChangeManager::DeltaMaster(cm) => cm.get_master_instance_id(),
            ChangeManager::UnbufferedMaster(cm) => cm.get_master_instance_id(),
            ChangeManager::FullSlave(cm) => cm.get_master_instance_id(),
            ChangeManager::DeltaSlave(cm) => cm.get_master_instance_id(),
            ChangeManager::StaticMaster | ChangeManager::StaticSlave | ChangeManager::Null => {
                InstanceId::INVALID
            }
        }
    }

    pub fn commit_nb(&mut self, object_id: ObjectId, data: &dyn ObjectData) -> Result<CommitToken, CmError> {
        match self {
            ChangeManager::FullMaster(cm) => Ok(cm.commit_nb(data)),
            ChangeManager::DeltaMaster(cm) => Ok(cm.commit_nb(data)),
            ChangeManager::UnbufferedMaster(cm) => Ok(cm.commit_nb(data)),
            ChangeManager::StaticMaster => Ok(CommitToken::empty(object_id)),
            ChangeManager::Null => Err(CmError::Unattached),
            _ => Err(CmError::BadVersion {
                requested: Version::NONE,
                current: self.get_version_sync(),
            }),
        }
    }

    pub fn commit_sync(&mut self, token: CommitToken) -> Result<Version, CmError> {
        match self {
            ChangeManager::FullMaster(cm) => cm.commit_sync(token),
            ChangeManager::DeltaMaster(cm) => cm.commit_sync(token),
            ChangeManager::UnbufferedMaster(cm) => cm.commit_sync(token),
            ChangeManager::StaticMaster => Ok(Version::NONE),
            ChangeManager::Null => Err(CmError::Unattached),
            _ => Err(CmError::BadVersion {
                requested: Version::NONE,
                current: self.get_version_sync(),
            }),
        }
    }

    pub fn set_auto_obsolete(&mut self, count: u32, mode: ObsoleteFlags) {
        match self {
            ChangeManager::FullMaster(cm) => cm.set_auto_obsolete(count, mode),
            ChangeManager::DeltaMaster(cm) => cm.set_auto_obsolete(count, mode),
            _ => {}
        }
    }

    pub fn get_auto_obsolete(&self) -> u32 {
        match self {
            ChangeManager::FullMaster(cm) => cm.get_auto_obsolete(),
            ChangeManager::DeltaMaster(cm) => cm.get_auto_obsolete(),
            ChangeManager::UnbufferedMaster(cm) => cm.get_auto_obsolete(),
            _ => 0,
        }
    }

    pub fn obsolete(&mut self, version: Version) {
        match self {
            ChangeManager::FullMaster(cm) => cm.obsolete(version),
            ChangeManager::DeltaMaster(cm) => cm.obsolete(version),
            _ => {}
        }
    }

    /// Synchronous snapshot of the current version; used for error
    /// messages where awaiting would be overkill.
    fn get_version_sync(&self) -> Version {
        match self {
            ChangeManager::FullMaster(cm) => cm.get_version(),
            ChangeManager::DeltaMaster(cm) => cm.get_version(),
            ChangeManager::UnbufferedMaster(cm) => cm.get_version(),
            ChangeManager::StaticMaster | ChangeManager::StaticSlave | ChangeManager::Null => {
                Version::NONE
            }
            // Slave variants hold their version behind an async mutex;
            // callers needing it synchronously use `get_version` instead.
            ChangeManager::FullSlave(_) | ChangeManager::DeltaSlave(_) => Version::NONE,
        }
    }

    pub async fn get_version(&self) -> Version {
        match self {
            ChangeManager::FullMaster(cm) => cm.get_version(),
            ChangeManager::DeltaMaster(cm) => cm.get_version(),
            ChangeManager::UnbufferedMaster(cm) => cm.get_version(),
            ChangeManager::FullSlave(cm) => cm.get_version().await,
            ChangeManager::DeltaSlave(cm) => cm.get_version().await,
            ChangeManager::StaticMaster | ChangeManager::StaticSlave | ChangeManager::Null => {
                Version::NONE
            }
        }
    }

    pub async fn get_head_version(&self) -> Version {
        match self {
            ChangeManager::FullMaster(cm) => cm.get_head_version(),
            ChangeManager::DeltaMaster(cm) => cm.get_head_version(),
            ChangeManager::UnbufferedMaster(cm) => cm.get_head_version(),
            ChangeManager::FullSlave(cm) => cm.get_head_version().await,
            ChangeManager::DeltaSlave(cm) => cm.get_head_version().await,
            ChangeManager::StaticMaster | ChangeManager::StaticSlave | ChangeManager::Null => {
                Version::NONE
            }
        }
    }

    pub fn get_oldest_version(&self) -> Version {
        match self {
            ChangeManager::FullMaster(cm) => cm.get_oldest_version(),
            ChangeManager::DeltaMaster(cm) => cm.get_oldest_version(),
            ChangeManager::UnbufferedMaster(cm) => cm.get_oldest_version(),
            _ => Version::NONE,
        }
    }

    pub async fn sync(&self, target: Version, data: &mut dyn ObjectData) -> Result<Version, CmError> {
        match self {
            ChangeManager::FullSlave(cm) => cm.sync(target, data).await,
            ChangeManager::DeltaSlave(cm) => cm.sync(target, data).await,
            ChangeManager::StaticSlave | ChangeManager::StaticMaster => Ok(Version::NONE),
            ChangeManager::Null => Err(CmError::Unattached),
            // Masters only block for HEAD, and only until in-flight
            // commits resolve; with no in-flight tracking needed here
            // (commitSync already resolved before returning), this is a
            // non-blocking observation.
            ChangeManager::FullMaster(cm) => Ok(cm.get_head_version()),
            ChangeManager::DeltaMaster(cm) => Ok(cm.get_head_version()),
            ChangeManager::UnbufferedMaster(cm) => Ok(cm.get_head_version()),
        }
    }

    pub async fn apply_map_data(&self, version: Version, data: &mut dyn ObjectData) -> Result<(), CmError> {
        match self {
            ChangeManager::FullSlave(cm) => cm.apply_map_data(version, data).await,
            ChangeManager::DeltaSlave(cm) => cm.apply_map_data(version, data).await,
            _ => Ok(()),
        }
    }

    pub fn add_slave(
        &mut self,
        subscribe: &ObjectSubscribe,
        node: NodeId,
        sink: Arc<dyn SubscriberSink>,
        data: &dyn ObjectData,
    ) -> Result<Version, CmError> {
        match self {
            ChangeManager::FullMaster(cm) => cm.add_slave(subscribe, node, sink, data),
            ChangeManager::DeltaMaster(cm) => cm.add_slave(subscribe, node, sink, data),
            ChangeManager::UnbufferedMaster(cm) => cm.add_slave(subscribe, node, sink, data),
            ChangeManager::StaticMaster => Ok(Version::NONE),
            _ => Err(CmError::BadVersion {
                requested: subscribe.requested_start_version,
                current: Version::NONE,
            }),
        }
    }

    pub fn remove_slave(&mut self, node: NodeId) {
        match self {
            ChangeManager::FullMaster(cm) => cm.remove_slave(node),
            ChangeManager::DeltaMaster(cm) => cm.remove_slave(node),
            ChangeManager::UnbufferedMaster(cm) => cm.remove_slave(node),
            _ => {}
        }
    }

    pub async fn deliver(&self, packet: ObjectInstance) {
        match self {
            ChangeManager::FullSlave(cm) => cm.deliver(packet).await,
            ChangeManager::DeltaSlave(cm) => cm.deliver(packet).await,
            _ => {}
        }
    }

    /// A slave being unmapped while `sync` is blocked returns unchanged;
    /// no error (`spec.md` §5).
    pub async fn unmap(&self) {
        match self {
            ChangeManager::FullSlave(cm) => cm.unmap().await,
            ChangeManager::DeltaSlave(cm) => cm.unmap().await,
            _ => {}
        }
    }
}
