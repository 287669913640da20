//! UNBUFFERED change type: versioned but not retained (`spec.md` §4.2).
//!
//! Reuses `MasterCommon`'s auto-obsolete machinery with a fixed retain
//! count of zero: once every current subscriber's `last_sent_version`
//! reaches `v`, `retain_last(0, floor)` drops `v` on the next commit.

use std::sync::Arc;

use occm_proto::packets::ObjectInstance;
use occm_proto::{packets::ObjectSubscribe, CmError, InstanceId, NodeId, ObjectId, Version};

use crate::change_manager::master_common::MasterCommon;
use crate::change_manager::CommitToken;
use crate::data::{DataOStream, ObjectData};
use crate::transport::SubscriberSink;
use crate::version_store::VersionRecord;

pub struct UnbufferedMasterCm {
    object_id: ObjectId,
    instance_id: InstanceId,
    common: MasterCommon,
}

impl UnbufferedMasterCm {
    pub fn new(object_id: ObjectId, instance_id: InstanceId) -> Self {
        let mut common = MasterCommon::new();
        common.auto_obsolete_count = 0;
        Self {
            object_id,
            instance_id,
            common,
        }
    }

    pub fn init(&mut self, _data: &dyn ObjectData) {}

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
        let (payload, _) = match token.take(self.object_id)? {
            Some(parts) => parts,
            None => return Ok(self.common.store.head()),
        };
        let new_version = self.common.store.head().next();
        self.mint(new_version, payload);
        Ok(new_version)
    }

    fn mint(&mut self, version: Version, payload: bytes::Bytes) {
        self.common.commit_seq += 1;
        self.common.commit_count += 1;
        self.common.store.push(VersionRecord {
            version,
            payload: payload.clone(),
            commit_seq: self.common.commit_seq,
            is_delta: false,
        });
        let instance_id = self.instance_id;
        let object_id = self.object_id;
        self.common.broadcast(version, move |_node, _instance| ObjectInstance {
            object_id,
            instance_id,
            version,
            is_delta: false,
            payload: payload.clone(),
        });
        self.common.apply_retention();
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

    pub fn get_auto_obsolete(&self) -> u32 {
        0
    }

    /// A new subscriber joining after its target version was discarded
    /// receives a fresh snapshot and begins at the current head.
    pub fn add_slave(
        &mut self,
        subscribe: &ObjectSubscribe,
        node: NodeId,
        sink: Arc<dyn SubscriberSink>,
        data: &dyn ObjectData,
    ) -> Result<Version, CmError> {
        if self.common.store.head().is_none() {
            // No commit has happened yet: mint a first snapshot so this
            // subscriber has something to anchor on.
            let mut os = DataOStream::new();
            data.get_instance_data(&mut os);
            self.mint(Version::FIRST, os.into_bytes());
        }

        let head = self.common.store.head();
        let payload = match self.common.store.get(head) {
            Some(record) => record.payload.clone(),
            None => {
                let mut os = DataOStream::new();
                data.get_instance_data(&mut os);
                os.into_bytes()
            }
        };

        self.common.add_subscriber(node, subscribe.slave_instance_id, sink.clone());
        let _ = sink.send_instance(ObjectInstance {
            object_id: self.object_id,
            instance_id: subscribe.slave_instance_id,
            version: head,
            is_delta: false,
            payload,
        });
        if let Some(subscriber) = self
            .common
            .subscribers
            .iter_mut()
            .find(|s| s.record.slave_node_id == node)
        {
            subscriber.record.last_sent_version = head;
        }
        self.common.apply_retention();
        Ok(head)
    }

    pub fn remove_slave(&mut self, node: NodeId) {
        self.common.remove_subscriber(node);
    }
}
