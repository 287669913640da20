//! DELTA change type: initial snapshot + diffs (`spec.md` §4.2).

use std::sync::Arc;

use occm_proto::packets::ObjectInstance;
use occm_proto::{packets::ObjectSubscribe, CmError, InstanceId, NodeId, ObjectId, ObsoleteFlags, Version};

use crate::change_manager::incoming_queue::IncomingQueue;
use crate::change_manager::master_common::MasterCommon;
use crate::change_manager::CommitToken;
use crate::data::{DataIStream, DataOStream, ObjectData};
use crate::transport::SubscriberSink;
use crate::version_store::VersionRecord;

pub struct DeltaMasterCm {
    object_id: ObjectId,
    instance_id: InstanceId,
    common: MasterCommon,
}

impl DeltaMasterCm {
    pub fn new(object_id: ObjectId, instance_id: InstanceId) -> Self {
        Self {
            object_id,
            instance_id,
            common: MasterCommon::new(),
        }
    }

    /// Version 1 (the instance frame) is captured lazily, at whichever
    /// comes first of the first subscribe or the first commit
    /// (`spec.md` §4.2).
    fn seed_if_needed(&mut self, data: &dyn ObjectData) {
        if !self.common.store.is_empty() {
            return;
        }
        let mut os = DataOStream::new();
        data.get_instance_data(&mut os);
        self.common.commit_seq += 1;
        self.common.store.push(VersionRecord {
            version: Version::FIRST,
            payload: os.into_bytes(),
            commit_seq: self.common.commit_seq,
            is_delta: false,
        });
    }

    pub fn init(&mut self, _data: &dyn ObjectData) {
        // Intentionally lazy: see `seed_if_needed`.
    }

    pub fn commit_nb(&mut self, data: &dyn ObjectData) -> CommitToken {
        if self.common.store.is_empty() {
            // This commit is the one that seeds version 1 (no prior
            // subscribe did it first); always mints, regardless of
            // `is_dirty`, since an object's first version is not optional.
            let mut os = DataOStream::new();
            data.get_instance_data(&mut os);
            return CommitToken::seed(self.object_id, os.into_bytes());
        }
        if !data.is_dirty() {
            return CommitToken::empty(self.object_id);
        }
        let mut os = DataOStream::new();
        data.pack(&mut os);
        if !os.has_data() {
            return CommitToken::empty(self.object_id);
        }
        CommitToken::with_payload(self.object_id, os.into_bytes())
    }

    pub fn commit_sync(&mut self, token: CommitToken) -> Result<Version, CmError> {
        let (payload, is_seed) = match token.take(self.object_id)? {
            Some(parts) => parts,
            None => return Ok(self.common.store.head()),
        };
        let new_version = self.common.store.head().next();
        self.common.commit_seq += 1;
        self.common.commit_count += 1;
        self.common.store.push(VersionRecord {
            version: new_version,
            payload: payload.clone(),
            commit_seq: self.common.commit_seq,
            is_delta: !is_seed,
        });
        let instance_id = self.instance_id;
        let object_id = self.object_id;
        self.common.broadcast(new_version, move |_node, _instance| ObjectInstance {
            object_id,
            instance_id,
            version: new_version,
            is_delta: !is_seed,
            payload: payload.clone(),
        });
        self.common
            .apply_retention_protecting(Some(Version::FIRST));
        Ok(new_version)
    }

    pub fn set_auto_obsolete(&mut self, count: u32, mode: ObsoleteFlags) {
        self.common.auto_obsolete_count = count;
        self.common.auto_obsolete_mode = mode;
        self.common.apply_retention_protecting(Some(Version::FIRST));
    }

    pub fn get_auto_obsolete(&self) -> u32 {
        self.common.auto_obsolete_count
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

    /// `obsolete(v)` always wins for versions `<= v`, per `spec.md` §9 —
    /// including the seed instance frame; a caller that obsoletes past it
    /// before any new subscriber maps in is responsible for the resulting
    /// gap, same as the automatic retention path is not.
    pub fn obsolete(&mut self, version: Version) {
        self.common.store.obsolete_upto(version);
    }

    /// New subscribers are seeded with the latest retained instance
    /// snapshot plus all subsequent deltas up through head.
    pub fn add_slave(
        &mut self,
        subscribe: &ObjectSubscribe,
        node: NodeId,
        sink: Arc<dyn SubscriberSink>,
        data: &dyn ObjectData,
    ) -> Result<Version, CmError> {
        self.seed_if_needed(data);
        let oldest = self.common.store.oldest();
        let first_usable = if subscribe.requested_start_version.is_none()
            || subscribe.requested_start_version < oldest
        {
            oldest
        } else {
            subscribe.requested_start_version
        };

        self.common.add_subscriber(node, subscribe.slave_instance_id, sink.clone());

        for record in self.common.store.iter_from(Version::FIRST) {
            let _ = sink.send_instance(ObjectInstance {
                object_id: self.object_id,
                instance_id: subscribe.slave_instance_id,
                version: record.version,
                is_delta: record.is_delta,
                payload: record.payload.clone(),
            });
        }
        let head = self.common.store.head();
        if let Some(subscriber) = self
            .common
            .subscribers
            .iter_mut()
            .find(|s| s.record.slave_node_id == node)
        {
            subscriber.record.last_sent_version = head;
        }
        Ok(first_usable)
    }

    pub fn remove_slave(&mut self, node: NodeId) {
        self.common.remove_subscriber(node);
    }
}

pub struct DeltaSlaveCm {
    queue: IncomingQueue,
    master_instance_id: InstanceId,
}

impl DeltaSlaveCm {
    pub fn new(master_instance_id: InstanceId) -> Self {
        Self {
            queue: IncomingQueue::new(Version::NONE),
            master_instance_id,
        }
    }

    pub async fn deliver(&self, packet: ObjectInstance) {
        self.queue.deliver(packet).await;
    }

    fn apply_one(packet: &ObjectInstance, data: &mut dyn ObjectData) -> Result<(), CmError> {
        let mut is = DataIStream::new(packet.payload.clone());
        if packet.is_delta {
            data.unpack(&mut is)
        } else {
            data.apply_instance_data(&mut is)
        }
    }

    pub async fn apply_map_data(&self, version: Version, data: &mut dyn ObjectData) -> Result<(), CmError> {
        self.queue
            .sync_to(version, |packet| Self::apply_one(packet, data))
            .await
            .map(|_| ())
    }

    pub async fn sync(&self, target: Version, data: &mut dyn ObjectData) -> Result<Version, CmError> {
        self.queue
            .sync_to(target, |packet| Self::apply_one(packet, data))
            .await
    }

    pub async fn get_version(&self) -> Version {
        self.queue.current().await
    }

    pub async fn get_head_version(&self) -> Version {
        self.queue.head().await
    }

    pub fn get_master_instance_id(&self) -> InstanceId {
        self.master_instance_id
    }

    pub async fn unmap(&self) {
        self.queue.mark_unmapping().await;
    }
}
