//! State shared across the three master CM variants: the version store and
//! the subscriber list. Mutated only on the master's queue thread
//! (`spec.md` §5) — in this async rewrite, only while holding the owning
//! `Object`'s lock.

use std::sync::Arc;

use occm_proto::{InstanceId, NodeId, ObsoleteFlags, Version};

use crate::transport::SubscriberSink;
use crate::version_store::{SubscriptionRecord, VersionStore};

pub(crate) struct Subscriber {
    pub record: SubscriptionRecord,
    pub sink: Arc<dyn SubscriberSink>,
}

pub(crate) struct MasterCommon {
    pub store: VersionStore,
    pub subscribers: Vec<Subscriber>,
    pub commit_seq: u64,
    pub commit_count: u64,
    pub auto_obsolete_count: u32,
    pub auto_obsolete_mode: ObsoleteFlags,
}

impl MasterCommon {
    pub fn new() -> Self {
        Self {
            store: VersionStore::new(),
            subscribers: Vec::new(),
            commit_seq: 0,
            commit_count: 0,
            auto_obsolete_count: u32::MAX,
            auto_obsolete_mode: ObsoleteFlags::CountVersions,
        }
    }

    /// The minimum version any current subscriber has not yet been sent —
    /// versions at or above this floor may never be dropped.
    pub fn min_unacknowledged(&self) -> Option<Version> {
        self.subscribers
            .iter()
            .map(|s| s.record.last_sent_version.next())
            .min()
    }

    pub fn add_subscriber(&mut self, node: NodeId, instance: InstanceId, sink: Arc<dyn SubscriberSink>) {
        self.subscribers.retain(|s| s.record.slave_node_id != node);
        self.subscribers.push(Subscriber {
            record: SubscriptionRecord {
                slave_node_id: node,
                slave_instance_id: instance,
                last_sent_version: Version::NONE,
            },
            sink,
        });
    }

    pub fn remove_subscriber(&mut self, node: NodeId) {
        self.subscribers.retain(|s| s.record.slave_node_id != node);
    }

    /// Sends `packet` to every subscriber, dropping (without error) any
    /// subscriber whose sink reports disconnection (`spec.md` §7).
    pub fn broadcast(&mut self, version: Version, make_packet: impl Fn(NodeId, InstanceId) -> occm_proto::packets::ObjectInstance) {
        let mut disconnected = Vec::new();
        for subscriber in &mut self.subscribers {
            let packet = make_packet(subscriber.record.slave_node_id, subscriber.record.slave_instance_id);
            match subscriber.sink.send_instance(packet) {
                Ok(()) => subscriber.record.last_sent_version = version,
                Err(_) => disconnected.push(subscriber.record.slave_node_id),
            }
        }
        for node in disconnected {
            self.remove_subscriber(node);
        }
    }

    pub fn apply_retention(&mut self) {
        self.apply_retention_protecting(None)
    }

    /// As `apply_retention`, but never drops `protect` either — used by
    /// DELTA masters to keep their base instance frame reachable for
    /// seeding future subscribers.
    pub fn apply_retention_protecting(&mut self, protect: Option<Version>) {
        let mut floor = self.min_unacknowledged();
        if let Some(protect) = protect {
            floor = Some(floor.map_or(protect, |f| f.min(protect)));
        }
        match self.auto_obsolete_mode {
            ObsoleteFlags::CountVersions => {
                self.store.retain_last(self.auto_obsolete_count, floor);
            }
            ObsoleteFlags::CountCommits => {
                // `increaseCommitCount` only advances on non-empty commits,
                // so every stored record already corresponds 1:1 with a
                // counted commit; the two modes collapse to the same
                // underlying computation (see DESIGN.md).
                self.store.retain_last(self.auto_obsolete_count, floor);
            }
        }
    }
}
