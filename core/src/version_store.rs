//! In-memory ring of committed versions per master; retains or discards
//! per the configured policy (`spec.md` §4.3).

use std::collections::VecDeque;

use bytes::Bytes;

use occm_proto::{InstanceId, NodeId, Version};

/// `{version, payload, commit sequence number}`, as stored on the master.
#[derive(Debug, Clone)]
pub struct VersionRecord {
    pub version: Version,
    pub payload: Bytes,
    pub commit_seq: u64,
    /// `false` for INSTANCE/UNBUFFERED frames and the DELTA type's first
    /// (seed) frame; `true` for subsequent DELTA frames.
    pub is_delta: bool,
}

/// `{slaveNodeId, slaveInstanceId, lastSentVersion}`.
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub slave_node_id: NodeId,
    pub slave_instance_id: InstanceId,
    pub last_sent_version: Version,
}

/// Ordered, contiguous, strictly-increasing queue of version records for one
/// master change manager.
#[derive(Debug, Default)]
pub struct VersionStore {
    records: VecDeque<VersionRecord>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record. Panics if it would break the contiguous,
    /// strictly-increasing invariant — a programmer error in the caller,
    /// never a reachable runtime condition from valid commit sequencing.
    pub fn push(&mut self, record: VersionRecord) {
        if let Some(last) = self.records.back() {
            debug_assert!(
                record.version.0 == last.version.0 + 1,
                "version store requires contiguous, strictly increasing versions"
            );
        }
        self.records.push_back(record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn oldest(&self) -> Version {
        self.records.front().map(|r| r.version).unwrap_or(Version::NONE)
    }

    pub fn head(&self) -> Version {
        self.records.back().map(|r| r.version).unwrap_or(Version::NONE)
    }

    pub fn get(&self, version: Version) -> Option<&VersionRecord> {
        self.records.iter().find(|r| r.version == version)
    }

    pub fn iter_from(&self, version: Version) -> impl Iterator<Item = &VersionRecord> {
        self.records.iter().filter(move |r| r.version >= version)
    }

    /// Drops oldest records while more than `keep` versions remain behind
    /// the head, never dropping a version `< floor` is protected instead:
    /// never dropping the head, and never dropping a version still pinned
    /// by a subscriber (`floor`, the minimum un-acknowledged version across
    /// subscribers).
    pub fn retain_last(&mut self, keep: u32, floor: Option<Version>) -> Vec<Version> {
        let mut dropped = Vec::new();
        let floor = floor.unwrap_or(Version::NONE);
        while self.records.len() as u32 > keep + 1 {
            let oldest = match self.records.front() {
                Some(r) => r.version,
                None => break,
            };
            if !floor.is_none() && oldest >= floor {
                break;
            }
            self.records.pop_front();
            dropped.push(oldest);
        }
        dropped
    }

    /// Drops all versions `<= version`, except the head. `obsolete(v)`
    /// always wins over retention-mode bookkeeping, per `spec.md` §9.
    pub fn obsolete_upto(&mut self, version: Version) -> Vec<Version> {
        let head = self.head();
        let mut dropped = Vec::new();
        while let Some(front) = self.records.front() {
            if front.version > version || front.version == head {
                break;
            }
            dropped.push(front.version);
            self.records.pop_front();
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(v: u128, seq: u64) -> VersionRecord {
        VersionRecord {
            version: Version(v),
            payload: Bytes::new(),
            commit_seq: seq,
            is_delta: false,
        }
    }

    #[test]
    fn retain_last_keeps_head_plus_count() {
        let mut store = VersionStore::new();
        for v in 1..=6u128 {
            store.push(record(v, v as u64));
        }
        let dropped = store.retain_last(1, None);
        assert_eq!(dropped, vec![Version(1), Version(2), Version(3), Version(4)]);
        assert_eq!(store.oldest(), Version(5));
        assert_eq!(store.head(), Version(6));
    }

    #[test]
    fn retain_last_never_drops_pinned_floor() {
        let mut store = VersionStore::new();
        for v in 1..=6u128 {
            store.push(record(v, v as u64));
        }
        let dropped = store.retain_last(1, Some(Version(3)));
        assert_eq!(dropped, vec![Version(1), Version(2)]);
        assert_eq!(store.oldest(), Version(3));
    }

    #[test]
    fn obsolete_never_drops_head() {
        let mut store = VersionStore::new();
        for v in 1..=3u128 {
            store.push(record(v, v as u64));
        }
        let dropped = store.obsolete_upto(Version(3));
        assert_eq!(dropped, vec![Version(1), Version(2)]);
        assert_eq!(store.head(), Version(3));
    }
}
