//! In-memory ordered view of pending evidence plus the "evidence available"
//! signal.

use std::collections::{BTreeMap, HashMap};

use atlas_common::crypto::hash::Hash32;
use atlas_common::env::consensus::evidence::Evidence;
use tokio::sync::watch;

/// Snapshot broadcast every time the pending list changes.
///
/// `added` only ever increases, so a waiter that compares it with the value
/// it last saw cannot miss an insertion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingStatus {
    pub len: usize,
    pub added: u64,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    evidence: Evidence,
    size: u64,
}

/// Pending evidence ordered by (height, arrival).
#[derive(Debug)]
pub struct PendingList {
    entries: BTreeMap<(u64, u64), PendingEntry>,
    index: HashMap<Hash32, (u64, u64)>,
    total_bytes: u64,
    next_seq: u64,
    added: u64,
    status: watch::Sender<PendingStatus>,
}

impl Default for PendingList {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingList {
    pub fn new() -> Self {
        let (status, _) = watch::channel(PendingStatus::default());
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            total_bytes: 0,
            next_seq: 0,
            added: 0,
            status,
        }
    }

    /// Next arrival number; callers persist it alongside the evidence.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Inserts at an explicit sequence (used when recovering from disk).
    /// Returns false if the hash is already present.
    pub fn push_with_seq(&mut self, evidence: Evidence, size: u64, seq: u64) -> bool {
        let hash = evidence.hash();
        if self.index.contains_key(&hash) {
            return false;
        }
        let key = (evidence.height(), seq);
        self.index.insert(hash, key);
        self.entries.insert(key, PendingEntry { evidence, size });
        self.total_bytes = self.total_bytes.saturating_add(size);
        self.next_seq = self.next_seq.max(seq.saturating_add(1));
        self.added += 1;
        self.publish();
        true
    }

    pub fn push(&mut self, evidence: Evidence, size: u64) -> bool {
        let seq = self.next_seq;
        self.push_with_seq(evidence, size, seq)
    }

    pub fn remove(&mut self, hash: &Hash32) -> Option<Evidence> {
        let key = self.index.remove(hash)?;
        let entry = self.entries.remove(&key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size);
        self.publish();
        Some(entry.evidence)
    }

    pub fn contains(&self, hash: &Hash32) -> bool {
        self.index.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash32) -> Option<&Evidence> {
        self.index
            .get(hash)
            .and_then(|key| self.entries.get(key))
            .map(|e| &e.evidence)
    }

    pub fn front(&self) -> Option<&Evidence> {
        self.entries.values().next().map(|e| &e.evidence)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Evidence> {
        self.entries.values().map(|e| &e.evidence)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Longest prefix whose sizes sum to at most `max_bytes`. Stops at the
    /// first item that does not fit so the result never skips ahead.
    pub fn select(&self, max_bytes: u64) -> (Vec<Evidence>, u64) {
        let mut used = 0u64;
        let mut out = Vec::new();
        for entry in self.entries.values() {
            let next = used.saturating_add(entry.size);
            if next > max_bytes {
                break;
            }
            used = next;
            out.push(entry.evidence.clone());
        }
        (out, used)
    }

    pub fn subscribe(&self) -> watch::Receiver<PendingStatus> {
        self.status.subscribe()
    }

    fn publish(&self) {
        let status = PendingStatus {
            len: self.entries.len(),
            added: self.added,
        };
        // send_replace never fails, even with no receivers.
        self.status.send_replace(status);
    }
}
