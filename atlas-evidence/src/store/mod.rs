//! Persistent evidence store.
//!
//! Keys are `prefix ++ height (big endian) ++ hash` so that a prefix scan
//! returns evidence grouped by partition and ordered by height.

pub mod db;
pub mod redb;

use std::sync::Arc;

use atlas_common::crypto::hash::Hash32;
use atlas_common::env::consensus::evidence::Evidence;
use atlas_common::error::{AtlasError, Result};
use serde::{Deserialize, Serialize};

use self::db::{BatchOp, Db};

const PREFIX_COMMITTED: u8 = 0x00;
const PREFIX_PENDING: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Pending,
    Committed,
}

impl Stage {
    fn prefix(self) -> u8 {
        match self {
            Stage::Pending => PREFIX_PENDING,
            Stage::Committed => PREFIX_COMMITTED,
        }
    }
}

/// What is written under each key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub evidence: Evidence,
    pub size: u64,
    /// Arrival order among evidence at the same height.
    pub seq: u64,
    pub stage: Stage,
}

fn key(stage: Stage, height: u64, hash: &Hash32) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 + hash.len());
    key.push(stage.prefix());
    key.extend_from_slice(&height.to_be_bytes());
    key.extend_from_slice(hash);
    key
}

#[derive(Clone)]
pub struct EvidenceStore {
    db: Arc<dyn Db>,
}

impl EvidenceStore {
    pub fn new(db: Arc<dyn Db>) -> Self {
        Self { db }
    }

    pub fn is_pending(&self, ev: &Evidence) -> Result<bool> {
        self.db.has(&key(Stage::Pending, ev.height(), &ev.hash()))
    }

    pub fn is_committed(&self, ev: &Evidence) -> Result<bool> {
        self.db.has(&key(Stage::Committed, ev.height(), &ev.hash()))
    }

    pub fn get_pending(&self, height: u64, hash: &Hash32) -> Result<Option<EvidenceRecord>> {
        match self.db.get(&key(Stage::Pending, height, hash))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn insert_pending(&self, evidence: &Evidence, size: u64, seq: u64) -> Result<()> {
        let record = EvidenceRecord {
            evidence: evidence.clone(),
            size,
            seq,
            stage: Stage::Pending,
        };
        let bytes = bincode::serialize(&record)?;
        self.db
            .set(&key(Stage::Pending, evidence.height(), &evidence.hash()), &bytes)
    }

    /// Moves every item to the committed partition in a single batch. Items
    /// that were never pending are still recorded as committed.
    pub fn mark_committed(&self, evidence: &[Evidence]) -> Result<()> {
        let mut ops = Vec::with_capacity(evidence.len() * 2);
        for ev in evidence {
            let hash = ev.hash();
            let record = EvidenceRecord {
                evidence: ev.clone(),
                size: ev.size()?,
                seq: 0,
                stage: Stage::Committed,
            };
            ops.push(BatchOp::Put(
                key(Stage::Committed, ev.height(), &hash),
                bincode::serialize(&record)?,
            ));
            ops.push(BatchOp::Delete(key(Stage::Pending, ev.height(), &hash)));
        }
        self.db.write_batch(ops)
    }

    pub fn remove_pending_batch(&self, items: &[(u64, Hash32)]) -> Result<()> {
        let ops = items
            .iter()
            .map(|(height, hash)| BatchOp::Delete(key(Stage::Pending, *height, hash)))
            .collect();
        self.db.write_batch(ops)
    }

    /// Pending records ordered by height, then arrival.
    pub fn list_pending(&self) -> Result<Vec<EvidenceRecord>> {
        let mut records = self.list(Stage::Pending)?;
        records.sort_by_key(|r| (r.evidence.height(), r.seq));
        Ok(records)
    }

    pub fn list_committed(&self) -> Result<Vec<EvidenceRecord>> {
        self.list(Stage::Committed)
    }

    fn list(&self, stage: Stage) -> Result<Vec<EvidenceRecord>> {
        self.db
            .iter_prefix(&[stage.prefix()])?
            .into_iter()
            .map(|(_, bytes)| decode(&bytes))
            .collect()
    }
}

fn decode(bytes: &[u8]) -> Result<EvidenceRecord> {
    bincode::deserialize(bytes)
        .map_err(|e| AtlasError::Storage(format!("corrupt evidence record: {}", e)))
}
