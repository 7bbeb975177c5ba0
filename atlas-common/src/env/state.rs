use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockParams {
    pub max_bytes: u64,
    pub max_gas: i64,
}

impl Default for BlockParams {
    fn default() -> Self {
        Self { max_bytes: 22_020_096, max_gas: -1 }
    }
}

/// Evidence limits. Evidence is stale only once it is older than both
/// `max_age_num_blocks` and `max_age_duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceParams {
    pub max_age_num_blocks: u64,
    pub max_age_duration: Duration,
    /// Byte budget for evidence in a single block.
    pub max_bytes: u64,
}

impl Default for EvidenceParams {
    fn default() -> Self {
        Self {
            max_age_num_blocks: 100_000,
            max_age_duration: Duration::from_secs(48 * 60 * 60),
            max_bytes: 1_048_576,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub block: BlockParams,
    pub evidence: EvidenceParams,
}

/// Snapshot of the chain tip as seen after the last committed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub chain_id: String,
    pub initial_height: u64,
    pub last_block_height: u64,
    pub last_block_time: DateTime<Utc>,
    pub consensus_params: ConsensusParams,
}

impl ChainState {
    pub fn evidence_params(&self) -> &EvidenceParams {
        &self.consensus_params.evidence
    }
}
