//! Block headers, commits and the light-client views built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    crypto::hash::{hash_bytes, Hash32},
    env::{
        consensus::types::{vote_sign_bytes, SignedMsgType},
        validator::{Address, ValidatorSet},
    },
    error::{AtlasError, Result},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: Hash32,
}

/// Identifies a block by its header hash and part set header.
///
/// The derived ordering (hash first) is the canonical order used to
/// arrange the two votes of a duplicate-vote evidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId {
    pub hash: Hash32,
    pub part_set_header: PartSetHeader,
}

impl BlockId {
    pub fn new(hash: Hash32, parts_total: u32, parts_hash: Hash32) -> Self {
        Self {
            hash,
            part_set_header: PartSetHeader { total: parts_total, hash: parts_hash },
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == BlockId::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub chain_id: String,
    pub height: u64,
    pub time: DateTime<Utc>,
    pub last_block_id: BlockId,
    pub validators_hash: Hash32,
    pub next_validators_hash: Hash32,
    pub consensus_hash: Hash32,
    pub app_hash: Hash32,
    pub last_results_hash: Hash32,
    pub proposer_address: Address,
}

impl Header {
    pub fn hash(&self) -> Hash32 {
        let mut bytes = Vec::with_capacity(256);
        bytes.extend_from_slice(self.chain_id.as_bytes());
        bytes.extend_from_slice(&self.height.to_be_bytes());
        bytes.extend_from_slice(&self.time.timestamp().to_be_bytes());
        bytes.extend_from_slice(&self.time.timestamp_subsec_nanos().to_be_bytes());
        bytes.extend_from_slice(&self.last_block_id.hash);
        bytes.extend_from_slice(&self.last_block_id.part_set_header.total.to_be_bytes());
        bytes.extend_from_slice(&self.last_block_id.part_set_header.hash);
        bytes.extend_from_slice(&self.validators_hash);
        bytes.extend_from_slice(&self.next_validators_hash);
        bytes.extend_from_slice(&self.consensus_hash);
        bytes.extend_from_slice(&self.app_hash);
        bytes.extend_from_slice(&self.last_results_hash);
        bytes.extend_from_slice(self.proposer_address.as_bytes());
        hash_bytes(&bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockIdFlag {
    /// No vote was received from the validator.
    Absent,
    /// Voted for the committed block.
    Commit,
    /// Voted for nil.
    Nil,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSig {
    pub block_id_flag: BlockIdFlag,
    pub validator_address: Address,
    pub timestamp: DateTime<Utc>,
    pub signature: Vec<u8>,
}

impl CommitSig {
    pub fn absent() -> Self {
        Self {
            block_id_flag: BlockIdFlag::Absent,
            validator_address: Address::default(),
            timestamp: DateTime::<Utc>::default(),
            signature: Vec::new(),
        }
    }

    pub fn for_block(&self) -> bool {
        self.block_id_flag == BlockIdFlag::Commit
    }

    pub fn is_absent(&self) -> bool {
        self.block_id_flag == BlockIdFlag::Absent
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub height: u64,
    pub round: u32,
    pub block_id: BlockId,
    pub signatures: Vec<CommitSig>,
}

impl Commit {
    /// Reconstructs the precommit signed by the validator at `index`.
    pub fn vote_sign_bytes(&self, chain_id: &str, index: usize) -> Result<Vec<u8>> {
        let sig = self.signatures.get(index).ok_or_else(|| {
            AtlasError::InvalidCommit(format!("no signature at index {}", index))
        })?;
        let block_id = match sig.block_id_flag {
            BlockIdFlag::Commit => self.block_id,
            BlockIdFlag::Nil | BlockIdFlag::Absent => BlockId::default(),
        };
        vote_sign_bytes(
            chain_id,
            SignedMsgType::Precommit,
            self.height,
            self.round,
            &block_id,
            &sig.timestamp,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedHeader {
    pub header: Header,
    pub commit: Commit,
}

impl SignedHeader {
    pub fn validate_basic(&self, chain_id: &str) -> Result<()> {
        if self.header.chain_id != chain_id {
            return Err(AtlasError::InvalidCommit(format!(
                "header belongs to another chain {:?}, not {:?}",
                self.header.chain_id, chain_id
            )));
        }
        if self.commit.height != self.header.height {
            return Err(AtlasError::InvalidCommit(format!(
                "header and commit height mismatch: {} vs {}",
                self.header.height, self.commit.height
            )));
        }
        if self.commit.block_id.hash != self.header.hash() {
            return Err(AtlasError::InvalidCommit(
                "commit signs a block other than the header".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightBlock {
    pub signed_header: SignedHeader,
    pub validator_set: ValidatorSet,
}

impl LightBlock {
    pub fn height(&self) -> u64 {
        self.signed_header.header.height
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.signed_header.header.time
    }

    pub fn hash(&self) -> Hash32 {
        self.signed_header.header.hash()
    }

    pub fn header(&self) -> &Header {
        &self.signed_header.header
    }

    pub fn commit(&self) -> &Commit {
        &self.signed_header.commit
    }

    pub fn validate_basic(&self, chain_id: &str) -> Result<()> {
        if self.validator_set.is_empty() {
            return Err(AtlasError::InvalidCommit("missing validator set".to_string()));
        }
        self.signed_header.validate_basic(chain_id)?;
        if self.validator_set.hash() != self.signed_header.header.validators_hash {
            return Err(AtlasError::InvalidCommit(
                "expected validator hash of header to match validator set hash".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub block_id: BlockId,
    pub header: Header,
}

impl BlockMeta {
    pub fn new(header: Header, parts_total: u32, parts_hash: Hash32) -> Self {
        Self {
            block_id: BlockId::new(header.hash(), parts_total, parts_hash),
            header,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn header() -> Header {
        Header {
            chain_id: "test_chain".to_string(),
            height: 3,
            time: Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap(),
            last_block_id: BlockId::default(),
            validators_hash: [1; 32],
            next_validators_hash: [2; 32],
            consensus_hash: [3; 32],
            app_hash: [4; 32],
            last_results_hash: [5; 32],
            proposer_address: Address([6; 20]),
        }
    }

    #[test]
    fn test_header_hash_covers_time() {
        let a = header();
        let mut b = header();
        b.time = b.time + chrono::Duration::seconds(1);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_signed_header_rejects_foreign_commit() {
        let h = header();
        let commit = Commit {
            height: 3,
            round: 0,
            block_id: BlockId::new([9; 32], 1, [0; 32]),
            signatures: vec![],
        };
        let sh = SignedHeader { header: h.clone(), commit };
        assert!(sh.validate_basic("test_chain").is_err());

        let commit = Commit {
            height: 3,
            round: 0,
            block_id: BlockId::new(h.hash(), 1, [0; 32]),
            signatures: vec![],
        };
        let sh = SignedHeader { header: h, commit };
        assert!(sh.validate_basic("test_chain").is_ok());
        assert!(sh.validate_basic("other_chain").is_err());
    }

    #[test]
    fn test_block_id_order_is_hash_first() {
        let low = BlockId::new([1; 32], 99, [9; 32]);
        let high = BlockId::new([2; 32], 1, [0; 32]);
        assert!(low < high);
        assert!(BlockId::default().is_zero());
    }
}
