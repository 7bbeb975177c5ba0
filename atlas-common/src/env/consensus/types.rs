use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::{
    auth::ed25519::verify_with_key,
    env::{block::BlockId, validator::Address},
    error::{AtlasError, Result},
};

/// Vote phases that carry a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignedMsgType {
    Prevote,
    Precommit,
}

impl fmt::Display for SignedMsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignedMsgType::Prevote => "Prevote",
            SignedMsgType::Precommit => "Precommit",
        };
        write!(f, "{}", s)
    }
}

/// A signed vote from a validator for a block (or nil) at a height/round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub msg_type: SignedMsgType,
    pub height: u64,
    pub round: u32,
    pub block_id: BlockId,
    pub timestamp: DateTime<Utc>,
    pub validator_address: Address,
    pub validator_index: u32,
    pub signature: Vec<u8>,
}

impl Vote {
    pub fn sign_bytes(&self, chain_id: &str) -> Result<Vec<u8>> {
        vote_sign_bytes(
            chain_id,
            self.msg_type,
            self.height,
            self.round,
            &self.block_id,
            &self.timestamp,
        )
    }

    pub fn validate_basic(&self) -> Result<()> {
        if self.height == 0 {
            return Err(AtlasError::InvalidEvidence("vote has zero height".to_string()));
        }
        if self.signature.is_empty() {
            return Err(AtlasError::InvalidEvidence("vote signature is missing".to_string()));
        }
        if self.signature.len() != 64 {
            return Err(AtlasError::InvalidEvidence(format!(
                "vote signature has wrong length {}",
                self.signature.len()
            )));
        }
        Ok(())
    }

    /// Verifies the signature against `pub_key` for `chain_id`.
    pub fn verify(&self, chain_id: &str, pub_key: &[u8; 32]) -> Result<()> {
        let sign_bytes = self.sign_bytes(chain_id)?;
        if verify_with_key(&sign_bytes, &self.signature, pub_key)? {
            Ok(())
        } else {
            Err(AtlasError::InvalidSignature(format!(
                "invalid signature from {} on {} at {}/{}",
                self.validator_address, self.msg_type, self.height, self.round
            )))
        }
    }
}

#[derive(Serialize)]
struct CanonicalVote<'a> {
    chain_id: &'a str,
    msg_type: SignedMsgType,
    height: u64,
    round: u32,
    block_id: &'a BlockId,
    timestamp: &'a DateTime<Utc>,
}

/// Bytes a validator signs for a vote. The validator address and index are
/// not covered, so the same bytes are reproducible from a commit signature.
pub fn vote_sign_bytes(
    chain_id: &str,
    msg_type: SignedMsgType,
    height: u64,
    round: u32,
    block_id: &BlockId,
    timestamp: &DateTime<Utc>,
) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&CanonicalVote {
        chain_id,
        msg_type,
        height,
        round,
        block_id,
        timestamp,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn vote(round: u32) -> Vote {
        Vote {
            msg_type: SignedMsgType::Precommit,
            height: 4,
            round,
            block_id: BlockId::new([3; 32], 1, [4; 32]),
            timestamp: Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap(),
            validator_address: Address([1; 20]),
            validator_index: 0,
            signature: vec![0; 64],
        }
    }

    #[test]
    fn test_sign_bytes_ignore_validator_identity() {
        let a = vote(0);
        let mut b = vote(0);
        b.validator_address = Address([2; 20]);
        b.validator_index = 5;
        assert_eq!(a.sign_bytes("c").unwrap(), b.sign_bytes("c").unwrap());
        assert_ne!(a.sign_bytes("c").unwrap(), a.sign_bytes("d").unwrap());
        assert_ne!(a.sign_bytes("c").unwrap(), vote(1).sign_bytes("c").unwrap());
    }

    #[test]
    fn test_validate_basic() {
        assert!(vote(0).validate_basic().is_ok());

        let mut v = vote(0);
        v.signature.clear();
        assert!(v.validate_basic().is_err());

        let mut v = vote(0);
        v.height = 0;
        assert!(v.validate_basic().is_err());
    }
}
