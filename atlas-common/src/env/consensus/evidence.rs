//! Proof that a validator misbehaved.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::{
    crypto::hash::{hash_parts, Hash32},
    env::{
        block::{Header, LightBlock, SignedHeader},
        consensus::types::Vote,
        validator::{Address, Validator, ValidatorSet},
    },
    error::{AtlasError, Result},
};

/// Evidence of misbehavior. The set of kinds is closed; verification
/// dispatches on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Evidence {
    DuplicateVote(DuplicateVoteEvidence),
    LightClientAttack(LightClientAttackEvidence),
}

impl Evidence {
    pub fn kind(&self) -> &'static str {
        match self {
            Evidence::DuplicateVote(_) => "DuplicateVoteEvidence",
            Evidence::LightClientAttack(_) => "LightClientAttackEvidence",
        }
    }

    /// Height the misbehavior is attributed to. For light client attacks this
    /// is the common height, where this node holds the trusted data.
    pub fn height(&self) -> u64 {
        match self {
            Evidence::DuplicateVote(ev) => ev.vote_a.height,
            Evidence::LightClientAttack(ev) => ev.common_height,
        }
    }

    /// Time of the block at `height()`.
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            Evidence::DuplicateVote(ev) => ev.timestamp,
            Evidence::LightClientAttack(ev) => ev.timestamp,
        }
    }

    /// Content-derived identity. Two reports of the same misbehavior hash
    /// to the same value.
    pub fn hash(&self) -> Hash32 {
        match self {
            Evidence::DuplicateVote(ev) => ev.hash(),
            Evidence::LightClientAttack(ev) => ev.hash(),
        }
    }

    pub fn bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Encoded size in bytes; the unit of block evidence budgets.
    pub fn size(&self) -> Result<u64> {
        Ok(bincode::serialized_size(self)?)
    }

    /// Validators implicated by this evidence.
    pub fn addresses(&self) -> Vec<Address> {
        match self {
            Evidence::DuplicateVote(ev) => vec![ev.vote_a.validator_address],
            Evidence::LightClientAttack(ev) => {
                ev.byzantine_validators.iter().map(|v| v.address).collect()
            }
        }
    }

    pub fn validate_basic(&self) -> Result<()> {
        match self {
            Evidence::DuplicateVote(ev) => ev.validate_basic(),
            Evidence::LightClientAttack(ev) => ev.validate_basic(),
        }
    }
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{{height: {}, hash: {}}}",
            self.kind(),
            self.height(),
            hex::encode_upper(self.hash())
        )
    }
}

impl From<DuplicateVoteEvidence> for Evidence {
    fn from(ev: DuplicateVoteEvidence) -> Self {
        Evidence::DuplicateVote(ev)
    }
}

impl From<LightClientAttackEvidence> for Evidence {
    fn from(ev: LightClientAttackEvidence) -> Self {
        Evidence::LightClientAttack(ev)
    }
}

/// A validator signed two votes for the same height, round and type but
/// different blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateVoteEvidence {
    pub vote_a: Vote,
    pub vote_b: Vote,
    pub total_voting_power: u64,
    pub validator_power: u64,
    pub timestamp: DateTime<Utc>,
}

impl DuplicateVoteEvidence {
    /// Builds the evidence with votes in canonical order (lower block id
    /// first). `block_time` is the time of the block at the votes' height and
    /// `val_set` the validator set at that height.
    pub fn new(
        vote1: Vote,
        vote2: Vote,
        block_time: DateTime<Utc>,
        val_set: &ValidatorSet,
    ) -> Result<Self> {
        let (_, val) = val_set.get_by_address(&vote1.validator_address).ok_or_else(|| {
            AtlasError::InvalidEvidence(format!(
                "validator {} not in validator set",
                vote1.validator_address
            ))
        })?;
        let validator_power = val.voting_power;

        let (vote_a, vote_b) = if vote1.block_id < vote2.block_id {
            (vote1, vote2)
        } else {
            (vote2, vote1)
        };

        Ok(Self {
            vote_a,
            vote_b,
            total_voting_power: val_set.total_voting_power(),
            validator_power,
            timestamp: block_time,
        })
    }

    fn hash(&self) -> Hash32 {
        hash_parts(&[
            &b"duplicate_vote"[..],
            &self.vote_a.height.to_be_bytes(),
            &self.vote_a.round.to_be_bytes(),
            self.vote_a.validator_address.as_bytes(),
            &self.vote_a.block_id.hash,
            &self.vote_b.block_id.hash,
            &self.vote_a.signature,
            &self.vote_b.signature,
        ])
    }

    pub fn validate_basic(&self) -> Result<()> {
        self.vote_a
            .validate_basic()
            .map_err(|e| AtlasError::InvalidEvidence(format!("invalid VoteA: {}", e)))?;
        self.vote_b
            .validate_basic()
            .map_err(|e| AtlasError::InvalidEvidence(format!("invalid VoteB: {}", e)))?;

        // Enforce canonical ordering so the encoding is unique.
        if self.vote_a.block_id >= self.vote_b.block_id {
            return Err(AtlasError::InvalidEvidence(
                "duplicate votes in invalid order".to_string(),
            ));
        }
        Ok(())
    }
}

/// A validator set signed a header that conflicts with this node's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightClientAttackEvidence {
    pub conflicting_block: LightBlock,
    pub common_height: u64,
    /// Implicated validators, ordered by voting power then address.
    pub byzantine_validators: Vec<Validator>,
    pub total_voting_power: u64,
    pub timestamp: DateTime<Utc>,
}

impl LightClientAttackEvidence {
    fn hash(&self) -> Hash32 {
        hash_parts(&[
            &b"light_client_attack"[..],
            &self.conflicting_block.hash(),
            &self.common_height.to_be_bytes(),
        ])
    }

    pub fn conflicting_height(&self) -> u64 {
        self.conflicting_block.height()
    }

    /// A conflicting header whose state fields diverge from the trusted
    /// header cannot have been derived from the correct chain (a lunatic
    /// attack).
    pub fn conflicting_header_is_invalid(&self, trusted: &Header) -> bool {
        let conflicting = self.conflicting_block.header();
        trusted.validators_hash != conflicting.validators_hash
            || trusted.next_validators_hash != conflicting.next_validators_hash
            || trusted.consensus_hash != conflicting.consensus_hash
            || trusted.app_hash != conflicting.app_hash
            || trusted.last_results_hash != conflicting.last_results_hash
    }

    /// Derives the validators responsible for the attack:
    /// - lunatic: members of the common set that signed the conflicting header;
    /// - equivocation (same round): validators that signed both headers;
    /// - amnesia (different rounds): nobody can be singled out.
    pub fn get_byzantine_validators(
        &self,
        common_vals: &ValidatorSet,
        trusted: &SignedHeader,
    ) -> Vec<Validator> {
        let conflicting_commit = self.conflicting_block.commit();
        let mut validators = Vec::new();

        if self.conflicting_header_is_invalid(&trusted.header) {
            for sig in &conflicting_commit.signatures {
                if !sig.for_block() {
                    continue;
                }
                if let Some((_, val)) = common_vals.get_by_address(&sig.validator_address) {
                    validators.push(val.clone());
                }
            }
        } else if trusted.commit.round == conflicting_commit.round {
            // Same validator hash, so both commits index the same set.
            for (idx, sig_a) in conflicting_commit.signatures.iter().enumerate() {
                if sig_a.is_absent() {
                    continue;
                }
                match trusted.commit.signatures.get(idx) {
                    Some(sig_b) if !sig_b.is_absent() => {}
                    _ => continue,
                }
                if let Some((_, val)) = self
                    .conflicting_block
                    .validator_set
                    .get_by_address(&sig_a.validator_address)
                {
                    validators.push(val.clone());
                }
            }
        }

        ValidatorSet::sort_by_voting_power(&mut validators);
        validators
    }

    pub fn validate_basic(&self) -> Result<()> {
        let chain_id = self.conflicting_block.header().chain_id.clone();
        self.conflicting_block
            .validate_basic(&chain_id)
            .map_err(|e| AtlasError::InvalidEvidence(format!("invalid conflicting light block: {}", e)))?;

        if self.common_height == 0 {
            return Err(AtlasError::InvalidEvidence("common height is zero".to_string()));
        }
        if self.common_height > self.conflicting_height() {
            return Err(AtlasError::InvalidEvidence(format!(
                "common height is ahead of the conflicting block height ({} > {})",
                self.common_height,
                self.conflicting_height()
            )));
        }
        if self.total_voting_power == 0 {
            return Err(AtlasError::InvalidEvidence("total voting power is zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::block::BlockId;
    use crate::env::consensus::types::SignedMsgType;
    use chrono::TimeZone;

    fn vote(block_hash: u8, sig: u8) -> Vote {
        Vote {
            msg_type: SignedMsgType::Prevote,
            height: 7,
            round: 0,
            block_id: BlockId::new([block_hash; 32], 1, [0; 32]),
            timestamp: Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap(),
            validator_address: Address::from_public_key(&[1; 32]),
            validator_index: 0,
            signature: vec![sig; 64],
        }
    }

    fn val_set() -> ValidatorSet {
        ValidatorSet::new(vec![Validator::new([1; 32], 10), Validator::new([2; 32], 5)])
    }

    #[test]
    fn test_new_orders_votes_by_block_id() {
        let time = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        let ev = DuplicateVoteEvidence::new(vote(9, 1), vote(2, 2), time, &val_set()).unwrap();
        assert_eq!(ev.vote_a.block_id.hash, [2; 32]);
        assert_eq!(ev.validator_power, 10);
        assert_eq!(ev.total_voting_power, 15);
        assert!(ev.validate_basic().is_ok());
    }

    #[test]
    fn test_same_misbehavior_has_same_identity() {
        let time = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        let a: Evidence = DuplicateVoteEvidence::new(vote(1, 1), vote(2, 2), time, &val_set())
            .unwrap()
            .into();
        let b: Evidence = DuplicateVoteEvidence::new(vote(2, 2), vote(1, 1), time, &val_set())
            .unwrap()
            .into();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.size().unwrap(), a.bytes().unwrap().len() as u64);
    }

    #[test]
    fn test_misordered_votes_fail_validation() {
        let time = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        let mut ev = DuplicateVoteEvidence::new(vote(1, 1), vote(2, 2), time, &val_set()).unwrap();
        std::mem::swap(&mut ev.vote_a, &mut ev.vote_b);
        assert!(ev.validate_basic().is_err());
    }

    #[test]
    fn test_unknown_validator_is_rejected() {
        let time = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        let mut v = vote(1, 1);
        v.validator_address = Address([0xAA; 20]);
        assert!(DuplicateVoteEvidence::new(v, vote(2, 2), time, &val_set()).is_err());
    }
}
