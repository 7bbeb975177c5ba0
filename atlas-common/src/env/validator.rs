//! Validators and validator sets, plus the commit checks that are
//! evaluated against a historical set.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    auth::ed25519::verify_with_key,
    crypto::hash::{hash_bytes, Hash32},
    env::block::{BlockId, Commit},
    error::{AtlasError, Result},
};

/// Validator address: the first 20 bytes of the SHA-256 of its public key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let digest = hash_bytes(public_key);
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest[..20]);
        Address(address)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    pub pub_key: [u8; 32],
    pub voting_power: u64,
}

impl Validator {
    pub fn new(pub_key: [u8; 32], voting_power: u64) -> Self {
        Self {
            address: Address::from_public_key(&pub_key),
            pub_key,
            voting_power,
        }
    }
}

/// A set of validators ordered by voting power (descending), ties broken
/// by address (ascending). Commit signatures are indexed in this order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
}

impl ValidatorSet {
    pub fn new(mut validators: Vec<Validator>) -> Self {
        Self::sort_by_voting_power(&mut validators);
        Self { validators }
    }

    /// Canonical ordering used for validator sets and Byzantine validator lists.
    pub fn sort_by_voting_power(validators: &mut [Validator]) {
        validators.sort_by(|a, b| {
            b.voting_power
                .cmp(&a.voting_power)
                .then_with(|| a.address.cmp(&b.address))
        });
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_voting_power(&self) -> u64 {
        self.validators
            .iter()
            .fold(0u64, |acc, v| acc.saturating_add(v.voting_power))
    }

    pub fn get_by_address(&self, address: &Address) -> Option<(usize, &Validator)> {
        self.validators
            .iter()
            .enumerate()
            .find(|(_, v)| v.address == *address)
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    pub fn hash(&self) -> Hash32 {
        let mut bytes = Vec::with_capacity(self.validators.len() * 60);
        for v in &self.validators {
            bytes.extend_from_slice(v.address.as_bytes());
            bytes.extend_from_slice(&v.pub_key);
            bytes.extend_from_slice(&v.voting_power.to_be_bytes());
        }
        hash_bytes(&bytes)
    }

    /// Checks that more than 2/3 of this set's voting power signed `block_id`
    /// at `height`. Signatures must be positionally aligned with the set.
    pub fn verify_commit_light(
        &self,
        chain_id: &str,
        block_id: &BlockId,
        height: u64,
        commit: &Commit,
    ) -> Result<()> {
        if self.len() != commit.signatures.len() {
            return Err(AtlasError::InvalidCommit(format!(
                "wrong set size: {} vs {}",
                self.len(),
                commit.signatures.len()
            )));
        }
        if height != commit.height {
            return Err(AtlasError::InvalidCommit(format!(
                "wrong height: {} vs {}",
                height, commit.height
            )));
        }
        if *block_id != commit.block_id {
            return Err(AtlasError::InvalidCommit(
                "commit is for a different block id".to_string(),
            ));
        }

        let needed = voting_power_threshold(self.total_voting_power(), 2, 3);
        let mut tallied: u64 = 0;

        for (idx, sig) in commit.signatures.iter().enumerate() {
            if !sig.for_block() {
                continue;
            }
            let val = &self.validators[idx];
            if val.address != sig.validator_address {
                return Err(AtlasError::InvalidCommit(format!(
                    "wrong validator address at index {}: expected {}, got {}",
                    idx, val.address, sig.validator_address
                )));
            }

            let sign_bytes = commit.vote_sign_bytes(chain_id, idx)?;
            if !verify_with_key(&sign_bytes, &sig.signature, &val.pub_key)? {
                return Err(AtlasError::InvalidSignature(format!(
                    "wrong signature from validator {} at index {}",
                    val.address, idx
                )));
            }

            tallied = tallied.saturating_add(val.voting_power);
            if tallied > needed {
                return Ok(());
            }
        }

        Err(AtlasError::InvalidCommit(format!(
            "insufficient voting power: got {}, needed more than {}",
            tallied, needed
        )))
    }

    /// Checks that signers from this (trusted) set holding more than
    /// `numerator / denominator` of its power signed `commit`. Signatures are
    /// matched by address, so the commit may come from a different set.
    pub fn verify_commit_light_trusting(
        &self,
        chain_id: &str,
        commit: &Commit,
        numerator: u64,
        denominator: u64,
    ) -> Result<()> {
        if denominator == 0 || numerator > denominator {
            return Err(AtlasError::Other(format!(
                "invalid trust level {}/{}",
                numerator, denominator
            )));
        }

        let needed = voting_power_threshold(self.total_voting_power(), numerator, denominator);
        let mut tallied: u64 = 0;
        let mut seen = HashSet::new();

        for (idx, sig) in commit.signatures.iter().enumerate() {
            if !sig.for_block() {
                continue;
            }
            let Some((val_idx, val)) = self.get_by_address(&sig.validator_address) else {
                continue;
            };
            if !seen.insert(val_idx) {
                return Err(AtlasError::InvalidCommit(format!(
                    "double vote from validator {}",
                    val.address
                )));
            }

            let sign_bytes = commit.vote_sign_bytes(chain_id, idx)?;
            if !verify_with_key(&sign_bytes, &sig.signature, &val.pub_key)? {
                return Err(AtlasError::InvalidSignature(format!(
                    "wrong signature from validator {} at index {}",
                    val.address, idx
                )));
            }

            tallied = tallied.saturating_add(val.voting_power);
            if tallied > needed {
                return Ok(());
            }
        }

        Err(AtlasError::InvalidCommit(format!(
            "insufficient trusted voting power: got {}, needed more than {}",
            tallied, needed
        )))
    }
}

fn voting_power_threshold(total: u64, numerator: u64, denominator: u64) -> u64 {
    ((total as u128 * numerator as u128) / denominator as u128) as u64
}
