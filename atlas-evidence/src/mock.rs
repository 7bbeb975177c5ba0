//! Test doubles for the pool's collaborators and builders for evidence
//! fixtures.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use atlas_common::auth::ed25519::Ed25519Authenticator;
use atlas_common::auth::Authenticator;
use atlas_common::crypto::hash::Hash32;
use atlas_common::crypto::hash::hash_bytes;
use atlas_common::env::block::{
    BlockId, BlockIdFlag, BlockMeta, Commit, CommitSig, Header, LightBlock, SignedHeader,
};
use atlas_common::env::consensus::evidence::{
    DuplicateVoteEvidence, Evidence, LightClientAttackEvidence,
};
use atlas_common::env::consensus::types::{SignedMsgType, Vote};
use atlas_common::env::state::{BlockParams, ChainState, ConsensusParams, EvidenceParams};
use atlas_common::env::validator::{Address, Validator, ValidatorSet};
use atlas_common::error::{AtlasError, Result};
use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::ports::{BlockStore, StateProvider};

pub const DEFAULT_VALIDATOR_POWER: u64 = 10;

/// 2019-01-01T00:00:00Z, the block time fixtures are anchored on.
pub fn default_evidence_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Evidence params used by most fixtures: 20 blocks, 20 minutes, 1000 bytes.
pub fn test_evidence_params() -> EvidenceParams {
    EvidenceParams {
        max_age_num_blocks: 20,
        max_age_duration: Duration::from_secs(20 * 60),
        max_bytes: 1000,
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// A validator with an in-memory signing key.
pub struct MockValidator {
    signer: Ed25519Authenticator,
    power: u64,
}

impl MockValidator {
    pub fn new(power: u64) -> Self {
        Self {
            signer: Ed25519Authenticator::new(SigningKey::generate(&mut OsRng)),
            power,
        }
    }

    pub fn pub_key(&self) -> [u8; 32] {
        self.signer.public_key()
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.pub_key())
    }

    pub fn validator(&self) -> Validator {
        Validator::new(self.pub_key(), self.power)
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signer.sign(message)
    }

    pub fn sign_vote(&self, vote: &mut Vote, chain_id: &str) -> Result<()> {
        vote.signature = self.sign(&vote.sign_bytes(chain_id)?);
        Ok(())
    }
}

impl fmt::Debug for MockValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockValidator")
            .field("address", &self.address())
            .field("power", &self.power)
            .finish()
    }
}

pub fn random_hash() -> Hash32 {
    let mut hash = [0u8; 32];
    OsRng.fill_bytes(&mut hash);
    hash
}

pub fn random_block_id() -> BlockId {
    BlockId::new(random_hash(), 1000, random_hash())
}

/// `n` validators with equal power. The returned signers are aligned with
/// the set's canonical order.
pub fn random_validator_set(n: usize, power: u64) -> (ValidatorSet, Vec<MockValidator>) {
    let mut signers: Vec<MockValidator> = (0..n).map(|_| MockValidator::new(power)).collect();
    let set = ValidatorSet::new(signers.iter().map(|s| s.validator()).collect());
    signers.sort_by_key(|s| {
        set.get_by_address(&s.address())
            .map(|(idx, _)| idx)
            .unwrap_or(usize::MAX)
    });
    (set, signers)
}

#[allow(clippy::too_many_arguments)]
pub fn make_vote(
    val: &MockValidator,
    chain_id: &str,
    validator_index: u32,
    height: u64,
    round: u32,
    msg_type: SignedMsgType,
    block_id: BlockId,
    time: DateTime<Utc>,
) -> Result<Vote> {
    let mut vote = Vote {
        msg_type,
        height,
        round,
        block_id,
        timestamp: time,
        validator_address: val.address(),
        validator_index,
        signature: Vec::new(),
    };
    val.sign_vote(&mut vote, chain_id)?;
    Ok(vote)
}

/// Duplicate vote evidence signed by `val` at `height`, attributed to a
/// block with time `time`. Each call yields distinct evidence.
pub fn try_mock_duplicate_vote_evidence(
    height: u64,
    time: DateTime<Utc>,
    val: &MockValidator,
    chain_id: &str,
) -> Result<Evidence> {
    let vote_a = make_vote(val, chain_id, 0, height, 0, SignedMsgType::Prevote, random_block_id(), time)?;
    let vote_b = make_vote(val, chain_id, 0, height, 0, SignedMsgType::Prevote, random_block_id(), time)?;
    let val_set = ValidatorSet::new(vec![val.validator()]);
    Ok(DuplicateVoteEvidence::new(vote_a, vote_b, time, &val_set)?.into())
}

/// Panicking shorthand for [`try_mock_duplicate_vote_evidence`].
pub fn mock_duplicate_vote_evidence(
    height: u64,
    time: DateTime<Utc>,
    val: &MockValidator,
    chain_id: &str,
) -> Evidence {
    match try_mock_duplicate_vote_evidence(height, time, val, chain_id) {
        Ok(ev) => ev,
        Err(e) => panic!("failed to build mock evidence: {}", e),
    }
}

/// Header with random state hashes.
pub fn make_header(chain_id: &str, height: u64, time: DateTime<Utc>, validators_hash: Hash32) -> Header {
    Header {
        chain_id: chain_id.to_string(),
        height,
        time,
        last_block_id: random_block_id(),
        validators_hash,
        next_validators_hash: random_hash(),
        consensus_hash: random_hash(),
        app_hash: random_hash(),
        last_results_hash: random_hash(),
        proposer_address: Address::default(),
    }
}

/// Commit where every signer precommits `block_id`. `signers` must be
/// aligned with `val_set`.
pub fn make_commit(
    block_id: BlockId,
    height: u64,
    round: u32,
    signers: &[MockValidator],
    chain_id: &str,
    time: DateTime<Utc>,
) -> Result<Commit> {
    let mut commit = Commit {
        height,
        round,
        block_id,
        signatures: signers
            .iter()
            .map(|s| CommitSig {
                block_id_flag: BlockIdFlag::Commit,
                validator_address: s.address(),
                timestamp: time,
                signature: Vec::new(),
            })
            .collect(),
    };
    for (idx, signer) in signers.iter().enumerate() {
        let sign_bytes = commit.vote_sign_bytes(chain_id, idx)?;
        commit.signatures[idx].signature = signer.sign(&sign_bytes);
    }
    Ok(commit)
}

/// Placeholder commit with a single unsigned entry, for block store filler.
pub fn make_unsigned_commit(height: u64, val_addr: Address) -> Commit {
    Commit {
        height,
        round: 0,
        block_id: BlockId::default(),
        signatures: vec![CommitSig {
            block_id_flag: BlockIdFlag::Commit,
            validator_address: val_addr,
            timestamp: default_evidence_time(),
            signature: b"Signature".to_vec(),
        }],
    }
}

pub fn create_state(chain_id: &str, height: u64, params: EvidenceParams) -> ChainState {
    ChainState {
        chain_id: chain_id.to_string(),
        initial_height: 1,
        last_block_height: height,
        last_block_time: default_evidence_time(),
        consensus_params: ConsensusParams {
            block: BlockParams::default(),
            evidence: params,
        },
    }
}

/// In-memory state provider. Validator sets can be pinned per height; any
/// other height falls back to the default set.
#[derive(Default)]
pub struct MockStateProvider {
    state: Mutex<Option<ChainState>>,
    validators: Mutex<HashMap<u64, ValidatorSet>>,
    default_validators: Mutex<Option<ValidatorSet>>,
}

impl MockStateProvider {
    pub fn new(state: ChainState) -> Self {
        let provider = Self::default();
        *lock(&provider.state) = Some(state);
        provider
    }

    pub fn with_validators(self, val_set: ValidatorSet) -> Self {
        *lock(&self.default_validators) = Some(val_set);
        self
    }

    pub fn set_state(&self, state: ChainState) {
        *lock(&self.state) = Some(state);
    }

    pub fn set_validators_at(&self, height: u64, val_set: ValidatorSet) {
        lock(&self.validators).insert(height, val_set);
    }
}

impl StateProvider for MockStateProvider {
    fn load(&self) -> Result<ChainState> {
        lock(&self.state)
            .clone()
            .ok_or_else(|| AtlasError::NotFound("no chain state".to_string()))
    }

    fn load_validators(&self, height: u64) -> Result<ValidatorSet> {
        if let Some(set) = lock(&self.validators).get(&height) {
            return Ok(set.clone());
        }
        lock(&self.default_validators)
            .clone()
            .ok_or_else(|| AtlasError::NotFound(format!("no validator set for height {}", height)))
    }
}

/// State provider for a single validator with power 10, tip at `height`.
pub fn initialize_validator_state(val: &MockValidator, height: u64) -> MockStateProvider {
    let val_set = ValidatorSet::new(vec![val.validator()]);
    MockStateProvider::new(create_state("test_chain", height, test_evidence_params()))
        .with_validators(val_set)
}

/// In-memory block store. Heights without a stored block can optionally
/// answer with a bare header carrying a fixed time.
#[derive(Default)]
pub struct MockBlockStore {
    blocks: Mutex<BTreeMap<u64, (BlockMeta, Commit)>>,
    fallback_time: Mutex<Option<Arc<dyn Fn(u64) -> DateTime<Utc> + Send + Sync>>>,
}

impl MockBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_block(&self, meta: BlockMeta, commit: Commit) {
        lock(&self.blocks).insert(meta.header.height, (meta, commit));
    }

    /// Answer `load_block_meta` for unknown heights with a header whose time
    /// is computed from the height.
    pub fn with_fallback_time<F>(self, f: F) -> Self
    where
        F: Fn(u64) -> DateTime<Utc> + Send + Sync + 'static,
    {
        *lock(&self.fallback_time) = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for MockBlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBlockStore")
            .field("blocks", &lock(&self.blocks).len())
            .field("fallback_time", &"Fn (not Debug)")
            .finish()
    }
}

impl BlockStore for MockBlockStore {
    fn height(&self) -> u64 {
        lock(&self.blocks).keys().next_back().copied().unwrap_or(0)
    }

    fn load_block_meta(&self, height: u64) -> Option<BlockMeta> {
        if let Some((meta, _)) = lock(&self.blocks).get(&height) {
            return Some(meta.clone());
        }
        let fallback = lock(&self.fallback_time).clone()?;
        let header = make_header("", height, fallback(height), [0; 32]);
        Some(BlockMeta::new(header, 1, [0; 32]))
    }

    fn load_block_commit(&self, height: u64) -> Option<Commit> {
        lock(&self.blocks).get(&height).map(|(_, commit)| commit.clone())
    }
}

/// Block store holding blocks `1..=state.last_block_height`, where block `i`
/// has time `default_evidence_time() + i minutes`.
pub fn initialize_block_store(state: &ChainState, val_addr: Address) -> MockBlockStore {
    let store = MockBlockStore::new();
    for i in 1..=state.last_block_height {
        let time = default_evidence_time() + chrono::Duration::minutes(i as i64);
        let mut header = make_header(&state.chain_id, i, time, [0; 32]);
        header.proposer_address = val_addr;
        store.save_block(BlockMeta::new(header, 1, random_hash()), make_unsigned_commit(i, val_addr));
    }
    store
}

/// A light client attack together with the honest chain data it conflicts
/// with.
#[derive(Debug)]
pub struct LightClientAttackFixture {
    pub evidence: LightClientAttackEvidence,
    /// Honest signed header at the common height.
    pub common: SignedHeader,
    /// Honest signed header at the conflicting height.
    pub trusted: SignedHeader,
    pub common_vals: ValidatorSet,
    pub signers: Vec<MockValidator>,
}

impl LightClientAttackFixture {
    /// Block store holding the honest headers.
    pub fn block_store(&self) -> MockBlockStore {
        let store = MockBlockStore::new();
        for sh in [&self.common, &self.trusted] {
            store.save_block(
                BlockMeta::new(sh.header.clone(), 1000, hash_bytes(b"partshash")),
                sh.commit.clone(),
            );
        }
        store
    }
}

fn signed_header(
    header: Header,
    round: u32,
    signers: &[MockValidator],
    time: DateTime<Utc>,
) -> Result<SignedHeader> {
    let block_id = BlockId::new(header.hash(), 1000, hash_bytes(b"partshash"));
    let commit = make_commit(block_id, header.height, round, signers, &header.chain_id, time)?;
    Ok(SignedHeader { header, commit })
}

/// Every validator signs two correctly derived headers at `height` in the
/// same round.
pub fn mock_equivocation_attack(
    chain_id: &str,
    height: u64,
    n_validators: usize,
    power: u64,
    time: DateTime<Utc>,
) -> Result<LightClientAttackFixture> {
    let (vals, signers) = random_validator_set(n_validators, power);

    let conflicting_header = make_header(chain_id, height, time, vals.hash());
    let mut trusted_header = make_header(chain_id, height, time, vals.hash());
    trusted_header.next_validators_hash = conflicting_header.next_validators_hash;
    trusted_header.consensus_hash = conflicting_header.consensus_hash;
    trusted_header.app_hash = conflicting_header.app_hash;
    trusted_header.last_results_hash = conflicting_header.last_results_hash;

    let conflicting = signed_header(conflicting_header, 1, &signers, time)?;
    let trusted = signed_header(trusted_header, 1, &signers, time)?;

    let evidence = LightClientAttackEvidence {
        conflicting_block: LightBlock {
            signed_header: conflicting,
            validator_set: vals.clone(),
        },
        common_height: height,
        byzantine_validators: vals.validators().to_vec(),
        total_voting_power: vals.total_voting_power(),
        timestamp: time,
    };

    Ok(LightClientAttackFixture {
        evidence,
        common: trusted.clone(),
        trusted,
        common_vals: vals,
        signers,
    })
}

/// The whole validator set signs a header at `conflicting_height` whose
/// state hashes were not derived from the honest chain. The honest chain
/// has block `common_height` at `common_time` and block `conflicting_height`
/// at `trusted_time`.
#[allow(clippy::too_many_arguments)]
pub fn mock_lunatic_attack(
    chain_id: &str,
    common_height: u64,
    common_time: DateTime<Utc>,
    conflicting_height: u64,
    conflicting_time: DateTime<Utc>,
    trusted_time: DateTime<Utc>,
    n_validators: usize,
    power: u64,
) -> Result<LightClientAttackFixture> {
    let (vals, signers) = random_validator_set(n_validators, power);

    let common = signed_header(
        make_header(chain_id, common_height, common_time, vals.hash()),
        0,
        &signers,
        common_time,
    )?;
    let trusted = signed_header(
        make_header(chain_id, conflicting_height, trusted_time, vals.hash()),
        0,
        &signers,
        trusted_time,
    )?;
    let conflicting = signed_header(
        make_header(chain_id, conflicting_height, conflicting_time, vals.hash()),
        0,
        &signers,
        conflicting_time,
    )?;

    let evidence = LightClientAttackEvidence {
        conflicting_block: LightBlock {
            signed_header: conflicting,
            validator_set: vals.clone(),
        },
        common_height,
        byzantine_validators: vals.validators().to_vec(),
        total_voting_power: vals.total_voting_power(),
        timestamp: common_time,
    };

    Ok(LightClientAttackFixture {
        evidence,
        common,
        trusted,
        common_vals: vals,
        signers,
    })
}
