use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use atlas_common::crypto::hash::Hash32;
use atlas_common::env::block::SignedHeader;
use atlas_common::env::consensus::evidence::{Evidence, LightClientAttackEvidence};
use atlas_common::env::state::{ChainState, EvidenceParams};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{EvidenceError, InvalidReason, Result};
use crate::expiry::{ExpiryPoint, ExpiryPolicy};
use crate::pending::{PendingList, PendingStatus};
use crate::ports::{BlockStore, StateProvider};
use crate::store::db::Db;
use crate::store::EvidenceStore;
use crate::verifier;

/// Collects, verifies and persists evidence of validator misbehavior and
/// hands it out for inclusion in blocks.
///
/// Verification runs without holding the pool lock; only the final
/// admit step (re-check, persist, publish) is serialized.
pub struct Pool {
    store: EvidenceStore,
    state_provider: Arc<dyn StateProvider>,
    block_store: Arc<dyn BlockStore>,
    inner: RwLock<PoolInner>,
}

struct PoolInner {
    state: ChainState,
    pending: PendingList,
    /// Earliest tip at which anything pending can expire. `None` while
    /// nothing is pending.
    prune_at: Option<ExpiryPoint>,
    /// Params `prune_at` was computed with.
    prune_params: EvidenceParams,
}

impl Pool {
    /// Opens the pool over `db`, recovering pending evidence left by a
    /// previous run and dropping whatever expired in the meantime.
    pub fn new(
        db: Arc<dyn Db>,
        state_provider: Arc<dyn StateProvider>,
        block_store: Arc<dyn BlockStore>,
    ) -> Result<Self> {
        let state = state_provider.load().map_err(EvidenceError::State)?;
        let store = EvidenceStore::new(db);
        let policy = ExpiryPolicy::from_state(&state);

        let mut pending = PendingList::new();
        let mut expired = Vec::new();
        for record in store.list_pending()? {
            let ev = record.evidence;
            if policy.is_expired(ev.height(), ev.time()) {
                expired.push((ev.height(), ev.hash()));
                continue;
            }
            pending.push_with_seq(ev, record.size, record.seq);
        }
        if !expired.is_empty() {
            store.remove_pending_batch(&expired)?;
        }

        let prune_at = earliest_expiry(&pending, &policy);
        info!(
            "📂 Evidence pool opened at height {}: {} pending, {} expired on recovery",
            state.last_block_height,
            pending.len(),
            expired.len()
        );

        Ok(Self {
            store,
            state_provider,
            block_store,
            inner: RwLock::new(PoolInner {
                prune_params: *state.evidence_params(),
                state,
                pending,
                prune_at,
            }),
        })
    }

    /// Admits evidence from an untrusted source after full verification.
    /// Re-adding known evidence is a no-op.
    pub fn add_evidence(&self, ev: Evidence) -> Result<()> {
        debug!("Attempting to add evidence {}", ev);

        if self.read().pending.contains(&ev.hash()) {
            debug!("Evidence already pending; ignoring {}", ev);
            return Ok(());
        }
        if self.store.is_committed(&ev)? {
            debug!("Evidence was already committed; ignoring {}", ev);
            return Ok(());
        }

        let state = self.state();
        if let Err(e) = self.verify(&state, &ev) {
            warn!("❌ Rejected evidence {}: {}", ev, e);
            return Err(e);
        }

        let size = ev.size()?;
        let summary = ev.to_string();
        if self.admit(ev, size)? {
            info!("✅ Verified new evidence of byzantine behavior: {}", summary);
        }
        Ok(())
    }

    /// Admits evidence produced by the local consensus engine. It was built
    /// from votes this node observed itself, so only structural checks run.
    pub fn add_evidence_from_consensus(&self, ev: Evidence) -> Result<()> {
        verifier::verify_basic(&ev).map_err(|r| EvidenceError::invalid(&ev.hash(), r))?;

        if self.read().pending.contains(&ev.hash()) || self.store.is_committed(&ev)? {
            debug!("Evidence from consensus already known; ignoring {}", ev);
            return Ok(());
        }

        let size = ev.size()?;
        let summary = ev.to_string();
        if self.admit(ev, size)? {
            info!("✅ Verified new evidence of byzantine behavior (from consensus): {}", summary);
        }
        Ok(())
    }

    /// Validates the evidence of a proposed block. The pool is not modified.
    pub fn check_evidence(&self, list: &[Evidence]) -> Result<()> {
        let state = self.state();
        let mut seen = HashSet::with_capacity(list.len());

        for ev in list {
            let hash = ev.hash();
            if !seen.insert(hash) {
                return Err(EvidenceError::invalid(&hash, InvalidReason::Duplicate));
            }

            // Identical content was verified on admission.
            let known = self
                .read()
                .pending
                .get(&hash)
                .map(|pending| pending == ev)
                .unwrap_or(false);
            if known {
                continue;
            }

            if self.store.is_committed(ev)? {
                return Err(EvidenceError::invalid(&hash, InvalidReason::AlreadyCommitted));
            }
            self.verify(&state, ev)?;
        }
        Ok(())
    }

    /// Pending evidence in priority order, stopping before the first item
    /// that would push the total encoded size past `max_bytes`.
    pub fn pending_evidence(&self, max_bytes: u64) -> (Vec<Evidence>, u64) {
        self.read().pending.select(max_bytes)
    }

    /// Promotes `committed` (the evidence of the block that produced
    /// `state`) and prunes what expired at the new tip.
    ///
    /// `state` must be strictly ahead of the pool's current state.
    pub fn update(&self, state: ChainState, committed: &[Evidence]) -> Result<()> {
        let mut inner = self.write()?;

        let prev = inner.state.last_block_height;
        if state.last_block_height <= prev {
            let msg = format!(
                "failed evidence pool update: new state height is less than or equal to previous state height: {} <= {}",
                state.last_block_height, prev
            );
            drop(inner);
            error!("{}", msg);
            if cfg!(debug_assertions) {
                panic!("{}", msg);
            }
            return Err(EvidenceError::Invariant(msg));
        }

        debug!("Updating evidence pool to height {}", state.last_block_height);

        if !committed.is_empty() {
            self.store.mark_committed(committed)?;
            for ev in committed {
                inner.pending.remove(&ev.hash());
            }
            info!("📦 Marked {} evidence as committed at height {}", committed.len(), state.last_block_height);
        }

        let policy = ExpiryPolicy::from_state(&state);
        let params_changed = inner.prune_params != *state.evidence_params();
        let due = inner
            .prune_at
            .map(|p| p.reached(state.last_block_height, state.last_block_time))
            .unwrap_or(false);

        if params_changed || due {
            self.remove_expired(&mut inner, &policy)?;
            inner.prune_params = *state.evidence_params();
        }

        inner.state = state;
        Ok(())
    }

    /// Oldest pending evidence, if any.
    pub fn evidence_front(&self) -> Option<Evidence> {
        self.read().pending.front().cloned()
    }

    /// All pending evidence in priority order.
    pub fn pending_snapshot(&self) -> Vec<Evidence> {
        self.read().pending.iter().cloned().collect()
    }

    /// Receiver that changes whenever pending evidence is added or removed.
    /// The current value is always visible, so checking `len` before waiting
    /// cannot lose a wake-up.
    pub fn evidence_wait_chan(&self) -> watch::Receiver<PendingStatus> {
        self.read().pending.subscribe()
    }

    /// Waits until something is pending and returns the front item.
    pub async fn wait_for_evidence(&self) -> Option<Evidence> {
        let mut rx = self.evidence_wait_chan();
        let ready = rx.wait_for(|status| status.len > 0).await.is_ok();
        if !ready {
            return None;
        }
        self.evidence_front()
    }

    /// The chain state as of the last `update`.
    pub fn state(&self) -> ChainState {
        self.read().state.clone()
    }

    pub fn size(&self) -> usize {
        self.read().pending.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, PoolInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, PoolInner>> {
        self.inner
            .write()
            .map_err(|_| EvidenceError::Invariant("evidence pool lock poisoned".to_string()))
    }

    /// Persists and publishes `ev` unless it became known while it was being
    /// verified. Returns whether it was added.
    fn admit(&self, ev: Evidence, size: u64) -> Result<bool> {
        let mut inner = self.write()?;

        if inner.pending.contains(&ev.hash()) || self.store.is_committed(&ev)? {
            return Ok(false);
        }

        let seq = inner.pending.next_seq();
        self.store.insert_pending(&ev, size, seq)?;

        let policy = ExpiryPolicy::from_state(&inner.state);
        let point = policy.expiry_point(ev.height(), ev.time());
        inner.prune_at = Some(match inner.prune_at {
            Some(current) => current.earliest(point),
            None => point,
        });

        inner.pending.push_with_seq(ev, size, seq);
        Ok(true)
    }

    fn remove_expired(&self, inner: &mut PoolInner, policy: &ExpiryPolicy) -> Result<()> {
        let expired: Vec<_> = inner
            .pending
            .iter()
            .filter(|ev| policy.is_expired(ev.height(), ev.time()))
            .map(|ev| (ev.height(), ev.hash()))
            .collect();

        if !expired.is_empty() {
            self.store.remove_pending_batch(&expired)?;
            for (_, hash) in &expired {
                inner.pending.remove(hash);
            }
            info!(
                "🧹 Pruned {} expired evidence (min height {}, min time {:?})",
                expired.len(),
                policy.min_height(),
                policy.min_time()
            );
        }

        inner.prune_at = earliest_expiry(&inner.pending, policy);
        Ok(())
    }

    /// Runs every check for `ev` against the chain as seen in `state`.
    fn verify(&self, state: &ChainState, ev: &Evidence) -> Result<()> {
        let hash = ev.hash();
        let reject = |reason: InvalidReason| EvidenceError::invalid(&hash, reason);

        verifier::verify_basic(ev).map_err(reject)?;

        let height = ev.height();
        let meta = self
            .block_store
            .load_block_meta(height)
            .ok_or(EvidenceError::MissingHeader(height))?;
        let policy = ExpiryPolicy::from_state(state);
        verifier::verify_time_and_age(ev, meta.header.time, &policy).map_err(reject)?;

        let vals = self
            .state_provider
            .load_validators(height)
            .map_err(EvidenceError::State)?;

        match ev {
            Evidence::DuplicateVote(dve) => {
                verifier::verify_duplicate_vote(dve, &state.chain_id, &vals).map_err(reject)
            }
            Evidence::LightClientAttack(lcae) => {
                let common = self.signed_header(height)?;
                let trusted = self.trusted_header(lcae, &common, &hash)?;
                verifier::verify_light_client_attack(
                    lcae,
                    &common,
                    &trusted,
                    &vals,
                    state.last_block_time,
                    state.evidence_params().max_age_duration,
                )
                .map_err(reject)?;
                verifier::verify_byzantine_validators(lcae, &vals, &trusted).map_err(reject)
            }
        }
    }

    /// Our own header at the conflicting height. When we have not reached
    /// that height (forward lunatic attack) the latest header stands in, as
    /// long as it is not older than the conflicting block.
    fn trusted_header(
        &self,
        ev: &LightClientAttackEvidence,
        common: &SignedHeader,
        evidence_hash: &Hash32,
    ) -> Result<SignedHeader> {
        let conflicting_height = ev.conflicting_height();
        if common.header.height == conflicting_height {
            return Ok(common.clone());
        }

        match self.signed_header(conflicting_height) {
            Ok(sh) => Ok(sh),
            Err(EvidenceError::MissingHeader(_)) | Err(EvidenceError::MissingCommit(_)) => {
                let latest = self.signed_header(self.block_store.height())?;
                if latest.header.time < ev.conflicting_block.time() {
                    return Err(EvidenceError::invalid(
                        evidence_hash,
                        InvalidReason::Verification(format!(
                            "latest block time ({}) is before conflicting block time ({})",
                            latest.header.time,
                            ev.conflicting_block.time()
                        )),
                    ));
                }
                Ok(latest)
            }
            Err(e) => Err(e),
        }
    }

    fn signed_header(&self, height: u64) -> Result<SignedHeader> {
        let meta = self
            .block_store
            .load_block_meta(height)
            .ok_or(EvidenceError::MissingHeader(height))?;
        let commit = self
            .block_store
            .load_block_commit(height)
            .ok_or(EvidenceError::MissingCommit(height))?;
        Ok(SignedHeader {
            header: meta.header,
            commit,
        })
    }
}

fn earliest_expiry(pending: &PendingList, policy: &ExpiryPolicy) -> Option<ExpiryPoint> {
    pending
        .iter()
        .map(|ev| policy.expiry_point(ev.height(), ev.time()))
        .reduce(ExpiryPoint::earliest)
}
