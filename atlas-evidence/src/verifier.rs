//! Stateless checks of evidence against a snapshot of historical chain data.
//!
//! Nothing in here does I/O: the pool fetches the headers, commits and
//! validator sets and passes them in.

use std::time::Duration;

use atlas_common::env::block::SignedHeader;
use atlas_common::env::consensus::evidence::{
    DuplicateVoteEvidence, Evidence, LightClientAttackEvidence,
};
use atlas_common::env::validator::{Address, ValidatorSet};
use chrono::{DateTime, Utc};

use crate::error::InvalidReason;
use crate::expiry::ExpiryPolicy;

/// Fraction of the common validator set that must have signed a lunatic
/// header before we attempt to blame anyone.
pub const TRUST_LEVEL: (u64, u64) = (1, 3);

fn fail(msg: impl Into<String>) -> InvalidReason {
    InvalidReason::Verification(msg.into())
}

pub fn verify_basic(ev: &Evidence) -> Result<(), InvalidReason> {
    ev.validate_basic()
        .map_err(|e| InvalidReason::Malformed(e.to_string()))
}

/// The evidence must carry the time of the block at its height, and must
/// not already be expired.
pub fn verify_time_and_age(
    ev: &Evidence,
    block_time: DateTime<Utc>,
    policy: &ExpiryPolicy,
) -> Result<(), InvalidReason> {
    if ev.time() != block_time {
        return Err(InvalidReason::TimeMismatch {
            evidence: ev.time(),
            block: block_time,
        });
    }
    policy.check(ev.height(), ev.time())
}

/// `val_set` is the validator set at the height of the votes.
pub fn verify_duplicate_vote(
    ev: &DuplicateVoteEvidence,
    chain_id: &str,
    val_set: &ValidatorSet,
) -> Result<(), InvalidReason> {
    let (a, b) = (&ev.vote_a, &ev.vote_b);

    let Some((_, val)) = val_set.get_by_address(&a.validator_address) else {
        return Err(fail(format!(
            "address {} was not a validator at height {}",
            a.validator_address, a.height
        )));
    };

    if val.voting_power == 0 {
        return Err(fail(format!(
            "validator {} had no voting power at height {}",
            a.validator_address, a.height
        )));
    }
    if a.height != b.height || a.round != b.round || a.msg_type != b.msg_type {
        return Err(fail(format!(
            "h/r/s does not match: {}/{}/{} vs {}/{}/{}",
            a.height, a.round, a.msg_type, b.height, b.round, b.msg_type
        )));
    }
    if a.validator_address != b.validator_address {
        return Err(fail(format!(
            "validator addresses do not match: {} vs {}",
            a.validator_address, b.validator_address
        )));
    }
    if a.block_id == b.block_id {
        return Err(fail(format!(
            "block IDs are the same ({}) - not a real duplicate vote",
            hex::encode_upper(a.block_id.hash)
        )));
    }
    if Address::from_public_key(&val.pub_key) != a.validator_address {
        return Err(fail(format!(
            "address ({}) doesn't match pubkey ({})",
            a.validator_address,
            hex::encode_upper(val.pub_key)
        )));
    }
    if val.voting_power != ev.validator_power {
        return Err(fail(format!(
            "validator power from evidence and our validator set does not match ({} != {})",
            ev.validator_power, val.voting_power
        )));
    }
    if val_set.total_voting_power() != ev.total_voting_power {
        return Err(fail(format!(
            "total voting power from the evidence and our validator set does not match ({} != {})",
            ev.total_voting_power,
            val_set.total_voting_power()
        )));
    }

    a.verify(chain_id, &val.pub_key)
        .map_err(|e| fail(format!("verifying VoteA: {}", e)))?;
    b.verify(chain_id, &val.pub_key)
        .map_err(|e| fail(format!("verifying VoteB: {}", e)))?;
    Ok(())
}

/// Checks a light client attack against this node's own chain.
///
/// `common` is our signed header at the evidence's common height, `trusted`
/// our signed header at the conflicting height (or our latest header when we
/// have not reached it yet). Headers at the common height older than
/// `trust_period` relative to `now` can no longer vouch for a lunatic header.
pub fn verify_light_client_attack(
    ev: &LightClientAttackEvidence,
    common: &SignedHeader,
    trusted: &SignedHeader,
    common_vals: &ValidatorSet,
    now: DateTime<Utc>,
    trust_period: Duration,
) -> Result<(), InvalidReason> {
    let conflicting = &ev.conflicting_block;
    let chain_id = trusted.header.chain_id.as_str();

    if common.header.height != conflicting.height() {
        // Lunatic attack: one verification jump from the common header.
        if let Ok(age) = now.signed_duration_since(common.header.time).to_std() {
            if age > trust_period {
                return Err(fail(format!(
                    "common signed header at height {} has expired (created at {})",
                    common.header.height, common.header.time
                )));
            }
        }
        let (num, den) = TRUST_LEVEL;
        common_vals
            .verify_commit_light_trusting(chain_id, conflicting.commit(), num, den)
            .map_err(|e| fail(format!("skipping verification of conflicting block failed: {}", e)))?;
    } else if ev.conflicting_header_is_invalid(&trusted.header) {
        return Err(fail(
            "common height is the same as conflicting block height so expected the conflicting \
             block to be correctly derived yet it wasn't",
        ));
    }

    conflicting
        .validator_set
        .verify_commit_light(
            chain_id,
            &conflicting.commit().block_id,
            conflicting.height(),
            conflicting.commit(),
        )
        .map_err(|e| fail(format!("invalid commit from conflicting block: {}", e)))?;

    if ev.total_voting_power != common_vals.total_voting_power() {
        return Err(fail(format!(
            "total voting power from the evidence and our validator set does not match ({} != {})",
            ev.total_voting_power,
            common_vals.total_voting_power()
        )));
    }

    if conflicting.height() > trusted.header.height && conflicting.time() > trusted.header.time {
        return Err(fail(format!(
            "conflicting block doesn't violate monotonically increasing time ({} is after {})",
            conflicting.time(),
            trusted.header.time
        )));
    } else if trusted.header.hash() == conflicting.hash() {
        return Err(fail(format!(
            "trusted header hash matches the evidence's conflicting header hash: {}",
            hex::encode_upper(trusted.header.hash())
        )));
    }

    Ok(())
}

/// The validators named by the evidence must be exactly the ones we derive
/// from the attack: same count, same order, same addresses and powers.
/// Naming too few (or too many) signers is rejected.
pub fn verify_byzantine_validators(
    ev: &LightClientAttackEvidence,
    common_vals: &ValidatorSet,
    trusted: &SignedHeader,
) -> Result<(), InvalidReason> {
    let expected = ev.get_byzantine_validators(common_vals, trusted);
    let claimed = &ev.byzantine_validators;

    if expected.len() != claimed.len() {
        return Err(fail(format!(
            "expected {} byzantine validators from evidence but got {}",
            expected.len(),
            claimed.len()
        )));
    }
    for (idx, (want, got)) in expected.iter().zip(claimed).enumerate() {
        if want.address != got.address {
            return Err(fail(format!(
                "evidence contained an unexpected byzantine validator address at index {}; expected {}, got {}",
                idx, want.address, got.address
            )));
        }
        if want.voting_power != got.voting_power {
            return Err(fail(format!(
                "evidence contained unexpected byzantine validator power at index {}; expected {}, got {}",
                idx, want.voting_power, got.voting_power
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        default_evidence_time, make_vote, mock_duplicate_vote_evidence, mock_equivocation_attack,
        mock_lunatic_attack, random_block_id, test_evidence_params, MockValidator,
    };
    use atlas_common::env::block::CommitSig;
    use atlas_common::env::consensus::types::SignedMsgType;
    use chrono::Duration as ChronoDuration;

    const CHAIN_ID: &str = "test_chain";

    fn duplicate_vote(val: &MockValidator, height: u64) -> DuplicateVoteEvidence {
        match mock_duplicate_vote_evidence(height, default_evidence_time(), val, CHAIN_ID) {
            Evidence::DuplicateVote(ev) => ev,
            other => panic!("unexpected evidence {}", other),
        }
    }

    fn single_set(val: &MockValidator) -> ValidatorSet {
        ValidatorSet::new(vec![val.validator()])
    }

    #[test]
    fn test_duplicate_vote_passes() {
        let val = MockValidator::new(10);
        let ev = duplicate_vote(&val, 3);
        assert!(verify_duplicate_vote(&ev, CHAIN_ID, &single_set(&val)).is_ok());
    }

    #[test]
    fn test_duplicate_vote_wrong_chain_fails_signature() {
        let val = MockValidator::new(10);
        let ev = duplicate_vote(&val, 3);
        let err = verify_duplicate_vote(&ev, "other_chain", &single_set(&val)).unwrap_err();
        assert!(err.to_string().contains("verifying VoteA"));
    }

    #[test]
    fn test_duplicate_vote_unknown_validator() {
        let val = MockValidator::new(10);
        let other = MockValidator::new(10);
        let ev = duplicate_vote(&val, 3);
        let err = verify_duplicate_vote(&ev, CHAIN_ID, &single_set(&other)).unwrap_err();
        assert!(err.to_string().contains("was not a validator"));
    }

    #[test]
    fn test_duplicate_vote_power_mismatch() {
        let val = MockValidator::new(10);
        let mut ev = duplicate_vote(&val, 3);
        ev.validator_power = 11;
        assert!(verify_duplicate_vote(&ev, CHAIN_ID, &single_set(&val)).is_err());

        let mut ev = duplicate_vote(&val, 3);
        ev.total_voting_power = 100;
        assert!(verify_duplicate_vote(&ev, CHAIN_ID, &single_set(&val)).is_err());
    }

    #[test]
    fn test_duplicate_vote_mismatched_round_and_same_block() {
        let val = MockValidator::new(10);
        let time = default_evidence_time();

        let mut ev = duplicate_vote(&val, 3);
        ev.vote_b = make_vote(&val, CHAIN_ID, 0, 3, 1, SignedMsgType::Prevote, random_block_id(), time)
            .unwrap();
        let err = verify_duplicate_vote(&ev, CHAIN_ID, &single_set(&val)).unwrap_err();
        assert!(err.to_string().contains("h/r/s does not match"));

        let mut ev = duplicate_vote(&val, 3);
        ev.vote_b = ev.vote_a.clone();
        let err = verify_duplicate_vote(&ev, CHAIN_ID, &single_set(&val)).unwrap_err();
        assert!(err.to_string().contains("not a real duplicate vote"));
    }

    #[test]
    fn test_time_must_match_block_and_not_be_expired() {
        let val = MockValidator::new(10);
        let t0 = default_evidence_time();
        let params = test_evidence_params();
        let policy = ExpiryPolicy::new(&params, 30, t0);

        let ev = mock_duplicate_vote_evidence(30, t0, &val, CHAIN_ID);
        assert!(verify_time_and_age(&ev, t0, &policy).is_ok());
        assert!(matches!(
            verify_time_and_age(&ev, t0 + ChronoDuration::minutes(1), &policy),
            Err(InvalidReason::TimeMismatch { .. })
        ));

        let old = t0 - ChronoDuration::days(365);
        let expired = mock_duplicate_vote_evidence(1, old, &val, CHAIN_ID);
        assert!(matches!(
            verify_time_and_age(&expired, old, &policy),
            Err(InvalidReason::Expired { .. })
        ));

        // Old by height only.
        let ev = mock_duplicate_vote_evidence(2, t0, &val, CHAIN_ID);
        assert!(verify_time_and_age(&ev, t0, &policy).is_ok());
    }

    #[test]
    fn test_equivocation_attack_passes() {
        let time = default_evidence_time();
        let fx = mock_equivocation_attack(CHAIN_ID, 10, 5, 10, time).unwrap();
        let now = time + ChronoDuration::minutes(1);
        let period = test_evidence_params().max_age_duration;

        verify_light_client_attack(&fx.evidence, &fx.common, &fx.trusted, &fx.common_vals, now, period)
            .unwrap();
        verify_byzantine_validators(&fx.evidence, &fx.common_vals, &fx.trusted).unwrap();
    }

    #[test]
    fn test_naming_more_signers_than_signed_fails() {
        let time = default_evidence_time();
        let mut fx = mock_equivocation_attack(CHAIN_ID, 10, 5, 10, time).unwrap();
        let now = time + ChronoDuration::minutes(1);
        let period = test_evidence_params().max_age_duration;

        // Drop the last signature: 4 of 5 still form a quorum, but the
        // evidence keeps blaming all 5.
        let sigs = &mut fx.evidence.conflicting_block.signed_header.commit.signatures;
        let last = sigs.len() - 1;
        sigs[last] = CommitSig::absent();

        verify_light_client_attack(&fx.evidence, &fx.common, &fx.trusted, &fx.common_vals, now, period)
            .unwrap();
        let err = verify_byzantine_validators(&fx.evidence, &fx.common_vals, &fx.trusted).unwrap_err();
        assert!(err.to_string().contains("expected 4 byzantine validators"));

        // Naming fewer than derived is rejected too.
        fx.evidence.byzantine_validators.truncate(3);
        assert!(verify_byzantine_validators(&fx.evidence, &fx.common_vals, &fx.trusted).is_err());
    }

    #[test]
    fn test_conflicting_header_equal_to_trusted_fails() {
        let time = default_evidence_time();
        let mut fx = mock_equivocation_attack(CHAIN_ID, 10, 4, 10, time).unwrap();
        fx.trusted = fx.evidence.conflicting_block.signed_header.clone();
        fx.common = fx.trusted.clone();
        let err = verify_light_client_attack(
            &fx.evidence,
            &fx.common,
            &fx.trusted,
            &fx.common_vals,
            time,
            test_evidence_params().max_age_duration,
        )
        .unwrap_err();
        assert!(err.to_string().contains("trusted header hash matches"));
    }

    #[test]
    fn test_lunatic_attack() {
        let t0 = default_evidence_time();
        let common_time = t0 + ChronoDuration::minutes(4);
        let trusted_time = t0 + ChronoDuration::minutes(10);
        let fx = mock_lunatic_attack(CHAIN_ID, 4, common_time, 10, trusted_time, trusted_time, 4, 10)
            .unwrap();
        let period = test_evidence_params().max_age_duration;
        let now = t0 + ChronoDuration::minutes(11);

        verify_light_client_attack(&fx.evidence, &fx.common, &fx.trusted, &fx.common_vals, now, period)
            .unwrap();
        verify_byzantine_validators(&fx.evidence, &fx.common_vals, &fx.trusted).unwrap();

        // The common header is too old to vouch for anything.
        let late = common_time + ChronoDuration::hours(1);
        let err = verify_light_client_attack(&fx.evidence, &fx.common, &fx.trusted, &fx.common_vals, late, period)
            .unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_forward_lunatic_with_later_time_fails() {
        let t0 = default_evidence_time();
        let common_time = t0 + ChronoDuration::minutes(4);
        let conflicting_time = t0 + ChronoDuration::minutes(30);
        let trusted_time = t0 + ChronoDuration::minutes(10);
        let mut fx = mock_lunatic_attack(CHAIN_ID, 4, common_time, 12, conflicting_time, trusted_time, 4, 10)
            .unwrap();
        // We only have up to height 10.
        fx.trusted.header.height = 10;

        let err = verify_light_client_attack(
            &fx.evidence,
            &fx.common,
            &fx.trusted,
            &fx.common_vals,
            t0 + ChronoDuration::minutes(11),
            test_evidence_params().max_age_duration,
        )
        .unwrap_err();
        assert!(err.to_string().contains("monotonically increasing time"));
    }
}
