//! When pending evidence stops being actionable.
//!
//! Evidence is expired only when it is too old by height AND too old by
//! time. Being recent on either axis keeps it alive.

use std::time::Duration;

use atlas_common::env::state::{ChainState, EvidenceParams};
use chrono::{DateTime, Utc};

use crate::error::InvalidReason;

/// Expiry rule evaluated at a fixed chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    tip_height: u64,
    tip_time: DateTime<Utc>,
    max_age_num_blocks: u64,
    max_age_duration: Duration,
}

/// The earliest tip at which an item (or a group of items) can expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPoint {
    /// First tip height at which the height condition holds.
    pub height: u64,
    /// The time condition holds once the tip time is strictly after this.
    /// `None` when the bound is beyond the representable range.
    pub time: Option<DateTime<Utc>>,
}

impl ExpiryPoint {
    pub fn reached(&self, tip_height: u64, tip_time: DateTime<Utc>) -> bool {
        match self.time {
            Some(time) => tip_height >= self.height && tip_time > time,
            None => false,
        }
    }

    /// Component-wise minimum, a lower bound for both points.
    pub fn earliest(self, other: ExpiryPoint) -> ExpiryPoint {
        let time = match (self.time, other.time) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        ExpiryPoint { height: self.height.min(other.height), time }
    }
}

impl ExpiryPolicy {
    pub fn new(params: &EvidenceParams, tip_height: u64, tip_time: DateTime<Utc>) -> Self {
        Self {
            tip_height,
            tip_time,
            max_age_num_blocks: params.max_age_num_blocks,
            max_age_duration: params.max_age_duration,
        }
    }

    pub fn from_state(state: &ChainState) -> Self {
        Self::new(state.evidence_params(), state.last_block_height, state.last_block_time)
    }

    pub fn is_expired(&self, height: u64, time: DateTime<Utc>) -> bool {
        let age_num_blocks = self.tip_height.saturating_sub(height);
        // Evidence from the future has no age.
        let age_duration = (self.tip_time - time).to_std().unwrap_or_default();

        age_num_blocks > self.max_age_num_blocks && age_duration > self.max_age_duration
    }

    /// Admission check: rejects evidence that is already stale.
    pub fn check(&self, height: u64, time: DateTime<Utc>) -> Result<(), InvalidReason> {
        if self.is_expired(height, time) {
            return Err(InvalidReason::Expired {
                height,
                time,
                min_height: self.min_height(),
                min_time: self.min_time().unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Lowest height that is still fresh by block count.
    pub fn min_height(&self) -> u64 {
        self.tip_height.saturating_sub(self.max_age_num_blocks)
    }

    /// Oldest time that is still fresh by duration.
    pub fn min_time(&self) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.max_age_duration)
            .ok()
            .and_then(|age| self.tip_time.checked_sub_signed(age))
    }

    pub fn expiry_point(&self, height: u64, time: DateTime<Utc>) -> ExpiryPoint {
        ExpiryPoint {
            height: height
                .saturating_add(self.max_age_num_blocks)
                .saturating_add(1),
            time: chrono::Duration::from_std(self.max_age_duration)
                .ok()
                .and_then(|age| time.checked_add_signed(age)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params() -> EvidenceParams {
        EvidenceParams {
            max_age_num_blocks: 20,
            max_age_duration: Duration::from_secs(20 * 60),
            max_bytes: 1000,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()
    }

    fn mins(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    #[test]
    fn test_both_conditions_required() {
        let tip = t0() + mins(30);
        let policy = ExpiryPolicy::new(&params(), 100, tip);

        // Old by height, recent by time.
        assert!(!policy.is_expired(79, tip - mins(5)));
        // Recent by height, old by time.
        assert!(!policy.is_expired(99, tip - mins(25)));
        // Old by both.
        assert!(policy.is_expired(79, tip - mins(21)));
    }

    #[test]
    fn test_boundaries_are_exclusive() {
        let tip = t0() + mins(30);
        let policy = ExpiryPolicy::new(&params(), 100, tip);

        // Exactly max age on both axes is still fresh.
        assert!(!policy.is_expired(80, tip - mins(20)));
        assert!(!policy.is_expired(79, tip - mins(20)));
        assert!(!policy.is_expired(80, tip - mins(21)));
    }

    #[test]
    fn test_future_evidence_never_expires() {
        let policy = ExpiryPolicy::new(&params(), 5, t0());
        assert!(!policy.is_expired(1000, t0() + mins(60)));
    }

    #[test]
    fn test_check_reports_bounds() {
        let tip = t0() + mins(30);
        let policy = ExpiryPolicy::new(&params(), 100, tip);
        match policy.check(1, t0()) {
            Err(InvalidReason::Expired { min_height, min_time, .. }) => {
                assert_eq!(min_height, 80);
                assert_eq!(min_time, t0() + mins(10));
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(policy.check(100, tip).is_ok());
    }

    #[test]
    fn test_expiry_point_matches_is_expired() {
        let tip = t0();
        let policy = ExpiryPolicy::new(&params(), 10, tip);
        let point = policy.expiry_point(10, t0());
        assert_eq!(point.height, 31);

        let later = ExpiryPolicy::new(&params(), 31, t0() + mins(21));
        assert!(point.reached(31, t0() + mins(21)));
        assert!(later.is_expired(10, t0()));

        assert!(!point.reached(30, t0() + mins(21)));
        assert!(!point.reached(31, t0() + mins(20)));
    }

    #[test]
    fn test_earliest_point() {
        let a = ExpiryPoint { height: 10, time: Some(t0() + mins(5)) };
        let b = ExpiryPoint { height: 7, time: Some(t0() + mins(9)) };
        let e = a.earliest(b);
        assert_eq!(e.height, 7);
        assert_eq!(e.time, Some(t0() + mins(5)));
    }
}
