use atlas_common::error::AtlasError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why a piece of evidence was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidReason {
    #[error("duplicate evidence")]
    Duplicate,

    #[error("evidence was already committed")]
    AlreadyCommitted,

    #[error(
        "evidence from height {height} (created at: {time}) is too old; \
         min height is {min_height} and evidence can not be older than {min_time}"
    )]
    Expired {
        height: u64,
        time: DateTime<Utc>,
        min_height: u64,
        min_time: DateTime<Utc>,
    },

    #[error("evidence has a different time to the block it is associated with ({evidence} != {block})")]
    TimeMismatch {
        evidence: DateTime<Utc>,
        block: DateTime<Utc>,
    },

    #[error("malformed evidence: {0}")]
    Malformed(String),

    #[error("{0}")]
    Verification(String),
}

#[derive(Debug, Error)]
pub enum EvidenceError {
    /// The evidence itself is at fault. Never fatal to the pool.
    #[error("invalid evidence {hash}: {reason}")]
    Invalid { hash: String, reason: InvalidReason },

    #[error("don't have header #{0}")]
    MissingHeader(u64),

    #[error("don't have commit #{0}")]
    MissingCommit(u64),

    #[error("state provider failure: {0}")]
    State(#[source] AtlasError),

    #[error("evidence store failure: {0}")]
    Store(#[from] AtlasError),

    /// The pool's own bookkeeping is inconsistent. The operation is refused.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl EvidenceError {
    pub fn invalid(hash: &[u8], reason: InvalidReason) -> Self {
        EvidenceError::Invalid {
            hash: hex::encode_upper(hash),
            reason,
        }
    }

    /// The rejection reason, if the evidence was at fault.
    pub fn reason(&self) -> Option<&InvalidReason> {
        match self {
            EvidenceError::Invalid { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EvidenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_messages() {
        assert_eq!(InvalidReason::Duplicate.to_string(), "duplicate evidence");
        assert_eq!(
            InvalidReason::AlreadyCommitted.to_string(),
            "evidence was already committed"
        );

        let err = EvidenceError::invalid(&[0xAB, 0x01], InvalidReason::Duplicate);
        assert_eq!(err.to_string(), "invalid evidence AB01: duplicate evidence");
        assert_eq!(err.reason(), Some(&InvalidReason::Duplicate));
        assert!(EvidenceError::MissingHeader(3).reason().is_none());
    }
}
