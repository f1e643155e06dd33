//! Error kinds surfaced by the reward engine
//!
//! Every reward-affecting failure is refused locally and reported to the
//! caller. Nothing is silently zeroed and accepted.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T, E = RewardError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RewardError {
    /// Malformed activity or profile data, rejected before any scoring
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Anti-bot score below the threshold for the requested operation
    #[error(
        "Suspicious activity: human probability {human_probability:.3} below threshold {threshold:.3}"
    )]
    SuspiciousActivity {
        human_probability: f64,
        threshold: f64,
    },

    /// A daily or per-activity ceiling has been reached
    #[error("Limit reached: {limit}")]
    LimitExceeded {
        limit: String,
        retry_after: Option<DateTime<Utc>>,
    },

    /// Duplicate start, claim on a non-eligible session, or a lost optimistic update
    #[error("Session conflict: {0}")]
    SessionConflict(String),

    /// A collaborator could not answer
    #[error("{dependency} unavailable: {reason}")]
    DependencyUnavailable {
        dependency: &'static str,
        reason: String,
    },
}

impl RewardError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::SessionConflict(msg.into())
    }

    pub fn limit(limit: impl Into<String>, retry_after: Option<DateTime<Utc>>) -> Self {
        Self::LimitExceeded {
            limit: limit.into(),
            retry_after,
        }
    }

    pub fn unavailable(dependency: &'static str, reason: impl ToString) -> Self {
        Self::DependencyUnavailable {
            dependency,
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same request later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RewardError::LimitExceeded { .. } | RewardError::DependencyUnavailable { .. }
        )
    }

    /// Short machine-readable kind, used in HTTP error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            RewardError::InvalidInput(_) => "invalid_input",
            RewardError::SuspiciousActivity { .. } => "suspicious_activity",
            RewardError::LimitExceeded { .. } => "limit_exceeded",
            RewardError::SessionConflict(_) => "session_conflict",
            RewardError::DependencyUnavailable { .. } => "dependency_unavailable",
        }
    }
}

/// Errors raised by the persistence collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Version conflict for {entity} {id}: expected {expected}, found {found}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(format!("serialization: {}", e))
    }
}

impl From<StoreError> for RewardError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::VersionConflict { .. } => RewardError::SessionConflict(e.to_string()),
            StoreError::Backend(reason) => RewardError::DependencyUnavailable {
                dependency: "persistence",
                reason,
            },
        }
    }
}

/// Errors raised by the ledger, content-model, signal and notification collaborators
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Collaborator rejected request: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(RewardError::limit("daily cap", None).is_retryable());
        assert!(RewardError::unavailable("ledger", "timeout").is_retryable());
        assert!(!RewardError::conflict("already active").is_retryable());
        assert!(!RewardError::invalid("empty user id").is_retryable());
        assert!(!RewardError::SuspiciousActivity {
            human_probability: 0.1,
            threshold: 0.5
        }
        .is_retryable());
    }

    #[test]
    fn test_store_error_mapping() {
        let conflict: RewardError = StoreError::VersionConflict {
            entity: "profile",
            id: "alice".to_string(),
            expected: 3,
            found: 4,
        }
        .into();
        assert_eq!(conflict.kind(), "session_conflict");

        let backend: RewardError = StoreError::Backend("disk full".to_string()).into();
        assert_eq!(
            backend,
            RewardError::DependencyUnavailable {
                dependency: "persistence",
                reason: "disk full".to_string()
            }
        );
    }
}
