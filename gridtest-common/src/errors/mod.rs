//! Error taxonomy for the pool harness.
//!
//! Store failures, missing entities and convergence timeouts abort the
//! current test immediately. Nothing here is retried: the snapshot restore
//! on teardown is the only rollback mechanism.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                          |
//! |------------|-------------|--------------------------------------|
//! | E001-E099  | Store       | Nonzero status from the config store |
//! | E100-E199  | Entity      | Referenced entity missing            |
//! | E200-E299  | Convergence | Pool did not converge in time        |
//! | E300-E399  | Config      | Harness configuration errors         |
//! | E400-E499  | Query       | Pool status query errors             |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use crate::types::EntityKind;
use std::time::Duration;

/// Errors surfaced to test authors.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The store answered a call with a nonzero status.
    #[error("store call {op} failed: ({status}, {message})")]
    Store {
        op: String,
        status: i32,
        message: String,
    },

    /// A feature, group or node had to exist already and did not.
    #[error("{kind} {name} not in config store")]
    EntityNotFound { kind: EntityKind, name: String },

    /// Convergence was not reached within the maximum wait time.
    #[error("exceeded max polling time waiting for {what} after {waited:?} (last sample {last_sample}, missing {missing:?})")]
    Timeout {
        what: String,
        waited: Duration,
        last_sample: u64,
        missing: Vec<String>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid pool query: {0}")]
    InvalidQuery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

impl HarnessError {
    pub fn store(op: impl Into<String>, status: i32, message: impl Into<String>) -> Self {
        Self::Store {
            op: op.into(),
            status,
            message: message.into(),
        }
    }

    pub fn not_found(kind: EntityKind, name: impl Into<String>) -> Self {
        Self::EntityNotFound {
            kind,
            name: name.into(),
        }
    }

    /// Catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Store { op, .. } => match op.split_whitespace().next() {
                Some("make_snapshot") => ErrorCode::StoreSnapshotFailed,
                Some("load_snapshot") => ErrorCode::StoreRestoreFailed,
                Some("activate") => ErrorCode::StoreActivationFailed,
                Some("list_entities") => ErrorCode::StoreIndexLoadFailed,
                _ => ErrorCode::StoreCallFailed,
            },
            Self::EntityNotFound { kind, .. } => match kind {
                EntityKind::Feature => ErrorCode::EntityFeatureMissing,
                EntityKind::Node => ErrorCode::EntityNodeMissing,
                _ => ErrorCode::EntityMissing,
            },
            Self::Timeout { missing, .. } if !missing.is_empty() => {
                ErrorCode::ConvergenceNodesMissing
            }
            Self::Timeout { .. } => ErrorCode::ConvergenceTimeout,
            Self::Config(_) => ErrorCode::ConfigInvalid,
            Self::InvalidQuery(_) => ErrorCode::QueryInvalid,
            Self::Io(_) => ErrorCode::QueryCommandFailed,
        }
    }

    /// Expected entities still missing when a wait timed out.
    pub fn missing(&self) -> &[String] {
        match self {
            Self::Timeout { missing, .. } => missing,
            _ => &[],
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_operation_codes() {
        let err = HarnessError::store("make_snapshot gridtest_x", 3, "disk full");
        assert_eq!(err.code(), ErrorCode::StoreSnapshotFailed);
        assert_eq!(
            err.to_string(),
            "store call make_snapshot gridtest_x failed: (3, disk full)"
        );

        let err = HarnessError::store("modify_features g1", 1, "nope");
        assert_eq!(err.code(), ErrorCode::StoreCallFailed);
    }

    #[test]
    fn timeout_exposes_missing_nodes() {
        let err = HarnessError::Timeout {
            what: "slots".into(),
            waited: Duration::from_secs(600),
            last_sample: 3,
            missing: vec!["n4".into()],
        };
        assert!(err.is_timeout());
        assert_eq!(err.missing(), ["n4".to_string()]);
        assert_eq!(err.code(), ErrorCode::ConvergenceNodesMissing);
    }

    #[test]
    fn missing_feature_has_entity_code() {
        let err = HarnessError::not_found(EntityKind::Feature, "Exec");
        assert_eq!(err.to_string(), "feature Exec not in config store");
        assert_eq!(err.code().category(), ErrorCategory::Entity);
    }
}
