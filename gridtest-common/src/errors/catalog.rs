//! Error Catalog for the pool harness
//!
//! Each harness error maps to a stable code (GT-E001 through GT-E499) with a
//! message and remediation steps, so failed test runs can be triaged from
//! the log alone.
//!
//! # Example
//!
//! ```rust
//! use gridtest_common::errors::catalog::ErrorCode;
//!
//! let entry = ErrorCode::StoreActivationFailed.entry();
//! println!("Error {}: {}", entry.code, entry.message);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all harness error scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Store Errors (E001-E099)
    // =========================================================================
    /// A store mutation returned nonzero status
    StoreCallFailed,
    /// Pre-test snapshot could not be taken
    StoreSnapshotFailed,
    /// Snapshot could not be loaded
    StoreRestoreFailed,
    /// Configuration activation failed
    StoreActivationFailed,
    /// Bulk read of store entities failed
    StoreIndexLoadFailed,

    // =========================================================================
    // Entity Errors (E100-E199)
    // =========================================================================
    /// Referenced entity is absent
    EntityMissing,
    /// Referenced feature is absent
    EntityFeatureMissing,
    /// Referenced node is absent
    EntityNodeMissing,

    // =========================================================================
    // Convergence Errors (E200-E299)
    // =========================================================================
    /// Pool did not reach the target within the maximum wait
    ConvergenceTimeout,
    /// Expected nodes never reported
    ConvergenceNodesMissing,

    // =========================================================================
    // Config Errors (E300-E399)
    // =========================================================================
    /// Harness configuration is invalid
    ConfigInvalid,

    // =========================================================================
    // Query Errors (E400-E499)
    // =========================================================================
    /// Pool query could not be built
    QueryInvalid,
    /// Pool status command could not be run
    QueryCommandFailed,
}

impl ErrorCode {
    /// Every code, in catalog order.
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::StoreCallFailed,
            Self::StoreSnapshotFailed,
            Self::StoreRestoreFailed,
            Self::StoreActivationFailed,
            Self::StoreIndexLoadFailed,
            Self::EntityMissing,
            Self::EntityFeatureMissing,
            Self::EntityNodeMissing,
            Self::ConvergenceTimeout,
            Self::ConvergenceNodesMissing,
            Self::ConfigInvalid,
            Self::QueryInvalid,
            Self::QueryCommandFailed,
        ]
    }

    /// Numeric part of the code.
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::StoreCallFailed => 1,
            Self::StoreSnapshotFailed => 2,
            Self::StoreRestoreFailed => 3,
            Self::StoreActivationFailed => 4,
            Self::StoreIndexLoadFailed => 5,
            Self::EntityMissing => 100,
            Self::EntityFeatureMissing => 101,
            Self::EntityNodeMissing => 102,
            Self::ConvergenceTimeout => 200,
            Self::ConvergenceNodesMissing => 201,
            Self::ConfigInvalid => 300,
            Self::QueryInvalid => 400,
            Self::QueryCommandFailed => 401,
        }
    }

    /// Formatted code, e.g. `GT-E004`.
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("GT-E{:03}", self.code_number())
    }

    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Store,
            100..=199 => ErrorCategory::Entity,
            200..=299 => ErrorCategory::Convergence,
            300..=399 => ErrorCategory::Config,
            _ => ErrorCategory::Query,
        }
    }

    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::StoreCallFailed => "Config store rejected a mutation",
            Self::StoreSnapshotFailed => "Failed to snapshot the current pool configuration",
            Self::StoreRestoreFailed => "Failed to load a configuration snapshot",
            Self::StoreActivationFailed => "Failed to activate the pool configuration",
            Self::StoreIndexLoadFailed => "Failed to read entities from the config store",
            Self::EntityMissing => "Referenced entity does not exist in the config store",
            Self::EntityFeatureMissing => "Referenced feature does not exist in the config store",
            Self::EntityNodeMissing => "Referenced node does not exist in the config store",
            Self::ConvergenceTimeout => "Pool did not converge within the maximum wait time",
            Self::ConvergenceNodesMissing => "Expected nodes did not report into the pool",
            Self::ConfigInvalid => "Harness configuration is invalid",
            Self::QueryInvalid => "Pool status query is malformed",
            Self::QueryCommandFailed => "Pool status command could not be executed",
        }
    }

    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::StoreCallFailed => &[
                "Check the store message for the rejected entity",
                "The pre-test snapshot is restored on teardown",
            ],
            Self::StoreSnapshotFailed => &[
                "Verify the store agent is running and writable",
                "Check for a snapshot with the same name",
            ],
            Self::StoreRestoreFailed => &[
                "List snapshots in the store and confirm the name",
                "Restore manually before running further tests",
            ],
            Self::StoreActivationFailed => &[
                "Inspect the store message for the failing node",
                "Run an explicit activation once the pool is healthy",
            ],
            Self::StoreIndexLoadFailed => &[
                "Confirm the store namespace in the harness config",
            ],
            Self::EntityMissing | Self::EntityNodeMissing => &[
                "Check the entity name for typos",
                "Create the entity in test setup before referencing it",
            ],
            Self::EntityFeatureMissing => &[
                "Check the feature name for typos",
                "Build or declare the feature before applying it",
            ],
            Self::ConvergenceTimeout => &[
                "Raise the maximum wait time for large pools",
                "Check that activation restarted the affected daemons",
            ],
            Self::ConvergenceNodesMissing => &[
                "Inspect the missing nodes' master logs",
                "Confirm the nodes checked in after activation",
            ],
            Self::ConfigInvalid => &[
                "Check the config file and GRIDTEST_* environment variables",
            ],
            Self::QueryInvalid => &["Use plain attribute names in constraints"],
            Self::QueryCommandFailed => &[
                "Confirm the pool tools are installed and on PATH",
            ],
        }
    }

    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code_string())
    }
}

/// Error categories matching the code ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Config store status errors (E001-E099)
    Store,
    /// Missing entities (E100-E199)
    Entity,
    /// Convergence timeouts (E200-E299)
    Convergence,
    /// Harness configuration (E300-E399)
    Config,
    /// Pool status queries (E400-E499)
    Query,
}

impl ErrorCategory {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Store => "Store",
            Self::Entity => "Entity",
            Self::Convergence => "Convergence",
            Self::Config => "Configuration",
            Self::Query => "Query",
        }
    }
}

/// Full catalog entry for an error code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "GT-E001")
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    /// Steps to remediate the error
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n", self.code, self.message);
        if !self.remediation.is_empty() {
            output.push_str("Remediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numbers_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::all() {
            assert!(
                seen.insert(code.code_number()),
                "Duplicate error code number for {:?}",
                code
            );
        }
    }

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::StoreCallFailed.code_string(), "GT-E001");
        assert_eq!(ErrorCode::EntityMissing.code_string(), "GT-E100");
        assert_eq!(ErrorCode::ConvergenceTimeout.code_string(), "GT-E200");
        assert_eq!(ErrorCode::ConfigInvalid.code_string(), "GT-E300");
        assert_eq!(ErrorCode::QueryCommandFailed.code_string(), "GT-E401");
    }

    #[test]
    fn test_all_errors_have_remediation() {
        for code in ErrorCode::all() {
            assert!(!code.message().is_empty(), "{:?} has empty message", code);
            assert!(
                !code.remediation().is_empty(),
                "{:?} has no remediation",
                code
            );
        }
    }

    #[test]
    fn test_format_full_numbers_steps() {
        let text = ErrorCode::StoreActivationFailed.entry().format_full();
        assert!(text.starts_with("[GT-E004]"));
        assert!(text.contains("  1. "));
        assert!(text.contains("  2. "));
    }
}
