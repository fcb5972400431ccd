//! Error types for the bundle plan builder.
//!
//! Two layers: [`BundleError`] covers malformed bundle inputs (charm
//! references, placement directives, metadata files), while [`PlanError`]
//! covers planning itself. Planning is all-or-nothing: a caller either gets
//! a complete plan or one of these errors, never a partial change list.

use thiserror::Error;

/// Errors raised while interpreting bundle input.
#[derive(Debug, Error)]
pub enum BundleError {
    /// The bundle text could not be deserialized.
    #[error("malformed bundle: {0}")]
    Malformed(#[from] serde_yaml::Error),

    /// A placement directive did not match the directive grammar.
    #[error("invalid placement directive {directive:?}")]
    InvalidPlacement {
        /// The offending directive string.
        directive: String,
    },

    /// A local charm's metadata file exists but cannot be read or parsed.
    #[error("invalid charm metadata at {path}: {message}")]
    InvalidCharmMetadata {
        /// Path of the metadata file.
        path: String,
        /// Description of the problem.
        message: String,
    },
}

/// Errors raised while building a plan or a diff.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The bundle declares no applications.
    #[error("at least one application must be specified")]
    EmptyBundle,

    /// Unit placement directives form a reference cycle between
    /// applications.
    #[error("cycle in placement directives for: {}", applications.join(", "))]
    PlacementCycle {
        /// Applications participating in the cycle, lexicographically sorted.
        applications: Vec<String>,
    },

    /// A bundle input problem surfaced during planning.
    #[error(transparent)]
    Bundle(#[from] BundleError),

    /// An internal invariant was violated; indicates a defect in the
    /// planner, not in the input.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PlanError {
    /// Creates an internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Result type alias for plan operations.
pub type Result<T> = std::result::Result<T, PlanError>;
