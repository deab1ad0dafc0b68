//! Error types for the remediation orchestrator
//!
//! Mirrors the recovery taxonomy of the loop:
//! - transient platform failures are retried inside a wait budget
//! - malformed documents trigger a reset to the baseline
//! - rejected remedies advance to the next candidate
//! - publish failures abandon the signature for the session
//! - exhaustion ends the session

use autofix_analyzer::{CatalogError, ErrorSignature};
use autofix_ledger::LedgerError;
use autofix_pipeline::{DocumentError, PatchError};

/// Main remediation error type
#[derive(Debug, thiserror::Error)]
pub enum RemedyError {
    /// CI platform unreachable or run data not ready
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// Current pipeline document fails structural validation
    #[error("malformed pipeline document: {0}")]
    MalformedDocument(#[source] DocumentError),

    /// Patch engine refused the remedy
    #[error("remedy rejected: {0}")]
    Rejected(#[from] PatchError),

    /// Publish retries exhausted
    #[error("publishing `{remedy_id}` failed after {attempts} attempt(s): {reason}")]
    PublishFailure {
        remedy_id: String,
        attempts: u32,
        reason: String,
    },

    /// Iteration cap reached with unresolved signatures
    #[error("gave up after {iterations} iteration(s) with {} unresolved signature(s)", unresolved.len())]
    Exhausted {
        iterations: u32,
        unresolved: Vec<ErrorSignature>,
    },

    /// Ledger could not be read or flushed
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Catalog could not be built
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

impl RemedyError {
    /// Configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the whole session must stop
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Exhausted { .. }
                | Self::MalformedDocument(_)
                | Self::Ledger(_)
                | Self::Config(_)
                | Self::Catalog(_)
        )
    }

    /// Whether retrying the same call may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientFetch(_))
    }
}

/// Errors reported by external collaborators
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// Service unreachable
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Requested data does not exist yet
    #[error("not ready: {0}")]
    NotReady(String),

    /// Request refused; retrying will not help
    #[error("refused: {0}")]
    Refused(String),
}

impl CollaboratorError {
    /// Whether a retry may succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::NotReady(_))
    }
}

impl From<CollaboratorError> for RemedyError {
    fn from(e: CollaboratorError) -> Self {
        Self::TransientFetch(e.to_string())
    }
}

/// Result type for orchestrator operations
pub type RemedyResult<T> = Result<T, RemedyError>;
