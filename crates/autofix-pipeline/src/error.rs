//! Error types for the pipeline document model and patch engine

use crate::step::StepError;

/// Structural problems with a pipeline document
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// Text is not valid YAML
    #[error("yaml syntax error: {0}")]
    Syntax(#[from] serde_yaml::Error),

    /// YAML is valid but not a pipeline document
    #[error("malformed document: {0}")]
    Malformed(String),

    /// Managed job is absent
    #[error("job `{0}` not found")]
    MissingJob(String),

    /// Managed job has no steps
    #[error("job has no steps")]
    NoSteps,

    /// Golden steps are absent
    #[error("golden steps missing: {}", .0.join(", "))]
    GoldenStepsMissing(Vec<String>),

    /// Two steps share an identity
    #[error("duplicate step identity: {0}")]
    DuplicateIdentity(String),

    /// Step without any action
    #[error("step `{0}` has no action")]
    StepWithoutAction(String),
}

impl DocumentError {
    /// Create a malformed-document error
    #[inline]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Reasons a remedy was rejected by the patch engine
///
/// Every variant leaves the input document untouched.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Fragment does not reduce to exactly one well-formed step
    #[error("invalid fragment: {0}")]
    InvalidFragment(String),

    /// Step already present with the same content
    #[error("duplicate step: {0}")]
    DuplicateStep(String),

    /// Step is verified and immutable
    #[error("protected step: {0}")]
    ProtectedStep(String),

    /// Modify target is absent
    #[error("target step not found: {0}")]
    TargetNotFound(String),

    /// Patched document failed validation
    #[error("patched document invalid: {0}")]
    Validation(#[from] DocumentError),
}

impl PatchError {
    /// Create an invalid-fragment error
    #[inline]
    pub fn invalid_fragment(msg: impl Into<String>) -> Self {
        Self::InvalidFragment(msg.into())
    }

    /// Stable tag recorded in the ledger
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::InvalidFragment(_) => "invalid_fragment",
            Self::DuplicateStep(_) => "duplicate_step",
            Self::ProtectedStep(_) => "protected_step",
            Self::TargetNotFound(_) => "target_not_found",
            Self::Validation(_) => "validation",
        }
    }

    /// Whether the document already contains the remedy
    #[inline]
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateStep(_))
    }
}

impl From<StepError> for PatchError {
    fn from(err: StepError) -> Self {
        Self::InvalidFragment(err.to_string())
    }
}

/// Result type for document operations
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Result type for patch operations
pub type PatchResult<T> = Result<T, PatchError>;
