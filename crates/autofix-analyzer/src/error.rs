//! Error types for the remedy catalog and analyzer

/// Catalog construction errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Rule pattern does not compile
    #[error("rule `{id}` has an invalid pattern: {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    /// Rule id already present
    #[error("duplicate rule id: {0}")]
    DuplicateRule(String),

    /// Catalog document is not valid YAML
    #[error("catalog yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Rule remedy is unusable
    #[error("rule `{id}` has an invalid remedy: {reason}")]
    InvalidRemedy { id: String, reason: String },
}

impl CatalogError {
    /// Create an invalid-remedy error
    #[inline]
    pub fn invalid_remedy(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRemedy {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;
