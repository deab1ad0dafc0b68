//! Ledger error types

use std::path::PathBuf;

/// Errors loading or flushing the ledger
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Reading or writing the snapshot failed
    #[error("ledger I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot is not valid ledger JSON
    #[error("ledger JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot was written by a newer schema
    #[error("ledger schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

impl LedgerError {
    /// I/O error on `path`
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the on-disk snapshot itself is unusable
    #[inline]
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Json(_) | Self::UnsupportedVersion { .. })
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
