//! Error signatures
//!
//! An [`ErrorSignature`] is the run-independent key of a failure. It is the
//! last meaningful line of the error text with timestamps, CI log-command
//! prefixes, run ids, hashes, UUIDs and temp paths replaced, so the same
//! failure observed on two different runs maps to the same key.

use std::fmt::{self, Display, Formatter};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?")
        .expect("timestamp regex")
});
static LOG_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"##\[(?:error|warning|notice)\]").expect("log command regex"));
static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .expect("uuid regex")
});
static HEX_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9a-f]{12,64}\b").expect("hex regex"));
static RUN_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{6,}\b").expect("run id regex"));
static TEMP_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/tmp/[A-Za-z0-9_.\-]+").expect("temp path regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Normalized, run-independent failure key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorSignature(String);

impl ErrorSignature {
    /// Derive a signature from raw error text
    ///
    /// Multi-line text (a traceback) is keyed by its last non-empty line,
    /// which names the exception.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let line = text
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default();
        Self(normalize(line))
    }

    /// Wrap an already-normalized key
    #[inline]
    #[must_use]
    pub fn from_normalized(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether normalization left nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for ErrorSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ErrorSignature {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip run-specific noise from one line
#[must_use]
pub fn normalize(line: &str) -> String {
    let s = TIMESTAMP.replace_all(line, "");
    let s = LOG_COMMAND.replace_all(&s, "");
    let s = UUID.replace_all(&s, "<uuid>");
    let s = HEX_ID.replace_all(&s, "<sha>");
    let s = RUN_ID.replace_all(&s, "<id>");
    let s = TEMP_PATH.replace_all(&s, "/tmp/<tmp>");
    WHITESPACE.replace_all(&s, " ").trim().to_string()
}
