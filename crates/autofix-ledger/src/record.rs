//! Persisted ledger schema
//!
//! The snapshot is one JSON document. `history` is the append-only audit
//! trail; everything else is resumption state.

use std::fmt::{self, Display, Formatter};

use autofix_analyzer::ErrorSignature;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Current snapshot schema
pub const SCHEMA_VERSION: u32 = 1;

/// Result of one remedy attempt for one signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Published, awaiting a later run
    Published,
    /// Publishing failed past its retry budget
    PublishFailed,
    /// Refused before publishing
    Rejected { reason: String },
    /// Signature recurred on a run after the publish
    Ineffective,
    /// Signature absent on a run after the publish
    Resolved,
}

impl Outcome {
    /// Rejection with a reason tag
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Whether this outcome rules the remedy out for the signature
    #[inline]
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::PublishFailed | Self::Rejected { .. } | Self::Ineffective
        )
    }

    /// Whether the attempt awaits reconciliation
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Published)
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Published => f.write_str("published"),
            Self::PublishFailed => f.write_str("publish_failed"),
            Self::Rejected { reason } => write!(f, "rejected:{reason}"),
            Self::Ineffective => f.write_str("ineffective"),
            Self::Resolved => f.write_str("resolved"),
        }
    }
}

/// One audit trail line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub error: ErrorSignature,
    pub remedy: String,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

/// One attempt of a remedy against a signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub remedy_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
}

/// Everything known about one signature
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureHistory {
    pub attempted: Vec<Attempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_remedy: Option<String>,
}

impl SignatureHistory {
    /// Latest attempt of `remedy_id`
    #[must_use]
    pub fn last_attempt(&self, remedy_id: &str) -> Option<&Attempt> {
        self.attempted.iter().rev().find(|a| a.remedy_id == remedy_id)
    }

    /// Whether any attempt of `remedy_id` failed
    #[must_use]
    pub fn has_failed(&self, remedy_id: &str) -> bool {
        self.attempted
            .iter()
            .any(|a| a.remedy_id == remedy_id && a.outcome.is_failure())
    }
}

/// Conclusion of one step in an observed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepConclusion {
    Success,
    Failure,
    Skipped,
    Cancelled,
}

impl StepConclusion {
    /// Stable name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Last observed conclusion of a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub conclusion: StepConclusion,
    pub observed_at: DateTime<Utc>,
}

/// A run that has already been analysed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzedRun {
    pub id: u64,
    pub created_at: DateTime<Utc>,
}

/// Progress of the remediation session in flight
///
/// Cleared when a session ends in success or exhaustion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: Ulid,
    pub iteration: u32,
    #[serde(default)]
    pub last_run: Option<AnalyzedRun>,
    /// Signatures dropped after a publish failure
    #[serde(default)]
    pub abandoned: Vec<ErrorSignature>,
    /// Document was reset to the baseline during this session
    #[serde(default)]
    pub reset: bool,
}

impl SessionState {
    /// Fresh session
    #[must_use]
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            iteration: 0,
            last_run: None,
            abandoned: Vec::new(),
            reset: false,
        }
    }
}

/// Full ledger snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub version: u32,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub signatures: IndexMap<ErrorSignature, SignatureHistory>,
    #[serde(default)]
    pub protected_steps: IndexMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub step_status: IndexMap<String, StepStatus>,
    #[serde(default)]
    pub untried_errors: Vec<ErrorSignature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionState>,
}

impl Default for LedgerRecord {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            history: Vec::new(),
            signatures: IndexMap::new(),
            protected_steps: IndexMap::new(),
            step_status: IndexMap::new(),
            untried_errors: Vec::new(),
            session: None,
        }
    }
}
