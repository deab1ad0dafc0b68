//! External collaborators
//!
//! The orchestrator reaches the outside world only through these traits:
//! the CI platform, the version-control side that holds and publishes the
//! pipeline document, and an optional suggestion oracle.

use std::fmt::{self, Display, Formatter};

use autofix_analyzer::{Annotation, ErrorSignature};
use autofix_ledger::StepConclusion;
use autofix_pipeline::PipelineDocument;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
}

/// How a completed run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    TimedOut,
    /// Run could not start, usually an invalid pipeline document
    StartupFailure,
}

impl Display for RunConclusion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::StartupFailure => "startup_failure",
        })
    }
}

/// One pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub id: u64,
    pub status: RunStatus,
    #[serde(default)]
    pub conclusion: Option<RunConclusion>,
    pub commit_ref: String,
    pub created_at: DateTime<Utc>,
}

impl RunInfo {
    /// Whether the run reached a terminal state
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Whether the run completed successfully
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.is_completed() && self.conclusion == Some(RunConclusion::Success)
    }
}

/// Per-step conclusion reported for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub conclusion: StepConclusion,
}

/// CI platform client
#[cfg_attr(test, mockall::automock)]
pub trait CiClient {
    /// Most recent run of the pipeline, if any
    ///
    /// # Errors
    /// Returns error if the platform cannot be reached
    fn latest_run(&self, pipeline_id: &str) -> Result<Option<RunInfo>, CollaboratorError>;

    /// Raw log text of a run
    ///
    /// # Errors
    /// Returns `NotReady` while logs are still being assembled
    fn logs(&self, run_id: u64) -> Result<String, CollaboratorError>;

    /// Structured annotations of a run
    ///
    /// # Errors
    /// Returns error if the platform cannot be reached
    fn annotations(&self, run_id: u64) -> Result<Vec<Annotation>, CollaboratorError>;

    /// Per-step conclusions of a run; platforms without step data report none
    ///
    /// # Errors
    /// Returns error if the platform cannot be reached
    fn step_results(&self, run_id: u64) -> Result<Vec<StepResult>, CollaboratorError> {
        let _ = run_id;
        Ok(Vec::new())
    }
}

/// Version-control side: holds the current document and publishes new ones
#[cfg_attr(test, mockall::automock)]
pub trait Publisher {
    /// Text of the document as currently committed
    ///
    /// # Errors
    /// Returns error if the document cannot be read
    fn current_document(&self) -> Result<String, CollaboratorError>;

    /// Commit and push `document`
    ///
    /// # Errors
    /// Returns error if the transport fails
    fn publish(&self, document: &PipelineDocument, message: &str) -> Result<(), CollaboratorError>;
}

/// Everything the oracle is told about one failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub signature: ErrorSignature,
    pub error_text: String,
    pub context: Vec<String>,
    pub associated_step: Option<String>,
    pub document: String,
    /// Remedy ids already tried for this signature
    pub attempted: Vec<String>,
}

impl ContextBundle {
    /// Trim the bundle to roughly `max_chars`
    ///
    /// Context lines furthest from the error go first, then the document is
    /// truncated.
    #[must_use]
    pub fn truncated(mut self, max_chars: usize) -> Self {
        let size = |b: &Self| {
            b.error_text.len() + b.document.len() + b.context.iter().map(String::len).sum::<usize>()
        };
        while size(&self) > max_chars && !self.context.is_empty() {
            let drop_front = self.context.len() % 2 == 0;
            if drop_front {
                self.context.remove(0);
            } else {
                self.context.pop();
            }
        }
        let budget = max_chars.saturating_sub(self.error_text.len());
        if self.document.len() > budget {
            let mut cut = budget;
            while !self.document.is_char_boundary(cut) {
                cut -= 1;
            }
            self.document.truncate(cut);
        }
        self
    }
}

/// Best-effort source of fragments for failures no local rule covers
#[cfg_attr(test, mockall::automock)]
pub trait SuggestionOracle {
    /// Suggested step fragment, as YAML text
    ///
    /// # Errors
    /// Returns error if no suggestion could be produced
    fn suggest(&self, bundle: &ContextBundle) -> Result<String, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(context: usize, doc: usize) -> ContextBundle {
        ContextBundle {
            signature: ErrorSignature::from_text("boom"),
            error_text: "boom".into(),
            context: (0..context).map(|i| format!("line {i:04}")).collect(),
            associated_step: None,
            document: "x".repeat(doc),
            attempted: Vec::new(),
        }
    }

    #[test]
    fn truncation_drops_outer_context_first() {
        let b = bundle(10, 10).truncated(4 + 10 + 9 * 4);
        assert_eq!(b.context.len(), 4);
        assert_eq!(b.document.len(), 10);
        assert!(b.context.contains(&"line 0005".to_string()));
    }

    #[test]
    fn truncation_cuts_document_last() {
        let b = bundle(0, 100).truncated(50);
        assert_eq!(b.document.len(), 46);
    }

    #[test]
    fn default_step_results_are_empty() {
        struct Bare;
        impl CiClient for Bare {
            fn latest_run(&self, _: &str) -> Result<Option<RunInfo>, CollaboratorError> {
                Ok(None)
            }
            fn logs(&self, _: u64) -> Result<String, CollaboratorError> {
                Ok(String::new())
            }
            fn annotations(&self, _: u64) -> Result<Vec<Annotation>, CollaboratorError> {
                Ok(Vec::new())
            }
        }
        assert_eq!(Bare.step_results(1), Ok(Vec::new()));
    }
}
