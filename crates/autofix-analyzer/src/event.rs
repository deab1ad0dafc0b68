//! Error events and CI annotations

use serde::{Deserialize, Serialize};

use crate::signature::ErrorSignature;

/// Classification of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A failure
    Error,
    /// A warning; never drives remediation
    Warning,
    /// A non-zero process exit reported by the CI runner
    ExitCode,
}

/// Where an event was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// A line or block of the raw log
    Log,
    /// A structured annotation from the CI platform
    Annotation,
    /// Synthesised when a run failed without any observable event
    Synthetic,
}

/// One classified finding from a single analysis pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Matched line, or joined traceback block
    pub raw_text: String,
    /// Id of the catalog rule or generic vocabulary entry that matched
    pub pattern_id: Option<String>,
    /// Surrounding log lines
    pub context: Vec<String>,
    /// Step running when the line was emitted
    pub associated_step: Option<String>,
    pub kind: EventKind,
    /// Generic symptom rather than root cause
    pub umbrella: bool,
    pub source: EventSource,
    /// 1-based log line number
    pub line: Option<usize>,
}

impl ErrorEvent {
    /// Event with no context or location
    #[must_use]
    pub fn new(raw_text: impl Into<String>, kind: EventKind, source: EventSource) -> Self {
        Self {
            raw_text: raw_text.into(),
            pattern_id: None,
            context: Vec::new(),
            associated_step: None,
            kind,
            umbrella: false,
            source,
            line: None,
        }
    }

    /// Set the matching pattern
    #[inline]
    #[must_use]
    pub fn with_pattern(mut self, pattern_id: impl Into<String>) -> Self {
        self.pattern_id = Some(pattern_id.into());
        self
    }

    /// Mark as umbrella
    #[inline]
    #[must_use]
    pub fn with_umbrella(mut self, umbrella: bool) -> Self {
        self.umbrella = umbrella;
        self
    }

    /// Run-independent key
    #[inline]
    #[must_use]
    pub fn signature(&self) -> ErrorSignature {
        ErrorSignature::from_text(&self.raw_text)
    }

    /// Whether the event is a failure (error or exit code)
    #[inline]
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.kind, EventKind::Error | EventKind::ExitCode)
    }

    /// Whether the event names a root cause rather than a symptom
    #[inline]
    #[must_use]
    pub fn is_specific(&self) -> bool {
        self.is_failure() && !self.umbrella
    }
}

/// Severity of a CI annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationLevel {
    #[serde(alias = "error")]
    Failure,
    Warning,
    Notice,
}

/// Structured message attached to a run by the CI platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub level: AnnotationLevel,
    pub message: String,
}

impl Annotation {
    /// Failure annotation
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            level: AnnotationLevel::Failure,
            message: message.into(),
        }
    }

    /// Warning annotation
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: AnnotationLevel::Warning,
            message: message.into(),
        }
    }
}
