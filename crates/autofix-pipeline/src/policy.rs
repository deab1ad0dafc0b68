//! Document policy
//!
//! Everything the document model needs to know about the one pipeline shape
//! it targets: which job holds the steps, which steps are golden, which
//! runners are acceptable, and what the minimal known-good document is.

use serde::{Deserialize, Serialize};

use crate::document::PipelineDocument;
use crate::error::DocumentError;

/// Minimal known-good pipeline used for terminal recovery
pub const BASELINE_YAML: &str = include_str!("../assets/baseline.yml");

/// Shape constraints for the target pipeline document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentPolicy {
    /// Job whose steps are managed
    pub job_id: String,

    /// Step identities that must survive every patch
    pub golden_steps: Vec<String>,

    /// Accepted runner labels (compared case-insensitively)
    pub valid_runners: Vec<String>,

    /// Runner substituted for a missing or unknown one
    pub default_runner: String,

    /// Branch used when a trigger has to be synthesised
    pub default_branch: String,

    /// Bootstrap-only steps dropped during normalization
    pub transient_steps: Vec<String>,

    /// Replacement for the embedded baseline document
    #[serde(skip)]
    baseline: Option<String>,
}

impl DocumentPolicy {
    /// Create the default policy
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the managed job
    #[inline]
    #[must_use]
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    /// Replace the golden step set
    #[must_use]
    pub fn with_golden_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.golden_steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the transient step set
    #[must_use]
    pub fn with_transient_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transient_steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the default runner
    #[inline]
    #[must_use]
    pub fn with_default_runner(mut self, runner: impl Into<String>) -> Self {
        self.default_runner = runner.into();
        self
    }

    /// Use a custom baseline document
    #[inline]
    #[must_use]
    pub fn with_baseline(mut self, yaml: impl Into<String>) -> Self {
        self.baseline = Some(yaml.into());
        self
    }

    /// Whether a runner label is acceptable
    #[must_use]
    pub fn is_valid_runner(&self, runner: &str) -> bool {
        self.valid_runners
            .iter()
            .any(|r| r.eq_ignore_ascii_case(runner.trim()))
    }

    /// Whether a step identity is golden
    #[inline]
    #[must_use]
    pub fn is_golden(&self, identity: &str) -> bool {
        self.golden_steps.iter().any(|g| g == identity)
    }

    /// Whether a step identity is transient
    #[inline]
    #[must_use]
    pub fn is_transient(&self, identity: &str) -> bool {
        self.transient_steps.iter().any(|t| t == identity)
    }

    /// Baseline YAML text in use
    #[inline]
    #[must_use]
    pub fn baseline_yaml(&self) -> &str {
        self.baseline.as_deref().unwrap_or(BASELINE_YAML)
    }

    /// Parse the minimal known-good document
    ///
    /// # Errors
    /// Returns error if the baseline does not parse or does not validate
    pub fn baseline(&self) -> Result<PipelineDocument, DocumentError> {
        let doc = PipelineDocument::parse(self.baseline_yaml(), self)?;
        doc.validate(self)?;
        Ok(doc)
    }
}

impl Default for DocumentPolicy {
    fn default() -> Self {
        Self {
            job_id: "build".to_string(),
            golden_steps: vec![
                "actions/checkout@v4".to_string(),
                "Set up Python".to_string(),
                "Install Python dependencies".to_string(),
                "Build APK".to_string(),
            ],
            valid_runners: vec![
                "ubuntu-latest".to_string(),
                "ubuntu-24.04".to_string(),
                "ubuntu-22.04".to_string(),
                "ubuntu-20.04".to_string(),
            ],
            default_runner: "ubuntu-latest".to_string(),
            default_branch: "main".to_string(),
            transient_steps: vec!["Initial Trigger Step".to_string()],
            baseline: None,
        }
    }
}
