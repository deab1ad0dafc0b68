//! Remediation configuration
//!
//! Loaded from TOML; every field is optional and falls back to its default.
//!
//! ```toml
//! pipeline_id = "debug.yml"
//! max_iterations = 10
//!
//! [publish]
//! cooldown_secs = 600
//!
//! [structural.known_good_versions]
//! buildozer = "1.5.0"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use autofix_analyzer::AnalyzerConfig;
use autofix_pipeline::DocumentPolicy;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{RemedyError, RemedyResult};
use crate::retry::{PollPolicy, RetryPolicy};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemedyConfig {
    /// Pipeline whose runs are watched
    pub pipeline_id: String,
    /// Iterations before the session gives up
    pub max_iterations: u32,
    pub publish: PublishConfig,
    pub polling: PollingConfig,
    pub fetch: FetchConfig,
    pub analyzer: AnalyzerConfig,
    pub document: DocumentPolicy,
    pub structural: StructuralConfig,
    pub suggestions: SuggestionConfig,
    pub paths: PathsConfig,
}

impl Default for RemedyConfig {
    fn default() -> Self {
        Self {
            pipeline_id: "debug.yml".to_string(),
            max_iterations: 10,
            publish: PublishConfig::default(),
            polling: PollingConfig::default(),
            fetch: FetchConfig::default(),
            analyzer: AnalyzerConfig::default(),
            document: DocumentPolicy::default(),
            structural: StructuralConfig::default(),
            suggestions: SuggestionConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl RemedyConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// Returns `Config` if the text is not valid TOML for this shape, or the
    /// resulting values are out of range
    pub fn from_toml_str(text: &str) -> RemedyResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| RemedyError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns `Config` if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> RemedyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RemedyError::config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `Config` naming the first offending field
    pub fn validate(&self) -> RemedyResult<()> {
        if self.max_iterations == 0 {
            return Err(RemedyError::config("max_iterations must be at least 1"));
        }
        if self.publish.max_attempts == 0 {
            return Err(RemedyError::config("publish.max_attempts must be at least 1"));
        }
        if self.fetch.max_attempts == 0 {
            return Err(RemedyError::config("fetch.max_attempts must be at least 1"));
        }
        if self.polling.interval_secs == 0 {
            return Err(RemedyError::config("polling.interval_secs must be at least 1"));
        }
        if self.document.golden_steps.is_empty() {
            return Err(RemedyError::config("document.golden_steps must not be empty"));
        }
        Ok(())
    }

    /// With pipeline id
    #[inline]
    #[must_use]
    pub fn with_pipeline_id(mut self, id: impl Into<String>) -> Self {
        self.pipeline_id = id.into();
        self
    }

    /// With iteration cap
    #[inline]
    #[must_use]
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// With publish cooldown
    #[inline]
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.publish.cooldown_secs = cooldown.as_secs();
        self
    }

    /// With document policy
    #[inline]
    #[must_use]
    pub fn with_document_policy(mut self, policy: DocumentPolicy) -> Self {
        self.document = policy;
        self
    }

    /// With suggestion fallback enabled or disabled
    #[inline]
    #[must_use]
    pub fn with_suggestions(mut self, enabled: bool) -> Self {
        self.suggestions.enabled = enabled;
        self
    }

    /// Minimum spacing between publishes
    #[inline]
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.publish.cooldown_secs)
    }

    /// Retry budget for publishing
    #[must_use]
    pub fn publish_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.publish.max_attempts)
            .with_initial_delay(Duration::from_millis(self.publish.retry_delay_ms))
    }

    /// Retry budget for platform reads
    #[must_use]
    pub fn fetch_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.fetch.max_attempts)
            .with_initial_delay(Duration::from_millis(self.fetch.initial_delay_ms))
            .with_max_elapsed(Duration::from_secs(self.fetch.max_elapsed_secs))
    }

    /// Pause between polls of the platform
    #[inline]
    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_secs)
    }

    /// Wait for a run to reach a terminal state
    #[must_use]
    pub fn run_poll(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.polling.interval_secs),
            Duration::from_secs(self.polling.run_timeout_secs),
        )
    }

    /// Wait for a run triggered by a publish to appear
    #[must_use]
    pub fn new_run_poll(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.polling.interval_secs),
            Duration::from_secs(self.polling.new_run_timeout_secs),
        )
    }
}

/// Publish throttling and retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub cooldown_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 600,
            max_attempts: 3,
            retry_delay_ms: 2_000,
        }
    }
}

/// Run polling budgets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
    pub run_timeout_secs: u64,
    pub new_run_timeout_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            run_timeout_secs: 1_200,
            new_run_timeout_secs: 1_800,
        }
    }
}

/// Platform read retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_elapsed_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_elapsed_secs: 60,
        }
    }
}

/// Parameterised dependency fixes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralConfig {
    /// Step whose script holds the dependency pins
    pub dependency_step: String,
    /// Package to version substituted for an unsatisfiable pin; packages
    /// not listed are unpinned
    pub known_good_versions: IndexMap<String, String>,
}

impl Default for StructuralConfig {
    fn default() -> Self {
        let mut known_good_versions = IndexMap::new();
        known_good_versions.insert("buildozer".to_string(), "1.5.0".to_string());
        known_good_versions.insert("cython".to_string(), "0.29.36".to_string());
        Self {
            dependency_step: "Install Python dependencies".to_string(),
            known_good_versions,
        }
    }
}

/// External suggestion fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    pub enabled: bool,
    /// Cap on the context handed to the oracle
    pub max_context_chars: usize,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_context_chars: 20_000,
        }
    }
}

/// Local file locations used by the driver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub workflow: Option<PathBuf>,
    pub ledger: Option<PathBuf>,
    pub runs_dir: Option<PathBuf>,
    /// Extra catalog rules appended after the built-ins
    pub catalog: Option<PathBuf>,
    /// Copies of the document taken before each publish
    pub backup_dir: Option<PathBuf>,
}
