//! Testing utilities for the autofix workspace
//!
//! A scripted CI platform, canned logs and ledger helpers.

#![allow(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use autofix_analyzer::Annotation;
use autofix_core::{
    CiClient, CollaboratorError, ContextBundle, Publisher, RunConclusion, RunInfo, RunStatus,
    StepResult, SuggestionOracle,
};
use autofix_ledger::{Clock, FixHistoryLedger, ManualClock, StepConclusion};
use autofix_pipeline::{DocumentPolicy, PipelineDocument};
use parking_lot::Mutex;
use tempfile::TempDir;

pub const SDK_MISSING_LOG: &str = "\
2024-05-01T10:00:00Z ##[group]Run buildozer -v android debug
2024-05-01T10:00:00Z buildozer -v android debug
2024-05-01T10:00:00Z ##[endgroup]
2024-05-01T10:00:01Z /home/runner/work/_temp/a1.sh: line 3: sdkmanager: command not found
2024-05-01T10:00:01Z ##[error]Process completed with exit code 127.
";

pub const DISK_FULL_LOG: &str = "\
2024-05-01T11:00:00Z ##[group]Run buildozer -v android debug
2024-05-01T11:00:00Z buildozer -v android debug
2024-05-01T11:00:00Z ##[endgroup]
2024-05-01T11:02:13Z OSError: [Errno 28] No space left on device
2024-05-01T11:02:13Z ##[error]Process completed with exit code 1.
";

pub const BAD_PIN_LOG: &str = "\
2024-05-01T12:00:00Z ##[group]Run pip install buildozer==1.5.1 kivy==2.3.1
2024-05-01T12:00:00Z pip install buildozer==1.5.1 kivy==2.3.1
2024-05-01T12:00:00Z ##[endgroup]
2024-05-01T12:00:04Z ERROR: Could not find a version that satisfies the requirement buildozer==1.5.1 (from versions: 1.4.0, 1.5.0)
2024-05-01T12:00:04Z ERROR: No matching distribution found for buildozer==1.5.1
2024-05-01T12:00:04Z ##[error]Process completed with exit code 1.
";

/// Baseline document text
#[must_use]
pub fn baseline_text() -> String {
    DocumentPolicy::default().baseline_yaml().to_string()
}

/// Baseline with the buildozer pin replaced by `pin`
#[must_use]
pub fn baseline_with_pin(pin: &str) -> String {
    baseline_text().replace("buildozer==1.5.0", pin)
}

/// Ledger persisted under a fresh temporary directory
pub fn temp_ledger(clock: Arc<dyn Clock>) -> (TempDir, FixHistoryLedger) {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FixHistoryLedger::open_with_clock(dir.path().join("ledger.json"), clock).unwrap();
    (dir, ledger)
}

/// Run the platform produces after a publish
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub conclusion: RunConclusion,
    pub log: String,
    pub steps: Vec<StepResult>,
}

impl ScriptedRun {
    pub fn new(conclusion: RunConclusion, log: impl Into<String>) -> Self {
        Self {
            conclusion,
            log: log.into(),
            steps: Vec::new(),
        }
    }

    pub fn success() -> Self {
        Self::new(RunConclusion::Success, "")
    }

    #[must_use]
    pub fn with_step(mut self, name: &str, conclusion: StepConclusion) -> Self {
        self.steps.push(StepResult {
            name: name.to_string(),
            conclusion,
        });
        self
    }
}

#[derive(Debug, Default)]
struct PlatformState {
    runs: Vec<RunInfo>,
    logs: HashMap<u64, String>,
    annotations: HashMap<u64, Vec<Annotation>>,
    steps: HashMap<u64, Vec<StepResult>>,
    document: String,
    pinned_document: Option<String>,
    published: Vec<String>,
    script: VecDeque<ScriptedRun>,
    failing_publishes: Option<u32>,
    unavailable_reads: u32,
    publish_calls: u32,
}

impl PlatformState {
    fn push(&mut self, run: ScriptedRun, created_at: chrono::DateTime<chrono::Utc>) -> u64 {
        let id = self.runs.len() as u64 + 1;
        self.runs.push(RunInfo {
            id,
            status: RunStatus::Completed,
            conclusion: Some(run.conclusion),
            commit_ref: format!("commit-{id}"),
            created_at,
        });
        self.logs.insert(id, run.log);
        self.steps.insert(id, run.steps);
        id
    }
}

/// In-memory CI platform plus repository
///
/// Every successful publish replaces the document and, if a run is
/// scripted, makes it the newest completed run.
#[derive(Debug, Clone)]
pub struct SimulatedPlatform {
    clock: Arc<ManualClock>,
    state: Arc<Mutex<PlatformState>>,
}

impl SimulatedPlatform {
    pub fn new(clock: Arc<ManualClock>, document: impl Into<String>) -> Self {
        let state = PlatformState {
            document: document.into(),
            ..PlatformState::default()
        };
        Self {
            clock,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Add a completed run created now
    pub fn push_run(&self, run: ScriptedRun) -> u64 {
        self.state.lock().push(run, self.clock.now())
    }

    /// Attach annotations to a run
    pub fn annotate(&self, run_id: u64, annotations: Vec<Annotation>) {
        self.state.lock().annotations.insert(run_id, annotations);
    }

    /// Queue the run triggered by the next publish
    #[must_use]
    pub fn then(self, run: ScriptedRun) -> Self {
        self.state.lock().script.push_back(run);
        self
    }

    /// Fail the next `n` publishes, or all of them with `None`
    #[must_use]
    pub fn failing_publishes(self, n: Option<u32>) -> Self {
        self.state.lock().failing_publishes = Some(n.unwrap_or(u32::MAX));
        self
    }

    /// Keep serving `text` as the current document whatever gets published
    #[must_use]
    pub fn pinned_document(self, text: impl Into<String>) -> Self {
        self.state.lock().pinned_document = Some(text.into());
        self
    }

    /// Report the platform unreachable for the next `n` reads
    #[must_use]
    pub fn unavailable_for(self, n: u32) -> Self {
        self.state.lock().unavailable_reads = n;
        self
    }

    pub fn ci(&self) -> SimulatedCi {
        SimulatedCi(self.clone())
    }

    pub fn publisher(&self) -> SimulatedPublisher {
        SimulatedPublisher(self.clone())
    }

    /// Documents published so far
    pub fn published(&self) -> Vec<String> {
        self.state.lock().published.clone()
    }

    /// Publish calls, including failed ones
    pub fn publish_calls(&self) -> u32 {
        self.state.lock().publish_calls
    }

    /// Current document text
    pub fn document(&self) -> String {
        self.state.lock().document.clone()
    }

    pub fn run_count(&self) -> usize {
        self.state.lock().runs.len()
    }

    fn read(&self) -> Result<(), CollaboratorError> {
        let mut state = self.state.lock();
        if state.unavailable_reads > 0 {
            state.unavailable_reads -= 1;
            return Err(CollaboratorError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }
}

/// [`CiClient`] half of a [`SimulatedPlatform`]
#[derive(Debug, Clone)]
pub struct SimulatedCi(SimulatedPlatform);

impl CiClient for SimulatedCi {
    fn latest_run(&self, _pipeline_id: &str) -> Result<Option<RunInfo>, CollaboratorError> {
        self.0.read()?;
        Ok(self.0.state.lock().runs.last().cloned())
    }

    fn logs(&self, run_id: u64) -> Result<String, CollaboratorError> {
        self.0.read()?;
        self.0
            .state
            .lock()
            .logs
            .get(&run_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotReady(format!("logs for run {run_id}")))
    }

    fn annotations(&self, run_id: u64) -> Result<Vec<Annotation>, CollaboratorError> {
        self.0.read()?;
        Ok(self.0.state.lock().annotations.get(&run_id).cloned().unwrap_or_default())
    }

    fn step_results(&self, run_id: u64) -> Result<Vec<StepResult>, CollaboratorError> {
        Ok(self.0.state.lock().steps.get(&run_id).cloned().unwrap_or_default())
    }
}

/// [`Publisher`] half of a [`SimulatedPlatform`]
#[derive(Debug, Clone)]
pub struct SimulatedPublisher(SimulatedPlatform);

impl Publisher for SimulatedPublisher {
    fn current_document(&self) -> Result<String, CollaboratorError> {
        let state = self.0.state.lock();
        Ok(state.pinned_document.clone().unwrap_or_else(|| state.document.clone()))
    }

    fn publish(&self, document: &PipelineDocument, _message: &str) -> Result<(), CollaboratorError> {
        let now = self.0.clock.now();
        let mut state = self.0.state.lock();
        state.publish_calls += 1;
        if let Some(remaining) = state.failing_publishes.as_mut() {
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                return Err(CollaboratorError::Unavailable("push rejected by remote".into()));
            }
        }
        let text = document
            .to_yaml()
            .map_err(|e| CollaboratorError::Refused(e.to_string()))?;
        state.document.clone_from(&text);
        state.published.push(text);
        if let Some(run) = state.script.pop_front() {
            state.push(run, now);
        }
        Ok(())
    }
}

/// Oracle that always answers with the same text
#[derive(Debug, Clone)]
pub struct StaticOracle {
    answer: String,
    asked: Arc<Mutex<Vec<ContextBundle>>>,
}

impl StaticOracle {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            asked: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Bundles received so far
    pub fn asked(&self) -> Vec<ContextBundle> {
        self.asked.lock().clone()
    }
}

impl SuggestionOracle for StaticOracle {
    fn suggest(&self, bundle: &ContextBundle) -> Result<String, CollaboratorError> {
        self.asked.lock().push(bundle.clone());
        Ok(self.answer.clone())
    }
}
