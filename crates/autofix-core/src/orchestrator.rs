//! Remediation orchestrator
//!
//! One call to [`Orchestrator::run_once`] is one iteration of the loop:
//!
//! 1. FETCH: find the newest completed run not yet analysed, waiting for the
//!    run triggered by the previous publish if there was one
//! 2. ANALYZE: classify its log and annotations
//! 3. SELECT_REMEDY: walk the failures, consulting the ledger before every
//!    candidate
//! 4. PATCH / VALIDATE: apply the first eligible remedy through the patch
//!    engine
//! 5. PUBLISH: throttled, with bounded retries
//! 6. RECORD: write the outcome to the ledger
//!
//! At most one remedy is published per iteration; the remaining failures
//! are deferred. Session progress (iteration count, last analysed run,
//! abandoned signatures) lives in the ledger, so a driver may run each
//! iteration in a fresh process.

use std::collections::HashSet;
use std::sync::Arc;

use autofix_analyzer::{
    CandidatePattern, Catalog, CatalogError, ErrorEvent, ErrorSignature, EventKind, EventSource,
    LogAnalyzer,
};
use autofix_ledger::{AnalyzedRun, Clock, FixHistoryLedger, Outcome, SessionState, StepConclusion};
use autofix_pipeline::{DocumentError, PatchEngine, PatchError, PipelineDocument};
use serde::Serialize;
use tracing::{debug, info, info_span, warn};
use ulid::Ulid;

use crate::collab::{CiClient, ContextBundle, Publisher, RunInfo, SuggestionOracle};
use crate::config::RemedyConfig;
use crate::error::{CollaboratorError, RemedyError, RemedyResult};
use crate::selection::{local_candidates, parse_suggestion, suggestion_id, Remedy, RemedySource};
use crate::structural::StructuralFixer;

/// Ledger key for a reset to the baseline document
pub const RESET_REMEDY: &str = "reset";

/// Signature under which resets are recorded
#[must_use]
pub fn reset_signature() -> ErrorSignature {
    ErrorSignature::from_normalized("pipeline document failed validation")
}

/// Where the session stands after an iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The latest run passed
    Success,
    /// Nothing more can be tried
    Exhausted,
    /// Call again later
    Pending,
}

/// Remedy applied during an iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedRemedy {
    pub signature: ErrorSignature,
    pub remedy_id: String,
    pub source: RemedySource,
    pub step: String,
    pub published: bool,
}

/// Summary of one iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub status: SessionStatus,
    pub session: Ulid,
    pub iteration: u32,
    /// Run analysed in this iteration
    pub run_id: Option<u64>,
    /// Failure signatures found in the run
    pub failures: Vec<ErrorSignature>,
    pub applied: Option<AppliedRemedy>,
    /// Document was reset to the baseline
    pub reset: bool,
    /// Failure signatures still without a fix
    pub unresolved: Vec<ErrorSignature>,
    /// Rules added to the catalog from this run
    pub discovered: usize,
}

impl RunReport {
    fn new(status: SessionStatus, session: &SessionState) -> Self {
        Self {
            status,
            session: session.id,
            iteration: session.iteration,
            run_id: None,
            failures: Vec::new(),
            applied: None,
            reset: false,
            unresolved: Vec::new(),
            discovered: 0,
        }
    }
}

enum Fetched {
    Ready(RunInfo),
    NothingNew,
}

/// Drives the fetch, analyze, patch, publish, record loop
pub struct Orchestrator {
    config: RemedyConfig,
    ci: Box<dyn CiClient>,
    publisher: Box<dyn Publisher>,
    oracle: Option<Box<dyn SuggestionOracle>>,
    ledger: FixHistoryLedger,
    catalog: Catalog,
    analyzer: LogAnalyzer,
    engine: PatchEngine,
    structural: StructuralFixer,
    clock: Arc<dyn Clock>,
    session: SessionState,
    last_good: Option<PipelineDocument>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("session", &self.session)
            .field("ledger", &self.ledger)
            .field("catalog_rules", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator, resuming the session recorded in `ledger`
    ///
    /// # Errors
    /// Returns error if the analyzer configuration or built-in catalog is
    /// invalid
    pub fn new(
        config: RemedyConfig,
        ci: impl CiClient + 'static,
        publisher: impl Publisher + 'static,
        ledger: FixHistoryLedger,
        clock: Arc<dyn Clock>,
    ) -> RemedyResult<Self> {
        config.validate()?;
        let analyzer = LogAnalyzer::new(config.analyzer.clone())?;
        let catalog = Catalog::builtin()?;
        let session = match ledger.session() {
            Some(s) => {
                info!("resuming session {} at iteration {}", s.id, s.iteration);
                s.clone()
            }
            None => SessionState::new(Ulid::new()),
        };
        Ok(Self {
            engine: PatchEngine::new(config.document.clone()),
            structural: StructuralFixer::new(config.structural.clone()),
            config,
            ci: Box::new(ci),
            publisher: Box::new(publisher),
            oracle: None,
            ledger,
            catalog,
            analyzer,
            clock,
            session,
            last_good: None,
        })
    }

    /// With suggestion oracle
    #[must_use]
    pub fn with_oracle(mut self, oracle: impl SuggestionOracle + 'static) -> Self {
        self.oracle = Some(Box::new(oracle));
        self
    }

    /// Append operator-curated rules after the built-ins
    ///
    /// # Errors
    /// Returns error if the overlay is invalid; the catalog is unchanged
    pub fn with_catalog_overlay(mut self, yaml: &str) -> RemedyResult<Self> {
        let added = self.catalog.overlay_from_yaml(yaml)?;
        info!("catalog overlay added {} rule(s)", added);
        Ok(self)
    }

    /// Ledger in use
    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &FixHistoryLedger {
        &self.ledger
    }

    /// Catalog in use, including rules discovered this session
    #[inline]
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Current session id
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> Ulid {
        self.session.id
    }

    /// Iterations run in this session
    #[inline]
    #[must_use]
    pub fn iteration(&self) -> u32 {
        self.session.iteration
    }

    /// Run iterations until the session succeeds or is exhausted
    ///
    /// # Errors
    /// Returns `Exhausted` when the session gives up, or the first terminal
    /// error
    pub fn run_until_settled(&mut self) -> RemedyResult<RunReport> {
        loop {
            match self.run_once() {
                Ok(report) => match report.status {
                    SessionStatus::Success => return Ok(report),
                    SessionStatus::Exhausted => {
                        return Err(RemedyError::Exhausted {
                            iterations: report.iteration,
                            unresolved: report.unresolved,
                        })
                    }
                    SessionStatus::Pending => {
                        if report.run_id.is_none() {
                            self.clock.sleep(self.config.polling_interval());
                        }
                    }
                },
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => warn!("iteration failed, continuing: {}", e),
            }
        }
    }

    /// Run one iteration
    ///
    /// # Errors
    /// Returns `TransientFetch` if the platform stayed unreachable, or a
    /// terminal error (ledger, malformed document after reset)
    pub fn run_once(&mut self) -> RemedyResult<RunReport> {
        if self.session.iteration >= self.config.max_iterations {
            warn!("iteration cap of {} reached", self.config.max_iterations);
            let mut report = RunReport::new(SessionStatus::Exhausted, &self.session);
            report.unresolved = self.ledger.untried().to_vec();
            self.end_session()?;
            return Ok(report);
        }
        self.session.iteration += 1;
        self.ledger.set_session(Some(self.session.clone()))?;

        let span = info_span!("run_once", session = %self.session.id, iteration = self.session.iteration);
        let _enter = span.enter();

        let Some(run) = self.fetch_run()? else {
            debug!("no new completed run");
            return Ok(RunReport::new(SessionStatus::Pending, &self.session));
        };
        info!(
            "analysing run {} ({})",
            run.id,
            run.conclusion.map_or_else(|| "unknown".to_string(), |c| c.to_string())
        );
        self.session.last_run = Some(AnalyzedRun {
            id: run.id,
            created_at: run.created_at,
        });
        self.ledger.set_session(Some(self.session.clone()))?;

        let document = match self.load_document()? {
            Ok(document) => document,
            Err((current, error)) => return self.reset(current.as_ref(), error, run.id),
        };
        self.verify_steps(&run, &document)?;

        if run.succeeded() {
            self.ledger.reconcile(&[], run.created_at)?;
            self.ledger.set_untried(Vec::new())?;
            info!("run {} succeeded", run.id);
            let mut report = RunReport::new(SessionStatus::Success, &self.session);
            report.run_id = Some(run.id);
            self.end_session()?;
            return Ok(report);
        }

        self.remediate(&run, &document)
    }

    fn remediate(&mut self, run: &RunInfo, document: &PipelineDocument) -> RemedyResult<RunReport> {
        let log = self.fetch("logs", |_| self.ci.logs(run.id))?;
        let annotations = self.fetch("annotations", |_| self.ci.annotations(run.id))?;
        let analysis = self.analyzer.analyze(&log, &annotations, &self.catalog);

        let mut failures: Vec<ErrorEvent> = analysis.failures().cloned().collect();
        if failures.is_empty() {
            let conclusion = run
                .conclusion
                .map_or_else(|| "unknown".to_string(), |c| c.to_string());
            warn!("run {} concluded {} without a recognizable error", run.id, conclusion);
            failures.push(
                ErrorEvent::new(
                    format!("run concluded {conclusion} without a recognizable error"),
                    EventKind::ExitCode,
                    EventSource::Synthetic,
                )
                .with_umbrella(true),
            );
        }
        let mut seen = HashSet::new();
        failures.retain(|e| seen.insert(e.signature()));
        let signatures: Vec<ErrorSignature> = failures.iter().map(ErrorEvent::signature).collect();
        self.ledger.reconcile(&signatures, run.created_at)?;

        let mut report = RunReport::new(SessionStatus::Pending, &self.session);
        report.run_id = Some(run.id);
        report.failures.clone_from(&signatures);

        // A failed publish abandons its signature and moves on; only a
        // successful publish ends selection for this iteration.
        let mut published = false;
        let mut untried = Vec::new();
        for event in &failures {
            let signature = event.signature();
            if self.session.abandoned.contains(&signature) {
                debug!("signature `{}` abandoned for this session", signature);
                continue;
            }
            if published {
                untried.push(signature);
                continue;
            }
            let Some((remedy, patched)) = self.select(event, &signature, document)? else {
                untried.push(signature);
                continue;
            };
            let applied = self.publish_remedy(signature, &remedy, patched)?;
            published = applied.published;
            report.applied = Some(applied);
        }
        self.ledger.set_untried(untried.clone())?;
        report.unresolved = untried;

        if !published {
            if self.ledger.pending().is_empty() {
                warn!("no eligible remedy for any of {} failure(s)", signatures.len());
                report.status = SessionStatus::Exhausted;
                report.unresolved = signatures;
                self.end_session()?;
            } else {
                debug!("nothing published; earlier publishes still pending");
            }
        }

        report.discovered = self.grow_catalog(&analysis.candidates);
        Ok(report)
    }

    /// First remedy for `event` the ledger allows and the engine accepts
    fn select(
        &mut self,
        event: &ErrorEvent,
        signature: &ErrorSignature,
        document: &PipelineDocument,
    ) -> RemedyResult<Option<(Remedy, PipelineDocument)>> {
        let candidates = local_candidates(event, document, &self.catalog, &self.structural);
        let had_local = !candidates.is_empty();
        for remedy in candidates {
            if let Some(patched) = self.try_remedy(signature, &remedy, document)? {
                return Ok(Some((remedy, patched)));
            }
        }
        if had_local || !self.config.suggestions.enabled {
            return Ok(None);
        }
        let Some(text) = self.ask_oracle(event, signature, document) else {
            return Ok(None);
        };
        match parse_suggestion(&text) {
            Ok(remedy) => Ok(self
                .try_remedy(signature, &remedy, document)?
                .map(|patched| (remedy, patched))),
            Err(e) => {
                let id = suggestion_id(&text);
                if self.ledger.is_eligible(signature, &id) {
                    info!("suggestion `{}` rejected: {}", id, e);
                    self.ledger
                        .record_attempt(signature, &id, Outcome::rejected(e.tag()))?;
                }
                Ok(None)
            }
        }
    }

    fn try_remedy(
        &mut self,
        signature: &ErrorSignature,
        remedy: &Remedy,
        document: &PipelineDocument,
    ) -> RemedyResult<Option<PipelineDocument>> {
        if !self.ledger.is_eligible(signature, &remedy.id) {
            debug!("`{}` not eligible for `{}`", remedy.id, signature);
            return Ok(None);
        }
        if let Some(step) = remedy.touched_steps().find(|s| self.ledger.is_protected(s)) {
            debug!("`{}` would touch protected step `{}`", remedy.id, step);
            return Ok(None);
        }
        match self.engine.apply(document, &remedy.request, &self.ledger) {
            Ok(patched) => Ok(Some(patched)),
            Err(e) => {
                info!("`{}` rejected for `{}`: {}", remedy.id, signature, e);
                self.ledger
                    .record_attempt(signature, &remedy.id, Outcome::rejected(e.tag()))?;
                Ok(None)
            }
        }
    }

    fn ask_oracle(
        &self,
        event: &ErrorEvent,
        signature: &ErrorSignature,
        document: &PipelineDocument,
    ) -> Option<String> {
        let oracle = self.oracle.as_ref()?;
        let document_text = document
            .to_yaml()
            .map_err(|e| warn!("cannot serialize document for oracle: {}", e))
            .ok()?;
        let attempted = self
            .ledger
            .signature(signature)
            .map(|h| h.attempted.iter().map(|a| a.remedy_id.clone()).collect())
            .unwrap_or_default();
        let bundle = ContextBundle {
            signature: signature.clone(),
            error_text: event.raw_text.clone(),
            context: event.context.clone(),
            associated_step: event.associated_step.clone(),
            document: document_text,
            attempted,
        }
        .truncated(self.config.suggestions.max_context_chars);
        match oracle.suggest(&bundle) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("suggestion oracle failed: {}", e);
                None
            }
        }
    }

    fn publish_remedy(
        &mut self,
        signature: ErrorSignature,
        remedy: &Remedy,
        patched: PipelineDocument,
    ) -> RemedyResult<AppliedRemedy> {
        let message = format!("autofix: apply {} for {}", remedy.id, signature);
        let published = match self.publish(&patched, &message) {
            Ok(()) => {
                self.ledger
                    .record_attempt(&signature, &remedy.id, Outcome::Published)?;
                self.last_good = Some(patched);
                true
            }
            Err((e, attempts)) => {
                warn!(
                    "publishing `{}` failed after {} attempt(s): {}; abandoning `{}`",
                    remedy.id, attempts, e, signature
                );
                self.ledger
                    .record_attempt(&signature, &remedy.id, Outcome::PublishFailed)?;
                self.session.abandoned.push(signature.clone());
                self.ledger.set_session(Some(self.session.clone()))?;
                false
            }
        };
        Ok(AppliedRemedy {
            signature,
            remedy_id: remedy.id.clone(),
            source: remedy.source,
            step: remedy.step_identity().to_string(),
            published,
        })
    }

    /// Publish the baseline document, at most once per session
    ///
    /// A document still malformed after that reset is terminal.
    fn reset(
        &mut self,
        current: Option<&PipelineDocument>,
        error: DocumentError,
        run_id: u64,
    ) -> RemedyResult<RunReport> {
        let awaiting_reset = self.ledger.is_pending(&reset_signature(), RESET_REMEDY);
        if self.session.reset || awaiting_reset {
            if awaiting_reset {
                self.ledger
                    .record_attempt(&reset_signature(), RESET_REMEDY, Outcome::Ineffective)?;
            }
            warn!("document still malformed after reset, giving up: {}", error);
            return Err(RemedyError::MalformedDocument(error));
        }
        let fallback = current.or(self.last_good.as_ref());
        let document = self
            .engine
            .reset(fallback, &self.ledger)
            .map_err(|e| match e {
                PatchError::Validation(d) => RemedyError::MalformedDocument(d),
                other => RemedyError::Rejected(other),
            })?;
        if let Err((e, attempts)) = self.publish(&document, "autofix: reset pipeline document") {
            return Err(RemedyError::PublishFailure {
                remedy_id: RESET_REMEDY.to_string(),
                attempts,
                reason: e.to_string(),
            });
        }
        // Recorded like a remedy so the next fetch waits for the run it triggers
        self.ledger
            .record_attempt(&reset_signature(), RESET_REMEDY, Outcome::Published)?;
        self.session.reset = true;
        self.ledger.set_session(Some(self.session.clone()))?;
        self.last_good = Some(document);
        let mut report = RunReport::new(SessionStatus::Pending, &self.session);
        report.run_id = Some(run_id);
        report.reset = true;
        Ok(report)
    }

    /// Throttled, retried publish
    fn publish(
        &self,
        document: &PipelineDocument,
        message: &str,
    ) -> Result<(), (CollaboratorError, u32)> {
        if let Some(last) = self.ledger.last_published_at() {
            let ready = last + chrono::Duration::seconds(self.cooldown_secs());
            let now = self.clock.now();
            if now < ready {
                let wait = (ready - now).to_std().unwrap_or_default();
                info!("publish cooldown: waiting {:?}", wait);
                self.clock.sleep(wait);
            }
        }
        let publisher = &self.publisher;
        self.config.publish_retry().run(
            self.clock.as_ref(),
            CollaboratorError::is_transient,
            |_| publisher.publish(document, message),
        )?;
        info!("published: {}", message);
        Ok(())
    }

    fn cooldown_secs(&self) -> i64 {
        i64::try_from(self.config.publish.cooldown_secs).unwrap_or(i64::MAX)
    }

    /// Current document, or why it is unusable together with the
    /// parseable-but-invalid document (if any) to reset from
    #[allow(clippy::type_complexity)]
    fn load_document(
        &mut self,
    ) -> RemedyResult<Result<PipelineDocument, (Option<PipelineDocument>, DocumentError)>> {
        let text = self.fetch("document", |_| self.publisher.current_document())?;
        let policy = self.engine.policy();
        let document = match PipelineDocument::parse(&text, policy) {
            Ok(document) => document,
            Err(e) => {
                warn!("current document does not parse: {}", e);
                return Ok(Err((None, e)));
            }
        };
        if let Err(e) = document.validate(policy) {
            warn!("current document is invalid: {}", e);
            return Ok(Err((Some(document), e)));
        }
        self.last_good = Some(document.clone());
        Ok(Ok(document))
    }

    fn verify_steps(&mut self, run: &RunInfo, document: &PipelineDocument) -> RemedyResult<()> {
        let results = match self.fetch("step results", |_| self.ci.step_results(run.id)) {
            Ok(results) => results,
            Err(e) => {
                warn!("step results unavailable: {}", e);
                return Ok(());
            }
        };
        for result in results.iter().filter(|r| document.contains(&r.name)) {
            match result.conclusion {
                StepConclusion::Success => {
                    self.ledger.mark_verified(&result.name)?;
                }
                other => self.ledger.set_step_status(&result.name, other)?,
            }
        }
        Ok(())
    }

    fn fetch_run(&mut self) -> RemedyResult<Option<RunInfo>> {
        let last_run = self.session.last_run;
        let last_publish = self.ledger.last_published_at();
        let awaiting = match (last_publish, last_run) {
            (Some(published), Some(run)) => published > run.created_at,
            (Some(_), None) => true,
            (None, _) => false,
        };
        let is_new = |run: &RunInfo| {
            last_run.map_or(true, |r| r.id != run.id)
                && last_publish.map_or(true, |p| !awaiting || run.created_at >= p)
        };
        let policy = if awaiting {
            self.config.new_run_poll()
        } else {
            self.config.run_poll()
        };

        let pipeline_id = self.config.pipeline_id.clone();
        let fetched = policy.run(self.clock.as_ref(), || {
            let latest = self.fetch("latest run", |_| self.ci.latest_run(&pipeline_id))?;
            Ok::<_, RemedyError>(match latest {
                Some(run) if is_new(&run) && run.is_completed() => Some(Fetched::Ready(run)),
                Some(run) if is_new(&run) => {
                    debug!("run {} still {:?}", run.id, run.status);
                    None
                }
                _ if awaiting => None,
                _ => Some(Fetched::NothingNew),
            })
        })?;
        Ok(match fetched {
            Some(Fetched::Ready(run)) => Some(run),
            Some(Fetched::NothingNew) => None,
            None => {
                info!("timed out waiting for a completed run");
                None
            }
        })
    }

    fn fetch<T>(
        &self,
        what: &str,
        op: impl FnMut(u32) -> Result<T, CollaboratorError>,
    ) -> RemedyResult<T> {
        self.config
            .fetch_retry()
            .run(self.clock.as_ref(), CollaboratorError::is_transient, op)
            .map_err(|(e, attempts)| {
                warn!("fetching {} failed after {} attempt(s): {}", what, attempts, e);
                RemedyError::TransientFetch(format!("{what}: {e}"))
            })
    }

    fn grow_catalog(&mut self, candidates: &[CandidatePattern]) -> usize {
        let mut added = 0;
        for candidate in candidates {
            let rule = match candidate.to_rule() {
                Ok(rule) => rule,
                Err(e) => {
                    debug!("candidate `{}` unusable: {}", candidate.example, e);
                    continue;
                }
            };
            match self.catalog.append(rule) {
                Ok(()) => added += 1,
                Err(CatalogError::DuplicateRule(_)) => {}
                Err(e) => debug!("candidate `{}` not appended: {}", candidate.example, e),
            }
        }
        if added > 0 {
            info!("catalog grew by {} discovered rule(s)", added);
        }
        added
    }

    fn end_session(&mut self) -> RemedyResult<()> {
        info!("session {} ended after {} iteration(s)", self.session.id, self.session.iteration);
        self.ledger.set_session(None)?;
        let last_run = self.session.last_run;
        self.session = SessionState::new(Ulid::new());
        self.session.last_run = last_run;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use autofix_ledger::ManualClock;
    use autofix_pipeline::DocumentPolicy;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::collab::{MockCiClient, MockPublisher, RunConclusion, RunStatus};

    const SDK_LOG: &str = "2024-05-01T10:00:01Z /home/runner/work/_temp/a1.sh: line 3: sdkmanager: command not found\n";

    fn run(id: u64, conclusion: RunConclusion, created_at: DateTime<Utc>) -> RunInfo {
        RunInfo {
            id,
            status: RunStatus::Completed,
            conclusion: Some(conclusion),
            commit_ref: format!("c{id}"),
            created_at,
        }
    }

    fn ci_with(latest: Option<RunInfo>, log: &'static str) -> MockCiClient {
        let mut ci = MockCiClient::new();
        ci.expect_latest_run().returning(move |_| Ok(latest.clone()));
        ci.expect_logs().returning(move |_| Ok(log.to_string()));
        ci.expect_annotations().returning(|_| Ok(Vec::new()));
        ci.expect_step_results().returning(|_| Ok(Vec::new()));
        ci
    }

    fn publisher_with(document: String, publishes: usize) -> MockPublisher {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_current_document()
            .returning(move || Ok(document.clone()));
        publisher.expect_publish().times(publishes).returning(|_, _| Ok(()));
        publisher
    }

    fn baseline_text() -> String {
        DocumentPolicy::default().baseline_yaml().to_string()
    }

    fn orchestrator(
        config: RemedyConfig,
        ci: MockCiClient,
        publisher: MockPublisher,
        clock: &Arc<ManualClock>,
    ) -> Orchestrator {
        let ledger = FixHistoryLedger::in_memory(clock.clone());
        Orchestrator::new(config, ci, publisher, ledger, clock.clone()).unwrap()
    }

    #[test]
    fn successful_run_ends_session() {
        let clock = Arc::new(ManualClock::default());
        let ci = ci_with(Some(run(1, RunConclusion::Success, clock.now())), "");
        let mut orch = orchestrator(RemedyConfig::default(), ci, publisher_with(baseline_text(), 0), &clock);
        let first = orch.session_id();

        let report = orch.run_once().unwrap();
        assert_eq!(report.status, SessionStatus::Success);
        assert_eq!(report.run_id, Some(1));
        assert_ne!(orch.session_id(), first);
        assert!(orch.ledger().session().is_none());
    }

    #[test]
    fn failure_publishes_one_remedy() {
        let clock = Arc::new(ManualClock::default());
        let ci = ci_with(Some(run(7, RunConclusion::Failure, clock.now())), SDK_LOG);
        let mut orch = orchestrator(RemedyConfig::default(), ci, publisher_with(baseline_text(), 1), &clock);

        let report = orch.run_once().unwrap();
        assert_eq!(report.status, SessionStatus::Pending);
        let applied = report.applied.unwrap();
        assert_eq!(applied.remedy_id, "sdkmanager-missing");
        assert_eq!(applied.step, "Install Android SDK Tools");
        assert_eq!(applied.source, RemedySource::Catalog);
        assert!(applied.published);
        assert!(orch.ledger().is_pending(&applied.signature, "sdkmanager-missing"));
        assert_eq!(orch.ledger().session().map(|s| s.iteration), Some(1));
    }

    #[test]
    fn analysed_run_is_not_analysed_again() {
        let clock = Arc::new(ManualClock::default());
        let mut ci = MockCiClient::new();
        let latest = run(3, RunConclusion::Failure, clock.now());
        ci.expect_latest_run().returning(move |_| Ok(Some(latest.clone())));
        ci.expect_logs().times(1).returning(|_| Ok("ERROR: No space left on device\n".to_string()));
        ci.expect_annotations().returning(|_| Ok(Vec::new()));
        ci.expect_step_results().returning(|_| Ok(Vec::new()));
        let mut publisher = MockPublisher::new();
        publisher.expect_current_document().returning(|| Ok(baseline_text()));
        publisher
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(CollaboratorError::Refused("push rejected".into())));
        let mut orch = orchestrator(RemedyConfig::default(), ci, publisher, &clock);

        let first = orch.run_once().unwrap();
        assert_eq!(first.status, SessionStatus::Exhausted);
        let second = orch.run_once().unwrap();
        assert_eq!(second.status, SessionStatus::Pending);
        assert_eq!(second.run_id, None);
    }

    #[test]
    fn publish_failure_is_recorded_and_abandoned() {
        let clock = Arc::new(ManualClock::default());
        let ci = ci_with(Some(run(2, RunConclusion::Failure, clock.now())), SDK_LOG);
        let mut publisher = MockPublisher::new();
        publisher.expect_current_document().returning(|| Ok(baseline_text()));
        publisher
            .expect_publish()
            .times(3)
            .returning(|_, _| Err(CollaboratorError::Unavailable("remote hung up".into())));
        let mut orch = orchestrator(RemedyConfig::default(), ci, publisher, &clock);

        let report = orch.run_once().unwrap();
        let applied = report.applied.unwrap();
        assert!(!applied.published);
        assert_eq!(report.status, SessionStatus::Exhausted);
        assert!(orch.ledger().has_failed_before(&applied.signature, "sdkmanager-missing"));
        let failures = orch
            .ledger()
            .history()
            .iter()
            .filter(|h| h.outcome == Outcome::PublishFailed)
            .count();
        assert_eq!(failures, 1);
    }

    #[test]
    fn iteration_cap_exhausts_session() {
        let clock = Arc::new(ManualClock::default());
        let ci = ci_with(None, "");
        let config = RemedyConfig::default().with_max_iterations(2);
        let mut orch = orchestrator(config, ci, publisher_with(baseline_text(), 0), &clock);

        assert_eq!(orch.run_once().unwrap().status, SessionStatus::Pending);
        assert_eq!(orch.run_once().unwrap().status, SessionStatus::Pending);
        let report = orch.run_once().unwrap();
        assert_eq!(report.status, SessionStatus::Exhausted);
        assert_eq!(report.iteration, 2);
    }

    #[test]
    fn run_until_settled_surfaces_exhaustion() {
        let clock = Arc::new(ManualClock::default());
        let ci = ci_with(None, "");
        let config = RemedyConfig::default().with_max_iterations(3);
        let mut orch = orchestrator(config, ci, publisher_with(baseline_text(), 0), &clock);

        let err = orch.run_until_settled().unwrap_err();
        assert!(matches!(err, RemedyError::Exhausted { iterations: 3, .. }));
        assert!(clock.slept() >= Duration::from_secs(60));
    }

    #[test]
    fn unreachable_platform_is_transient() {
        let clock = Arc::new(ManualClock::default());
        let mut ci = MockCiClient::new();
        ci.expect_latest_run()
            .times(3)
            .returning(|_| Err(CollaboratorError::Unavailable("502".into())));
        let mut orch = orchestrator(RemedyConfig::default(), ci, publisher_with(baseline_text(), 0), &clock);

        let err = orch.run_once().unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn unparseable_document_is_reset() {
        let clock = Arc::new(ManualClock::default());
        let ci = ci_with(Some(run(4, RunConclusion::StartupFailure, clock.now())), "");
        let mut publisher = MockPublisher::new();
        publisher
            .expect_current_document()
            .returning(|| Ok("jobs: [unclosed".to_string()));
        publisher
            .expect_publish()
            .times(1)
            .withf(|doc, _| doc.contains("Install Python dependencies"))
            .returning(|_, _| Ok(()));
        let mut orch = orchestrator(RemedyConfig::default(), ci, publisher, &clock);

        let report = orch.run_once().unwrap();
        assert!(report.reset);
        assert_eq!(report.status, SessionStatus::Pending);
        assert!(orch.ledger().is_pending(&reset_signature(), RESET_REMEDY));
    }

    #[test]
    fn malformed_document_after_reset_is_terminal() {
        let clock = Arc::new(ManualClock::default());
        let start = clock.now();
        let mut calls = 0;
        let mut ci = MockCiClient::new();
        ci.expect_latest_run().returning(move |_| {
            calls += 1;
            let (id, created_at) = if calls == 1 {
                (4, start)
            } else {
                (5, start + chrono::Duration::seconds(120))
            };
            Ok(Some(run(id, RunConclusion::StartupFailure, created_at)))
        });
        let mut publisher = MockPublisher::new();
        publisher
            .expect_current_document()
            .returning(|| Ok("jobs: [unclosed".to_string()));
        publisher.expect_publish().times(1).returning(|_, _| Ok(()));
        clock.advance(Duration::from_secs(60));
        let mut orch = orchestrator(RemedyConfig::default(), ci, publisher, &clock);

        assert!(orch.run_once().unwrap().reset);
        clock.advance(Duration::from_secs(60));
        let err = orch.run_once().unwrap_err();

        assert!(matches!(err, RemedyError::MalformedDocument(_)));
        assert!(err.is_terminal());
        assert!(!orch.ledger().is_pending(&reset_signature(), RESET_REMEDY));
        assert!(orch.ledger().has_failed_before(&reset_signature(), RESET_REMEDY));
    }

    #[test]
    fn protected_step_is_never_touched() {
        let clock = Arc::new(ManualClock::default());
        let ci = ci_with(Some(run(5, RunConclusion::Failure, clock.now())), SDK_LOG);
        let mut ledger = FixHistoryLedger::in_memory(clock.clone());
        ledger.mark_verified("Install Android SDK Tools").unwrap();
        let mut orch = Orchestrator::new(
            RemedyConfig::default(),
            ci,
            publisher_with(baseline_text(), 0),
            ledger,
            clock.clone(),
        )
        .unwrap();

        let report = orch.run_once().unwrap();
        assert_eq!(report.applied, None);
        assert_eq!(report.status, SessionStatus::Exhausted);
    }
}
