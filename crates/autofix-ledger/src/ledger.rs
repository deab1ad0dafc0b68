//! Fix history ledger
//!
//! The ledger is loaded once, mutated in place and flushed as a full
//! snapshot after every mutation. The snapshot goes to a temporary file in
//! the same directory, is synced, and is then renamed over the previous
//! one, so a crash leaves either the old or the new snapshot on disk.

use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use autofix_analyzer::ErrorSignature;
use autofix_pipeline::StepGuard;
use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{LedgerError, LedgerResult};
use crate::record::{
    Attempt, HistoryEntry, LedgerRecord, Outcome, SessionState, SignatureHistory, StepConclusion,
    StepStatus, SCHEMA_VERSION,
};

/// A published remedy not yet confirmed or refuted by a later run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRemedy {
    pub signature: ErrorSignature,
    pub remedy_id: String,
    pub published_at: DateTime<Utc>,
}

/// Durable record of attempted remedies and verified steps
pub struct FixHistoryLedger {
    path: Option<PathBuf>,
    record: LedgerRecord,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for FixHistoryLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixHistoryLedger")
            .field("path", &self.path)
            .field("signatures", &self.record.signatures.len())
            .field("protected_steps", &self.record.protected_steps.len())
            .finish_non_exhaustive()
    }
}

impl FixHistoryLedger {
    /// Load the ledger at `path`, or start an empty one if it does not exist
    ///
    /// # Errors
    /// Returns error if the file cannot be read, is not ledger JSON, or was
    /// written by a newer schema version
    pub fn open(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// [`open`](Self::open) with an explicit clock
    ///
    /// # Errors
    /// See [`open`](Self::open)
    pub fn open_with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        let path = path.into();
        let record = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => LedgerRecord::default(),
            Ok(text) => {
                let record: LedgerRecord = serde_json::from_str(&text)?;
                if record.version > SCHEMA_VERSION {
                    return Err(LedgerError::UnsupportedVersion {
                        found: record.version,
                        supported: SCHEMA_VERSION,
                    });
                }
                record
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no ledger at {}, starting empty", path.display());
                LedgerRecord::default()
            }
            Err(e) => return Err(LedgerError::io(path, e)),
        };
        info!(
            "loaded ledger {}: {} signatures, {} protected steps",
            path.display(),
            record.signatures.len(),
            record.protected_steps.len()
        );
        Ok(Self {
            path: Some(path),
            record,
            clock,
        })
    }

    /// Ledger that is never written to disk
    #[must_use]
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            path: None,
            record: LedgerRecord::default(),
            clock,
        }
    }

    /// Backing file, if any
    #[inline]
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current snapshot
    #[inline]
    #[must_use]
    pub fn record(&self) -> &LedgerRecord {
        &self.record
    }

    /// Audit trail, oldest first
    #[inline]
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.record.history
    }

    /// Attempts made against `signature`
    #[must_use]
    pub fn signature(&self, signature: &ErrorSignature) -> Option<&SignatureHistory> {
        self.record.signatures.get(signature)
    }

    /// Record the outcome of one attempt
    ///
    /// # Errors
    /// Returns error if the snapshot cannot be flushed
    pub fn record_attempt(
        &mut self,
        signature: &ErrorSignature,
        remedy_id: &str,
        outcome: Outcome,
    ) -> LedgerResult<()> {
        self.push_attempt(signature, remedy_id, outcome, self.clock.now());
        self.flush()
    }

    fn push_attempt(
        &mut self,
        signature: &ErrorSignature,
        remedy_id: &str,
        outcome: Outcome,
        timestamp: DateTime<Utc>,
    ) {
        info!("ledger: `{}` -> {} for `{}`", remedy_id, outcome, signature);
        let entry = self.record.signatures.entry(signature.clone()).or_default();
        if outcome == Outcome::Resolved {
            entry.successful_remedy = Some(remedy_id.to_string());
        }
        entry.attempted.push(Attempt {
            remedy_id: remedy_id.to_string(),
            timestamp,
            outcome: outcome.clone(),
        });
        self.record.history.push(HistoryEntry {
            error: signature.clone(),
            remedy: remedy_id.to_string(),
            outcome,
            timestamp,
        });
    }

    /// Whether `remedy_id` ever failed for `signature`
    #[must_use]
    pub fn has_failed_before(&self, signature: &ErrorSignature, remedy_id: &str) -> bool {
        self.signature(signature)
            .is_some_and(|h| h.has_failed(remedy_id))
    }

    /// Whether `remedy_id` was published for `signature` and awaits a run
    #[must_use]
    pub fn is_pending(&self, signature: &ErrorSignature, remedy_id: &str) -> bool {
        self.signature(signature)
            .and_then(|h| h.last_attempt(remedy_id))
            .is_some_and(|a| a.outcome.is_pending())
    }

    /// Whether `remedy_id` may be attempted for `signature`
    #[must_use]
    pub fn is_eligible(&self, signature: &ErrorSignature, remedy_id: &str) -> bool {
        !self.has_failed_before(signature, remedy_id) && !self.is_pending(signature, remedy_id)
    }

    /// Published remedies awaiting reconciliation, oldest first
    #[must_use]
    pub fn pending(&self) -> Vec<PendingRemedy> {
        let mut out: Vec<_> = self
            .record
            .signatures
            .iter()
            .flat_map(|(signature, history)| {
                let mut latest: Vec<&Attempt> = Vec::new();
                for attempt in history.attempted.iter().rev() {
                    if !latest.iter().any(|a| a.remedy_id == attempt.remedy_id) {
                        latest.push(attempt);
                    }
                }
                latest
                    .into_iter()
                    .filter(|a| a.outcome.is_pending())
                    .map(|a| PendingRemedy {
                        signature: signature.clone(),
                        remedy_id: a.remedy_id.clone(),
                        published_at: a.timestamp,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort_by_key(|p| p.published_at);
        out
    }

    /// Settle pending remedies against a run created at `run_created_at`
    ///
    /// A pending remedy published before the run is `Resolved` if its
    /// signature is absent from `observed`, `Ineffective` otherwise. Remedies
    /// published after the run stay pending.
    ///
    /// # Errors
    /// Returns error if the snapshot cannot be flushed
    pub fn reconcile(
        &mut self,
        observed: &[ErrorSignature],
        run_created_at: DateTime<Utc>,
    ) -> LedgerResult<usize> {
        let settled: Vec<_> = self
            .pending()
            .into_iter()
            .filter(|p| p.published_at <= run_created_at)
            .collect();
        if settled.is_empty() {
            return Ok(0);
        }
        let now = self.clock.now();
        for pending in &settled {
            let outcome = if observed.contains(&pending.signature) {
                Outcome::Ineffective
            } else {
                Outcome::Resolved
            };
            self.push_attempt(&pending.signature, &pending.remedy_id, outcome, now);
        }
        self.flush()?;
        Ok(settled.len())
    }

    /// Whether `identity` was verified in a real run
    #[inline]
    #[must_use]
    pub fn is_protected(&self, identity: &str) -> bool {
        self.record.protected_steps.contains_key(identity)
    }

    /// Protected step identities with their verification time
    pub fn protected_steps(&self) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        self.record
            .protected_steps
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
    }

    /// Mark `identity` as verified; returns whether it was newly protected
    ///
    /// # Errors
    /// Returns error if the snapshot cannot be flushed
    pub fn mark_verified(&mut self, identity: &str) -> LedgerResult<bool> {
        if self.is_protected(identity) {
            return Ok(false);
        }
        let now = self.clock.now();
        self.record
            .protected_steps
            .insert(identity.to_string(), now);
        self.record.step_status.insert(
            identity.to_string(),
            StepStatus {
                conclusion: StepConclusion::Success,
                observed_at: now,
            },
        );
        info!("step `{}` verified and protected", identity);
        self.flush()?;
        Ok(true)
    }

    /// Last observed conclusion of `identity`
    #[must_use]
    pub fn step_status(&self, identity: &str) -> Option<&StepStatus> {
        self.record.step_status.get(identity)
    }

    /// Record the conclusion of a step
    ///
    /// # Errors
    /// Returns error if the snapshot cannot be flushed
    pub fn set_step_status(
        &mut self,
        identity: &str,
        conclusion: StepConclusion,
    ) -> LedgerResult<()> {
        if self
            .step_status(identity)
            .is_some_and(|s| s.conclusion == conclusion)
        {
            return Ok(());
        }
        if conclusion == StepConclusion::Failure && self.is_protected(identity) {
            warn!("protected step `{}` failed in a later run", identity);
        }
        self.record.step_status.insert(
            identity.to_string(),
            StepStatus {
                conclusion,
                observed_at: self.clock.now(),
            },
        );
        self.flush()
    }

    /// Signatures seen in the latest pass without an eligible remedy tried
    #[inline]
    #[must_use]
    pub fn untried(&self) -> &[ErrorSignature] {
        &self.record.untried_errors
    }

    /// Replace the untried list
    ///
    /// # Errors
    /// Returns error if the snapshot cannot be flushed
    pub fn set_untried(&mut self, signatures: Vec<ErrorSignature>) -> LedgerResult<()> {
        if self.record.untried_errors == signatures {
            return Ok(());
        }
        self.record.untried_errors = signatures;
        self.flush()
    }

    /// Time of the most recent successful publish
    #[must_use]
    pub fn last_published_at(&self) -> Option<DateTime<Utc>> {
        self.record
            .history
            .iter()
            .rev()
            .find(|h| h.outcome == Outcome::Published)
            .map(|h| h.timestamp)
    }

    /// Session in flight, if any
    #[inline]
    #[must_use]
    pub fn session(&self) -> Option<&SessionState> {
        self.record.session.as_ref()
    }

    /// Replace or clear the session state
    ///
    /// # Errors
    /// Returns error if the snapshot cannot be flushed
    pub fn set_session(&mut self, session: Option<SessionState>) -> LedgerResult<()> {
        if self.record.session == session {
            return Ok(());
        }
        self.record.session = session;
        self.flush()
    }

    /// Write the full snapshot atomically
    ///
    /// # Errors
    /// Returns error if serialization or any file operation fails
    pub fn flush(&self) -> LedgerResult<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| LedgerError::io(dir, e))?;

        let json = serde_json::to_vec_pretty(&self.record)?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| LedgerError::io(dir, e))?;
        tmp.write_all(&json).map_err(|e| LedgerError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| LedgerError::io(tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| LedgerError::io(path, e.error))?;
        debug!("flushed ledger to {} ({} bytes)", path.display(), json.len());
        Ok(())
    }
}

impl StepGuard for FixHistoryLedger {
    fn is_protected(&self, identity: &str) -> bool {
        FixHistoryLedger::is_protected(self, identity)
    }
}
