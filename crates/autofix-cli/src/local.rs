//! File-backed collaborators for driving the orchestrator locally
//!
//! Runs are read from a directory with one subdirectory per run id:
//!
//! ```text
//! runs/
//!   41/run.json            RunInfo
//!   41/log.txt             raw log
//!   41/annotations.json    optional
//!   41/steps.json          optional
//! ```
//!
//! Publishing rewrites the workflow file in place.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use autofix_analyzer::Annotation;
use autofix_core::{CiClient, CollaboratorError, Publisher, RunInfo, StepResult};
use autofix_pipeline::PipelineDocument;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Reads runs from a local directory
#[derive(Debug, Clone)]
pub(crate) struct DirectoryCiClient {
    root: PathBuf,
}

impl DirectoryCiClient {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn run_dir(&self, run_id: u64) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CollaboratorError> {
        match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| CollaboratorError::Refused(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CollaboratorError::Unavailable(format!("{}: {e}", path.display()))),
        }
    }
}

impl CiClient for DirectoryCiClient {
    fn latest_run(&self, pipeline_id: &str) -> Result<Option<RunInfo>, CollaboratorError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CollaboratorError::Unavailable(format!(
                    "{}: {e}",
                    self.root.display()
                )))
            }
        };
        let latest = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u64>().ok())
            .max();
        let Some(id) = latest else {
            return Ok(None);
        };
        debug!("latest local run of {} is {}", pipeline_id, id);
        Self::read_json(&self.run_dir(id).join("run.json"))
    }

    fn logs(&self, run_id: u64) -> Result<String, CollaboratorError> {
        let path = self.run_dir(run_id).join("log.txt");
        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => CollaboratorError::NotReady(path.display().to_string()),
            _ => CollaboratorError::Unavailable(format!("{}: {e}", path.display())),
        })
    }

    fn annotations(&self, run_id: u64) -> Result<Vec<Annotation>, CollaboratorError> {
        Ok(Self::read_json(&self.run_dir(run_id).join("annotations.json"))?.unwrap_or_default())
    }

    fn step_results(&self, run_id: u64) -> Result<Vec<StepResult>, CollaboratorError> {
        Ok(Self::read_json(&self.run_dir(run_id).join("steps.json"))?.unwrap_or_default())
    }
}

/// Publishes by rewriting the workflow file
#[derive(Debug, Clone)]
pub(crate) struct FilePublisher {
    path: PathBuf,
    backup_dir: Option<PathBuf>,
}

impl FilePublisher {
    pub(crate) fn new(path: impl Into<PathBuf>, backup_dir: Option<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backup_dir,
        }
    }

    fn backup(&self, dir: &Path) -> std::io::Result<Option<PathBuf>> {
        let current = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        std::fs::create_dir_all(dir)?;
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("workflow");
        let target = dir.join(format!("{stem}.{}.yml", Utc::now().format("%Y%m%dT%H%M%S%.3f")));
        std::fs::write(&target, current)?;
        Ok(Some(target))
    }

    fn write(&self, text: &str) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl Publisher for FilePublisher {
    fn current_document(&self) -> Result<String, CollaboratorError> {
        std::fs::read_to_string(&self.path)
            .map_err(|e| CollaboratorError::Unavailable(format!("{}: {e}", self.path.display())))
    }

    fn publish(&self, document: &PipelineDocument, message: &str) -> Result<(), CollaboratorError> {
        let text = document
            .to_yaml()
            .map_err(|e| CollaboratorError::Refused(e.to_string()))?;
        if let Some(dir) = &self.backup_dir {
            let backup = self
                .backup(dir)
                .map_err(|e| CollaboratorError::Unavailable(format!("backup: {e}")))?;
            if let Some(backup) = backup {
                debug!("backed up {} to {}", self.path.display(), backup.display());
            }
        }
        self.write(&text)
            .map_err(|e| CollaboratorError::Unavailable(format!("{}: {e}", self.path.display())))?;
        info!("{} ({})", message, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use autofix_core::{RunConclusion, RunStatus};
    use autofix_pipeline::DocumentPolicy;
    use pretty_assertions::assert_eq;

    use super::*;

    fn write_run(root: &Path, id: u64, log: &str) {
        let dir = root.join(id.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        let run = RunInfo {
            id,
            status: RunStatus::Completed,
            conclusion: Some(RunConclusion::Failure),
            commit_ref: "abc123".into(),
            created_at: Utc::now(),
        };
        std::fs::write(dir.join("run.json"), serde_json::to_string(&run).unwrap()).unwrap();
        std::fs::write(dir.join("log.txt"), log).unwrap();
    }

    #[test]
    fn newest_run_directory_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_run(dir.path(), 9, "a");
        write_run(dir.path(), 10, "b");
        std::fs::create_dir_all(dir.path().join("notes")).unwrap();

        let ci = DirectoryCiClient::new(dir.path());
        let run = ci.latest_run("debug.yml").unwrap().unwrap();
        assert_eq!(run.id, 10);
        assert_eq!(ci.logs(10).unwrap(), "b");
        assert!(ci.annotations(10).unwrap().is_empty());
        assert!(matches!(ci.logs(11), Err(CollaboratorError::NotReady(_))));
    }

    #[test]
    fn missing_runs_directory_has_no_runs() {
        let ci = DirectoryCiClient::new("/nonexistent/autofix/runs");
        assert_eq!(ci.latest_run("debug.yml").unwrap(), None);
    }

    #[test]
    fn publish_rewrites_and_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = dir.path().join("debug.yml");
        std::fs::write(&workflow, "old: true\n").unwrap();
        let backups = dir.path().join("backups");

        let publisher = FilePublisher::new(&workflow, Some(backups.clone()));
        let document = DocumentPolicy::default().baseline().unwrap();
        publisher.publish(&document, "test publish").unwrap();

        let written = publisher.current_document().unwrap();
        assert!(written.contains("Install Python dependencies"));
        let saved: Vec<_> = std::fs::read_dir(&backups).unwrap().collect();
        assert_eq!(saved.len(), 1);
    }
}
