use std::sync::Arc;

use autofix_analyzer::ErrorSignature;
use autofix_ledger::{FixHistoryLedger, LedgerError, ManualClock, Outcome, SCHEMA_VERSION};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn sig(text: &str) -> ErrorSignature {
    ErrorSignature::from_text(text)
}

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("fix_history.json");
    let clock = Arc::new(ManualClock::default());

    {
        let mut ledger = FixHistoryLedger::open_with_clock(&path, clock.clone()).unwrap();
        let s = sig("sdkmanager: command not found");
        ledger
            .record_attempt(&s, "sdkmanager-missing", Outcome::Published)
            .unwrap();
        ledger.mark_verified("Set up JDK 17").unwrap();
        ledger.set_untried(vec![sig("npm ERR! code E404")]).unwrap();
    }

    let ledger = FixHistoryLedger::open_with_clock(&path, clock).unwrap();
    assert!(ledger.is_protected("Set up JDK 17"));
    assert!(ledger.is_pending(&sig("sdkmanager: command not found"), "sdkmanager-missing"));
    assert_eq!(ledger.untried(), &[sig("npm ERR! code E404")]);
    assert_eq!(ledger.history().len(), 1);
}

#[test]
fn snapshot_has_documented_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fix_history.json");
    let mut ledger = FixHistoryLedger::open(&path).unwrap();
    ledger
        .record_attempt(&sig("No space left on device"), "disk-full", Outcome::PublishFailed)
        .unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    for key in ["version", "history", "signatures", "protected_steps", "step_status", "untried_errors"] {
        assert!(json.get(key).is_some(), "missing `{key}`");
    }
    let entry = &json["history"][0];
    assert_eq!(entry["error"], "No space left on device");
    assert_eq!(entry["remedy"], "disk-full");
    assert_eq!(entry["outcome"]["status"], "publish_failed");
    assert!(entry["timestamp"].is_string());
}

#[test]
fn no_temporary_files_are_left_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fix_history.json");
    let mut ledger = FixHistoryLedger::open(&path).unwrap();
    for i in 0..5 {
        ledger.mark_verified(&format!("Step {i}")).unwrap();
    }
    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn newer_schema_is_rejected_and_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fix_history.json");
    let text = format!(r#"{{"version": {}, "history": []}}"#, SCHEMA_VERSION + 1);
    std::fs::write(&path, &text).unwrap();

    let err = FixHistoryLedger::open(&path).unwrap_err();
    assert!(matches!(err, LedgerError::UnsupportedVersion { .. }));
    assert!(err.is_corrupt());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
}

#[test]
fn garbage_snapshot_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fix_history.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        FixHistoryLedger::open(&path),
        Err(LedgerError::Json(_))
    ));
}

#[test]
fn empty_file_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fix_history.json");
    std::fs::write(&path, "").unwrap();
    let ledger = FixHistoryLedger::open(&path).unwrap();
    assert!(ledger.history().is_empty());
}

proptest! {
    #[test]
    fn prop_publish_failure_is_recorded_once_and_final(
        remedies in prop::collection::vec("[a-z]{3,8}", 1..6),
    ) {
        let clock = Arc::new(ManualClock::default());
        let mut ledger = FixHistoryLedger::in_memory(clock);
        let s = sig("pip._vendor.urllib3.exceptions.ReadTimeoutError: read timed out");

        for remedy in &remedies {
            if ledger.is_eligible(&s, remedy) {
                ledger.record_attempt(&s, remedy, Outcome::PublishFailed).unwrap();
            }
        }
        for remedy in &remedies {
            prop_assert!(!ledger.is_eligible(&s, remedy));
            let failures = ledger
                .history()
                .iter()
                .filter(|h| &h.remedy == remedy)
                .count();
            prop_assert_eq!(failures, 1);
        }
    }
}
