//! Pipeline document model
//!
//! [`PipelineDocument`] is the structural view of the workflow file: top-level
//! metadata, the trigger mapping, the managed job (runner plus ordered steps)
//! and any other jobs, which are carried through untouched.
//!
//! Parsing is forgiving about the damage earlier automated edits tend to
//! leave behind (a trigger key read back as boolean `true`, steps wrapped in
//! stray lists, entries with no identity) and coerces it into a well-formed
//! document. Serialization is deterministic, so two equal documents always
//! render to identical bytes.

use std::collections::HashSet;

use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::error::{DocumentError, DocumentResult};
use crate::guard::StepGuard;
use crate::hash::Fingerprint;
use crate::policy::DocumentPolicy;
use crate::step::{kind_of, Step};

const TRIGGER_KEY: &str = "on";
const JOBS_KEY: &str = "jobs";
const NAME_KEY: &str = "name";
const RUNNER_KEY: &str = "runs-on";
const STEPS_KEY: &str = "steps";

/// Maximum nesting of stray lists unwrapped inside a step list
pub const MAX_NESTING: usize = 8;

/// Structural representation of the pipeline definition
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDocument {
    metadata: Mapping,
    trigger: Mapping,
    job_id: String,
    runner: String,
    job_extra: Mapping,
    other_jobs: Mapping,
    steps: Vec<Step>,
}

impl PipelineDocument {
    /// Empty document for the policy's job
    #[must_use]
    pub fn new(policy: &DocumentPolicy) -> Self {
        Self {
            metadata: Mapping::new(),
            trigger: default_trigger(policy),
            job_id: policy.job_id.clone(),
            runner: policy.default_runner.clone(),
            job_extra: Mapping::new(),
            other_jobs: Mapping::new(),
            steps: Vec::new(),
        }
    }

    /// Set the pipeline name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata
            .insert(Value::from(NAME_KEY), Value::from(name.into()));
        self
    }

    /// Replace the step list
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    /// Set the runner without coercion
    #[must_use]
    pub fn with_runner(mut self, runner: impl Into<String>) -> Self {
        self.runner = runner.into();
        self
    }

    /// Parse a workflow file
    ///
    /// # Errors
    /// Returns error if the text is not YAML, is not a mapping, or lacks the
    /// managed job
    pub fn parse(text: &str, policy: &DocumentPolicy) -> DocumentResult<Self> {
        let text = text.trim_start_matches('\u{feff}');
        let root: Value = serde_yaml::from_str(text)?;
        let Value::Mapping(root) = root else {
            return Err(DocumentError::malformed(format!(
                "top level must be a mapping, found {}",
                kind_of(&root)
            )));
        };

        let mut metadata = Mapping::new();
        let mut trigger = None;
        let mut jobs = None;
        for (key, value) in root {
            if is_trigger_key(&key) {
                if trigger.is_some() {
                    warn!("dropping duplicate trigger key {:?}", key);
                } else {
                    trigger = Some(value);
                }
            } else if key.as_str() == Some(JOBS_KEY) {
                jobs = Some(value);
            } else {
                metadata.insert(key, value);
            }
        }

        let Some(Value::Mapping(jobs)) = jobs else {
            return Err(DocumentError::malformed("`jobs` must be a mapping"));
        };

        let mut job = None;
        let mut other_jobs = Mapping::new();
        for (key, value) in jobs {
            if job.is_none() && key.as_str() == Some(policy.job_id.as_str()) {
                job = Some(value);
            } else {
                other_jobs.insert(key, value);
            }
        }
        let Some(job) = job else {
            return Err(DocumentError::MissingJob(policy.job_id.clone()));
        };
        let Value::Mapping(job) = job else {
            return Err(DocumentError::malformed(format!(
                "job `{}` must be a mapping",
                policy.job_id
            )));
        };

        let mut runner = None;
        let mut raw_steps = None;
        let mut job_extra = Mapping::new();
        for (key, value) in job {
            match key.as_str() {
                Some(RUNNER_KEY) => runner = Some(value),
                Some(STEPS_KEY) => raw_steps = Some(value),
                _ => {
                    job_extra.insert(key, value);
                }
            }
        }

        let steps = match raw_steps {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(items)) => {
                let mut steps = Vec::new();
                collect_steps(&items, 0, &mut steps);
                dedupe(steps)
            }
            Some(other) => {
                return Err(DocumentError::malformed(format!(
                    "steps must be a sequence, found {}",
                    kind_of(&other)
                )))
            }
        };

        Ok(Self {
            metadata,
            trigger: coerce_trigger(trigger, policy),
            job_id: policy.job_id.clone(),
            runner: coerce_runner(runner.as_ref(), policy),
            job_extra,
            other_jobs,
            steps,
        })
    }

    /// Pipeline name, if any
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.metadata.get(NAME_KEY).and_then(Value::as_str)
    }

    /// Top-level keys other than the trigger and jobs
    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &Mapping {
        &self.metadata
    }

    /// Trigger mapping (event name to event filter)
    #[inline]
    #[must_use]
    pub fn trigger(&self) -> &Mapping {
        &self.trigger
    }

    /// Managed job id
    #[inline]
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Runner label of the managed job
    #[inline]
    #[must_use]
    pub fn runner(&self) -> &str {
        &self.runner
    }

    /// Ordered steps of the managed job
    #[inline]
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Step identities in order
    #[must_use]
    pub fn identities(&self) -> Vec<&str> {
        self.steps.iter().map(Step::identity).collect()
    }

    /// Whether a step with this identity exists
    #[inline]
    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.position(identity).is_some()
    }

    /// Index of the step with this identity
    #[must_use]
    pub fn position(&self, identity: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.identity() == identity)
    }

    /// Step with this identity
    #[must_use]
    pub fn step(&self, identity: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.identity() == identity)
    }

    pub(crate) fn push_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub(crate) fn replace_step(&mut self, index: usize, step: Step) {
        self.steps[index] = step;
    }

    /// Bring the document into canonical shape
    ///
    /// Collapses duplicate identities, drops transient steps that are not
    /// protected, coerces the runner and trigger, and stably re-sorts the
    /// steps by phase. Protected steps are only ever moved.
    pub fn normalize(&mut self, policy: &DocumentPolicy, guard: &dyn StepGuard) {
        let steps = dedupe(std::mem::take(&mut self.steps));
        self.steps = steps
            .into_iter()
            .filter(|step| {
                let id = step.identity();
                let keep = !policy.is_transient(id) || guard.is_protected(id);
                if !keep {
                    debug!("dropping transient step `{}`", id);
                }
                keep
            })
            .collect();
        self.steps.sort_by_key(Step::phase);

        if !policy.is_valid_runner(&self.runner) {
            warn!(
                "runner `{}` is not valid, using `{}`",
                self.runner, policy.default_runner
            );
            self.runner = policy.default_runner.clone();
        }
        ensure_push(&mut self.trigger, policy);
    }

    /// Check the document is fit to publish
    ///
    /// # Errors
    /// Returns the first structural violation found
    pub fn validate(&self, policy: &DocumentPolicy) -> DocumentResult<()> {
        if self.steps.is_empty() {
            return Err(DocumentError::NoSteps);
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.identity()) {
                return Err(DocumentError::DuplicateIdentity(step.identity().to_string()));
            }
            if !step.has_action() {
                return Err(DocumentError::StepWithoutAction(step.identity().to_string()));
            }
        }

        let missing: Vec<String> = policy
            .golden_steps
            .iter()
            .filter(|g| !seen.contains(g.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DocumentError::GoldenStepsMissing(missing))
        }
    }

    /// Render as a YAML value
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut root = Mapping::new();
        if let Some(name) = self.metadata.get(NAME_KEY) {
            root.insert(Value::from(NAME_KEY), name.clone());
        }
        root.insert(Value::from(TRIGGER_KEY), Value::Mapping(self.trigger.clone()));
        for (key, value) in &self.metadata {
            if key.as_str() != Some(NAME_KEY) {
                root.insert(key.clone(), value.clone());
            }
        }

        let mut job = Mapping::new();
        job.insert(Value::from(RUNNER_KEY), Value::from(self.runner.as_str()));
        for (key, value) in &self.job_extra {
            job.insert(key.clone(), value.clone());
        }
        job.insert(
            Value::from(STEPS_KEY),
            Value::Sequence(self.steps.iter().map(Step::to_value).collect()),
        );

        let mut jobs = Mapping::new();
        jobs.insert(Value::from(self.job_id.as_str()), Value::Mapping(job));
        for (key, value) in &self.other_jobs {
            jobs.insert(key.clone(), value.clone());
        }
        root.insert(Value::from(JOBS_KEY), Value::Mapping(jobs));

        Value::Mapping(root)
    }

    /// Render as YAML text
    ///
    /// # Errors
    /// Returns error if YAML emission fails
    pub fn to_yaml(&self) -> DocumentResult<String> {
        Ok(serde_yaml::to_string(&self.to_value())?)
    }

    /// Fingerprint of the rendered YAML
    ///
    /// # Errors
    /// Returns error if YAML emission fails
    pub fn fingerprint(&self) -> DocumentResult<Fingerprint> {
        Ok(Fingerprint::compute(self.to_yaml()?.as_bytes()))
    }
}

fn is_trigger_key(key: &Value) -> bool {
    match key {
        Value::Bool(true) => true,
        Value::String(s) => matches!(s.as_str(), "on" | "true" | "True"),
        _ => false,
    }
}

fn default_push(policy: &DocumentPolicy) -> Value {
    let mut push = Mapping::new();
    push.insert(
        Value::from("branches"),
        Value::Sequence(vec![Value::from(policy.default_branch.as_str())]),
    );
    Value::Mapping(push)
}

fn default_trigger(policy: &DocumentPolicy) -> Mapping {
    let mut trigger = Mapping::new();
    trigger.insert(Value::from("push"), default_push(policy));
    trigger
}

fn ensure_push(trigger: &mut Mapping, policy: &DocumentPolicy) {
    if !trigger.contains_key("push") {
        trigger.insert(Value::from("push"), default_push(policy));
    }
}

fn coerce_trigger(value: Option<Value>, policy: &DocumentPolicy) -> Mapping {
    let mut trigger = match value {
        Some(Value::String(event)) => {
            let mut m = Mapping::new();
            m.insert(Value::from(event), Value::Mapping(Mapping::new()));
            m
        }
        Some(Value::Sequence(events)) => {
            let mut m = Mapping::new();
            for event in events {
                if event.is_string() {
                    m.insert(event, Value::Mapping(Mapping::new()));
                } else {
                    warn!("dropping non-string trigger event of kind {}", kind_of(&event));
                }
            }
            m
        }
        Some(Value::Mapping(events)) => events
            .into_iter()
            .map(|(event, filter)| match filter {
                Value::Null => (event, Value::Mapping(Mapping::new())),
                other => (event, other),
            })
            .collect(),
        Some(other) => {
            debug!("coercing {} trigger to a mapping", kind_of(&other));
            Mapping::new()
        }
        None => Mapping::new(),
    };
    ensure_push(&mut trigger, policy);
    trigger
}

fn coerce_runner(value: Option<&Value>, policy: &DocumentPolicy) -> String {
    match value.and_then(Value::as_str) {
        Some(runner) if policy.is_valid_runner(runner) => runner.trim().to_string(),
        other => {
            warn!(
                "runner {:?} missing or invalid, using `{}`",
                other, policy.default_runner
            );
            policy.default_runner.clone()
        }
    }
}

fn collect_steps(items: &[Value], depth: usize, out: &mut Vec<Step>) {
    for item in items {
        match item {
            Value::Sequence(nested) if depth < MAX_NESTING => {
                debug!("flattening nested step list at depth {}", depth + 1);
                collect_steps(nested, depth + 1, out);
            }
            Value::Sequence(_) => warn!("dropping step list nested deeper than {}", MAX_NESTING),
            other => match Step::from_value(other) {
                Ok(step) => out.push(step),
                Err(err) => warn!("dropping unusable step entry: {}", err),
            },
        }
    }
}

fn dedupe(steps: Vec<Step>) -> Vec<Step> {
    let mut seen = HashSet::new();
    steps
        .into_iter()
        .filter(|step| {
            let fresh = seen.insert(step.identity().to_string());
            if !fresh {
                warn!("dropping duplicate step `{}`", step.identity());
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;

    use super::*;

    fn permissive() -> DocumentPolicy {
        DocumentPolicy::default().with_golden_steps(Vec::<String>::new())
    }

    const SIMPLE: &str = "\
name: CI
on:
  push:
    branches: [main]
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - name: Build APK
        run: make
";

    #[test]
    fn parse_simple_document() {
        let doc = PipelineDocument::parse(SIMPLE, &permissive()).unwrap();
        assert_eq!(doc.name(), Some("CI"));
        assert_eq!(doc.job_id(), "build");
        assert_eq!(doc.runner(), "ubuntu-latest");
        assert_eq!(doc.identities(), vec!["actions/checkout@v4", "Build APK"]);
    }

    #[test]
    fn boolean_trigger_key_becomes_push_mapping() {
        let text = "name: CI\ntrue: true\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - name: Build APK\n        run: make\n";
        let doc = PipelineDocument::parse(text, &permissive()).unwrap();
        let push = doc.trigger().get("push").unwrap();
        assert_eq!(
            push.get("branches").and_then(Value::as_sequence).map(Vec::len),
            Some(1)
        );
        assert!(doc.to_yaml().unwrap().contains("push"));
        assert!(!doc.to_yaml().unwrap().contains("true:"));
    }

    #[test]
    fn trigger_list_becomes_mapping() {
        let text = "on: [push, pull_request]\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps: []\n";
        let doc = PipelineDocument::parse(text, &permissive()).unwrap();
        assert!(doc.trigger().get("pull_request").unwrap().is_mapping());
        assert!(doc.trigger().get("push").unwrap().is_mapping());
    }

    #[test]
    fn null_trigger_filters_become_empty_mappings() {
        let text = "on:\n  workflow_dispatch:\n  push:\njobs:\n  build:\n    steps: []\n";
        let doc = PipelineDocument::parse(text, &permissive()).unwrap();
        assert!(doc.trigger().get("workflow_dispatch").unwrap().is_mapping());
        assert!(doc.trigger().get("push").unwrap().is_mapping());
    }

    #[test]
    fn invalid_runner_is_coerced() {
        let text = "on: push\njobs:\n  build:\n    runs-on: toaster\n    steps: []\n";
        let doc = PipelineDocument::parse(text, &permissive()).unwrap();
        assert_eq!(doc.runner(), "ubuntu-latest");

        let text = "on: push\njobs:\n  build:\n    runs-on: Ubuntu-latest\n    steps: []\n";
        let doc = PipelineDocument::parse(text, &permissive()).unwrap();
        assert_eq!(doc.runner(), "Ubuntu-latest");
    }

    #[test]
    fn nested_step_lists_are_flattened() {
        let text = "\
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - - name: Install Buildozer
          run: pip install buildozer
      - - - name: Build APK
            run: make
      - if: always()
";
        let doc = PipelineDocument::parse(text, &permissive()).unwrap();
        assert_eq!(doc.identities(), vec!["Install Buildozer", "Build APK"]);
    }

    #[test]
    fn duplicate_identities_keep_first() {
        let text = "\
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - name: Build APK
        run: first
      - name: Build APK
        run: second
";
        let doc = PipelineDocument::parse(text, &permissive()).unwrap();
        assert_eq!(doc.steps().len(), 1);
        assert_eq!(doc.steps()[0].script(), Some("first"));
    }

    #[test]
    fn missing_job_is_an_error() {
        let text = "on: push\njobs:\n  test:\n    steps: []\n";
        let err = PipelineDocument::parse(text, &permissive()).unwrap_err();
        assert!(matches!(err, DocumentError::MissingJob(ref j) if j == "build"));
    }

    #[test]
    fn non_mapping_root_is_malformed() {
        let err = PipelineDocument::parse("- a\n- b\n", &permissive()).unwrap_err();
        assert!(matches!(err, DocumentError::Malformed(_)));
        let err = PipelineDocument::parse("jobs: [", &permissive()).unwrap_err();
        assert!(matches!(err, DocumentError::Syntax(_)));
    }

    #[test]
    fn other_jobs_and_metadata_survive() {
        let text = "\
name: CI
permissions:
  contents: write
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    timeout-minutes: 90
    steps:
      - name: Build APK
        run: make
  lint:
    runs-on: ubuntu-latest
    steps:
      - run: cargo fmt --check
";
        let doc = PipelineDocument::parse(text, &permissive()).unwrap();
        let rendered = doc.to_yaml().unwrap();
        let reparsed = PipelineDocument::parse(&rendered, &permissive()).unwrap();
        assert_eq!(doc, reparsed);
        assert!(rendered.contains("timeout-minutes: 90"));
        assert!(rendered.contains("lint:"));
        assert!(rendered.contains("contents: write"));
        let Value::Mapping(root) = doc.to_value() else {
            panic!("expected mapping");
        };
        let keys: Vec<_> = root.keys().filter_map(Value::as_str).collect();
        assert_eq!(keys, vec!["name", "on", "permissions", "jobs"]);
    }

    #[test]
    fn normalize_reorders_by_phase() {
        let mut doc = PipelineDocument::new(&permissive()).with_steps(vec![
            Step::run("Build APK", "make"),
            Step::run("Install Tools", "apt-get install x"),
            Step::action("Upload APK", "actions/upload-artifact@v4"),
            Step::run("Verify Build Log", "test -f build.log"),
        ]);
        doc.normalize(&permissive(), &BTreeSet::<String>::new());
        assert_eq!(
            doc.identities(),
            vec!["Install Tools", "Build APK", "Verify Build Log", "Upload APK"]
        );
    }

    #[test]
    fn normalize_drops_unprotected_transient_steps() {
        let policy = permissive();
        let steps = vec![
            Step::run("Initial Trigger Step", "echo start"),
            Step::run("Build APK", "make"),
        ];

        let mut doc = PipelineDocument::new(&policy).with_steps(steps.clone());
        doc.normalize(&policy, &BTreeSet::<String>::new());
        assert_eq!(doc.identities(), vec!["Build APK"]);

        let protected: BTreeSet<String> = ["Initial Trigger Step".to_string()].into();
        let mut doc = PipelineDocument::new(&policy).with_steps(steps);
        doc.normalize(&policy, &protected);
        assert_eq!(doc.identities(), vec!["Initial Trigger Step", "Build APK"]);
    }

    #[test]
    fn validate_reports_golden_steps() {
        let policy = DocumentPolicy::default().with_golden_steps(["Build APK", "Set up Python"]);
        let doc = PipelineDocument::new(&policy).with_steps(vec![Step::run("Build APK", "make")]);
        let err = doc.validate(&policy).unwrap_err();
        assert!(
            matches!(err, DocumentError::GoldenStepsMissing(ref m) if m == &vec!["Set up Python".to_string()])
        );
    }

    #[test]
    fn validate_rejects_empty_and_duplicates() {
        let policy = permissive();
        let empty = PipelineDocument::new(&policy);
        assert!(matches!(empty.validate(&policy), Err(DocumentError::NoSteps)));

        let dup = PipelineDocument::new(&policy).with_steps(vec![
            Step::run("Build APK", "a"),
            Step::run("Build APK", "b"),
        ]);
        assert!(matches!(
            dup.validate(&policy),
            Err(DocumentError::DuplicateIdentity(_))
        ));
    }

    #[test]
    fn rendering_is_deterministic() {
        let doc = PipelineDocument::parse(SIMPLE, &permissive()).unwrap();
        assert_eq!(doc.to_yaml().unwrap(), doc.clone().to_yaml().unwrap());
        assert_eq!(doc.fingerprint().unwrap(), doc.fingerprint().unwrap());
    }
}
