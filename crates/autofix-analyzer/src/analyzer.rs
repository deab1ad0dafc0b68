//! Log analyzer
//!
//! Turns raw run logs and CI annotations into classified [`ErrorEvent`]s.
//!
//! The scan is line-oriented with one piece of state worth knowing about: a
//! traceback flag. Once a `Traceback (most recent call last):` line is seen,
//! lines accumulate until an exception line terminates the block, and the
//! block is classified as a whole. Outside tracebacks each line is matched
//! independently, first against the catalog and then against a small generic
//! vocabulary.
//!
//! Umbrella events (generic symptoms such as a missing artifact or a
//! non-zero exit) are only ever reported when nothing more specific was
//! found, after a second, more lenient hunt for tracebacks.

use std::collections::HashSet;

use autofix_pipeline::Fingerprint;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{Catalog, RemedyRule, RuleOrigin};
use crate::error::{CatalogError, CatalogResult};
use crate::event::{Annotation, AnnotationLevel, ErrorEvent, EventKind, EventSource};
use crate::signature::{normalize, ErrorSignature};

static LINE_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z\s?").expect("valid regex")
});
static GROUP_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^##\[group\]Run\s+(.+?)\s*$").expect("valid regex"));
static NUMBERED_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\s*Run\s+(.+?)\s*$").expect("valid regex"));
static EXIT_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Process completed with exit code (\d+)").expect("valid regex")
});
static ERROR_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^##\[error\]\s*(.*)$").expect("valid regex"));
static WARNING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:##\[warning\]|WARNING:|Warning:)").expect("valid regex"));
static TRACEBACK_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*Traceback \(most recent call last\):").expect("valid regex"));
static FRAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s+File ".*", line \d+"#).expect("valid regex"));
static TERMINAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z_]\w*\.)*(\w*(?:Error|Exception|Exit|Interrupt)\w*)(?::|$)")
        .expect("valid regex")
});
static NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\+ |echo |grep |##\[(?:command|debug|endgroup)\])").expect("valid regex")
});

static GENERIC: Lazy<Vec<(&'static str, Regex, bool)>> = Lazy::new(|| {
    [
        ("generic:exception", r"\b[A-Z]\w*(?:Error|Exception):\s", false),
        (
            "generic:error",
            r"\b(?:ERROR|FATAL|CRITICAL)\b|\b(?:[Ee]rror|[Ff]atal):\s",
            false,
        ),
        (
            "generic:permission",
            r"(?i)permission denied|access denied|operation not permitted",
            false,
        ),
        ("generic:timeout", r"(?i)\btimed? ?out\b", false),
        ("generic:failed", r"\bFAILED\b|(?i:failed with exit code)", false),
        (
            "generic:exit-status",
            r"(?i)\bexit(?:ed)? (?:with )?(?:code|status) [1-9]\d*",
            true,
        ),
    ]
    .into_iter()
    .map(|(id, pattern, umbrella)| (id, Regex::new(pattern).expect("valid regex"), umbrella))
    .collect()
});

const EXCEPTION_VOCABULARY: &[&str] = &[
    "ValueError",
    "FileNotFoundError",
    "ModuleNotFoundError",
    "ImportError",
    "TimeoutError",
    "ConnectionError",
    "ConnectionRefusedError",
    "PermissionError",
    "TypeError",
    "KeyError",
    "OSError",
    "MemoryError",
    "RuntimeError",
    "AttributeError",
    "SyntaxError",
    "CalledProcessError",
];

const CANDIDATE_MARKERS: &[&str] = &[
    "not found",
    "failed to execute",
    "permission denied",
    "failed: ",
    "cannot ",
    "read of closed file",
];

/// Analyzer tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Lines of context on each side of a single-line match
    pub context_lines: usize,
    /// Lines of context on each side of a traceback match
    pub traceback_context_lines: usize,
    /// Traceback blocks longer than this are abandoned
    pub max_traceback_lines: usize,
    /// Cap on candidate patterns reported per pass
    pub max_candidates: usize,
    /// Lines matching any of these (case-insensitive) are skipped
    pub ignore_patterns: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            context_lines: 5,
            traceback_context_lines: 10,
            max_traceback_lines: 200,
            max_candidates: 20,
            ignore_patterns: Vec::new(),
        }
    }
}

/// Generic failure line not covered by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePattern {
    /// Marker that flagged the line
    pub marker: String,
    /// Normalized line
    pub example: String,
    /// Regex matching the example and its run-specific variants
    pub pattern: String,
    /// 1-based line number of the first occurrence
    pub line: usize,
}

impl CandidatePattern {
    /// Stable id for the rule this candidate would become
    #[must_use]
    pub fn rule_id(&self) -> String {
        format!("discovered:{}", Fingerprint::compute(self.pattern.as_bytes()).short())
    }

    /// Informational rule for catalog growth
    ///
    /// # Errors
    /// Returns error if the pattern does not compile
    pub fn to_rule(&self) -> CatalogResult<RemedyRule> {
        RemedyRule::informational(self.rule_id(), self.pattern.clone(), RuleOrigin::Discovered)
    }
}

/// Result of one analysis pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub events: Vec<ErrorEvent>,
    pub candidates: Vec<CandidatePattern>,
}

impl Analysis {
    /// Error and exit-code events
    pub fn failures(&self) -> impl Iterator<Item = &ErrorEvent> {
        self.events.iter().filter(|e| e.is_failure())
    }

    /// Signatures of failure events, in order, without repeats
    #[must_use]
    pub fn failure_signatures(&self) -> Vec<ErrorSignature> {
        let mut seen = HashSet::new();
        self.failures()
            .map(ErrorEvent::signature)
            .filter(|s| seen.insert(s.clone()))
            .collect()
    }

    /// Whether no failure was found
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

struct OpenTraceback {
    start: usize,
    lines: Vec<String>,
}

/// Stateless log classifier
#[derive(Debug, Clone)]
pub struct LogAnalyzer {
    config: AnalyzerConfig,
    ignore: Vec<Regex>,
}

impl Default for LogAnalyzer {
    fn default() -> Self {
        Self {
            config: AnalyzerConfig::default(),
            ignore: Vec::new(),
        }
    }
}

impl LogAnalyzer {
    /// Create an analyzer
    ///
    /// # Errors
    /// Returns error if an ignore pattern does not compile
    pub fn new(config: AnalyzerConfig) -> CatalogResult<Self> {
        let ignore = config
            .ignore_patterns
            .iter()
            .enumerate()
            .map(|(i, p)| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| CatalogError::InvalidPattern {
                        id: format!("ignore[{i}]"),
                        source,
                    })
            })
            .collect::<CatalogResult<Vec<_>>>()?;
        Ok(Self { config, ignore })
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Classify a run's log and annotations
    #[must_use]
    pub fn analyze(&self, raw_log: &str, annotations: &[Annotation], catalog: &Catalog) -> Analysis {
        let lines = clean_lines(raw_log);

        let mut events = self.scan(&lines, catalog);
        events.extend(annotations.iter().filter_map(|a| annotation_event(a, catalog)));
        let mut events = dedupe(events);

        let has_umbrella = events.iter().any(|e| e.is_failure() && e.umbrella);
        if has_umbrella {
            let mut has_specific = events.iter().any(ErrorEvent::is_specific);
            if !has_specific {
                let rescued = self.lenient_tracebacks(&lines, catalog);
                debug!("umbrella-only pass, rescued {} traceback(s)", rescued.len());
                has_specific = !rescued.is_empty();
                events.extend(rescued);
                events = dedupe(events);
            }
            if has_specific {
                events.retain(|e| !(e.is_failure() && e.umbrella));
            }
        }

        let candidates = self.candidates(&lines, catalog);
        debug!(
            "analyzed {} lines: {} events, {} candidate patterns",
            lines.len(),
            events.len(),
            candidates.len()
        );
        Analysis { events, candidates }
    }

    fn scan(&self, lines: &[String], catalog: &Catalog) -> Vec<ErrorEvent> {
        let mut events = Vec::new();
        let mut step: Option<String> = None;
        let mut in_run_group = false;
        let mut traceback: Option<OpenTraceback> = None;

        for (i, line) in lines.iter().enumerate() {
            if let Some(name) = GROUP_RUN.captures(line).and_then(|c| c.get(1)) {
                step = Some(name.as_str().to_string());
                in_run_group = true;
                traceback = None;
                continue;
            }
            if line.starts_with("##[endgroup]") {
                in_run_group = false;
                continue;
            }
            if let Some(name) = NUMBERED_RUN.captures(line).and_then(|c| c.get(1)) {
                step = Some(name.as_str().to_string());
                traceback = None;
                continue;
            }
            if in_run_group || self.is_ignored(line) {
                continue;
            }

            if let Some(open) = traceback.as_mut() {
                open.lines.push(line.clone());
                if TERMINAL.is_match(line) {
                    let block = std::mem::take(&mut open.lines);
                    events.push(self.traceback_event(&block, i, lines, catalog, step.as_deref()));
                    traceback = None;
                } else if open.lines.len() > self.config.max_traceback_lines {
                    debug!("abandoning traceback opened at line {}", open.start + 1);
                    traceback = None;
                }
                continue;
            }
            if TRACEBACK_OPEN.is_match(line) {
                traceback = Some(OpenTraceback {
                    start: i,
                    lines: vec![line.clone()],
                });
                continue;
            }
            if NOISE.is_match(line) {
                continue;
            }
            if let Some(event) = self.line_event(i, line, lines, catalog, step.as_deref()) {
                events.push(event);
            }
        }
        events
    }

    fn line_event(
        &self,
        index: usize,
        line: &str,
        lines: &[String],
        catalog: &Catalog,
        step: Option<&str>,
    ) -> Option<ErrorEvent> {
        let mut event = classify_message(line, catalog)?;
        event.context = window(lines, index, self.config.context_lines);
        event.associated_step = step.map(str::to_string);
        event.line = Some(index + 1);
        Some(event)
    }

    fn traceback_event(
        &self,
        block: &[String],
        terminal_index: usize,
        lines: &[String],
        catalog: &Catalog,
        step: Option<&str>,
    ) -> ErrorEvent {
        let joined = block.join("\n");
        let terminal = block.last().map(String::as_str).unwrap_or_default();
        let mut event = ErrorEvent::new(joined.clone(), EventKind::Error, EventSource::Log);

        if let Some(rule) = catalog
            .first_match(terminal)
            .or_else(|| catalog.first_match(&joined))
        {
            event = event.with_pattern(rule.id()).with_umbrella(rule.is_umbrella());
        } else if let Some(class) = exception_class(terminal) {
            if EXCEPTION_VOCABULARY.contains(&class) {
                event = event.with_pattern(format!("exception:{class}"));
            }
        }

        event.context = window(lines, terminal_index, self.config.traceback_context_lines);
        event.associated_step = step.map(str::to_string);
        event.line = Some(terminal_index + 1);
        event
    }

    /// Exception lines preceded by stack frames, without requiring an
    /// opening marker
    fn lenient_tracebacks(&self, lines: &[String], catalog: &Catalog) -> Vec<ErrorEvent> {
        let reach = self.config.traceback_context_lines;
        let mut events = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if !TERMINAL.is_match(line) || self.is_ignored(line) {
                continue;
            }
            let from = i.saturating_sub(reach);
            let Some(start) = (from..i)
                .find(|&j| FRAME.is_match(&lines[j]) || TRACEBACK_OPEN.is_match(&lines[j]))
            else {
                continue;
            };
            let block = &lines[start..=i];
            events.push(self.traceback_event(block, i, lines, catalog, None));
        }
        events
    }

    fn candidates(&self, lines: &[String], catalog: &Catalog) -> Vec<CandidatePattern> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut in_run_group = false;

        for (i, line) in lines.iter().enumerate() {
            if GROUP_RUN.is_match(line) {
                in_run_group = true;
                continue;
            }
            if line.starts_with("##[endgroup]") {
                in_run_group = false;
                continue;
            }
            if in_run_group || NOISE.is_match(line) || self.is_ignored(line) {
                continue;
            }
            let lowered = line.to_lowercase();
            let Some(marker) = CANDIDATE_MARKERS.iter().find(|m| lowered.contains(*m)) else {
                continue;
            };
            if catalog.first_match(line).is_some() {
                continue;
            }
            let example = normalize(line);
            let pattern = generalize(&example);
            if example.is_empty() || !seen.insert(pattern.clone()) {
                continue;
            }
            out.push(CandidatePattern {
                marker: (*marker).to_string(),
                example,
                pattern,
                line: i + 1,
            });
            if out.len() >= self.config.max_candidates {
                break;
            }
        }
        out
    }

    fn is_ignored(&self, line: &str) -> bool {
        self.ignore.iter().any(|r| r.is_match(line))
    }
}

/// Classify one message outside a traceback
fn classify_message(line: &str, catalog: &Catalog) -> Option<ErrorEvent> {
    if EXIT_CODE.is_match(line) {
        return Some(
            ErrorEvent::new(line, EventKind::ExitCode, EventSource::Log)
                .with_pattern("exit-code")
                .with_umbrella(true),
        );
    }
    if WARNING.is_match(line) {
        return Some(ErrorEvent::new(line, EventKind::Warning, EventSource::Log));
    }

    let (body, explicit) = match ERROR_COMMAND.captures(line).and_then(|c| c.get(1)) {
        Some(rest) => (rest.as_str(), true),
        None => (line, false),
    };
    if let Some(rule) = catalog.first_match(body) {
        return Some(
            ErrorEvent::new(line, EventKind::Error, EventSource::Log)
                .with_pattern(rule.id())
                .with_umbrella(rule.is_umbrella()),
        );
    }
    if let Some((id, _, umbrella)) = GENERIC.iter().find(|(_, re, _)| re.is_match(body)) {
        return Some(
            ErrorEvent::new(line, EventKind::Error, EventSource::Log)
                .with_pattern(*id)
                .with_umbrella(*umbrella),
        );
    }
    explicit.then(|| ErrorEvent::new(line, EventKind::Error, EventSource::Log))
}

fn annotation_event(annotation: &Annotation, catalog: &Catalog) -> Option<ErrorEvent> {
    let message = annotation.message.trim();
    if message.is_empty() {
        return None;
    }
    let mut event = match annotation.level {
        AnnotationLevel::Notice => return None,
        AnnotationLevel::Warning => ErrorEvent::new(message, EventKind::Warning, EventSource::Annotation),
        AnnotationLevel::Failure => match classify_message(message, catalog) {
            Some(event) if event.kind != EventKind::Warning => event,
            _ => ErrorEvent::new(message, EventKind::Error, EventSource::Annotation),
        },
    };
    event.source = EventSource::Annotation;
    event.context = vec![message.to_string()];
    Some(event)
}

fn clean_lines(raw_log: &str) -> Vec<String> {
    raw_log
        .trim_start_matches('\u{feff}')
        .lines()
        .map(|l| LINE_TIMESTAMP.replace(l.trim_end(), "").into_owned())
        .collect()
}

fn window(lines: &[String], index: usize, reach: usize) -> Vec<String> {
    let from = index.saturating_sub(reach);
    let to = (index + reach + 1).min(lines.len());
    lines[from..to].to_vec()
}

fn exception_class(terminal: &str) -> Option<&str> {
    TERMINAL
        .captures(terminal)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn dedupe(events: Vec<ErrorEvent>) -> Vec<ErrorEvent> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|e| seen.insert((e.is_failure(), e.signature())))
        .collect()
}

fn generalize(example: &str) -> String {
    regex::escape(example)
        .replace("<id>", r"\d+")
        .replace("<sha>", "[0-9a-f]+")
        .replace("<uuid>", "[0-9a-f-]+")
        .replace("/tmp/<tmp>", r"/tmp/\S+")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn analyze(log: &str) -> Analysis {
        let catalog = Catalog::builtin().unwrap();
        LogAnalyzer::default().analyze(log, &[], &catalog)
    }

    #[test]
    fn empty_log_is_clean() {
        let analysis = analyze("");
        assert!(analysis.events.is_empty());
        assert!(analysis.candidates.is_empty());
    }

    #[test]
    fn sdkmanager_line_matches_catalog() {
        let log = "\
2024-05-01T10:00:00.0000000Z ##[group]Run sdkmanager --install platform-tools
2024-05-01T10:00:00.0000000Z sdkmanager --install platform-tools
2024-05-01T10:00:00.0000000Z ##[endgroup]
2024-05-01T10:00:01.0000000Z /home/runner/work/_temp/abc.sh: line 1: sdkmanager: command not found
2024-05-01T10:00:01.0000000Z ##[error]Process completed with exit code 127.
";
        let analysis = analyze(log);
        assert_eq!(analysis.events.len(), 1);
        let event = &analysis.events[0];
        assert_eq!(event.pattern_id.as_deref(), Some("sdkmanager-missing"));
        assert_eq!(
            event.associated_step.as_deref(),
            Some("sdkmanager --install platform-tools")
        );
        assert_eq!(event.line, Some(4));
        assert!(!event.context.is_empty());
    }

    #[test]
    fn traceback_block_is_one_event() {
        let log = "\
Downloading NDK
Traceback (most recent call last):
  File \"/usr/lib/python3.10/urllib/request.py\", line 270, in urlretrieve
    block = fp.read(bs)
  File \"/usr/lib/python3.10/http/client.py\", line 460, in read
    raise ValueError(\"read of closed file\")
ValueError: read of closed file
continuing
";
        let analysis = analyze(log);
        let failures: Vec<_> = analysis.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].pattern_id.as_deref(), Some("closed-file-read"));
        assert!(failures[0].raw_text.starts_with("Traceback"));
        assert_eq!(
            failures[0].signature().as_str(),
            "ValueError: read of closed file"
        );
    }

    #[test]
    fn unknown_traceback_uses_vocabulary() {
        let log = "\
Traceback (most recent call last):
  File \"main.py\", line 1, in <module>
KeyError: 'API_KEY'
";
        let analysis = analyze(log);
        assert_eq!(analysis.events.len(), 1);
        assert_eq!(
            analysis.events[0].pattern_id.as_deref(),
            Some("exception:KeyError")
        );
    }

    #[test]
    fn generic_vocabulary_catches_unlisted_errors() {
        let analysis = analyze("fatal: unable to access repository\n");
        assert_eq!(analysis.events.len(), 1);
        assert_eq!(
            analysis.events[0].pattern_id.as_deref(),
            Some("generic:error")
        );
    }

    #[test]
    fn duplicate_messages_are_collapsed() {
        let log = "\
2024-01-01T00:00:00Z Error: disk full
2024-01-01T00:00:05Z Error: disk full
";
        let analysis = analyze(log);
        assert_eq!(analysis.events.len(), 1);
    }

    #[test]
    fn warnings_are_not_failures() {
        let analysis = analyze("WARNING: pip is out of date\n##[warning]Node 16 is deprecated\n");
        assert_eq!(analysis.events.len(), 2);
        assert!(analysis.is_clean());
        assert!(analysis.events.iter().all(|e| e.kind == EventKind::Warning));
    }

    #[test]
    fn umbrella_dropped_when_specific_found() {
        let log = "\
No space left on device
##[error]Process completed with exit code 1.
Warning: No files were found with the provided path: bin/*.apk
";
        let analysis = analyze(log);
        let failures: Vec<_> = analysis.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].pattern_id.as_deref(), Some("disk-full"));
    }

    #[test]
    fn umbrella_kept_as_last_resort() {
        let analysis = analyze("##[error]Process completed with exit code 1.\n");
        let failures: Vec<_> = analysis.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, EventKind::ExitCode);
        assert!(failures[0].umbrella);
    }

    #[test]
    fn umbrella_triggers_lenient_traceback_search() {
        let log = "\
##[group]Run buildozer android debug
buildozer android debug
##[endgroup]
  File \"/home/runner/.buildozer/pythonforandroid/build.py\", line 12, in run
    sh.ndk_build()
sh.ErrorReturnCode_1:
Failed to generate APK
";
        let analysis = analyze(log);
        let failures: Vec<_> = analysis.failures().collect();
        assert_eq!(failures.len(), 1, "{failures:?}");
        assert!(!failures[0].umbrella);
        assert!(failures[0].raw_text.ends_with("sh.ErrorReturnCode_1:"));
        assert!(failures[0].raw_text.starts_with("  File"));
    }

    #[test]
    fn run_group_script_lines_are_noise() {
        let log = "\
##[group]Run if grep -q -E \"ERROR:|FAILED\" build.log; then
if grep -q -E \"ERROR:|FAILED\" build.log; then
  exit 1
fi
##[endgroup]
No critical errors found in build log
";
        let analysis = analyze(log);
        assert!(analysis.events.is_empty(), "{:?}", analysis.events);
    }

    #[test]
    fn annotation_only_failure_yields_one_event() {
        let catalog = Catalog::builtin().unwrap();
        let annotations = vec![
            Annotation::failure("The job running on runner GitHub Actions 2 has exceeded the maximum execution time"),
            Annotation {
                level: AnnotationLevel::Notice,
                message: "Runner version 2.300".into(),
            },
        ];
        let analysis = LogAnalyzer::default().analyze("all good\n", &annotations, &catalog);
        let failures: Vec<_> = analysis.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].source, EventSource::Annotation);
    }

    #[test]
    fn annotation_duplicating_log_line_is_collapsed() {
        let catalog = Catalog::builtin().unwrap();
        let annotations = vec![Annotation::failure("No space left on device")];
        let analysis =
            LogAnalyzer::default().analyze("2024-01-01T00:00:00Z No space left on device\n", &annotations, &catalog);
        assert_eq!(analysis.failures().count(), 1);
        assert_eq!(analysis.events[0].source, EventSource::Log);
    }

    #[test]
    fn candidates_skip_covered_lines() {
        let log = "\
sdkmanager: command not found
aapt2: not found in build-tools 8812345678
";
        let analysis = analyze(log);
        assert_eq!(analysis.candidates.len(), 1);
        let candidate = &analysis.candidates[0];
        assert_eq!(candidate.marker, "not found");
        assert_eq!(candidate.line, 2);
        let rule = candidate.to_rule().unwrap();
        assert!(rule.matches("aapt2: not found in build-tools 1234567"));
        assert!(rule.id().starts_with("discovered:"));
    }

    #[test]
    fn ignore_patterns_skip_lines() {
        let config = AnalyzerConfig {
            ignore_patterns: vec!["expected failure".into()],
            ..AnalyzerConfig::default()
        };
        let analyzer = LogAnalyzer::new(config).unwrap();
        let catalog = Catalog::builtin().unwrap();
        let analysis = analyzer.analyze("Error: expected failure in test fixture\n", &[], &catalog);
        assert!(analysis.events.is_empty());
    }

    #[test]
    fn bad_ignore_pattern_is_rejected() {
        let config = AnalyzerConfig {
            ignore_patterns: vec!["(".into()],
            ..AnalyzerConfig::default()
        };
        assert!(matches!(
            LogAnalyzer::new(config),
            Err(CatalogError::InvalidPattern { .. })
        ));
    }
}
