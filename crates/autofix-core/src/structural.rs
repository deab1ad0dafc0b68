//! Parameterised fixes
//!
//! Some failures carry the parameters of their own fix. An unsatisfiable
//! dependency pin names the package and version that could not be
//! installed, so the fix is to rewrite that pin in the dependency step
//! rather than to add a generic step.

use autofix_pipeline::{PatchRequest, PipelineDocument};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde_yaml::Value;
use tracing::debug;

use crate::config::StructuralConfig;

static UNSATISFIED_PIN: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        r"(?:could not find a version that satisfies the requirement|no matching distribution found for)\s+([A-Za-z0-9][A-Za-z0-9._\-]*)(?:\[[^\]]*\])?==([^\s,;)]+)",
    )
    .case_insensitive(true)
    .build()
    .expect("valid regex")
});

/// A `package==version` pair that could not be installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyPin {
    pub package: String,
    pub version: String,
}

impl DependencyPin {
    /// Pull the failing pin out of pip's error text
    #[must_use]
    pub fn extract(text: &str) -> Option<Self> {
        let caps = UNSATISFIED_PIN.captures(text)?;
        Some(Self {
            package: caps.get(1)?.as_str().to_string(),
            version: caps.get(2)?.as_str().to_string(),
        })
    }
}

/// Remedy produced by a parameterised fix
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralFix {
    pub id: String,
    pub request: PatchRequest,
}

/// Builds parameterised fixes against the current document
#[derive(Debug, Clone, Default)]
pub struct StructuralFixer {
    config: StructuralConfig,
}

impl StructuralFixer {
    /// Create a fixer
    #[must_use]
    pub fn new(config: StructuralConfig) -> Self {
        Self { config }
    }

    /// Fix for `error_text`, if it carries extractable parameters and the
    /// fix would change `document`
    #[must_use]
    pub fn propose(&self, error_text: &str, document: &PipelineDocument) -> Option<StructuralFix> {
        let pin = DependencyPin::extract(error_text)?;
        let identity = self.config.dependency_step.as_str();
        let step = document.step(identity)?;
        let script = step.script()?;

        let replacement = self
            .config
            .known_good_versions
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&pin.package))
            .map_or_else(
                || pin.package.clone(),
                |(_, version)| format!("{}=={version}", pin.package),
            );
        let exact = RegexBuilder::new(&format!(
            r"(^|[\s'\x22]){}=={}($|[\s'\x22])",
            regex::escape(&pin.package),
            regex::escape(&pin.version)
        ))
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .ok()?;
        let rewritten = exact.replace_all(script, |caps: &regex::Captures<'_>| {
            format!("{}{replacement}{}", &caps[1], &caps[2])
        });
        if rewritten == script {
            debug!("pin {}=={} not present in `{}`", pin.package, pin.version, identity);
            return None;
        }

        let fragment = step
            .clone()
            .with_field("run", Value::String(rewritten.into_owned()))
            .to_value();
        Some(StructuralFix {
            id: format!("structural:pin:{}", pin.package.to_ascii_lowercase()),
            request: PatchRequest::modify(identity, fragment, identity),
        })
    }
}

#[cfg(test)]
mod tests {
    use autofix_pipeline::{DocumentPolicy, PatchEngine, PatchError, Unguarded};
    use pretty_assertions::assert_eq;

    use super::*;

    const ERROR: &str = "ERROR: Could not find a version that satisfies the requirement buildozer==1.5.1 (from versions: 1.4.0, 1.5.0)";

    fn baseline() -> PipelineDocument {
        DocumentPolicy::default().baseline().unwrap()
    }

    fn with_pin(pin: &str) -> PipelineDocument {
        let policy = DocumentPolicy::default();
        let text = policy.baseline_yaml().replace("buildozer==1.5.0", pin);
        PipelineDocument::parse(&text, &policy).unwrap()
    }

    #[test]
    fn extracts_pin() {
        assert_eq!(
            DependencyPin::extract(ERROR),
            Some(DependencyPin {
                package: "buildozer".into(),
                version: "1.5.1".into()
            })
        );
        assert_eq!(
            DependencyPin::extract("ERROR: No matching distribution found for kivy[base]==9.9"),
            Some(DependencyPin {
                package: "kivy".into(),
                version: "9.9".into()
            })
        );
        assert_eq!(DependencyPin::extract("No space left on device"), None);
    }

    #[test]
    fn rewrites_pin_to_known_good_version() {
        let doc = with_pin("buildozer==1.5.1");
        let fix = StructuralFixer::default().propose(ERROR, &doc).unwrap();
        assert_eq!(fix.id, "structural:pin:buildozer");

        let engine = PatchEngine::new(DocumentPolicy::default());
        let patched = engine.apply(&doc, &fix.request, &Unguarded).unwrap();
        let script = patched.step("Install Python dependencies").unwrap().script().unwrap();
        assert!(script.contains("buildozer==1.5.0 kivy==2.3.1"));
        assert!(!script.contains("1.5.1"));
        assert_eq!(patched.identities(), doc.identities());
    }

    #[test]
    fn unknown_package_is_unpinned() {
        let doc = baseline();
        let fix = StructuralFixer::default()
            .propose(
                "Could not find a version that satisfies the requirement requests==2.25.1",
                &doc,
            )
            .unwrap();
        let engine = PatchEngine::new(DocumentPolicy::default());
        let patched = engine.apply(&doc, &fix.request, &Unguarded).unwrap();
        let script = patched.step("Install Python dependencies").unwrap().script().unwrap();
        assert!(script.contains("kivy==2.3.1 requests cython"));
    }

    #[test]
    fn no_fix_when_pin_absent() {
        assert!(StructuralFixer::default().propose(ERROR, &baseline()).is_none());
    }

    #[test]
    fn protected_dependency_step_is_refused() {
        let doc = with_pin("buildozer==1.5.1");
        let fix = StructuralFixer::default().propose(ERROR, &doc).unwrap();
        let guard: std::collections::BTreeSet<String> =
            ["Install Python dependencies".to_string()].into();
        let engine = PatchEngine::new(DocumentPolicy::default());
        assert!(matches!(
            engine.apply(&doc, &fix.request, &guard),
            Err(PatchError::ProtectedStep(_))
        ));
    }
}
