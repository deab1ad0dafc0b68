//! Remedy catalog
//!
//! Ordered list of `{matcher, remedy}` rules. Matching is first-wins in
//! catalog order, so specific rules must precede generic ones. The catalog
//! only ever grows: rules can be appended (built-ins, then operator overlays,
//! then patterns discovered at runtime) but never removed or reordered.

use autofix_pipeline::{unwrap_fragment, PatchMode, PatchRequest};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};

/// Built-in rule set
pub const BUILTIN_CATALOG_YAML: &str = include_str!("../assets/catalog.yml");

/// Where a rule came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOrigin {
    /// Shipped with the catalog
    Builtin,
    /// Loaded from an operator overlay
    Curated,
    /// Appended from a candidate pattern
    Discovered,
}

/// Step to add or modify when a rule matches
#[derive(Debug, Clone, PartialEq)]
pub struct StepRemedy {
    /// Identity of the step the fragment defines
    pub step_identity: String,
    /// Fragment as written in the catalog
    pub fragment_text: String,
    /// Parsed fragment
    pub fragment: Value,
    /// Placement mode
    pub mode: PatchMode,
    /// Step replaced in modify mode
    pub target: Option<String>,
}

impl StepRemedy {
    /// Patch request for this remedy
    #[must_use]
    pub fn to_request(&self) -> PatchRequest {
        PatchRequest {
            identity: self.step_identity.clone(),
            fragment: self.fragment.clone(),
            mode: self.mode,
            target: self.target.clone(),
        }
    }
}

/// One catalog entry
#[derive(Debug, Clone)]
pub struct RemedyRule {
    id: String,
    pattern: String,
    matcher: Regex,
    umbrella: bool,
    remedy: Option<StepRemedy>,
    origin: RuleOrigin,
}

impl RemedyRule {
    /// Rule that classifies without proposing a fix
    ///
    /// # Errors
    /// Returns error if the pattern does not compile
    pub fn informational(
        id: impl Into<String>,
        pattern: impl Into<String>,
        origin: RuleOrigin,
    ) -> CatalogResult<Self> {
        let id = id.into();
        let pattern = pattern.into();
        let matcher = compile(&id, &pattern)?;
        Ok(Self {
            id,
            pattern,
            matcher,
            umbrella: false,
            remedy: None,
            origin,
        })
    }

    /// Rule with a step remedy
    ///
    /// # Errors
    /// Returns error if the pattern does not compile or the fragment does not
    /// reduce to one step carrying `step_identity`
    pub fn with_remedy(
        id: impl Into<String>,
        pattern: impl Into<String>,
        step_identity: impl Into<String>,
        fragment_text: impl Into<String>,
        mode: PatchMode,
        target: Option<String>,
    ) -> CatalogResult<Self> {
        let mut rule = Self::informational(id, pattern, RuleOrigin::Builtin)?;
        rule.remedy = Some(parse_remedy(
            &rule.id,
            step_identity.into(),
            fragment_text.into(),
            mode,
            target,
        )?);
        Ok(rule)
    }

    /// Mark as an umbrella (generic symptom) rule
    #[inline]
    #[must_use]
    pub fn umbrella(mut self) -> Self {
        self.umbrella = true;
        self
    }

    /// Set the origin
    #[inline]
    #[must_use]
    pub fn with_origin(mut self, origin: RuleOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Rule id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Source pattern
    #[inline]
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether this rule describes a generic symptom rather than a cause
    #[inline]
    #[must_use]
    pub fn is_umbrella(&self) -> bool {
        self.umbrella
    }

    /// Remedy, if the rule proposes one
    #[inline]
    #[must_use]
    pub fn remedy(&self) -> Option<&StepRemedy> {
        self.remedy.as_ref()
    }

    /// Rule origin
    #[inline]
    #[must_use]
    pub fn origin(&self) -> RuleOrigin {
        self.origin
    }

    /// Whether the rule matches the text
    #[inline]
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    id: String,
    pattern: String,
    #[serde(default)]
    umbrella: bool,
    #[serde(default)]
    remedy: Option<RemedySpec>,
}

#[derive(Debug, Deserialize)]
struct RemedySpec {
    step: String,
    fragment: String,
    #[serde(default)]
    mode: PatchMode,
    #[serde(default)]
    target: Option<String>,
}

/// Ordered, append-only rule list
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    rules: Vec<RemedyRule>,
}

impl Catalog {
    /// Empty catalog
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalog of built-in rules
    ///
    /// # Errors
    /// Returns error if the embedded rule set is invalid
    pub fn builtin() -> CatalogResult<Self> {
        let mut catalog = Self::empty();
        catalog.extend_from_yaml(BUILTIN_CATALOG_YAML, RuleOrigin::Builtin)?;
        Ok(catalog)
    }

    /// Append operator-curated rules after the existing ones
    ///
    /// # Errors
    /// Returns error if the YAML is invalid or reuses a rule id; on error
    /// the catalog is unchanged
    pub fn overlay_from_yaml(&mut self, yaml: &str) -> CatalogResult<usize> {
        self.extend_from_yaml(yaml, RuleOrigin::Curated)
    }

    fn extend_from_yaml(&mut self, yaml: &str, origin: RuleOrigin) -> CatalogResult<usize> {
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        let mut staged = self.clone();
        for spec in file.rules {
            let mut rule = RemedyRule::informational(spec.id, spec.pattern, origin)?;
            rule.umbrella = spec.umbrella;
            if let Some(remedy) = spec.remedy {
                rule.remedy = Some(parse_remedy(
                    &rule.id,
                    remedy.step,
                    remedy.fragment,
                    remedy.mode,
                    remedy.target,
                )?);
            }
            staged.append(rule)?;
        }
        let added = staged.len() - self.len();
        *self = staged;
        debug!("catalog extended with {} {:?} rules", added, origin);
        Ok(added)
    }

    /// Append one rule at the end
    ///
    /// # Errors
    /// Returns error if the id is already used
    pub fn append(&mut self, rule: RemedyRule) -> CatalogResult<()> {
        if self.get(rule.id()).is_some() {
            return Err(CatalogError::DuplicateRule(rule.id));
        }
        self.rules.push(rule);
        Ok(())
    }

    /// First rule matching the text
    #[must_use]
    pub fn first_match(&self, text: &str) -> Option<&RemedyRule> {
        self.rules.iter().find(|r| r.matches(text))
    }

    /// Rule by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&RemedyRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Rules in match order
    pub fn iter(&self) -> impl Iterator<Item = &RemedyRule> {
        self.rules.iter()
    }

    /// Number of rules
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the catalog has no rules
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile(id: &str, pattern: &str) -> CatalogResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| CatalogError::InvalidPattern {
            id: id.to_string(),
            source,
        })
}

fn parse_remedy(
    id: &str,
    step_identity: String,
    fragment_text: String,
    mode: PatchMode,
    target: Option<String>,
) -> CatalogResult<StepRemedy> {
    let fragment: Value = serde_yaml::from_str(&fragment_text)
        .map_err(|e| CatalogError::invalid_remedy(id, e.to_string()))?;
    let step = unwrap_fragment(&fragment).map_err(|e| CatalogError::invalid_remedy(id, e.to_string()))?;
    if step.identity() != step_identity {
        return Err(CatalogError::invalid_remedy(
            id,
            format!(
                "fragment defines `{}` but rule names `{step_identity}`",
                step.identity()
            ),
        ));
    }
    if mode == PatchMode::Modify && target.is_none() {
        return Err(CatalogError::invalid_remedy(id, "modify remedy needs a target"));
    }
    Ok(StepRemedy {
        step_identity,
        fragment_text,
        fragment,
        mode,
        target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_loads() {
        let catalog = Catalog::builtin().unwrap();
        assert!(catalog.len() > 20);
        assert!(catalog.iter().all(|r| r.origin() == RuleOrigin::Builtin));
    }

    #[test]
    fn sdkmanager_rule_matches() {
        let catalog = Catalog::builtin().unwrap();
        let rule = catalog
            .first_match("/bin/bash: line 1: sdkmanager: command not found")
            .unwrap();
        assert_eq!(rule.id(), "sdkmanager-missing");
        let remedy = rule.remedy().unwrap();
        assert_eq!(remedy.step_identity, "Install Android SDK Tools");
        assert_eq!(remedy.mode, PatchMode::Add);
    }

    #[test]
    fn first_match_respects_order() {
        let catalog = Catalog::builtin().unwrap();
        let rule = catalog.first_match("ValueError: read of closed file").unwrap();
        assert_eq!(rule.id(), "closed-file-read");
    }

    #[test]
    fn matching_ignores_case() {
        let catalog = Catalog::builtin().unwrap();
        assert_eq!(
            catalog.first_match("NO SPACE LEFT ON DEVICE").map(RemedyRule::id),
            Some("disk-full")
        );
    }

    #[test]
    fn informational_rules_have_no_remedy() {
        let catalog = Catalog::builtin().unwrap();
        let rule = catalog.first_match("API rate limit exceeded for installation").unwrap();
        assert!(rule.remedy().is_none());
    }

    #[test]
    fn umbrella_rules_are_flagged() {
        let catalog = Catalog::builtin().unwrap();
        let rule = catalog
            .first_match("No files were found with the provided path: bin/*.apk")
            .unwrap();
        assert!(rule.is_umbrella());
    }

    #[test]
    fn modify_rule_carries_target() {
        let catalog = Catalog::builtin().unwrap();
        let remedy = catalog.get("pip-read-timeout").and_then(RemedyRule::remedy).unwrap();
        assert_eq!(remedy.mode, PatchMode::Modify);
        assert_eq!(remedy.target.as_deref(), Some("Configure pip mirror"));
        assert_eq!(remedy.to_request().target_identity(), "Configure pip mirror");
    }

    #[test]
    fn append_rejects_duplicate_ids() {
        let mut catalog = Catalog::builtin().unwrap();
        let before = catalog.len();
        let rule = RemedyRule::informational("disk-full", "x", RuleOrigin::Discovered).unwrap();
        assert!(matches!(catalog.append(rule), Err(CatalogError::DuplicateRule(_))));
        assert_eq!(catalog.len(), before);
    }

    #[test]
    fn overlay_appends_after_builtins() {
        let mut catalog = Catalog::builtin().unwrap();
        let before = catalog.len();
        let added = catalog
            .overlay_from_yaml(
                "rules:\n  - id: gradle-daemon\n    pattern: 'Gradle build daemon disappeared'\n",
            )
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(catalog.len(), before + 1);
        let last = catalog.iter().last().unwrap();
        assert_eq!(last.id(), "gradle-daemon");
        assert_eq!(last.origin(), RuleOrigin::Curated);
    }

    #[test]
    fn overlay_is_all_or_nothing() {
        let mut catalog = Catalog::builtin().unwrap();
        let before = catalog.len();
        let err = catalog.overlay_from_yaml(
            "rules:\n  - id: fresh\n    pattern: 'a'\n  - id: broken\n    pattern: '('\n",
        );
        assert!(matches!(err, Err(CatalogError::InvalidPattern { .. })));
        assert_eq!(catalog.len(), before);
    }

    #[test]
    fn remedy_identity_must_match_fragment() {
        let err = RemedyRule::with_remedy(
            "bad",
            "x",
            "Install A",
            "- name: Install B\n  run: b\n",
            PatchMode::Add,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidRemedy { .. }));
    }
}
