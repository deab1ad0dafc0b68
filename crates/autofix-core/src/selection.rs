//! Remedy candidates
//!
//! Candidates for one error event, in priority order: a parameterised fix,
//! then the first catalog rule with a remedy. Suggested fragments are only
//! parsed here; whether to ask for one is the orchestrator's call.

use std::fmt::{self, Display, Formatter};

use autofix_analyzer::{Catalog, ErrorEvent};
use autofix_pipeline::{
    unwrap_fragment, Fingerprint, PatchError, PatchRequest, PatchResult, PipelineDocument,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_yaml::Value;

use crate::structural::StructuralFixer;

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)```").expect("valid regex"));

/// Where a remedy came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemedySource {
    Structural,
    Catalog,
    Suggested,
}

impl Display for RemedySource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Structural => "structural",
            Self::Catalog => "catalog",
            Self::Suggested => "suggested",
        })
    }
}

/// One candidate remedy
#[derive(Debug, Clone, PartialEq)]
pub struct Remedy {
    /// Ledger key
    pub id: String,
    pub source: RemedySource,
    pub request: PatchRequest,
}

impl Remedy {
    /// Step the remedy adds or rewrites
    #[inline]
    #[must_use]
    pub fn step_identity(&self) -> &str {
        &self.request.identity
    }

    /// Steps the patch engine will refuse to touch if protected
    pub fn touched_steps(&self) -> impl Iterator<Item = &str> {
        let target = self.request.target_identity();
        std::iter::once(self.step_identity())
            .chain((target != self.step_identity()).then_some(target))
    }
}

/// Local candidates for `event`, best first
#[must_use]
pub fn local_candidates(
    event: &ErrorEvent,
    document: &PipelineDocument,
    catalog: &Catalog,
    structural: &StructuralFixer,
) -> Vec<Remedy> {
    let mut out = Vec::new();
    if let Some(fix) = structural.propose(&event.raw_text, document) {
        out.push(Remedy {
            id: fix.id,
            source: RemedySource::Structural,
            request: fix.request,
        });
    }

    let by_pattern = event
        .pattern_id
        .as_deref()
        .and_then(|id| catalog.get(id))
        .filter(|rule| rule.remedy().is_some());
    let rule = by_pattern.or_else(|| {
        catalog
            .iter()
            .find(|rule| rule.remedy().is_some() && rule.matches(&event.raw_text))
    });
    if let Some((rule, remedy)) = rule.and_then(|r| r.remedy().map(|m| (r, m))) {
        out.push(Remedy {
            id: rule.id().to_string(),
            source: RemedySource::Catalog,
            request: remedy.to_request(),
        });
    }
    out
}

/// Turn oracle output into a remedy
///
/// The fragment may be wrapped in a fenced code block. Nothing here vouches
/// for the fragment beyond its shape; it still goes through the patch
/// engine like any other remedy.
///
/// # Errors
/// Returns `InvalidFragment` if the text is not a single YAML step
pub fn parse_suggestion(text: &str) -> PatchResult<Remedy> {
    let body = suggestion_body(text);
    if body.is_empty() {
        return Err(PatchError::invalid_fragment("empty suggestion"));
    }
    let fragment: Value = serde_yaml::from_str(body)
        .map_err(|e| PatchError::invalid_fragment(format!("suggestion is not yaml: {e}")))?;
    let step = unwrap_fragment(&fragment)?;
    Ok(Remedy {
        id: suggestion_id(text),
        source: RemedySource::Suggested,
        request: PatchRequest::add(step.identity(), fragment),
    })
}

/// Ledger key for oracle output, stable across fencing
#[must_use]
pub fn suggestion_id(text: &str) -> String {
    let body = suggestion_body(text);
    format!("suggested:{}", Fingerprint::compute(body.as_bytes()).short())
}

fn suggestion_body(text: &str) -> &str {
    FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or(text, |m| m.as_str())
        .trim()
}
