//! Patch engine
//!
//! Applies exactly one remedy to a [`PipelineDocument`]. The input document
//! is never mutated: on success a new, normalized and validated document is
//! returned; on any failure the caller still holds the original.
//!
//! Check order matters and is fixed:
//! 1. unwrap the fragment to a single step (`InvalidFragment`)
//! 2. refuse protected identities and targets (`ProtectedStep`)
//! 3. refuse remedies already present (`DuplicateStep`)
//! 4. locate the modify target (`TargetNotFound`)
//! 5. splice, normalize, validate (`Validation`)

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, info};

use crate::document::{PipelineDocument, MAX_NESTING};
use crate::error::{PatchError, PatchResult};
use crate::guard::StepGuard;
use crate::policy::DocumentPolicy;
use crate::step::{kind_of, Step};

/// How a remedy step is placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchMode {
    /// Append, then reorder by phase
    #[default]
    Add,
    /// Replace the target step in place
    Modify,
}

/// One remedy to apply
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRequest {
    /// Identity the fragment must carry
    pub identity: String,
    /// Step fragment, possibly wrapped in stray lists
    pub fragment: Value,
    /// Placement mode
    pub mode: PatchMode,
    /// Step replaced in modify mode (defaults to `identity`)
    pub target: Option<String>,
}

impl PatchRequest {
    /// Append a new step
    #[must_use]
    pub fn add(identity: impl Into<String>, fragment: Value) -> Self {
        Self {
            identity: identity.into(),
            fragment,
            mode: PatchMode::Add,
            target: None,
        }
    }

    /// Replace `target` with the fragment
    #[must_use]
    pub fn modify(identity: impl Into<String>, fragment: Value, target: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            fragment,
            mode: PatchMode::Modify,
            target: Some(target.into()),
        }
    }

    /// Build a request from fragment text
    ///
    /// # Errors
    /// Returns `InvalidFragment` if the text is not YAML
    pub fn from_yaml(
        identity: impl Into<String>,
        text: &str,
        mode: PatchMode,
        target: Option<String>,
    ) -> PatchResult<Self> {
        let fragment = serde_yaml::from_str(text)
            .map_err(|e| PatchError::invalid_fragment(format!("fragment is not yaml: {e}")))?;
        Ok(Self {
            identity: identity.into(),
            fragment,
            mode,
            target,
        })
    }

    /// Identity of the step this request replaces or adds
    #[inline]
    #[must_use]
    pub fn target_identity(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.identity)
    }
}

/// Reduce a fragment to exactly one step
///
/// Singleton lists are unwrapped up to [`MAX_NESTING`] levels. An empty list
/// or a list with several siblings at any level is rejected rather than
/// guessed at.
///
/// # Errors
/// Returns `InvalidFragment` if the fragment does not reduce to one
/// well-formed step
pub fn unwrap_fragment(fragment: &Value) -> PatchResult<Step> {
    let mut current = fragment;
    for depth in 0..=MAX_NESTING {
        match current {
            Value::Sequence(items) => match items.as_slice() {
                [single] => {
                    debug!("unwrapping singleton fragment list at depth {}", depth);
                    current = single;
                }
                [] => return Err(PatchError::invalid_fragment("fragment is an empty list")),
                many => {
                    return Err(PatchError::invalid_fragment(format!(
                        "fragment holds {} sibling steps",
                        many.len()
                    )))
                }
            },
            Value::Mapping(_) => return Ok(Step::from_value(current)?),
            other => {
                return Err(PatchError::invalid_fragment(format!(
                    "fragment must be a step mapping, found {}",
                    kind_of(other)
                )))
            }
        }
    }
    Err(PatchError::invalid_fragment(format!(
        "fragment nested deeper than {MAX_NESTING} lists"
    )))
}

/// Applies remedies under a document policy
#[derive(Debug, Clone, Default)]
pub struct PatchEngine {
    policy: DocumentPolicy,
}

impl PatchEngine {
    /// Create an engine for the given policy
    #[inline]
    #[must_use]
    pub fn new(policy: DocumentPolicy) -> Self {
        Self { policy }
    }

    /// Policy in force
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &DocumentPolicy {
        &self.policy
    }

    /// Apply one remedy
    ///
    /// # Errors
    /// Returns the rejection reason; `document` is left as it was
    pub fn apply(
        &self,
        document: &PipelineDocument,
        request: &PatchRequest,
        guard: &dyn StepGuard,
    ) -> PatchResult<PipelineDocument> {
        let step = unwrap_fragment(&request.fragment)?;
        let identity = step.identity().to_string();
        if identity != request.identity {
            return Err(PatchError::invalid_fragment(format!(
                "fragment identity `{identity}` does not match `{}`",
                request.identity
            )));
        }

        if guard.is_protected(&identity) {
            return Err(PatchError::ProtectedStep(identity));
        }
        let target = request.target_identity();
        if request.mode == PatchMode::Modify && guard.is_protected(target) {
            return Err(PatchError::ProtectedStep(target.to_string()));
        }

        let mut patched = document.clone();
        match request.mode {
            PatchMode::Add => {
                if document.contains(&identity) {
                    return Err(PatchError::DuplicateStep(identity));
                }
                patched.push_step(step);
            }
            PatchMode::Modify => {
                if document.step(&identity) == Some(&step) {
                    return Err(PatchError::DuplicateStep(identity));
                }
                let Some(index) = document.position(target) else {
                    return Err(PatchError::TargetNotFound(target.to_string()));
                };
                if identity != target && document.contains(&identity) {
                    return Err(PatchError::DuplicateStep(identity));
                }
                patched.replace_step(index, step);
            }
        }

        patched.normalize(&self.policy, guard);
        patched.validate(&self.policy)?;
        info!(
            "applied {:?} of step `{}` ({} steps)",
            request.mode,
            identity,
            patched.steps().len()
        );
        Ok(patched)
    }

    /// Minimal known-good document carrying over every protected step
    ///
    /// Protected steps keep the body they have in `current`; those the
    /// baseline lacks are appended and then placed by phase.
    ///
    /// # Errors
    /// Returns `Validation` if even the reset document is invalid
    pub fn reset(
        &self,
        current: Option<&PipelineDocument>,
        guard: &dyn StepGuard,
    ) -> PatchResult<PipelineDocument> {
        let mut doc = PipelineDocument::parse(self.policy.baseline_yaml(), &self.policy)?;
        if let Some(current) = current {
            for step in current.steps().iter().filter(|s| guard.is_protected(s.identity())) {
                match doc.position(step.identity()) {
                    Some(index) => doc.replace_step(index, step.clone()),
                    None => doc.push_step(step.clone()),
                }
            }
        }
        doc.normalize(&self.policy, guard);
        doc.validate(&self.policy)?;
        info!("reset document to baseline ({} steps)", doc.steps().len());
        Ok(doc)
    }
}
