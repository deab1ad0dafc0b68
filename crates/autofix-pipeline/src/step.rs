//! Pipeline steps
//!
//! A [`Step`] is either named (`name:` plus a body carrying `run` or `uses`)
//! or a bare action reference (`uses:` with no name). Its identity is the
//! value of whichever key discriminates it, and identities are unique within
//! a document.

use serde_yaml::{Mapping, Value};

use crate::phase::Phase;

const NAME_KEY: &str = "name";
const USES_KEY: &str = "uses";
const RUN_KEY: &str = "run";

const STRING_FIELDS: &[&str] = &[RUN_KEY, USES_KEY, "shell", "working-directory"];
const MAPPING_FIELDS: &[&str] = &["with", "env"];

/// One entry of the job's step list
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Step identified by its `name`; the body holds every other key
    Named { name: String, body: Mapping },
    /// Step identified by its `uses` reference; the body holds every other key
    UsesRef { uses: String, body: Mapping },
}

impl Step {
    /// Named step running a shell script
    #[must_use]
    pub fn run(name: impl Into<String>, script: impl Into<String>) -> Self {
        let mut body = Mapping::new();
        body.insert(Value::from(RUN_KEY), Value::from(script.into()));
        Self::Named {
            name: name.into(),
            body,
        }
    }

    /// Named step invoking an action
    #[must_use]
    pub fn action(name: impl Into<String>, uses: impl Into<String>) -> Self {
        let mut body = Mapping::new();
        body.insert(Value::from(USES_KEY), Value::from(uses.into()));
        Self::Named {
            name: name.into(),
            body,
        }
    }

    /// Unnamed action reference
    #[must_use]
    pub fn uses_ref(uses: impl Into<String>) -> Self {
        Self::UsesRef {
            uses: uses.into(),
            body: Mapping::new(),
        }
    }

    /// Add a body field (builder style)
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        match &mut self {
            Self::Named { body, .. } | Self::UsesRef { body, .. } => {
                body.insert(Value::from(key), value.into());
            }
        }
        self
    }

    /// The step's identity
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &str {
        match self {
            Self::Named { name, .. } => name,
            Self::UsesRef { uses, .. } => uses,
        }
    }

    /// Body fields excluding the identity key
    #[inline]
    #[must_use]
    pub fn body(&self) -> &Mapping {
        match self {
            Self::Named { body, .. } | Self::UsesRef { body, .. } => body,
        }
    }

    /// Whether the step does something when executed
    #[must_use]
    pub fn has_action(&self) -> bool {
        match self {
            Self::Named { body, .. } => body.contains_key(RUN_KEY) || body.contains_key(USES_KEY),
            Self::UsesRef { .. } => true,
        }
    }

    /// Script of a `run` step
    #[must_use]
    pub fn script(&self) -> Option<&str> {
        self.body().get(RUN_KEY).and_then(Value::as_str)
    }

    /// Phase derived from the identity
    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::classify(self.identity())
    }

    /// Build a step from a YAML value
    ///
    /// # Errors
    /// Returns error if the value is not a mapping, carries no identity,
    /// has no action, or has a mistyped field
    pub fn from_value(value: &Value) -> Result<Self, StepError> {
        let Value::Mapping(map) = value else {
            return Err(StepError::NotAMapping(kind_of(value)));
        };

        let name = identity_field(map, NAME_KEY)?;
        let mut body = Mapping::new();
        for (key, field) in map {
            if key.as_str() == Some(NAME_KEY) {
                continue;
            }
            if name.is_none() && key.as_str() == Some(USES_KEY) {
                continue;
            }
            body.insert(key.clone(), field.clone());
        }
        check_field_types(&body)?;

        let step = match name {
            Some(name) => Self::Named { name, body },
            None => match identity_field(map, USES_KEY)? {
                Some(uses) => Self::UsesRef { uses, body },
                None => return Err(StepError::MissingIdentity),
            },
        };

        if step.has_action() {
            Ok(step)
        } else {
            Err(StepError::MissingAction(step.identity().to_string()))
        }
    }

    /// Render as a YAML mapping with the identity key first
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Mapping::new();
        match self {
            Self::Named { name, body } => {
                map.insert(Value::from(NAME_KEY), Value::from(name.as_str()));
                map.extend(body.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Self::UsesRef { uses, body } => {
                map.insert(Value::from(USES_KEY), Value::from(uses.as_str()));
                map.extend(body.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        Value::Mapping(map)
    }
}

fn identity_field(map: &Mapping, key: &str) -> Result<Option<String>, StepError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(other) => Err(StepError::InvalidField {
            field: key.to_string(),
            expected: "string",
            found: kind_of(other),
        }),
    }
}

fn check_field_types(body: &Mapping) -> Result<(), StepError> {
    for (key, value) in body {
        let Some(key) = key.as_str() else { continue };
        if STRING_FIELDS.contains(&key) && !value.is_string() {
            return Err(StepError::InvalidField {
                field: key.to_string(),
                expected: "string",
                found: kind_of(value),
            });
        }
        if MAPPING_FIELDS.contains(&key) && !value.is_mapping() {
            return Err(StepError::InvalidField {
                field: key.to_string(),
                expected: "mapping",
                found: kind_of(value),
            });
        }
    }
    Ok(())
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

/// Reasons a YAML value is not a usable step
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// Step entry is not a mapping
    #[error("step must be a mapping, found {0}")]
    NotAMapping(&'static str),

    /// Neither `name` nor `uses` present
    #[error("step has neither a name nor a uses reference")]
    MissingIdentity,

    /// Named step without `run` or `uses`
    #[error("step `{0}` has no run or uses action")]
    MissingAction(String),

    /// Field of the wrong type
    #[error("field `{field}` must be a {expected}, found {found}")]
    InvalidField {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}
