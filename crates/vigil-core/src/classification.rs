//! Classification labels and the access predicate consumed by the relay.
//!
//! The relay never interprets labels itself. It asks an [`AccessPolicy`]
//! whether a viewer label may see an object label, and asks the same
//! policy for the least- and most-restrictive labels it uses as defaults.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::RelayError;

/// Opaque access-control tag attached to users and to data objects.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassificationLabel(String);

impl ClassificationLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassificationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassificationLabel {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Black-box access predicate.
pub trait AccessPolicy: Send + Sync {
    /// Whether a viewer cleared at `viewer` may see data labelled `object`.
    fn is_accessible(&self, viewer: &ClassificationLabel, object: &ClassificationLabel) -> bool;

    /// Label applied to data that carries none.
    fn unrestricted(&self) -> ClassificationLabel;

    /// Label given to identities that could not be resolved.
    fn restricted(&self) -> ClassificationLabel;
}

/// Check access, mapping a refusal to [`RelayError::AccessDenied`].
///
/// A viewer with no resolved label sees nothing.
pub fn authorize(
    policy: &dyn AccessPolicy,
    viewer: Option<&ClassificationLabel>,
    object: &ClassificationLabel,
) -> Result<(), RelayError> {
    match viewer {
        Some(v) if policy.is_accessible(v, object) => Ok(()),
        _ => Err(RelayError::AccessDenied {
            viewer: viewer.map(ToString::to_string).unwrap_or_else(|| "<none>".into()),
            object: object.to_string(),
        }),
    }
}

/// Totally ordered policy: a viewer sees every level at or below its own.
///
/// Labels are compared after trimming and upper-casing. Labels outside the
/// configured list are never accessible, and viewers holding one see nothing.
#[derive(Clone, Debug)]
pub struct LevelPolicy {
    levels: Vec<String>,
}

impl LevelPolicy {
    /// Build from levels ordered least to most restrictive.
    pub fn new<I, S>(levels: I) -> Result<Self, RelayError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for level in levels {
            let level = normalize(level.as_ref());
            if level.is_empty() {
                return Err(RelayError::InvalidPolicy("empty level name".into()));
            }
            if normalized.contains(&level) {
                return Err(RelayError::InvalidPolicy(format!("duplicate level {level}")));
            }
            normalized.push(level);
        }
        if normalized.is_empty() {
            return Err(RelayError::InvalidPolicy("no levels configured".into()));
        }
        Ok(Self { levels: normalized })
    }

    /// The four TLP levels, WHITE through RED.
    pub fn tlp() -> Self {
        Self {
            levels: ["TLP:WHITE", "TLP:GREEN", "TLP:AMBER", "TLP:RED"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    fn rank(&self, label: &ClassificationLabel) -> Option<usize> {
        let wanted = normalize(label.as_str());
        self.levels.iter().position(|l| *l == wanted)
    }
}

impl AccessPolicy for LevelPolicy {
    fn is_accessible(&self, viewer: &ClassificationLabel, object: &ClassificationLabel) -> bool {
        match (self.rank(viewer), self.rank(object)) {
            (Some(v), Some(o)) => v >= o,
            _ => false,
        }
    }

    fn unrestricted(&self) -> ClassificationLabel {
        ClassificationLabel::new(self.levels[0].clone())
    }

    fn restricted(&self) -> ClassificationLabel {
        ClassificationLabel::new(self.levels[self.levels.len() - 1].clone())
    }
}

fn normalize(label: &str) -> String {
    label.trim().to_uppercase()
}
