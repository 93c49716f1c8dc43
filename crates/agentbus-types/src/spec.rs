use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentBusError;

/// A structural shape descriptor for a named input/output (spec §3:
/// "inputs (mapping from name to shape descriptor)").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShapeDescriptor {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default)]
    pub required_platforms: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub competitors: BTreeSet<String>,
}

impl TaskConstraints {
    pub fn is_empty(&self) -> bool {
        self.budget.is_none()
            && self.deadline.is_none()
            && self.quality.is_none()
            && self.required_platforms.is_empty()
            && self.timeframe.is_none()
            && self.competitors.is_empty()
    }
}

/// The canonical result of clarification (spec §3 "Task specification").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpecification {
    pub description: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, ShapeDescriptor>,
    #[serde(default)]
    pub outputs: BTreeMap<String, ShapeDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<TaskConstraints>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub is_complex: bool,
}

impl TaskSpecification {
    /// Validates the invariants from spec §3 and §8 that are not already
    /// enforced by the type system: non-empty description, futurity of a
    /// present deadline, and tag normalisation.
    pub fn validate(&self) -> Result<(), AgentBusError> {
        if self.description.trim().is_empty() {
            return Err(AgentBusError::Validation(
                "task specification description must not be empty".into(),
            ));
        }
        if let Some(constraints) = &self.constraints {
            if let Some(deadline) = constraints.deadline {
                if deadline <= Utc::now() {
                    return Err(AgentBusError::Validation(
                        "task specification deadline must be strictly in the future".into(),
                    ));
                }
            }
        }
        for tag in &self.tags {
            if tag.is_empty() || tag != &tag.to_lowercase() {
                return Err(AgentBusError::Validation(format!(
                    "tag '{tag}' is not normalised (must be non-empty and lowercase)"
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Normalises a raw string list into a deduplicated, trimmed, lowercased,
/// non-empty set — spec §4.5 ("Tag/platform/competitor arrays are
/// normalised") and §8 ("Tag normalisation" invariant).
pub fn normalize_tag_set<I, S>(items: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
