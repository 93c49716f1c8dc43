//! Spec formatter (spec §4.5, C5): projects extracted dialogue parameters
//! into the canonical `TaskSpecification`.

use std::collections::{BTreeMap, BTreeSet};

use agentbus_types::{
    normalize_tag_set, AgentBusError, ExtractedParams, ShapeDescriptor, TaskConstraints,
    TaskSpecification,
};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// `formatSpec(params) -> TaskSpecification` (spec §4.5). Pure and
/// deterministic given equal inputs (spec §8).
pub fn format_spec(params: &ExtractedParams) -> Result<TaskSpecification, AgentBusError> {
    let description = params
        .refined_description
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| params.initial_description.clone().filter(|s| !s.trim().is_empty()))
        .unwrap_or_else(|| "No description provided.".to_string());

    let inputs = coerce_shape_mapping(&params.inputs)?;
    let outputs = coerce_shape_mapping(&params.outputs)?;

    let budget = params
        .budget
        .as_ref()
        .and_then(parse_budget)
        .filter(|b| *b > 0.0);

    let deadline = params.deadline.as_ref().and_then(parse_deadline);

    let quality = params.quality.as_ref().map(|q| q.to_lowercase());

    let platforms = normalize_tag_set(&params.required_platforms);
    let competitors = normalize_tag_set(&params.competitors);

    let constraints = if budget.is_none()
        && deadline.is_none()
        && quality.is_none()
        && platforms.is_empty()
        && competitors.is_empty()
        && params.timeframe.is_none()
    {
        None
    } else {
        Some(TaskConstraints {
            budget,
            deadline,
            quality: quality.clone(),
            required_platforms: platforms.clone(),
            timeframe: params.timeframe.clone(),
            competitors: competitors.clone(),
        })
    };

    let mut tags: BTreeSet<String> = params.tags.clone();
    tags.extend(platforms.iter().map(|p| format!("platform:{p}")));
    tags.extend(competitors.iter().map(|c| format!("competitor:{c}")));
    let tags = normalize_tag_set(&tags);

    let is_complex = params.is_complex_hint.unwrap_or_else(|| {
        platforms.len() > 1
            || quality.is_some()
            || !competitors.is_empty()
            || inputs.len() > 1
            || outputs.len() > 1
    });

    let spec = TaskSpecification {
        description,
        inputs,
        outputs,
        constraints,
        tags,
        is_complex,
    };
    spec.validate()?;
    Ok(spec)
}

/// Coerces a raw JSON value into a name -> shape-descriptor mapping (spec
/// §4.5: "`inputs/outputs` coerced to mappings (reject arrays)").
fn coerce_shape_mapping(value: &Value) -> Result<BTreeMap<String, ShapeDescriptor>, AgentBusError> {
    match value {
        Value::Null => Ok(BTreeMap::new()),
        Value::Array(_) => Err(AgentBusError::Validation(
            "inputs/outputs must be an object mapping, not an array".into(),
        )),
        Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (name, shape) in map {
                let descriptor = match shape {
                    Value::String(type_name) => ShapeDescriptor {
                        type_name: type_name.clone(),
                        description: None,
                    },
                    Value::Object(obj) => ShapeDescriptor {
                        type_name: obj
                            .get("type")
                            .and_then(Value::as_str)
                            .unwrap_or("string")
                            .to_string(),
                        description: obj.get("description").and_then(Value::as_str).map(str::to_string),
                    },
                    _ => ShapeDescriptor {
                        type_name: "string".to_string(),
                        description: None,
                    },
                };
                out.insert(name.clone(), descriptor);
            }
            Ok(out)
        }
        _ => Err(AgentBusError::Validation(
            "inputs/outputs must be an object mapping".into(),
        )),
    }
}

/// Parses a budget from a number or a number-with-currency string, e.g.
/// `"$500"` or `"500 USD"` (spec §4.5). Negative or zero is handled by the
/// caller, which drops it.
fn parse_budget(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let digits: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            digits.parse::<f64>().ok()
        }
        _ => None,
    }
}

/// Parses a deadline from a `Date`-ish value: an RFC3339 string, an epoch
/// millisecond number, or an already-structured timestamp — keeping it
/// only if strictly in the future (spec §4.5, §8 "Deadline futurity").
fn parse_deadline(value: &Value) -> Option<DateTime<Utc>> {
    let parsed = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| DateTime::from_timestamp_millis(ms)),
        _ => None,
    }?;
    if parsed > Utc::now() {
        Some(parsed)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn base_params() -> ExtractedParams {
        ExtractedParams {
            initial_description: Some("Build a landing page".into()),
            ..Default::default()
        }
    }

    #[test]
    fn falls_back_through_description_chain() {
        let mut params = ExtractedParams::default();
        let spec = format_spec(&params).unwrap();
        assert_eq!(spec.description, "No description provided.");

        params.initial_description = Some("initial one".into());
        let spec = format_spec(&params).unwrap();
        assert_eq!(spec.description, "initial one");

        params.refined_description = Some("refined one".into());
        let spec = format_spec(&params).unwrap();
        assert_eq!(spec.description, "refined one");
    }

    #[test]
    fn rejects_array_inputs() {
        let mut params = base_params();
        params.inputs = json!(["not", "a", "map"]);
        assert!(format_spec(&params).is_err());
    }

    #[test]
    fn negative_or_zero_budget_is_dropped() {
        let mut params = base_params();
        params.budget = Some(json!(-5));
        let spec = format_spec(&params).unwrap();
        assert!(spec.constraints.is_none());

        params.budget = Some(json!(0));
        let spec = format_spec(&params).unwrap();
        assert!(spec.constraints.is_none());
    }

    #[test]
    fn budget_parses_currency_string() {
        let mut params = base_params();
        params.budget = Some(json!("$1,500.50"));
        let spec = format_spec(&params).unwrap();
        let budget = spec.constraints.unwrap().budget.unwrap();
        assert!((budget - 1500.50).abs() < 0.01);
    }

    #[test]
    fn past_deadline_is_silently_dropped() {
        let mut params = base_params();
        let past = Utc::now() - Duration::days(1);
        params.deadline = Some(json!(past.to_rfc3339()));
        let spec = format_spec(&params).unwrap();
        assert!(spec.constraints.is_none());
    }

    #[test]
    fn future_deadline_is_kept() {
        let mut params = base_params();
        let future = Utc::now() + Duration::days(10);
        params.deadline = Some(json!(future.to_rfc3339()));
        let spec = format_spec(&params).unwrap();
        assert!(spec.constraints.unwrap().deadline.is_some());
    }

    #[test]
    fn tags_absorb_prefixed_platforms_and_competitors() {
        let mut params = base_params();
        params.required_platforms = vec!["Web".into(), "iOS".into()];
        params.competitors = vec!["Linear".into()];
        let spec = format_spec(&params).unwrap();
        assert!(spec.tags.contains("platform:web"));
        assert!(spec.tags.contains("platform:ios"));
        assert!(spec.tags.contains("competitor:linear"));
    }

    #[test]
    fn is_complex_heuristic_multiple_platforms() {
        let mut params = base_params();
        params.required_platforms = vec!["web".into(), "ios".into()];
        let spec = format_spec(&params).unwrap();
        assert!(spec.is_complex);
    }

    #[test]
    fn is_complex_explicit_hint_overrides_heuristic() {
        let mut params = base_params();
        params.is_complex_hint = Some(false);
        params.required_platforms = vec!["web".into(), "ios".into()];
        let spec = format_spec(&params).unwrap();
        assert!(!spec.is_complex);
    }

    #[test]
    fn simple_single_platform_single_io_is_not_complex() {
        let params = base_params();
        let spec = format_spec(&params).unwrap();
        assert!(!spec.is_complex);
    }
}
