//! Workflow synthesiser (spec §4.8.4, C11): LM-driven DAG plan generation
//! with full structural validation, falling back to the top-N candidate
//! path on any failure.

use std::collections::{HashMap, HashSet};

use agentbus_ports::{ChatMessage, ChatRequest, ChatRole, LanguageModel};
use agentbus_types::{ExecutionMode, Processor, TaskSpecification, WorkflowPlan, WorkflowStep};
use serde_json::{json, Value};
use uuid::Uuid;

const DESCRIPTION_TRUNCATE_CHARS: usize = 200;

/// Synthesises a multi-step plan over `healthy`, or returns `None` on any
/// LM, schema, or structural-validation failure — the caller then falls
/// back to the top-N candidate path (spec §4.8.4).
pub async fn synthesize_workflow(
    task_id: &str,
    spec: &TaskSpecification,
    healthy: &[Processor],
    lm: &dyn LanguageModel,
    model: &str,
) -> Option<WorkflowPlan> {
    let abridged: Vec<Value> = healthy
        .iter()
        .map(|p| {
            json!({
                "id": p.processor_id,
                "name": p.name,
                "description": truncate(&p.description, DESCRIPTION_TRUNCATE_CHARS),
                "inputKeys": p.input_schema.as_ref().and_then(object_keys).unwrap_or_default(),
                "outputKeys": p.output_schema.as_ref().and_then(object_keys).unwrap_or_default(),
            })
        })
        .collect();

    let data = json!({
        "taskId": task_id,
        "spec": spec,
        "processors": abridged,
    });
    let prompt = agentbus_prompts::format_prompt("workflow.synthesize", &data);

    let request = ChatRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::new(ChatRole::User, prompt)],
        tools: vec![],
        temperature: 0.1,
        max_tokens: 2048,
    };

    let response = match lm.chat(request).await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(error = %e, "workflow synthesis LM call failed, falling back to candidate list");
            return None;
        }
    };
    let text = response.text?;
    let raw: Value = serde_json::from_str(text.trim()).ok()?;

    let plan = parse_plan(task_id, &raw, healthy)?;

    let healthy_ids: HashSet<String> = healthy.iter().map(|p| p.processor_id.clone()).collect();
    if plan.validate(&healthy_ids).is_err() {
        tracing::debug!("workflow plan failed structural validation, falling back to candidate list");
        return None;
    }

    let mut plan = plan;
    plan.recompute_totals();
    Some(plan)
}

fn parse_plan(task_id: &str, raw: &Value, healthy: &[Processor]) -> Option<WorkflowPlan> {
    let obj = raw.as_object()?;
    let steps_raw = obj.get("steps")?.as_array()?;
    if steps_raw.is_empty() {
        return None;
    }

    let by_id: HashMap<&str, &Processor> = healthy.iter().map(|p| (p.processor_id.as_str(), p)).collect();

    let mut steps = Vec::with_capacity(steps_raw.len());
    for raw_step in steps_raw {
        let step_obj = raw_step.as_object()?;
        let step_id = step_obj.get("stepId")?.as_str()?.to_string();
        let description = step_obj
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let assigned_processor_id = step_obj.get("assignedProcessorId")?.as_str()?.to_string();
        let dependencies: Vec<String> = step_obj
            .get("dependencies")
            .and_then(Value::as_array)
            .map(|deps| deps.iter().filter_map(|d| d.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let processor = by_id.get(assigned_processor_id.as_str());
        let estimated_cost = processor.map(|p| p.pricing.price).unwrap_or(0.0);
        let estimated_duration_ms = processor.map(|p| p.average_execution_time_ms).unwrap_or(0.0);

        steps.push(WorkflowStep {
            step_id,
            description,
            assigned_processor_id,
            dependencies,
            input_mapping: step_obj.get("inputMapping").cloned(),
            output_mapping: step_obj.get("outputMapping").cloned(),
            estimated_cost,
            estimated_duration_ms,
        });
    }

    let execution_mode = match obj.get("executionMode").and_then(Value::as_str) {
        Some("parallel") => ExecutionMode::Parallel,
        _ => ExecutionMode::Sequential,
    };

    Some(WorkflowPlan {
        workflow_id: Uuid::new_v4().to_string(),
        task_id: task_id.to_string(),
        steps,
        execution_mode,
        total_estimated_cost: 0.0,
        total_estimated_duration_ms: 0.0,
        generated_at: chrono::Utc::now(),
    })
}

fn object_keys(value: &Value) -> Option<Vec<String>> {
    value.as_object().map(|m| m.keys().cloned().collect())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}…")
    }
}
