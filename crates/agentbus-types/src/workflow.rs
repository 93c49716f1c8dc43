use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentBusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

/// A step within a [`WorkflowPlan`] (spec §3 "step").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub step_id: String,
    pub description: String,
    pub assigned_processor_id: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_mapping: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_mapping: Option<Value>,
    pub estimated_cost: f64,
    pub estimated_duration_ms: f64,
}

/// `{workflowId, taskId, steps[], executionMode, totalEstimatedCost,
/// totalEstimatedDurationMs, generatedAt}` (spec §3 "Workflow plan").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPlan {
    pub workflow_id: String,
    pub task_id: String,
    pub steps: Vec<WorkflowStep>,
    pub execution_mode: ExecutionMode,
    pub total_estimated_cost: f64,
    pub total_estimated_duration_ms: f64,
    pub generated_at: DateTime<Utc>,
}

impl WorkflowPlan {
    /// Validates the invariants from spec §3 and §8: at least one step,
    /// unique step-ids, dependency closure over in-plan steps, acyclicity,
    /// and candidate-pool closure over `healthy_candidate_ids`.
    pub fn validate(&self, healthy_candidate_ids: &HashSet<String>) -> Result<(), AgentBusError> {
        if self.steps.is_empty() {
            return Err(AgentBusError::Validation(
                "workflow plan must contain at least one step".into(),
            ));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_id.as_str()) {
                return Err(AgentBusError::Validation(format!(
                    "duplicate step id '{}'",
                    step.step_id
                )));
            }
        }

        for step in &self.steps {
            if !healthy_candidate_ids.contains(&step.assigned_processor_id) {
                return Err(AgentBusError::Validation(format!(
                    "step '{}' assigns processor '{}' which is not in the healthy candidate pool",
                    step.step_id, step.assigned_processor_id
                )));
            }
            for dep in &step.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(AgentBusError::Validation(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.step_id, dep
                    )));
                }
            }
        }

        self.check_acyclic()?;
        Ok(())
    }

    fn check_acyclic(&self) -> Result<(), AgentBusError> {
        let by_id: HashMap<&str, &WorkflowStep> =
            self.steps.iter().map(|s| (s.step_id.as_str(), s)).collect();

        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<&str, Mark> = HashMap::new();

        fn visit<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a WorkflowStep>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<(), AgentBusError> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(AgentBusError::Validation(format!(
                        "workflow plan dependency graph has a cycle through '{id}'"
                    )))
                }
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(step) = by_id.get(id) {
                for dep in &step.dependencies {
                    visit(dep, by_id, marks)?;
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for step in &self.steps {
            visit(&step.step_id, &by_id, &mut marks)?;
        }
        Ok(())
    }

    pub fn recompute_totals(&mut self) {
        self.total_estimated_cost = self.steps.iter().map(|s| s.estimated_cost).sum();
        self.total_estimated_duration_ms = match self.execution_mode {
            ExecutionMode::Sequential => self.steps.iter().map(|s| s.estimated_duration_ms).sum(),
            ExecutionMode::Parallel => self
                .steps
                .iter()
                .map(|s| s.estimated_duration_ms)
                .fold(0.0, f64::max),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, proc: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep {
            step_id: id.into(),
            description: format!("step {id}"),
            assigned_processor_id: proc.into(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            input_mapping: None,
            output_mapping: None,
            estimated_cost: 1.0,
            estimated_duration_ms: 1000.0,
        }
    }

    fn plan(steps: Vec<WorkflowStep>, mode: ExecutionMode) -> WorkflowPlan {
        WorkflowPlan {
            workflow_id: "wf1".into(),
            task_id: "t1".into(),
            steps,
            execution_mode: mode,
            total_estimated_cost: 0.0,
            total_estimated_duration_ms: 0.0,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn rejects_unknown_dependency() {
        let p = plan(vec![step("s1", "p1", &["s9"])], ExecutionMode::Sequential);
        let pool: std::collections::HashSet<String> = ["p1".to_string()].into();
        assert!(p.validate(&pool).is_err());
    }

    #[test]
    fn rejects_processor_outside_pool() {
        let p = plan(vec![step("s1", "pX", &[])], ExecutionMode::Sequential);
        let pool: std::collections::HashSet<String> = ["p1".to_string()].into();
        assert!(p.validate(&pool).is_err());
    }

    #[test]
    fn rejects_cycle() {
        let p = plan(
            vec![step("s1", "p1", &["s2"]), step("s2", "p1", &["s1"])],
            ExecutionMode::Sequential,
        );
        let pool: std::collections::HashSet<String> = ["p1".to_string()].into();
        assert!(p.validate(&pool).is_err());
    }

    #[test]
    fn accepts_valid_dag() {
        let p = plan(
            vec![step("s1", "p1", &[]), step("s2", "p2", &["s1"])],
            ExecutionMode::Sequential,
        );
        let pool: std::collections::HashSet<String> = ["p1".to_string(), "p2".to_string()].into();
        assert!(p.validate(&pool).is_ok());
    }

    #[test]
    fn totals_sequential_sums_durations() {
        let mut p = plan(
            vec![step("s1", "p1", &[]), step("s2", "p2", &["s1"])],
            ExecutionMode::Sequential,
        );
        p.recompute_totals();
        assert_eq!(p.total_estimated_duration_ms, 2000.0);
        assert_eq!(p.total_estimated_cost, 2.0);
    }

    #[test]
    fn totals_parallel_takes_max_duration() {
        let mut p = plan(
            vec![step("s1", "p1", &[]), step("s2", "p2", &[])],
            ExecutionMode::Parallel,
        );
        p.recompute_totals();
        assert_eq!(p.total_estimated_duration_ms, 1000.0);
    }
}
