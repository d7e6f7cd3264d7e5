//! Checkpoint capture/restore. A checkpoint flattens the three variable
//! scopes (`global`, `task`, `step`) into one prefixed map so it round-trips
//! through the `Checkpoint` model type without adding scope-specific
//! fields; `apply_checkpoint` reverses the flattening.

use std::collections::HashMap;

use chrono::Utc;

use crate::error::{OrchestrationError, Result};
use crate::model::{Checkpoint, CheckpointId, OrchestrationContext, StepId};

fn flatten_vars(context: &OrchestrationContext) -> HashMap<String, serde_json::Value> {
    let mut flat = HashMap::new();
    for (k, v) in &context.global_vars {
        flat.insert(format!("global::{k}"), v.clone());
    }
    for (k, v) in &context.task_vars {
        flat.insert(format!("task::{k}"), v.clone());
    }
    for (step_id, vars) in &context.step_vars {
        for (k, v) in vars {
            flat.insert(format!("step::{step_id}::{k}"), v.clone());
        }
    }
    flat
}

fn unflatten_vars(
    flat: &HashMap<String, serde_json::Value>,
) -> Result<(
    HashMap<String, serde_json::Value>,
    HashMap<String, serde_json::Value>,
    HashMap<StepId, HashMap<String, serde_json::Value>>,
)> {
    let mut global = HashMap::new();
    let mut task = HashMap::new();
    let mut step: HashMap<StepId, HashMap<String, serde_json::Value>> = HashMap::new();

    for (key, value) in flat {
        if let Some(rest) = key.strip_prefix("global::") {
            global.insert(rest.to_string(), value.clone());
        } else if let Some(rest) = key.strip_prefix("task::") {
            task.insert(rest.to_string(), value.clone());
        } else if let Some(rest) = key.strip_prefix("step::") {
            let (step_id_str, var_key) = rest.split_once("::").ok_or_else(|| {
                OrchestrationError::Internal(format!("malformed checkpoint step key '{key}'"))
            })?;
            let step_id: StepId = step_id_str
                .parse()
                .map_err(|e| OrchestrationError::Internal(format!("bad checkpoint step id: {e}")))?;
            step.entry(step_id).or_default().insert(var_key.to_string(), value.clone());
        } else {
            return Err(OrchestrationError::Internal(format!(
                "unrecognized checkpoint variable key '{key}'"
            )));
        }
    }

    Ok((global, task, step))
}

pub fn capture(
    context: &OrchestrationContext,
    description: Option<String>,
    creating_step_id: Option<StepId>,
    crosses_non_idempotent_step: bool,
) -> Checkpoint {
    Checkpoint {
        checkpoint_id: CheckpointId::new(),
        description,
        creating_step_id,
        timestamp: Utc::now(),
        variables: flatten_vars(context),
        step_states: context.step_states.clone(),
        crosses_non_idempotent_step,
    }
}

/// Rewind `context` to `checkpoint`. Caller must have already verified no
/// step is currently running — `restoreCheckpoint` is only valid then.
///
/// Rejected unless `acknowledge_non_idempotent` is set when the checkpoint
/// crosses a non-idempotent step — replaying such a step (e.g. a write
/// that already happened) silently would be unsafe.
pub fn restore(
    context: &mut OrchestrationContext,
    checkpoint: &Checkpoint,
    acknowledge_non_idempotent: bool,
) -> Result<()> {
    if checkpoint.crosses_non_idempotent_step && !acknowledge_non_idempotent {
        return Err(OrchestrationError::Validation(format!(
            "checkpoint {} crosses a non-idempotent step; restoring it requires \
             acknowledge_non_idempotent: true",
            checkpoint.checkpoint_id
        )));
    }

    let (global, task, step) = unflatten_vars(&checkpoint.variables)?;
    context.global_vars = global;
    context.task_vars = task;
    context.step_vars = step;
    context.step_states = checkpoint.step_states.clone();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionPlan, PlanId, PlanStrategy, TaskId};

    fn empty_context() -> OrchestrationContext {
        let plan = ExecutionPlan {
            plan_id: PlanId::new(),
            task_id: TaskId::new(),
            title: "test plan".to_string(),
            steps: Vec::new(),
            strategy: PlanStrategy::General,
            total_estimated_duration_secs: 0,
            complexity_score: 0.0,
            success_probability: 1.0,
            risk_factors: Vec::new(),
            prerequisites: Vec::new(),
            required_tools: Vec::new(),
            max_parallel_steps: None,
        };
        OrchestrationContext::new(plan)
    }

    #[test]
    fn restore_over_non_idempotent_step_requires_acknowledgment() {
        let mut context = empty_context();
        let checkpoint = capture(&context, None, None, true);

        let err = restore(&mut context, &checkpoint, false).unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(_)));
    }

    #[test]
    fn restore_over_non_idempotent_step_succeeds_when_acknowledged() {
        let mut context = empty_context();
        context.global_vars.insert("k".to_string(), serde_json::json!("v"));
        let checkpoint = capture(&context, None, None, true);

        context.global_vars.clear();
        restore(&mut context, &checkpoint, true).unwrap();
        assert_eq!(context.global_vars.get("k"), Some(&serde_json::json!("v")));
    }

    #[test]
    fn restore_over_idempotent_only_steps_never_needs_acknowledgment() {
        let mut context = empty_context();
        let checkpoint = capture(&context, None, None, false);

        restore(&mut context, &checkpoint, false).unwrap();
    }
}
