//! Execution engine: ready-set scheduling over a step DAG, checkpoint/
//! restore, retry with backoff, cooperative cancellation, and the three
//! callback hooks.
//!
//! A DAG of independent steps runs under a [`tokio::sync::Semaphore`]-
//! bounded worker pool so ready steps fan out in parallel instead of
//! running one at a time.

mod checkpoint;
mod hooks;

pub use hooks::{EngineHooks, NoopHooks};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::model::{
    CheckpointId, ExecutionStep, OnFailure, OrchestrationContext, PlanId, StepId, StepState,
    TaskId,
};
use crate::tools::{ToolContext, ToolErrorDetail, ToolRegistry, ToolResult};

/// Process-wide worker budget. Composition roots construct one `Semaphore`
/// with this many permits and share it across every `ExecutionEngine` in
/// the process.
pub const DEFAULT_WORKER_POOL_CAPACITY: usize = 32;

/// Default per-plan fan-out, used unless a plan or caller overrides it.
pub const DEFAULT_MAX_PARALLEL_STEPS: usize = 4;

pub struct EngineConfig {
    pub max_parallel_steps: usize,
    /// Bounds the sum of step execution time for one plan. Exceeding it
    /// cancels remaining steps and terminates the plan as `cancelled`.
    pub plan_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: DEFAULT_MAX_PARALLEL_STEPS,
            plan_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Success,
    Partial,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: StepId,
    pub tool_name: String,
    pub state: StepState,
    pub attempts: u32,
    pub output: Option<serde_json::Value>,
    pub error: Option<ToolErrorDetail>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub task_id: TaskId,
    pub plan_id: PlanId,
    pub status: PlanStatus,
    pub step_results: Vec<StepResult>,
    pub total_execution_time_secs: f64,
}

struct StepOutcome {
    step_id: StepId,
    tool_name: String,
    state: StepState,
    attempts: u32,
    tool_result: ToolResult,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

pub struct ExecutionEngine {
    tool_registry: Arc<ToolRegistry>,
    worker_pool: Arc<Semaphore>,
    event_bus: Arc<EventBus>,
    hooks: Arc<dyn EngineHooks>,
}

impl ExecutionEngine {
    pub fn new(
        tool_registry: Arc<ToolRegistry>,
        worker_pool: Arc<Semaphore>,
        event_bus: Arc<EventBus>,
        hooks: Arc<dyn EngineHooks>,
    ) -> Self {
        Self {
            tool_registry,
            worker_pool,
            event_bus,
            hooks,
        }
    }

    /// Drive `context`'s plan to a terminal `PlanResult`. Blocks until the
    /// plan succeeds, fails, is cancelled, or times out; progress and the
    /// terminal event are published to `event_bus` as they occur.
    pub async fn run(
        &self,
        mut context: OrchestrationContext,
        working_dir: PathBuf,
        sandbox_root: Option<PathBuf>,
        config: &EngineConfig,
        cancel: CancellationToken,
    ) -> (OrchestrationContext, PlanResult) {
        let task_id = context.task_id;
        let total_steps = context.plan.steps.len();
        let max_parallel = context
            .plan
            .max_parallel_steps
            .unwrap_or(config.max_parallel_steps)
            .max(1);

        let steps_by_id: HashMap<StepId, ExecutionStep> = context
            .plan
            .steps
            .iter()
            .cloned()
            .map(|s| (s.step_id, s))
            .collect();
        let dependents_of = build_dependents_index(&context.plan.steps);

        let plan_start = tokio::time::Instant::now();
        let plan_deadline = config
            .plan_timeout_secs
            .map(|secs| plan_start + Duration::from_secs(secs));

        let mut join_set: JoinSet<StepOutcome> = JoinSet::new();
        let mut step_results: Vec<StepResult> = Vec::new();
        let mut aborting = false;
        let mut cancelled_flag = false;
        let mut any_non_idempotent_invoked = false;
        let mut succeeded_count = 0usize;
        let mut first_failure: Option<ToolErrorDetail> = None;

        loop {
            let timed_out = plan_deadline.is_some_and(|d| tokio::time::Instant::now() >= d);
            let cancelling = cancelled_flag || cancel.is_cancelled() || timed_out;
            if cancelling && !cancelled_flag {
                cancelled_flag = true;
                cancel.cancel();
            }

            if !cancelling && !aborting {
                self.admit_ready_steps(
                    &mut context,
                    &steps_by_id,
                    &mut join_set,
                    max_parallel,
                    &working_dir,
                    sandbox_root.as_deref(),
                    &cancel,
                    &mut any_non_idempotent_invoked,
                )
                .await;
            } else {
                let terminal_for_cancel = if cancelling {
                    StepState::Cancelled
                } else {
                    StepState::Skipped
                };
                for step in &context.plan.steps {
                    let st = context
                        .step_states
                        .get(&step.step_id)
                        .copied()
                        .unwrap_or(StepState::Pending);
                    if !st.is_terminal() && st != StepState::Running {
                        context.step_states.insert(step.step_id, terminal_for_cancel);
                    }
                }
            }

            if join_set.is_empty() {
                break;
            }

            if let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(outcome) => {
                        self.handle_outcome(
                            &mut context,
                            &mut step_results,
                            &dependents_of,
                            outcome,
                            &mut succeeded_count,
                            &mut first_failure,
                            &mut aborting,
                            any_non_idempotent_invoked,
                            total_steps,
                        )
                        .await;
                    }
                    Err(join_err) => {
                        tracing::error!("step task panicked: {join_err}");
                    }
                }
            }
        }

        let status = if cancelled_flag {
            PlanStatus::Cancelled
        } else if context.step_states.values().all(|s| s.is_success_terminal()) {
            PlanStatus::Success
        } else if aborting {
            PlanStatus::Failed
        } else {
            PlanStatus::Partial
        };

        let total_execution_time_secs = plan_start.elapsed().as_secs_f64();
        let plan_result = PlanResult {
            task_id,
            plan_id: context.plan.plan_id,
            status,
            step_results,
            total_execution_time_secs,
        };

        self.publish_terminal_event(&context, &plan_result, succeeded_count, total_steps, first_failure)
            .await;

        hooks::spawn_hook("on_plan_complete", {
            let hooks = self.hooks.clone();
            let result = plan_result.clone();
            async move { hooks.on_plan_complete(&result).await }
        });

        (context, plan_result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn admit_ready_steps(
        &self,
        context: &mut OrchestrationContext,
        steps_by_id: &HashMap<StepId, ExecutionStep>,
        join_set: &mut JoinSet<StepOutcome>,
        max_parallel: usize,
        working_dir: &std::path::Path,
        sandbox_root: Option<&std::path::Path>,
        cancel: &CancellationToken,
        any_non_idempotent_invoked: &mut bool,
    ) {
        let newly_ready: Vec<StepId> = context
            .plan
            .steps
            .iter()
            .filter(|s| matches!(context.step_states.get(&s.step_id), Some(StepState::Pending)))
            .filter(|s| {
                s.dependency_step_ids.iter().all(|dep| {
                    context
                        .step_states
                        .get(dep)
                        .is_some_and(|st| st.is_success_terminal())
                })
            })
            .map(|s| s.step_id)
            .collect();
        for id in newly_ready {
            context.step_states.insert(id, StepState::Ready);
        }

        let admit_candidates: Vec<StepId> = context
            .plan
            .steps
            .iter()
            .filter(|s| matches!(context.step_states.get(&s.step_id), Some(StepState::Ready)))
            .map(|s| s.step_id)
            .collect();

        for step_id in admit_candidates {
            if join_set.len() >= max_parallel {
                break;
            }
            let Ok(permit) = self.worker_pool.clone().try_acquire_owned() else {
                break;
            };
            let step = steps_by_id.get(&step_id).expect("ready step indexed").clone();

            if let Some(tool) = self.tool_registry.get(&step.tool_name).await {
                if !tool.descriptor().idempotent {
                    *any_non_idempotent_invoked = true;
                }
            }

            context.step_states.insert(step_id, StepState::Running);

            // One progress event on dispatch, one on completion (handled in
            // `handle_outcome`) — a step's internal retry attempts are not
            // individually observable on the event bus, only its start and
            // its terminal outcome are.
            let dispatch_progress = succeeded_so_far(&context.step_states);
            self.event_bus
                .publish(
                    context.task_id,
                    Event::Progress {
                        task_id: context.task_id,
                        step_id,
                        progress: dispatch_progress,
                        current_step_title: step.title.clone(),
                        total_steps: context.plan.steps.len(),
                        timestamp: Utc::now(),
                    },
                )
                .await;

            let mut tool_ctx = ToolContext::new(context.task_id, working_dir.to_path_buf());
            if let Some(root) = sandbox_root {
                tool_ctx = tool_ctx.with_sandbox(root.to_path_buf());
            }

            let registry = self.tool_registry.clone();
            let step_cancel = cancel.clone();
            join_set.spawn(run_step(registry, tool_ctx, step, step_cancel, permit));
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_outcome(
        &self,
        context: &mut OrchestrationContext,
        step_results: &mut Vec<StepResult>,
        dependents_of: &HashMap<StepId, Vec<StepId>>,
        outcome: StepOutcome,
        succeeded_count: &mut usize,
        first_failure: &mut Option<ToolErrorDetail>,
        aborting: &mut bool,
        any_non_idempotent_invoked: bool,
        total_steps: usize,
    ) {
        let step_title = context
            .plan
            .steps
            .iter()
            .find(|s| s.step_id == outcome.step_id)
            .map(|s| s.title.clone())
            .unwrap_or_default();
        let on_failure = context
            .plan
            .steps
            .iter()
            .find(|s| s.step_id == outcome.step_id)
            .map(|s| s.on_failure)
            .unwrap_or_default();

        let mut recorded_state = outcome.state;

        match outcome.state {
            StepState::Succeeded => {
                *succeeded_count += 1;
                context.step_states.insert(outcome.step_id, StepState::Succeeded);
                let cp = checkpoint::capture(
                    context,
                    Some(format!("after '{step_title}'")),
                    Some(outcome.step_id),
                    any_non_idempotent_invoked,
                );
                context.checkpoints.push(cp);
            }
            StepState::Failed => {
                if first_failure.is_none() {
                    *first_failure = outcome.tool_result.error.clone();
                }
                match on_failure {
                    OnFailure::SkipStep => {
                        recorded_state = StepState::Skipped;
                        context.step_states.insert(outcome.step_id, StepState::Skipped);
                    }
                    OnFailure::Continue => {
                        context.step_states.insert(outcome.step_id, StepState::Failed);
                        skip_dependents(context, dependents_of, outcome.step_id);
                    }
                    OnFailure::AbortPlan => {
                        context.step_states.insert(outcome.step_id, StepState::Failed);
                        *aborting = true;
                        for step in &context.plan.steps {
                            let st = context
                                .step_states
                                .get(&step.step_id)
                                .copied()
                                .unwrap_or(StepState::Pending);
                            if !st.is_terminal() && st != StepState::Running {
                                context.step_states.insert(step.step_id, StepState::Skipped);
                            }
                        }
                    }
                }
            }
            StepState::Cancelled => {
                context.step_states.insert(outcome.step_id, StepState::Cancelled);
            }
            other => unreachable!("run_step never returns {other:?}"),
        }

        let step_result = StepResult {
            step_id: outcome.step_id,
            tool_name: outcome.tool_name,
            state: recorded_state,
            attempts: outcome.attempts,
            output: outcome.tool_result.output.clone(),
            error: outcome.tool_result.error.clone(),
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
        };

        let progress = *succeeded_count as f32 / total_steps.max(1) as f32;
        self.event_bus
            .publish(
                context.task_id,
                Event::Progress {
                    task_id: context.task_id,
                    step_id: step_result.step_id,
                    progress,
                    current_step_title: step_title,
                    total_steps,
                    timestamp: Utc::now(),
                },
            )
            .await;

        hooks::spawn_hook("on_step_progress", {
            let hooks = self.hooks.clone();
            let ctx_snapshot = context.clone();
            let sr = step_result.clone();
            async move { hooks.on_step_progress(&ctx_snapshot, &sr).await }
        });

        step_results.push(step_result);
    }

    async fn publish_terminal_event(
        &self,
        context: &OrchestrationContext,
        plan_result: &PlanResult,
        succeeded_count: usize,
        total_steps: usize,
        first_failure: Option<ToolErrorDetail>,
    ) {
        match plan_result.status {
            PlanStatus::Failed => {
                let error = first_failure
                    .map(|e| e.message)
                    .unwrap_or_else(|| "plan aborted".to_string());
                self.event_bus
                    .publish(
                        context.task_id,
                        Event::Failure {
                            task_id: context.task_id,
                            error,
                            context: format!("{:?} plan '{}'", context.plan.strategy, context.plan.title),
                            timestamp: Utc::now(),
                        },
                    )
                    .await;
            }
            _ => {
                let success_rate = if total_steps == 0 {
                    1.0
                } else {
                    succeeded_count as f32 / total_steps as f32
                };
                let summary = format!(
                    "{succeeded_count}/{total_steps} steps succeeded ({:?})",
                    plan_result.status
                );
                self.event_bus
                    .publish(
                        context.task_id,
                        Event::Completion {
                            task_id: context.task_id,
                            success_rate,
                            total_execution_time_secs: plan_result.total_execution_time_secs,
                            summary,
                            timestamp: Utc::now(),
                        },
                    )
                    .await;
            }
        }
    }

    /// Rewind `context` to a prior checkpoint. Valid only when the caller
    /// holds no in-flight `run()` for this task — the engine itself does
    /// not track "currently running"; the orchestrator's
    /// `active_orchestrations` membership is the source of truth for that.
    pub fn restore_checkpoint(
        &self,
        context: &mut OrchestrationContext,
        checkpoint_id: CheckpointId,
        acknowledge_non_idempotent: bool,
    ) -> Result<()> {
        let found = context
            .checkpoints
            .iter()
            .find(|c| c.checkpoint_id == checkpoint_id)
            .cloned()
            .ok_or_else(|| {
                crate::error::OrchestrationError::Validation(format!(
                    "unknown checkpoint {checkpoint_id}"
                ))
            })?;
        checkpoint::restore(context, &found, acknowledge_non_idempotent)
    }
}

fn succeeded_so_far(step_states: &HashMap<StepId, StepState>) -> f32 {
    let total = step_states.len().max(1) as f32;
    let done = step_states.values().filter(|s| s.is_success_terminal()).count() as f32;
    done / total
}

fn build_dependents_index(steps: &[ExecutionStep]) -> HashMap<StepId, Vec<StepId>> {
    let mut index: HashMap<StepId, Vec<StepId>> = HashMap::new();
    for step in steps {
        for dep in &step.dependency_step_ids {
            index.entry(*dep).or_default().push(step.step_id);
        }
    }
    index
}

fn skip_dependents(
    context: &mut OrchestrationContext,
    dependents_of: &HashMap<StepId, Vec<StepId>>,
    failed: StepId,
) {
    let mut stack = vec![failed];
    while let Some(id) = stack.pop() {
        let Some(deps) = dependents_of.get(&id) else {
            continue;
        };
        for &dep_id in deps {
            let st = context
                .step_states
                .get(&dep_id)
                .copied()
                .unwrap_or(StepState::Pending);
            if !st.is_terminal() {
                context.step_states.insert(dep_id, StepState::Skipped);
                stack.push(dep_id);
            }
        }
    }
}

/// Run one step to a terminal outcome, retrying idempotent tool failures
/// with exponential backoff up to `step.max_retries`. Held for its
/// lifetime, `_permit` releases the worker-pool slot on drop.
async fn run_step(
    registry: Arc<ToolRegistry>,
    tool_ctx: ToolContext,
    step: ExecutionStep,
    cancel: CancellationToken,
    _permit: OwnedSemaphorePermit,
) -> StepOutcome {
    let started_at = Utc::now();
    let idempotent = registry
        .get(&step.tool_name)
        .await
        .map(|t| t.descriptor().idempotent)
        .unwrap_or(false);

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let result = match registry
            .execute(&step.tool_name, step.params.clone(), &tool_ctx, cancel.clone())
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return StepOutcome {
                    step_id: step.step_id,
                    tool_name: step.tool_name,
                    state: StepState::Failed,
                    attempts: attempt,
                    tool_result: ToolResult::error("Internal", e.to_string()),
                    started_at,
                    finished_at: Utc::now(),
                };
            }
        };

        if result.success {
            return StepOutcome {
                step_id: step.step_id,
                tool_name: step.tool_name,
                state: StepState::Succeeded,
                attempts: attempt,
                tool_result: result,
                started_at,
                finished_at: Utc::now(),
            };
        }

        let code = result.error.as_ref().map(|e| e.code.as_str()).unwrap_or("");
        if code == "Cancelled" {
            return StepOutcome {
                step_id: step.step_id,
                tool_name: step.tool_name,
                state: StepState::Cancelled,
                attempts: attempt,
                tool_result: result,
                started_at,
                finished_at: Utc::now(),
            };
        }

        let retryable = code != "ValidationError" && idempotent && attempt <= step.max_retries;
        if !retryable {
            return StepOutcome {
                step_id: step.step_id,
                tool_name: step.tool_name,
                state: StepState::Failed,
                attempts: attempt,
                tool_result: result,
                started_at,
                finished_at: Utc::now(),
            };
        }

        let backoff = Duration::from_millis(250 * 2u64.pow(attempt.saturating_sub(1)));
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = cancel.cancelled() => {
                return StepOutcome {
                    step_id: step.step_id,
                    tool_name: step.tool_name,
                    state: StepState::Cancelled,
                    attempts: attempt,
                    tool_result: ToolResult::cancelled(),
                    started_at,
                    finished_at: Utc::now(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionPlan, ExecutionStep, ParamSpec, ParamType, PlanStrategy, SideEffectClass, ToolDescriptor};
    use async_trait::async_trait;

    struct AlwaysSucceed(ToolDescriptor);

    #[async_trait]
    impl crate::tools::Tool for AlwaysSucceed {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.0
        }
        async fn invoke(&self, params: serde_json::Value, _ctx: &ToolContext, _cancel: CancellationToken) -> ToolResult {
            ToolResult::success(params)
        }
    }

    struct AlwaysFail(ToolDescriptor);

    #[async_trait]
    impl crate::tools::Tool for AlwaysFail {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.0
        }
        async fn invoke(&self, _params: serde_json::Value, _ctx: &ToolContext, _cancel: CancellationToken) -> ToolResult {
            ToolResult::error("ToolError", "always fails")
        }
    }

    fn descriptor(name: &str, idempotent: bool) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: "test".to_string(),
            params: vec![ParamSpec { name: "x".to_string(), param_type: ParamType::String, required: false }],
            side_effects: SideEffectClass::ReadOnly,
            idempotent,
            max_timeout_secs: 5,
        }
    }

    async fn engine_with(registry: ToolRegistry) -> (ExecutionEngine, Arc<EventBus>) {
        let registry = Arc::new(registry);
        let event_bus = Arc::new(EventBus::new());
        let engine = ExecutionEngine::new(
            registry,
            Arc::new(Semaphore::new(DEFAULT_WORKER_POOL_CAPACITY)),
            event_bus.clone(),
            Arc::new(NoopHooks),
        );
        (engine, event_bus)
    }

    fn plan_with_steps(steps: Vec<ExecutionStep>) -> ExecutionPlan {
        let task_id = TaskId::new();
        ExecutionPlan {
            plan_id: PlanId::new(),
            task_id,
            title: "test plan".to_string(),
            steps,
            strategy: PlanStrategy::General,
            total_estimated_duration_secs: 10,
            complexity_score: 0.1,
            success_probability: 1.0,
            risk_factors: Vec::new(),
            prerequisites: Vec::new(),
            required_tools: Vec::new(),
            max_parallel_steps: None,
        }
    }

    #[tokio::test]
    async fn dependency_graph_runs_to_success() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(AlwaysSucceed(descriptor("ok", true)))).await.unwrap();
        let (engine, _bus) = engine_with(registry).await;

        let a = ExecutionStep::new("A", "ok");
        let mut b = ExecutionStep::new("B", "ok");
        b.dependency_step_ids.push(a.step_id);
        let mut c = ExecutionStep::new("C", "ok");
        c.dependency_step_ids.push(a.step_id);
        let plan = plan_with_steps(vec![a, b, c]);
        let task_id = plan.task_id;
        let context = OrchestrationContext::new(plan);

        let (final_ctx, result) = engine
            .run(context, PathBuf::from("/tmp"), None, &EngineConfig::default(), CancellationToken::new())
            .await;

        assert_eq!(result.status, PlanStatus::Success);
        assert_eq!(final_ctx.task_id, task_id);
        assert!(final_ctx.step_states.values().all(|s| *s == StepState::Succeeded));
    }

    #[tokio::test]
    async fn non_idempotent_failure_aborts_plan_by_default() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(AlwaysFail(descriptor("bad", false)))).await.unwrap();
        let (engine, _bus) = engine_with(registry).await;

        let a = ExecutionStep::new("A", "bad");
        let mut b = ExecutionStep::new("B", "bad");
        b.dependency_step_ids.push(a.step_id);
        let plan = plan_with_steps(vec![a, b]);
        let context = OrchestrationContext::new(plan);

        let (final_ctx, result) = engine
            .run(context, PathBuf::from("/tmp"), None, &EngineConfig::default(), CancellationToken::new())
            .await;

        assert_eq!(result.status, PlanStatus::Failed);
        assert_eq!(result.step_results.len(), 1);
        assert!(final_ctx.step_states.values().any(|s| *s == StepState::Skipped));
    }

    #[tokio::test]
    async fn skip_step_policy_lets_dependents_proceed() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(AlwaysFail(descriptor("bad", false)))).await.unwrap();
        registry.register(Arc::new(AlwaysSucceed(descriptor("ok", true)))).await.unwrap();
        let (engine, _bus) = engine_with(registry).await;

        let mut a = ExecutionStep::new("A", "bad");
        a.on_failure = OnFailure::SkipStep;
        let mut b = ExecutionStep::new("B", "ok");
        b.dependency_step_ids.push(a.step_id);
        let plan = plan_with_steps(vec![a, b]);
        let context = OrchestrationContext::new(plan);

        let (final_ctx, result) = engine
            .run(context, PathBuf::from("/tmp"), None, &EngineConfig::default(), CancellationToken::new())
            .await;

        assert_eq!(result.status, PlanStatus::Success);
        assert!(final_ctx.step_states.values().all(|s| s.is_success_terminal()));
    }

    #[tokio::test]
    async fn cancellation_mid_flight_skips_remaining_steps() {
        struct Slow(ToolDescriptor);
        #[async_trait]
        impl crate::tools::Tool for Slow {
            fn descriptor(&self) -> &ToolDescriptor {
                &self.0
            }
            async fn invoke(&self, params: serde_json::Value, _ctx: &ToolContext, cancel: CancellationToken) -> ToolResult {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(30)) => ToolResult::success(params),
                    _ = cancel.cancelled() => ToolResult::cancelled(),
                }
            }
        }

        let registry = ToolRegistry::new();
        registry.register(Arc::new(Slow(descriptor("slow", true)))).await.unwrap();
        let (engine, _bus) = engine_with(registry).await;

        let a = ExecutionStep::new("A", "slow");
        let plan = plan_with_steps(vec![a]);
        let context = OrchestrationContext::new(plan);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let (_ctx, result) = engine
            .run(context, PathBuf::from("/tmp"), None, &EngineConfig::default(), cancel)
            .await;

        assert_eq!(result.status, PlanStatus::Cancelled);
    }
}
