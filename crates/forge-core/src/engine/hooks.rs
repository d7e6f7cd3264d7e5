//! Engine callback hooks: `onStepProgress`, `onPlanComplete`, `onError`.
//! Distinct from the [`crate::events::EventBus`] — hooks are the engine's
//! internal extension point (the orchestrator uses them to keep
//! `active_orchestrations` live), the event bus is the wire-facing
//! subscriber feed. Both fire off the same step/plan transitions.
//!
//! Each invocation runs in its own spawned task so a panicking hook cannot
//! take the engine down with it; a supervising task logs the panic instead
//! of propagating it.

use std::future::Future;

use async_trait::async_trait;

use crate::error::OrchestrationError;
use crate::model::{OrchestrationContext, TaskId};

use super::{PlanResult, StepResult};

#[async_trait]
pub trait EngineHooks: Send + Sync {
    async fn on_step_progress(&self, context: &OrchestrationContext, step_result: &StepResult);
    async fn on_plan_complete(&self, result: &PlanResult);
    async fn on_error(&self, task_id: TaskId, error: &OrchestrationError);
}

/// No-op hooks for standalone engine use and tests.
pub struct NoopHooks;

#[async_trait]
impl EngineHooks for NoopHooks {
    async fn on_step_progress(&self, _context: &OrchestrationContext, _step_result: &StepResult) {}
    async fn on_plan_complete(&self, _result: &PlanResult) {}
    async fn on_error(&self, _task_id: TaskId, _error: &OrchestrationError) {}
}

/// Run a hook body without blocking the caller; a panic inside is logged,
/// not propagated.
pub(super) fn spawn_hook(label: &'static str, fut: impl Future<Output = ()> + Send + 'static) {
    let handle = tokio::spawn(fut);
    tokio::spawn(async move {
        if let Err(e) = handle.await {
            tracing::warn!(hook = label, "engine hook panicked: {e}");
        }
    });
}
