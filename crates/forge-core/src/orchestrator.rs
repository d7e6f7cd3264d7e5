//! Top-level orchestrator: the state machine that drives one task through
//! `submitted → classified → (chat_answer | planning) → plan_ready →
//! executing → {succeeded|failed|cancelled} → recorded`.
//!
//! Wires together the `classifier`, `planner`, `ExecutionEngine`,
//! `MemoryManager`, and `EventBus` around a top-level driving loop, with an
//! in-process bounded `orchestration_history` ring in place of unbounded
//! conversation history.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::ai::LLMClient;
use crate::classifier::{self, ClassificationResult, SearchMode};
use crate::config::Config;
use crate::engine::{
    EngineConfig, EngineHooks, ExecutionEngine, PlanResult, PlanStatus, StepResult,
};
use crate::error::{OrchestrationError, Result};
use crate::events::EventBus;
use crate::memory::{MemoryManager, MemoryQueryType};
use crate::model::{
    Complexity, Episode, EpisodeId, ExecutionPlan, ExecutionStep, OrchestrationContext, PlanId,
    PlanStrategy, StepState, Task, TaskId,
};
use crate::planner;
use crate::storage::SnapshotStore;
use crate::tools::ToolRegistry;

const HISTORY_CAPACITY: usize = 500;
const RETRIEVAL_MAX_RESULTS: usize = 5;

/// Per-task lifecycle phase. `Submitted` through `PlanReady` precede any
/// `OrchestrationContext`; `Executing` onward has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    Submitted,
    Classified,
    Planning,
    PlanReady,
    Executing,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome")]
pub enum OrchestrationOutcome {
    ChatAnswer { message: String },
    Executed(PlanResult),
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    pub task_id: TaskId,
    pub outcome: OrchestrationOutcome,
}

/// Snapshot returned by `get_status` — a point-in-time view of a live or
/// just-completed orchestration.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationStatusView {
    pub task_id: TaskId,
    pub status: OrchestrationStatus,
    pub progress: f32,
    pub current_step_title: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestrationMetrics {
    pub total_orchestrations: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub chat_answers: u64,
    pub active: usize,
}

struct LiveEntry {
    status: RwLock<OrchestrationStatus>,
    context: RwLock<Option<OrchestrationContext>>,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

/// Engine hooks that keep `active_orchestrations` live: every
/// `on_step_progress` call replaces the tracked context with the engine's
/// latest snapshot, so `get_status` reflects in-flight progress without
/// the orchestrator polling the engine itself.
struct ActiveHooks {
    active: Arc<RwLock<HashMap<TaskId, Arc<LiveEntry>>>>,
}

#[async_trait]
impl EngineHooks for ActiveHooks {
    async fn on_step_progress(&self, context: &OrchestrationContext, _step_result: &StepResult) {
        let active = self.active.read().await;
        if let Some(entry) = active.get(&context.task_id) {
            *entry.context.write().await = Some(context.clone());
        }
    }

    async fn on_plan_complete(&self, _result: &PlanResult) {}

    async fn on_error(&self, _task_id: TaskId, _error: &OrchestrationError) {}
}

/// Composition root for one orchestrator instance: holds every
/// collaborating subsystem plus the live/historical task-tracking state.
pub struct Orchestrator {
    tool_registry: Arc<ToolRegistry>,
    memory: Arc<MemoryManager>,
    llm: Arc<dyn LLMClient>,
    event_bus: Arc<EventBus>,
    worker_pool: Arc<Semaphore>,
    hooks: Arc<dyn EngineHooks>,
    config: Config,
    snapshot_store: Option<Arc<SnapshotStore>>,
    active: Arc<RwLock<HashMap<TaskId, Arc<LiveEntry>>>>,
    history: RwLock<VecDeque<PlanResult>>,
    metrics: RwLock<OrchestrationMetrics>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tool_registry: Arc<ToolRegistry>,
        memory: Arc<MemoryManager>,
        llm: Arc<dyn LLMClient>,
        event_bus: Arc<EventBus>,
        worker_pool: Arc<Semaphore>,
        config: Config,
        snapshot_store: Option<Arc<SnapshotStore>>,
    ) -> Self {
        let active = Arc::new(RwLock::new(HashMap::new()));
        let hooks: Arc<dyn EngineHooks> = Arc::new(ActiveHooks { active: active.clone() });
        Self {
            tool_registry,
            memory,
            llm,
            event_bus,
            worker_pool,
            hooks,
            config,
            snapshot_store,
            active,
            history: RwLock::new(VecDeque::new()),
            metrics: RwLock::new(OrchestrationMetrics::default()),
        }
    }

    /// Drive one task through the full lifecycle. Rejects a `task_id` that
    /// already has a live entry: every `task_id` maps to at most one live
    /// orchestration.
    pub async fn orchestrate_task(&self, task: Task) -> Result<OrchestrationResult> {
        {
            let active = self.active.read().await;
            if active.contains_key(&task.task_id) {
                return Err(OrchestrationError::Validation(format!(
                    "task {} already has a live orchestration",
                    task.task_id
                )));
            }
        }

        let entry = Arc::new(LiveEntry {
            status: RwLock::new(OrchestrationStatus::Submitted),
            context: RwLock::new(None),
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
        });
        self.active.write().await.insert(task.task_id, entry.clone());

        let result = self.run_lifecycle(&task, &entry).await;

        self.active.write().await.remove(&task.task_id);
        self.bump_metrics(&result).await;

        result
    }

    async fn run_lifecycle(
        &self,
        task: &Task,
        entry: &Arc<LiveEntry>,
    ) -> Result<OrchestrationResult> {
        let retrieved_context = self
            .memory
            .retrieve_relevant_context(&task.description, MemoryQueryType::All, RETRIEVAL_MAX_RESULTS)
            .await?;

        let classification = classifier::classify(&task.description);
        *entry.status.write().await = OrchestrationStatus::Classified;

        let (search_mode, message) = match classification {
            ClassificationResult::Casual => {
                let system = "You are a helpful assistant having a casual conversation. \
                    Respond naturally and concisely.";
                let answer = self
                    .llm
                    .complete(system, &task.description, 500)
                    .await
                    .unwrap_or_else(|_| "Hello! How can I help you today?".to_string());
                self.metrics.write().await.chat_answers += 1;
                return Ok(OrchestrationResult {
                    task_id: task.task_id,
                    outcome: OrchestrationOutcome::ChatAnswer { message: answer },
                });
            }
            ClassificationResult::Task { search_mode, message } => (search_mode, message),
        };

        if entry.cancel.is_cancelled() {
            *entry.status.write().await = OrchestrationStatus::Cancelled;
            return Ok(OrchestrationResult {
                task_id: task.task_id,
                outcome: OrchestrationOutcome::Executed(cancelled_before_plan(task.task_id)),
            });
        }

        *entry.status.write().await = OrchestrationStatus::Planning;
        let plan = self
            .build_plan(task, &message, search_mode, &retrieved_context)
            .await?;
        *entry.status.write().await = OrchestrationStatus::PlanReady;

        let mut context = OrchestrationContext::new(plan);
        context.retrieved_context = retrieved_context;
        *entry.context.write().await = Some(context.clone());

        if entry.cancel.is_cancelled() {
            *entry.status.write().await = OrchestrationStatus::Cancelled;
            return Ok(OrchestrationResult {
                task_id: task.task_id,
                outcome: OrchestrationOutcome::Executed(cancelled_before_plan(task.task_id)),
            });
        }

        *entry.status.write().await = OrchestrationStatus::Executing;
        let plan_result = self.execute(context, entry).await;

        *entry.status.write().await = match plan_result.status {
            PlanStatus::Success | PlanStatus::Partial => OrchestrationStatus::Succeeded,
            PlanStatus::Failed => OrchestrationStatus::Failed,
            PlanStatus::Cancelled => OrchestrationStatus::Cancelled,
        };

        self.record_episode(task, &plan_result).await;

        {
            let mut history = self.history.write().await;
            if history.len() >= HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(plan_result.clone());
        }

        if let Some(store) = &self.snapshot_store {
            let _ = store.delete(task.task_id).await;
        }

        Ok(OrchestrationResult {
            task_id: task.task_id,
            outcome: OrchestrationOutcome::Executed(plan_result),
        })
    }

    async fn build_plan(
        &self,
        task: &Task,
        message: &str,
        search_mode: SearchMode,
        context: &str,
    ) -> Result<ExecutionPlan> {
        let known_tools = self.tool_registry.known_tool_names().await;

        let plan = match search_mode {
            SearchMode::Web => forced_search_plan(task, message, "web_search", "query"),
            SearchMode::Deep => forced_search_plan(task, message, "deep_research", "topic"),
            SearchMode::None => {
                let mut planner_task = task.clone();
                planner_task.description = message.to_string();
                return planner::create_plan(&planner_task, context, &known_tools, self.llm.as_ref()).await;
            }
        };

        plan.validate(&known_tools).map_err(|e| {
            OrchestrationError::Internal(format!("forced search plan failed validation: {e}"))
        })?;
        Ok(plan)
    }

    async fn execute(&self, context: OrchestrationContext, entry: &Arc<LiveEntry>) -> PlanResult {
        let task_id = context.task_id;
        let engine = ExecutionEngine::new(
            self.tool_registry.clone(),
            self.worker_pool.clone(),
            self.event_bus.clone(),
            self.hooks.clone(),
        );

        let working_dir = std::env::temp_dir().join(format!("forge-task-{task_id}"));
        let _ = std::fs::create_dir_all(&working_dir);

        let engine_config = EngineConfig {
            max_parallel_steps: self.config.max_parallel_steps,
            plan_timeout_secs: Some(self.config.plan_timeout_secs),
        };

        let (final_context, plan_result) = engine
            .run(
                context,
                working_dir.clone(),
                Some(working_dir),
                &engine_config,
                entry.cancel.clone(),
            )
            .await;

        *entry.context.write().await = Some(final_context);
        plan_result
    }

    async fn record_episode(&self, task: &Task, plan_result: &PlanResult) {
        let succeeded = matches!(plan_result.status, PlanStatus::Success | PlanStatus::Partial);
        let tool_sequence: Vec<String> = plan_result
            .step_results
            .iter()
            .map(|s| s.tool_name.clone())
            .collect();

        let episode = Episode {
            id: EpisodeId::new(),
            title: format!("task {}", task.task_id),
            description: task.description.clone(),
            context: HashMap::new(),
            actions: plan_result
                .step_results
                .iter()
                .map(|s| serde_json::json!({"tool_name": s.tool_name, "attempts": s.attempts}))
                .collect(),
            outcomes: plan_result
                .step_results
                .iter()
                .map(|s| serde_json::json!({"state": s.state, "output": s.output}))
                .collect(),
            timestamp: Utc::now(),
            success: succeeded,
            importance: if succeeded { 2 } else { 4 },
            tags: vec![format!("{:?}", plan_result.status).to_lowercase()],
            embedding: Vec::new(),
        };

        if let Err(e) = self.memory.store_episode(episode).await {
            tracing::warn!("failed to store episode for task {}: {e}", task.task_id);
        }

        if !tool_sequence.is_empty() {
            if let Err(e) = self
                .memory
                .record_procedure_outcome(&task.description, tool_sequence, succeeded)
                .await
            {
                tracing::warn!("failed to record procedure outcome: {e}");
            }
        }
    }

    async fn bump_metrics(&self, result: &Result<OrchestrationResult>) {
        let mut metrics = self.metrics.write().await;
        metrics.total_orchestrations += 1;
        if let Ok(r) = result {
            if let OrchestrationOutcome::Executed(plan_result) = &r.outcome {
                match plan_result.status {
                    PlanStatus::Success | PlanStatus::Partial => metrics.succeeded += 1,
                    PlanStatus::Failed => metrics.failed += 1,
                    PlanStatus::Cancelled => metrics.cancelled += 1,
                }
            }
        }
    }

    /// Live or just-terminal status snapshot, or `None` if `task_id` is
    /// unknown to both `active_orchestrations` and the history ring.
    pub async fn get_status(&self, task_id: TaskId) -> Option<OrchestrationStatusView> {
        if let Some(entry) = self.active.read().await.get(&task_id).cloned() {
            let status = *entry.status.read().await;
            let context = entry.context.read().await;
            let (progress, current_step_title) = context.as_ref().map_or((0.0, None), |ctx| {
                let total = ctx.step_states.len().max(1) as f32;
                let done = ctx.step_states.values().filter(|s| s.is_success_terminal()).count() as f32;
                let running_title = ctx
                    .plan
                    .steps
                    .iter()
                    .find(|s| ctx.step_states.get(&s.step_id) == Some(&crate::model::StepState::Running))
                    .map(|s| s.title.clone());
                (done / total, running_title)
            });
            return Some(OrchestrationStatusView {
                task_id,
                status,
                progress,
                current_step_title,
                started_at: entry.started_at,
            });
        }

        let history = self.history.read().await;
        history.iter().rev().find(|r| r.task_id == task_id).map(|r| {
            let status = match r.status {
                PlanStatus::Success | PlanStatus::Partial => OrchestrationStatus::Succeeded,
                PlanStatus::Failed => OrchestrationStatus::Failed,
                PlanStatus::Cancelled => OrchestrationStatus::Cancelled,
            };
            OrchestrationStatusView {
                task_id,
                status,
                progress: 1.0,
                current_step_title: None,
                started_at: Utc::now() - chrono::Duration::seconds(r.total_execution_time_secs as i64),
            }
        })
    }

    pub async fn get_metrics(&self) -> OrchestrationMetrics {
        let mut metrics = self.metrics.read().await.clone();
        metrics.active = self.active.read().await.len();
        metrics
    }

    /// List every task currently live (not yet recorded to history).
    pub async fn list_active(&self) -> Vec<TaskId> {
        self.active.read().await.keys().copied().collect()
    }

    /// Request cooperative cancellation. A no-op error if `task_id` has no
    /// live orchestration (already terminal, or never submitted).
    pub async fn cancel_orchestration(&self, task_id: TaskId) -> Result<()> {
        let active = self.active.read().await;
        let entry = active
            .get(&task_id)
            .ok_or_else(|| OrchestrationError::Validation(format!("no live orchestration for task {task_id}")))?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Dump every memory store for backup/analysis, optionally writing the
    /// serialized result to `output`. Thin delegation to the memory
    /// manager — the orchestrator owns the only handle to it.
    pub async fn export_memory(
        &self,
        format: crate::memory::ExportFormat,
        include_compressed: bool,
        output: Option<&std::path::Path>,
    ) -> Result<crate::memory::MemoryExport> {
        self.memory.export_memory_data(format, include_compressed, output).await
    }

    /// Derive suggestions from historical success rates and learned
    /// procedures — the read-only counterpart to `record_procedure_outcome`.
    pub async fn get_recommendations(&self) -> Vec<String> {
        let mut recommendations = Vec::new();

        let history = self.history.read().await;
        if !history.is_empty() {
            let succeeded = history
                .iter()
                .filter(|r| matches!(r.status, PlanStatus::Success | PlanStatus::Partial))
                .count();
            let rate = succeeded as f32 / history.len() as f32;
            recommendations.push(format!(
                "historical success rate over last {} orchestrations: {:.0}%",
                history.len(),
                rate * 100.0
            ));
        }
        drop(history);

        if let Ok(export) = self
            .memory
            .export_memory_data(crate::memory::ExportFormat::Json, false, None)
            .await
        {
            let mut procedures = export.procedures;
            procedures.sort_by(|a, b| b.success_rate.partial_cmp(&a.success_rate).unwrap_or(std::cmp::Ordering::Equal));
            for procedure in procedures.into_iter().take(3) {
                recommendations.push(format!(
                    "for situations like '{}', tool sequence [{}] succeeds {:.0}% of the time ({} samples)",
                    procedure.situation,
                    procedure.tool_sequence.join(", "),
                    procedure.success_rate * 100.0,
                    procedure.sample_count
                ));
            }
        }

        recommendations
    }
}

fn forced_search_plan(task: &Task, message: &str, tool_name: &str, param_key: &str) -> ExecutionPlan {
    let mut step = ExecutionStep::new(format!("{tool_name} for forced search"), tool_name);
    step.description = message.to_string();
    step.complexity = Complexity::Low;
    step.params = serde_json::json!({ param_key: message });

    ExecutionPlan {
        plan_id: PlanId::new(),
        task_id: task.task_id,
        title: format!("forced {tool_name} plan"),
        steps: vec![step],
        strategy: PlanStrategy::Research,
        total_estimated_duration_secs: 60,
        complexity_score: 0.2,
        success_probability: 0.8,
        risk_factors: Vec::new(),
        prerequisites: Vec::new(),
        required_tools: vec![tool_name.to_string()],
        max_parallel_steps: Some(1),
    }
}

fn cancelled_before_plan(task_id: TaskId) -> PlanResult {
    PlanResult {
        task_id,
        plan_id: PlanId::new(),
        status: PlanStatus::Cancelled,
        step_results: Vec::new(),
        total_execution_time_secs: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::NullLLMClient;
    use crate::index::EmbeddingEngine;

    async fn test_memory() -> Arc<MemoryManager> {
        let dir = tempfile::tempdir().unwrap();
        let embedder = EmbeddingEngine::new().expect("embedder");
        Arc::new(MemoryManager::load(dir.keep(), embedder).await.unwrap())
    }

    async fn test_orchestrator() -> (Orchestrator, tempfile::TempDir) {
        let registry = Arc::new(ToolRegistry::new());
        crate::tools::register_builtin_tools(&registry).await.unwrap();
        let memory = test_memory().await;
        let llm: Arc<dyn LLMClient> = Arc::new(NullLLMClient);
        let event_bus = Arc::new(EventBus::new());
        let worker_pool = Arc::new(Semaphore::new(crate::engine::DEFAULT_WORKER_POOL_CAPACITY));
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(
            registry,
            memory,
            llm,
            event_bus,
            worker_pool,
            Config::default(),
            None,
        );
        (orchestrator, dir)
    }

    // These exercise the full pipeline including `MemoryManager`, which
    // downloads the fastembed model on first construction — ignored by
    // default so `cargo test` stays hermetic; run with `--ignored` when a
    // model cache is available.
    #[tokio::test]
    #[ignore = "requires the fastembed model (network on first run)"]
    async fn casual_greeting_never_creates_active_orchestration() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let task = Task::new("hola");
        let result = orchestrator.orchestrate_task(task).await.unwrap();
        assert!(matches!(result.outcome, OrchestrationOutcome::ChatAnswer { .. }));
        assert!(orchestrator.list_active().await.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires the fastembed model (network on first run)"]
    async fn task_indicator_shell_runs_to_terminal_status() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let task = Task::new("ejecuta ls en /app");
        let result = orchestrator.orchestrate_task(task).await.unwrap();
        assert!(matches!(result.outcome, OrchestrationOutcome::Executed(_)));
        assert!(orchestrator.list_active().await.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires the fastembed model (network on first run)"]
    async fn forced_web_search_dispatches_single_web_search_step() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let task = Task::new("[WebSearch] latest rust async runtimes");
        let result = orchestrator.orchestrate_task(task).await.unwrap();
        match result.outcome {
            OrchestrationOutcome::Executed(plan_result) => {
                assert_eq!(plan_result.step_results.len(), 1);
                assert_eq!(plan_result.step_results[0].tool_name, "web_search");
                assert_eq!(plan_result.step_results[0].state, StepState::Succeeded);
                assert!(plan_result.step_results[0].output.is_some());
                assert_eq!(plan_result.status, PlanStatus::Success);
            }
            other => panic!("expected Executed outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    #[ignore = "requires the fastembed model (network on first run)"]
    async fn duplicate_concurrent_task_id_is_rejected() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let task = Task::new("ejecuta ls en /app");
        let task_id = task.task_id;

        let orchestrator = Arc::new(orchestrator);
        let first = {
            let orchestrator = orchestrator.clone();
            let task = task.clone();
            tokio::spawn(async move { orchestrator.orchestrate_task(task).await })
        };

        // Give the first orchestration a chance to register itself active.
        tokio::task::yield_now().await;

        let mut duplicate_task = Task::new("ejecuta ls en /app");
        duplicate_task.task_id = task_id;
        let duplicate_result = orchestrator.orchestrate_task(duplicate_task).await;

        let _ = first.await.unwrap();
        assert!(duplicate_result.is_err());
        assert_eq!(duplicate_result.unwrap_err().kind(), "ValidationError");
    }
}
