//! Data model: Task, ExecutionStep, ExecutionPlan, OrchestrationContext,
//! Checkpoint, ToolDescriptor, and the tiered-memory entities.
//!
//! Identifiers are newtype UUIDs and timestamps are `chrono::DateTime<Utc>`,
//! matching the conventions used throughout `storage/`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

id_newtype!(TaskId);
id_newtype!(PlanId);
id_newtype!(StepId);
id_newtype!(CheckpointId);

/// An accepted unit of work. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub user_id: String,
    pub session_id: String,
    pub description: String,
    /// 1 (lowest) .. 5 (highest)
    pub priority: u8,
    pub constraints: HashMap<String, serde_json::Value>,
    pub preferences: HashMap<String, serde_json::Value>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            task_id: TaskId::new(),
            user_id: "default_user".to_string(),
            session_id: Uuid::new_v4().to_string(),
            description: description.into(),
            priority: 1,
            constraints: HashMap::new(),
            preferences: HashMap::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Lifecycle state of one `ExecutionStep`. Terminal once `Succeeded`,
/// `Failed`, `Skipped`, or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    pub fn is_success_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

/// What happens to dependents when a step fails and retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    #[default]
    AbortPlan,
    SkipStep,
    Continue,
}

/// One atomic action in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_id: StepId,
    pub title: String,
    pub description: String,
    pub tool_name: String,
    pub params: serde_json::Value,
    pub dependency_step_ids: Vec<StepId>,
    pub estimated_duration_secs: u64,
    pub complexity: Complexity,
    #[serde(default)]
    pub on_failure: OnFailure,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    2
}

impl ExecutionStep {
    pub fn new(title: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            step_id: StepId::new(),
            title: title.into(),
            description: String::new(),
            tool_name: tool_name.into(),
            params: serde_json::json!({}),
            dependency_step_ids: Vec::new(),
            estimated_duration_secs: 10,
            complexity: Complexity::Low,
            on_failure: OnFailure::default(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanStrategy {
    WebDevelopment,
    DataAnalysis,
    FileProcessing,
    Administration,
    Research,
    Automation,
    General,
}

/// The totality of work for one task: an ordered, acyclic sequence of
/// steps plus planning metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_id: PlanId,
    pub task_id: TaskId,
    pub title: String,
    pub steps: Vec<ExecutionStep>,
    pub strategy: PlanStrategy,
    pub total_estimated_duration_secs: u64,
    /// 0.0 .. 1.0
    pub complexity_score: f32,
    /// 0.0 .. 1.0
    pub success_probability: f32,
    pub risk_factors: Vec<String>,
    pub prerequisites: Vec<String>,
    pub required_tools: Vec<String>,
    /// Per-plan override of the engine's default fan-out. `None` means the
    /// engine's configured default applies.
    #[serde(default)]
    pub max_parallel_steps: Option<usize>,
}

impl ExecutionPlan {
    /// Validate the step DAG is acyclic, every dependency resolves within
    /// the plan, and every `tool_name` is in `known_tools`. Rejects before
    /// any dispatch.
    pub fn validate(&self, known_tools: &std::collections::HashSet<String>) -> crate::error::Result<()> {
        let ids: std::collections::HashSet<StepId> = self.steps.iter().map(|s| s.step_id).collect();

        for step in &self.steps {
            if !known_tools.contains(&step.tool_name) {
                return Err(crate::error::OrchestrationError::Validation(format!(
                    "step '{}' references unregistered tool '{}'",
                    step.title, step.tool_name
                )));
            }
            for dep in &step.dependency_step_ids {
                if !ids.contains(dep) {
                    return Err(crate::error::OrchestrationError::Validation(format!(
                        "step '{}' depends on unknown step {}",
                        step.title, dep
                    )));
                }
            }
        }

        detect_cycle(&self.steps).map_err(crate::error::OrchestrationError::Validation)?;
        Ok(())
    }
}

fn detect_cycle(steps: &[ExecutionStep]) -> std::result::Result<(), String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let index: HashMap<StepId, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.step_id, i))
        .collect();
    let mut marks = vec![Mark::Unvisited; steps.len()];

    fn visit(
        i: usize,
        steps: &[ExecutionStep],
        index: &HashMap<StepId, usize>,
        marks: &mut [Mark],
    ) -> std::result::Result<(), String> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                return Err(format!(
                    "cyclic dependency detected at step '{}'",
                    steps[i].title
                ))
            }
            Mark::Unvisited => {}
        }
        marks[i] = Mark::InProgress;
        for dep in &steps[i].dependency_step_ids {
            if let Some(&di) = index.get(dep) {
                visit(di, steps, index, marks)?;
            }
        }
        marks[i] = Mark::Done;
        Ok(())
    }

    for i in 0..steps.len() {
        visit(i, steps, &index, &mut marks)?;
    }
    Ok(())
}

/// Runtime envelope around a task while it is alive: the plan, per-step
/// states, retrieved prior context, scoped variables, checkpoints, and a
/// cancellation flag. Created when orchestration begins; dropped from
/// `active_orchestrations` after the terminal transition + retention
/// window (the orchestrator's responsibility, not this type's).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationContext {
    pub task_id: TaskId,
    pub plan: ExecutionPlan,
    pub step_states: HashMap<StepId, StepState>,
    pub retrieved_context: String,
    pub global_vars: HashMap<String, serde_json::Value>,
    pub task_vars: HashMap<String, serde_json::Value>,
    pub step_vars: HashMap<StepId, HashMap<String, serde_json::Value>>,
    pub checkpoints: Vec<Checkpoint>,
    pub cancelled: bool,
}

impl OrchestrationContext {
    pub fn new(plan: ExecutionPlan) -> Self {
        let step_states = plan
            .steps
            .iter()
            .map(|s| (s.step_id, StepState::Pending))
            .collect();
        Self {
            task_id: plan.task_id,
            plan,
            step_states,
            retrieved_context: String::new(),
            global_vars: HashMap::new(),
            task_vars: HashMap::new(),
            step_vars: HashMap::new(),
            checkpoints: Vec::new(),
            cancelled: false,
        }
    }
}

/// Named snapshot of step states + scoped variables, restorable while no
/// step is running. The variable map is a deep copy at capture time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: CheckpointId,
    pub description: Option<String>,
    pub creating_step_id: Option<StepId>,
    pub timestamp: DateTime<Utc>,
    pub variables: HashMap<String, serde_json::Value>,
    pub step_states: HashMap<StepId, StepState>,
    /// True if any step between plan start and this checkpoint invoked a
    /// non-idempotent tool — gates `restoreCheckpoint` per DESIGN.md.
    pub crosses_non_idempotent_step: bool,
}

/// Variable scope within an `OrchestrationContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarScope {
    Global,
    Task,
    Step,
}

/// Declared side-effect class of a tool, used for idempotency and retry
/// policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectClass {
    ReadOnly,
    Filesystem,
    Network,
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
}

/// `name`, input schema, declared side-effect class, idempotency, max
/// timeout — the registry's invocation contract for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub side_effects: SideEffectClass,
    pub idempotent: bool,
    pub max_timeout_secs: u64,
}

// ---- Tiered memory entities ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingItem {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeId(pub Uuid);

impl EpisodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EpisodeId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub title: String,
    pub description: String,
    pub context: HashMap<String, serde_json::Value>,
    pub actions: Vec<serde_json::Value>,
    pub outcomes: Vec<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// 1..5
    pub importance: u8,
    pub tags: Vec<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SemanticKind {
    Concept,
    Fact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticItem {
    pub id: Uuid,
    pub kind: SemanticKind,
    pub text: String,
    pub category: String,
    pub source: String,
    /// 0.0 .. 1.0
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub access_count: u64,
    pub tags: Vec<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub id: Uuid,
    pub situation: String,
    pub tool_sequence: Vec<String>,
    pub success_rate: f32,
    pub sample_count: u64,
}
