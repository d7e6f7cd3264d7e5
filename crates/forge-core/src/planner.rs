//! Task planner — produces an `ExecutionPlan` from a task description plus
//! retrieved context. Rule-based template match first, then LLM
//! refinement constrained to `{ steps: [...] }`, with a deterministic
//! template fallback on malformed or absent LLM output. Side-effect free:
//! never invokes tools, only reads memory (via the context string already
//! retrieved by the orchestrator).
//!
//! The seven named templates are a bundled configuration
//! (`config/planner_templates.toml`), loaded once at startup as a builtin
//! registry rather than hard-coded.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::ai::LLMClient;
use crate::error::{OrchestrationError, Result};
use crate::model::{Complexity, ExecutionPlan, ExecutionStep, PlanId, PlanStrategy, Task};

const DEFAULT_PLANNER_TEMPLATES_TOML: &str = include_str!("../config/planner_templates.toml");

#[derive(Debug, Clone, Deserialize)]
struct Template {
    strategy: PlanStrategy,
    keywords: Vec<String>,
    step_count: usize,
    estimated_duration_secs: u64,
    complexity: Complexity,
    required_tools: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PlannerConfig {
    templates: Vec<Template>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_PLANNER_TEMPLATES_TOML)
            .expect("bundled config/planner_templates.toml is valid")
    }
}

static TEMPLATES: Lazy<Vec<Template>> = Lazy::new(|| {
    let config = match std::env::var("PLANNER_CONFIG_PATH") {
        Ok(path) => match std::fs::read_to_string(&path).map(|raw| toml::from_str::<PlannerConfig>(&raw)) {
            Ok(Ok(config)) => config,
            Ok(Err(e)) => {
                tracing::warn!("PLANNER_CONFIG_PATH={path} is malformed ({e}), using bundled default");
                PlannerConfig::default()
            }
            Err(e) => {
                tracing::warn!("could not read PLANNER_CONFIG_PATH={path} ({e}), using bundled default");
                PlannerConfig::default()
            }
        },
        Err(_) => PlannerConfig::default(),
    };
    config.templates
});

fn select_template(description: &str) -> &'static Template {
    let lower = description.to_lowercase();
    TEMPLATES
        .iter()
        .find(|t| !t.keywords.is_empty() && t.keywords.iter().any(|k| lower.contains(k.as_str())))
        .unwrap_or_else(|| TEMPLATES.last().expect("general template always present"))
}

fn deterministic_fallback_plan(task: &Task, template: &Template) -> ExecutionPlan {
    let mut steps = Vec::with_capacity(template.step_count);
    let mut previous: Option<crate::model::StepId> = None;

    for i in 0..template.step_count {
        let tool_name = template
            .required_tools
            .get(i % template.required_tools.len().max(1))
            .cloned()
            .unwrap_or_else(|| "shell".to_string());

        let mut step = ExecutionStep::new(format!("Step {}", i + 1), tool_name.clone());
        step.description = format!("Auto-generated step for: {}", task.description);
        step.complexity = template.complexity;
        step.estimated_duration_secs = template.estimated_duration_secs / template.step_count.max(1) as u64;
        if tool_name == "shell" {
            step.params = serde_json::json!({"command": format!("echo '{}'", task.description.replace('\'', ""))});
        } else if tool_name == "web_search" {
            step.params = serde_json::json!({"query": task.description});
        } else if tool_name == "deep_research" {
            step.params = serde_json::json!({"topic": task.description});
        } else if tool_name == "read_file" || tool_name == "write_file" {
            step.params = serde_json::json!({"file_path": "task_output.txt", "content": task.description});
        }
        if let Some(prev) = previous {
            step.dependency_step_ids.push(prev);
        }
        previous = Some(step.step_id);
        steps.push(step);
    }

    ExecutionPlan {
        plan_id: PlanId::new(),
        task_id: task.task_id,
        title: format!("{:?} plan", template.strategy),
        steps,
        strategy: template.strategy,
        total_estimated_duration_secs: template.estimated_duration_secs,
        complexity_score: match template.complexity {
            Complexity::Low => 0.25,
            Complexity::Medium => 0.55,
            Complexity::High => 0.85,
        },
        success_probability: 0.7,
        risk_factors: Vec::new(),
        prerequisites: Vec::new(),
        required_tools: template.required_tools.iter().map(|s| s.to_string()).collect(),
    max_parallel_steps: None,
    }
}

#[derive(Deserialize)]
struct LlmStepSpec {
    title: String,
    #[serde(default)]
    description: String,
    tool_name: String,
    #[serde(default)]
    params: serde_json::Value,
    #[serde(default)]
    depends_on: Vec<usize>,
}

#[derive(Deserialize)]
struct LlmPlanSpec {
    steps: Vec<LlmStepSpec>,
}

fn refinement_prompt(task: &Task, context: &str, template: &Template) -> (String, String) {
    let system = "You refine task-execution plans. Respond with strict JSON of the shape \
        {\"steps\": [{\"title\": string, \"description\": string, \"tool_name\": string, \
        \"params\": object, \"depends_on\": [int]}]}. depends_on holds zero-based indices \
        of prior steps in this same array. No prose, JSON only.".to_string();

    let user = format!(
        "Task: {}\nRelevant context:\n{}\nSuggested strategy: {:?}\nAvailable tools: {}",
        task.description,
        context,
        template.strategy,
        template.required_tools.join(", ")
    );

    (system, user)
}

fn build_plan_from_llm_spec(task: &Task, template: &Template, spec: LlmPlanSpec) -> Option<ExecutionPlan> {
    if spec.steps.is_empty() {
        return None;
    }

    let mut step_ids = Vec::with_capacity(spec.steps.len());
    let mut steps = Vec::with_capacity(spec.steps.len());

    for item in &spec.steps {
        let mut step = ExecutionStep::new(item.title.clone(), item.tool_name.clone());
        step.description = item.description.clone();
        step.params = item.params.clone();
        step_ids.push(step.step_id);
        steps.push(step);
    }

    for (i, item) in spec.steps.iter().enumerate() {
        for dep in &item.depends_on {
            if let Some(&dep_id) = step_ids.get(*dep) {
                steps[i].dependency_step_ids.push(dep_id);
            }
        }
    }

    Some(ExecutionPlan {
        plan_id: PlanId::new(),
        task_id: task.task_id,
        title: format!("{:?} plan (LLM-refined)", template.strategy),
        steps,
        strategy: template.strategy,
        total_estimated_duration_secs: template.estimated_duration_secs,
        complexity_score: match template.complexity {
            Complexity::Low => 0.25,
            Complexity::Medium => 0.55,
            Complexity::High => 0.85,
        },
        success_probability: 0.75,
        risk_factors: Vec::new(),
        prerequisites: Vec::new(),
        required_tools: template.required_tools.iter().map(|s| s.to_string()).collect(),
    max_parallel_steps: None,
    })
}

/// Produce an `ExecutionPlan`. Always returns a plan that validates
/// against `known_tools`: falls back to the deterministic template when
/// the LLM is absent, errors, returns malformed JSON, or produces a plan
/// that fails validation.
pub async fn create_plan(
    task: &Task,
    context: &str,
    known_tools: &HashSet<String>,
    llm: &dyn LLMClient,
) -> Result<ExecutionPlan> {
    let template = select_template(&task.description);
    let fallback = deterministic_fallback_plan(task, template);

    let (system, user) = refinement_prompt(task, context, template);
    let refined = match llm.complete(&system, &user, 2000).await {
        Ok(text) => parse_llm_plan(&text).and_then(|spec| build_plan_from_llm_spec(task, template, spec)),
        Err(_) => None,
    };

    let candidate = refined.unwrap_or(fallback.clone());

    match candidate.validate(known_tools) {
        Ok(()) => Ok(candidate),
        Err(_) => match fallback.validate(known_tools) {
            Ok(()) => Ok(fallback),
            Err(e) => Err(OrchestrationError::Internal(format!(
                "template plan failed validation: {e}"
            ))),
        },
    }
}

fn parse_llm_plan(text: &str) -> Option<LlmPlanSpec> {
    let trimmed = text.trim();
    let json_slice = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);
    serde_json::from_str(json_slice).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::NullLLMClient;

    fn known_tools() -> HashSet<String> {
        ["shell", "read_file", "write_file", "web_search", "deep_research"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[tokio::test]
    async fn falls_back_to_template_when_llm_unavailable() {
        let task = Task::new("ejecuta ls en /app");
        let plan = create_plan(&task, "", &known_tools(), &NullLLMClient)
            .await
            .unwrap();
        assert!(!plan.steps.is_empty());
        assert!(plan.validate(&known_tools()).is_ok());
    }

    #[test]
    fn selects_web_development_template() {
        let template = select_template("build me a website for my bakery");
        assert_eq!(template.strategy, PlanStrategy::WebDevelopment);
    }

    #[test]
    fn falls_back_to_general_template() {
        let template = select_template("asdkjhasdkjh");
        assert_eq!(template.strategy, PlanStrategy::General);
    }

    #[test]
    fn bundled_config_parses_seven_templates_ending_in_general() {
        let config = PlannerConfig::default();
        assert_eq!(config.templates.len(), 7);
        assert_eq!(config.templates.last().unwrap().strategy, PlanStrategy::General);
    }
}
