//! Tool registry & dispatcher.
//!
//! Uniform invocation surface over heterogeneous tools (shell, file,
//! web-search, deep-research) with per-task isolation: a `Tool` trait over
//! an `Arc<RwLock<HashMap>>` registry, a `{success, output, error,
//! artifacts[]}` result envelope, and explicit schema validation instead of
//! ad-hoc serde error messages.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestrationError, Result};
use crate::model::{ParamSpec, ParamType, TaskId, ToolDescriptor};

/// One artifact produced by a tool invocation (e.g. a written file's path,
/// a search-result bundle) surfaced alongside `output`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolArtifact {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolErrorDetail {
    pub code: String,
    pub message: String,
}

/// Uniform tool invocation result. `success=false` is a normal outcome the
/// dispatcher returns to the caller — it is never raised as a Rust error.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<ToolErrorDetail>,
    pub artifacts: Vec<ToolArtifact>,
}

impl ToolResult {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            artifacts: Vec::new(),
        }
    }

    pub fn success_with_artifacts(output: Value, artifacts: Vec<ToolArtifact>) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            artifacts,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(ToolErrorDetail {
                code: code.into(),
                message: message.into(),
            }),
            artifacts: Vec::new(),
        }
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::error("ValidationError", message)
    }

    pub fn timeout(tool_name: &str, secs: u64) -> Self {
        Self::error(
            "TimeoutError",
            format!("tool '{tool_name}' timed out after {secs}s"),
        )
    }

    pub fn cancelled() -> Self {
        Self::error("Cancelled", "tool invocation cancelled")
    }
}

/// Context passed into a tool invocation: working directory, per-task
/// sandbox, and task correlation for log/event tagging.
pub struct ToolContext {
    pub task_id: TaskId,
    pub working_dir: PathBuf,
    /// Sandbox root for per-task path isolation. All file operations must
    /// resolve within this directory when set.
    pub sandbox_root: Option<PathBuf>,
}

impl ToolContext {
    pub fn new(task_id: TaskId, working_dir: PathBuf) -> Self {
        Self {
            task_id,
            working_dir,
            sandbox_root: None,
        }
    }

    pub fn with_sandbox(mut self, sandbox_root: PathBuf) -> Self {
        self.sandbox_root = Some(sandbox_root);
        self
    }

    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_dir.join(p)
        }
    }

    /// Resolve a path with sandbox enforcement, rejecting traversal and
    /// symlink escapes.
    pub fn sandboxed_resolve(&self, path: &str) -> std::result::Result<PathBuf, String> {
        let resolved = self.resolve_path(path);

        let Some(ref sandbox) = self.sandbox_root else {
            return Ok(resolved);
        };

        for component in resolved.components() {
            if matches!(component, std::path::Component::ParentDir) {
                return Err("path traversal (..) not allowed".into());
            }
        }

        let canonical = resolved
            .canonicalize()
            .map_err(|e| format!("cannot resolve path '{path}': {e}"))?;

        if !canonical.starts_with(sandbox) {
            return Err(format!("access denied: path '{path}' is outside sandbox"));
        }

        Ok(canonical)
    }

    /// Like `sandboxed_resolve` but tolerant of a not-yet-existing target
    /// (for writes): validates the nearest existing ancestor instead.
    pub fn sandboxed_resolve_new_path(&self, path: &str) -> std::result::Result<PathBuf, String> {
        let resolved = self.resolve_path(path);

        let Some(ref sandbox) = self.sandbox_root else {
            return Ok(resolved);
        };

        for component in resolved.components() {
            if matches!(component, std::path::Component::ParentDir) {
                return Err("path traversal (..) not allowed".into());
            }
        }

        if resolved.exists() {
            let canonical = resolved
                .canonicalize()
                .map_err(|e| format!("cannot resolve path: {e}"))?;
            if !canonical.starts_with(sandbox) {
                return Err("access denied: path is outside sandbox".into());
            }
            return Ok(canonical);
        }

        let mut check = resolved;
        let mut suffix: Vec<std::ffi::OsString> = Vec::new();
        while !check.exists() {
            if let Some(name) = check.file_name() {
                suffix.push(name.to_owned());
            }
            if !check.pop() {
                break;
            }
        }

        let canonical_base = if check.as_os_str().is_empty() || !check.exists() {
            sandbox.clone()
        } else {
            check
                .canonicalize()
                .map_err(|e| format!("cannot resolve path: {e}"))?
        };

        if !canonical_base.starts_with(sandbox) {
            return Err("access denied: path is outside sandbox".into());
        }

        let mut final_path = canonical_base;
        for component in suffix.into_iter().rev() {
            final_path.push(component);
        }
        Ok(final_path)
    }
}

/// A uniformly-invoked capability behind the registry.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn invoke(&self, params: Value, ctx: &ToolContext, cancel: CancellationToken) -> ToolResult;
}

/// Validate `params` against a descriptor's declared schema. Unknown
/// top-level params are rejected; missing required params are rejected.
/// This makes param validation total — invalid input never reaches the
/// tool implementation.
pub fn validate_params(descriptor: &ToolDescriptor, params: &Value) -> std::result::Result<(), String> {
    let obj = params
        .as_object()
        .ok_or_else(|| "params must be a JSON object".to_string())?;

    let declared: HashSet<&str> = descriptor.params.iter().map(|p| p.name.as_str()).collect();
    for key in obj.keys() {
        if !declared.contains(key.as_str()) {
            return Err(format!("unknown parameter '{key}'"));
        }
    }

    for spec in &descriptor.params {
        match obj.get(&spec.name) {
            None if spec.required => {
                return Err(format!("missing required parameter '{}'", spec.name))
            }
            None => {}
            Some(value) => check_type(spec, value)?,
        }
    }

    Ok(())
}

fn check_type(spec: &ParamSpec, value: &Value) -> std::result::Result<(), String> {
    let ok = match spec.param_type {
        ParamType::String => value.is_string(),
        ParamType::Number => value.is_number(),
        ParamType::Boolean => value.is_boolean(),
        ParamType::Object => value.is_object(),
        ParamType::Array => value.is_array(),
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "parameter '{}' must be of type {:?}",
            spec.name, spec.param_type
        ))
    }
}

/// Registry of tools: registration is exclusive, dispatch is read-mostly.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. Fails if the name is already registered — an
    /// internal fault, since it indicates a composition-root bug rather
    /// than a caller-facing condition.
    pub async fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.descriptor().name.clone();
        let mut tools = self.tools.write().await;
        if tools.contains_key(&name) {
            return Err(OrchestrationError::Internal(format!(
                "tool '{name}' already registered"
            )));
        }
        tools.insert(name, tool);
        Ok(())
    }

    pub async fn list(&self) -> Vec<ToolDescriptor> {
        self.tools
            .read()
            .await
            .values()
            .map(|t| t.descriptor().clone())
            .collect()
    }

    pub async fn known_tool_names(&self) -> HashSet<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Validate params, enforce the declared timeout, tag the invocation
    /// with `task_id`, and return a uniform `ToolResult`. Unknown tools
    /// raise `Internal` — the dispatcher never silently no-ops.
    pub async fn execute(
        &self,
        tool_name: &str,
        params: Value,
        ctx: &ToolContext,
        cancel: CancellationToken,
    ) -> Result<ToolResult> {
        let tool = self
            .get(tool_name)
            .await
            .ok_or_else(|| OrchestrationError::Internal(format!("unknown tool '{tool_name}'")))?;

        let descriptor = tool.descriptor().clone();

        if let Err(msg) = validate_params(&descriptor, &params) {
            tracing::debug!(tool = tool_name, task = %ctx.task_id, "param validation failed: {msg}");
            return Ok(ToolResult::validation_error(msg));
        }

        let timeout = Duration::from_secs(descriptor.max_timeout_secs);
        let start = Instant::now();

        tracing::info!(tool = tool_name, task = %ctx.task_id, "dispatching tool");

        let result = tokio::select! {
            result = tokio::time::timeout(timeout, tool.invoke(params, ctx, cancel.clone())) => {
                match result {
                    Ok(r) => r,
                    Err(_) => ToolResult::timeout(tool_name, timeout.as_secs()),
                }
            }
            _ = cancel.cancelled() => ToolResult::cancelled(),
        };

        tracing::debug!(
            tool = tool_name,
            task = %ctx.task_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            success = result.success,
            "tool invocation complete"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SideEffectClass;
    use serde_json::json;

    struct EchoTool(ToolDescriptor);

    #[async_trait]
    impl Tool for EchoTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.0
        }

        async fn invoke(&self, params: Value, _ctx: &ToolContext, _cancel: CancellationToken) -> ToolResult {
            ToolResult::success(params)
        }
    }

    fn echo_descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "echo".to_string(),
            description: "echoes params".to_string(),
            params: vec![ParamSpec {
                name: "text".to_string(),
                param_type: ParamType::String,
                required: true,
            }],
            side_effects: SideEffectClass::ReadOnly,
            idempotent: true,
            max_timeout_secs: 5,
        }
    }

    fn test_ctx() -> ToolContext {
        ToolContext::new(TaskId::new(), PathBuf::from("/tmp"))
    }

    #[tokio::test]
    async fn register_rejects_duplicate_name() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(EchoTool(echo_descriptor())))
            .await
            .unwrap();

        let err = registry
            .register(Arc::new(EchoTool(echo_descriptor())))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Internal");
    }

    #[tokio::test]
    async fn execute_unknown_tool_raises_internal() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("nope", json!({}), &test_ctx(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Internal");
    }

    #[tokio::test]
    async fn execute_missing_required_param_is_validation_error_not_invocation() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(EchoTool(echo_descriptor())))
            .await
            .unwrap();

        let result = registry
            .execute("echo", json!({}), &test_ctx(), CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, "ValidationError");
    }

    #[tokio::test]
    async fn execute_unknown_param_is_rejected() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(EchoTool(echo_descriptor())))
            .await
            .unwrap();

        let result = registry
            .execute(
                "echo",
                json!({"text": "hi", "extra": 1}),
                &test_ctx(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, "ValidationError");
    }

    #[tokio::test]
    async fn execute_success_roundtrips_output() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(EchoTool(echo_descriptor())))
            .await
            .unwrap();

        let result = registry
            .execute(
                "echo",
                json!({"text": "hi"}),
                &test_ctx(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output.unwrap()["text"], "hi");
    }
}
