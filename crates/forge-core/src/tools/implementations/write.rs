//! `write_file` tool — filesystem write, non-idempotent (overwrites).
//!
//! Creates parent directories then writes, with sandbox validation
//! performed before any directory is created.

use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::model::{ParamSpec, ParamType, SideEffectClass, ToolDescriptor};
use crate::tools::registry::{Tool, ToolContext, ToolResult};

static DESCRIPTOR: Lazy<ToolDescriptor> = Lazy::new(|| ToolDescriptor {
    name: "write_file".to_string(),
    description: "Create or overwrite a file, creating parent directories as needed.".to_string(),
    params: vec![
        ParamSpec {
            name: "file_path".to_string(),
            param_type: ParamType::String,
            required: true,
        },
        ParamSpec {
            name: "content".to_string(),
            param_type: ParamType::String,
            required: true,
        },
    ],
    side_effects: SideEffectClass::Filesystem,
    idempotent: false,
    max_timeout_secs: 30,
});

pub struct WriteFileTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    content: String,
}

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &DESCRIPTOR
    }

    async fn invoke(&self, params: Value, ctx: &ToolContext, _cancel: CancellationToken) -> ToolResult {
        let params: Params = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::validation_error(format!("invalid parameters: {e}")),
        };

        let path = match ctx.sandboxed_resolve_new_path(&params.file_path) {
            Ok(p) => p,
            Err(msg) => return ToolResult::error("access_denied", msg),
        };

        if let Some(parent) = path.parent().filter(|p| !p.exists()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error(
                    "mkdir_failed",
                    format!("failed to create directory '{}': {e}", parent.display()),
                );
            }
        }

        match tokio::fs::write(&path, &params.content).await {
            Ok(_) => ToolResult::success(json!({
                "file_path": path.display().to_string(),
                "bytes_written": params.content.len(),
                "lines_written": params.content.lines().count(),
            })),
            Err(e) => ToolResult::error(
                "write_failed",
                format!("failed to write '{}': {e}", path.display()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_file_creating_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(crate::model::TaskId::new(), dir.path().to_path_buf());

        let result = WriteFileTool
            .invoke(
                json!({"file_path": "nested/out.txt", "content": "hello"}),
                &ctx,
                CancellationToken::new(),
            )
            .await;

        assert!(result.success);
        let written = std::fs::read_to_string(dir.path().join("nested/out.txt")).unwrap();
        assert_eq!(written, "hello");
    }

    #[tokio::test]
    async fn rejects_write_outside_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(crate::model::TaskId::new(), dir.path().to_path_buf())
            .with_sandbox(dir.path().to_path_buf());

        let result = WriteFileTool
            .invoke(
                json!({"file_path": "../escape.txt", "content": "x"}),
                &ctx,
                CancellationToken::new(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, "access_denied");
    }
}
