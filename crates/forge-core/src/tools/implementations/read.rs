//! `read_file` tool — filesystem read, idempotent.
//!
//! Offset/limit line-range extraction and binary-content detection, routed
//! through `sandboxed_resolve` for per-task path isolation.

use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::model::{ParamSpec, ParamType, SideEffectClass, ToolDescriptor};
use crate::tools::registry::{Tool, ToolContext, ToolResult};

const DEFAULT_LIMIT: usize = 2000;
const MAX_LINE_LENGTH: usize = 2000;

static DESCRIPTOR: Lazy<ToolDescriptor> = Lazy::new(|| ToolDescriptor {
    name: "read_file".to_string(),
    description: "Read a text file, optionally a line range.".to_string(),
    params: vec![
        ParamSpec {
            name: "file_path".to_string(),
            param_type: ParamType::String,
            required: true,
        },
        ParamSpec {
            name: "offset".to_string(),
            param_type: ParamType::Number,
            required: false,
        },
        ParamSpec {
            name: "limit".to_string(),
            param_type: ParamType::Number,
            required: false,
        },
    ],
    side_effects: SideEffectClass::ReadOnly,
    idempotent: true,
    max_timeout_secs: 30,
});

pub struct ReadFileTool;

#[derive(Deserialize)]
struct Params {
    file_path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

fn is_binary(bytes: &[u8]) -> bool {
    let check_len = bytes.len().min(8000);
    bytes[..check_len].contains(&0)
}

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &DESCRIPTOR
    }

    async fn invoke(&self, params: Value, ctx: &ToolContext, _cancel: CancellationToken) -> ToolResult {
        let params: Params = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::validation_error(format!("invalid parameters: {e}")),
        };

        let path = match ctx.sandboxed_resolve(&params.file_path) {
            Ok(p) => p,
            Err(msg) => return ToolResult::error("access_denied", msg),
        };

        if !path.is_file() {
            return ToolResult::error("not_found", format!("path is not a file: {}", path.display()));
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) => {
                return ToolResult::error(
                    "read_failed",
                    format!("cannot read '{}': {e}", path.display()),
                )
            }
        };

        if is_binary(&bytes) {
            return ToolResult::error(
                "binary_file",
                format!("'{}' appears to be a binary file", path.display()),
            );
        }

        let content = String::from_utf8_lossy(&bytes);
        let all_lines: Vec<&str> = content.lines().collect();
        let offset = params.offset.unwrap_or(0);
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT);

        if offset >= all_lines.len() && !all_lines.is_empty() {
            return ToolResult::error(
                "out_of_range",
                format!("offset {offset} is beyond file length {}", all_lines.len()),
            );
        }

        let selected: Vec<String> = all_lines
            .iter()
            .skip(offset)
            .take(limit)
            .map(|line| {
                if line.len() > MAX_LINE_LENGTH {
                    format!("{}... [line truncated]", &line[..MAX_LINE_LENGTH])
                } else {
                    line.to_string()
                }
            })
            .collect();

        ToolResult::success(json!({
            "content": selected.join("\n"),
            "total_lines": all_lines.len(),
            "offset": offset,
            "returned_lines": selected.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_full_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        std::fs::File::create(&file_path)
            .unwrap()
            .write_all(b"one\ntwo\nthree")
            .unwrap();

        let ctx = ToolContext::new(crate::model::TaskId::new(), dir.path().to_path_buf());
        let result = ReadFileTool
            .invoke(json!({"file_path": "a.txt"}), &ctx, CancellationToken::new())
            .await;

        assert!(result.success);
        assert_eq!(result.output.unwrap()["total_lines"], 3);
    }

    #[tokio::test]
    async fn rejects_traversal_outside_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(crate::model::TaskId::new(), dir.path().to_path_buf())
            .with_sandbox(dir.path().to_path_buf());
        let result = ReadFileTool
            .invoke(
                json!({"file_path": "../../etc/passwd"}),
                &ctx,
                CancellationToken::new(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, "access_denied");
    }
}
