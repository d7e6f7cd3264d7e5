//! `shell` tool — process side-effect, non-idempotent.
//!
//! Bounded output buffer, ANSI stripping, and tail-truncation, with
//! cancellation wired through a `CancellationToken`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::model::{ParamSpec, ParamType, SideEffectClass, ToolDescriptor};
use crate::tools::registry::{Tool, ToolContext, ToolResult};
use crate::tools::truncation;

const MAX_OUTPUT_LINES: usize = 2000;
const MAX_OUTPUT_BYTES: usize = 50_000;
const RAW_CAPTURE_MAX_LINES: usize = 8_000;
const RAW_CAPTURE_MAX_BYTES: usize = 2_000_000;
const READER_JOIN_TIMEOUT_MS: u64 = 2_000;
const TIMEOUT_KILL_GRACE_MS: u64 = 800;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

static DESCRIPTOR: Lazy<ToolDescriptor> = Lazy::new(|| ToolDescriptor {
    name: "shell".to_string(),
    description: "Execute a shell command and capture its combined stdout/stderr.".to_string(),
    params: vec![
        ParamSpec {
            name: "command".to_string(),
            param_type: ParamType::String,
            required: true,
        },
        ParamSpec {
            name: "timeout_ms".to_string(),
            param_type: ParamType::Number,
            required: false,
        },
    ],
    side_effects: SideEffectClass::Process,
    idempotent: false,
    max_timeout_secs: DEFAULT_TIMEOUT_SECS,
});

pub struct ShellTool;

#[derive(Deserialize)]
struct Params {
    command: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

struct BoundedOutputBuffer {
    lines: std::collections::VecDeque<String>,
    total_bytes: usize,
    dropped_lines: usize,
    max_lines: usize,
    max_bytes: usize,
}

impl BoundedOutputBuffer {
    fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            lines: std::collections::VecDeque::new(),
            total_bytes: 0,
            dropped_lines: 0,
            max_lines,
            max_bytes,
        }
    }

    fn push_line(&mut self, line: &str) {
        let mut kept = line.to_string();
        if kept.len() > self.max_bytes {
            kept = tail_by_bytes(&kept, self.max_bytes);
        }
        self.total_bytes = self.total_bytes.saturating_add(kept.len());
        self.lines.push_back(kept);

        while self.lines.len() > self.max_lines || self.total_bytes > self.max_bytes {
            if let Some(removed) = self.lines.pop_front() {
                self.total_bytes = self.total_bytes.saturating_sub(removed.len());
                self.dropped_lines = self.dropped_lines.saturating_add(1);
            } else {
                break;
            }
        }
    }

    fn into_text(self) -> String {
        let mut out = self.lines.into_iter().collect::<Vec<_>>().join("\n");
        if self.dropped_lines > 0 {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!(
                "[... omitted {} earlier line(s) due to buffer limits ...]",
                self.dropped_lines
            ));
        }
        out
    }
}

fn tail_by_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len().saturating_sub(max_bytes);
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

fn strip_ansi(text: &str) -> String {
    let re = regex::Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]|\x1b\][^\x07]*\x07|\x1b\[[\?0-9;]*[a-zA-Z]")
        .expect("valid regex");
    re.replace_all(text, "").into_owned()
}

fn build_shell_command(command: &str, ctx: &ToolContext) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };
    cmd.env("NO_COLOR", "1");
    cmd.current_dir(&ctx.working_dir);
    cmd
}

fn configure_foreground_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
}

async fn collect_pipe_output<R>(pipe: Option<R>, buffer: Arc<Mutex<BoundedOutputBuffer>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(pipe) = pipe else { return };
    let mut reader = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        buffer.lock().await.push_line(&line);
    }
}

async fn join_reader_with_timeout(mut handle: tokio::task::JoinHandle<()>) {
    if timeout(Duration::from_millis(READER_JOIN_TIMEOUT_MS), &mut handle)
        .await
        .is_err()
    {
        handle.abort();
    }
    let _ = handle.await;
}

#[cfg(unix)]
async fn terminate_unix_process_tree(pid: u32) {
    let pgid = format!("-{pid}");
    let group_term_ok = std::process::Command::new("kill")
        .arg("-TERM")
        .arg(&pgid)
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    if !group_term_ok {
        let _ = std::process::Command::new("kill")
            .arg("-TERM")
            .arg(pid.to_string())
            .status();
    }

    sleep(Duration::from_millis(200)).await;

    let still_running = std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    if still_running {
        let _ = std::process::Command::new("kill")
            .arg("-KILL")
            .arg(&pgid)
            .status();
        let _ = std::process::Command::new("kill")
            .arg("-KILL")
            .arg(pid.to_string())
            .status();
    }
}

#[cfg(windows)]
async fn terminate_windows_process_tree(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output();
}

async fn terminate_process_tree(child: &mut Child) {
    let Some(pid) = child.id() else {
        let _ = child.kill().await;
        return;
    };

    #[cfg(unix)]
    terminate_unix_process_tree(pid).await;
    #[cfg(windows)]
    terminate_windows_process_tree(pid).await;

    if timeout(Duration::from_millis(TIMEOUT_KILL_GRACE_MS), child.wait())
        .await
        .is_err()
    {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }
}

/// Apply ANSI stripping and truncation to the output surfaced to the step
/// result.
fn process_output(combined: String) -> String {
    let stripped = strip_ansi(&combined);
    let result = truncation::truncate_tail(&stripped, MAX_OUTPUT_LINES, MAX_OUTPUT_BYTES);
    if let Some(notice) = result.notice() {
        format!("{}{}", result.text, notice)
    } else {
        result.text
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &DESCRIPTOR
    }

    async fn invoke(&self, params: Value, ctx: &ToolContext, cancel: CancellationToken) -> ToolResult {
        let params: Params = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::validation_error(format!("invalid parameters: {e}")),
        };

        if let Some(ref sandbox) = ctx.sandbox_root {
            match ctx.working_dir.canonicalize() {
                Ok(canonical) if canonical.starts_with(sandbox) => {}
                _ => {
                    return ToolResult::error(
                        "access_denied",
                        "working directory is outside sandbox",
                    )
                }
            }
        }

        let mut cmd = build_shell_command(&params.command, ctx);
        configure_foreground_process_group(&mut cmd);
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let timeout_duration =
            Duration::from_millis(params.timeout_ms.unwrap_or(30_000).min(600_000));

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ToolResult::error("spawn_failed", format!("failed to spawn: {e}")),
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let buffer = Arc::new(Mutex::new(BoundedOutputBuffer::new(
            RAW_CAPTURE_MAX_LINES,
            RAW_CAPTURE_MAX_BYTES,
        )));

        let stdout_handle = tokio::spawn(collect_pipe_output(stdout, Arc::clone(&buffer)));
        let stderr_handle = tokio::spawn(collect_pipe_output(stderr, Arc::clone(&buffer)));

        let (exit_code, timed_out, cancelled) = tokio::select! {
            result = timeout(timeout_duration, child.wait()) => match result {
                Ok(Ok(status)) => (status.code().unwrap_or(-1), false, false),
                Ok(Err(_)) => (-1, false, false),
                Err(_) => {
                    terminate_process_tree(&mut child).await;
                    (-1, true, false)
                }
            },
            _ = cancel.cancelled() => {
                terminate_process_tree(&mut child).await;
                (-1, false, true)
            }
        };

        join_reader_with_timeout(stdout_handle).await;
        join_reader_with_timeout(stderr_handle).await;

        let combined_output = {
            let mut guard = buffer.lock().await;
            let captured = std::mem::replace(
                &mut *guard,
                BoundedOutputBuffer::new(RAW_CAPTURE_MAX_LINES, RAW_CAPTURE_MAX_BYTES),
            );
            captured.into_text()
        };
        let processed = process_output(combined_output);

        if cancelled {
            return ToolResult::cancelled();
        }
        if timed_out {
            return ToolResult::timeout("shell", timeout_duration.as_secs());
        }
        if exit_code == 0 {
            ToolResult::success(json!({ "output": processed, "exit_code": exit_code }))
        } else {
            ToolResult::error(
                "command_failed",
                format!("command exited with code {exit_code}: {processed}"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_output_buffer_keeps_recent_lines() {
        let mut buffer = BoundedOutputBuffer::new(3, 1024);
        buffer.push_line("l1");
        buffer.push_line("l2");
        buffer.push_line("l3");
        buffer.push_line("l4");

        let text = buffer.into_text();
        assert!(!text.contains("l1"));
        assert!(text.contains("l4"));
    }

    #[tokio::test]
    async fn shell_tool_runs_command_successfully() {
        let ctx = ToolContext::new(crate::model::TaskId::new(), std::env::temp_dir());
        let result = ShellTool
            .invoke(
                json!({"command": "echo hi"}),
                &ctx,
                CancellationToken::new(),
            )
            .await;
        assert!(result.success);
        assert!(result.output.unwrap()["output"]
            .as_str()
            .unwrap()
            .contains("hi"));
    }

    #[tokio::test]
    async fn shell_tool_reports_nonzero_exit() {
        let ctx = ToolContext::new(crate::model::TaskId::new(), std::env::temp_dir());
        let result = ShellTool
            .invoke(json!({"command": "exit 3"}), &ctx, CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, "command_failed");
    }
}
