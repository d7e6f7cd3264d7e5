//! `forge` — a thin CLI front-end for the orchestration engine.
//!
//! Talks to `forge-server` over HTTP (`submit`/`status`/`watch`/`cancel`)
//! or hosts it directly in-process (`serve`). Maps orchestration outcomes
//! onto the exit-code contract: 0 success, 1 generic failure,
//! 2 validation error, 3 dependency unavailable, 130 cancelled.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;

mod client;

/// `forge` — submit and track orchestration tasks.
#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Submit and track tasks on the orchestration engine", long_about = None)]
struct Cli {
    /// Base URL of the orchestration server.
    #[arg(long, global = true, default_value = "http://127.0.0.1:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a task description and print the terminal result.
    Submit {
        /// Free-form task description, e.g. "[WebSearch] latest rust news".
        description: String,
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        priority: Option<u8>,
    },
    /// Print the live or historical status of a task.
    Status {
        task_id: String,
    },
    /// Stream realtime progress/completion/failure events for a task until
    /// a terminal event arrives.
    Watch {
        task_id: String,
    },
    /// Request cooperative cancellation of a live orchestration.
    Cancel {
        task_id: String,
    },
    /// Dump working/episodic/semantic/procedural memory for backup or
    /// analysis, optionally writing it to a server-side path.
    ExportMemory {
        #[arg(long)]
        format: Option<String>,
        #[arg(long, default_value_t = false)]
        include_compressed: bool,
        #[arg(long)]
        output: Option<String>,
    },
    /// Host the orchestration HTTP server in this process.
    Serve {
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            let config = forge_server::ServerConfig {
                port,
                ..forge_server::ServerConfig::default()
            };
            match forge_server::start_server(config).await {
                Ok(()) => ExitCode::from(0),
                Err(e) => {
                    eprintln!("server error: {e}");
                    ExitCode::from(1)
                }
            }
        }
        Commands::Submit { description, user_id, session_id, priority } => {
            client::submit(&cli.server, description, user_id, session_id, priority).await
        }
        Commands::Status { task_id } => client::status(&cli.server, &task_id).await,
        Commands::Watch { task_id } => client::watch(&cli.server, &task_id).await,
        Commands::Cancel { task_id } => client::cancel(&cli.server, &task_id).await,
        Commands::ExportMemory { format, include_compressed, output } => {
            client::export_memory(&cli.server, format, include_compressed, output).await
        }
    }
}

/// Shared exit-code mapping for a completed `OrchestrationResult` JSON
/// body: `cancelled` status → 130, a `failed` status → 1, a chat answer or
/// any other terminal plan status → 0.
fn exit_code_for_result(body: &Value) -> ExitCode {
    let status = body
        .get("outcome")
        .and_then(|o| o.get("status"))
        .and_then(|s| s.as_str());
    match status {
        Some("cancelled") => ExitCode::from(130),
        Some("failed") => ExitCode::from(1),
        _ => ExitCode::from(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_of(c: ExitCode) -> String {
        format!("{c:?}")
    }

    #[test]
    fn cancelled_outcome_maps_to_130() {
        let body = serde_json::json!({ "outcome": { "status": "cancelled" } });
        assert_eq!(code_of(exit_code_for_result(&body)), code_of(ExitCode::from(130)));
    }

    #[test]
    fn failed_outcome_maps_to_1() {
        let body = serde_json::json!({ "outcome": { "status": "failed" } });
        assert_eq!(code_of(exit_code_for_result(&body)), code_of(ExitCode::from(1)));
    }

    #[test]
    fn chat_answer_maps_to_0() {
        let body = serde_json::json!({ "outcome": { "message": "hi there" } });
        assert_eq!(code_of(exit_code_for_result(&body)), code_of(ExitCode::from(0)));
    }

    #[test]
    fn succeeded_outcome_maps_to_0() {
        let body = serde_json::json!({ "outcome": { "status": "succeeded" } });
        assert_eq!(code_of(exit_code_for_result(&body)), code_of(ExitCode::from(0)));
    }
}
