//! HTTP client used by the `submit`/`status`/`watch`/`cancel` subcommands.
//!
//! Thin `reqwest` usage: no retries, no connection pooling beyond what
//! `reqwest::Client` already does, errors mapped straight onto the CLI's
//! exit-code contract.

use std::process::ExitCode;

use futures::StreamExt;
use serde_json::{json, Value};

const EXIT_SUCCESS: u8 = 0;
const EXIT_GENERIC_FAILURE: u8 = 1;
const EXIT_VALIDATION_ERROR: u8 = 2;
const EXIT_DEPENDENCY_UNAVAILABLE: u8 = 3;
const EXIT_CANCELLED: u8 = 130;

fn connection_failure(server: &str, err: &reqwest::Error) -> ExitCode {
    eprintln!("could not reach orchestration server at {server}: {err}");
    ExitCode::from(EXIT_DEPENDENCY_UNAVAILABLE)
}

async fn print_response_body(response: reqwest::Response) -> Result<(Value, ExitCode), ExitCode> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or_else(|_| json!({}));
    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ExitCode::from(EXIT_GENERIC_FAILURE));
    }
    if status == reqwest::StatusCode::BAD_REQUEST {
        return Err(ExitCode::from(EXIT_VALIDATION_ERROR));
    }
    if !status.is_success() {
        return Err(ExitCode::from(EXIT_GENERIC_FAILURE));
    }
    Ok((body, ExitCode::from(EXIT_SUCCESS)))
}

pub async fn submit(
    server: &str,
    description: String,
    user_id: Option<String>,
    session_id: Option<String>,
    priority: Option<u8>,
) -> ExitCode {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{server}/orchestrate"))
        .json(&json!({
            "task_description": description,
            "user_id": user_id,
            "session_id": session_id,
            "priority": priority,
        }))
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => return connection_failure(server, &e),
    };

    match print_response_body(response).await {
        Ok((body, _)) => crate::exit_code_for_result(&body),
        Err(code) => code,
    }
}

pub async fn export_memory(
    server: &str,
    format: Option<String>,
    include_compressed: bool,
    output: Option<String>,
) -> ExitCode {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{server}/memory/export"))
        .json(&json!({
            "format": format,
            "include_compressed": include_compressed,
            "output": output,
        }))
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => return connection_failure(server, &e),
    };

    match print_response_body(response).await {
        Ok(_) => ExitCode::from(EXIT_SUCCESS),
        Err(code) => code,
    }
}

pub async fn status(server: &str, task_id: &str) -> ExitCode {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{server}/orchestration/status/{task_id}"))
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => return connection_failure(server, &e),
    };

    match print_response_body(response).await {
        Ok(_) => ExitCode::from(EXIT_SUCCESS),
        Err(code) => code,
    }
}

pub async fn cancel(server: &str, task_id: &str) -> ExitCode {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{server}/orchestration/cancel/{task_id}"))
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => return connection_failure(server, &e),
    };

    match print_response_body(response).await {
        Ok(_) => ExitCode::from(EXIT_CANCELLED),
        Err(code) => code,
    }
}

/// Stream `/orchestration/events/{task_id}` until a `completion` or
/// `failure` frame arrives, printing each frame as it's received.
pub async fn watch(server: &str, task_id: &str) -> ExitCode {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{server}/orchestration/events/{task_id}"))
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => return connection_failure(server, &e),
    };

    if !response.status().is_success() {
        eprintln!("server returned {}", response.status());
        return ExitCode::from(EXIT_GENERIC_FAILURE);
    }

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                eprintln!("stream error: {e}");
                return ExitCode::from(EXIT_GENERIC_FAILURE);
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(frame_end) = buffer.find("\n\n") {
            let frame = buffer[..frame_end].to_string();
            buffer.drain(..frame_end + 2);

            for line in frame.lines() {
                let Some(data) = line.strip_prefix("data: ") else { continue };
                let Ok(event) = serde_json::from_str::<Value>(data) else { continue };
                println!("{}", serde_json::to_string_pretty(&event).unwrap_or_default());

                match event.get("type").and_then(|t| t.as_str()) {
                    Some("completion") => {
                        let success_rate =
                            event.get("success_rate").and_then(|v| v.as_f64()).unwrap_or(0.0);
                        return if success_rate >= 1.0 {
                            ExitCode::from(EXIT_SUCCESS)
                        } else {
                            ExitCode::from(EXIT_GENERIC_FAILURE)
                        };
                    }
                    Some("failure") => return ExitCode::from(EXIT_GENERIC_FAILURE),
                    _ => {}
                }
            }
        }
    }

    ExitCode::from(EXIT_SUCCESS)
}
