//! The orchestration HTTP surface: `/orchestrate`,
//! `/orchestration/status/{task_id}`, `/orchestration/metrics`,
//! `/orchestration/active`, `/orchestration/cancel/{task_id}`, `/chat`,
//! plus an SSE event stream giving the realtime event bus somewhere to go
//! over the wire: an `mpsc` channel fed by a background task, wrapped into
//! a `Sse` response body.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use forge_core::error::OrchestrationError;
use forge_core::events::Event as OrchestrationEvent;
use forge_core::model::{Task, TaskId};
use forge_core::orchestrator::{OrchestrationOutcome, OrchestrationResult};

use crate::error::AppError;
use crate::AppState;

const SSE_CHANNEL_BUFFER: usize = 64;

pub fn orchestration_router() -> Router<AppState> {
    Router::new()
        .route("/status/:task_id", get(status))
        .route("/metrics", get(metrics))
        .route("/active", get(active))
        .route("/cancel/:task_id", post(cancel))
        .route("/events/:task_id", get(events))
        .route("/recommendations", get(recommendations))
}

/// Whether the caller asked for `Accept: text/event-stream` on an endpoint
/// that otherwise answers with a single JSON body.
fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

/// Drive `task` to completion in the background while relaying its
/// progress/completion/failure frames over SSE. Subscribing before the
/// orchestration is spawned guarantees no event bus frame is missed.
///
/// Some terminal outcomes never reach the event bus at all — a casual
/// chat answer short-circuits before the engine runs, and a task rejected
/// before execution (e.g. a duplicate task id) returns an `Err` with no
/// engine involved. For those, a synthesized closing frame is sent so the
/// stream still ends in a terminal event rather than hanging open.
async fn stream_orchestration(
    state: AppState,
    task: Task,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let task_id = task.task_id;
    let subscription = state.event_bus.subscribe(task_id).await;
    let (tx, rx) = mpsc::channel(SSE_CHANNEL_BUFFER);

    let orchestrator = state.orchestrator.clone();
    let handle = tokio::spawn(async move { orchestrator.orchestrate_task(task).await });

    tokio::spawn(async move {
        tokio::pin!(handle);
        loop {
            tokio::select! {
                biased;

                event = subscription.recv() => {
                    let is_terminal = matches!(
                        event,
                        OrchestrationEvent::Completion { .. } | OrchestrationEvent::Failure { .. }
                    );
                    let Ok(payload) = serde_json::to_string(&event) else { break };
                    if tx.send(Ok(SseEvent::default().data(payload))).await.is_err() {
                        break;
                    }
                    if is_terminal {
                        break;
                    }
                }
                joined = &mut handle => {
                    let outcome = joined.unwrap_or_else(|e| {
                        Err(OrchestrationError::Internal(format!("orchestration task panicked: {e}")))
                    });
                    if let Some(payload) = terminal_frame_for(task_id, &outcome) {
                        let _ = tx.send(Ok(SseEvent::default().data(payload))).await;
                    }
                    break;
                }
            }
        }
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

/// Synthesize a closing frame for outcomes the engine itself never
/// publishes to the event bus. Returns `None` for `Executed` outcomes,
/// since those are always terminated by the engine's own `Completion` or
/// `Failure` frame.
fn terminal_frame_for(
    task_id: TaskId,
    outcome: &Result<OrchestrationResult, OrchestrationError>,
) -> Option<String> {
    let event = match outcome {
        Ok(result) => match &result.outcome {
            OrchestrationOutcome::ChatAnswer { message } => OrchestrationEvent::Completion {
                task_id,
                success_rate: 1.0,
                total_execution_time_secs: 0.0,
                summary: message.clone(),
                timestamp: Utc::now(),
            },
            OrchestrationOutcome::Executed(_) => return None,
        },
        Err(e) => OrchestrationEvent::Failure {
            task_id,
            error: e.to_string(),
            context: "orchestration failed before execution began".to_string(),
            timestamp: Utc::now(),
        },
    };
    serde_json::to_string(&event).ok()
}

#[derive(Debug, Deserialize)]
pub struct OrchestrateRequest {
    pub task_description: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub constraints: HashMap<String, Value>,
    #[serde(default)]
    pub preferences: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

fn task_from_request(req: OrchestrateRequest) -> Task {
    let mut task = Task::new(req.task_description);
    if let Some(user_id) = req.user_id {
        task.user_id = user_id;
    }
    if let Some(session_id) = req.session_id {
        task.session_id = session_id;
    }
    if let Some(priority) = req.priority {
        task.priority = priority;
    }
    task.constraints = req.constraints;
    task.preferences = req.preferences;
    task.metadata = req.metadata;
    task
}

#[derive(Debug, Serialize)]
pub struct OrchestrateResponse {
    pub task_id: TaskId,
    pub outcome: OrchestrationOutcome,
}

impl From<OrchestrationResult> for OrchestrateResponse {
    fn from(result: OrchestrationResult) -> Self {
        Self { task_id: result.task_id, outcome: result.outcome }
    }
}

/// `POST /orchestrate` — begin orchestration and return the terminal
/// result. The orchestrator drives the full classify/plan/execute
/// lifecycle before this handler returns; a client that wants
/// progress before completion should poll `/orchestration/status/{id}` or
/// subscribe to `/orchestration/events/{id}` concurrently with this call.
pub async fn orchestrate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<OrchestrateRequest>,
) -> Result<Response, AppError> {
    let task = task_from_request(req);
    if wants_event_stream(&headers) {
        return Ok(stream_orchestration(state, task).await.into_response());
    }
    let result = state.orchestrator.orchestrate_task(task).await?;
    Ok(Json(OrchestrateResponse::from(result)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub search_mode: Option<String>,
}

/// `POST /chat` — classify first; casual messages never reach
/// `orchestrate_task` at all, so the 400ms+ plan/execute path is only
/// paid for genuine tasks.
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let message = match req.search_mode.as_deref() {
        Some("web") => format!("[WebSearch] {}", req.message),
        Some("deep") => format!("[DeepResearch] {}", req.message),
        _ => req.message,
    };

    let mut task = Task::new(message);
    if let Some(context) = req.context {
        task.metadata.insert("context".to_string(), Value::String(context));
    }

    if wants_event_stream(&headers) {
        return Ok(stream_orchestration(state, task).await.into_response());
    }
    let result = state.orchestrator.orchestrate_task(task).await?;
    Ok(Json(OrchestrateResponse::from(result)).into_response())
}

fn parse_task_id(raw: &str) -> Result<TaskId, AppError> {
    raw.parse().map_err(|_| AppError::BadRequest(format!("invalid task id '{raw}'")))
}

/// `GET /orchestration/status/{task_id}` — live snapshot or 404.
pub async fn status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<forge_core::orchestrator::OrchestrationStatusView>, AppError> {
    let task_id = parse_task_id(&task_id)?;
    state
        .orchestrator
        .get_status(task_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no orchestration for task {task_id}")))
}

/// `GET /orchestration/metrics` — aggregate counters.
pub async fn metrics(
    State(state): State<AppState>,
) -> Json<forge_core::orchestrator::OrchestrationMetrics> {
    Json(state.orchestrator.get_metrics().await)
}

/// `GET /orchestration/active` — list of live task ids.
pub async fn active(State(state): State<AppState>) -> Json<Vec<TaskId>> {
    Json(state.orchestrator.list_active().await)
}

/// `POST /orchestration/cancel/{task_id}` — cooperative cancel.
pub async fn cancel(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let task_id = parse_task_id(&task_id)?;
    state.orchestrator.cancel_orchestration(task_id).await?;
    Ok(Json(serde_json::json!({ "task_id": task_id, "cancelling": true })))
}

/// `GET /orchestration/recommendations` — procedural-memory suggestions.
pub async fn recommendations(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.orchestrator.get_recommendations().await)
}

/// `GET /orchestration/events/{task_id}` — SSE stream of `progress` /
/// `completion` / `failure` frames for one task.
pub async fn events(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, AppError> {
    let task_id = parse_task_id(&task_id)?;
    let subscription = state.event_bus.subscribe(task_id).await;
    let (tx, rx) = mpsc::channel(SSE_CHANNEL_BUFFER);

    tokio::spawn(async move {
        loop {
            let event = subscription.recv().await;
            let is_terminal = matches!(
                event,
                forge_core::events::Event::Completion { .. } | forge_core::events::Event::Failure { .. }
            );
            let payload = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(_) => break,
            };
            if tx.send(Ok(SseEvent::default().data(payload))).await.is_err() {
                break;
            }
            if is_terminal {
                break;
            }
        }
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_from_request_defaults_user_and_session() {
        let req = OrchestrateRequest {
            task_description: "check disk space".to_string(),
            user_id: None,
            session_id: None,
            priority: None,
            constraints: HashMap::new(),
            preferences: HashMap::new(),
            metadata: HashMap::new(),
        };
        let task = task_from_request(req);
        assert_eq!(task.description, "check disk space");
        assert_eq!(task.user_id, "default_user");
        assert_eq!(task.priority, 1);
    }

    #[test]
    fn task_from_request_honors_overrides() {
        let req = OrchestrateRequest {
            task_description: "deploy service".to_string(),
            user_id: Some("alice".to_string()),
            session_id: Some("sess-1".to_string()),
            priority: Some(5),
            constraints: HashMap::new(),
            preferences: HashMap::new(),
            metadata: HashMap::new(),
        };
        let task = task_from_request(req);
        assert_eq!(task.user_id, "alice");
        assert_eq!(task.session_id, "sess-1");
        assert_eq!(task.priority, 5);
    }

    #[test]
    fn parse_task_id_rejects_non_uuid() {
        assert!(parse_task_id("not-a-uuid").is_err());
    }

    #[test]
    fn parse_task_id_accepts_uuid() {
        let id = TaskId::new();
        let parsed = parse_task_id(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
    }
}
