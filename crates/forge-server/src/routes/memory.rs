//! Memory export surface: `/memory/export`.

use std::path::PathBuf;

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use forge_core::memory::{ExportFormat, MemoryExport};

use crate::error::AppError;
use crate::AppState;

pub fn memory_router() -> Router<AppState> {
    Router::new().route("/export", post(export))
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub include_compressed: bool,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    #[serde(flatten)]
    pub export: MemoryExport,
    pub written_to: Option<PathBuf>,
}

/// `POST /memory/export` — dump working/episodic/semantic/procedural
/// memory for backup or offline analysis, optionally writing it to a
/// server-side path.
pub async fn export(
    State(state): State<AppState>,
    Json(req): Json<ExportRequest>,
) -> Result<Json<ExportResponse>, AppError> {
    let format = match req.format {
        Some(raw) => raw
            .parse::<ExportFormat>()
            .map_err(|e| AppError::BadRequest(e.to_string()))?,
        None => ExportFormat::default(),
    };

    let export = state
        .orchestrator
        .export_memory(format, req.include_compressed, req.output.as_deref())
        .await?;

    Ok(Json(ExportResponse { export, written_to: req.output }))
}
