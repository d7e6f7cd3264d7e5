//! HTTP facade for the orchestration engine.
//!
//! A thin axum layer over [`forge_core::Orchestrator`]: request bodies
//! become a `Task`, responses are serialized `OrchestrationResult`/status
//! views, and the realtime event bus is exposed over SSE. This is a
//! library crate — the server is started via `start_server()`, split from
//! `build_router()` so a caller (the CLI's `serve` subcommand, or a test)
//! can build the router without binding a socket.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::Method, routing::get, Router};
use serde::Serialize;
use tokio::sync::Semaphore;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use forge_core::ai::{HttpLLMClient, LLMClient, NullLLMClient};
use forge_core::config::Config;
use forge_core::engine::DEFAULT_WORKER_POOL_CAPACITY;
use forge_core::events::EventBus;
use forge_core::index::EmbeddingEngine;
use forge_core::memory::MemoryManager;
use forge_core::storage::SnapshotStore;
use forge_core::tools::{register_builtin_tools, ToolRegistry};
use forge_core::Orchestrator;

pub mod error;
pub mod routes;

/// Configuration for starting the server.
pub struct ServerConfig {
    /// Port to listen on (default: 3000).
    pub port: u16,
    pub orchestrator_config: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            orchestrator_config: Config::from_env(),
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub event_bus: Arc<EventBus>,
}

/// Build the orchestrator and its router without binding a socket.
pub async fn build_router(config: &ServerConfig) -> anyhow::Result<(Router, AppState)> {
    let tool_registry = Arc::new(ToolRegistry::new());
    register_builtin_tools(&tool_registry).await?;

    let embedder = EmbeddingEngine::new()?;
    let memory = Arc::new(
        MemoryManager::load(config.orchestrator_config.embedding_storage.clone(), embedder)
            .await?,
    );

    let llm: Arc<dyn LLMClient> = match &config.orchestrator_config.llm_endpoint {
        Some(endpoint) => Arc::new(HttpLLMClient::new(endpoint.clone())),
        None => Arc::new(NullLLMClient),
    };

    let event_bus = Arc::new(EventBus::new());
    let worker_pool = Arc::new(Semaphore::new(DEFAULT_WORKER_POOL_CAPACITY));
    let snapshot_store = SnapshotStore::open(&forge_core::paths::snapshot_db_path())
        .ok()
        .map(Arc::new);

    let orchestrator = Arc::new(Orchestrator::new(
        tool_registry,
        memory,
        llm,
        event_bus.clone(),
        worker_pool,
        config.orchestrator_config.clone(),
        snapshot_store,
    ));

    let state = AppState { orchestrator, event_bus };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .nest("/orchestration", routes::orchestration::orchestration_router())
        .nest("/memory", routes::memory::memory_router())
        .route(
            "/orchestrate",
            axum::routing::post(routes::orchestration::orchestrate),
        )
        .route("/chat", axum::routing::post(routes::orchestration::chat))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    Ok((app, state))
}

/// Start the server and block until shutdown.
pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let (app, _state) = build_router(&config).await?;

    tracing::info!("orchestration server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}
