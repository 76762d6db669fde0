//! # PAGI AutoBrowse Gateway
//!
//! HTTP front end for the automation session. Each request to
//! `/api/execute_automation` blocks until the engine finishes its instruction;
//! voice commands arrive through the command queue and share the same session.

pub mod adapter;
pub mod cli;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use pagi_autobrowse_core::SessionManager;
use pagi_autobrowse_voice::VoicePipeline;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub use adapter::{reply_for, status_for, AutomationReply, CloseReply, RequestAdapter};
pub use cli::Cli;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionManager>,
    pub adapter: RequestAdapter,
    pub voice: Option<Arc<VoicePipeline>>,
}

impl AppState {
    pub fn new(session: Arc<SessionManager>, voice: Option<Arc<VoicePipeline>>) -> Self {
        Self {
            adapter: RequestAdapter::new(Arc::clone(&session)),
            session,
            voice,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub prompt: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/execute_automation", post(execute_automation))
        .route("/api/close", post(close_session))
        .route("/api/status", get(status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn execute_automation(State(state): State<AppState>, Json(body): Json<ExecuteRequest>) -> impl IntoResponse {
    let (code, reply) = state.adapter.execute(body.prompt).await;
    (code, Json(reply))
}

async fn close_session(State(state): State<AppState>) -> impl IntoResponse {
    let (code, reply) = state.adapter.close().await;
    (code, Json(reply))
}

/// Snapshot only; never waits on the session lock.
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let voice = match &state.voice {
        Some(pipeline) => pipeline.status().to_json(),
        None => json!({ "status": "disabled" }),
    };
    (
        StatusCode::OK,
        Json(json!({
            "state": state.session.state(),
            "busy": state.session.is_busy(),
            "configured": state.session.is_configured(),
            "voice": voice,
            "invocations": state.session.invocations(),
        })),
    )
}
