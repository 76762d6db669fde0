//! Synchronous request adapter: one HTTP request, one blocking `execute`, one mapped reply.
//!
//! No locking here. Concurrent requests queue up on the session's own lock inside
//! the blocking pool.

use axum::http::StatusCode;
use chrono::Utc;
use pagi_autobrowse_core::{SessionError, SessionManager, SessionResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Body of every `/api/execute_automation` response.
#[derive(Debug, Clone, Serialize)]
pub struct AutomationReply {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    pub message: String,
    pub timestamp: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CloseReply {
    pub status: &'static str,
    pub released: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// HTTP status for each failure kind.
pub fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::InitializationFailed(_) => StatusCode::BAD_GATEWAY,
        SessionError::EngineError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SessionError::EmptyInstruction => StatusCode::BAD_REQUEST,
        SessionError::Reentrant => StatusCode::CONFLICT,
    }
}

pub fn reply_for(prompt: String, result: SessionResult<String>) -> (StatusCode, AutomationReply) {
    let timestamp = Utc::now().to_rfc3339();
    match result {
        Ok(message) => (
            StatusCode::OK,
            AutomationReply {
                status: "success",
                kind: None,
                message,
                timestamp,
                prompt,
            },
        ),
        Err(e) => (
            status_for(&e),
            AutomationReply {
                status: "error",
                kind: Some(e.kind()),
                message: e.to_string(),
                timestamp,
                prompt,
            },
        ),
    }
}

#[derive(Clone)]
pub struct RequestAdapter {
    session: Arc<SessionManager>,
}

impl RequestAdapter {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    /// Run the prompt on the blocking pool and wait for the engine.
    pub async fn execute(&self, prompt: String) -> (StatusCode, AutomationReply) {
        info!(target: "pagi::gateway", prompt = %prompt, "📥 Automation request");
        let session = Arc::clone(&self.session);
        let instruction = prompt.clone();
        let result = tokio::task::spawn_blocking(move || session.execute(&instruction))
            .await
            .unwrap_or_else(|e| Err(SessionError::EngineError(format!("automation task failed: {}", e))));

        if let Err(e) = &result {
            warn!(target: "pagi::gateway", kind = e.kind(), error = %e, "automation request failed");
        }
        reply_for(prompt, result)
    }

    /// Close the browser session; waits for any command in flight.
    pub async fn close(&self) -> (StatusCode, CloseReply) {
        let session = Arc::clone(&self.session);
        let result = tokio::task::spawn_blocking(move || session.close())
            .await
            .unwrap_or_else(|e| Err(SessionError::EngineError(format!("close task failed: {}", e))));

        match result {
            Ok(released) => {
                info!(target: "pagi::gateway", released, "🛑 Close request handled");
                (
                    StatusCode::OK,
                    CloseReply {
                        status: "closed",
                        released,
                        message: None,
                    },
                )
            }
            Err(e) => (
                status_for(&e),
                CloseReply {
                    status: "error",
                    released: false,
                    message: Some(e.to_string()),
                },
            ),
        }
    }
}
