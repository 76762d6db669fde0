//! Error types for the automation session.

use thiserror::Error;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Failures surfaced to whoever called `execute` / `close`.
///
/// Callers can tell "not ready yet" (`NotConfigured`, `InitializationFailed`) apart from
/// "ready but the action failed" (`EngineError`) and decide whether to retry or reconfigure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Automation is not configured (no API key)")]
    NotConfigured,

    #[error("Browser session failed to start: {0}")]
    InitializationFailed(String),

    #[error("Automation command failed: {0}")]
    EngineError(String),

    #[error("Instruction is empty")]
    EmptyInstruction,

    #[error("Session is already held by this thread (nested execute/close)")]
    Reentrant,
}

impl SessionError {
    /// Stable machine-readable name, used in logs and HTTP payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::NotConfigured => "not_ready",
            SessionError::InitializationFailed(_) => "initialization_failed",
            SessionError::EngineError(_) => "execution_failed",
            SessionError::EmptyInstruction => "invalid_prompt",
            SessionError::Reentrant => "reentrant_call",
        }
    }

    /// True when the session never reached the engine (retry after configuring).
    pub fn is_not_ready(&self) -> bool {
        matches!(self, SessionError::NotConfigured | SessionError::InitializationFailed(_))
    }
}

/// Failure reported by an engine implementation (construction or a single step).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineFailure {
    pub message: String,
}

impl EngineFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for EngineFailure {
    fn from(err: reqwest::Error) -> Self {
        EngineFailure::new(err.to_string())
    }
}
