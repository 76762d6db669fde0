//! Units of work submitted to the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SessionError;

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOrigin {
    /// Synchronous request/response caller.
    Request,
    /// Wake phrase + speech capture.
    Voice,
}

impl std::fmt::Display for CommandOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Voice => write!(f, "voice"),
        }
    }
}

/// A natural-language instruction for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub instruction: String,
    pub submitted_at: DateTime<Utc>,
    pub origin: CommandOrigin,
}

impl Command {
    /// Returns `None` for a blank instruction; surrounding whitespace is trimmed.
    pub fn new(instruction: impl AsRef<str>, origin: CommandOrigin) -> Option<Self> {
        let instruction = instruction.as_ref().trim();
        if instruction.is_empty() {
            return None;
        }
        Some(Self {
            instruction: instruction.to_string(),
            submitted_at: Utc::now(),
            origin,
        })
    }

    pub fn request(instruction: impl AsRef<str>) -> Option<Self> {
        Self::new(instruction, CommandOrigin::Request)
    }

    pub fn voice(instruction: impl AsRef<str>) -> Option<Self> {
        Self::new(instruction, CommandOrigin::Voice)
    }
}

/// Outcome of one command, as seen by the consumer loop.
#[derive(Debug, Clone)]
pub struct CommandReport {
    pub command: Command,
    pub result: Result<String, SessionError>,
    pub finished_at: DateTime<Utc>,
    /// Lock wait + lazy init + engine time.
    pub elapsed: Duration,
}

impl CommandReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Status line suitable for a UI log.
    pub fn summary(&self) -> String {
        match &self.result {
            Ok(msg) => format!("✓ {} ({})", self.command.instruction, msg),
            Err(e) => format!("✗ {} ({})", self.command.instruction, e),
        }
    }
}
