//! Credential store: the automation API key kept in a small JSON file.
//!
//! Environment variables always win over the file, so a key exported in the shell
//! (or in `.env`) overrides whatever a previous setup saved.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const API_KEY_ENV: &str = "NOVA_ACT_API_KEY";

const MIN_API_KEY_LEN: usize = 10;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk record. Field names match the file written by earlier releases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default, rename = "nova_act_api_key", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Other keys in the file (written by the desktop widget); kept as-is on save.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store at `<config_dir>/BrowserAutomation/config.json`.
    pub fn open_default() -> Self {
        let dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::at(dir.join("BrowserAutomation").join("config.json"))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Missing or unreadable files yield an empty record.
    pub fn load(&self) -> StoredCredentials {
        if !self.exists() {
            return StoredCredentials::default();
        }
        match fs::read_to_string(&self.path)
            .map_err(StoreError::from)
            .and_then(|s| serde_json::from_str(&s).map_err(StoreError::from))
        {
            Ok(c) => c,
            Err(e) => {
                warn!(target: "pagi::config", path = %self.path.display(), error = %e, "credential file unreadable");
                StoredCredentials::default()
            }
        }
    }

    /// Write the record (owner read/write only on Unix).
    pub fn save(&self, creds: &StoredCredentials) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(creds)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        debug!(target: "pagi::config", path = %self.path.display(), "credentials saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        if self.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// `NOVA_ACT_API_KEY` > file.
    pub fn api_key(&self) -> Option<String> {
        env_nonempty(API_KEY_ENV).or_else(|| self.load().api_key.filter(|s| !s.trim().is_empty()))
    }
}

/// Format check only; the key is proven good when the first session starts.
pub fn validate_api_key(key: &str) -> Result<(), String> {
    if key.trim().len() < MIN_API_KEY_LEN {
        return Err("API key is too short or empty".to_string());
    }
    Ok(())
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
