//! Process configuration (file + environment) and the per-session browser settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{SessionError, SessionResult};

/// Application configuration.
///
/// | Source | Precedence |
/// |--------|------------|
/// | Environment `AUTOBROWSE__<FIELD>` (e.g. `AUTOBROWSE__PORT=5001`) | highest |
/// | TOML file at `AUTOBROWSE_CONFIG` (default `config/autobrowse.toml`, optional) | |
/// | Built-in defaults | lowest |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Page the browser opens on first initialization.
    pub starting_page: String,
    pub headless: bool,
    /// Chromium remote debugging port exposed for diagnostics. 0 disables it.
    pub remote_debugging_port: u16,
    /// Base URL of the automation worker. Empty selects the placeholder engine.
    pub engine_url: String,
    pub voice_enabled: bool,
    pub wake_phrase: String,
    /// Input device name (substring match). Unset uses the system default.
    #[serde(default)]
    pub input_device: Option<String>,
    pub wake_listen_timeout_ms: u64,
    pub wake_phrase_limit_ms: u64,
    pub command_listen_timeout_ms: u64,
    pub command_phrase_limit_ms: u64,
    pub recognition_backoff_ms: u64,
    /// Engine calls running longer than this are logged as slow. Not a hard timeout.
    pub slow_command_warn_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            starting_page: "https://google.com".to_string(),
            headless: false,
            remote_debugging_port: 9222,
            engine_url: "http://127.0.0.1:8765".to_string(),
            voice_enabled: false,
            wake_phrase: "hey browser".to_string(),
            input_device: None,
            wake_listen_timeout_ms: 1000,
            wake_phrase_limit_ms: 3000,
            command_listen_timeout_ms: 10_000,
            command_phrase_limit_ms: 15_000,
            recognition_backoff_ms: 5000,
            slow_command_warn_secs: 120,
        }
    }
}

impl AppConfig {
    /// Load config from file and environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var("AUTOBROWSE_CONFIG").unwrap_or_else(|_| "config/autobrowse".to_string());
        Self::load_from(&path)
    }

    /// Load with an explicit file path (extension optional, file optional).
    pub fn load_from(path: &str) -> Result<Self, config::ConfigError> {
        let d = AppConfig::default();
        let built = config::Config::builder()
            .set_default("host", d.host)?
            .set_default("port", d.port as i64)?
            .set_default("starting_page", d.starting_page)?
            .set_default("headless", d.headless)?
            .set_default("remote_debugging_port", d.remote_debugging_port as i64)?
            .set_default("engine_url", d.engine_url)?
            .set_default("voice_enabled", d.voice_enabled)?
            .set_default("wake_phrase", d.wake_phrase)?
            .set_default("wake_listen_timeout_ms", d.wake_listen_timeout_ms as i64)?
            .set_default("wake_phrase_limit_ms", d.wake_phrase_limit_ms as i64)?
            .set_default("command_listen_timeout_ms", d.command_listen_timeout_ms as i64)?
            .set_default("command_phrase_limit_ms", d.command_phrase_limit_ms as i64)?
            .set_default("recognition_backoff_ms", d.recognition_backoff_ms as i64)?
            .set_default("slow_command_warn_secs", d.slow_command_warn_secs as i64)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("AUTOBROWSE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        built.try_deserialize()
    }

    pub fn wake_listen_timeout(&self) -> Duration {
        Duration::from_millis(self.wake_listen_timeout_ms)
    }

    pub fn wake_phrase_limit(&self) -> Duration {
        Duration::from_millis(self.wake_phrase_limit_ms)
    }

    pub fn command_listen_timeout(&self) -> Duration {
        Duration::from_millis(self.command_listen_timeout_ms)
    }

    pub fn command_phrase_limit(&self) -> Duration {
        Duration::from_millis(self.command_phrase_limit_ms)
    }

    pub fn recognition_backoff(&self) -> Duration {
        Duration::from_millis(self.recognition_backoff_ms)
    }

    /// Build the browser session settings for the given credential.
    pub fn session_config(&self, api_key: &str) -> SessionResult<SessionConfig> {
        let mut session = SessionConfig::new(api_key, &self.starting_page)?;
        session.headless = self.headless;
        session.remote_debugging_port = Some(self.remote_debugging_port).filter(|p| *p != 0);
        Ok(session)
    }
}

/// Settings fixed at `configure()` time for the lifetime of the session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub api_key: String,
    pub starting_page: String,
    pub headless: bool,
    /// Diagnostics: expose the browser's remote debugging port.
    pub remote_debugging_port: Option<u16>,
    /// Persistent profile (cookies, logins). Never deleted by `close()`.
    pub user_data_dir: PathBuf,
}

impl SessionConfig {
    pub fn new(api_key: &str, starting_page: &str) -> SessionResult<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(SessionError::NotConfigured);
        }
        Ok(Self {
            api_key: api_key.to_string(),
            starting_page: starting_page.trim().to_string(),
            headless: false,
            remote_debugging_port: None,
            user_data_dir: default_profile_dir(),
        })
    }

    pub fn with_user_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_data_dir = dir.into();
        self
    }
}

// Keeps the credential out of logs.
impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("api_key", &"<redacted>")
            .field("starting_page", &self.starting_page)
            .field("headless", &self.headless)
            .field("remote_debugging_port", &self.remote_debugging_port)
            .field("user_data_dir", &self.user_data_dir)
            .finish()
    }
}

/// `<data_dir>/BrowserAutomation/user_data_dir`, falling back to the working directory.
pub fn default_profile_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("BrowserAutomation")
        .join("user_data_dir")
}
