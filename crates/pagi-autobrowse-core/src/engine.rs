//! **Automation engine boundary**: The browser controller behind the session.
//!
//! The engine is not thread-safe and blocks for as long as a step takes. The
//! `SessionManager` is the only owner of a live engine and only calls it while
//! holding its lock. Implement `EngineFactory` + `AutomationEngine` for a new backend.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::EngineFailure;

/// A live engine instance (one browser).
pub trait AutomationEngine: Send {
    /// Perform one natural-language step. Blocks until the step finishes.
    fn act(&mut self, instruction: &str) -> Result<String, EngineFailure>;

    /// Tear down the browser process. Always called exactly once per constructed engine.
    fn release(&mut self);
}

/// Builds engines; construction may be slow (browser launch, auth).
pub trait EngineFactory: Send + Sync {
    fn construct(&self, config: &SessionConfig) -> Result<Box<dyn AutomationEngine>, EngineFailure>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

// -----------------------------------------------------------------------------
// Placeholder engine: acknowledges instructions without driving a browser.
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct PlaceholderEngineFactory;

impl EngineFactory for PlaceholderEngineFactory {
    fn construct(&self, config: &SessionConfig) -> Result<Box<dyn AutomationEngine>, EngineFailure> {
        info!(target: "pagi::engine", page = %config.starting_page, "placeholder engine started (no browser)");
        Ok(Box::new(PlaceholderEngine::default()))
    }

    fn name(&self) -> &'static str {
        "placeholder"
    }
}

#[derive(Debug, Default)]
pub struct PlaceholderEngine {
    steps: usize,
}

impl AutomationEngine for PlaceholderEngine {
    fn act(&mut self, instruction: &str) -> Result<String, EngineFailure> {
        self.steps += 1;
        Ok(format!("Done! I've received your automation request: {}", instruction))
    }

    fn release(&mut self) {
        debug!(target: "pagi::engine", steps = self.steps, "placeholder engine released");
    }
}

// -----------------------------------------------------------------------------
// Remote engine: out-of-process automation worker over HTTP.
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreatedSession {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionProbe {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActResponse {
    ok: bool,
    #[serde(default)]
    message: String,
}

/// Factory for `RemoteEngine`. `base_url` without trailing slash (e.g. http://127.0.0.1:8765).
#[derive(Debug, Clone)]
pub struct RemoteEngineFactory {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl RemoteEngineFactory {
    pub fn new(base_url: impl Into<String>) -> Result<Self, EngineFailure> {
        // No request timeout: a single step may legitimately run for minutes.
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Option::<Duration>::None)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn delete_session(&self, session_id: &str, api_key: &str) {
        let url = format!("{}/sessions/{}", self.base_url, session_id);
        match self.client.delete(&url).bearer_auth(api_key).send() {
            Ok(res) if res.status().is_success() => {}
            Ok(res) => warn!(target: "pagi::engine", status = %res.status(), "worker session delete rejected"),
            Err(e) => warn!(target: "pagi::engine", error = %e, "worker session delete failed"),
        }
    }
}

impl EngineFactory for RemoteEngineFactory {
    fn construct(&self, config: &SessionConfig) -> Result<Box<dyn AutomationEngine>, EngineFailure> {
        std::fs::create_dir_all(&config.user_data_dir).map_err(|e| {
            EngineFailure::new(format!(
                "cannot create profile dir {}: {}",
                config.user_data_dir.display(),
                e
            ))
        })?;

        let body = serde_json::json!({
            "starting_page": config.starting_page,
            "headless": config.headless,
            "user_data_dir": config.user_data_dir,
            "clone_user_data_dir": false,
            "remote_debugging_port": config.remote_debugging_port,
        });
        let res = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .bearer_auth(&config.api_key)
            .json(&body)
            .send()?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().unwrap_or_default();
            return Err(EngineFailure::new(format!("worker refused session ({}): {}", status, text)));
        }
        let created: CreatedSession = res.json()?;

        // The worker session exists from here on; delete it if it never becomes ready.
        let probe = self
            .client
            .get(format!("{}/sessions/{}", self.base_url, created.session_id))
            .bearer_auth(&config.api_key)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json::<SessionProbe>());
        match probe {
            Ok(p) if p.ready => {}
            Ok(p) => {
                self.delete_session(&created.session_id, &config.api_key);
                return Err(EngineFailure::new(
                    p.error.unwrap_or_else(|| "browser did not become ready".to_string()),
                ));
            }
            Err(e) => {
                self.delete_session(&created.session_id, &config.api_key);
                return Err(e.into());
            }
        }

        info!(
            target: "pagi::engine",
            session_id = %created.session_id,
            page = %config.starting_page,
            headless = config.headless,
            "browser session started"
        );
        Ok(Box::new(RemoteEngine {
            factory: self.clone(),
            api_key: config.api_key.clone(),
            session_id: created.session_id,
            released: false,
        }))
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

pub struct RemoteEngine {
    factory: RemoteEngineFactory,
    api_key: String,
    session_id: String,
    released: bool,
}

impl AutomationEngine for RemoteEngine {
    fn act(&mut self, instruction: &str) -> Result<String, EngineFailure> {
        let url = format!("{}/sessions/{}/act", self.factory.base_url, self.session_id);
        let res = self
            .factory
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "prompt": instruction }))
            .send()?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().unwrap_or_default();
            return Err(EngineFailure::new(format!("worker error {}: {}", status, text)));
        }
        let act: ActResponse = res.json()?;
        if act.ok {
            Ok(act.message)
        } else {
            Err(EngineFailure::new(act.message))
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.factory.delete_session(&self.session_id, &self.api_key);
        info!(target: "pagi::engine", session_id = %self.session_id, "browser session stopped");
    }
}

/// Remote worker when `engine_url` is set, otherwise the placeholder.
pub fn create_engine_factory(engine_url: &str) -> Result<Arc<dyn EngineFactory>, EngineFailure> {
    let url = engine_url.trim();
    if url.is_empty() {
        return Ok(Arc::new(PlaceholderEngineFactory));
    }
    Ok(Arc::new(RemoteEngineFactory::new(url)?))
}
