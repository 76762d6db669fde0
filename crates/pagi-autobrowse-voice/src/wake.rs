//! **Wake-phrase detector**: Background loop that listens for a trigger phrase.
//!
//! Each round acquires the microphone, calibrates, then listens in short bounded
//! windows until the phrase is heard. The microphone scope is always released
//! *before* the callback runs, because the callback normally acquires the same
//! microphone to capture the command that follows.
//!
//! ```text
//!   ┌──────────── acquire mic ────────────┐
//!   │ calibrate → listen(1s) → recognize  │──(no match)──┐
//!   │      ▲                              │              │
//!   │      └──────────────────────────────┼──────────────┘
//!   └──────────── release mic ────────────┘
//!                    │ match
//!                    ▼
//!          callback(WakeEvent)   (mic free; panics and errors logged)
//! ```

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde_json::json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{RecognitionError, VoiceError, VoiceResult};
use crate::listen::{Listener, ListenerConfig};
use crate::microphone::Microphone;
use crate::stt::SpeechRecognizer;

/// Pause between releasing the microphone and running the callback, so the device settles.
const RELEASE_GRACE: Duration = Duration::from_millis(100);

/// Trigger produced when the wake phrase is recognized.
#[derive(Debug, Clone, PartialEq)]
pub struct WakeEvent {
    /// Full recognized text.
    pub text: String,
    /// Words spoken after the wake phrase in the same utterance, if any.
    pub trailing: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Case-insensitive substring match. Returns the event if `text` contains `phrase`.
pub fn match_wake_phrase(text: &str, phrase: &str) -> Option<WakeEvent> {
    let phrase = phrase.trim().to_lowercase();
    if phrase.is_empty() {
        return None;
    }
    let lower = text.to_lowercase();
    let at = lower.find(&phrase)?;
    // Offsets are into the lowered text.
    let rest = lower[at + phrase.len()..]
        .trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '.' | '!' | '?'));
    Some(WakeEvent {
        text: text.trim().to_string(),
        trailing: (!rest.is_empty()).then(|| rest.to_string()),
        timestamp: Utc::now(),
    })
}

/// Detector tuning
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Phrase to listen for (default: "hey browser")
    pub wake_phrase: String,

    /// One bounded listen window; also bounds how long `stop()` can take (default: 1s)
    pub listen_timeout: Duration,

    /// Longest utterance considered for wake matching (default: 3s)
    pub phrase_limit: Duration,

    /// Ambient calibration at every acquisition (default: 1s)
    pub calibration: Duration,

    /// Wait after a recognition-service error (default: 5s)
    pub backoff: Duration,

    pub listener: ListenerConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            wake_phrase: "hey browser".to_string(),
            listen_timeout: Duration::from_secs(1),
            phrase_limit: Duration::from_secs(3),
            calibration: Duration::from_secs(1),
            backoff: Duration::from_secs(5),
            listener: ListenerConfig::default(),
        }
    }
}

/// Detector thread state as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorStatus {
    Stopped,
    Listening,
    /// The microphone could not be opened; the thread has exited.
    Failed(String),
}

impl DetectorStatus {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DetectorStatus::Stopped => json!({ "status": "stopped" }),
            DetectorStatus::Listening => json!({ "status": "listening" }),
            DetectorStatus::Failed(reason) => json!({ "status": "failed", "error": reason }),
        }
    }
}

/// Runs on the detector thread after the microphone is released.
pub type WakeCallback = Arc<dyn Fn(WakeEvent) -> anyhow::Result<()> + Send + Sync>;

struct Shared {
    stop: AtomicBool,
    status: Mutex<DetectorStatus>,
}

impl Shared {
    fn set_status(&self, status: DetectorStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    fn status(&self) -> DetectorStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

struct Running {
    handle: JoinHandle<()>,
    stop_tx: Sender<()>,
}

/// Restartable `Stopped → Listening → Stopped` loop on its own thread.
pub struct WakePhraseDetector {
    config: DetectorConfig,
    microphone: Microphone,
    recognizer: Arc<dyn SpeechRecognizer>,
    callback: WakeCallback,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl WakePhraseDetector {
    pub fn new(
        config: DetectorConfig,
        microphone: Microphone,
        recognizer: Arc<dyn SpeechRecognizer>,
        callback: WakeCallback,
    ) -> Self {
        Self {
            config,
            microphone,
            recognizer,
            callback,
            shared: Arc::new(Shared {
                stop: AtomicBool::new(false),
                status: Mutex::new(DetectorStatus::Stopped),
            }),
            running: Mutex::new(None),
        }
    }

    /// Start listening. No-op while already running; restarts after `stop()` or a failure.
    pub fn start(&self) -> VoiceResult<()> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(r) = running.as_ref() {
            if !r.handle.is_finished() {
                debug!(target: "pagi::voice", "wake detector already running");
                return Ok(());
            }
        }
        if let Some(old) = running.take() {
            let _ = old.handle.join();
        }

        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.set_status(DetectorStatus::Listening);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker = Worker {
            config: self.config.clone(),
            microphone: self.microphone.clone(),
            recognizer: Arc::clone(&self.recognizer),
            callback: Arc::clone(&self.callback),
            shared: Arc::clone(&self.shared),
            stop_rx,
        };
        let handle = std::thread::Builder::new()
            .name("wake-detector".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                self.shared.set_status(DetectorStatus::Stopped);
                VoiceError::Io(e)
            })?;

        info!(
            target: "pagi::voice",
            phrase = %self.config.wake_phrase,
            device = %self.microphone.describe(),
            "👂 Wake detector started"
        );
        *running = Some(Running { handle, stop_tx });
        Ok(())
    }

    /// Signal the loop and wait for it: one listen window, or until a running callback returns. Idempotent.
    pub fn stop(&self) {
        let taken = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(r) = taken else {
            return;
        };
        self.shared.stop.store(true, Ordering::SeqCst);
        let _ = r.stop_tx.try_send(());
        if r.handle.join().is_err() {
            error!(target: "pagi::voice", "wake detector thread panicked");
        }
        if !matches!(self.shared.status(), DetectorStatus::Failed(_)) {
            self.shared.set_status(DetectorStatus::Stopped);
        }
        info!(target: "pagi::voice", "Wake detector stopped");
    }

    pub fn status(&self) -> DetectorStatus {
        self.shared.status()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl Drop for WakePhraseDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// What ended one microphone scope.
enum Round {
    Wake(WakeEvent),
    Backoff(String),
    Stopped,
}

struct Worker {
    config: DetectorConfig,
    microphone: Microphone,
    recognizer: Arc<dyn SpeechRecognizer>,
    callback: WakeCallback,
    shared: Arc<Shared>,
    stop_rx: Receiver<()>,
}

impl Worker {
    fn run(self) {
        let mut listener = Listener::new(self.config.listener.clone());

        while !self.shared.stopping() {
            let round = match self.listen_round(&mut listener) {
                Ok(round) => round,
                Err(e) => {
                    error!(target: "pagi::voice", error = %e, "❌ Wake detector cannot open the microphone; stopping");
                    self.shared.set_status(DetectorStatus::Failed(e.to_string()));
                    return;
                }
            };

            match round {
                Round::Stopped => break,
                Round::Backoff(reason) => {
                    warn!(
                        target: "pagi::voice",
                        error = %reason,
                        backoff_ms = self.config.backoff.as_millis() as u64,
                        "recognition service error; pausing"
                    );
                    self.wait(self.config.backoff);
                }
                Round::Wake(event) => {
                    info!(target: "pagi::voice", text = %event.text, "🔔 Wake phrase detected");
                    if self.wait(RELEASE_GRACE) {
                        break;
                    }
                    self.fire(event);
                }
            }
        }
        debug!(target: "pagi::voice", "wake detector loop exited");
    }

    /// One microphone scope. Returns `Err` only when the device cannot be opened.
    fn listen_round(&self, listener: &mut Listener) -> VoiceResult<Round> {
        let scope = match self.microphone.acquire() {
            Ok(scope) => scope,
            Err(VoiceError::DeviceBusy) => {
                return Ok(Round::Backoff("microphone busy".to_string()));
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = listener.calibrate(&scope, self.config.calibration) {
            return Ok(Round::Backoff(e.to_string()));
        }

        while !self.shared.stopping() {
            let utterance = match listener.listen(&scope, self.config.listen_timeout, self.config.phrase_limit) {
                Ok(u) => u,
                Err(RecognitionError::Timeout) | Err(RecognitionError::Unintelligible) => continue,
                Err(RecognitionError::Service(e)) => return Ok(Round::Backoff(e)),
            };
            match self.recognizer.recognize(&utterance) {
                Ok(text) => {
                    debug!(target: "pagi::voice", text = %text, "heard");
                    if let Some(event) = match_wake_phrase(&text, &self.config.wake_phrase) {
                        return Ok(Round::Wake(event));
                    }
                }
                Err(RecognitionError::Timeout) | Err(RecognitionError::Unintelligible) => continue,
                Err(RecognitionError::Service(e)) => return Ok(Round::Backoff(e)),
            }
        }
        Ok(Round::Stopped)
    }

    fn fire(&self, event: WakeEvent) {
        match catch_unwind(AssertUnwindSafe(|| (self.callback)(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(target: "pagi::voice", error = %e, "wake callback failed"),
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(target: "pagi::voice", panic = %msg, "wake callback panicked");
            }
        }
    }

    /// Sleep up to `d`, waking early on stop. Returns true if stopping.
    fn wait(&self, d: Duration) -> bool {
        let _ = self.stop_rx.recv_timeout(d);
        self.shared.stopping()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phrase_match_is_case_insensitive() {
        let ev = match_wake_phrase("Hey Browser", "hey browser").unwrap();
        assert_eq!(ev.text, "Hey Browser");
        assert_eq!(ev.trailing, None);
    }

    #[test]
    fn trailing_command_is_extracted() {
        let ev = match_wake_phrase("hey browser, search cats.", "Hey Browser").unwrap();
        assert_eq!(ev.trailing.as_deref(), Some("search cats"));
    }

    #[test]
    fn substring_anywhere_matches() {
        assert!(match_wake_phrase("um okay hey browser", "hey browser").is_some());
        assert!(match_wake_phrase("hey brow", "hey browser").is_none());
        assert!(match_wake_phrase("anything", "  ").is_none());
    }

    #[test]
    fn status_json() {
        assert_eq!(DetectorStatus::Listening.to_json()["status"], "listening");
        let failed = DetectorStatus::Failed("no device".into()).to_json();
        assert_eq!(failed["error"], "no device");
    }
}
