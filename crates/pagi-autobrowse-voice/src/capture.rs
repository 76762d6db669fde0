//! Command capture after the wake phrase: one calibrated listen, one transcription.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::RecognitionError;
use crate::listen::{Listener, ListenerConfig};
use crate::microphone::Microphone;
use crate::stt::SpeechRecognizer;

/// Capture tuning
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Ambient calibration before listening (default: 0.5s)
    pub calibration: Duration,

    /// Wait for the user to start speaking (default: 10s)
    pub listen_timeout: Duration,

    /// Longest command (default: 15s)
    pub phrase_limit: Duration,

    pub listener: ListenerConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            calibration: Duration::from_millis(500),
            listen_timeout: Duration::from_secs(10),
            phrase_limit: Duration::from_secs(15),
            listener: ListenerConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct CommandCapture {
    config: CaptureConfig,
    microphone: Microphone,
    recognizer: Arc<dyn SpeechRecognizer>,
}

impl CommandCapture {
    pub fn new(config: CaptureConfig, microphone: Microphone, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self {
            config,
            microphone,
            recognizer,
        }
    }

    /// Listen for one command. Every failure is logged and yields `None`.
    pub fn capture(&self) -> Option<String> {
        let scope = match self.microphone.acquire() {
            Ok(scope) => scope,
            Err(e) => {
                warn!(target: "pagi::voice", error = %e, "command capture could not open the microphone");
                return None;
            }
        };

        let mut listener = Listener::new(self.config.listener.clone());
        info!(target: "pagi::voice", "🎤 Listening for command...");
        let heard = listener
            .calibrate(&scope, self.config.calibration)
            .and_then(|_| listener.listen(&scope, self.config.listen_timeout, self.config.phrase_limit));
        // Free the device before the (possibly slow) transcription.
        drop(scope);

        let result = heard.and_then(|utterance| self.recognizer.recognize(&utterance));
        match result {
            Ok(text) => {
                info!(target: "pagi::voice", command = %text, "🗣️ Command heard");
                Some(text)
            }
            Err(RecognitionError::Timeout) => {
                info!(target: "pagi::voice", "no command spoken before timeout");
                None
            }
            Err(RecognitionError::Unintelligible) => {
                info!(target: "pagi::voice", "could not understand the command");
                None
            }
            Err(RecognitionError::Service(e)) => {
                warn!(target: "pagi::voice", error = %e, "speech recognition service error");
                None
            }
        }
    }
}
