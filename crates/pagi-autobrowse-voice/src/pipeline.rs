//! Voice pipeline: wake detector → command capture → hand-off queue.
//!
//! The detector thread only produces `Command`s. It never touches the automation
//! session; the single queue consumer does that.

use anyhow::bail;
use pagi_autobrowse_core::{AppConfig, Command, CommandSender};
use std::sync::Arc;
use tracing::info;

use crate::audio::{AudioSource, CpalSource};
use crate::capture::{CaptureConfig, CommandCapture};
use crate::error::VoiceResult;
use crate::microphone::Microphone;
use crate::stt::{create_best_stt, SpeechRecognizer};
use crate::wake::{DetectorConfig, DetectorStatus, WakeCallback, WakeEvent, WakePhraseDetector};

pub struct VoicePipeline {
    detector: WakePhraseDetector,
}

impl VoicePipeline {
    /// Wire and start the pipeline. `capture` must share the detector's microphone.
    pub fn start(
        config: DetectorConfig,
        microphone: Microphone,
        recognizer: Arc<dyn SpeechRecognizer>,
        capture: CommandCapture,
        sender: CommandSender,
    ) -> VoiceResult<Self> {
        let callback: WakeCallback = Arc::new(move |event: WakeEvent| {
            let text = match event.trailing {
                Some(trailing) => trailing,
                None => match capture.capture() {
                    Some(text) => text,
                    None => return Ok(()),
                },
            };
            let Some(command) = Command::voice(&text) else {
                return Ok(());
            };
            info!(target: "pagi::voice", instruction = %command.instruction, "📨 Voice command queued");
            if !sender.submit(command) {
                bail!("command queue is closed");
            }
            Ok(())
        });

        let detector = WakePhraseDetector::new(config, microphone, recognizer, callback);
        detector.start()?;
        Ok(Self { detector })
    }

    /// Real microphone and the best available STT backend, tuned from `AppConfig`.
    pub fn from_app_config(app: &AppConfig, sender: CommandSender) -> VoiceResult<Self> {
        let source: Arc<dyn AudioSource> = Arc::new(CpalSource::new(app.input_device.clone()));
        let microphone = Microphone::new(source);
        let recognizer = create_best_stt();

        let detector = DetectorConfig {
            wake_phrase: app.wake_phrase.clone(),
            listen_timeout: app.wake_listen_timeout(),
            phrase_limit: app.wake_phrase_limit(),
            backoff: app.recognition_backoff(),
            ..DetectorConfig::default()
        };
        let capture = CommandCapture::new(
            CaptureConfig {
                listen_timeout: app.command_listen_timeout(),
                phrase_limit: app.command_phrase_limit(),
                ..CaptureConfig::default()
            },
            microphone.clone(),
            Arc::clone(&recognizer),
        );
        Self::start(detector, microphone, recognizer, capture, sender)
    }

    pub fn status(&self) -> DetectorStatus {
        self.detector.status()
    }

    pub fn is_running(&self) -> bool {
        self.detector.is_running()
    }

    /// Restart after `stop()` or a device failure.
    pub fn restart(&self) -> VoiceResult<()> {
        self.detector.start()
    }

    pub fn stop(&self) {
        self.detector.stop();
    }
}
