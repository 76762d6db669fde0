//! # PAGI AutoBrowse Voice - Wake Phrase to Command Queue
//!
//! Listens for a wake phrase, captures the spoken command that follows, and hands
//! it to the automation session through the command queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────── wake-detector thread ─────────────────────────────┐
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌────────────────┐   │
//! │  │  Microphone  │ → │   Listener   │ → │     STT      │ → │ Wake phrase?   │   │
//! │  │ (cpal scope) │   │ (energy/gap) │   │  (API/local) │   │ (substring)    │   │
//! │  └──────────────┘   └──────────────┘   └──────────────┘   └───────┬────────┘   │
//! │         mic released before callback                              ↓            │
//! │                                             ┌──────────────────────────────┐   │
//! │                                             │ CommandCapture → submit()    │───┼──→ CommandQueue
//! │                                             └──────────────────────────────┘   │
//! └────────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod capture;
pub mod error;
pub mod listen;
pub mod microphone;
pub mod pipeline;
pub mod stt;
pub mod wake;

pub use audio::{list_input_devices, AudioSource, CaptureStream, CpalSource};
pub use capture::{CaptureConfig, CommandCapture};
pub use error::{RecognitionError, VoiceError, VoiceResult};
pub use listen::{rms, Listener, ListenerConfig, Utterance};
pub use microphone::{Microphone, MicrophoneScope};
pub use pipeline::VoicePipeline;
pub use stt::{create_best_stt, resample_linear, FixedStt, SpeechRecognizer, TranscriptionApiStt};
#[cfg(feature = "whisper")]
pub use stt::WhisperStt;
pub use wake::{match_wake_phrase, DetectorConfig, DetectorStatus, WakeCallback, WakeEvent, WakePhraseDetector};
