//! Error types for the voice pipeline

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Device and setup failures. These end a capture; some end the detector thread.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    /// The microphone is already held by another capture scope.
    #[error("Microphone is busy (already acquired)")]
    DeviceBusy,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one listen/decode attempt that produced no text.
///
/// `Timeout` and `Unintelligible` are routine; `Service` is transient and retried after a backoff.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("no speech before timeout")]
    Timeout,

    #[error("speech was unintelligible")]
    Unintelligible,

    #[error("recognition service error: {0}")]
    Service(String),
}

impl From<VoiceError> for RecognitionError {
    fn from(err: VoiceError) -> Self {
        RecognitionError::Service(err.to_string())
    }
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}
