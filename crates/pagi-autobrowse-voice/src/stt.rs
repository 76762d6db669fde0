//! **Speech-to-Text (STT)**: Turn an `Utterance` into text for wake matching and commands.
//!
//! Implement `SpeechRecognizer` for a new backend. Empty output is reported as
//! `RecognitionError::Unintelligible`; transport and API failures as `Service`.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{RecognitionError, VoiceError, VoiceResult};
use crate::listen::Utterance;

/// Backend for converting an utterance to text. Blocking.
pub trait SpeechRecognizer: Send + Sync {
    fn recognize(&self, utterance: &Utterance) -> Result<String, RecognitionError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Encode f32 PCM (mono) to 16-bit WAV bytes for API upload.
fn pcm_f32_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let i = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.extend_from_slice(&i.to_le_bytes());
    }
    buf
}

fn non_empty(text: &str) -> Result<String, RecognitionError> {
    let text = text.trim();
    if text.is_empty() {
        Err(RecognitionError::Unintelligible)
    } else {
        Ok(text.to_string())
    }
}

/// Returns the same text for every utterance. Used when no real backend is configured.
#[derive(Debug, Clone, Default)]
pub struct FixedStt {
    /// `None` makes every utterance unintelligible.
    pub response: Option<String>,
}

impl FixedStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self {
            response: Some(s.into()),
        }
    }
}

impl SpeechRecognizer for FixedStt {
    fn recognize(&self, _utterance: &Utterance) -> Result<String, RecognitionError> {
        non_empty(self.response.as_deref().unwrap_or(""))
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// OpenAI-compatible transcription API (`POST {base}/audio/transcriptions`).
/// Uses `STT_API_URL` (e.g. https://api.openai.com/v1), `STT_API_KEY` and `STT_MODEL` (default whisper-1).
#[derive(Debug, Clone)]
pub struct TranscriptionApiStt {
    /// Base URL without trailing slash.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    client: reqwest::blocking::Client,
}

impl TranscriptionApiStt {
    /// Build from environment: STT_API_URL, STT_API_KEY (or OPENAI_API_KEY), STT_MODEL.
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("STT_API_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("STT_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| VoiceError::Config("STT requires STT_API_KEY or OPENAI_API_KEY".to_string()))?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url, api_key, model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

impl SpeechRecognizer for TranscriptionApiStt {
    fn recognize(&self, utterance: &Utterance) -> Result<String, RecognitionError> {
        if utterance.samples.is_empty() {
            return Err(RecognitionError::Unintelligible);
        }
        let service = |e: reqwest::Error| RecognitionError::Service(e.to_string());

        let wav = pcm_f32_to_wav(&utterance.samples, utterance.sample_rate);
        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(service)?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let res = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(service)?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(RecognitionError::Service(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().map_err(service)?;
        let text = json.get("text").and_then(|t| t.as_str()).unwrap_or("");
        debug!(target: "pagi::voice", text, "transcribed");
        non_empty(text)
    }

    fn name(&self) -> &'static str {
        "transcription-api"
    }
}

// -----------------------------------------------------------------------------
// Local Whisper STT (optional feature). Requires whisper.cpp/ggml.
// -----------------------------------------------------------------------------
#[cfg(feature = "whisper")]
mod whisper_stt {
    use super::*;
    use std::sync::Mutex;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    const WHISPER_RATE: u32 = 16_000;

    /// Local Whisper: loads a ggml model (e.g. ggml-base.en.bin) and runs on-device.
    pub struct WhisperStt {
        #[allow(dead_code)]
        context: WhisperContext,
        state: Mutex<whisper_rs::WhisperState>,
    }

    impl WhisperStt {
        pub fn new(model_path: &str) -> VoiceResult<Self> {
            let context = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
                .map_err(|e| VoiceError::Stt(format!("Whisper load failed: {}", e)))?;
            let state = context
                .create_state()
                .map_err(|e| VoiceError::Stt(format!("Whisper state init failed: {}", e)))?;
            Ok(Self {
                context,
                state: Mutex::new(state),
            })
        }

        /// `WHISPER_MODEL_PATH` must point to a .bin model file.
        pub fn from_env() -> VoiceResult<Self> {
            let path = std::env::var("WHISPER_MODEL_PATH")
                .map_err(|_| VoiceError::Config("WHISPER_MODEL_PATH not set".to_string()))?;
            let path = path.trim();
            if path.is_empty() {
                return Err(VoiceError::Config("WHISPER_MODEL_PATH is empty".to_string()));
            }
            Self::new(path)
        }
    }

    impl SpeechRecognizer for WhisperStt {
        fn recognize(&self, utterance: &Utterance) -> Result<String, RecognitionError> {
            if utterance.samples.is_empty() {
                return Err(RecognitionError::Unintelligible);
            }
            let audio = resample_linear(&utterance.samples, utterance.sample_rate, WHISPER_RATE);

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_no_timestamps(true);
            params.set_language(Some("en"));

            let mut state = self
                .state
                .lock()
                .map_err(|e| RecognitionError::Service(format!("Whisper lock poisoned: {}", e)))?;
            state
                .full(&params, &audio)
                .map_err(|e| RecognitionError::Service(format!("Whisper inference failed: {}", e)))?;
            let text = state
                .as_iter()
                .filter_map(|seg| seg.to_str().ok())
                .collect::<Vec<_>>()
                .join(" ");
            non_empty(&text)
        }

        fn name(&self) -> &'static str {
            "whisper"
        }
    }
}

#[cfg(feature = "whisper")]
pub use whisper_stt::WhisperStt;

/// Linear resampling; good enough for speech into a 16 kHz model.
pub fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() || from == 0 {
        return samples.to_vec();
    }
    let ratio = from as f64 / to as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

/// Pick the best available backend.
/// Priority: (1) WhisperStt if `WHISPER_MODEL_PATH` loads (requires `whisper` feature),
/// (2) TranscriptionApiStt if an STT key is set, (3) FixedStt (hears nothing).
pub fn create_best_stt() -> Arc<dyn SpeechRecognizer> {
    #[cfg(feature = "whisper")]
    {
        if let Ok(w) = whisper_stt::WhisperStt::from_env() {
            info!(target: "pagi::voice", "🗣️ STT backend: local whisper");
            return Arc::new(w);
        }
    }
    if let Ok(api) = TranscriptionApiStt::from_env() {
        info!(target: "pagi::voice", model = %api.model, "🗣️ STT backend: transcription API");
        return Arc::new(api);
    }
    info!(target: "pagi::voice", "🗣️ No STT backend configured; voice commands will not be recognized");
    Arc::new(FixedStt::new())
}
