//! Energy-based utterance listener.
//!
//! Implements the same "gap logic" as a turn manager: speech starts when a frame's
//! RMS energy crosses the threshold and the utterance ends after a pause of silence
//! (default 800 ms) or when the phrase limit is hit. Durations inside an utterance
//! are counted in samples, not wall time.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::RecognitionError;
use crate::microphone::MicrophoneScope;

/// Extra wall time allowed beyond the audio-time limits before giving up on a stalled stream.
const STALL_GRACE: Duration = Duration::from_millis(500);

/// A captured stretch of speech, mono f32.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
}

/// Listener tuning
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Silence that ends an utterance (default: 800ms)
    pub pause: Duration,

    /// Lowest allowed energy threshold (default: 0.01 RMS)
    pub energy_floor: f32,

    /// Threshold = ambient RMS × this (default: 1.5)
    pub ambient_multiplier: f32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            pause: Duration::from_millis(800),
            energy_floor: 0.01,
            ambient_multiplier: 1.5,
        }
    }
}

pub struct Listener {
    config: ListenerConfig,
    energy_threshold: f32,
}

impl Listener {
    pub fn new(config: ListenerConfig) -> Self {
        let energy_threshold = config.energy_floor;
        Self {
            config,
            energy_threshold,
        }
    }

    pub fn energy_threshold(&self) -> f32 {
        self.energy_threshold
    }

    /// Measure ambient noise for `duration` and set the threshold from it.
    pub fn calibrate(&mut self, scope: &MicrophoneScope, duration: Duration) -> Result<f32, RecognitionError> {
        let wanted = samples_for(duration, scope.sample_rate());
        let deadline = Instant::now() + duration + STALL_GRACE;
        let mut sum_sq = 0.0f64;
        let mut count = 0usize;

        while count < wanted {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match scope.next_frame(remaining)? {
                Some(frame) => {
                    sum_sq += frame.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>();
                    count += frame.len();
                }
                None => break,
            }
        }

        if count > 0 {
            let ambient = (sum_sq / count as f64).sqrt() as f32;
            self.energy_threshold = (ambient * self.config.ambient_multiplier).max(self.config.energy_floor);
            debug!(target: "pagi::voice", ambient, threshold = self.energy_threshold, "ambient noise calibrated");
        }
        Ok(self.energy_threshold)
    }

    /// Wait up to `timeout` for speech to start, then record until a pause or `phrase_limit`.
    pub fn listen(
        &self,
        scope: &MicrophoneScope,
        timeout: Duration,
        phrase_limit: Duration,
    ) -> Result<Utterance, RecognitionError> {
        let sample_rate = scope.sample_rate();
        let deadline = Instant::now() + timeout;

        let mut samples = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RecognitionError::Timeout);
            }
            match scope.next_frame(remaining)? {
                Some(frame) if rms(&frame) > self.energy_threshold => break frame,
                Some(_) => continue,
                None => return Err(RecognitionError::Timeout),
            }
        };
        let timestamp = Utc::now();

        let pause_samples = samples_for(self.config.pause, sample_rate);
        let limit_samples = samples_for(phrase_limit, sample_rate);
        let stall_deadline = Instant::now() + phrase_limit + STALL_GRACE;
        let mut silent = 0usize;

        while samples.len() < limit_samples {
            let remaining = stall_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some(frame) = scope.next_frame(remaining)? else {
                break;
            };
            if rms(&frame) > self.energy_threshold {
                silent = 0;
            } else {
                silent += frame.len();
            }
            samples.extend_from_slice(&frame);
            if silent >= pause_samples {
                break;
            }
        }
        samples.truncate(limit_samples.max(1));

        let duration = Duration::from_secs_f64(samples.len() as f64 / sample_rate.max(1) as f64);
        debug!(target: "pagi::voice", duration_ms = duration.as_millis() as u64, "utterance captured");
        Ok(Utterance {
            samples,
            sample_rate,
            timestamp,
            duration,
        })
    }
}

/// Root-mean-square energy of a frame.
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = frame.iter().map(|s| s * s).sum();
    (sum_sq / frame.len() as f32).sqrt()
}

fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * sample_rate as f64).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioSource, CaptureStream};
    use crate::error::VoiceResult;
    use crate::microphone::Microphone;
    use crossbeam_channel::unbounded;
    use std::sync::{Arc, Mutex};

    const RATE: u32 = 1000;
    const FRAME: usize = 100; // 100 ms

    /// Plays a fixed list of frame amplitudes, then stays silent-but-open.
    struct Script(Mutex<Vec<f32>>);

    impl AudioSource for Script {
        fn open(&self) -> VoiceResult<CaptureStream> {
            let (tx, rx) = unbounded();
            for amp in self.0.lock().unwrap().drain(..) {
                tx.send(vec![amp; FRAME]).unwrap();
            }
            Ok(CaptureStream::new(rx, RATE).on_close(move || drop(tx)))
        }

        fn describe(&self) -> String {
            "script".into()
        }
    }

    fn mic(amps: Vec<f32>) -> Microphone {
        Microphone::new(Arc::new(Script(Mutex::new(amps))))
    }

    #[test]
    fn rms_of_constant_signal() {
        assert!((rms(&[0.5; 10]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn calibration_raises_threshold_above_ambient() {
        let mic = mic(vec![0.1; 5]);
        let scope = mic.acquire().unwrap();
        let mut listener = Listener::new(ListenerConfig::default());
        let threshold = listener.calibrate(&scope, Duration::from_millis(500)).unwrap();
        assert!((threshold - 0.15).abs() < 1e-4);
    }

    #[test]
    fn quiet_room_keeps_floor() {
        let mic = mic(vec![0.0; 5]);
        let scope = mic.acquire().unwrap();
        let mut listener = Listener::new(ListenerConfig::default());
        assert_eq!(listener.calibrate(&scope, Duration::from_millis(500)).unwrap(), 0.01);
    }

    #[test]
    fn utterance_ends_after_pause() {
        // 2 quiet, 3 loud, 9 quiet, then more loud that must not be included.
        let mut amps = vec![0.0, 0.0, 0.5, 0.5, 0.5];
        amps.extend(std::iter::repeat(0.0).take(9));
        amps.extend([0.5, 0.5]);
        let mic = mic(amps);
        let scope = mic.acquire().unwrap();
        let listener = Listener::new(ListenerConfig::default());

        let u = listener
            .listen(&scope, Duration::from_secs(1), Duration::from_secs(10))
            .unwrap();
        // 3 loud frames + 8 quiet frames (800 ms pause)
        assert_eq!(u.samples.len(), 11 * FRAME);
        assert_eq!(u.duration.as_millis(), 1100);
    }

    #[test]
    fn phrase_limit_caps_length() {
        let mic = mic(vec![0.5; 30]);
        let scope = mic.acquire().unwrap();
        let listener = Listener::new(ListenerConfig::default());
        let u = listener
            .listen(&scope, Duration::from_secs(1), Duration::from_millis(1500))
            .unwrap();
        assert_eq!(u.samples.len(), 1500);
    }

    #[test]
    fn silence_times_out() {
        let mic = mic(vec![0.0; 3]);
        let scope = mic.acquire().unwrap();
        let listener = Listener::new(ListenerConfig::default());
        let err = listener
            .listen(&scope, Duration::from_millis(50), Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err, RecognitionError::Timeout);
    }
}
