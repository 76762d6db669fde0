//! Scoped microphone: one open input stream at a time, closed when the scope ends.
//!
//! Clones of a `Microphone` share the same busy flag, so the wake detector and the
//! command capture can never hold the device at once. A nested `acquire()` fails
//! with `VoiceError::DeviceBusy` instead of opening the device twice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::audio::{AudioSource, CaptureStream};
use crate::error::{VoiceError, VoiceResult};

#[derive(Clone)]
pub struct Microphone {
    source: Arc<dyn AudioSource>,
    in_use: Arc<AtomicBool>,
}

impl Microphone {
    pub fn new(source: Arc<dyn AudioSource>) -> Self {
        Self {
            source,
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the device for the lifetime of the returned scope.
    pub fn acquire(&self) -> VoiceResult<MicrophoneScope> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(VoiceError::DeviceBusy);
        }
        match self.source.open() {
            Ok(stream) => {
                debug!(target: "pagi::voice", device = %self.source.describe(), "microphone acquired");
                Ok(MicrophoneScope {
                    stream: Some(stream),
                    in_use: Arc::clone(&self.in_use),
                })
            }
            Err(e) => {
                self.in_use.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Best-effort: true while some scope holds the device.
    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }
}

/// Live capture. The stream is closed before the busy flag clears.
pub struct MicrophoneScope {
    stream: Option<CaptureStream>,
    in_use: Arc<AtomicBool>,
}

impl MicrophoneScope {
    pub fn sample_rate(&self) -> u32 {
        self.stream.as_ref().map_or(0, |s| s.sample_rate())
    }

    pub fn next_frame(&self, timeout: Duration) -> VoiceResult<Option<Vec<f32>>> {
        match &self.stream {
            Some(s) => s.next_frame(timeout),
            None => Err(VoiceError::AudioStream("microphone released".to_string())),
        }
    }
}

impl Drop for MicrophoneScope {
    fn drop(&mut self) {
        drop(self.stream.take());
        self.in_use.store(false, Ordering::Release);
        debug!(target: "pagi::voice", "microphone released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSource {
        closed: Arc<AtomicUsize>,
        fail: bool,
    }

    impl AudioSource for CountingSource {
        fn open(&self) -> VoiceResult<CaptureStream> {
            if self.fail {
                return Err(VoiceError::AudioDevice("unplugged".into()));
            }
            let (tx, rx) = unbounded();
            let closed = Arc::clone(&self.closed);
            Ok(CaptureStream::new(rx, 16000).on_close(move || {
                drop(tx);
                closed.fetch_add(1, Ordering::SeqCst);
            }))
        }

        fn describe(&self) -> String {
            "counting".into()
        }
    }

    #[test]
    fn nested_acquire_is_busy() {
        let mic = Microphone::new(Arc::new(CountingSource::default()));
        let scope = mic.acquire().unwrap();
        assert!(mic.is_in_use());
        assert!(matches!(mic.clone().acquire(), Err(VoiceError::DeviceBusy)));
        drop(scope);
        assert!(!mic.is_in_use());
        assert!(mic.acquire().is_ok());
    }

    #[test]
    fn release_closes_stream_even_on_panic() {
        let source = Arc::new(CountingSource::default());
        let closed = Arc::clone(&source.closed);
        let mic = Microphone::new(source);
        let m = mic.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _scope = m.acquire().unwrap();
            panic!("decoder blew up");
        }));
        assert!(result.is_err());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!mic.is_in_use());
    }

    #[test]
    fn failed_open_leaves_microphone_free() {
        let mic = Microphone::new(Arc::new(CountingSource {
            fail: true,
            ..Default::default()
        }));
        assert!(matches!(mic.acquire(), Err(VoiceError::AudioDevice(_))));
        assert!(!mic.is_in_use());
    }
}
