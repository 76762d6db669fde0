//! Audio input via CPAL.
//!
//! `cpal::Stream` is not `Send`, so each open stream lives on its own thread and
//! hands mono f32 frames over a bounded channel. Dropping the `CaptureStream`
//! stops that thread, which drops the cpal stream and closes the device.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{VoiceError, VoiceResult};

/// Frames buffered between the audio callback and the listener.
const FRAME_BUFFER: usize = 64;

/// Something that can open an input stream (a real device, or a fake in tests).
pub trait AudioSource: Send + Sync {
    fn open(&self) -> VoiceResult<CaptureStream>;

    /// Human-readable device name for logs.
    fn describe(&self) -> String;
}

/// An open input stream. Closing happens on drop.
pub struct CaptureStream {
    frames: Receiver<Vec<f32>>,
    sample_rate: u32,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl CaptureStream {
    /// Wrap a receiver of mono frames at `sample_rate`.
    pub fn new(frames: Receiver<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate,
            on_close: None,
        }
    }

    /// Run `f` once when the stream is dropped.
    pub fn on_close(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Next frame, or `None` if nothing arrived within `timeout`.
    pub fn next_frame(&self, timeout: Duration) -> VoiceResult<Option<Vec<f32>>> {
        match self.frames.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(VoiceError::AudioStream("capture stream closed".to_string())),
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        if let Some(close) = self.on_close.take() {
            close();
        }
    }
}

/// Default or named input device.
#[derive(Debug, Clone, Default)]
pub struct CpalSource {
    /// Substring of the device name; `None` uses the host default.
    device_name: Option<String>,
}

impl CpalSource {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name: device_name.filter(|n| !n.trim().is_empty()),
        }
    }
}

impl AudioSource for CpalSource {
    fn open(&self) -> VoiceResult<CaptureStream> {
        let (frame_tx, frame_rx) = bounded::<Vec<f32>>(FRAME_BUFFER);
        let (ready_tx, ready_rx) = bounded::<VoiceResult<u32>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let name = self.device_name.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || run_capture_thread(name, frame_tx, ready_tx, stop_rx))?;

        let sample_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(VoiceError::AudioStream("capture thread exited before starting".to_string()));
            }
        };

        Ok(CaptureStream::new(frame_rx, sample_rate).on_close(move || {
            let _ = stop_tx.send(());
            if handle.join().is_err() {
                warn!(target: "pagi::voice", "audio capture thread panicked");
            }
        }))
    }

    fn describe(&self) -> String {
        self.device_name.clone().unwrap_or_else(|| "default input".to_string())
    }
}

fn run_capture_thread(
    device_name: Option<String>,
    frame_tx: Sender<Vec<f32>>,
    ready_tx: Sender<VoiceResult<u32>>,
    stop_rx: Receiver<()>,
) {
    let (stream, sample_rate) = match build_stream(device_name.as_deref(), frame_tx) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(e.into()));
        return;
    }
    let _ = ready_tx.send(Ok(sample_rate));
    debug!(target: "pagi::voice", sample_rate, "audio capture thread started");

    let _ = stop_rx.recv();
    drop(stream);
    debug!(target: "pagi::voice", "audio capture thread stopped");
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> VoiceResult<Device> {
    let Some(name) = name else {
        return host
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()));
    };
    for device in host.input_devices()? {
        if let Ok(device_name) = device.name() {
            if device_name.contains(name) {
                return Ok(device);
            }
        }
    }
    Err(VoiceError::AudioDevice(format!("No input device matching '{}'", name)))
}

fn build_stream(device_name: Option<&str>, tx: Sender<Vec<f32>>) -> VoiceResult<(Stream, u32)> {
    let host = cpal::default_host();
    let device = find_device(&host, device_name)?;
    info!(
        target: "pagi::voice",
        "📱 Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = device.default_input_config()?;
    let sample_format = supported.sample_format();
    let channels = supported.channels() as usize;
    let sample_rate = supported.sample_rate().0;
    let config: StreamConfig = supported.config();

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = tx.try_send(to_mono(data, channels));
            },
            stream_error,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                let _ = tx.try_send(to_mono(&samples, channels));
            },
            stream_error,
            None,
        )?,
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data
                    .iter()
                    .map(|&s| (s as f32 / u16::MAX as f32) * 2.0 - 1.0)
                    .collect();
                let _ = tx.try_send(to_mono(&samples, channels));
            },
            stream_error,
            None,
        )?,
        other => {
            return Err(VoiceError::AudioDevice(format!("Unsupported sample format: {:?}", other)));
        }
    };
    Ok((stream, sample_rate))
}

fn stream_error(err: cpal::StreamError) {
    error!(target: "pagi::voice", "Audio stream error: {}", err);
}

/// Average interleaved channels into one.
fn to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Names of all input devices, for `--device` discovery.
pub fn list_input_devices() -> Vec<String> {
    cpal::default_host()
        .input_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}
