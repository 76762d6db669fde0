//! Wake detector behaviour with a scripted audio source and recognizer (no hardware).

use crossbeam_channel::unbounded;
use pagi_autobrowse_core::{CommandOrigin, CommandQueue};
use pagi_autobrowse_voice::{
    AudioSource, CaptureConfig, CaptureStream, CommandCapture, DetectorConfig, DetectorStatus, ListenerConfig,
    Microphone, RecognitionError, SpeechRecognizer, Utterance, VoiceError, VoicePipeline, VoiceResult,
    WakeCallback, WakeEvent, WakePhraseDetector,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const RATE: u32 = 16_000;
const FRAME: usize = 1_600; // 100 ms

/// Every open yields 2 quiet frames (calibration), then a few "spoken" bursts
/// separated by a full pause. The stream stays open and silent afterwards.
#[derive(Default)]
struct FakeSource {
    live: Arc<AtomicBool>,
    opens: AtomicUsize,
    overlapping_opens: AtomicUsize,
    fail: bool,
}

impl FakeSource {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl AudioSource for FakeSource {
    fn open(&self) -> VoiceResult<CaptureStream> {
        if self.fail {
            return Err(VoiceError::AudioDevice("no input device".into()));
        }
        if self.live.swap(true, Ordering::SeqCst) {
            self.overlapping_opens.fetch_add(1, Ordering::SeqCst);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = unbounded();
        let mut amps = vec![0.0f32; 2];
        for _ in 0..4 {
            amps.extend([0.5; 3]);
            amps.extend([0.0; 9]);
        }
        for amp in amps {
            tx.send(vec![amp; FRAME]).unwrap();
        }
        let live = Arc::clone(&self.live);
        Ok(CaptureStream::new(rx, RATE).on_close(move || {
            drop(tx);
            live.store(false, Ordering::SeqCst);
        }))
    }

    fn describe(&self) -> String {
        "fake".into()
    }
}

/// Returns scripted results in order, then `fallback` forever.
struct ScriptedStt {
    script: Mutex<VecDeque<Result<String, RecognitionError>>>,
    fallback: Result<String, RecognitionError>,
}

impl ScriptedStt {
    fn new(script: Vec<Result<String, RecognitionError>>, fallback: Result<String, RecognitionError>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
        })
    }
}

impl SpeechRecognizer for ScriptedStt {
    fn recognize(&self, _utterance: &Utterance) -> Result<String, RecognitionError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn fast_config() -> DetectorConfig {
    DetectorConfig {
        wake_phrase: "hey browser".into(),
        listen_timeout: Duration::from_millis(200),
        phrase_limit: Duration::from_secs(3),
        calibration: Duration::from_millis(200),
        backoff: Duration::from_millis(50),
        listener: ListenerConfig::default(),
    }
}

fn wait_for(mut cond: impl FnMut() -> bool, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn callback_runs_only_after_microphone_is_released() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let source = Arc::new(FakeSource::default());
    let mic = Microphone::new(source.clone());
    let stt = ScriptedStt::new(
        vec![Ok("nothing to see".into()), Ok("Hey Browser, open tab".into())],
        Err(RecognitionError::Unintelligible),
    );

    let (event_tx, event_rx) = unbounded::<(WakeEvent, bool, bool)>();
    let callback: WakeCallback = {
        let source = Arc::clone(&source);
        let mic = mic.clone();
        Arc::new(move |event: WakeEvent| -> anyhow::Result<()> {
            let held_during_callback = source.is_live();
            // The callback is allowed to take the microphone itself.
            let reacquired = mic.acquire().is_ok();
            event_tx.send((event, held_during_callback, reacquired))?;
            Ok(())
        })
    };

    let detector = WakePhraseDetector::new(fast_config(), mic, stt, callback);
    detector.start().unwrap();
    assert_eq!(detector.status(), DetectorStatus::Listening);

    let (event, held, reacquired) = event_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event.trailing.as_deref(), Some("open tab"));
    assert!(!held, "microphone was still open when the callback ran");
    assert!(reacquired, "callback could not acquire the microphone");

    detector.stop();
    assert_eq!(source.overlapping_opens.load(Ordering::SeqCst), 0);
    assert_eq!(detector.status(), DetectorStatus::Stopped);
}

#[test]
fn failing_callbacks_do_not_kill_the_loop() {
    let source = Arc::new(FakeSource::default());
    let mic = Microphone::new(source.clone());
    let stt = ScriptedStt::new(vec![], Ok("hey browser".into()));

    let calls = Arc::new(AtomicUsize::new(0));
    let callback: WakeCallback = {
        let calls = Arc::clone(&calls);
        Arc::new(move |_event: WakeEvent| -> anyhow::Result<()> {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => panic!("handler crashed"),
                1 => anyhow::bail!("handler failed"),
                _ => Ok(()),
            }
        })
    };

    let detector = WakePhraseDetector::new(fast_config(), mic, stt, callback);
    detector.start().unwrap();

    assert!(wait_for(|| calls.load(Ordering::SeqCst) >= 3, Duration::from_secs(5)));
    assert!(detector.is_running());
    assert_eq!(detector.status(), DetectorStatus::Listening);
    detector.stop();
}

#[test]
fn device_open_failure_is_reported_and_ends_thread() {
    let source = Arc::new(FakeSource {
        fail: true,
        ..Default::default()
    });
    let stt = ScriptedStt::new(vec![], Err(RecognitionError::Unintelligible));
    let callback: WakeCallback = Arc::new(|_: WakeEvent| -> anyhow::Result<()> { Ok(()) });
    let detector = WakePhraseDetector::new(fast_config(), Microphone::new(source), stt, callback);

    detector.start().unwrap();
    assert!(wait_for(|| !detector.is_running(), Duration::from_secs(2)));
    assert!(matches!(detector.status(), DetectorStatus::Failed(_)));

    // A restart is allowed and fails the same way.
    detector.start().unwrap();
    assert!(wait_for(|| !detector.is_running(), Duration::from_secs(2)));
    assert!(matches!(detector.status(), DetectorStatus::Failed(_)));
    detector.stop();
}

#[test]
fn service_error_backs_off_and_resumes() {
    let source = Arc::new(FakeSource::default());
    let mic = Microphone::new(source.clone());
    let stt = ScriptedStt::new(
        vec![Err(RecognitionError::Service("quota exceeded".into()))],
        Ok("hey browser".into()),
    );
    let (tx, rx) = unbounded();
    let callback: WakeCallback = Arc::new(move |event: WakeEvent| -> anyhow::Result<()> {
        tx.send(event)?;
        Ok(())
    });

    let detector = WakePhraseDetector::new(fast_config(), mic, stt, callback);
    detector.start().unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    // The failed round released the microphone and a fresh one was opened.
    assert!(source.opens.load(Ordering::SeqCst) >= 2);
    detector.stop();
}

#[test]
fn stop_is_idempotent_prompt_and_restartable() {
    let source = Arc::new(FakeSource::default());
    let stt = ScriptedStt::new(vec![], Err(RecognitionError::Unintelligible));
    let callback: WakeCallback = Arc::new(|_: WakeEvent| -> anyhow::Result<()> { Ok(()) });
    let detector = WakePhraseDetector::new(fast_config(), Microphone::new(source.clone()), stt, callback);

    detector.stop();
    assert_eq!(detector.status(), DetectorStatus::Stopped);

    detector.start().unwrap();
    detector.start().unwrap();
    assert!(detector.is_running());
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    detector.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    detector.stop();
    assert!(!detector.is_running());
    assert!(!source.is_live());

    detector.start().unwrap();
    assert!(detector.is_running());
    detector.stop();
}

#[test]
fn pipeline_queues_spoken_and_trailing_commands_in_order() {
    let source = Arc::new(FakeSource::default());
    let mic = Microphone::new(source.clone());
    let stt = ScriptedStt::new(
        vec![
            Ok("hey browser".into()),
            Ok("search cats".into()),
            Ok("hey browser open tab".into()),
        ],
        Err(RecognitionError::Unintelligible),
    );
    let capture = CommandCapture::new(
        CaptureConfig {
            calibration: Duration::from_millis(200),
            listen_timeout: Duration::from_secs(1),
            phrase_limit: Duration::from_secs(3),
            listener: ListenerConfig::default(),
        },
        mic.clone(),
        stt.clone(),
    );
    let (sender, receiver) = CommandQueue::new();

    let pipeline = VoicePipeline::start(fast_config(), mic, stt, capture, sender).unwrap();

    let first = receiver.next(Duration::from_secs(5)).unwrap().unwrap();
    let second = receiver.next(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(first.instruction, "search cats");
    assert_eq!(second.instruction, "open tab");
    assert_eq!(first.origin, CommandOrigin::Voice);

    pipeline.stop();
    assert_eq!(pipeline.status(), DetectorStatus::Stopped);
    assert_eq!(source.overlapping_opens.load(Ordering::SeqCst), 0);
}
