//! Queue + consumer: commands from the voice producer run in order, one at a time,
//! interleaved safely with direct requests.

use crossbeam_channel::unbounded;
use pagi_autobrowse_core::{
    AutomationEngine, Command, CommandConsumer, CommandQueue, EngineFactory, EngineFailure, PlaceholderEngineFactory,
    SessionConfig, SessionError, SessionManager,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Sleeps `step` per instruction and panics on "explode".
struct FragileFactory {
    step: Duration,
    constructed: Arc<AtomicUsize>,
}

struct FragileEngine {
    step: Duration,
}

impl EngineFactory for FragileFactory {
    fn construct(&self, _config: &SessionConfig) -> Result<Box<dyn AutomationEngine>, EngineFailure> {
        self.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FragileEngine { step: self.step }))
    }

    fn name(&self) -> &'static str {
        "fragile"
    }
}

impl AutomationEngine for FragileEngine {
    fn act(&mut self, instruction: &str) -> Result<String, EngineFailure> {
        thread::sleep(self.step);
        if instruction == "explode" {
            panic!("browser crashed");
        }
        Ok(format!("did {}", instruction))
    }

    fn release(&mut self) {}
}

fn fragile_session(step: Duration) -> (Arc<SessionManager>, Arc<AtomicUsize>) {
    let constructed = Arc::new(AtomicUsize::new(0));
    let factory = FragileFactory {
        step,
        constructed: Arc::clone(&constructed),
    };
    let session = SessionManager::new(Arc::new(factory));
    session
        .configure(SessionConfig::new("test-api-key-123", "https://example.com").unwrap())
        .unwrap();
    (Arc::new(session), constructed)
}

fn configured_session() -> Arc<SessionManager> {
    let session = SessionManager::new(Arc::new(PlaceholderEngineFactory));
    session
        .configure(SessionConfig::new("test-api-key-123", "https://example.com").unwrap())
        .unwrap();
    Arc::new(session)
}

#[test]
fn voice_commands_execute_in_submission_order() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let session = configured_session();
    let (sender, receiver) = CommandQueue::new();
    let (report_tx, report_rx) = unbounded();
    let mut consumer = CommandConsumer::spawn(Arc::clone(&session), receiver, Some(report_tx)).unwrap();
    assert!(consumer.is_running());

    assert!(sender.submit(Command::voice("open tab").unwrap()));
    assert!(sender.submit(Command::voice("search cats").unwrap()));

    let first = report_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    let second = report_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(first.command.instruction, "open tab");
    assert_eq!(second.command.instruction, "search cats");
    assert!(first.is_success() && second.is_success());
    assert!(first.finished_at <= second.finished_at);

    consumer.stop();
    assert!(!consumer.is_running());
    assert_eq!(session.invocations(), 2);
}

#[test]
fn producer_submit_does_not_wait_for_engine() {
    // Unconfigured session: the consumer still drains, reporting not-ready.
    let session = Arc::new(SessionManager::new(Arc::new(PlaceholderEngineFactory)));
    let (sender, receiver) = CommandQueue::new();
    let (report_tx, report_rx) = unbounded();
    let _consumer = CommandConsumer::spawn(Arc::clone(&session), receiver, Some(report_tx)).unwrap();

    for i in 0..20 {
        assert!(sender.submit(Command::voice(format!("cmd {}", i)).unwrap()));
    }

    for i in 0..20 {
        let report = report_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(report.command.instruction, format!("cmd {}", i));
        assert_eq!(report.result, Err(SessionError::NotConfigured));
    }
}

#[test]
fn queue_and_direct_requests_share_one_session() {
    let session = configured_session();
    let (sender, receiver) = CommandQueue::new();
    let (report_tx, report_rx) = unbounded();
    let mut consumer = CommandConsumer::spawn(Arc::clone(&session), receiver, Some(report_tx)).unwrap();

    let direct = {
        let session = Arc::clone(&session);
        thread::spawn(move || (0..5).map(|i| session.execute(&format!("direct {}", i))).collect::<Vec<_>>())
    };
    for i in 0..5 {
        sender.submit(Command::voice(format!("voice {}", i)).unwrap());
    }

    let direct_results = direct.join().unwrap();
    assert!(direct_results.iter().all(|r| r.is_ok()));
    for _ in 0..5 {
        assert!(report_rx.recv_timeout(Duration::from_secs(2)).unwrap().is_success());
    }

    consumer.stop();
    assert_eq!(session.invocations(), 10);
}

#[test]
fn consumer_exits_when_producers_are_gone() {
    let session = configured_session();
    let (sender, receiver) = CommandQueue::new();
    let consumer = CommandConsumer::spawn(session, receiver, None).unwrap();
    drop(sender);

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while consumer.is_running() && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert!(!consumer.is_running());
}

#[test]
fn engine_panic_does_not_stop_the_consumer() {
    let (session, constructed) = fragile_session(Duration::ZERO);
    let (sender, receiver) = CommandQueue::new();
    let (report_tx, report_rx) = unbounded();
    let mut consumer = CommandConsumer::spawn(Arc::clone(&session), receiver, Some(report_tx)).unwrap();

    assert!(sender.submit(Command::voice("explode").unwrap()));
    assert!(sender.submit(Command::voice("open tab").unwrap()));

    let crashed = report_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(crashed.command.instruction, "explode");
    match &crashed.result {
        Err(SessionError::EngineError(msg)) => assert!(msg.contains("browser crashed"), "{}", msg),
        other => panic!("unexpected result: {:?}", other),
    }

    let next = report_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(next.result, Ok("did open tab".to_string()));
    // The crashed browser was discarded and a fresh one started.
    assert_eq!(constructed.load(Ordering::SeqCst), 2);

    assert!(consumer.is_running());
    assert!(sender.submit(Command::voice("search cats").unwrap()));
    assert!(report_rx.recv_timeout(Duration::from_secs(2)).unwrap().is_success());
    consumer.stop();
}

#[test]
fn stop_reports_commands_left_in_the_queue() {
    let (session, _) = fragile_session(Duration::from_millis(200));
    let (sender, receiver) = CommandQueue::new();
    let (report_tx, report_rx) = unbounded();
    let mut consumer = CommandConsumer::spawn(session, receiver, Some(report_tx)).unwrap();

    for i in 0..5 {
        assert!(sender.submit(Command::voice(format!("step {}", i)).unwrap()));
    }
    thread::sleep(Duration::from_millis(50));

    let discarded = consumer.stop();
    let executed = report_rx.try_iter().count();
    assert!(discarded >= 1, "nothing reported as discarded");
    assert_eq!(executed + discarded, 5);
    assert_eq!(consumer.stop(), 0);
}
