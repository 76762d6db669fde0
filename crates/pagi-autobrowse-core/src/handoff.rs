//! Hand-off queue between the voice producer and the single session consumer.
//!
//! Producers never touch the engine: they `submit()` and return immediately. One
//! consumer thread drains the queue in FIFO order and calls `SessionManager::execute_command`
//! for each command, one at a time.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::command::{Command, CommandReport};
use crate::error::SessionError;
use crate::session::SessionManager;

/// How often the consumer re-checks its stop flag while the queue is empty.
pub const CONSUMER_POLL: Duration = Duration::from_millis(100);

/// Constructor for the two queue ends.
pub struct CommandQueue;

impl CommandQueue {
    /// Unbounded MPSC queue. The sender side is cheap to clone.
    pub fn new() -> (CommandSender, CommandReceiver) {
        let (tx, rx) = unbounded();
        (CommandSender { tx }, CommandReceiver { rx })
    }
}

#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    /// Never blocks. Returns false when the consumer side is gone.
    pub fn submit(&self, command: Command) -> bool {
        let instruction = command.instruction.clone();
        match self.tx.send(command) {
            Ok(()) => {
                debug!(target: "pagi::session", instruction = %instruction, "command queued");
                true
            }
            Err(_) => {
                warn!(target: "pagi::session", instruction = %instruction, "command dropped: queue closed");
                false
            }
        }
    }

    /// Commands waiting to be executed.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// Every sender is gone and nothing is left to drain.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("command queue closed")]
pub struct QueueClosed;

#[derive(Debug)]
pub struct CommandReceiver {
    rx: Receiver<Command>,
}

impl CommandReceiver {
    /// Wait up to `timeout` for the next command. `Ok(None)` on timeout; `Err(QueueClosed)`
    /// once every sender is dropped and the queue is empty.
    pub fn next(&self, timeout: Duration) -> Result<Option<Command>, QueueClosed> {
        match self.rx.recv_timeout(timeout) {
            Ok(c) => Ok(Some(c)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(QueueClosed),
        }
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

/// The consumer thread. Stop with `stop()`; it finishes the command in flight first.
pub struct CommandConsumer {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<usize>>,
}

impl CommandConsumer {
    /// Start the consumer. Each finished command's report is forwarded to `reports`, if given.
    pub fn spawn(
        session: Arc<SessionManager>,
        receiver: CommandReceiver,
        reports: Option<Sender<CommandReport>>,
    ) -> std::io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = std::thread::Builder::new()
            .name("command-consumer".to_string())
            .spawn(move || {
                info!(target: "pagi::session", "command consumer started");
                while !flag.load(Ordering::SeqCst) {
                    let command = match receiver.next(CONSUMER_POLL) {
                        Ok(Some(command)) => command,
                        Ok(None) => continue,
                        Err(QueueClosed) => {
                            debug!(target: "pagi::session", "all producers gone; consumer exiting");
                            break;
                        }
                    };

                    info!(target: "pagi::session", origin = %command.origin, instruction = %command.instruction, "dispatching command");
                    let report = dispatch(&session, &command);
                    match &report.result {
                        Ok(_) => info!(target: "pagi::session", "{}", report.summary()),
                        Err(e) if e.is_not_ready() => {
                            warn!(target: "pagi::session", "{} (session not configured)", report.summary())
                        }
                        Err(_) => error!(target: "pagi::session", "{}", report.summary()),
                    }
                    if let Some(tx) = &reports {
                        let _ = tx.send(report);
                    }
                }

                let discarded = receiver.pending();
                if discarded > 0 {
                    warn!(target: "pagi::session", discarded, "command consumer stopped with commands still queued; they were not executed");
                } else {
                    info!(target: "pagi::session", "command consumer stopped");
                }
                discarded
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait for it. Returns how many queued commands were
    /// discarded without running. Idempotent; later calls return 0.
    pub fn stop(&mut self) -> usize {
        self.shutdown.store(true, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        match handle.join() {
            Ok(discarded) => discarded,
            Err(_) => {
                error!(target: "pagi::session", "command consumer panicked");
                0
            }
        }
    }
}

impl Drop for CommandConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run one command. A panicking engine becomes an `EngineError` report so the
/// consumer keeps serving; the session recovers its lock on the next call.
fn dispatch(session: &SessionManager, command: &Command) -> CommandReport {
    let started = Instant::now();
    match catch_unwind(AssertUnwindSafe(|| session.execute_command(command))) {
        Ok(report) => report,
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(target: "pagi::session", instruction = %command.instruction, panic = %msg, "engine panicked");
            CommandReport {
                command: command.clone(),
                result: Err(SessionError::EngineError(format!("engine panicked: {}", msg))),
                finished_at: chrono::Utc::now(),
                elapsed: started.elapsed(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_times_out_on_empty_queue() {
        let (_tx, rx) = CommandQueue::new();
        assert_eq!(rx.next(Duration::from_millis(10)), Ok(None));
    }

    #[test]
    fn fifo_order_is_preserved() {
        let (tx, rx) = CommandQueue::new();
        for text in ["one", "two", "three"] {
            assert!(tx.submit(Command::voice(text).unwrap()));
        }
        assert_eq!(tx.pending(), 3);
        let got: Vec<String> = std::iter::from_fn(|| rx.next(Duration::from_millis(10)).ok().flatten())
            .map(|c| c.instruction)
            .collect();
        assert_eq!(got, vec!["one", "two", "three"]);
    }

    #[test]
    fn submit_after_receiver_dropped_reports_false() {
        let (tx, rx) = CommandQueue::new();
        drop(rx);
        assert!(!tx.submit(Command::voice("hello").unwrap()));
    }

    #[test]
    fn closed_once_senders_dropped_and_drained() {
        let (tx, rx) = CommandQueue::new();
        tx.submit(Command::voice("last").unwrap());
        drop(tx);
        assert_eq!(rx.pending(), 1);
        assert!(matches!(rx.next(Duration::from_millis(10)), Ok(Some(_))));
        assert_eq!(rx.next(Duration::from_millis(10)), Err(QueueClosed));
    }
}
