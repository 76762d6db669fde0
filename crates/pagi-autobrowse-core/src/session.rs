//! **Session Manager**: Owns the automation engine and serializes every call into it.
//!
//! Lifecycle: `Unconfigured → Configured → (first execute) Initializing → Ready ⇄ Busy`,
//! and `close()` returns any live session to `Configured` so the next `execute()`
//! starts a fresh browser with the same settings.
//!
//! One `std::sync::Mutex` is held across the whole body of `execute` and `close`
//! (state check, lazy construction and the engine call), so at most one engine
//! invocation is ever in flight. The lock is not reentrant: a nested call from the
//! thread that already holds it returns `SessionError::Reentrant` instead of deadlocking.
//! There is no timeout on engine calls; slow calls are only logged.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::command::{Command, CommandReport};
use crate::config::SessionConfig;
use crate::engine::{AutomationEngine, EngineFactory};
use crate::error::{SessionError, SessionResult};

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unconfigured,
    Configured,
    /// Engine construction in progress (inside the lock).
    Initializing,
    Ready,
    Busy,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Configured,
            2 => Self::Initializing,
            3 => Self::Ready,
            4 => Self::Busy,
            _ => Self::Unconfigured,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Busy => "busy",
        };
        f.write_str(s)
    }
}

struct SessionInner {
    config: Option<SessionConfig>,
    engine: Option<Box<dyn AutomationEngine>>,
}

/// Shared by the request adapter and the queue consumer (wrap in `Arc`).
pub struct SessionManager {
    factory: Arc<dyn EngineFactory>,
    inner: Mutex<SessionInner>,
    holder: Mutex<Option<ThreadId>>,
    state: AtomicU8,
    invocations: AtomicU64,
    slow_call_warning: Duration,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            inner: Mutex::new(SessionInner {
                config: None,
                engine: None,
            }),
            holder: Mutex::new(None),
            state: AtomicU8::new(SessionState::Unconfigured as u8),
            invocations: AtomicU64::new(0),
            slow_call_warning: Duration::from_secs(120),
        }
    }

    /// Engine calls longer than this are logged at `warn`.
    pub fn with_slow_call_warning(mut self, threshold: Duration) -> Self {
        self.slow_call_warning = threshold;
        self
    }

    /// Store the configuration. Only the first call has an effect; returns whether it applied.
    pub fn configure(&self, config: SessionConfig) -> SessionResult<bool> {
        let mut guard = self.lock()?;
        if guard.config.is_some() {
            info!(target: "pagi::session", "session already configured; ignoring new configuration");
            return Ok(false);
        }
        info!(
            target: "pagi::session",
            page = %config.starting_page,
            headless = config.headless,
            engine = self.factory.name(),
            "session configured"
        );
        guard.config = Some(config);
        self.set_state(SessionState::Configured);
        Ok(true)
    }

    /// Run one instruction, starting the browser first if needed. Blocks for the whole call.
    pub fn execute(&self, instruction: &str) -> SessionResult<String> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(SessionError::EmptyInstruction);
        }

        let mut guard = self.lock()?;
        let inner = &mut *guard;

        if inner.config.is_none() {
            debug!(target: "pagi::session", "execute before configure");
            return Err(SessionError::NotConfigured);
        }

        if inner.engine.is_none() {
            self.initialize(inner)?;
        }
        let Some(engine) = inner.engine.as_mut() else {
            return Err(SessionError::InitializationFailed("engine missing after initialization".to_string()));
        };

        self.set_state(SessionState::Busy);
        self.invocations.fetch_add(1, Ordering::Relaxed);
        info!(target: "pagi::session", instruction = %instruction, "executing");
        let started = Instant::now();
        let result = engine.act(instruction);
        let elapsed = started.elapsed();
        self.set_state(SessionState::Ready);

        if elapsed >= self.slow_call_warning {
            warn!(
                target: "pagi::session",
                elapsed_secs = elapsed.as_secs(),
                instruction = %instruction,
                "engine call exceeded slow-call threshold"
            );
        }

        match result {
            Ok(message) => {
                info!(target: "pagi::session", elapsed_ms = elapsed.as_millis() as u64, "✓ command done");
                Ok(message)
            }
            Err(e) => {
                warn!(target: "pagi::session", error = %e, elapsed_ms = elapsed.as_millis() as u64, "✗ command failed");
                Err(SessionError::EngineError(e.message))
            }
        }
    }

    /// `execute` for a queued command, with timing for the report.
    pub fn execute_command(&self, command: &Command) -> CommandReport {
        let started = Instant::now();
        let result = self.execute(&command.instruction);
        CommandReport {
            command: command.clone(),
            result,
            finished_at: chrono::Utc::now(),
            elapsed: started.elapsed(),
        }
    }

    /// Release the live engine, if any. Returns whether an engine was released.
    /// The persistent browser profile on disk is left in place.
    pub fn close(&self) -> SessionResult<bool> {
        let mut guard = self.lock()?;
        let released = match guard.engine.take() {
            Some(mut engine) => {
                engine.release();
                info!(target: "pagi::session", "browser session closed");
                true
            }
            None => {
                debug!(target: "pagi::session", "close with no live engine");
                false
            }
        };
        let next = if guard.config.is_some() {
            SessionState::Configured
        } else {
            SessionState::Unconfigured
        };
        self.set_state(next);
        Ok(released)
    }

    /// Best-effort snapshot; never use for correctness decisions.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Best-effort: true while an engine call is in flight.
    pub fn is_busy(&self) -> bool {
        self.state() == SessionState::Busy
    }

    pub fn is_configured(&self) -> bool {
        self.state() != SessionState::Unconfigured
    }

    /// Total engine invocations since start.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    fn initialize(&self, inner: &mut SessionInner) -> SessionResult<()> {
        let Some(config) = inner.config.as_ref() else {
            return Err(SessionError::NotConfigured);
        };
        self.set_state(SessionState::Initializing);
        info!(target: "pagi::session", page = %config.starting_page, engine = self.factory.name(), "starting browser session");

        match self.factory.construct(config) {
            Ok(engine) => {
                inner.engine = Some(engine);
                self.set_state(SessionState::Ready);
                Ok(())
            }
            Err(e) => {
                error!(target: "pagi::session", error = %e, "browser session failed to start");
                self.set_state(SessionState::Configured);
                Err(SessionError::InitializationFailed(e.message))
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn lock(&self) -> SessionResult<SessionGuard<'_>> {
        let me = thread::current().id();
        if *lock_ignoring_poison(&self.holder) == Some(me) {
            warn!(target: "pagi::session", "nested session call from the thread holding the lock");
            return Err(SessionError::Reentrant);
        }

        let inner = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                let mut g = poisoned.into_inner();
                self.inner.clear_poison();
                self.recover(&mut g);
                g
            }
        };
        *lock_ignoring_poison(&self.holder) = Some(me);
        Ok(SessionGuard {
            _holder: HolderMark {
                slot: &self.holder,
                thread: me,
            },
            inner,
        })
    }

    /// A previous holder panicked. If it died mid-construction or mid-step the engine
    /// is in an unknown state: release it and fall back to `Configured`.
    fn recover(&self, inner: &mut SessionInner) {
        let state = self.state();
        error!(target: "pagi::session", %state, "session lock poisoned by a panic; recovering");
        if matches!(state, SessionState::Busy | SessionState::Initializing) {
            if let Some(mut engine) = inner.engine.take() {
                engine.release();
            }
        }
        let next = match (&inner.config, &inner.engine) {
            (None, _) => SessionState::Unconfigured,
            (Some(_), Some(_)) => SessionState::Ready,
            (Some(_), None) => SessionState::Configured,
        };
        self.set_state(next);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(i) => i,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(mut engine) = inner.engine.take() {
            engine.release();
        }
    }
}

/// Lock guard plus the "this thread holds the session" mark. The mark is declared
/// first so it is cleared before the mutex unlocks.
struct SessionGuard<'a> {
    _holder: HolderMark<'a>,
    inner: MutexGuard<'a, SessionInner>,
}

impl std::ops::Deref for SessionGuard<'_> {
    type Target = SessionInner;

    fn deref(&self) -> &SessionInner {
        &self.inner
    }
}

impl std::ops::DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut SessionInner {
        &mut self.inner
    }
}

struct HolderMark<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
    thread: ThreadId,
}

impl Drop for HolderMark<'_> {
    fn drop(&mut self) {
        let mut slot = lock_ignoring_poison(self.slot);
        if *slot == Some(self.thread) {
            *slot = None;
        }
    }
}

fn lock_ignoring_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
