//! # PAGI AutoBrowse Core - Session Lifecycle and Command Dispatch
//!
//! The browser automation engine is not thread-safe and each step can block for
//! seconds or minutes. This crate makes it safe to drive from several triggers at once.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐                         ┌──────────────────────────┐
//! │  HTTP request thread │── execute(prompt) ────→ │                          │
//! │  (blocking pool)     │←─ Result<String> ────── │     SessionManager       │
//! └──────────────────────┘                         │  Mutex held across       │
//!                                                  │  init + engine.act()     │
//! ┌──────────────┐  submit  ┌──────────────┐      │                          │
//! │ Voice thread │────────→ │ CommandQueue │ ───→ │  ┌────────────────────┐  │
//! │ (producer)   │ no block │   (FIFO)     │ one  │  │ AutomationEngine   │  │
//! └──────────────┘          └──────────────┘ cons.│  │ (lazy, one owner)  │  │
//!                                                  │  └────────────────────┘  │
//!                                                  └──────────────────────────┘
//! ```

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod handoff;
pub mod session;
pub mod store;

pub use command::{Command, CommandOrigin, CommandReport};
pub use config::{default_profile_dir, AppConfig, SessionConfig};
pub use engine::{
    create_engine_factory, AutomationEngine, EngineFactory, PlaceholderEngine, PlaceholderEngineFactory,
    RemoteEngine, RemoteEngineFactory,
};
pub use error::{EngineFailure, SessionError, SessionResult};
pub use handoff::{CommandConsumer, CommandQueue, CommandReceiver, CommandSender, QueueClosed, CONSUMER_POLL};
pub use session::{SessionManager, SessionState};
pub use store::{validate_api_key, CredentialStore, StoreError, StoredCredentials};
