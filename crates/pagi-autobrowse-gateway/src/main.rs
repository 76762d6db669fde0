//! `autobrowse`: HTTP gateway plus optional wake-phrase voice control.

use anyhow::Context;
use clap::Parser;
use pagi_autobrowse_core::{
    create_engine_factory, validate_api_key, AppConfig, CommandConsumer, CommandQueue, CredentialStore,
    SessionManager,
};
use pagi_autobrowse_gateway::{router, AppState, Cli};
use pagi_autobrowse_voice::{list_input_devices, VoicePipeline};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        let devices = list_input_devices();
        if devices.is_empty() {
            println!("No input devices found.");
        }
        for name in devices {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config = AppConfig::load().context("loading configuration")?;
    cli.apply(&mut config);

    let store = CredentialStore::open_default();
    let api_key = cli.api_key().or_else(|| store.api_key());

    if cli.save_key {
        if let Some(key) = &api_key {
            match validate_api_key(key) {
                Ok(()) => {
                    let mut creds = store.load();
                    creds.api_key = Some(key.clone());
                    store.save(&creds).context("saving API key")?;
                    info!(target: "pagi::gateway", path = %store.path().display(), "🔑 API key saved");
                }
                Err(reason) => warn!(target: "pagi::gateway", "API key not saved: {}", reason),
            }
        }
    }

    let factory = create_engine_factory(&config.engine_url).context("creating automation engine factory")?;
    info!(target: "pagi::gateway", engine = factory.name(), "automation engine selected");

    let session = Arc::new(
        SessionManager::new(factory).with_slow_call_warning(Duration::from_secs(config.slow_command_warn_secs)),
    );

    match api_key.as_deref().map(|k| validate_api_key(k).map(|_| k)) {
        Some(Ok(key)) => {
            let session_config = config.session_config(key)?;
            session.configure(session_config)?;
            info!(target: "pagi::gateway", starting_page = %config.starting_page, headless = config.headless, "✅ Session configured");
        }
        Some(Err(reason)) => {
            warn!(target: "pagi::gateway", "API key rejected ({}); automation requests will return 503", reason)
        }
        None => warn!(
            target: "pagi::gateway",
            "No API key (use --api-key or NOVA_ACT_API_KEY); automation requests will return 503"
        ),
    }

    let (sender, receiver) = CommandQueue::new();
    let mut consumer =
        CommandConsumer::spawn(Arc::clone(&session), receiver, None).context("starting command consumer")?;

    let voice = if config.voice_enabled {
        match VoicePipeline::from_app_config(&config, sender.clone()) {
            Ok(pipeline) => {
                info!(target: "pagi::gateway", wake_phrase = %config.wake_phrase, "🎙️ Voice control enabled");
                Some(Arc::new(pipeline))
            }
            Err(e) => {
                error!(target: "pagi::gateway", error = %e, "voice control unavailable");
                None
            }
        }
    } else {
        None
    };

    let app = router(AppState::new(Arc::clone(&session), voice.clone()));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(target: "pagi::gateway", "🚀 AutoBrowse gateway listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!(target: "pagi::gateway", "Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!(target: "pagi::gateway", "Shutdown signal received");
        }
    }

    // Voice first so nothing new is queued, then the consumer, then the browser.
    tokio::task::spawn_blocking(move || {
        if let Some(pipeline) = &voice {
            pipeline.stop();
        }
        drop(sender);
        consumer.stop();
        match session.close() {
            Ok(true) => info!(target: "pagi::gateway", "browser session closed"),
            Ok(false) => {}
            Err(e) => warn!(target: "pagi::gateway", error = %e, "closing browser session failed"),
        }
    })
    .await
    .context("shutdown task")?;

    Ok(())
}
