// Voice shopping list server entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config
// 3. Open database
// 4. Build collaborators (Gemini, translator, stores)
// 5. Create mpsc channels
// 6. Initialize AppState, hydrate from the mirror, request recommendations
// 7. Spawn WebSocket server task
// 8. Spawn app logic task
// 9. Wait for Ctrl+C
// 10. Cleanup on exit

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use voicecart_app::app::{self, AppState, Collaborators, SessionSettings};
use voicecart_core::config;
use voicecart_core::db::Database;
use voicecart_core::services::Translator;
use voicecart_core::ws_server;
use voicecart_llm::client::LlmClient;
use voicecart_llm::intent::GeminiIntentExtractor;
use voicecart_llm::recommend::GeminiRecommender;
use voicecart_llm::translate::HttpTranslator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("VoiceCart starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: model={}, translation={}, recommendations={}",
        config.llm.model, config.translation.enabled, config.recommendations.enabled
    );

    // 3. Open database
    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
    }
    let db = Arc::new(Database::open(&config.db_path).context("failed to open database")?);
    info!("Database opened at {}", config.db_path);

    // 4. Build collaborators
    let llm_client = Arc::new(LlmClient::from_config(&config));
    if llm_client.is_active() {
        info!("LLM client initialized (model {})", config.llm.model);
    } else {
        warn!("LLM client disabled (no API key); every command will be unrecognized");
    }
    let translator = HttpTranslator::from_config(&config)
        .map(|t| Arc::new(t) as Arc<dyn Translator>);
    let collaborators = Collaborators {
        extractor: Arc::new(GeminiIntentExtractor::new(Arc::clone(&llm_client))),
        recommender: Arc::new(GeminiRecommender::new(Arc::clone(&llm_client))),
        translator,
        list_store: db.clone(),
        history: db,
    };

    // 5. Create mpsc channels
    let (ws_tx, ws_rx) = mpsc::channel(256);
    let (background_tx, background_rx) = mpsc::channel(64);
    let (outbound_tx, outbound_rx) = mpsc::channel(256);

    // 6. Initialize the session
    let mut app_state = AppState::new(
        SessionSettings::from_config(&config),
        collaborators,
        background_tx,
    );
    match app_state.hydrate().await {
        Ok(count) => info!("Restored {} list entries from the mirror", count),
        Err(e) => warn!("Starting with an empty list: {:#}", e),
    }
    app_state.refresh_recommendations();

    // 7. Spawn WebSocket server task
    let listener = ws_server::bind(&config.ws_host, config.ws_port)
        .await
        .with_context(|| {
            format!(
                "failed to bind WebSocket server on {}:{}",
                config.ws_host, config.ws_port
            )
        })?;
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(listener, ws_tx, outbound_rx).await {
            error!("WebSocket server error: {}", e);
        }
    });

    // 8. Spawn app logic task
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(ws_rx, background_rx, outbound_tx, app_state).await {
            error!("Application loop error: {}", e);
        }
    });

    // 9. Wait for Ctrl+C
    info!("Application ready");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Shutdown requested");

    // 10. Cleanup: stopping the server closes the event channel, which ends
    // the app loop after it flushes pending mirror writes.
    ws_handle.abort();
    if tokio::time::timeout(Duration::from_secs(5), app_handle)
        .await
        .is_err()
    {
        warn!("App task did not finish within 5s");
    }

    info!("VoiceCart shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to `logs/voicecart.log`.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("voicecart.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voicecart=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
