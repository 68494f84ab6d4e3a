// Pondledger server entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config
// 3. Open the document store
// 4. Build the model backend and the app services
// 5. Spawn the live feed and the reminder loop
// 6. Serve the HTTP API until Ctrl+C

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};

use pondledger_app::notifications;
use pondledger_app::AppServices;
use pondledger_core::config;
use pondledger_core::ledger::Ledger;
use pondledger_core::store::DocumentStore;
use pondledger_llm::client::LlmClient;
use pondledger_server::{build_router, live, AppState};

const REMINDER_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    info!("Pondledger starting up");

    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: user={}, farm profile={}, {} categories",
        config.profile.user,
        config.profile.farm_profile,
        config.categories.len()
    );

    let store = Arc::new(DocumentStore::open(&config.db_path).context("failed to open database")?);
    info!("Database opened at {}", config.db_path);
    let ledger = Ledger::new(Arc::clone(&store));

    let llm_client = LlmClient::from_config(&config);
    match &llm_client {
        LlmClient::Active(_) => info!("LLM client initialized (API key configured)"),
        LlmClient::Disabled => info!("LLM client disabled (no API key)"),
    }

    let bind = config.server.bind.clone();
    let http_port = config.server.http_port;
    let live_port = config.server.live_port;

    let services = Arc::new(AppServices::new(config, ledger.clone(), Arc::new(llm_client)));

    let live_tx = services.live().clone();
    let live_bind = bind.clone();
    let live_handle = tokio::spawn(async move {
        if let Err(e) = live::run(&live_bind, live_port, store, live_tx).await {
            error!("Live feed error: {e}");
        }
    });

    let reminder_handle = tokio::spawn(notifications::run_reminder_loop(
        ledger,
        services.live().clone(),
        REMINDER_INTERVAL,
    ));

    let app = build_router(AppState::new(services));
    let listener = TcpListener::bind(format!("{bind}:{http_port}"))
        .await
        .with_context(|| format!("failed to bind HTTP server on {bind}:{http_port}"))?;
    info!(
        "Application ready. HTTP API on {}, live feed on {bind}:{live_port}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    live_handle.abort();
    reminder_handle.abort();

    info!("Pondledger shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl+C: {e}");
        // Without a signal handler, never resolve and keep serving.
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Initialize tracing to log to `logs/pondledger.log`.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("pondledger.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pondledger=info,warn")),
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
