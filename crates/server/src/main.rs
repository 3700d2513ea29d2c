// crates/server/src/main.rs
//! Bizdiag server binary.
//!
//! Opens the job store, starts the dispatch loop and the stale-job sweeper,
//! then serves the HTTP API until ctrl-c.

use std::time::Instant;

use anyhow::{Context, Result};
use bizdiag_core::llm::create_provider;
use bizdiag_db::Database;
use bizdiag_server::jobs::{spawn_sweeper, JobRunner};
use bizdiag_server::{create_app, init_metrics, AppState, Config};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,bizdiag_server=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
    }
    tracing::info!("Shutdown requested");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);

    let startup_start = Instant::now();
    init_metrics();

    let db = match &config.db_path {
        Some(path) => Database::new(path).await?,
        None => Database::open_default().await?,
    };
    tracing::info!(path = %db.db_path().display(), "Job store open");

    let provider = create_provider(&config.llm_config()).context("LLM provider unavailable")?;
    tracing::info!(provider = provider.name(), model = provider.model(), "LLM provider ready");

    let runner = JobRunner::new(db.clone(), provider, config.runner_config());
    let dispatch_handle = runner
        .start()
        .context("dispatch loop already started")?;

    let shutdown = CancellationToken::new();
    let sweeper_handle = spawn_sweeper(
        db.clone(),
        runner.clone(),
        config.sweeper_config(),
        shutdown.clone(),
    );

    let state = AppState::new(db, runner.clone());
    let app = create_app(state);

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        %addr,
        startup_ms = startup_start.elapsed().as_millis() as u64,
        "bizdiag-server v{} listening",
        env!("CARGO_PKG_VERSION")
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    runner.shutdown();
    shutdown.cancel();
    let _ = tokio::join!(dispatch_handle, sweeper_handle);
    tracing::info!("Server stopped");
    Ok(())
}
