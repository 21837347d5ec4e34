mod database;
mod ingest;
mod search;
mod utils;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::ingest::loader::{self, IngestOutcome};
use crate::search::engine::SearchEngine;
use crate::search::handlers;
use crate::utils::config::{self, Config};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    // Has to run before any thread is spawned, it writes to the environment.
    config::load_env_file(Path::new(".env"))?;
    let config = Config::parse();

    info!("Store: {:?}", config.db_path);

    if config.migration_only {
        return migrate(&config);
    }

    tokio::runtime::Runtime::new()
        .context("Failed to start async runtime")?
        .block_on(serve(config))
}

fn migrate(config: &Config) -> Result<()> {
    let source = config.require_source_path()?;
    info!("Migration only, source: {:?}", source);

    match loader::run(source, &config.db_path).context("Ingestion failed")? {
        IngestOutcome::AlreadyPresent => info!("Database is ready (existing store kept)"),
        IngestOutcome::Loaded(report) => info!(
            "Database is ready: {} of {} line(s) stored",
            report.inserted, report.total_lines
        ),
    }
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let engine = SearchEngine::open(&config.db_path).context("Cannot connect to database")?;
    info!("Serving {} record(s)", engine.record_count()?);
    let app = handlers::router(engine, &config.static_dir);

    let addr = config.bind_address()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Unable to bind {}", addr))?;

    info!("Server is listening on {}", addr);
    axum::serve(listener, app)
        .await
        .context("Server stopped unexpectedly")?;
    Ok(())
}
