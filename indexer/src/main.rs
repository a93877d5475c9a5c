//! Academy Indexer binary.
//!
//! Entry point for the contract event indexer service.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use academy_indexer::service::WorkerExit;
use academy_indexer::{IndexerConfig, Indexer, MemorySource, MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,academy_indexer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = IndexerConfig::from_env().context("invalid indexer configuration")?;

    let source = match &config.events_file {
        Some(path) => MemorySource::from_file(path)
            .await
            .with_context(|| format!("failed to load events from {}", path.display()))?,
        None => MemorySource::new(),
    };
    if config.contracts.is_empty() {
        config.contracts = source
            .contracts()
            .await
            .iter()
            .map(|contract| contract.as_str().to_string())
            .collect();
    }
    config.validate().context("invalid indexer configuration")?;

    tracing::info!("Starting Academy Indexer");
    tracing::info!("Contracts: {}", config.contracts.join(", "));
    tracing::info!("Batch size: {}", config.batch_size);

    let source = Arc::new(source);
    match config.database_url.clone() {
        Some(url) => {
            let store = PgStore::connect(&url, config.max_connections)
                .await
                .context("failed to connect to database")?;
            store
                .run_migrations()
                .await
                .context("failed to run database migrations")?;
            let store = Arc::new(store);
            serve(Arc::clone(&store), source, config).await?;
            store.close().await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, indexing into memory");
            serve(Arc::new(MemoryStore::new()), source, config).await?;
        }
    }

    tracing::info!("Shutting down indexer");
    Ok(())
}

async fn serve<S: Store>(
    store: Arc<S>,
    source: Arc<MemorySource>,
    config: IndexerConfig,
) -> Result<()> {
    let indexer = Indexer::new(store, source, config);
    let metrics = indexer.metrics();

    let shutdown = indexer.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            shutdown.send_replace(true);
        }
    });

    let reports = indexer.run().await.context("indexer failed to start")?;

    for report in &reports {
        match &report.exit {
            WorkerExit::Paused(e) => tracing::error!(
                "{} paused after {} batches: {}",
                report.contract_id,
                report.batches,
                e
            ),
            exit => tracing::info!(
                "{} {:?} after {} batches, {} events",
                report.contract_id,
                exit,
                report.batches,
                report.events
            ),
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        "Indexed {} events ({} projected, {} decode failures, {} rejected, {} retries)",
        snapshot.events_indexed,
        snapshot.events_projected,
        snapshot.decode_failures,
        snapshot.integrity_errors + snapshot.invalid_transitions + snapshot.quarantined_events,
        snapshot.transient_retries
    );

    if reports.iter().any(|report| report.is_paused()) {
        anyhow::bail!("one or more contract workers paused");
    }
    Ok(())
}
