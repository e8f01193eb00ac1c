use anyhow::Result;
use meshvista::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

/// Log timestamps in UTC, matching the store's bucket boundaries.
struct UtcTimer;

impl FormatTime for UtcTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(UtcTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    let store = Arc::new(
        store::SampleStore::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
        )
        .await?,
    );
    store.init().await?;

    let policies = app_config.retention;
    let maintenance_config = maintenance_worker::MaintenanceConfig::from(&app_config);
    backfill::run_backfill(&store, &policies, &maintenance_config).await?;

    let (write_tx, write_rx) = mpsc::channel::<models::MetricSample>(
        writer::writer_channel_capacity(app_config.database.flush_rate),
    );
    let samples_saved_total = Arc::new(AtomicU64::new(0));
    let writer_handle = writer::spawn_sample_writer(
        write_rx,
        store.clone(),
        writer::SampleWriterConfig {
            flush_rate: app_config.database.flush_rate,
            flush_interval_secs: app_config.database.flush_interval_secs,
        },
        samples_saved_total.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance_handle = maintenance_worker::spawn(
        store.clone(),
        policies,
        maintenance_config,
        shutdown_rx,
    );

    let cache = Arc::new(query::cache::QueryCache::new(std::time::Duration::from_secs(
        app_config.cache.ttl_secs,
    )));
    let app = routes::app(store.clone(), cache, write_tx, policies);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        } => {
            tracing::info!("Received shutdown signal");
        }
    }

    // The router (and its sender) is gone once serve returns; the writer drains and exits.
    let _ = shutdown_tx.send(true);
    let _ = maintenance_handle.await;
    let _ = writer_handle.await;
    store.close().await;
    tracing::info!(
        samples_saved = samples_saved_total.load(Ordering::Relaxed),
        "shutdown complete"
    );
    Ok(())
}
