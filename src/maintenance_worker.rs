// Background maintenance: rollup on a fixed interval, retention sweep on a cron schedule
// (UTC) or fixed interval, VACUUM after sweeps that deleted rows.
// A failed tick is logged and retried on the next one; nothing here ends the process.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::models::RetentionPolicies;
use crate::retention::{self, PurgeSummary};
use crate::rollup::{self, RollupReport};
use crate::store::SampleStore;

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub rollup_enabled: bool,
    pub rollup_interval_secs: u64,
    pub rollup_timeout_secs: Option<u64>,
    /// Cron expression for the sweep (seconds field first). Evaluated in UTC.
    pub sweep_schedule: Option<String>,
    /// Sweep every N seconds when sweep_schedule is not set.
    pub sweep_interval_secs: u64,
    pub vacuum_after_sweep: bool,
}

impl From<&AppConfig> for MaintenanceConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            rollup_enabled: config.rollup.enabled,
            rollup_interval_secs: config.rollup.interval_secs,
            rollup_timeout_secs: config.rollup.timeout_secs,
            sweep_schedule: config.sweeper.schedule.clone(),
            sweep_interval_secs: config.sweeper.interval_secs,
            vacuum_after_sweep: config.sweeper.vacuum,
        }
    }
}

/// Spawns the maintenance worker. It exits when `shutdown` changes or its sender is dropped.
pub fn spawn(
    store: Arc<SampleStore>,
    policies: RetentionPolicies,
    config: MaintenanceConfig,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(store, policies, config, shutdown).await;
    })
}

#[instrument(skip_all, fields(rollup_interval_secs = config.rollup_interval_secs))]
async fn run(
    store: Arc<SampleStore>,
    policies: RetentionPolicies,
    config: MaintenanceConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    // Startup catch-up already ran a pass; the first tick is one period out.
    let period = Duration::from_secs(config.rollup_interval_secs.max(1));
    let mut rollup_interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    rollup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (sweep_tx, mut sweep_rx) = mpsc::channel::<()>(1);
    let scheduler = tokio::spawn(sweep_scheduler(config.clone(), sweep_tx));

    loop {
        tokio::select! {
            _ = rollup_interval.tick(), if config.rollup_enabled => {
                if let Err(e) = run_rollup_tick(&store, &policies, config.rollup_timeout_secs).await {
                    warn!(error = %e, "rollup tick failed");
                }
            }
            Some(()) = sweep_rx.recv() => {
                if let Err(e) = run_sweep_tick(&store, &policies, config.vacuum_after_sweep).await {
                    warn!(error = %e, "sweep tick failed");
                }
            }
            _ = shutdown.changed() => {
                debug!("Maintenance worker shutting down");
                break;
            }
        }
    }
    scheduler.abort();
}

/// Sends a message on `tx` at each sweep time (cron in UTC, or fixed interval).
async fn sweep_scheduler(config: MaintenanceConfig, tx: mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.sweep_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid sweep schedule; retention sweep will not run");
            return;
        };
        loop {
            let now = Utc::now();
            if let Some(next) = schedule.after(&now).next() {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.sweep_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

/// One rollup pass at the current time, optionally bounded by a wall-clock timeout.
/// Returns None when the pass timed out; committed buckets stay committed.
pub async fn run_rollup_tick(
    store: &SampleStore,
    policies: &RetentionPolicies,
    timeout_secs: Option<u64>,
) -> anyhow::Result<Option<RollupReport>> {
    let pass = rollup::run_rollup(store, policies, Utc::now());
    let report = match timeout_secs {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), pass).await {
            Ok(report) => report?,
            Err(_) => {
                warn!(timeout_secs = secs, "rollup pass timed out; resuming next tick");
                return Ok(None);
            }
        },
        None => pass.await?,
    };
    Ok(Some(report))
}

/// One retention sweep at the current time, then VACUUM if rows were deleted.
pub async fn run_sweep_tick(
    store: &SampleStore,
    policies: &RetentionPolicies,
    vacuum: bool,
) -> anyhow::Result<PurgeSummary> {
    let summary = retention::sweep(store, policies, Utc::now()).await?;
    if vacuum && summary.total > 0 {
        store.vacuum().await?;
        info!("vacuum complete");
    }
    Ok(summary)
}
