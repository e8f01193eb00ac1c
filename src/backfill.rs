// Startup catch-up: one rollup pass and one sweep before serving, so a process that was
// down for a while compacts its backlog without waiting for the first tick.

use crate::maintenance_worker::{MaintenanceConfig, run_rollup_tick, run_sweep_tick};
use crate::models::RetentionPolicies;
use crate::store::SampleStore;
use tracing::info;

pub async fn run_backfill(
    store: &SampleStore,
    policies: &RetentionPolicies,
    config: &MaintenanceConfig,
) -> anyhow::Result<()> {
    if config.rollup_enabled {
        run_rollup_tick(store, policies, config.rollup_timeout_secs).await?;
    }
    let purged = run_sweep_tick(store, policies, config.vacuum_after_sweep).await?;
    info!(rows_purged = purged.total, "startup catch-up complete");
    Ok(())
}
