// Retention sweeper: deletes daily aggregates older than daily_days.
// Raw rows and hourly aggregates are the rollup engine's business, never touched here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::Result;
use crate::models::{MetricClass, RetentionPolicies};
use crate::store::SampleStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassPurge {
    pub metric_class: MetricClass,
    pub rows: u64,
}

/// Rows removed by a sweep, or that the next sweep would remove (preview).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeSummary {
    pub classes: Vec<ClassPurge>,
    pub total: u64,
}

impl PurgeSummary {
    fn push(&mut self, metric_class: MetricClass, rows: u64) {
        self.total += rows;
        self.classes.push(ClassPurge { metric_class, rows });
    }

    pub fn rows_for(&self, metric_class: MetricClass) -> u64 {
        self.classes
            .iter()
            .find(|c| c.metric_class == metric_class)
            .map_or(0, |c| c.rows)
    }
}

/// Deletes expired daily aggregates. Classes kept forever are skipped entirely.
#[instrument(skip(store, policies), fields(operation = "sweep"))]
pub async fn sweep(
    store: &SampleStore,
    policies: &RetentionPolicies,
    now: DateTime<Utc>,
) -> Result<PurgeSummary> {
    let mut summary = PurgeSummary::default();
    for class in MetricClass::ALL {
        let Some(cutoff) = policies.for_class(class).daily_cutoff(now) else {
            continue;
        };
        let rows = store.purge_daily_before(class, cutoff.timestamp()).await?;
        summary.push(class, rows);
    }
    if summary.total > 0 {
        info!(rows_deleted = summary.total, "retention sweep complete");
    }
    Ok(summary)
}

/// Read-only: what `sweep` would delete at `now`.
pub async fn purge_preview(
    store: &SampleStore,
    policies: &RetentionPolicies,
    now: DateTime<Utc>,
) -> Result<PurgeSummary> {
    let mut summary = PurgeSummary::default();
    for class in MetricClass::ALL {
        let Some(cutoff) = policies.for_class(class).daily_cutoff(now) else {
            continue;
        };
        let rows = store.count_daily_before(class, cutoff.timestamp()).await?;
        summary.push(class, rows);
    }
    Ok(summary)
}
