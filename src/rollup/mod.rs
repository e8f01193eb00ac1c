// Rollup engine: raw -> hourly once a whole hour is older than raw_days,
// hourly -> daily once a whole day is older than hourly_days.
// Each bucket is folded in its own transaction (write aggregate, then delete sources),
// so a pass interrupted at any point loses nothing and the next pass picks up where it stopped.
// A late row for an already folded bucket is merged into the stored aggregate.

pub mod reduce;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::models::{Granularity, MetricClass, RetentionPolicies, RetentionPolicy};
use crate::store::{FoldOutcome, SampleStore, ts_to_utc};

/// Counters for one rollup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupReport {
    pub hourly_written: u64,
    pub raw_deleted: u64,
    pub daily_written: u64,
    pub hourly_deleted: u64,
    /// Buckets skipped because their reduction failed.
    pub failed_buckets: u64,
}

impl RollupReport {
    pub fn is_noop(&self) -> bool {
        *self == RollupReport::default()
    }

    fn merge(&mut self, other: RollupReport) {
        self.hourly_written += other.hourly_written;
        self.raw_deleted += other.raw_deleted;
        self.daily_written += other.daily_written;
        self.hourly_deleted += other.hourly_deleted;
        self.failed_buckets += other.failed_buckets;
    }
}

/// Runs both rollup passes for every metric class. Storage errors abort the pass;
/// reduction failures skip the affected bucket only.
#[instrument(skip(store, policies), fields(operation = "rollup"))]
pub async fn run_rollup(
    store: &SampleStore,
    policies: &RetentionPolicies,
    now: DateTime<Utc>,
) -> Result<RollupReport> {
    let mut report = RollupReport::default();
    for class in MetricClass::ALL {
        let policy = policies.for_class(class);
        report.merge(rollup_raw_to_hourly(store, class, policy, now).await?);
        report.merge(rollup_hourly_to_daily(store, class, policy, now).await?);
    }

    if report.hourly_written > 0 || report.daily_written > 0 {
        info!(
            hourly_written = report.hourly_written,
            raw_deleted = report.raw_deleted,
            daily_written = report.daily_written,
            hourly_deleted = report.hourly_deleted,
            "rollup complete"
        );
    }
    if report.failed_buckets > 0 {
        warn!(
            failed_buckets = report.failed_buckets,
            "rollup skipped buckets"
        );
    }
    Ok(report)
}

async fn rollup_raw_to_hourly(
    store: &SampleStore,
    class: MetricClass,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<RollupReport> {
    // Only hours that end at or before the cutoff are complete.
    let bucket_limit = Granularity::Hourly.truncate(policy.raw_cutoff(now).timestamp());
    let mut report = RollupReport::default();

    for entity_key in store.raw_entities_before(class, bucket_limit).await? {
        let buckets = store
            .raw_buckets_before(class, &entity_key, bucket_limit, Granularity::Hourly.seconds())
            .await?;
        for bucket_start in buckets {
            let start = ts_to_utc(bucket_start)?;
            let outcome = store
                .fold_raw_bucket(class, &entity_key, bucket_start, |samples, stored| {
                    let fresh = reduce::reduce_samples(class, &entity_key, start, samples)?;
                    reduce::merge_stored(stored, fresh)
                })
                .await;
            match skip_partial_failure(outcome)? {
                Some(FoldOutcome { written, deleted }) => {
                    report.hourly_written += u64::from(written);
                    report.raw_deleted += deleted;
                }
                None => report.failed_buckets += 1,
            }
        }
    }
    Ok(report)
}

async fn rollup_hourly_to_daily(
    store: &SampleStore,
    class: MetricClass,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<RollupReport> {
    let bucket_limit = Granularity::Daily.truncate(policy.hourly_cutoff(now).timestamp());
    let mut report = RollupReport::default();

    for entity_key in store
        .aggregate_entities_before(class, Granularity::Hourly, bucket_limit)
        .await?
    {
        let days = store
            .aggregate_buckets_before(
                class,
                &entity_key,
                Granularity::Hourly,
                bucket_limit,
                Granularity::Daily.seconds(),
            )
            .await?;
        for day_start in days {
            let start = ts_to_utc(day_start)?;
            let outcome = store
                .fold_hourly_bucket(class, &entity_key, day_start, |hourly, stored| {
                    let fresh = reduce::fold_aggregates(
                        class,
                        &entity_key,
                        Granularity::Daily,
                        start,
                        hourly,
                    )?;
                    reduce::merge_stored(stored, fresh)
                })
                .await;
            match skip_partial_failure(outcome)? {
                Some(FoldOutcome { written, deleted }) => {
                    report.daily_written += u64::from(written);
                    report.hourly_deleted += deleted;
                }
                None => report.failed_buckets += 1,
            }
        }
    }
    Ok(report)
}

/// Logs and swallows a bucket-level reduction failure; everything else propagates.
fn skip_partial_failure(outcome: Result<FoldOutcome>) -> Result<Option<FoldOutcome>> {
    match outcome {
        Ok(o) => Ok(Some(o)),
        Err(e @ Error::RollupPartialFailure { .. }) => {
            warn!(error = %e, operation = "rollup", "bucket skipped");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
