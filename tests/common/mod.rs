// Shared test helpers
#![allow(dead_code)]

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use meshvista::models::*;
use meshvista::store::SampleStore;
use std::sync::Arc;
use tempfile::TempDir;

/// Fresh store in a temp dir. Keep the TempDir alive for the test's duration.
pub async fn temp_store() -> (TempDir, Arc<SampleStore>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("meshvista.db");
    let store = SampleStore::connect(path.to_str().unwrap(), 2).await.unwrap();
    store.init().await.unwrap();
    (dir, Arc::new(store))
}

/// Current time truncated to the hour, so tier cutoffs land on bucket boundaries.
pub fn hour_aligned_now() -> DateTime<Utc> {
    Utc::now().duration_trunc(TimeDelta::hours(1)).unwrap()
}

pub fn floor_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::days(1)).unwrap()
}

pub fn signal_sample(entity: &str, at: DateTime<Utc>, dbm: f64) -> MetricSample {
    MetricSample::new(MetricClass::DeviceConnection, entity, at)
        .with_field("signal_strength", FieldValue::Number(dbm))
}

pub fn device_sample(
    entity: &str,
    at: DateTime<Utc>,
    dbm: f64,
    connected: bool,
    connection_type: &str,
) -> MetricSample {
    signal_sample(entity, at, dbm)
        .with_field("is_connected", FieldValue::Flag(connected))
        .with_field("connection_type", FieldValue::Text(connection_type.into()))
}

pub fn daily_aggregate(
    class: MetricClass,
    entity: &str,
    bucket_start: DateTime<Utc>,
    mean: f64,
) -> Aggregate {
    Aggregate {
        metric_class: class,
        entity_key: entity.into(),
        granularity: Granularity::Daily,
        bucket_start,
        sample_count: 1,
        fields: vec![FieldAggregate {
            name: "value".into(),
            summary: FieldSummary::Gauge {
                mean,
                max: mean,
                count: 1,
            },
        }],
    }
}

pub fn hourly_policies() -> RetentionPolicies {
    RetentionPolicies::uniform(RetentionPolicy {
        raw_days: 7,
        hourly_days: 30,
        daily_days: DailyRetention::Days(365),
    })
}
