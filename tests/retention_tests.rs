// Retention sweeper tests: daily boundary, forever classes, preview

mod common;

use chrono::{Duration, Utc};
use common::*;
use meshvista::models::*;
use meshvista::retention::{purge_preview, sweep};

#[tokio::test]
async fn sweep_deletes_daily_older_than_daily_days() {
    let (_dir, store) = temp_store().await;
    let now = Utc::now();
    let expired = floor_day(now - Duration::days(366));
    let kept = floor_day(now - Duration::days(364));
    for day in [expired, kept] {
        store
            .upsert_aggregate(&daily_aggregate(MetricClass::DeviceConnection, "aa", day, 1.0))
            .await
            .unwrap();
    }

    let summary = sweep(&store, &RetentionPolicies::default(), now).await.unwrap();
    assert_eq!(summary.rows_for(MetricClass::DeviceConnection), 1);
    assert_eq!(summary.total, 1);

    let left = store
        .aggregates_in_range(
            MetricClass::DeviceConnection,
            "aa",
            Granularity::Daily,
            expired.timestamp(),
            now.timestamp(),
        )
        .await
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].bucket_start, kept);
}

#[tokio::test]
async fn sweep_never_touches_forever_class() {
    let (_dir, store) = temp_store().await;
    let now = Utc::now();
    let ancient = floor_day(now - Duration::days(1000));
    store
        .upsert_aggregate(&daily_aggregate(MetricClass::Speedtest, "", ancient, 900.0))
        .await
        .unwrap();

    let summary = sweep(&store, &RetentionPolicies::default(), now).await.unwrap();
    assert_eq!(summary.total, 0);
    assert!(
        summary
            .classes
            .iter()
            .all(|c| c.metric_class != MetricClass::Speedtest)
    );
    assert_eq!(
        store
            .aggregate_count(MetricClass::Speedtest, Granularity::Daily)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn sweep_leaves_raw_and_hourly_alone() {
    let (_dir, store) = temp_store().await;
    let now = Utc::now();
    let old = now - Duration::days(400);
    store.append(&signal_sample("aa", old, -50.0)).await.unwrap();
    store
        .upsert_aggregate(&Aggregate {
            granularity: Granularity::Hourly,
            ..daily_aggregate(
                MetricClass::DeviceConnection,
                "aa",
                floor_day(old),
                1.0,
            )
        })
        .await
        .unwrap();

    let summary = sweep(&store, &RetentionPolicies::default(), now).await.unwrap();
    assert_eq!(summary.total, 0);
    assert_eq!(
        store.raw_count(MetricClass::DeviceConnection).await.unwrap(),
        1
    );
    assert_eq!(
        store
            .aggregate_count(MetricClass::DeviceConnection, Granularity::Hourly)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn purge_preview_matches_sweep_and_deletes_nothing() {
    let (_dir, store) = temp_store().await;
    let now = Utc::now();
    for (class, entity) in [
        (MetricClass::DeviceConnection, "aa"),
        (MetricClass::DeviceConnection, "bb"),
        (MetricClass::NodeStatus, "node-1"),
    ] {
        store
            .upsert_aggregate(&daily_aggregate(
                class,
                entity,
                floor_day(now - Duration::days(500)),
                1.0,
            ))
            .await
            .unwrap();
    }

    let policies = RetentionPolicies::default();
    let preview = purge_preview(&store, &policies, now).await.unwrap();
    assert_eq!(preview.rows_for(MetricClass::DeviceConnection), 2);
    assert_eq!(preview.rows_for(MetricClass::NodeStatus), 1);
    assert_eq!(preview.total, 3);
    // Preview twice: still there.
    assert_eq!(purge_preview(&store, &policies, now).await.unwrap(), preview);

    let swept = sweep(&store, &policies, now).await.unwrap();
    assert_eq!(swept, preview);
    assert_eq!(purge_preview(&store, &policies, now).await.unwrap().total, 0);
}

#[tokio::test]
async fn sweep_respects_per_class_policy() {
    let (_dir, store) = temp_store().await;
    let now = Utc::now();
    let day = floor_day(now - Duration::days(100));
    for class in [MetricClass::NodeStatus, MetricClass::NetworkSummary] {
        store
            .upsert_aggregate(&daily_aggregate(class, "", day, 1.0))
            .await
            .unwrap();
    }
    let policies = RetentionPolicies {
        node_status: RetentionPolicy {
            raw_days: 1,
            hourly_days: 7,
            daily_days: DailyRetention::Days(90),
        },
        ..RetentionPolicies::default()
    };

    let summary = sweep(&store, &policies, now).await.unwrap();
    assert_eq!(summary.rows_for(MetricClass::NodeStatus), 1);
    assert_eq!(summary.rows_for(MetricClass::NetworkSummary), 0);
}
