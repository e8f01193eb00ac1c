// SampleStore tests: connect, init, append, scan, entity listing

mod common;

use chrono::{Duration, Utc};
use common::*;
use futures_util::TryStreamExt;
use meshvista::Error;
use meshvista::models::*;
use meshvista::store::SampleStore;
use tempfile::TempDir;

#[tokio::test]
async fn sample_store_connect_and_init() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("samples.db");
    let path_str = path.to_str().unwrap();

    let store = SampleStore::connect(path_str, 2).await.unwrap();
    store.init().await.unwrap();
    // Second init is no-op (IF NOT EXISTS)
    store.init().await.unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn sample_store_append_and_scan_in_order() {
    let (_dir, store) = temp_store().await;
    let base = hour_aligned_now() - Duration::hours(2);

    let samples = vec![
        device_sample("aa:bb", base + Duration::minutes(20), -60.0, true, "wireless"),
        device_sample("aa:bb", base + Duration::minutes(5), -50.0, false, "wired"),
        device_sample("cc:dd", base + Duration::minutes(10), -70.0, true, "wireless"),
    ];
    assert_eq!(store.append_batch(&samples).await.unwrap(), 3);

    let scanned: Vec<MetricSample> = store
        .scan(
            MetricClass::DeviceConnection,
            "aa:bb",
            base,
            base + Duration::hours(1),
        )
        .try_collect()
        .await
        .unwrap();
    assert_eq!(scanned.len(), 2);
    assert_eq!(scanned[0].timestamp, base + Duration::minutes(5));
    assert_eq!(scanned[1].timestamp, base + Duration::minutes(20));
    assert_eq!(
        scanned[0].fields.get("connection_type"),
        Some(&FieldValue::Text("wired".into()))
    );
    assert_eq!(
        scanned[0].fields.get("is_connected"),
        Some(&FieldValue::Flag(false))
    );
    assert_eq!(
        scanned[1].fields.get("signal_strength"),
        Some(&FieldValue::Number(-60.0))
    );
}

#[tokio::test]
async fn sample_store_scan_end_is_exclusive() {
    let (_dir, store) = temp_store().await;
    let base = hour_aligned_now() - Duration::hours(3);
    store.append(&signal_sample("aa", base, -40.0)).await.unwrap();
    store
        .append(&signal_sample("aa", base + Duration::hours(1), -41.0))
        .await
        .unwrap();

    let scanned: Vec<MetricSample> = store
        .scan(
            MetricClass::DeviceConnection,
            "aa",
            base,
            base + Duration::hours(1),
        )
        .try_collect()
        .await
        .unwrap();
    assert_eq!(scanned.len(), 1);
    assert_eq!(scanned[0].timestamp, base);
}

#[tokio::test]
async fn sample_store_duplicates_are_kept() {
    let (_dir, store) = temp_store().await;
    let at = hour_aligned_now() - Duration::hours(1);
    let sample = signal_sample("aa", at, -55.0);
    store.append(&sample).await.unwrap();
    store.append(&sample).await.unwrap();
    assert_eq!(
        store.raw_count(MetricClass::DeviceConnection).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn sample_store_rejects_future_sample() {
    let (_dir, store) = temp_store().await;
    let future = signal_sample("aa", Utc::now() + Duration::hours(1), -50.0);

    let err = store.append(&future).await.unwrap_err();
    assert!(matches!(err, Error::InvalidSample(_)));
    assert_eq!(
        store.raw_count(MetricClass::DeviceConnection).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn sample_store_batch_with_invalid_sample_writes_nothing() {
    let (_dir, store) = temp_store().await;
    let past = Utc::now() - Duration::minutes(5);
    let batch = vec![
        signal_sample("aa", past, -50.0),
        signal_sample("aa", Utc::now() + Duration::days(1), -50.0),
    ];

    let err = store.append_batch(&batch).await.unwrap_err();
    assert!(matches!(err, Error::InvalidSample(_)));
    assert_eq!(
        store.raw_count(MetricClass::DeviceConnection).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn sample_store_empty_batch_no_op() {
    let (_dir, store) = temp_store().await;
    assert_eq!(store.append_batch(&[]).await.unwrap(), 0);
}

#[tokio::test]
async fn sample_store_entity_keys_per_class() {
    let (_dir, store) = temp_store().await;
    let at = hour_aligned_now() - Duration::hours(1);
    store
        .append_batch(&[
            signal_sample("bb", at, -50.0),
            signal_sample("aa", at, -50.0),
            signal_sample("bb", at + Duration::minutes(1), -50.0),
            MetricSample::new(MetricClass::NetworkSummary, "", at)
                .with_field("total_devices", FieldValue::Number(12.0)),
        ])
        .await
        .unwrap();

    assert_eq!(
        store
            .entity_keys(MetricClass::DeviceConnection)
            .await
            .unwrap(),
        vec!["aa".to_string(), "bb".to_string()]
    );
    assert_eq!(
        store.entity_keys(MetricClass::NetworkSummary).await.unwrap(),
        vec![String::new()]
    );
    assert!(store.entity_keys(MetricClass::Speedtest).await.unwrap().is_empty());
}

#[tokio::test]
async fn sample_store_upsert_aggregate_overwrites() {
    let (_dir, store) = temp_store().await;
    let day = floor_day(Utc::now() - Duration::days(40));

    store
        .upsert_aggregate(&daily_aggregate(MetricClass::NodeStatus, "n1", day, 1.0))
        .await
        .unwrap();
    store
        .upsert_aggregate(&daily_aggregate(MetricClass::NodeStatus, "n1", day, 2.0))
        .await
        .unwrap();

    let rows = store
        .aggregates_in_range(
            MetricClass::NodeStatus,
            "n1",
            Granularity::Daily,
            day.timestamp(),
            (day + Duration::days(1)).timestamp(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].field("value"),
        Some(&FieldSummary::Gauge {
            mean: 2.0,
            max: 2.0,
            count: 1
        })
    );
    assert_eq!(
        store
            .aggregate_count(MetricClass::NodeStatus, Granularity::Daily)
            .await
            .unwrap(),
        1
    );
}
