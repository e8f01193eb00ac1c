// Query cache tests: compute-once, TTL expiry, single-flight, errors not cached

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use meshvista::models::{MetricClass, QueryFingerprint, QueryRequest};
use meshvista::query::cache::{MAX_TTL, QueryCache};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Duration;

fn fingerprint(entities: &[&str], bucket_hours: i64) -> QueryFingerprint {
    QueryRequest {
        metric_class: MetricClass::NodeStatus,
        entity_keys: entities.iter().map(|e| e.to_string()).collect(),
        field: "connected_device_count".into(),
        window_start: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        window_end: Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
        bucket_size: ChronoDuration::hours(bucket_hours),
    }
    .fingerprint()
}

async fn counted(calls: &AtomicUsize, value: u32) -> Result<u32, String> {
    calls.fetch_add(1, Ordering::SeqCst);
    Ok(value)
}

#[tokio::test]
async fn cache_computes_once_within_ttl() {
    let cache = QueryCache::new(Duration::from_secs(300));
    let calls = AtomicUsize::new(0);

    let first = cache
        .get_or_compute(fingerprint(&["n1"], 1), || counted(&calls, 7))
        .await
        .unwrap();
    let second = cache
        .get_or_compute(fingerprint(&["n1"], 1), || counted(&calls, 8))
        .await
        .unwrap();
    assert_eq!(first, 7);
    assert_eq!(second, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cache_recomputes_after_expiry() {
    let cache = QueryCache::new(Duration::from_secs(300));
    let calls = AtomicUsize::new(0);

    cache
        .get_or_compute(fingerprint(&["n1"], 1), || counted(&calls, 1))
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(299)).await;
    let still_cached = cache
        .get_or_compute(fingerprint(&["n1"], 1), || counted(&calls, 2))
        .await
        .unwrap();
    assert_eq!(still_cached, 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let fresh = cache
        .get_or_compute(fingerprint(&["n1"], 1), || counted(&calls, 3))
        .await
        .unwrap();
    assert_eq!(fresh, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cache_concurrent_callers_share_one_computation() {
    let cache = Arc::new(QueryCache::new(Duration::from_secs(300)));
    let calls = Arc::new(AtomicUsize::new(0));

    let slow = |value: u32| {
        let calls = calls.clone();
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<u32, String>(value)
        }
    };

    let (a, b) = tokio::join!(
        cache.get_or_compute(fingerprint(&["n1", "n2"], 1), slow(10)),
        cache.get_or_compute(fingerprint(&["n2", "n1"], 1), slow(20)),
    );
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cache_distinct_fingerprints_compute_separately() {
    let cache = QueryCache::new(Duration::from_secs(300));
    let calls = AtomicUsize::new(0);

    let hourly = cache
        .get_or_compute(fingerprint(&["n1"], 1), || counted(&calls, 1))
        .await
        .unwrap();
    let six_hourly = cache
        .get_or_compute(fingerprint(&["n1"], 6), || counted(&calls, 6))
        .await
        .unwrap();
    assert_eq!((hourly, six_hourly), (1, 6));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn cache_does_not_store_errors() {
    let cache: QueryCache<u32> = QueryCache::new(Duration::from_secs(300));
    let calls = AtomicUsize::new(0);

    let err = cache
        .get_or_compute(fingerprint(&["n1"], 1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>("storage unavailable".to_string())
        })
        .await
        .unwrap_err();
    assert_eq!(err, "storage unavailable");

    let ok = cache
        .get_or_compute(fingerprint(&["n1"], 1), || counted(&calls, 5))
        .await
        .unwrap();
    assert_eq!(ok, 5);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cache_evicts_expired_entries() {
    let cache = QueryCache::new(Duration::from_secs(60));
    let calls = AtomicUsize::new(0);
    cache
        .get_or_compute(fingerprint(&["n1"], 1), || counted(&calls, 1))
        .await
        .unwrap();
    assert_eq!(cache.len(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    cache.evict_expired();
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cache_eviction_keeps_slot_with_computation_in_flight() {
    let cache = Arc::new(QueryCache::new(Duration::from_secs(60)));
    let calls = Arc::new(AtomicUsize::new(0));
    let other_calls = AtomicUsize::new(0);

    let slow = |value: u32| {
        let calls = calls.clone();
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<u32, String>(value)
        }
    };

    let (first, joined) = tokio::join!(
        cache.get_or_compute(fingerprint(&["n1"], 1), slow(10)),
        async {
            // The first future is inside compute by now; a miss on another key evicts.
            cache.evict_expired();
            cache
                .get_or_compute(fingerprint(&["n2"], 1), || counted(&other_calls, 99))
                .await
                .unwrap();
            assert_eq!(cache.len(), 2);
            cache
                .get_or_compute(fingerprint(&["n1"], 1), slow(20))
                .await
        },
    );
    assert_eq!(first.unwrap(), 10);
    assert_eq!(joined.unwrap(), 10);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cache_evicts_failed_slot_nobody_holds() {
    let cache: QueryCache<u32> = QueryCache::new(Duration::from_secs(60));
    cache
        .get_or_compute(fingerprint(&["n1"], 1), || async {
            Err::<u32, _>("storage unavailable".to_string())
        })
        .await
        .unwrap_err();
    // The empty slot from the failed computation lingers until the next sweep.
    assert_eq!(cache.len(), 1);
    cache.evict_expired();
    assert!(cache.is_empty());
}

#[test]
fn cache_clamps_ttl() {
    let cache: QueryCache<u32> = QueryCache::new(Duration::from_secs(u64::MAX));
    assert_eq!(cache.ttl(), MAX_TTL);
}

#[test]
fn fingerprint_ignores_entity_order_and_duplicates() {
    assert_eq!(
        fingerprint(&["b", "a", "a"], 1),
        fingerprint(&["a", "b"], 1)
    );
    assert_ne!(fingerprint(&["a"], 1), fingerprint(&["a", "b"], 1));
}
