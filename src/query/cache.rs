// TTL memoization of query results. Staleness is bounded by the TTL only; writes never
// invalidate. Concurrent callers with the same fingerprint share one computation.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::models::QueryFingerprint;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Longest TTL a cache accepts; longer values are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(86_400);

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

type Slot<V> = Arc<Mutex<Option<CacheEntry<V>>>>;

/// Process-local, disposable: dropping it loses nothing but warm results.
pub struct QueryCache<V> {
    ttl: Duration,
    slots: DashMap<QueryFingerprint, Slot<V>>,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ttl.min(MAX_TTL),
            slots: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value while `now < expires_at`; otherwise runs `compute` and stores
    /// its result for one TTL. Errors are returned and not cached.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        fingerprint: QueryFingerprint,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        // The shard guard is released at the end of this statement, before any await.
        let slot = self.slots.entry(fingerprint).or_default().clone();

        // Held across compute: later callers for this fingerprint wait here, then hit.
        let mut entry = slot.lock().await;
        if let Some(cached) = entry.as_ref()
            && Instant::now() < cached.expires_at
        {
            debug!(operation = "query_cache", "hit");
            return Ok(cached.value.clone());
        }

        debug!(operation = "query_cache", "miss");
        let value = compute().await?;
        *entry = Some(CacheEntry {
            value: value.clone(),
            expires_at: Instant::now() + self.ttl,
        });
        drop(entry);

        self.evict_expired();
        Ok(value)
    }

    /// Drops expired or empty slots that no caller holds.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.slots.retain(|_, slot| {
            // A clone outside the map is a caller between lookup and lock, or inside compute.
            Arc::strong_count(slot) > 1
                || slot
                    .try_lock()
                    .is_ok_and(|entry| entry.as_ref().is_some_and(|e| now < e.expires_at))
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<V: Clone> Default for QueryCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
