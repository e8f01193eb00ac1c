// Ingest writer: the collector surface sends samples on a channel; this task batches them
// into the sample store so each poll result does not cost its own transaction.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::time::{Duration, interval};

use crate::models::MetricSample;
use crate::store::SampleStore;

/// Samples kept in memory while the store is unreachable.
const MAX_BUFFERED_SAMPLES: usize = 10_000;

/// Channel capacity for the writer (backpressure if it falls behind).
pub fn writer_channel_capacity(flush_rate: u64) -> usize {
    (flush_rate as usize * 2).max(32)
}

/// Batching for the ingest writer task.
pub struct SampleWriterConfig {
    pub flush_rate: u64,
    pub flush_interval_secs: u64,
}

/// Spawns the task that receives samples and appends them to the store.
/// Flushes when the buffer reaches flush_rate, every flush_interval_secs, and once more when
/// every sender is dropped.
pub fn spawn_sample_writer(
    mut write_rx: mpsc::Receiver<MetricSample>,
    store: Arc<SampleStore>,
    config: SampleWriterConfig,
    samples_saved_total: Arc<AtomicU64>,
) -> tokio::task::JoinHandle<()> {
    let flush_interval = Duration::from_secs(config.flush_interval_secs);
    tokio::spawn(async move {
        let mut buffer: Vec<MetricSample> = Vec::new();
        let mut flush_tick = interval(flush_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = write_rx.recv() => {
                    match result {
                        Some(sample) => {
                            buffer.push(sample);
                            if buffer.len() >= config.flush_rate as usize {
                                flush_buffer(&store, &mut buffer, &samples_saved_total).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = flush_tick.tick() => {
                    flush_buffer(&store, &mut buffer, &samples_saved_total).await;
                }
            }
        }
        flush_buffer(&store, &mut buffer, &samples_saved_total).await;
        tracing::debug!("Sample writer shutting down");
    })
}

/// Writes the buffer as one batch. A rejected batch is retried sample by sample so one bad
/// sample does not drop its neighbours; storage failures keep the unsaved samples for the
/// next flush.
pub(crate) async fn flush_buffer(
    store: &SampleStore,
    buffer: &mut Vec<MetricSample>,
    samples_saved_total: &AtomicU64,
) {
    if buffer.is_empty() {
        return;
    }
    let result = match store.append_batch(buffer).await {
        Ok(n) => {
            samples_saved_total.fetch_add(n, Ordering::Relaxed);
            tracing::debug!(
                operation = "append_batch",
                samples_count = n,
                "Samples saved"
            );
            buffer.clear();
            Ok(())
        }
        Err(crate::Error::InvalidSample(_)) => {
            append_one_by_one(store, buffer, samples_saved_total).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::warn!(
            error = %e,
            buffered = buffer.len(),
            "sample writer: append failed, retrying on next flush"
        );
        if buffer.len() > MAX_BUFFERED_SAMPLES {
            let excess = buffer.len() - MAX_BUFFERED_SAMPLES;
            buffer.drain(..excess);
            tracing::warn!(dropped = excess, "sample writer: buffer full, oldest samples dropped");
        }
    }
}

/// Drops invalid samples. Stops at the first storage error, leaving that sample and the
/// ones after it in `buffer`.
async fn append_one_by_one(
    store: &SampleStore,
    buffer: &mut Vec<MetricSample>,
    samples_saved_total: &AtomicU64,
) -> crate::Result<()> {
    let pending = std::mem::take(buffer);
    let mut rest = pending.into_iter();
    while let Some(sample) = rest.next() {
        match store.append(&sample).await {
            Ok(()) => {
                samples_saved_total.fetch_add(1, Ordering::Relaxed);
            }
            Err(e @ crate::Error::InvalidSample(_)) => tracing::warn!(
                error = %e,
                metric_class = %sample.metric_class,
                entity_key = %sample.entity_key,
                "sample dropped"
            ),
            Err(e) => {
                buffer.push(sample);
                buffer.extend(rest);
                return Err(e);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldValue, MetricClass};
    use chrono::{Duration as ChronoDuration, Utc};
    use tempfile::TempDir;

    async fn store_in(dir: &TempDir) -> SampleStore {
        let path = dir.path().join("meshvista.db");
        let store = SampleStore::connect(path.to_str().unwrap(), 1).await.unwrap();
        store.init().await.unwrap();
        store
    }

    fn sample(entity: &str, offset_mins: i64) -> MetricSample {
        MetricSample::new(
            MetricClass::DeviceConnection,
            entity,
            Utc::now() + ChronoDuration::minutes(offset_mins),
        )
        .with_field("signal_strength", FieldValue::Number(-50.0))
    }

    fn entities(buffer: &[MetricSample]) -> Vec<&str> {
        buffer.iter().map(|s| s.entity_key.as_str()).collect()
    }

    #[tokio::test]
    async fn flush_keeps_unsaved_samples_when_storage_fails_mid_fallback() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        store.close().await;
        let saved = AtomicU64::new(0);

        // The future sample forces the per-sample path; the closed pool fails "aa".
        let mut buffer = vec![sample("future", 600), sample("aa", -5), sample("bb", -4)];
        flush_buffer(&store, &mut buffer, &saved).await;

        assert_eq!(entities(&buffer), vec!["aa", "bb"]);
        assert_eq!(saved.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn flush_drops_invalid_and_saves_the_rest() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).await;
        let saved = AtomicU64::new(0);

        let mut buffer = vec![sample("aa", -5), sample("future", 600), sample("bb", -4)];
        flush_buffer(&store, &mut buffer, &saved).await;

        assert!(buffer.is_empty());
        assert_eq!(saved.load(Ordering::Relaxed), 2);
        assert_eq!(store.raw_count(MetricClass::DeviceConnection).await.unwrap(), 2);
    }
}
