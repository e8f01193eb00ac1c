// SQLite sample store. raw_samples is append-only for callers; only the rollup
// engine deletes from it, inside the same transaction that writes the aggregate.

mod aggregates;
mod blob;

pub use aggregates::FoldOutcome;

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::instrument;

use crate::error::{Error, Result};
use crate::models::{MetricClass, MetricSample};

const SCHEMA_VERSION: i64 = 1;

pub struct SampleStore {
    pool: SqlitePool,
}

impl SampleStore {
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (key TEXT PRIMARY KEY, value INTEGER NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS raw_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                metric_class TEXT NOT NULL,
                entity_key TEXT NOT NULL,
                ts INTEGER NOT NULL,
                fields BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_raw_class_entity_ts ON raw_samples(metric_class, entity_key, ts)",
        )
        .execute(&self.pool)
        .await?;

        aggregates::init_aggregates_table(&self.pool).await?;

        sqlx::query("INSERT OR REPLACE INTO schema_version (key, value) VALUES ('samples', $1)")
            .bind(SCHEMA_VERSION)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Appends one sample. Duplicates are accepted; aggregation is a reduction, not a set.
    pub async fn append(&self, sample: &MetricSample) -> Result<()> {
        self.append_batch(std::slice::from_ref(sample)).await?;
        Ok(())
    }

    /// Validates every sample, then writes all of them in one transaction.
    #[instrument(skip(self, samples), fields(repo = "samples", operation = "append_batch", samples_count = samples.len()))]
    pub async fn append_batch(&self, samples: &[MetricSample]) -> Result<u64> {
        if samples.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        for s in samples {
            if let Err(e) = s.validate(now) {
                tracing::warn!(error = %e, operation = "append", "sample rejected");
                return Err(e);
            }
        }

        let mut tx = self.pool.begin().await?;
        for s in samples {
            let fields = blob::encode_fields(&s.field_entries())?;
            sqlx::query(
                "INSERT INTO raw_samples (metric_class, entity_key, ts, fields) VALUES ($1, $2, $3, $4)",
            )
            .bind(s.metric_class.as_str())
            .bind(&s.entity_key)
            .bind(s.timestamp.timestamp())
            .bind(&fields)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(samples.len() as u64)
    }

    /// Samples for one entity in [from, to), ascending by timestamp. Lazy; call again to restart.
    pub fn scan<'a>(
        &'a self,
        metric_class: MetricClass,
        entity_key: &'a str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> BoxStream<'a, Result<MetricSample>> {
        sqlx::query(
            "SELECT metric_class, entity_key, ts, fields FROM raw_samples
             WHERE metric_class = $1 AND entity_key = $2 AND ts >= $3 AND ts < $4
             ORDER BY ts ASC, id ASC",
        )
        .bind(metric_class.as_str())
        .bind(entity_key)
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch(&self.pool)
        .map(|row| row.map_err(Error::from).and_then(|row| parse_sample_row(&row)))
        .boxed()
    }

    /// Every entity with raw or aggregated data for the class, sorted.
    pub async fn entity_keys(&self, metric_class: MetricClass) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT entity_key FROM raw_samples WHERE metric_class = $1
             UNION
             SELECT entity_key FROM aggregates WHERE metric_class = $1
             ORDER BY entity_key",
        )
        .bind(metric_class.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    pub async fn raw_count(&self, metric_class: MetricClass) -> Result<u64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM raw_samples WHERE metric_class = $1",
        )
        .bind(metric_class.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(n as u64)
    }

    /// Entities holding raw rows with ts < before_ts.
    pub(crate) async fn raw_entities_before(
        &self,
        metric_class: MetricClass,
        before_ts: i64,
    ) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT entity_key FROM raw_samples WHERE metric_class = $1 AND ts < $2 ORDER BY entity_key",
        )
        .bind(metric_class.as_str())
        .bind(before_ts)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    /// Start of every non-empty bucket of `bucket_secs` holding raw rows with ts < before_ts.
    pub(crate) async fn raw_buckets_before(
        &self,
        metric_class: MetricClass,
        entity_key: &str,
        before_ts: i64,
        bucket_secs: i64,
    ) -> Result<Vec<i64>> {
        let buckets = sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT (ts / $1) * $1 AS bucket FROM raw_samples
             WHERE metric_class = $2 AND entity_key = $3 AND ts < $4
             ORDER BY bucket",
        )
        .bind(bucket_secs)
        .bind(metric_class.as_str())
        .bind(entity_key)
        .bind(before_ts)
        .fetch_all(&self.pool)
        .await?;
        Ok(buckets)
    }

    /// Reclaim space after deletes.
    #[instrument(skip(self), fields(repo = "samples", operation = "vacuum"))]
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    /// Closes the pool; later operations fail with `StorageUnavailable`.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn ts_to_utc(ts: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| Error::Codec(format!("timestamp {ts} out of range")))
}

fn parse_sample_row(row: &SqliteRow) -> Result<MetricSample> {
    let class: String = row.try_get("metric_class")?;
    let entity_key: String = row.try_get("entity_key")?;
    let ts: i64 = row.try_get("ts")?;
    let fields: Vec<u8> = row.try_get("fields")?;

    let metric_class =
        MetricClass::from_str(&class).map_err(|_| Error::Codec(format!("metric_class {class:?}")))?;
    let fields = blob::decode_fields(&fields)?
        .into_iter()
        .map(|entry| (entry.name, entry.value))
        .collect();

    Ok(MetricSample {
        metric_class,
        entity_key,
        timestamp: ts_to_utc(ts)?,
        fields,
    })
}
