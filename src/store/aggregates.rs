// Aggregate table: schema, per-bucket fold transactions, range reads, retention deletes.
// A fold reads its source rows and any aggregate already stored for the bucket, writes the
// merged aggregate and deletes the sources in one transaction, so readers see a bucket
// either in its source tier or aggregated.

use std::str::FromStr;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::instrument;

use super::{SampleStore, blob, parse_sample_row, ts_to_utc};
use crate::error::{Error, Result};
use crate::models::{Aggregate, Granularity, MetricClass, MetricSample};

/// What one bucket fold did. `written` is false when the source bucket was empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldOutcome {
    pub written: bool,
    pub deleted: u64,
}

pub(super) async fn init_aggregates_table(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aggregates (
            metric_class TEXT NOT NULL,
            entity_key TEXT NOT NULL,
            granularity TEXT NOT NULL,
            bucket_start INTEGER NOT NULL,
            sample_count INTEGER NOT NULL,
            summaries BLOB NOT NULL,
            PRIMARY KEY (metric_class, entity_key, granularity, bucket_start)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_aggregates_class_granularity_start ON aggregates(metric_class, granularity, bucket_start)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn upsert(tx: &mut Transaction<'static, Sqlite>, agg: &Aggregate) -> Result<()> {
    let summaries = blob::encode_summaries(&agg.fields)?;
    sqlx::query(
        r#"
        INSERT INTO aggregates
        (metric_class, entity_key, granularity, bucket_start, sample_count, summaries)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT(metric_class, entity_key, granularity, bucket_start)
        DO UPDATE SET sample_count = excluded.sample_count, summaries = excluded.summaries
        "#,
    )
    .bind(agg.metric_class.as_str())
    .bind(&agg.entity_key)
    .bind(agg.granularity.as_str())
    .bind(agg.bucket_start.timestamp())
    .bind(agg.sample_count as i64)
    .bind(&summaries)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// The aggregate already stored under the fold's target key, if any.
async fn existing(
    tx: &mut Transaction<'static, Sqlite>,
    metric_class: MetricClass,
    entity_key: &str,
    granularity: Granularity,
    bucket_start: i64,
) -> Result<Option<Aggregate>> {
    let row = sqlx::query(&format!(
        "SELECT {AGGREGATE_COLUMNS} FROM aggregates
         WHERE metric_class = $1 AND entity_key = $2 AND granularity = $3 AND bucket_start = $4"
    ))
    .bind(metric_class.as_str())
    .bind(entity_key)
    .bind(granularity.as_str())
    .bind(bucket_start)
    .fetch_optional(&mut **tx)
    .await?;
    row.as_ref().map(parse_aggregate_row).transpose()
}

fn parse_aggregate_row(row: &SqliteRow) -> Result<Aggregate> {
    let class: String = row.try_get("metric_class")?;
    let entity_key: String = row.try_get("entity_key")?;
    let granularity: String = row.try_get("granularity")?;
    let bucket_start: i64 = row.try_get("bucket_start")?;
    let sample_count: i64 = row.try_get("sample_count")?;
    let summaries: Vec<u8> = row.try_get("summaries")?;

    Ok(Aggregate {
        metric_class: MetricClass::from_str(&class)
            .map_err(|_| Error::Codec(format!("metric_class {class:?}")))?,
        entity_key,
        granularity: Granularity::from_str(&granularity)?,
        bucket_start: ts_to_utc(bucket_start)?,
        sample_count: u32::try_from(sample_count)
            .map_err(|_| Error::Codec(format!("sample_count {sample_count}")))?,
        fields: blob::decode_summaries(&summaries)?,
    })
}

const AGGREGATE_COLUMNS: &str =
    "metric_class, entity_key, granularity, bucket_start, sample_count, summaries";

impl SampleStore {
    /// Folds raw rows of one entity in [bucket_start, bucket_start + 1h) into an hourly aggregate.
    /// `reduce` also receives the hourly row already stored for the bucket (late samples) and
    /// must fold it in. Returning an error rolls the transaction back and leaves the raw rows
    /// in place.
    #[instrument(skip(self, reduce), fields(repo = "samples", operation = "fold_raw_bucket"))]
    pub(crate) async fn fold_raw_bucket<F>(
        &self,
        metric_class: MetricClass,
        entity_key: &str,
        bucket_start: i64,
        reduce: F,
    ) -> Result<FoldOutcome>
    where
        F: FnOnce(&[MetricSample], Option<Aggregate>) -> Result<Option<Aggregate>>,
    {
        let bucket_end = bucket_start + Granularity::Hourly.seconds();
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT metric_class, entity_key, ts, fields FROM raw_samples
             WHERE metric_class = $1 AND entity_key = $2 AND ts >= $3 AND ts < $4
             ORDER BY ts ASC, id ASC",
        )
        .bind(metric_class.as_str())
        .bind(entity_key)
        .bind(bucket_start)
        .bind(bucket_end)
        .fetch_all(&mut *tx)
        .await?;
        let samples = rows
            .iter()
            .map(parse_sample_row)
            .collect::<Result<Vec<_>>>()?;

        let stored =
            existing(&mut tx, metric_class, entity_key, Granularity::Hourly, bucket_start).await?;
        let Some(agg) = reduce(&samples, stored)? else {
            return Ok(FoldOutcome::default());
        };
        upsert(&mut tx, &agg).await?;

        let deleted = sqlx::query(
            "DELETE FROM raw_samples WHERE metric_class = $1 AND entity_key = $2 AND ts >= $3 AND ts < $4",
        )
        .bind(metric_class.as_str())
        .bind(entity_key)
        .bind(bucket_start)
        .bind(bucket_end)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(FoldOutcome {
            written: true,
            deleted,
        })
    }

    /// Folds hourly aggregates of one entity in [day_start, day_start + 1d) into a daily aggregate.
    #[instrument(skip(self, reduce), fields(repo = "samples", operation = "fold_hourly_bucket"))]
    pub(crate) async fn fold_hourly_bucket<F>(
        &self,
        metric_class: MetricClass,
        entity_key: &str,
        day_start: i64,
        reduce: F,
    ) -> Result<FoldOutcome>
    where
        F: FnOnce(&[Aggregate], Option<Aggregate>) -> Result<Option<Aggregate>>,
    {
        let day_end = day_start + Granularity::Daily.seconds();
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {AGGREGATE_COLUMNS} FROM aggregates
             WHERE metric_class = $1 AND entity_key = $2 AND granularity = $3
               AND bucket_start >= $4 AND bucket_start < $5
             ORDER BY bucket_start ASC"
        ))
        .bind(metric_class.as_str())
        .bind(entity_key)
        .bind(Granularity::Hourly.as_str())
        .bind(day_start)
        .bind(day_end)
        .fetch_all(&mut *tx)
        .await?;
        let hourly = rows
            .iter()
            .map(parse_aggregate_row)
            .collect::<Result<Vec<_>>>()?;

        let stored =
            existing(&mut tx, metric_class, entity_key, Granularity::Daily, day_start).await?;
        let Some(daily) = reduce(&hourly, stored)? else {
            return Ok(FoldOutcome::default());
        };
        upsert(&mut tx, &daily).await?;

        let deleted = sqlx::query(
            "DELETE FROM aggregates
             WHERE metric_class = $1 AND entity_key = $2 AND granularity = $3
               AND bucket_start >= $4 AND bucket_start < $5",
        )
        .bind(metric_class.as_str())
        .bind(entity_key)
        .bind(Granularity::Hourly.as_str())
        .bind(day_start)
        .bind(day_end)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(FoldOutcome {
            written: true,
            deleted,
        })
    }

    /// Entities holding aggregates of `granularity` with bucket_start < before_ts.
    pub(crate) async fn aggregate_entities_before(
        &self,
        metric_class: MetricClass,
        granularity: Granularity,
        before_ts: i64,
    ) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT entity_key FROM aggregates
             WHERE metric_class = $1 AND granularity = $2 AND bucket_start < $3
             ORDER BY entity_key",
        )
        .bind(metric_class.as_str())
        .bind(granularity.as_str())
        .bind(before_ts)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    /// Distinct `bucket_secs` buckets covering aggregates of `granularity` with bucket_start < before_ts.
    pub(crate) async fn aggregate_buckets_before(
        &self,
        metric_class: MetricClass,
        entity_key: &str,
        granularity: Granularity,
        before_ts: i64,
        bucket_secs: i64,
    ) -> Result<Vec<i64>> {
        let buckets = sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT (bucket_start / $1) * $1 AS bucket FROM aggregates
             WHERE metric_class = $2 AND entity_key = $3 AND granularity = $4 AND bucket_start < $5
             ORDER BY bucket",
        )
        .bind(bucket_secs)
        .bind(metric_class.as_str())
        .bind(entity_key)
        .bind(granularity.as_str())
        .bind(before_ts)
        .fetch_all(&self.pool)
        .await?;
        Ok(buckets)
    }

    /// Aggregates of one entity with bucket_start in [from_ts, to_ts), ascending.
    #[instrument(skip(self), fields(repo = "samples", operation = "aggregates_in_range"))]
    pub async fn aggregates_in_range(
        &self,
        metric_class: MetricClass,
        entity_key: &str,
        granularity: Granularity,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<Aggregate>> {
        let rows = sqlx::query(&format!(
            "SELECT {AGGREGATE_COLUMNS} FROM aggregates
             WHERE metric_class = $1 AND entity_key = $2 AND granularity = $3
               AND bucket_start >= $4 AND bucket_start < $5
             ORDER BY bucket_start ASC"
        ))
        .bind(metric_class.as_str())
        .bind(entity_key)
        .bind(granularity.as_str())
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_aggregate_row).collect()
    }

    /// Aggregates of one entity whose period [bucket_start, bucket_start + granularity)
    /// overlaps [from_ts, to_ts), ascending.
    pub async fn aggregates_overlapping(
        &self,
        metric_class: MetricClass,
        entity_key: &str,
        granularity: Granularity,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<Aggregate>> {
        let earliest = from_ts.saturating_sub(granularity.seconds() - 1);
        self.aggregates_in_range(metric_class, entity_key, granularity, earliest, to_ts)
            .await
    }

    pub async fn aggregate_count(
        &self,
        metric_class: MetricClass,
        granularity: Granularity,
    ) -> Result<u64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM aggregates WHERE metric_class = $1 AND granularity = $2",
        )
        .bind(metric_class.as_str())
        .bind(granularity.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(n as u64)
    }

    /// Writes an aggregate outside a fold (seeding, repair tooling).
    pub async fn upsert_aggregate(&self, agg: &Aggregate) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert(&mut tx, agg).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Deletes daily aggregates with bucket_start < before_ts.
    #[instrument(skip(self), fields(repo = "samples", operation = "purge_daily_before"))]
    pub(crate) async fn purge_daily_before(
        &self,
        metric_class: MetricClass,
        before_ts: i64,
    ) -> Result<u64> {
        let r = sqlx::query(
            "DELETE FROM aggregates WHERE metric_class = $1 AND granularity = $2 AND bucket_start < $3",
        )
        .bind(metric_class.as_str())
        .bind(Granularity::Daily.as_str())
        .bind(before_ts)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    pub(crate) async fn count_daily_before(
        &self,
        metric_class: MetricClass,
        before_ts: i64,
    ) -> Result<u64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM aggregates WHERE metric_class = $1 AND granularity = $2 AND bucket_start < $3",
        )
        .bind(metric_class.as_str())
        .bind(Granularity::Daily.as_str())
        .bind(before_ts)
        .fetch_one(&self.pool)
        .await?;
        Ok(n as u64)
    }
}
