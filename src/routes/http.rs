// JSON handlers and the library-error → HTTP status mapping

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;

use super::AppState;
use crate::error::Error;
use crate::models::{MetricClass, MetricSample, QueryRequest};
use crate::query::MAX_BUCKET_SECS;
use crate::retention;

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buckets returned when the caller gives no window.
const DEFAULT_BUCKET_COUNT: i64 = 24;
const DEFAULT_BUCKET_SECS: i64 = 3_600;

pub(super) struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match e {
            Error::InvalidSample(_) | Error::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::RollupPartialFailure { .. } | Error::Codec(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::warn!(error = %e, "request failed");
        }
        ApiError {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

/// GET /version: service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// POST /api/samples: a JSON array of samples. All are validated before any is queued.
pub(super) async fn ingest_handler(
    State(state): State<AppState>,
    Json(body): Json<Vec<serde_json::Value>>,
) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let mut samples = Vec::with_capacity(body.len());
    for (i, value) in body.into_iter().enumerate() {
        let sample: MetricSample = serde_json::from_value(value)
            .map_err(|e| Error::InvalidSample(format!("sample {i}: {e}")))?;
        sample.validate(now)?;
        samples.push(sample);
    }

    let accepted = samples.len();
    for sample in samples {
        if state.write_tx.send(sample).await.is_err() {
            return Err(ApiError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: "ingest writer is not running".into(),
            });
        }
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": accepted })),
    ))
}

#[derive(Debug, Deserialize)]
pub(super) struct QueryParams {
    class: String,
    field: String,
    /// Comma-separated entity keys; absent or empty means every entity.
    #[serde(default)]
    entities: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    bucket_secs: Option<i64>,
}

impl QueryParams {
    fn into_request(self, now: DateTime<Utc>) -> Result<QueryRequest, Error> {
        let metric_class = MetricClass::from_str(&self.class)
            .map_err(|_| Error::InvalidQuery(format!("unknown metric class {:?}", self.class)))?;
        let bucket_secs = self.bucket_secs.unwrap_or(DEFAULT_BUCKET_SECS);
        if !(1..=MAX_BUCKET_SECS).contains(&bucket_secs) {
            return Err(Error::InvalidQuery(format!(
                "bucket_secs must be between 1 and {MAX_BUCKET_SECS}, got {bucket_secs}"
            )));
        }
        let bucket_size = TimeDelta::try_seconds(bucket_secs)
            .ok_or_else(|| Error::InvalidQuery(format!("bucket_secs {bucket_secs} out of range")))?;

        let (window_start, window_end) = match (self.start, self.end) {
            (Some(start), Some(end)) => (start, end),
            (None, None) => default_window(now, bucket_secs)?,
            (Some(start), None) => (start, now),
            (None, Some(end)) => {
                let start = bucket_size
                    .checked_mul(DEFAULT_BUCKET_COUNT as i32)
                    .and_then(|span| end.checked_sub_signed(span))
                    .ok_or_else(|| {
                        Error::InvalidQuery(format!(
                            "{DEFAULT_BUCKET_COUNT} buckets of {bucket_secs}s before {end} are out of range"
                        ))
                    })?;
                (start, end)
            }
        };

        let entity_keys = self
            .entities
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(QueryRequest {
            metric_class,
            entity_keys,
            field: self.field,
            window_start,
            window_end,
            bucket_size,
        })
    }
}

/// Last DEFAULT_BUCKET_COUNT buckets ending at the first UTC bucket boundary at or after
/// `now`, so the newest bucket is the one still filling.
fn default_window(
    now: DateTime<Utc>,
    bucket_secs: i64,
) -> Result<(DateTime<Utc>, DateTime<Utc>), Error> {
    let out_of_range =
        || Error::InvalidQuery(format!("default window for bucket_secs {bucket_secs} out of range"));
    let end_ts = now
        .timestamp()
        .checked_add(bucket_secs - 1)
        .and_then(|ts| ts.div_euclid(bucket_secs).checked_mul(bucket_secs))
        .ok_or_else(out_of_range)?;
    let start_ts = bucket_secs
        .checked_mul(DEFAULT_BUCKET_COUNT)
        .and_then(|span| end_ts.checked_sub(span))
        .ok_or_else(out_of_range)?;
    let to_utc = |ts: i64| DateTime::from_timestamp(ts, 0).ok_or_else(out_of_range);
    Ok((to_utc(start_ts)?, to_utc(end_ts)?))
}

/// GET /api/query: dense bucket series, served through the query cache.
pub(super) async fn query_handler(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let req = params.into_request(now)?;
    let engine = state.engine.clone();
    let buckets = state
        .cache
        .get_or_compute(req.fingerprint(), || async move {
            engine.query(&req, now).await.map(Arc::new)
        })
        .await?;
    Ok(Json(buckets.as_slice()).into_response())
}

/// GET /api/purge-preview: rows the next sweep would delete, per class.
pub(super) async fn purge_preview_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = retention::purge_preview(&state.store, &state.policies, Utc::now()).await?;
    Ok(Json(summary))
}
