// Range query request/response types and the cache fingerprint.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{FieldKind, FieldSummary, MetricClass};

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub metric_class: MetricClass,
    /// Empty means every entity of the class.
    pub entity_keys: Vec<String>,
    pub field: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub bucket_size: Duration,
}

impl QueryRequest {
    pub fn fingerprint(&self) -> QueryFingerprint {
        let mut entity_keys = self.entity_keys.clone();
        entity_keys.sort();
        entity_keys.dedup();
        QueryFingerprint {
            metric_class: self.metric_class,
            entity_keys,
            field: self.field.clone(),
            window_start: self.window_start.timestamp(),
            window_end: self.window_end.timestamp(),
            bucket_secs: self.bucket_size.num_seconds(),
        }
    }
}

/// Canonical cache key: every parameter that affects a query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFingerprint {
    pub metric_class: MetricClass,
    pub entity_keys: Vec<String>,
    pub field: String,
    pub window_start: i64,
    pub window_end: i64,
    pub bucket_secs: i64,
}

/// Value of one query bucket. Empty buckets are `Gauge { 0, 0 }` or `Unknown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BucketValue {
    Gauge { mean: f64, max: f64 },
    Fraction { ratio: f64 },
    Status { value: String },
    Unknown,
}

impl BucketValue {
    pub(crate) fn empty(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Gauge => BucketValue::Gauge { mean: 0.0, max: 0.0 },
            FieldKind::Flag | FieldKind::Status => BucketValue::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, BucketValue::Unknown)
    }
}

impl From<FieldSummary> for BucketValue {
    fn from(summary: FieldSummary) -> Self {
        match summary {
            FieldSummary::Gauge { mean, max, .. } => BucketValue::Gauge { mean, max },
            FieldSummary::Flag { true_count, count } => BucketValue::Fraction {
                ratio: if count == 0 {
                    0.0
                } else {
                    true_count as f64 / count as f64
                },
            },
            FieldSummary::Status { value, .. } => BucketValue::Status { value },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryBucket {
    pub bucket_start: DateTime<Utc>,
    pub value: BucketValue,
    /// The bucket still accumulating samples (contains `now`). Advisory only.
    pub is_incomplete: bool,
}
