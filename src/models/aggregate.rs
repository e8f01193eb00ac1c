// Aggregate rows: one bucket of compacted samples at hourly or daily granularity.
// Summaries carry observation counts so coarser folds stay exact.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

use super::MetricClass;
use crate::error::Error;

pub const SECS_PER_HOUR: i64 = 3_600;
pub const SECS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hourly,
    Daily,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Granularity::Hourly => SECS_PER_HOUR,
            Granularity::Daily => SECS_PER_DAY,
        }
    }

    /// Truncates a unix timestamp (seconds) to this granularity's UTC boundary.
    pub fn truncate(&self, ts: i64) -> i64 {
        ts.div_euclid(self.seconds()) * self.seconds()
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Granularity::Hourly),
            "daily" => Ok(Granularity::Daily),
            other => Err(Error::Codec(format!("unknown granularity {other:?}"))),
        }
    }
}

/// Reduced observations of one field within one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldSummary {
    Gauge { mean: f64, max: f64, count: u32 },
    Flag { true_count: u32, count: u32 },
    /// `observed_at` is the unix second of the observation that produced `value`.
    Status { value: String, observed_at: i64 },
}

impl FieldSummary {
    /// Fraction of observations that were true; None for non-flag summaries.
    pub fn true_fraction(&self) -> Option<f64> {
        match self {
            FieldSummary::Flag { true_count, count } if *count > 0 => {
                Some(*true_count as f64 / *count as f64)
            }
            FieldSummary::Flag { .. } => Some(0.0),
            _ => None,
        }
    }
}

/// Named summary as stored in the aggregate BLOB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
pub struct FieldAggregate {
    pub name: String,
    pub summary: FieldSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub metric_class: MetricClass,
    pub entity_key: String,
    pub granularity: Granularity,
    pub bucket_start: DateTime<Utc>,
    /// Raw samples folded into this bucket (through any intermediate tier).
    pub sample_count: u32,
    pub fields: Vec<FieldAggregate>,
}

impl Aggregate {
    pub fn field(&self, name: &str) -> Option<&FieldSummary> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.summary)
    }
}
