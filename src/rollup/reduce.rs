// Pure reduction: raw samples -> hourly aggregate, hourly aggregates -> daily aggregate.
// The field kind (from the class schema, or inferred for undeclared fields) picks the rule:
// gauges keep count-weighted mean and max, flags keep true/total counts, status keeps the
// most recent observation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{
    Aggregate, FieldAggregate, FieldKind, FieldSummary, FieldValue, Granularity, MetricClass,
    MetricSample,
};

/// Summary of a single observation. Errors when the value does not fit `kind`.
pub fn summarize(kind: FieldKind, value: &FieldValue, at: i64) -> Result<FieldSummary, String> {
    match (kind, value) {
        (FieldKind::Gauge, FieldValue::Number(n)) if n.is_finite() => Ok(FieldSummary::Gauge {
            mean: *n,
            max: *n,
            count: 1,
        }),
        (FieldKind::Gauge, FieldValue::Number(n)) => Err(format!("non-finite gauge value {n}")),
        (FieldKind::Flag, FieldValue::Flag(b)) => Ok(FieldSummary::Flag {
            true_count: u32::from(*b),
            count: 1,
        }),
        (FieldKind::Status, FieldValue::Text(s)) => Ok(FieldSummary::Status {
            value: s.clone(),
            observed_at: at,
        }),
        (kind, value) => Err(format!("{value:?} is not a {kind:?} value")),
    }
}

/// Merges two summaries of the same field. `b` is the later one on status ties.
pub fn combine(a: FieldSummary, b: FieldSummary) -> Result<FieldSummary, String> {
    match (a, b) {
        (
            FieldSummary::Gauge {
                mean: mean_a,
                max: max_a,
                count: count_a,
            },
            FieldSummary::Gauge {
                mean: mean_b,
                max: max_b,
                count: count_b,
            },
        ) => {
            let count = count_a + count_b;
            let mean = if count == 0 {
                0.0
            } else {
                (mean_a * count_a as f64 + mean_b * count_b as f64) / count as f64
            };
            Ok(FieldSummary::Gauge {
                mean,
                max: max_a.max(max_b),
                count,
            })
        }
        (
            FieldSummary::Flag {
                true_count: t_a,
                count: c_a,
            },
            FieldSummary::Flag {
                true_count: t_b,
                count: c_b,
            },
        ) => Ok(FieldSummary::Flag {
            true_count: t_a + t_b,
            count: c_a + c_b,
        }),
        (
            a @ FieldSummary::Status {
                observed_at: at_a, ..
            },
            b @ FieldSummary::Status {
                observed_at: at_b, ..
            },
        ) => Ok(if at_a > at_b { a } else { b }),
        (a, b) => Err(format!("cannot combine {a:?} with {b:?}")),
    }
}

/// Checks a stored summary against the field's declared kind.
fn check_kind(kind: FieldKind, summary: &FieldSummary) -> Result<(), String> {
    let matches = matches!(
        (kind, summary),
        (FieldKind::Gauge, FieldSummary::Gauge { .. })
            | (FieldKind::Flag, FieldSummary::Flag { .. })
            | (FieldKind::Status, FieldSummary::Status { .. })
    );
    if matches {
        Ok(())
    } else {
        Err(format!("{summary:?} is not a {kind:?} summary"))
    }
}

/// Accumulates per-field summaries for one bucket.
#[derive(Debug, Default)]
struct BucketAccumulator {
    fields: BTreeMap<String, FieldSummary>,
}

impl BucketAccumulator {
    fn add(&mut self, name: &str, summary: FieldSummary) -> Result<(), String> {
        let merged = match self.fields.remove(name) {
            Some(prev) => combine(prev, summary).map_err(|e| format!("field {name}: {e}"))?,
            None => summary,
        };
        self.fields.insert(name.to_string(), merged);
        Ok(())
    }

    fn into_fields(self) -> Vec<FieldAggregate> {
        self.fields
            .into_iter()
            .map(|(name, summary)| FieldAggregate { name, summary })
            .collect()
    }
}

fn partial_failure(
    metric_class: MetricClass,
    entity_key: &str,
    bucket_start: DateTime<Utc>,
    reason: String,
) -> Error {
    Error::RollupPartialFailure {
        metric_class: metric_class.to_string(),
        entity_key: entity_key.to_string(),
        bucket_start: bucket_start.timestamp(),
        reason,
    }
}

/// Reduces raw samples of one hour bucket. None when the bucket is empty.
pub fn reduce_samples(
    metric_class: MetricClass,
    entity_key: &str,
    bucket_start: DateTime<Utc>,
    samples: &[MetricSample],
) -> Result<Option<Aggregate>> {
    if samples.is_empty() {
        return Ok(None);
    }

    let mut acc = BucketAccumulator::default();
    for sample in samples {
        let at = sample.timestamp.timestamp();
        for (name, value) in &sample.fields {
            let kind = metric_class
                .field_kind(name)
                .unwrap_or_else(|| FieldKind::infer(value));
            summarize(kind, value, at)
                .map_err(|e| format!("field {name}: {e}"))
                .and_then(|summary| acc.add(name, summary))
                .map_err(|reason| {
                    partial_failure(metric_class, entity_key, bucket_start, reason)
                })?;
        }
    }

    Ok(Some(Aggregate {
        metric_class,
        entity_key: entity_key.to_string(),
        granularity: Granularity::Hourly,
        bucket_start,
        sample_count: samples.len() as u32,
        fields: acc.into_fields(),
    }))
}

/// Folds finer aggregates into one coarser bucket using count-weighted means.
pub fn fold_aggregates(
    metric_class: MetricClass,
    entity_key: &str,
    granularity: Granularity,
    bucket_start: DateTime<Utc>,
    aggregates: &[Aggregate],
) -> Result<Option<Aggregate>> {
    if aggregates.is_empty() {
        return Ok(None);
    }

    let mut acc = BucketAccumulator::default();
    let mut sample_count: u32 = 0;
    for agg in aggregates {
        sample_count += agg.sample_count;
        for field in &agg.fields {
            let checked = match metric_class.field_kind(&field.name) {
                Some(kind) => check_kind(kind, &field.summary),
                None => Ok(()),
            };
            checked
                .and_then(|()| acc.add(&field.name, field.summary.clone()))
                .map_err(|reason| {
                    partial_failure(metric_class, entity_key, bucket_start, reason)
                })?;
        }
    }

    Ok(Some(Aggregate {
        metric_class,
        entity_key: entity_key.to_string(),
        granularity,
        bucket_start,
        sample_count,
        fields: acc.into_fields(),
    }))
}

/// Merges a fresh reduction into the aggregate already stored for the same bucket.
/// An empty reduction leaves nothing to write.
pub fn merge_stored(
    stored: Option<Aggregate>,
    fresh: Option<Aggregate>,
) -> Result<Option<Aggregate>> {
    match (stored, fresh) {
        (Some(stored), Some(fresh)) => {
            let metric_class = fresh.metric_class;
            let entity_key = fresh.entity_key.clone();
            let granularity = fresh.granularity;
            let bucket_start = fresh.bucket_start;
            fold_aggregates(
                metric_class,
                &entity_key,
                granularity,
                bucket_start,
                &[stored, fresh],
            )
        }
        (_, fresh) => Ok(fresh),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_gauge_weights_by_count() {
        let a = FieldSummary::Gauge {
            mean: 10.0,
            max: 12.0,
            count: 3,
        };
        let b = FieldSummary::Gauge {
            mean: 30.0,
            max: 40.0,
            count: 1,
        };
        assert_eq!(
            combine(a, b).unwrap(),
            FieldSummary::Gauge {
                mean: 15.0,
                max: 40.0,
                count: 4
            }
        );
    }

    #[test]
    fn combine_status_keeps_latest_observation() {
        let latest = FieldSummary::Status {
            value: "online".into(),
            observed_at: 200,
        };
        let earlier = FieldSummary::Status {
            value: "offline".into(),
            observed_at: 100,
        };
        // argument order does not matter; observed_at decides
        assert_eq!(combine(latest.clone(), earlier).unwrap(), latest);
    }

    #[test]
    fn combine_rejects_mixed_kinds() {
        let gauge = FieldSummary::Gauge {
            mean: 1.0,
            max: 1.0,
            count: 1,
        };
        let flag = FieldSummary::Flag {
            true_count: 1,
            count: 1,
        };
        assert!(combine(gauge, flag).is_err());
    }

    #[test]
    fn summarize_rejects_nan_gauge() {
        assert!(summarize(FieldKind::Gauge, &FieldValue::Number(f64::NAN), 0).is_err());
    }
}
