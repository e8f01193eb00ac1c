// Range query engine: dense bucket series over [window_start, window_end) for one field.
// Buckets are aligned to multiples of the bucket size since the epoch, so hourly buckets
// start on the hour and daily buckets at UTC midnight. The covered range is split at
// UTC-aligned tier boundaries (daily | hourly | raw). Each segment reads its own tier plus
// any finer rows not yet compacted there; every stored row lives in exactly one tier and is
// read by the one segment holding its start, so the stitch never double counts. A coarse row
// contributes to every bucket its period overlaps.

pub mod cache;

use std::ops::Range;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::models::{
    BucketValue, FieldKind, FieldSummary, Granularity, QueryBucket, QueryRequest,
    RetentionPolicies, RetentionPolicy, SECS_PER_DAY,
};
use crate::rollup::reduce::{combine, summarize};
use crate::store::{SampleStore, ts_to_utc};

/// Upper bound on buckets per query; keeps a single request's scan and response bounded.
pub const MAX_BUCKETS: i64 = 10_000;

/// Widest accepted bucket: one leap year.
pub const MAX_BUCKET_SECS: i64 = 366 * SECS_PER_DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Raw,
    Hourly,
    Daily,
}

impl Tier {
    /// This tier and every finer one, coarsest first.
    fn sources(&self) -> &'static [Tier] {
        match self {
            Tier::Daily => &[Tier::Daily, Tier::Hourly, Tier::Raw],
            Tier::Hourly => &[Tier::Hourly, Tier::Raw],
            Tier::Raw => &[Tier::Raw],
        }
    }
}

/// A contiguous part of the query window served from one tier. Bounds are unix seconds, [from, to).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub tier: Tier,
    pub from: i64,
    pub to: i64,
}

/// Splits [start, end) at floor_day(now - hourly_days) and floor_hour(now - raw_days).
/// Empty segments are dropped, oldest segment first.
pub fn plan_segments(
    policy: &RetentionPolicy,
    start: i64,
    end: i64,
    now: DateTime<Utc>,
) -> Vec<Segment> {
    let raw_floor = Granularity::Hourly.truncate(policy.raw_cutoff(now).timestamp());
    let daily_floor = Granularity::Daily
        .truncate(policy.hourly_cutoff(now).timestamp())
        .min(raw_floor);

    [
        Segment {
            tier: Tier::Daily,
            from: start,
            to: end.min(daily_floor),
        },
        Segment {
            tier: Tier::Hourly,
            from: start.max(daily_floor),
            to: end.min(raw_floor),
        },
        Segment {
            tier: Tier::Raw,
            from: start.max(raw_floor),
            to: end,
        },
    ]
    .into_iter()
    .filter(|s| s.from < s.to)
    .collect()
}

/// Fixed-width buckets; `start` is a multiple of `size`.
#[derive(Debug, Clone, Copy)]
struct BucketLayout {
    start: i64,
    size: i64,
    count: usize,
}

impl BucketLayout {
    fn end(&self) -> i64 {
        self.start + self.count as i64 * self.size
    }

    fn index(&self, ts: i64) -> Option<usize> {
        if ts < self.start {
            return None;
        }
        let i = ((ts - self.start) / self.size) as usize;
        (i < self.count).then_some(i)
    }

    /// Indexes of the buckets overlapping [from, to).
    fn overlapping(&self, from: i64, to: i64) -> Range<usize> {
        let from = from.max(self.start);
        let to = to.min(self.end());
        if to <= from {
            return 0..0;
        }
        let first = (from - self.start) / self.size;
        let last = (to - self.start + self.size - 1) / self.size;
        first as usize..last as usize
    }

    fn bucket_start(&self, i: usize) -> i64 {
        self.start + i as i64 * self.size
    }
}

pub struct RangeQueryEngine {
    store: Arc<SampleStore>,
    policies: RetentionPolicies,
}

impl RangeQueryEngine {
    pub fn new(store: Arc<SampleStore>, policies: RetentionPolicies) -> Self {
        Self { store, policies }
    }

    /// Dense series of UTC-aligned buckets: the first holds `window_start`, the last ends at
    /// or after `window_end`. The one holding `now` (start < now <= start + size) is flagged
    /// incomplete.
    #[instrument(skip(self, req), fields(operation = "query", class = %req.metric_class, field = %req.field))]
    pub async fn query(&self, req: &QueryRequest, now: DateTime<Utc>) -> Result<Vec<QueryBucket>> {
        let (kind, layout) = validate(req)?;
        let class = req.metric_class;

        let entity_keys = if req.entity_keys.is_empty() {
            self.store.entity_keys(class).await?
        } else {
            let mut keys = req.entity_keys.clone();
            keys.sort();
            keys.dedup();
            keys
        };

        let mut slots: Vec<Option<FieldSummary>> = vec![None; layout.count];
        let segments = plan_segments(
            self.policies.for_class(class),
            layout.start,
            layout.end(),
            now,
        );

        for segment in &segments {
            for entity_key in &entity_keys {
                for tier in segment.tier.sources() {
                    self.read_tier(*tier, req, kind, entity_key, segment, &layout, &mut slots)
                        .await?;
                }
            }
        }

        let now_ts = now.timestamp();
        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                let start = layout.bucket_start(i);
                Ok(QueryBucket {
                    bucket_start: ts_to_utc(start)?,
                    value: slot.map_or_else(|| BucketValue::empty(kind), BucketValue::from),
                    is_incomplete: start < now_ts && now_ts <= start + layout.size,
                })
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn read_tier(
        &self,
        tier: Tier,
        req: &QueryRequest,
        kind: FieldKind,
        entity_key: &str,
        segment: &Segment,
        layout: &BucketLayout,
        slots: &mut [Option<FieldSummary>],
    ) -> Result<()> {
        let class = req.metric_class;
        match tier {
            Tier::Raw => {
                let mut samples = self.store.scan(
                    class,
                    entity_key,
                    ts_to_utc(segment.from)?,
                    ts_to_utc(segment.to)?,
                );
                while let Some(sample) = samples.try_next().await? {
                    let Some(value) = sample.fields.get(&req.field) else {
                        continue;
                    };
                    let ts = sample.timestamp.timestamp();
                    match summarize(kind, value, ts) {
                        Ok(summary) => merge_into(slots, layout.index(ts), summary),
                        Err(e) => debug!(error = %e, entity_key, ts, "raw value skipped"),
                    }
                }
            }
            Tier::Hourly | Tier::Daily => {
                let granularity = if tier == Tier::Hourly {
                    Granularity::Hourly
                } else {
                    Granularity::Daily
                };
                let period = granularity.seconds();
                let aggregates = self
                    .store
                    .aggregates_overlapping(class, entity_key, granularity, segment.from, segment.to)
                    .await?;
                for agg in aggregates {
                    let Some(summary) = agg.field(&req.field) else {
                        continue;
                    };
                    let from = agg.bucket_start.timestamp();
                    for i in layout.overlapping(from, from + period) {
                        merge_into(slots, Some(i), summary.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

fn validate(req: &QueryRequest) -> Result<(FieldKind, BucketLayout)> {
    let kind = req.metric_class.field_kind(&req.field).ok_or_else(|| {
        Error::InvalidQuery(format!(
            "{} has no field {:?}",
            req.metric_class, req.field
        ))
    })?;

    let start = req.window_start.timestamp();
    let end = req.window_end.timestamp();
    let size = req.bucket_size.num_seconds();
    if end <= start {
        return Err(Error::InvalidQuery(format!(
            "window end {} is not after start {}",
            req.window_end, req.window_start
        )));
    }
    if !(1..=MAX_BUCKET_SECS).contains(&size) {
        return Err(Error::InvalidQuery(format!(
            "bucket size must be between 1 and {MAX_BUCKET_SECS} seconds, got {size}"
        )));
    }
    let start = start.div_euclid(size) * size;
    let count = (end - start + size - 1) / size;
    if count > MAX_BUCKETS {
        return Err(Error::InvalidQuery(format!(
            "{count} buckets requested, limit is {MAX_BUCKETS}"
        )));
    }

    Ok((
        kind,
        BucketLayout {
            start,
            size,
            count: count as usize,
        },
    ))
}

fn merge_into(slots: &mut [Option<FieldSummary>], index: Option<usize>, summary: FieldSummary) {
    let Some(slot) = index.and_then(|i| slots.get_mut(i)) else {
        return;
    };
    *slot = match slot.take() {
        None => Some(summary),
        Some(prev) => match combine(prev.clone(), summary) {
            Ok(merged) => Some(merged),
            Err(e) => {
                debug!(error = %e, "mismatched summary skipped");
                Some(prev)
            }
        },
    };
}
