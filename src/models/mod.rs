// Domain models: samples, aggregates, retention policies, query types

mod aggregate;
mod query;
mod retention;
mod sample;

pub use aggregate::{
    Aggregate, FieldAggregate, FieldSummary, Granularity, SECS_PER_DAY, SECS_PER_HOUR,
};
pub use query::{BucketValue, QueryBucket, QueryFingerprint, QueryRequest};
pub use retention::{
    DailyRetention, Forever, MAX_RETENTION_DAYS, RetentionPolicies, RetentionPolicy,
};
pub(crate) use sample::FieldEntry;
pub use sample::{FieldKind, FieldSpec, FieldValue, MetricClass, MetricSample};
