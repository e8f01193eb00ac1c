// Error taxonomy for the store, rollup, sweeper and query engine.

/// Library error. No variant is fatal to the process: jobs log and retry on their next tick.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Rejected at ingest (unknown class, timestamp in the future).
    #[error("invalid sample: {0}")]
    InvalidSample(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// One bucket failed reduction; the pass skips it and continues.
    #[error("rollup of {metric_class}/{entity_key:?} bucket {bucket_start} failed: {reason}")]
    RollupPartialFailure {
        metric_class: String,
        entity_key: String,
        bucket_start: i64,
        reason: String,
    },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    /// A stored BLOB or enum column could not be decoded.
    #[error("corrupt stored value: {0}")]
    Codec(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
