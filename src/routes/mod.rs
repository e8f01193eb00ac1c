// HTTP routes: ingest, range query, purge preview, version

mod http;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

use crate::models::{MetricSample, QueryBucket, RetentionPolicies};
use crate::query::RangeQueryEngine;
use crate::query::cache::QueryCache;
use crate::store::SampleStore;

pub type QueryResultCache = QueryCache<Arc<Vec<QueryBucket>>>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<SampleStore>,
    pub(crate) engine: Arc<RangeQueryEngine>,
    pub(crate) cache: Arc<QueryResultCache>,
    pub(crate) write_tx: mpsc::Sender<MetricSample>,
    pub(crate) policies: RetentionPolicies,
}

pub fn app(
    store: Arc<SampleStore>,
    cache: Arc<QueryResultCache>,
    write_tx: mpsc::Sender<MetricSample>,
    policies: RetentionPolicies,
) -> Router {
    let engine = Arc::new(RangeQueryEngine::new(store.clone(), policies));
    let state = AppState {
        store,
        engine,
        cache,
        write_tx,
        policies,
    };
    Router::new()
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/samples", post(http::ingest_handler)) // POST /api/samples
        .route("/api/query", get(http::query_handler)) // GET /api/query
        .route("/api/purge-preview", get(http::purge_preview_handler)) // GET /api/purge-preview
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
