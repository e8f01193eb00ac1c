// Library for the binary and integration tests

pub mod backfill;
pub mod config;
pub mod error;
pub mod maintenance_worker;
pub mod models;
pub mod query;
pub mod retention;
pub mod rollup;
pub mod routes;
pub mod store;
pub mod writer;

pub use error::{Error, Result};
