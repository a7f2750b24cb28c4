pub mod aggregator;
pub mod analytics_impl;
pub mod attribution;
pub mod backend;
pub mod queries;
pub mod rollup;
pub mod schema;
pub mod scope;
pub mod session;

pub use backend::DuckDbBackend;

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `stagelytics_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
