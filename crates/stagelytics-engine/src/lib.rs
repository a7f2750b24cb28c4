//! Wiring layer: routes ingestion and order-lifecycle signals into
//! aggregation, attribution, presence and cache invalidation, and serves
//! dashboard views through the cache.

pub mod cache;
pub mod engine;

pub use cache::ViewCache;
pub use engine::Engine;
