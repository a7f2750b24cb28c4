//! Dashboard query layer.
//!
//! Every view has two arms — `RollupSource::Aggregated` reads pre-computed
//! bucket rows, `RollupSource::Derived` derives the same shape from raw
//! interaction/order rows. The arm is picked per call from the scope's
//! `rollups_enabled` capability flag, so callers and the cache layer stay
//! path-agnostic.

pub mod campaigns;
pub mod chart;
pub mod comparison;
pub mod funnel;
pub mod locations;
pub mod overview;
pub mod realtime;
pub mod traffic;
