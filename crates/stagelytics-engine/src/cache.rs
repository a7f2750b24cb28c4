//! Memoized dashboard views.
//!
//! Two staleness disciplines coexist:
//! - **summary keys** (overview, chart, funnel, ...) are evicted explicitly
//!   by every write that changes a scope's counters, with a longer TTL as a
//!   backstop for missed invalidations;
//! - **realtime keys** are never invalidated explicitly and rely solely on
//!   a short fixed TTL.

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::Result;
use moka::{sync::Cache, Expiry};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Dashboard views that get a summary cache key per (scope, period).
const SUMMARY_VIEWS: &[&str] = &[
    "overview",
    "chart",
    "funnel",
    "traffic",
    "locations",
    "comparison",
    "campaigns",
];

const PERIODS: &[&str] = &["7d", "30d", "90d", "all"];

#[derive(Clone)]
struct CachedView {
    payload: serde_json::Value,
    ttl: Duration,
}

/// Per-entry TTL policy: each cached view carries its own lifetime.
struct PerEntryTtl;

impl Expiry<String, CachedView> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedView,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

pub struct ViewCache {
    views: Cache<String, CachedView>,
}

impl Default for ViewCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl ViewCache {
    pub fn new(max_entries: u64) -> Self {
        let views = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self { views }
    }

    pub fn summary_key(scope_id: &str, view: &str, period: &str) -> String {
        format!("scope:{scope_id}:{view}:{period}")
    }

    pub fn realtime_key(scope_id: &str) -> String {
        format!("scope:{scope_id}:realtime")
    }

    /// Cache-aside: a hit returns the stored payload without invoking
    /// `compute`; a miss invokes it and stores the result under `ttl`.
    pub async fn remember<T, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.views.get(key) {
            return Ok(serde_json::from_value(hit.payload)?);
        }
        let value = compute().await?;
        self.views.insert(
            key.to_string(),
            CachedView {
                payload: serde_json::to_value(&value)?,
                ttl,
            },
        );
        Ok(value)
    }

    /// Evict every summary key for a scope. Called on each write that
    /// changes the scope's counters (sale, refund, new attribution).
    /// Realtime keys are intentionally left to their fixed TTL.
    pub fn invalidate_scope(&self, scope_id: &str) {
        for view in SUMMARY_VIEWS {
            for period in PERIODS {
                self.views
                    .invalidate(&Self::summary_key(scope_id, view, period));
            }
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.views.invalidate(&key.to_string());
    }
}
