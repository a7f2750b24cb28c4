use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use stagelytics_core::analytics::GeoPoint;
use stagelytics_core::clock::Clock;

/// The ephemeral-store contract the presence tracker needs: TTL-refreshing
/// set membership, keyed GET/SET with TTL, and a bounded recent-activity
/// list. No durability is required — or wanted.
pub trait PresenceStore: Send + Sync + 'static {
    /// Add `visitor_id` to the scope's presence set, refreshing its TTL.
    fn add_presence(&self, scope_id: &str, visitor_id: &str, ttl: Duration) -> Result<()>;

    /// Cardinality of the presence set, counting only unexpired members.
    fn presence_count(&self, scope_id: &str) -> Result<i64>;

    /// Unexpired members of the presence set.
    fn live_visitor_ids(&self, scope_id: &str) -> Result<Vec<String>>;

    /// Store a visitor's geo snapshot under its own TTL.
    fn set_geo(&self, scope_id: &str, visitor_id: &str, geo: &GeoPoint, ttl: Duration)
        -> Result<()>;

    fn get_geo(&self, scope_id: &str, visitor_id: &str) -> Result<Option<GeoPoint>>;

    /// Append to the bounded activity feed, evicting the oldest entry past
    /// `cap` and refreshing the feed's TTL.
    fn push_activity(&self, scope_id: &str, line: &str, cap: usize, ttl: Duration) -> Result<()>;

    /// Unexpired activity lines, newest first.
    fn recent_activity(&self, scope_id: &str) -> Result<Vec<String>>;
}

struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct ScopeState {
    presence: HashMap<String, DateTime<Utc>>,
    geo: HashMap<String, Expiring<GeoPoint>>,
    activity: VecDeque<Expiring<String>>,
}

/// In-memory presence store.
///
/// Expiry timestamps are checked on every read, so the store is
/// self-cleaning with no sweeper task; writes also prune the scope they
/// touch to keep the maps from accumulating dead visitors.
pub struct MemoryPresenceStore<C: Clock> {
    clock: C,
    scopes: RwLock<HashMap<String, ScopeState>>,
}

impl<C: Clock> MemoryPresenceStore<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            scopes: RwLock::new(HashMap::new()),
        }
    }

    fn prune(state: &mut ScopeState, now: DateTime<Utc>) {
        state.presence.retain(|_, expires_at| *expires_at > now);
        state.geo.retain(|_, entry| entry.expires_at > now);
        state.activity.retain(|entry| entry.expires_at > now);
    }
}

fn lock_poisoned() -> anyhow::Error {
    anyhow!("presence store lock poisoned")
}

impl<C: Clock> PresenceStore for MemoryPresenceStore<C> {
    fn add_presence(&self, scope_id: &str, visitor_id: &str, ttl: Duration) -> Result<()> {
        let now = self.clock.now();
        let mut scopes = self.scopes.write().map_err(|_| lock_poisoned())?;
        let state = scopes.entry(scope_id.to_string()).or_default();
        Self::prune(state, now);
        state
            .presence
            .insert(visitor_id.to_string(), now + ttl);
        Ok(())
    }

    fn presence_count(&self, scope_id: &str) -> Result<i64> {
        let now = self.clock.now();
        let scopes = self.scopes.read().map_err(|_| lock_poisoned())?;
        Ok(scopes
            .get(scope_id)
            .map(|state| {
                state
                    .presence
                    .values()
                    .filter(|expires_at| **expires_at > now)
                    .count() as i64
            })
            .unwrap_or(0))
    }

    fn live_visitor_ids(&self, scope_id: &str) -> Result<Vec<String>> {
        let now = self.clock.now();
        let scopes = self.scopes.read().map_err(|_| lock_poisoned())?;
        Ok(scopes
            .get(scope_id)
            .map(|state| {
                state
                    .presence
                    .iter()
                    .filter(|(_, expires_at)| **expires_at > now)
                    .map(|(visitor_id, _)| visitor_id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn set_geo(
        &self,
        scope_id: &str,
        visitor_id: &str,
        geo: &GeoPoint,
        ttl: Duration,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut scopes = self.scopes.write().map_err(|_| lock_poisoned())?;
        let state = scopes.entry(scope_id.to_string()).or_default();
        state.geo.insert(
            visitor_id.to_string(),
            Expiring {
                value: geo.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    fn get_geo(&self, scope_id: &str, visitor_id: &str) -> Result<Option<GeoPoint>> {
        let now = self.clock.now();
        let scopes = self.scopes.read().map_err(|_| lock_poisoned())?;
        Ok(scopes.get(scope_id).and_then(|state| {
            state
                .geo
                .get(visitor_id)
                .filter(|entry| entry.expires_at > now)
                .map(|entry| entry.value.clone())
        }))
    }

    fn push_activity(&self, scope_id: &str, line: &str, cap: usize, ttl: Duration) -> Result<()> {
        let now = self.clock.now();
        let mut scopes = self.scopes.write().map_err(|_| lock_poisoned())?;
        let state = scopes.entry(scope_id.to_string()).or_default();
        Self::prune(state, now);
        state.activity.push_front(Expiring {
            value: line.to_string(),
            expires_at: now + ttl,
        });
        state.activity.truncate(cap);
        Ok(())
    }

    fn recent_activity(&self, scope_id: &str) -> Result<Vec<String>> {
        let now = self.clock.now();
        let scopes = self.scopes.read().map_err(|_| lock_poisoned())?;
        Ok(scopes
            .get(scope_id)
            .map(|state| {
                state
                    .activity
                    .iter()
                    .filter(|entry| entry.expires_at > now)
                    .map(|entry| entry.value.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
