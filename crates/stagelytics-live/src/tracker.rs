use std::time::Duration;

use tracing::warn;

use stagelytics_core::analytics::{GeoPoint, LivePresence, LiveVisitor};
use stagelytics_core::config::Config;
use stagelytics_core::event::EventType;

use crate::store::PresenceStore;

/// Wraps a [`PresenceStore`] with the product TTL policy and the
/// degrade-to-zero failure discipline: a store error is logged and the
/// caller gets an empty result, never an `Err`.
pub struct PresenceTracker<S> {
    store: S,
    presence_ttl: Duration,
    activity_ttl: Duration,
    activity_cap: usize,
}

impl<S: PresenceStore> PresenceTracker<S> {
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            store,
            presence_ttl: config.presence_ttl(),
            activity_ttl: config.activity_ttl(),
            activity_cap: config.activity_cap,
        }
    }

    /// Record that a visitor is active on a scope right now.
    ///
    /// Refreshes the sliding presence TTL, stores the geo snapshot when one
    /// is available, and appends a formatted line to the activity feed.
    pub fn record_presence(
        &self,
        scope_id: &str,
        visitor_id: &str,
        geo: Option<&GeoPoint>,
        action: &str,
    ) {
        if let Err(err) = self
            .store
            .add_presence(scope_id, visitor_id, self.presence_ttl)
        {
            warn!(scope_id, %err, "presence store unavailable, dropping presence ping");
            return;
        }
        if let Some(geo) = geo {
            if let Err(err) = self.store.set_geo(scope_id, visitor_id, geo, self.presence_ttl) {
                warn!(scope_id, %err, "failed to store presence geo snapshot");
            }
        }
        let line = match geo.and_then(|g| g.city.as_deref()) {
            Some(city) => format!("{action} ({city})"),
            None => action.to_string(),
        };
        if let Err(err) =
            self.store
                .push_activity(scope_id, &line, self.activity_cap, self.activity_ttl)
        {
            warn!(scope_id, %err, "failed to append live activity");
        }
    }

    /// How many visitors are on the page right now. Best effort: 0 when the
    /// store is unavailable.
    pub fn live_count(&self, scope_id: &str) -> i64 {
        match self.store.presence_count(scope_id) {
            Ok(count) => count,
            Err(err) => {
                warn!(scope_id, %err, "presence store unavailable, reporting zero live visitors");
                0
            }
        }
    }

    /// Live visitors joined with their geo snapshots; visitors without a
    /// stored snapshot are omitted.
    pub fn live_visitors_with_geo(&self, scope_id: &str) -> Vec<LiveVisitor> {
        let ids = match self.store.live_visitor_ids(scope_id) {
            Ok(ids) => ids,
            Err(err) => {
                warn!(scope_id, %err, "presence store unavailable, reporting no live visitors");
                return Vec::new();
            }
        };
        ids.into_iter()
            .filter_map(|visitor_id| {
                self.store
                    .get_geo(scope_id, &visitor_id)
                    .ok()
                    .flatten()
                    .map(|geo| LiveVisitor { visitor_id, geo })
            })
            .collect()
    }

    /// The bounded recent-activity feed, newest first.
    pub fn recent_activity(&self, scope_id: &str) -> Vec<String> {
        match self.store.recent_activity(scope_id) {
            Ok(feed) => feed,
            Err(err) => {
                warn!(scope_id, %err, "presence store unavailable, reporting no activity");
                Vec::new()
            }
        }
    }

    /// Everything the live-visitors dashboard widget needs in one call.
    pub fn snapshot(&self, scope_id: &str) -> LivePresence {
        LivePresence {
            count: self.live_count(scope_id),
            visitors: self.live_visitors_with_geo(scope_id),
            activity: self.recent_activity(scope_id),
        }
    }
}

/// Human-readable activity line for an interaction.
pub fn format_action(
    event_type: &EventType,
    page_title: Option<&str>,
    quantity: Option<i64>,
) -> String {
    match event_type {
        EventType::PageView => format!("Viewing {}", page_title.unwrap_or("event page")),
        EventType::ViewItem => "Viewing pricing".to_string(),
        EventType::AddToCart => {
            format!("Added {}x tickets to cart", quantity.unwrap_or(1))
        }
        EventType::BeginCheckout => "Viewing checkout page".to_string(),
        EventType::Purchase => "Completed purchase".to_string(),
        EventType::Other(raw) => {
            let mut label = raw.replace('_', " ");
            if let Some(first) = label.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            label
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPresenceStore;
    use crate::testutil::FakeClock;
    use anyhow::{anyhow, Result};

    fn tracker_with_clock(clock: FakeClock) -> PresenceTracker<MemoryPresenceStore<FakeClock>> {
        PresenceTracker::new(MemoryPresenceStore::new(clock), &Config::default())
    }

    fn geo(city: &str) -> GeoPoint {
        GeoPoint {
            latitude: 44.43,
            longitude: 26.1,
            city: Some(city.into()),
            country_code: Some("RO".into()),
        }
    }

    #[test]
    fn unrefreshed_presence_is_gone_after_five_minutes() {
        let clock = FakeClock::new();
        let tracker = tracker_with_clock(clock.clone());
        tracker.record_presence("scope_1", "v1", Some(&geo("Cluj")), "Viewing event page");
        assert_eq!(tracker.live_count("scope_1"), 1);

        clock.advance(299);
        assert_eq!(tracker.live_count("scope_1"), 1);
        clock.advance(2);
        assert_eq!(tracker.live_count("scope_1"), 0);
    }

    #[test]
    fn visitors_without_geo_are_omitted_from_the_join() {
        let clock = FakeClock::new();
        let tracker = tracker_with_clock(clock);
        tracker.record_presence("scope_1", "with_geo", Some(&geo("Iasi")), "Viewing event page");
        tracker.record_presence("scope_1", "no_geo", None, "Viewing event page");

        assert_eq!(tracker.live_count("scope_1"), 2);
        let visitors = tracker.live_visitors_with_geo("scope_1");
        assert_eq!(visitors.len(), 1);
        assert_eq!(visitors[0].visitor_id, "with_geo");
    }

    #[test]
    fn activity_lines_carry_the_city() {
        let clock = FakeClock::new();
        let tracker = tracker_with_clock(clock);
        tracker.record_presence("scope_1", "v1", Some(&geo("Brasov")), "Completed purchase");
        tracker.record_presence("scope_1", "v2", None, "Viewing checkout page");

        let feed = tracker.recent_activity("scope_1");
        assert_eq!(feed, vec![
            "Viewing checkout page".to_string(),
            "Completed purchase (Brasov)".to_string(),
        ]);
    }

    #[test]
    fn action_formatting_matches_event_types() {
        assert_eq!(
            format_action(&EventType::PageView, Some("Electric Nights"), None),
            "Viewing Electric Nights"
        );
        assert_eq!(
            format_action(&EventType::AddToCart, None, Some(3)),
            "Added 3x tickets to cart"
        );
        assert_eq!(
            format_action(&EventType::Other("view_lineup".into()), None, None),
            "View lineup"
        );
    }

    /// A store that always fails, standing in for an unreachable backend.
    struct DownStore;

    impl PresenceStore for DownStore {
        fn add_presence(&self, _: &str, _: &str, _: Duration) -> Result<()> {
            Err(anyhow!("connection refused"))
        }
        fn presence_count(&self, _: &str) -> Result<i64> {
            Err(anyhow!("connection refused"))
        }
        fn live_visitor_ids(&self, _: &str) -> Result<Vec<String>> {
            Err(anyhow!("connection refused"))
        }
        fn set_geo(&self, _: &str, _: &str, _: &GeoPoint, _: Duration) -> Result<()> {
            Err(anyhow!("connection refused"))
        }
        fn get_geo(&self, _: &str, _: &str) -> Result<Option<GeoPoint>> {
            Err(anyhow!("connection refused"))
        }
        fn push_activity(&self, _: &str, _: &str, _: usize, _: Duration) -> Result<()> {
            Err(anyhow!("connection refused"))
        }
        fn recent_activity(&self, _: &str) -> Result<Vec<String>> {
            Err(anyhow!("connection refused"))
        }
    }

    #[test]
    fn store_outage_degrades_to_zero() {
        let tracker = PresenceTracker::new(DownStore, &Config::default());
        tracker.record_presence("scope_1", "v1", None, "Viewing event page");
        assert_eq!(tracker.live_count("scope_1"), 0);
        assert!(tracker.live_visitors_with_geo("scope_1").is_empty());
        assert!(tracker.recent_activity("scope_1").is_empty());
        let snapshot = tracker.snapshot("scope_1");
        assert_eq!(snapshot.count, 0);
    }
}
