use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use tracing::info;

use stagelytics_core::analytics::{
    BackfillReport, CampaignMetrics, ChartPoint, FunnelMetrics, GeoPoint, LivePresence,
    OverviewStats, Period, PeriodComparison, RealtimeSnapshot, TopLocation, TrafficSource,
};
use stagelytics_core::campaign::Campaign;
use stagelytics_core::config::Config;
use stagelytics_core::error::CoreError;
use stagelytics_core::event::{EventType, InteractionEvent, TrackPayload};
use stagelytics_core::order::Order;
use stagelytics_duckdb::aggregator::PageViewMeta;
use stagelytics_duckdb::DuckDbBackend;
use stagelytics_live::tracker::format_action;
use stagelytics_live::{PresenceStore, PresenceTracker};

use crate::cache::ViewCache;

/// The engine facade: one object wiring the durable store, the live
/// presence tracker and the view cache together. Aggregation and
/// attribution run synchronously inside the triggering call but never
/// abort it — their failure modes are log-and-continue.
pub struct Engine<S> {
    db: Arc<DuckDbBackend>,
    presence: PresenceTracker<S>,
    cache: ViewCache,
    config: Config,
}

impl<S: PresenceStore> Engine<S> {
    pub fn new(db: Arc<DuckDbBackend>, store: S, config: Config) -> Self {
        let presence = PresenceTracker::new(store, &config);
        Self {
            db,
            presence,
            cache: ViewCache::default(),
            config,
        }
    }

    pub fn db(&self) -> &Arc<DuckDbBackend> {
        &self.db
    }

    /// Ingest one validated, deduplicated interaction.
    ///
    /// Stores the raw event, feeds the hourly aggregator and the presence
    /// tracker, and — for purchases — runs attribution. Returns the stored
    /// event.
    pub async fn track(&self, payload: TrackPayload) -> Result<InteractionEvent> {
        if !self.db.scope_exists(&payload.scope_id).await? {
            return Err(CoreError::UnknownScope(payload.scope_id.clone()).into());
        }

        let occurred_at = payload.occurred_at.unwrap_or_else(Utc::now);
        let session = self
            .db
            .get_or_create_session(
                &payload.scope_id,
                &payload.visitor_id,
                self.config.session_window_minutes,
                occurred_at,
            )
            .await?;

        let event_type = EventType::parse(&payload.event_type);
        let geo = payload_geo(&payload);
        let event = InteractionEvent {
            id: uuid::Uuid::new_v4().to_string(),
            scope_id: payload.scope_id.clone(),
            tenant_id: None,
            session_id: session.session_id.clone(),
            visitor_id: payload.visitor_id.clone(),
            event_type: event_type.as_str().to_string(),
            occurred_at,
            value: payload.value,
            quantity: payload.quantity,
            order_id: payload.order_id.clone(),
            content_id: payload.content_id.clone(),
            page_title: payload.page_title.clone(),
            referrer: payload.referrer.clone(),
            utm_source: payload.utm_source.clone(),
            utm_medium: payload.utm_medium.clone(),
            utm_campaign: payload.utm_campaign.clone(),
            utm_term: payload.utm_term.clone(),
            utm_content: payload.utm_content.clone(),
            gclid: payload.gclid.clone(),
            fbclid: payload.fbclid.clone(),
            ttclid: payload.ttclid.clone(),
            device_type: payload.device_type.clone(),
            country_code: payload.country_code.clone(),
            region: payload.region.clone(),
            city: payload.city.clone(),
            latitude: payload.latitude,
            longitude: payload.longitude,
            attributed_campaign_id: None,
        };
        self.db.insert_events(std::slice::from_ref(&event)).await?;

        match &event_type {
            EventType::PageView => {
                let meta = PageViewMeta {
                    is_unique: session.is_new,
                    is_bounce: false,
                    source: Some(page_source(&payload)),
                    device_type: payload.device_type.clone(),
                    country_code: payload.country_code.clone(),
                };
                self.db
                    .record_page_view(&event.scope_id, &meta, occurred_at)
                    .await;
            }
            EventType::ViewItem => {
                self.db.record_ticket_view(&event.scope_id, occurred_at).await;
            }
            EventType::AddToCart => {
                self.db.record_add_to_cart(&event.scope_id, occurred_at).await;
            }
            // The checkouts_started counter is fed by the order-created
            // notification, not the client event, to avoid double counting.
            EventType::BeginCheckout => {}
            EventType::Purchase => {
                let attributed = self.db.attribute_purchase(&event.id, &self.config).await?;
                if let Some(campaign) = &attributed {
                    info!(event_id = %event.id, campaign_id = %campaign.id,
                        "purchase attributed");
                    self.cache.invalidate_scope(&event.scope_id);
                }
            }
            EventType::Other(raw) => {
                self.db
                    .record_engagement(&event.scope_id, raw, occurred_at)
                    .await;
            }
        }

        let action = format_action(&event_type, payload.page_title.as_deref(), payload.quantity);
        self.presence
            .record_presence(&event.scope_id, &event.visitor_id, geo.as_ref(), &action);

        Ok(event)
    }

    /// Order created = checkout started.
    pub async fn order_created(&self, order: &Order) -> Result<()> {
        self.db.upsert_order(order).await?;
        self.db
            .record_checkout_started(&order.scope_id, order.created_at)
            .await;
        Ok(())
    }

    /// Order paid/confirmed: aggregate the sale, attribute it, and evict
    /// the scope's summary views.
    pub async fn order_paid(&self, order: &Order) -> Result<Option<Campaign>> {
        self.db.upsert_order(order).await?;
        self.db.record_purchase(order, order.purchase_time()).await;
        let attributed = self.db.attribute_order(order, &self.config).await?;
        self.cache.invalidate_scope(&order.scope_id);
        Ok(attributed)
    }

    /// Order cancelled/refunded: the recorded counters stay as they are
    /// (no rollback semantics exist upstream); only the cache is evicted so
    /// dashboards re-read order state.
    pub async fn order_cancelled(&self, order: &Order) -> Result<()> {
        self.db.upsert_order(order).await?;
        self.cache.invalidate_scope(&order.scope_id);
        Ok(())
    }

    pub async fn overview(&self, scope_id: &str, period: Period) -> Result<OverviewStats> {
        let range = self.resolve_range(scope_id, period).await?;
        let key = ViewCache::summary_key(scope_id, "overview", period.as_str());
        self.cache
            .remember(&key, self.config.summary_cache_ttl(), || async {
                self.db.get_overview_stats(scope_id, &range).await
            })
            .await
    }

    pub async fn chart(&self, scope_id: &str, period: Period) -> Result<Vec<ChartPoint>> {
        let range = self.resolve_range(scope_id, period).await?;
        let key = ViewCache::summary_key(scope_id, "chart", period.as_str());
        self.cache
            .remember(&key, self.config.summary_cache_ttl(), || async {
                self.db.get_chart_data(scope_id, &range).await
            })
            .await
    }

    pub async fn funnel(&self, scope_id: &str, period: Period) -> Result<FunnelMetrics> {
        let range = self.resolve_range(scope_id, period).await?;
        let key = ViewCache::summary_key(scope_id, "funnel", period.as_str());
        self.cache
            .remember(&key, self.config.summary_cache_ttl(), || async {
                self.db.get_funnel_metrics(scope_id, &range).await
            })
            .await
    }

    pub async fn traffic_sources(
        &self,
        scope_id: &str,
        period: Period,
    ) -> Result<Vec<TrafficSource>> {
        let range = self.resolve_range(scope_id, period).await?;
        let key = ViewCache::summary_key(scope_id, "traffic", period.as_str());
        self.cache
            .remember(&key, self.config.summary_cache_ttl(), || async {
                self.db.get_traffic_sources(scope_id, &range).await
            })
            .await
    }

    pub async fn top_locations(
        &self,
        scope_id: &str,
        period: Period,
        limit: i64,
    ) -> Result<Vec<TopLocation>> {
        let range = self.resolve_range(scope_id, period).await?;
        let key = ViewCache::summary_key(scope_id, "locations", period.as_str());
        self.cache
            .remember(&key, self.config.summary_cache_ttl(), || async {
                self.db.get_top_locations(scope_id, &range, limit).await
            })
            .await
    }

    pub async fn period_comparison(
        &self,
        scope_id: &str,
        period: Period,
    ) -> Result<PeriodComparison> {
        let range = self.resolve_range(scope_id, period).await?;
        let key = ViewCache::summary_key(scope_id, "comparison", period.as_str());
        self.cache
            .remember(&key, self.config.summary_cache_ttl(), || async {
                self.db.get_period_comparison(scope_id, &range).await
            })
            .await
    }

    pub async fn campaigns(&self, scope_id: &str) -> Result<Vec<CampaignMetrics>> {
        // Campaign metrics change on every attribution, so they share the
        // summary invalidation class; the period component is fixed.
        let key = ViewCache::summary_key(scope_id, "campaigns", "all");
        self.cache
            .remember(&key, self.config.summary_cache_ttl(), || async {
                self.db.list_campaign_metrics(scope_id).await
            })
            .await
    }

    /// Realtime snapshot: cached under the fixed short TTL only, no
    /// explicit invalidation.
    pub async fn realtime(&self, scope_id: &str) -> Result<RealtimeSnapshot> {
        let key = ViewCache::realtime_key(scope_id);
        self.cache
            .remember(&key, self.config.realtime_cache_ttl(), || async {
                self.db.get_realtime_snapshot(scope_id).await
            })
            .await
    }

    /// The live-visitors widget reads the presence tracker directly — it is
    /// already an in-memory, seconds-fresh store.
    pub fn live_visitors(&self, scope_id: &str) -> LivePresence {
        self.presence.snapshot(scope_id)
    }

    /// Bounded, idempotent backfill over unattributed purchases.
    pub async fn backfill_attribution(&self, scope_id: &str, limit: i64) -> Result<BackfillReport> {
        let report = self
            .db
            .attribute_unattributed_purchases(scope_id, limit, &self.config)
            .await?;
        if report.attributed > 0 {
            self.cache.invalidate_scope(scope_id);
        }
        Ok(report)
    }

    /// Refresh one scope's daily rollup; invoked by the external scheduler.
    pub async fn run_daily_rollup(&self, scope_id: &str, date: NaiveDate) -> Result<()> {
        self.db.aggregate_daily(scope_id, date).await
    }

    async fn resolve_range(
        &self,
        scope_id: &str,
        period: Period,
    ) -> Result<stagelytics_core::analytics::DateRange> {
        let scope = self.db.get_scope(scope_id).await?;
        Ok(period.resolve(Utc::now(), scope.created_at))
    }
}

fn payload_geo(payload: &TrackPayload) -> Option<GeoPoint> {
    match (payload.latitude, payload.longitude) {
        (Some(latitude), Some(longitude)) => Some(GeoPoint {
            latitude,
            longitude,
            city: payload.city.clone(),
            country_code: payload.country_code.clone(),
        }),
        _ => None,
    }
}

/// Traffic-source label for the page-view dimension counter: click-id
/// platforms first, then the UTM source, then referral/direct.
fn page_source(payload: &TrackPayload) -> String {
    if payload.gclid.is_some() {
        return "google".to_string();
    }
    if payload.fbclid.is_some() {
        return "facebook".to_string();
    }
    if payload.ttclid.is_some() {
        return "tiktok".to_string();
    }
    if let Some(source) = &payload.utm_source {
        return source.to_lowercase();
    }
    if payload.referrer.as_deref().is_some_and(|r| !r.is_empty()) {
        return "referral".to_string();
    }
    "direct".to_string()
}
