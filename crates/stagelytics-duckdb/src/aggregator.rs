//! Hourly counter aggregation.
//!
//! Every increment is a single `INSERT ... ON CONFLICT DO UPDATE SET
//! col = col + excluded.col` statement — the storage layer's atomic
//! add-or-create primitive. Concurrent callers can interleave freely;
//! no read-modify-write cycle exists on either the scalar counters or the
//! categorical dimension counters.
//!
//! The `record_*` entry points are side-effect-tolerant: a failed write is
//! logged and swallowed so the business operation that triggered it (a page
//! load, a checkout) is never aborted by analytics.

use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use tracing::error;

use stagelytics_core::error::CoreError;
use stagelytics_core::order::Order;

use crate::backend::{ts_str, DuckDbBackend};

/// Scalar counter columns on `analytics_hourly`. Metric names are matched
/// against this list before being interpolated into SQL; anything else is
/// rejected with [`CoreError::UnknownMetric`].
const METRIC_COLUMNS: &[&str] = &[
    "page_views",
    "unique_visitors",
    "ticket_views",
    "add_to_carts",
    "checkouts_started",
    "purchases",
    "tickets_sold",
    "revenue_cents",
    "bounces",
    "lineup_views",
    "pricing_views",
    "faq_views",
    "gallery_views",
    "shares",
    "interests",
];

fn metric_column(metric: &str) -> Result<&'static str> {
    METRIC_COLUMNS
        .iter()
        .find(|col| **col == metric)
        .copied()
        .ok_or_else(|| CoreError::UnknownMetric(metric.to_string()).into())
}

/// Engagement event types and the metric column each one feeds.
fn engagement_metric(event_type: &str) -> Option<&'static str> {
    match event_type {
        "view_lineup" => Some("lineup_views"),
        "view_pricing" => Some("pricing_views"),
        "view_faq" => Some("faq_views"),
        "view_gallery" => Some("gallery_views"),
        "share" => Some("shares"),
        "event_interest" => Some("interests"),
        _ => None,
    }
}

/// Context the ingestion layer supplies with a page view.
#[derive(Debug, Clone, Default)]
pub struct PageViewMeta {
    /// True when this view opened a new session.
    pub is_unique: bool,
    pub is_bounce: bool,
    pub source: Option<String>,
    pub device_type: Option<String>,
    pub country_code: Option<String>,
}

impl DuckDbBackend {
    /// Atomically add `amount` to `metric` on the bucket row for
    /// (scope, date(occurred_at), hour(occurred_at)).
    pub async fn increment_metric(
        &self,
        scope_id: &str,
        metric: &str,
        amount: i64,
        occurred_at: DateTime<Utc>,
    ) -> Result<()> {
        let col = metric_column(metric)?;
        let date = occurred_at.date_naive().format("%Y-%m-%d").to_string();
        let hour = occurred_at.hour() as i64;
        let now = ts_str(occurred_at);

        let conn = self.conn.lock().await;
        // `col` comes from the whitelist above, never from the caller.
        let sql = format!(
            "INSERT INTO analytics_hourly (scope_id, date, hour, {col}, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5) \
             ON CONFLICT (scope_id, date, hour) DO UPDATE SET \
                 {col} = analytics_hourly.{col} + excluded.{col}, \
                 updated_at = excluded.updated_at"
        );
        conn.execute(&sql, duckdb::params![scope_id, date, hour, amount, now])?;
        Ok(())
    }

    /// Atomically add `amount` to a categorical counter key, e.g.
    /// (`"traffic_sources"`, `"facebook"`). One row per key; no map is ever
    /// read back and rewritten.
    pub async fn increment_dimension(
        &self,
        scope_id: &str,
        dimension: &str,
        key: &str,
        amount: i64,
        occurred_at: DateTime<Utc>,
    ) -> Result<()> {
        let date = occurred_at.date_naive().format("%Y-%m-%d").to_string();
        let hour = occurred_at.hour() as i64;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO hourly_dimensions (scope_id, date, hour, dimension, key, count) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT (scope_id, date, hour, dimension, key) DO UPDATE SET \
                 count = hourly_dimensions.count + excluded.count",
            duckdb::params![scope_id, date, hour, dimension, key, amount],
        )?;
        Ok(())
    }

    /// Record a page view and its categorical breakdowns.
    pub async fn record_page_view(
        &self,
        scope_id: &str,
        meta: &PageViewMeta,
        occurred_at: DateTime<Utc>,
    ) {
        if let Err(err) = self.try_record_page_view(scope_id, meta, occurred_at).await {
            error!(scope_id, %err, "failed to record page view aggregates");
        }
    }

    async fn try_record_page_view(
        &self,
        scope_id: &str,
        meta: &PageViewMeta,
        occurred_at: DateTime<Utc>,
    ) -> Result<()> {
        self.increment_metric(scope_id, "page_views", 1, occurred_at)
            .await?;
        if meta.is_unique {
            self.increment_metric(scope_id, "unique_visitors", 1, occurred_at)
                .await?;
        }
        if meta.is_bounce {
            self.increment_metric(scope_id, "bounces", 1, occurred_at)
                .await?;
        }
        if let Some(source) = &meta.source {
            self.increment_dimension(scope_id, "traffic_sources", source, 1, occurred_at)
                .await?;
        }
        if let Some(device) = &meta.device_type {
            self.increment_dimension(scope_id, "devices", device, 1, occurred_at)
                .await?;
        }
        if let Some(country) = &meta.country_code {
            self.increment_dimension(scope_id, "locations", country, 1, occurred_at)
                .await?;
        }
        Ok(())
    }

    pub async fn record_ticket_view(&self, scope_id: &str, occurred_at: DateTime<Utc>) {
        if let Err(err) = self
            .increment_metric(scope_id, "ticket_views", 1, occurred_at)
            .await
        {
            error!(scope_id, %err, "failed to record ticket view");
        }
    }

    pub async fn record_add_to_cart(&self, scope_id: &str, occurred_at: DateTime<Utc>) {
        if let Err(err) = self
            .increment_metric(scope_id, "add_to_carts", 1, occurred_at)
            .await
        {
            error!(scope_id, %err, "failed to record add-to-cart");
        }
    }

    /// Order created = checkout started.
    pub async fn record_checkout_started(&self, scope_id: &str, occurred_at: DateTime<Utc>) {
        if let Err(err) = self
            .increment_metric(scope_id, "checkouts_started", 1, occurred_at)
            .await
        {
            error!(scope_id, %err, "failed to record checkout start");
        }
    }

    /// Engagement events (lineup/pricing/faq/gallery views, shares,
    /// interest marks). Unknown types are ignored.
    pub async fn record_engagement(
        &self,
        scope_id: &str,
        event_type: &str,
        occurred_at: DateTime<Utc>,
    ) {
        let Some(metric) = engagement_metric(event_type) else {
            return;
        };
        if let Err(err) = self.increment_metric(scope_id, metric, 1, occurred_at).await {
            error!(scope_id, metric, %err, "failed to record engagement");
        }
    }

    /// Record a completed purchase: scalar counters plus the UTM-campaign,
    /// traffic-source and location purchase breakdowns.
    pub async fn record_purchase(&self, order: &Order, occurred_at: DateTime<Utc>) {
        if let Err(err) = self.try_record_purchase(order, occurred_at).await {
            error!(scope_id = %order.scope_id, order_id = %order.id, %err,
                "failed to record purchase aggregates");
        }
    }

    async fn try_record_purchase(&self, order: &Order, occurred_at: DateTime<Utc>) -> Result<()> {
        let scope_id = order.scope_id.as_str();
        let revenue_cents = (order.total * 100.0).round() as i64;

        self.increment_metric(scope_id, "purchases", 1, occurred_at)
            .await?;
        self.increment_metric(scope_id, "tickets_sold", order.ticket_count, occurred_at)
            .await?;
        self.increment_metric(scope_id, "revenue_cents", revenue_cents, occurred_at)
            .await?;

        if let Some(campaign) = &order.utm_campaign {
            self.increment_dimension(
                scope_id,
                "utm_campaigns",
                &format!("{campaign}_purchases"),
                1,
                occurred_at,
            )
            .await?;
            self.increment_dimension(
                scope_id,
                "utm_campaigns",
                &format!("{campaign}_revenue_cents"),
                revenue_cents,
                occurred_at,
            )
            .await?;
        }

        let source = purchase_traffic_source(order);
        self.increment_dimension(
            scope_id,
            "traffic_sources",
            &format!("{source}_purchases"),
            1,
            occurred_at,
        )
        .await?;

        if let Some(country) = &order.country_code {
            self.increment_dimension(
                scope_id,
                "locations",
                &format!("{country}_purchases"),
                1,
                occurred_at,
            )
            .await?;
        }
        Ok(())
    }
}

/// Classify the traffic source for a purchase: click-id platforms first,
/// then the UTM source, then direct.
fn purchase_traffic_source(order: &Order) -> String {
    if order.gclid.is_some() {
        return "google_ads".to_string();
    }
    if order.fbclid.is_some() {
        return "facebook_ads".to_string();
    }
    if order.ttclid.is_some() {
        return "tiktok_ads".to_string();
    }
    if let Some(source) = &order.utm_source {
        return source.to_lowercase();
    }
    "direct".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use stagelytics_core::order::OrderStatus;

    #[test]
    fn metric_whitelist_rejects_unknown_columns() {
        assert!(metric_column("page_views").is_ok());
        assert!(metric_column("revenue_cents").is_ok());
        assert!(metric_column("page_views; DROP TABLE events").is_err());
    }

    #[test]
    fn purchase_source_prefers_click_ids() {
        let mut order = Order {
            id: "ord_1".into(),
            scope_id: "scope_1".into(),
            tenant_id: None,
            status: OrderStatus::Paid,
            total: 100.0,
            ticket_count: 2,
            visitor_id: None,
            session_id: None,
            utm_source: Some("Newsletter".into()),
            utm_medium: None,
            utm_campaign: None,
            gclid: Some("g".into()),
            fbclid: None,
            ttclid: None,
            country_code: None,
            city: None,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
            paid_at: None,
        };
        assert_eq!(purchase_traffic_source(&order), "google_ads");
        order.gclid = None;
        assert_eq!(purchase_traffic_source(&order), "newsletter");
        order.utm_source = None;
        assert_eq!(purchase_traffic_source(&order), "direct");
    }

    #[test]
    fn engagement_mapping_covers_known_types() {
        assert_eq!(engagement_metric("view_lineup"), Some("lineup_views"));
        assert_eq!(engagement_metric("share"), Some("shares"));
        assert_eq!(engagement_metric("page_view"), None);
    }
}
