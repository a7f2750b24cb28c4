//! Time-windowed last-touch attribution.
//!
//! A purchase is credited to at most one campaign, chosen by walking the
//! scope's active campaigns in strict priority order:
//!
//! 1. exact UTM campaign name match
//! 2. ad click-id present and the campaign type matches that platform
//! 3. exact UTM source match
//! 4. email medium matches any active email campaign
//!
//! Every candidate is additionally gated by the campaign's attribution
//! window. The winning link is written with a conditional set-if-null
//! update, so re-running attribution on an already-attributed purchase is a
//! no-op and metrics are never double-counted.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use stagelytics_core::analytics::{pct_change, BackfillReport};
use stagelytics_core::campaign::{round2, Campaign, CampaignType};
use stagelytics_core::config::Config;
use stagelytics_core::event::{AdPlatform, InteractionEvent};
use stagelytics_core::order::Order;

use crate::backend::{map_event_row, DuckDbBackend, EVENT_COLUMNS_SQL};

/// The marketing fields one purchase carries, extracted from either an
/// interaction event or an order snapshot.
#[derive(Debug, Clone, Default)]
pub struct Touch {
    pub utm_campaign: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub click_platform: Option<AdPlatform>,
}

impl Touch {
    pub fn from_event(event: &InteractionEvent) -> Self {
        Self {
            utm_campaign: event.utm_campaign.clone(),
            utm_source: event.utm_source.clone(),
            utm_medium: event.utm_medium.clone(),
            click_platform: event.click_id_platform(),
        }
    }

    pub fn from_order(order: &Order) -> Self {
        Self {
            utm_campaign: order.utm_campaign.clone(),
            utm_source: order.utm_source.clone(),
            utm_medium: order.utm_medium.clone(),
            click_platform: order.click_id_platform(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.utm_campaign.is_none()
            && self.utm_source.is_none()
            && self.utm_medium.is_none()
            && self.click_platform.is_none()
    }
}

/// Walk `campaigns` in priority order and return the first in-window match.
/// Matching is exact within each tier, so ties are not expected.
pub fn select_campaign<'a>(
    touch: &Touch,
    campaigns: &'a [Campaign],
    purchase_date: NaiveDate,
    config: &Config,
) -> Option<&'a Campaign> {
    let in_window =
        |c: &Campaign| c.is_within_attribution_window(purchase_date, config);

    if let Some(name) = &touch.utm_campaign {
        if let Some(hit) = campaigns
            .iter()
            .find(|c| c.matches_utm_campaign(name) && in_window(c))
        {
            return Some(hit);
        }
    }

    if let Some(platform) = touch.click_platform {
        if let Some(hit) = campaigns
            .iter()
            .find(|c| c.matches_click_platform(platform) && in_window(c))
        {
            return Some(hit);
        }
    }

    if let Some(source) = &touch.utm_source {
        if let Some(hit) = campaigns
            .iter()
            .find(|c| c.matches_utm_source(source) && in_window(c))
        {
            return Some(hit);
        }
    }

    if touch.utm_medium.as_deref() == Some("email") {
        if let Some(hit) = campaigns
            .iter()
            .find(|c| c.campaign_type == CampaignType::Email && in_window(c))
        {
            return Some(hit);
        }
    }

    None
}

/// Baseline/post metrics for the non-ad impact comparison.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PeriodMetrics {
    pub visitors: i64,
    pub sales: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpactChanges {
    pub traffic_pct: f64,
    pub sales_pct: f64,
    pub revenue_pct: f64,
}

/// Outcome of a campaign impact calculation. Ad campaigns report their
/// attributed conversion economics; everything else gets the
/// baseline-vs-post window comparison.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CampaignImpact {
    AdCampaign {
        conversions: i64,
        attributed_revenue: f64,
        budget: Option<f64>,
        cac: Option<f64>,
        roi: Option<f64>,
        roas: Option<f64>,
    },
    Comparison {
        baseline: PeriodMetrics,
        post: PeriodMetrics,
        changes: ImpactChanges,
        impact_metric: String,
    },
}

/// Headline impact string: the metric with the largest relative change.
/// Tie-break order is traffic, then sales, then revenue (inherited
/// behavior, kept as-is).
fn impact_headline(changes: &ImpactChanges) -> String {
    let t = changes.traffic_pct.abs();
    let s = changes.sales_pct.abs();
    let r = changes.revenue_pct.abs();
    if t >= s && t >= r {
        format!("{:+.0}% traffic", changes.traffic_pct)
    } else if s >= r {
        format!("{:+.0} sales", changes.sales_pct)
    } else {
        format!("{:+.0}% revenue", changes.revenue_pct)
    }
}

impl DuckDbBackend {
    /// Load one interaction event by id.
    pub async fn get_event(&self, event_id: &str) -> Result<Option<InteractionEvent>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {EVENT_COLUMNS_SQL} FROM events WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let row = stmt.query_row(duckdb::params![event_id], map_event_row).ok();
        row.map(|r| r.into_event()).transpose()
    }

    /// Attribute a purchase event to the best-matching active campaign.
    ///
    /// Returns the linked campaign, or `None` when the event is not a
    /// purchase or nothing matched. Calling this again on an
    /// already-attributed event returns the existing link without touching
    /// metrics.
    pub async fn attribute_purchase(
        &self,
        event_id: &str,
        config: &Config,
    ) -> Result<Option<Campaign>> {
        let Some(event) = self.get_event(event_id).await? else {
            return Ok(None);
        };
        if !event.is_purchase() {
            return Ok(None);
        }

        // Already attributed: idempotent no-op.
        if let Some(existing) = &event.attributed_campaign_id {
            return self.get_campaign(existing).await;
        }

        let campaigns = self.list_active_campaigns(&event.scope_id).await?;
        if campaigns.is_empty() {
            return Ok(None);
        }

        let touch = Touch::from_event(&event);
        let purchase_date = event.occurred_at.date_naive();
        let Some(campaign) = select_campaign(&touch, &campaigns, purchase_date, config) else {
            return Ok(None);
        };
        let campaign_id = campaign.id.clone();

        let updated = {
            let conn = self.conn.lock().await;
            conn.execute(
                "UPDATE events SET attributed_campaign_id = ?1 \
                 WHERE id = ?2 AND attributed_campaign_id IS NULL",
                duckdb::params![campaign_id, event_id],
            )?
        };
        if updated == 0 {
            // A concurrent caller won the set-if-null race; their link and
            // metric recompute stand.
            let refreshed = self.get_event(event_id).await?;
            if let Some(id) = refreshed.and_then(|e| e.attributed_campaign_id) {
                return self.get_campaign(&id).await;
            }
            return Ok(None);
        }

        self.recompute_campaign_metrics(&campaign_id, config).await?;
        self.get_campaign(&campaign_id).await
    }

    /// Attribute a paid order. Uses the order's own marketing snapshot,
    /// falling back to the visitor's most recent tagged page view when the
    /// snapshot is empty.
    pub async fn attribute_order(
        &self,
        order: &Order,
        config: &Config,
    ) -> Result<Option<Campaign>> {
        let already: Option<String> = {
            let conn = self.conn.lock().await;
            conn.prepare("SELECT attributed_campaign_id FROM orders WHERE id = ?1")?
                .query_row(duckdb::params![order.id], |row| row.get(0))
                .ok()
                .flatten()
        };
        if let Some(existing) = already {
            return self.get_campaign(&existing).await;
        }

        let campaigns = self.list_active_campaigns(&order.scope_id).await?;
        if campaigns.is_empty() {
            return Ok(None);
        }

        let mut touch = Touch::from_order(order);
        if touch.is_empty() {
            if let Some(fallback) = self.latest_tagged_touch(&order.scope_id, order).await? {
                touch = fallback;
            }
        }

        let purchase_date = order.purchase_time().date_naive();
        let Some(campaign) = select_campaign(&touch, &campaigns, purchase_date, config) else {
            return Ok(None);
        };
        let campaign_id = campaign.id.clone();

        let updated = {
            let conn = self.conn.lock().await;
            conn.execute(
                "UPDATE orders SET attributed_campaign_id = ?1 \
                 WHERE id = ?2 AND attributed_campaign_id IS NULL",
                duckdb::params![campaign_id, order.id],
            )?
        };
        if updated == 0 {
            return self.get_campaign(&campaign_id).await;
        }

        self.recompute_campaign_metrics(&campaign_id, config).await?;
        self.get_campaign(&campaign_id).await
    }

    /// The visitor's most recent page view carrying any marketing tag.
    async fn latest_tagged_touch(&self, scope_id: &str, order: &Order) -> Result<Option<Touch>> {
        let Some(visitor_id) = &order.visitor_id else {
            return Ok(None);
        };
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {EVENT_COLUMNS_SQL} FROM events \
             WHERE scope_id = ?1 AND visitor_id = ?2 AND event_type = 'page_view' \
               AND (utm_campaign IS NOT NULL OR utm_source IS NOT NULL \
                    OR gclid IS NOT NULL OR fbclid IS NOT NULL OR ttclid IS NOT NULL) \
             ORDER BY occurred_at DESC LIMIT 1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let row = stmt
            .query_row(duckdb::params![scope_id, visitor_id], map_event_row)
            .ok();
        Ok(row
            .map(|r| r.into_event())
            .transpose()?
            .map(|e| Touch::from_event(&e)))
    }

    /// Recompute a campaign's derived metrics wholesale.
    ///
    /// Conversions and revenue are counted from both attributed purchase
    /// events and attributed settled orders; the larger of each pair wins so
    /// double-tracked purchases are not counted twice.
    pub async fn recompute_campaign_metrics(
        &self,
        campaign_id: &str,
        _config: &Config,
    ) -> Result<()> {
        let (event_conversions, event_revenue, order_conversions, order_revenue) = {
            let conn = self.conn.lock().await;
            let (ec, er): (i64, f64) = conn
                .prepare(
                    "SELECT COUNT(*), COALESCE(SUM(value), 0) FROM events \
                     WHERE attributed_campaign_id = ?1 AND event_type = 'purchase'",
                )?
                .query_row(duckdb::params![campaign_id], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?;
            let (oc, orv): (i64, f64) = conn
                .prepare(
                    "SELECT COUNT(*), COALESCE(SUM(total), 0) FROM orders \
                     WHERE attributed_campaign_id = ?1 \
                       AND status IN ('paid', 'confirmed', 'completed')",
                )?
                .query_row(duckdb::params![campaign_id], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?;
            (ec, er, oc, orv)
        };

        let conversions = event_conversions.max(order_conversions);
        let attributed_revenue = event_revenue.max(order_revenue);

        let Some(campaign) = self.get_campaign(campaign_id).await? else {
            warn!(campaign_id, "recompute requested for unknown campaign");
            return Ok(());
        };

        let (cac, roi, roas) = if campaign.has_budget() {
            let budget = campaign.budget.unwrap_or_default();
            let cac = if conversions > 0 {
                Some(round2(budget / conversions as f64))
            } else {
                None
            };
            let refreshed = Campaign {
                conversions,
                attributed_revenue,
                ..campaign
            };
            (cac, refreshed.calculate_roi(), refreshed.calculate_roas())
        } else {
            (None, None, None)
        };

        self.write_campaign_metrics(
            campaign_id,
            conversions,
            attributed_revenue,
            cac,
            roi,
            roas,
            Utc::now(),
        )
        .await
    }

    /// Impact report for a campaign: derived economics for ad campaigns,
    /// baseline-vs-post comparison for everything else.
    pub async fn campaign_impact(
        &self,
        campaign_id: &str,
        config: &Config,
    ) -> Result<Option<CampaignImpact>> {
        let Some(campaign) = self.get_campaign(campaign_id).await? else {
            return Ok(None);
        };

        if campaign.campaign_type.is_ad_campaign() {
            self.recompute_campaign_metrics(campaign_id, config).await?;
            let Some(refreshed) = self.get_campaign(campaign_id).await? else {
                return Ok(None);
            };
            return Ok(Some(CampaignImpact::AdCampaign {
                conversions: refreshed.conversions,
                attributed_revenue: refreshed.attributed_revenue,
                budget: refreshed.budget,
                cac: refreshed.cac,
                roi: refreshed.roi,
                roas: refreshed.roas,
            }));
        }

        let start = campaign.start_date;
        let baseline = self
            .period_metrics(
                &campaign.scope_id,
                start - chrono::Duration::days(7),
                start - chrono::Duration::days(1),
            )
            .await?;
        let post = self
            .period_metrics(&campaign.scope_id, start, start + chrono::Duration::days(7))
            .await?;

        let changes = ImpactChanges {
            traffic_pct: pct_change(post.visitors as f64, baseline.visitors as f64),
            sales_pct: pct_change(post.sales as f64, baseline.sales as f64),
            revenue_pct: pct_change(post.revenue, baseline.revenue),
        };
        let headline = impact_headline(&changes);

        self.write_campaign_impact(
            campaign_id,
            baseline.revenue,
            post.revenue,
            &headline,
            Utc::now(),
        )
        .await?;

        Ok(Some(CampaignImpact::Comparison {
            baseline,
            post,
            changes,
            impact_metric: headline,
        }))
    }

    /// Visitors / settled sales / revenue for an inclusive date window.
    pub(crate) async fn period_metrics(
        &self,
        scope_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PeriodMetrics> {
        let start_str = start.format("%Y-%m-%d").to_string();
        let end_next = (end + chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();

        let conn = self.conn.lock().await;
        let visitors: i64 = conn
            .prepare(
                "SELECT COUNT(DISTINCT visitor_id) FROM events \
                 WHERE scope_id = ?1 AND event_type = 'page_view' \
                   AND occurred_at >= ?2 AND occurred_at < ?3",
            )?
            .query_row(duckdb::params![scope_id, start_str, end_next], |row| {
                row.get(0)
            })?;
        let (sales, revenue): (i64, f64) = conn
            .prepare(
                "SELECT COUNT(*), COALESCE(SUM(total), 0) FROM orders \
                 WHERE scope_id = ?1 AND status IN ('paid', 'confirmed', 'completed') \
                   AND paid_at >= ?2 AND paid_at < ?3",
            )?
            .query_row(duckdb::params![scope_id, start_str, end_next], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;

        Ok(PeriodMetrics {
            visitors,
            sales,
            revenue,
        })
    }

    /// Bounded backfill sweep over unattributed purchases.
    ///
    /// Idempotent: already-attributed rows are filtered out by the query, so
    /// repeated invocations converge. Per-item failures are counted, never
    /// fatal.
    pub async fn attribute_unattributed_purchases(
        &self,
        scope_id: &str,
        limit: i64,
        config: &Config,
    ) -> Result<BackfillReport> {
        let ids: Vec<String> = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(
                "SELECT id FROM events \
                 WHERE scope_id = ?1 AND event_type = 'purchase' \
                   AND attributed_campaign_id IS NULL \
                 ORDER BY occurred_at LIMIT ?2",
            )?;
            let rows = stmt.query_map(duckdb::params![scope_id, limit], |row| row.get(0))?;
            rows.collect::<duckdb::Result<Vec<String>>>()?
        };

        let mut report = BackfillReport {
            examined: ids.len() as i64,
            ..Default::default()
        };
        for id in &ids {
            match self.attribute_purchase(id, config).await {
                Ok(Some(_)) => report.attributed += 1,
                Ok(None) => {}
                Err(err) => {
                    warn!(event_id = %id, %err, "backfill attribution failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            scope_id,
            examined = report.examined,
            attributed = report.attributed,
            failed = report.failed,
            "attribution backfill pass complete"
        );
        Ok(report)
    }

    /// Ad campaigns with budgets, sorted by ROI descending — the campaign
    /// performance comparison table.
    pub async fn campaign_comparison(&self, scope_id: &str) -> Result<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> = self
            .list_campaigns(scope_id)
            .await?
            .into_iter()
            .filter(|c| c.campaign_type.is_ad_campaign() && c.has_budget())
            .collect();
        campaigns.sort_by(|a, b| {
            b.roi
                .unwrap_or(f64::MIN)
                .partial_cmp(&a.roi.unwrap_or(f64::MIN))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(campaigns)
    }

    /// Total budget across ad campaigns.
    pub async fn total_ad_spend(&self, scope_id: &str) -> Result<f64> {
        Ok(self
            .campaign_comparison(scope_id)
            .await?
            .iter()
            .filter_map(|c| c.budget)
            .sum())
    }

    /// Blended ROI across all budgeted ad campaigns, `None` without spend.
    pub async fn blended_roi(&self, scope_id: &str) -> Result<Option<f64>> {
        let campaigns = self.campaign_comparison(scope_id).await?;
        let spend: f64 = campaigns.iter().filter_map(|c| c.budget).sum();
        if spend <= 0.0 {
            return Ok(None);
        }
        let revenue: f64 = campaigns.iter().map(|c| c.attributed_revenue).sum();
        Ok(Some(round2((revenue - spend) / spend * 100.0)))
    }
}
