//! Dashboard query contracts and result shapes.
//!
//! Both rollup-backed and raw-derived query paths must produce these exact
//! shapes so callers and the cache layer never know which path ran.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub use crate::campaign::round2;

/// Inclusive date range a dashboard query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// The immediately preceding window of equal length.
    pub fn previous(&self) -> DateRange {
        let end = self.start - chrono::Duration::days(1);
        let start = end - chrono::Duration::days(self.days() - 1);
        DateRange { start, end }
    }
}

/// Relative dashboard periods offered by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Last7Days,
    #[default]
    Last30Days,
    Last90Days,
    All,
}

impl Period {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "7d" => Ok(Self::Last7Days),
            "30d" => Ok(Self::Last30Days),
            "90d" => Ok(Self::Last90Days),
            "all" => Ok(Self::All),
            _ => Err(anyhow!("period must be one of: 7d, 30d, 90d, all")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Last7Days => "7d",
            Self::Last30Days => "30d",
            Self::Last90Days => "90d",
            Self::All => "all",
        }
    }

    /// Resolve to a concrete range, never starting before the scope existed.
    pub fn resolve(&self, now: DateTime<Utc>, scope_created: DateTime<Utc>) -> DateRange {
        let end = now.date_naive();
        let start = match self {
            Self::Last7Days => end - chrono::Duration::days(7),
            Self::Last30Days => end - chrono::Duration::days(30),
            Self::Last90Days => end - chrono::Duration::days(90),
            Self::All => scope_created.date_naive(),
        };
        let floor = scope_created.date_naive();
        DateRange {
            start: start.max(floor).min(end),
            end,
        }
    }
}

/// Which arm of the dual-path query layer serves a request.
///
/// Selected once per call from the scope's capability flag; both arms return
/// identical result shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupSource {
    /// Pre-aggregated bucket rows.
    Aggregated,
    /// On-demand derivation from raw interaction/order rows.
    Derived,
}

impl RollupSource {
    pub fn for_scope(rollups_enabled: bool) -> Self {
        if rollups_enabled {
            Self::Aggregated
        } else {
            Self::Derived
        }
    }
}

/// A scope row — the marketing-measurable unit analytics are partitioned by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub id: String,
    pub tenant_id: Option<String>,
    pub name: String,
    pub status: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub capacity: i64,
    pub revenue_target: Option<f64>,
    /// Capability flag: scopes without rollups always take the derived path.
    pub rollups_enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueOverview {
    pub total: f64,
    pub target: f64,
    /// Period-over-period change vs the preceding equal-length window, %.
    pub change_pct: f64,
    pub progress_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketOverview {
    pub sold: i64,
    pub capacity: i64,
    pub today: i64,
    pub progress_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitOverview {
    pub total: i64,
    pub unique: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOverview {
    pub rate: f64,
    pub purchases: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeCountdown {
    pub days_until: i64,
    pub status: String,
    pub starts_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverviewStats {
    pub revenue: RevenueOverview,
    pub tickets: TicketOverview,
    pub visits: VisitOverview,
    pub conversion: ConversionOverview,
    pub countdown: ScopeCountdown,
}

/// One calendar day on the performance chart. Days without data are present
/// with zero values — the series never has gaps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartPoint {
    pub date: String,
    pub revenue: f64,
    pub tickets: i64,
    pub visits: i64,
    pub unique_visitors: i64,
    pub purchases: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelMetrics {
    pub page_views: i64,
    pub unique_visitors: i64,
    pub add_to_cart: i64,
    pub checkout_started: i64,
    pub purchases: i64,
    pub view_to_cart_rate: f64,
    pub cart_to_checkout_rate: f64,
    pub checkout_to_purchase_rate: f64,
    pub overall_conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficSource {
    pub name: String,
    pub icon: String,
    pub color: String,
    pub visitors: i64,
    pub percent: f64,
    pub conversions: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopLocation {
    pub city: String,
    pub country_code: String,
    pub flag: String,
    pub purchases: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeriodTotals {
    pub revenue: f64,
    pub visitors: i64,
    pub purchases: i64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodChanges {
    pub revenue_pct: f64,
    pub visitors_pct: f64,
    pub purchases_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodComparison {
    pub current: PeriodTotals,
    pub previous: PeriodTotals,
    pub changes: PeriodChanges,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HourTotals {
    pub page_views: i64,
    pub unique_visitors: i64,
    pub purchases: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WindowTotals {
    pub page_views: i64,
    pub unique_visitors: i64,
    pub purchases: i64,
    pub tickets_sold: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourPoint {
    /// "HH:00" label.
    pub hour: String,
    pub page_views: i64,
    pub purchases: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSnapshot {
    pub current_hour: HourTotals,
    pub today: WindowTotals,
    pub last_24h: WindowTotals,
    pub hourly_chart: Vec<HourPoint>,
}

/// Campaign row with derived metrics and display metadata, dashboard-ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignMetrics {
    pub id: String,
    pub campaign_type: String,
    pub label: String,
    pub icon: String,
    pub color: String,
    pub title: String,
    pub start_date: String,
    pub end_date: Option<String>,
    pub budget: Option<f64>,
    pub currency: String,
    pub conversions: i64,
    pub attributed_revenue: f64,
    pub cac: Option<f64>,
    pub roi: Option<f64>,
    pub roas: Option<f64>,
    pub impact: Option<String>,
    pub is_active: bool,
}

/// Per-item outcome counts for bounded batch jobs.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BackfillReport {
    pub examined: i64,
    pub attributed: i64,
    pub failed: i64,
}

/// Geo snapshot attached to a live presence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub city: Option<String>,
    pub country_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveVisitor {
    pub visitor_id: String,
    pub geo: GeoPoint,
}

#[derive(Debug, Clone, Serialize)]
pub struct LivePresence {
    pub count: i64,
    pub visitors: Vec<LiveVisitor>,
    pub activity: Vec<String>,
}

/// Percentage change with a zero-baseline guard: 0 when `previous` is 0.
pub fn pct_change(current: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        round2((current - previous) / previous * 100.0)
    } else {
        0.0
    }
}

/// `numerator / denominator × 100` rounded to 2 decimals, 0 when the
/// denominator is 0.
pub fn rate_pct(numerator: i64, denominator: i64) -> f64 {
    if denominator > 0 {
        round2(numerator as f64 / denominator as f64 * 100.0)
    } else {
        0.0
    }
}

/// The narrow contract the query layer exposes to dashboards and exports.
#[async_trait::async_trait]
pub trait ScopeAnalytics: Send + Sync + 'static {
    async fn get_overview_stats(&self, scope_id: &str, range: &DateRange)
        -> Result<OverviewStats>;

    async fn get_chart_data(&self, scope_id: &str, range: &DateRange) -> Result<Vec<ChartPoint>>;

    async fn get_funnel_metrics(&self, scope_id: &str, range: &DateRange)
        -> Result<FunnelMetrics>;

    async fn get_traffic_sources(
        &self,
        scope_id: &str,
        range: &DateRange,
    ) -> Result<Vec<TrafficSource>>;

    async fn get_top_locations(
        &self,
        scope_id: &str,
        range: &DateRange,
        limit: i64,
    ) -> Result<Vec<TopLocation>>;

    async fn get_period_comparison(
        &self,
        scope_id: &str,
        range: &DateRange,
    ) -> Result<PeriodComparison>;

    async fn get_realtime_snapshot(&self, scope_id: &str) -> Result<RealtimeSnapshot>;

    async fn list_campaign_metrics(&self, scope_id: &str) -> Result<Vec<CampaignMetrics>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn previous_window_is_adjacent_and_equal_length() {
        let range = DateRange {
            start: NaiveDate::from_ymd_opt(2026, 5, 11).unwrap(),
            end: NaiveDate::from_ymd_opt(2026, 5, 20).unwrap(),
        };
        let prev = range.previous();
        assert_eq!(prev.days(), 10);
        assert_eq!(prev.end, NaiveDate::from_ymd_opt(2026, 5, 10).unwrap());
        assert_eq!(prev.start, NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());
    }

    #[test]
    fn period_resolution_clamps_to_scope_creation() {
        let now = Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap();
        let created = Utc.with_ymd_and_hms(2026, 6, 10, 9, 0, 0).unwrap();
        let range = Period::Last30Days.resolve(now, created);
        assert_eq!(range.start, created.date_naive());
        assert_eq!(range.end, now.date_naive());
    }

    #[test]
    fn pct_change_guards_zero_baseline() {
        assert_eq!(pct_change(100.0, 0.0), 0.0);
        assert_eq!(pct_change(150.0, 100.0), 50.0);
        assert_eq!(pct_change(50.0, 100.0), -50.0);
    }

    #[test]
    fn rate_pct_guards_zero_denominator() {
        assert_eq!(rate_pct(4, 80), 5.0);
        assert_eq!(rate_pct(10, 80), 12.5);
        assert_eq!(rate_pct(1, 0), 0.0);
    }
}
