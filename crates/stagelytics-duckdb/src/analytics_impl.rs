use async_trait::async_trait;

use stagelytics_core::analytics::{
    CampaignMetrics, ChartPoint, DateRange, FunnelMetrics, OverviewStats, PeriodComparison,
    RealtimeSnapshot, ScopeAnalytics, TopLocation, TrafficSource,
};

use crate::DuckDbBackend;

#[async_trait]
impl ScopeAnalytics for DuckDbBackend {
    async fn get_overview_stats(
        &self,
        scope_id: &str,
        range: &DateRange,
    ) -> anyhow::Result<OverviewStats> {
        DuckDbBackend::get_overview_stats(self, scope_id, range).await
    }

    async fn get_chart_data(
        &self,
        scope_id: &str,
        range: &DateRange,
    ) -> anyhow::Result<Vec<ChartPoint>> {
        DuckDbBackend::get_chart_data(self, scope_id, range).await
    }

    async fn get_funnel_metrics(
        &self,
        scope_id: &str,
        range: &DateRange,
    ) -> anyhow::Result<FunnelMetrics> {
        DuckDbBackend::get_funnel_metrics(self, scope_id, range).await
    }

    async fn get_traffic_sources(
        &self,
        scope_id: &str,
        range: &DateRange,
    ) -> anyhow::Result<Vec<TrafficSource>> {
        DuckDbBackend::get_traffic_sources(self, scope_id, range).await
    }

    async fn get_top_locations(
        &self,
        scope_id: &str,
        range: &DateRange,
        limit: i64,
    ) -> anyhow::Result<Vec<TopLocation>> {
        DuckDbBackend::get_top_locations(self, scope_id, range, limit).await
    }

    async fn get_period_comparison(
        &self,
        scope_id: &str,
        range: &DateRange,
    ) -> anyhow::Result<PeriodComparison> {
        DuckDbBackend::get_period_comparison(self, scope_id, range).await
    }

    async fn get_realtime_snapshot(&self, scope_id: &str) -> anyhow::Result<RealtimeSnapshot> {
        DuckDbBackend::get_realtime_snapshot(self, scope_id).await
    }

    async fn list_campaign_metrics(&self, scope_id: &str) -> anyhow::Result<Vec<CampaignMetrics>> {
        DuckDbBackend::list_campaign_metrics(self, scope_id).await
    }
}
