use anyhow::Result;

use stagelytics_core::analytics::CampaignMetrics;
use stagelytics_core::campaign::Campaign;

use crate::backend::DuckDbBackend;

fn to_metrics(campaign: Campaign) -> CampaignMetrics {
    let (label, icon, color) = campaign.campaign_type.display();
    CampaignMetrics {
        id: campaign.id,
        campaign_type: campaign.campaign_type.as_str().to_string(),
        label: label.to_string(),
        icon: icon.to_string(),
        color: color.to_string(),
        title: campaign.title,
        start_date: campaign.start_date.format("%Y-%m-%d").to_string(),
        end_date: campaign.end_date.map(|d| d.format("%Y-%m-%d").to_string()),
        budget: campaign.budget,
        currency: campaign.currency,
        conversions: campaign.conversions,
        attributed_revenue: campaign.attributed_revenue,
        cac: campaign.cac,
        roi: campaign.roi,
        roas: campaign.roas,
        impact: campaign.impact_metric,
        is_active: campaign.is_active,
    }
}

impl DuckDbBackend {
    /// All campaigns for a scope with derived metrics and display metadata,
    /// newest start first — the dashboard campaign timeline.
    pub async fn list_campaign_metrics(&self, scope_id: &str) -> Result<Vec<CampaignMetrics>> {
        // Validates the scope id up front; unknown scopes are a hard error.
        self.get_scope(scope_id).await?;
        let campaigns = self.list_campaigns(scope_id).await?;
        Ok(campaigns.into_iter().map(to_metrics).collect())
    }
}
