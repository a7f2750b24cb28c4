use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::event::AdPlatform;

/// Marketing touchpoint kinds. Ad types carry a click-id platform; email and
/// organic types are matched by UTM parameters or heuristics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    GoogleAds,
    FacebookAds,
    TiktokAds,
    Email,
    Organic,
    Announcement,
    PriceChange,
}

impl CampaignType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "google_ads" => Some(Self::GoogleAds),
            "facebook_ads" => Some(Self::FacebookAds),
            "tiktok_ads" => Some(Self::TiktokAds),
            "email" => Some(Self::Email),
            "organic" => Some(Self::Organic),
            "announcement" => Some(Self::Announcement),
            "price_change" => Some(Self::PriceChange),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GoogleAds => "google_ads",
            Self::FacebookAds => "facebook_ads",
            Self::TiktokAds => "tiktok_ads",
            Self::Email => "email",
            Self::Organic => "organic",
            Self::Announcement => "announcement",
            Self::PriceChange => "price_change",
        }
    }

    /// The click-id platform this campaign type corresponds to, if any.
    pub fn ad_platform(&self) -> Option<AdPlatform> {
        match self {
            Self::GoogleAds => Some(AdPlatform::Google),
            Self::FacebookAds => Some(AdPlatform::Facebook),
            Self::TiktokAds => Some(AdPlatform::Tiktok),
            _ => None,
        }
    }

    pub fn is_ad_campaign(&self) -> bool {
        self.ad_platform().is_some()
    }

    /// Display metadata for dashboard rendering.
    pub fn display(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            Self::GoogleAds => ("Google Ads", "🔍", "#ea4335"),
            Self::FacebookAds => ("Facebook Ads", "📘", "#1877f2"),
            Self::TiktokAds => ("TikTok Ads", "🎵", "#000000"),
            Self::Email => ("Email", "📧", "#f59e0b"),
            Self::Organic => ("Organic", "🌱", "#22c55e"),
            Self::Announcement => ("Announcement", "📣", "#8b5cf6"),
            Self::PriceChange => ("Price Change", "🏷️", "#6b7280"),
        }
    }
}

/// A marketing campaign with matching rules and wholesale-recomputed
/// derived metrics. Created and edited externally; only the derived-metric
/// fields are written back by the attribution resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub scope_id: String,
    pub campaign_type: CampaignType,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Exact-match UTM filters. `None` means the rule does not apply.
    pub utm_source: Option<String>,
    pub utm_campaign: Option<String>,
    pub budget: Option<f64>,
    pub currency: String,
    pub conversions: i64,
    pub attributed_revenue: f64,
    pub cac: Option<f64>,
    pub roi: Option<f64>,
    pub roas: Option<f64>,
    pub baseline_value: Option<f64>,
    pub post_value: Option<f64>,
    pub impact_metric: Option<String>,
    pub is_active: bool,
    pub created_at: chrono::DateTime<Utc>,
    pub metrics_updated_at: Option<chrono::DateTime<Utc>>,
}

impl Campaign {
    pub fn matches_utm_campaign(&self, name: &str) -> bool {
        self.utm_campaign.as_deref() == Some(name)
    }

    pub fn matches_utm_source(&self, source: &str) -> bool {
        self.utm_source.as_deref() == Some(source)
    }

    pub fn matches_click_platform(&self, platform: AdPlatform) -> bool {
        self.campaign_type.ad_platform() == Some(platform)
    }

    pub fn has_budget(&self) -> bool {
        self.budget.map(|b| b > 0.0).unwrap_or(false)
    }

    /// Whether a purchase dated `date` can still be credited to this
    /// campaign: inside `[start_date, end_date]`, or when no end date is
    /// set, inside the type-dependent default window after the start.
    pub fn is_within_attribution_window(&self, date: NaiveDate, config: &Config) -> bool {
        if date < self.start_date {
            return false;
        }
        let window_end = self.end_date.unwrap_or_else(|| {
            self.start_date
                + chrono::Duration::days(config.attribution_window_days(&self.campaign_type))
        });
        date <= window_end
    }

    /// ROI percentage against the budget: (revenue − budget) / budget × 100.
    pub fn calculate_roi(&self) -> Option<f64> {
        let budget = self.budget.filter(|b| *b > 0.0)?;
        Some(round2((self.attributed_revenue - budget) / budget * 100.0))
    }

    /// ROAS ratio: revenue / budget.
    pub fn calculate_roas(&self) -> Option<f64> {
        let budget = self.budget.filter(|b| *b > 0.0)?;
        Some(round2(self.attributed_revenue / budget))
    }
}

/// Round to two decimal places, the precision every derived metric is
/// reported at.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn campaign(campaign_type: CampaignType) -> Campaign {
        Campaign {
            id: "cmp_1".into(),
            scope_id: "scope_1".into(),
            campaign_type,
            title: "Spring push".into(),
            start_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            end_date: None,
            utm_source: Some("facebook".into()),
            utm_campaign: Some("spring_sale".into()),
            budget: Some(500.0),
            currency: "EUR".into(),
            conversions: 0,
            attributed_revenue: 0.0,
            cac: None,
            roi: None,
            roas: None,
            baseline_value: None,
            post_value: None,
            impact_metric: None,
            is_active: true,
            created_at: Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap(),
            metrics_updated_at: None,
        }
    }

    #[test]
    fn window_uses_default_when_open_ended() {
        let cfg = Config::default();
        let c = campaign(CampaignType::FacebookAds);
        let inside = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let outside = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert!(c.is_within_attribution_window(inside, &cfg));
        assert!(!c.is_within_attribution_window(outside, &cfg));
    }

    #[test]
    fn window_respects_explicit_end_date() {
        let cfg = Config::default();
        let mut c = campaign(CampaignType::Email);
        c.end_date = NaiveDate::from_ymd_opt(2026, 3, 20);
        let late = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
        let too_late = NaiveDate::from_ymd_opt(2026, 3, 21).unwrap();
        assert!(c.is_within_attribution_window(late, &cfg));
        assert!(!c.is_within_attribution_window(too_late, &cfg));
    }

    #[test]
    fn before_start_never_matches() {
        let cfg = Config::default();
        let c = campaign(CampaignType::Organic);
        let before = NaiveDate::from_ymd_opt(2026, 2, 28).unwrap();
        assert!(!c.is_within_attribution_window(before, &cfg));
    }

    #[test]
    fn roi_and_roas_need_a_budget() {
        let mut c = campaign(CampaignType::GoogleAds);
        c.attributed_revenue = 1500.0;
        assert_eq!(c.calculate_roi(), Some(200.0));
        assert_eq!(c.calculate_roas(), Some(3.0));
        c.budget = None;
        assert_eq!(c.calculate_roi(), None);
        assert_eq!(c.calculate_roas(), None);
    }

    #[test]
    fn click_platform_match_is_type_based() {
        let c = campaign(CampaignType::FacebookAds);
        assert!(c.matches_click_platform(AdPlatform::Facebook));
        assert!(!c.matches_click_platform(AdPlatform::Google));
        let email = campaign(CampaignType::Email);
        assert!(!email.matches_click_platform(AdPlatform::Facebook));
    }
}
