use std::time::Duration;

use crate::campaign::CampaignType;

/// Engine configuration, read from `STAGELYTICS_*` environment variables
/// with defaults that match production behavior.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    /// DuckDB size string, e.g. "1GB" or "512MB".
    pub duckdb_memory_limit: String,
    /// Sliding TTL for the live-presence set, seconds.
    pub presence_ttl_secs: u64,
    /// TTL for the recent-activity feed, seconds.
    pub activity_ttl_secs: u64,
    /// Maximum entries kept in the recent-activity feed.
    pub activity_cap: usize,
    /// Fixed TTL backstop for "realtime" cache keys, seconds.
    pub realtime_cache_ttl_secs: u64,
    /// TTL for summary dashboard cache keys, seconds. These are also
    /// evicted explicitly on every write that changes a scope's counters.
    pub summary_cache_ttl_secs: u64,
    /// Attribution window for ad campaigns without an end date, days.
    pub ad_attribution_window_days: i64,
    /// Attribution window for email campaigns without an end date, days.
    pub email_attribution_window_days: i64,
    /// Attribution window for organic/announcement campaigns, days.
    pub organic_attribution_window_days: i64,
    /// Session inactivity cutoff, minutes.
    pub session_window_minutes: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            duckdb_memory_limit: "1GB".to_string(),
            presence_ttl_secs: 300,
            activity_ttl_secs: 600,
            activity_cap: 20,
            realtime_cache_ttl_secs: 60,
            summary_cache_ttl_secs: 300,
            ad_attribution_window_days: 7,
            email_attribution_window_days: 3,
            organic_attribution_window_days: 7,
            session_window_minutes: 30,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("STAGELYTICS_DATA_DIR").unwrap_or(defaults.data_dir),
            duckdb_memory_limit: std::env::var("STAGELYTICS_DUCKDB_MEMORY")
                .unwrap_or(defaults.duckdb_memory_limit),
            presence_ttl_secs: env_parse("STAGELYTICS_PRESENCE_TTL", defaults.presence_ttl_secs),
            activity_ttl_secs: env_parse("STAGELYTICS_ACTIVITY_TTL", defaults.activity_ttl_secs),
            activity_cap: env_parse("STAGELYTICS_ACTIVITY_CAP", defaults.activity_cap),
            realtime_cache_ttl_secs: env_parse(
                "STAGELYTICS_REALTIME_CACHE_TTL",
                defaults.realtime_cache_ttl_secs,
            ),
            summary_cache_ttl_secs: env_parse(
                "STAGELYTICS_SUMMARY_CACHE_TTL",
                defaults.summary_cache_ttl_secs,
            ),
            ad_attribution_window_days: env_parse(
                "STAGELYTICS_AD_WINDOW_DAYS",
                defaults.ad_attribution_window_days,
            ),
            email_attribution_window_days: env_parse(
                "STAGELYTICS_EMAIL_WINDOW_DAYS",
                defaults.email_attribution_window_days,
            ),
            organic_attribution_window_days: env_parse(
                "STAGELYTICS_ORGANIC_WINDOW_DAYS",
                defaults.organic_attribution_window_days,
            ),
            session_window_minutes: env_parse(
                "STAGELYTICS_SESSION_WINDOW_MIN",
                defaults.session_window_minutes,
            ),
        }
    }

    /// Attribution window applied when a campaign has no explicit end date.
    pub fn attribution_window_days(&self, campaign_type: &CampaignType) -> i64 {
        match campaign_type {
            CampaignType::GoogleAds | CampaignType::FacebookAds | CampaignType::TiktokAds => {
                self.ad_attribution_window_days
            }
            CampaignType::Email => self.email_attribution_window_days,
            CampaignType::Organic | CampaignType::Announcement | CampaignType::PriceChange => {
                self.organic_attribution_window_days
            }
        }
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn activity_ttl(&self) -> Duration {
        Duration::from_secs(self.activity_ttl_secs)
    }

    pub fn realtime_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.realtime_cache_ttl_secs)
    }

    pub fn summary_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.summary_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_ttls() {
        let cfg = Config::default();
        assert_eq!(cfg.presence_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.activity_cap, 20);
        assert_eq!(cfg.realtime_cache_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn window_depends_on_campaign_type() {
        let cfg = Config::default();
        assert_eq!(cfg.attribution_window_days(&CampaignType::GoogleAds), 7);
        assert_eq!(cfg.attribution_window_days(&CampaignType::Email), 3);
    }
}
