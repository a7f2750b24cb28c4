use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Interaction event types recognized by the funnel and aggregation layers.
///
/// The wire form is the snake_case string; anything else is carried through
/// as [`EventType::Other`] so unknown client events are stored, not dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    PageView,
    ViewItem,
    AddToCart,
    BeginCheckout,
    Purchase,
    Other(String),
}

impl EventType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "page_view" => Self::PageView,
            "view_item" => Self::ViewItem,
            "add_to_cart" => Self::AddToCart,
            "begin_checkout" => Self::BeginCheckout,
            "purchase" => Self::Purchase,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::PageView => "page_view",
            Self::ViewItem => "view_item",
            Self::AddToCart => "add_to_cart",
            Self::BeginCheckout => "begin_checkout",
            Self::Purchase => "purchase",
            Self::Other(raw) => raw,
        }
    }
}

/// Ad platform derived from a click identifier on an event or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdPlatform {
    Google,
    Facebook,
    Tiktok,
}

impl AdPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Facebook => "facebook",
            Self::Tiktok => "tiktok",
        }
    }
}

/// The payload the ingestion boundary delivers for a single interaction.
///
/// Validation and idempotency-key deduplication happen upstream; by the time
/// a payload reaches the engine it is well-formed and unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackPayload {
    pub scope_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub visitor_id: String,
    pub occurred_at: Option<DateTime<Utc>>,
    /// Monetary value for purchase events.
    pub value: Option<f64>,
    pub quantity: Option<i64>,
    pub order_id: Option<String>,
    pub content_id: Option<String>,
    pub page_title: Option<String>,
    pub referrer: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
    pub gclid: Option<String>,
    pub fbclid: Option<String>,
    pub ttclid: Option<String>,
    pub device_type: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// The stored interaction row — mirrors the DuckDB `events` table exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub id: String,
    pub scope_id: String,
    pub tenant_id: Option<String>,
    pub session_id: String,
    pub visitor_id: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub value: Option<f64>,
    pub quantity: Option<i64>,
    pub order_id: Option<String>,
    pub content_id: Option<String>,
    pub page_title: Option<String>,
    pub referrer: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
    pub gclid: Option<String>,
    pub fbclid: Option<String>,
    pub ttclid: Option<String>,
    pub device_type: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Set exactly once by the attribution resolver, never reset.
    pub attributed_campaign_id: Option<String>,
}

impl InteractionEvent {
    pub fn event_type(&self) -> EventType {
        EventType::parse(&self.event_type)
    }

    /// Click-id platform, checked in gclid > fbclid > ttclid order.
    pub fn click_id_platform(&self) -> Option<AdPlatform> {
        if self.gclid.is_some() {
            Some(AdPlatform::Google)
        } else if self.fbclid.is_some() {
            Some(AdPlatform::Facebook)
        } else if self.ttclid.is_some() {
            Some(AdPlatform::Tiktok)
        } else {
            None
        }
    }

    pub fn is_purchase(&self) -> bool {
        self.event_type() == EventType::Purchase
    }
}

/// Compute a deterministic session ID.
///
/// `session_id = sha256(visitor_id + scope_id + first_seen_ms)[0:16]`
pub fn compute_session_id(visitor_id: &str, scope_id: &str, first_seen_ms: i64) -> String {
    use sha2::{Digest, Sha256};
    let input = format!("{}{}{}", visitor_id, scope_id, first_seen_ms);
    let hash = Sha256::digest(input.as_bytes());
    hex::encode(&hash[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_known_and_unknown() {
        assert_eq!(EventType::parse("purchase"), EventType::Purchase);
        assert_eq!(EventType::parse("page_view").as_str(), "page_view");
        let other = EventType::parse("view_lineup");
        assert_eq!(other.as_str(), "view_lineup");
    }

    #[test]
    fn click_platform_prefers_gclid() {
        let mut event = sample_event();
        event.gclid = Some("g".into());
        event.fbclid = Some("f".into());
        assert_eq!(event.click_id_platform(), Some(AdPlatform::Google));
        event.gclid = None;
        assert_eq!(event.click_id_platform(), Some(AdPlatform::Facebook));
    }

    #[test]
    fn session_id_is_stable() {
        let a = compute_session_id("v1", "scope_1", 1000);
        let b = compute_session_id("v1", "scope_1", 1000);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    fn sample_event() -> InteractionEvent {
        InteractionEvent {
            id: "e1".into(),
            scope_id: "scope_1".into(),
            tenant_id: None,
            session_id: "s1".into(),
            visitor_id: "v1".into(),
            event_type: "page_view".into(),
            occurred_at: Utc::now(),
            value: None,
            quantity: None,
            order_id: None,
            content_id: None,
            page_title: None,
            referrer: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            utm_term: None,
            utm_content: None,
            gclid: None,
            fbclid: None,
            ttclid: None,
            device_type: None,
            country_code: None,
            region: None,
            city: None,
            latitude: None,
            longitude: None,
            attributed_campaign_id: None,
        }
    }
}
