use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::AdPlatform;

/// Order lifecycle states, owned by the external payment boundary.
///
/// The engine only reads them; the settled states are the ones that count
/// toward revenue and conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Paid,
    Confirmed,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(Self::Created),
            "paid" => Some(Self::Paid),
            "confirmed" => Some(Self::Confirmed),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Paid => "paid",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// Paid, confirmed, and completed orders all count as settled revenue.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Paid | Self::Confirmed | Self::Completed)
    }
}

/// A purchase aggregate. Mutated by the payment boundary; read-only here
/// apart from the aggregation/attribution side effects it triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub scope_id: String,
    pub tenant_id: Option<String>,
    pub status: OrderStatus,
    pub total: f64,
    pub ticket_count: i64,
    pub visitor_id: Option<String>,
    pub session_id: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub gclid: Option<String>,
    pub fbclid: Option<String>,
    pub ttclid: Option<String>,
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Click-id platform from the order's marketing snapshot,
    /// gclid > fbclid > ttclid.
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

    /// The timestamp attribution windows are evaluated against.
    pub fn purchase_time(&self) -> DateTime<Utc> {
        self.paid_at.unwrap_or(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_states() {
        assert!(OrderStatus::Paid.is_settled());
        assert!(OrderStatus::Confirmed.is_settled());
        assert!(OrderStatus::Completed.is_settled());
        assert!(!OrderStatus::Created.is_settled());
        assert!(!OrderStatus::Refunded.is_settled());
    }

    #[test]
    fn status_round_trip() {
        for raw in ["created", "paid", "confirmed", "completed", "cancelled", "refunded"] {
            let status = OrderStatus::parse(raw).unwrap();
            assert_eq!(status.as_str(), raw);
        }
        assert!(OrderStatus::parse("unknown").is_none());
    }
}
