use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use stagelytics_core::analytics::DateRange;
use stagelytics_core::campaign::{Campaign, CampaignType};
use stagelytics_core::config::Config;
use stagelytics_core::event::InteractionEvent;
use stagelytics_core::order::{Order, OrderStatus};
use stagelytics_duckdb::DuckDbBackend;

const FIXTURE_DAY: (i32, u32, u32) = (2026, 6, 10);

fn event(id: &str, scope_id: &str, event_type: &str) -> InteractionEvent {
    let (y, m, d) = FIXTURE_DAY;
    InteractionEvent {
        id: id.to_string(),
        scope_id: scope_id.to_string(),
        tenant_id: None,
        session_id: format!("sess_{id}"),
        visitor_id: format!("vis_{id}"),
        event_type: event_type.to_string(),
        occurred_at: Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap(),
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

fn settled_order(id: &str, scope_id: &str, total: f64, tickets: i64) -> Order {
    let (y, m, d) = FIXTURE_DAY;
    let at = Utc.with_ymd_and_hms(y, m, d, 13, 0, 0).unwrap();
    Order {
        id: id.to_string(),
        scope_id: scope_id.to_string(),
        tenant_id: None,
        status: OrderStatus::Paid,
        total,
        ticket_count: tickets,
        visitor_id: None,
        session_id: None,
        utm_source: None,
        utm_medium: None,
        utm_campaign: None,
        gclid: None,
        fbclid: None,
        ttclid: None,
        country_code: Some("RO".to_string()),
        city: Some("Bucharest".to_string()),
        created_at: at,
        paid_at: Some(at),
    }
}

async fn raw_scope(db: &DuckDbBackend, id: &str) {
    // rollups_enabled = false forces the derived (raw-row) query path.
    db.seed_scope(id, "Open Air Fest", None, 1000, false)
        .await
        .expect("seed");
}

/// The end-to-end fixture from the acceptance checklist: one day on scope E
/// with 100 page views from 80 distinct visitors, 10 add-to-carts,
/// 4 purchases totaling 400.00, 3 of them attributed to the
/// `spring_sale` campaign.
async fn build_scope_e(db: &Arc<DuckDbBackend>) -> String {
    raw_scope(db, "scope_e").await;

    let mut batch = Vec::new();
    for i in 0..100 {
        let mut view = event(&format!("pv_{i}"), "scope_e", "page_view");
        // 80 distinct visitors: the last 20 views repeat visitors 0..19.
        view.visitor_id = format!("vis_{}", i % 80);
        batch.push(view);
    }
    for i in 0..10 {
        batch.push(event(&format!("cart_{i}"), "scope_e", "add_to_cart"));
    }
    for i in 0..4 {
        let mut purchase = event(&format!("buy_{i}"), "scope_e", "purchase");
        purchase.value = Some(100.0);
        if i < 3 {
            purchase.utm_campaign = Some("spring_sale".to_string());
        }
        batch.push(purchase);
    }
    db.insert_events(&batch).await.expect("insert");

    let (y, m, d) = FIXTURE_DAY;
    let mut campaign_a = Campaign {
        id: String::new(),
        scope_id: "scope_e".to_string(),
        campaign_type: CampaignType::Email,
        title: "Spring sale".to_string(),
        start_date: NaiveDate::from_ymd_opt(y, m, d - 5).unwrap(),
        end_date: NaiveDate::from_ymd_opt(y, m, d + 5),
        utm_source: None,
        utm_campaign: Some("spring_sale".to_string()),
        budget: None,
        currency: "EUR".to_string(),
        conversions: 0,
        attributed_revenue: 0.0,
        cac: None,
        roi: None,
        roas: None,
        baseline_value: None,
        post_value: None,
        impact_metric: None,
        is_active: true,
        created_at: Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0).unwrap(),
        metrics_updated_at: None,
    };
    campaign_a.id = db.insert_campaign(&campaign_a).await.expect("campaign");

    let config = Config::default();
    let report = db
        .attribute_unattributed_purchases("scope_e", 100, &config)
        .await
        .expect("backfill");
    assert_eq!(report.attributed, 3);

    campaign_a.id
}

fn fixture_range() -> DateRange {
    let (y, m, d) = FIXTURE_DAY;
    DateRange {
        start: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
        end: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
    }
}

#[tokio::test]
async fn scope_e_funnel_matches_expected_rates() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    build_scope_e(&db).await;

    let funnel = db
        .get_funnel_metrics("scope_e", &fixture_range())
        .await
        .expect("funnel");

    assert_eq!(funnel.page_views, 100);
    assert_eq!(funnel.unique_visitors, 80);
    assert_eq!(funnel.add_to_cart, 10);
    assert_eq!(funnel.purchases, 4);
    assert_eq!(funnel.overall_conversion_rate, 5.0);
    assert_eq!(funnel.view_to_cart_rate, 12.5);
}

#[tokio::test]
async fn scope_e_campaign_credit_splits_three_to_one() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    let campaign_id = build_scope_e(&db).await;

    let campaign = db
        .get_campaign(&campaign_id)
        .await
        .expect("load")
        .expect("row");
    assert_eq!(campaign.conversions, 3);
    assert_eq!(campaign.attributed_revenue, 300.0);

    let conn = db.conn_for_test().await;
    let unattributed: i64 = conn
        .prepare(
            "SELECT COUNT(*) FROM events WHERE scope_id = 'scope_e' \
             AND event_type = 'purchase' AND attributed_campaign_id IS NULL",
        )
        .expect("prepare")
        .query_row([], |row| row.get(0))
        .expect("row");
    assert_eq!(unattributed, 1);
}

#[tokio::test]
async fn chart_zero_fills_missing_days() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    raw_scope(&db, "scope_1").await;

    // Data on 3 of 10 days.
    for (id, day) in [("a", 2), ("b", 5), ("c", 9)] {
        let mut view = event(&format!("pv_{id}"), "scope_1", "page_view");
        view.occurred_at = Utc.with_ymd_and_hms(2026, 7, day, 10, 0, 0).unwrap();
        db.insert_events(&[view]).await.expect("insert");
    }

    let range = DateRange {
        start: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2026, 7, 10).unwrap(),
    };
    let chart = db.get_chart_data("scope_1", &range).await.expect("chart");

    assert_eq!(chart.len(), 10);
    let dates: Vec<&str> = chart.iter().map(|p| p.date.as_str()).collect();
    let mut sorted = dates.clone();
    sorted.sort();
    assert_eq!(dates, sorted, "days must be in ascending order");

    let non_zero: Vec<&str> = chart
        .iter()
        .filter(|p| p.visits > 0)
        .map(|p| p.date.as_str())
        .collect();
    assert_eq!(non_zero, vec!["2026-07-02", "2026-07-05", "2026-07-09"]);
    assert_eq!(chart.iter().filter(|p| p.visits == 0).count(), 7);
}

#[tokio::test]
async fn funnel_stages_are_monotonic_on_a_full_fixture() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    raw_scope(&db, "scope_1").await;

    let mut batch = Vec::new();
    for i in 0..12 {
        batch.push(event(&format!("pv_{i}"), "scope_1", "page_view"));
    }
    for i in 0..6 {
        batch.push(event(&format!("cart_{i}"), "scope_1", "add_to_cart"));
    }
    for i in 0..3 {
        batch.push(event(&format!("chk_{i}"), "scope_1", "begin_checkout"));
    }
    batch.push(event("buy_0", "scope_1", "purchase"));
    db.insert_events(&batch).await.expect("insert");

    let funnel = db
        .get_funnel_metrics("scope_1", &fixture_range())
        .await
        .expect("funnel");

    assert!(funnel.page_views >= funnel.add_to_cart);
    assert!(funnel.add_to_cart >= funnel.checkout_started);
    assert!(funnel.checkout_started >= funnel.purchases);
    assert_eq!(funnel.cart_to_checkout_rate, 50.0);
}

#[tokio::test]
async fn legacy_untyped_rows_count_as_visits() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    raw_scope(&db, "scope_1").await;

    let typed = event("pv_typed", "scope_1", "page_view");
    let mut legacy_empty = event("pv_legacy", "scope_1", "");
    legacy_empty.visitor_id = "vis_legacy".to_string();
    db.insert_events(&[typed, legacy_empty]).await.expect("insert");

    let overview = db
        .get_overview_stats("scope_1", &fixture_range())
        .await
        .expect("overview");
    assert_eq!(overview.visits.total, 2);
    assert_eq!(overview.visits.unique, 2);
}

#[tokio::test]
async fn unknown_scope_is_a_hard_error() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    let result = db.get_overview_stats("scope_missing", &fixture_range()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn traffic_sources_rank_by_distinct_visitors() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    raw_scope(&db, "scope_1").await;

    let mut batch = Vec::new();
    for i in 0..5 {
        let mut view = event(&format!("fb_{i}"), "scope_1", "page_view");
        view.utm_source = Some("facebook".to_string());
        batch.push(view);
    }
    for i in 0..2 {
        let mut view = event(&format!("em_{i}"), "scope_1", "page_view");
        view.utm_medium = Some("email".to_string());
        batch.push(view);
    }
    let mut purchase = event("buy_fb", "scope_1", "purchase");
    purchase.utm_source = Some("facebook".to_string());
    purchase.value = Some(60.0);
    batch.push(purchase);
    db.insert_events(&batch).await.expect("insert");

    let sources = db
        .get_traffic_sources("scope_1", &fixture_range())
        .await
        .expect("traffic");

    assert_eq!(sources[0].name, "Facebook");
    assert_eq!(sources[0].visitors, 6);
    assert_eq!(sources[0].conversions, 1);
    assert_eq!(sources[0].revenue, 60.0);
    assert!(sources.iter().any(|s| s.name == "Email" && s.visitors == 2));
}

#[tokio::test]
async fn top_locations_rank_purchases_by_city() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    raw_scope(&db, "scope_1").await;

    let mut batch = Vec::new();
    for i in 0..3 {
        let mut purchase = event(&format!("buy_buc_{i}"), "scope_1", "purchase");
        purchase.city = Some("Bucharest".to_string());
        purchase.country_code = Some("RO".to_string());
        purchase.value = Some(50.0);
        batch.push(purchase);
    }
    let mut cluj = event("buy_cluj", "scope_1", "purchase");
    cluj.city = Some("Cluj-Napoca".to_string());
    cluj.country_code = Some("RO".to_string());
    cluj.value = Some(75.0);
    batch.push(cluj);
    db.insert_events(&batch).await.expect("insert");

    let locations = db
        .get_top_locations("scope_1", &fixture_range(), 10)
        .await
        .expect("locations");

    assert_eq!(locations.len(), 2);
    assert_eq!(locations[0].city, "Bucharest");
    assert_eq!(locations[0].purchases, 3);
    assert_eq!(locations[0].revenue, 150.0);
    assert_eq!(locations[0].flag, "🇷🇴");
}

#[tokio::test]
async fn period_comparison_guards_zero_baseline() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    raw_scope(&db, "scope_1").await;

    db.insert_events(&[event("pv_1", "scope_1", "page_view")])
        .await
        .expect("insert");
    db.upsert_order(&settled_order("ord_1", "scope_1", 200.0, 2))
        .await
        .expect("order");

    let comparison = db
        .get_period_comparison("scope_1", &fixture_range())
        .await
        .expect("comparison");

    assert_eq!(comparison.current.revenue, 200.0);
    assert_eq!(comparison.previous.revenue, 0.0);
    // Empty baseline never divides by zero.
    assert_eq!(comparison.changes.revenue_pct, 0.0);
    assert_eq!(comparison.changes.visitors_pct, 0.0);
}
