use std::sync::Arc;

use chrono::Utc;
use stagelytics_core::analytics::Period;
use stagelytics_core::campaign::{Campaign, CampaignType};
use stagelytics_core::clock::SystemClock;
use stagelytics_core::config::Config;
use stagelytics_core::event::TrackPayload;
use stagelytics_core::order::{Order, OrderStatus};
use stagelytics_duckdb::DuckDbBackend;
use stagelytics_engine::Engine;
use stagelytics_live::MemoryPresenceStore;

fn engine_with_db() -> (Engine<MemoryPresenceStore<SystemClock>>, Arc<DuckDbBackend>) {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    let engine = Engine::new(
        db.clone(),
        MemoryPresenceStore::new(SystemClock),
        Config::default(),
    );
    (engine, db)
}

fn payload(event_type: &str, visitor: &str) -> TrackPayload {
    TrackPayload {
        scope_id: "scope_1".to_string(),
        event_type: event_type.to_string(),
        visitor_id: visitor.to_string(),
        occurred_at: None,
        value: None,
        quantity: None,
        order_id: None,
        content_id: None,
        page_title: Some("Electric Nights".to_string()),
        referrer: None,
        utm_source: None,
        utm_medium: None,
        utm_campaign: None,
        utm_term: None,
        utm_content: None,
        gclid: None,
        fbclid: None,
        ttclid: None,
        device_type: Some("mobile".to_string()),
        country_code: Some("RO".to_string()),
        region: None,
        city: Some("Bucharest".to_string()),
        latitude: Some(44.43),
        longitude: Some(26.10),
    }
}

fn paid_order(id: &str, total: f64, campaign: Option<&str>) -> Order {
    let now = Utc::now();
    Order {
        id: id.to_string(),
        scope_id: "scope_1".to_string(),
        tenant_id: None,
        status: OrderStatus::Paid,
        total,
        ticket_count: 2,
        visitor_id: Some("vis_1".to_string()),
        session_id: None,
        utm_source: None,
        utm_medium: None,
        utm_campaign: campaign.map(str::to_string),
        gclid: None,
        fbclid: None,
        ttclid: None,
        country_code: Some("RO".to_string()),
        city: Some("Bucharest".to_string()),
        created_at: now,
        paid_at: Some(now),
    }
}

fn active_campaign() -> Campaign {
    let today = Utc::now().date_naive();
    Campaign {
        id: String::new(),
        scope_id: "scope_1".to_string(),
        campaign_type: CampaignType::Email,
        title: "Spring sale".to_string(),
        start_date: today - chrono::Duration::days(3),
        end_date: Some(today + chrono::Duration::days(3)),
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
        created_at: Utc::now(),
        metrics_updated_at: None,
    }
}

#[tokio::test]
async fn tracking_a_page_view_stores_aggregates_and_presence() {
    let (engine, db) = engine_with_db();
    db.seed_scope("scope_1", "Electric Nights", None, 500, true)
        .await
        .expect("seed");

    let event = engine
        .track(payload("page_view", "vis_1"))
        .await
        .expect("track");
    assert_eq!(event.event_type, "page_view");
    assert!(!event.session_id.is_empty());

    let conn = db.conn_for_test().await;
    let (page_views, unique_visitors): (i64, i64) = conn
        .prepare(
            "SELECT CAST(COALESCE(SUM(page_views), 0) AS BIGINT), \
                    CAST(COALESCE(SUM(unique_visitors), 0) AS BIGINT) \
             FROM analytics_hourly WHERE scope_id = 'scope_1'",
        )
        .expect("prepare")
        .query_row([], |row| Ok((row.get(0)?, row.get(1)?)))
        .expect("row");
    assert_eq!(page_views, 1);
    // First event opened a new session, so the visitor counted as unique.
    assert_eq!(unique_visitors, 1);
    drop(conn);

    let live = engine.live_visitors("scope_1");
    assert_eq!(live.count, 1);
    assert_eq!(live.visitors.len(), 1);
    assert_eq!(live.activity, vec!["Viewing Electric Nights (Bucharest)"]);
}

#[tokio::test]
async fn repeat_views_in_one_session_count_unique_once() {
    let (engine, db) = engine_with_db();
    db.seed_scope("scope_1", "Electric Nights", None, 500, true)
        .await
        .expect("seed");

    engine
        .track(payload("page_view", "vis_1"))
        .await
        .expect("track");
    engine
        .track(payload("page_view", "vis_1"))
        .await
        .expect("track");

    let conn = db.conn_for_test().await;
    let (page_views, unique_visitors): (i64, i64) = conn
        .prepare(
            "SELECT CAST(COALESCE(SUM(page_views), 0) AS BIGINT), \
                    CAST(COALESCE(SUM(unique_visitors), 0) AS BIGINT) \
             FROM analytics_hourly WHERE scope_id = 'scope_1'",
        )
        .expect("prepare")
        .query_row([], |row| Ok((row.get(0)?, row.get(1)?)))
        .expect("row");
    assert_eq!(page_views, 2);
    assert_eq!(unique_visitors, 1);
}

#[tokio::test]
async fn tracking_rejects_unknown_scopes() {
    let (engine, _db) = engine_with_db();
    let result = engine.track(payload("page_view", "vis_1")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn purchase_events_run_attribution() {
    let (engine, db) = engine_with_db();
    db.seed_scope("scope_1", "Electric Nights", None, 500, true)
        .await
        .expect("seed");
    let campaign_id = db
        .insert_campaign(&active_campaign())
        .await
        .expect("campaign");

    let mut purchase = payload("purchase", "vis_1");
    purchase.utm_campaign = Some("spring_sale".to_string());
    purchase.value = Some(120.0);
    let event = engine.track(purchase).await.expect("track");

    let stored = db.get_event(&event.id).await.expect("load").expect("row");
    assert_eq!(stored.attributed_campaign_id.as_deref(), Some(campaign_id.as_str()));

    let campaign = db
        .get_campaign(&campaign_id)
        .await
        .expect("load")
        .expect("row");
    assert_eq!(campaign.conversions, 1);
    assert_eq!(campaign.attributed_revenue, 120.0);
}

#[tokio::test]
async fn paid_orders_refresh_cached_campaign_metrics() {
    let (engine, db) = engine_with_db();
    db.seed_scope("scope_1", "Electric Nights", None, 500, true)
        .await
        .expect("seed");
    db.insert_campaign(&active_campaign())
        .await
        .expect("campaign");

    // Prime the summary cache before any sale.
    let before = engine.campaigns("scope_1").await.expect("campaigns");
    assert_eq!(before[0].conversions, 0);

    let attributed = engine
        .order_paid(&paid_order("ord_1", 250.0, Some("spring_sale")))
        .await
        .expect("order");
    assert!(attributed.is_some());

    // The sale invalidated the summary keys, so this recomputes.
    let after = engine.campaigns("scope_1").await.expect("campaigns");
    assert_eq!(after[0].conversions, 1);
    assert_eq!(after[0].attributed_revenue, 250.0);
}

#[tokio::test]
async fn order_lifecycle_feeds_checkout_and_purchase_counters() {
    let (engine, db) = engine_with_db();
    db.seed_scope("scope_1", "Electric Nights", None, 500, true)
        .await
        .expect("seed");

    let mut order = paid_order("ord_1", 300.0, None);
    order.status = OrderStatus::Created;
    order.paid_at = None;
    engine.order_created(&order).await.expect("created");

    order.status = OrderStatus::Paid;
    order.paid_at = Some(Utc::now());
    engine.order_paid(&order).await.expect("paid");

    let conn = db.conn_for_test().await;
    let (checkouts, purchases, revenue_cents): (i64, i64, i64) = conn
        .prepare(
            "SELECT CAST(COALESCE(SUM(checkouts_started), 0) AS BIGINT), \
                    CAST(COALESCE(SUM(purchases), 0) AS BIGINT), \
                    CAST(COALESCE(SUM(revenue_cents), 0) AS BIGINT) \
             FROM analytics_hourly WHERE scope_id = 'scope_1'",
        )
        .expect("prepare")
        .query_row([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .expect("row");
    assert_eq!(checkouts, 1);
    assert_eq!(purchases, 1);
    assert_eq!(revenue_cents, 30000);
    drop(conn);

    let stored = db.get_order("ord_1").await.expect("load").expect("row");
    assert_eq!(stored.status, OrderStatus::Paid);
}

#[tokio::test]
async fn cancellation_only_touches_the_cache() {
    let (engine, db) = engine_with_db();
    db.seed_scope("scope_1", "Electric Nights", None, 500, true)
        .await
        .expect("seed");

    let mut order = paid_order("ord_1", 300.0, None);
    engine.order_paid(&order).await.expect("paid");

    order.status = OrderStatus::Refunded;
    engine.order_cancelled(&order).await.expect("cancelled");

    // Counters are not rolled back; only the order status changes.
    let conn = db.conn_for_test().await;
    let purchases: i64 = conn
        .prepare(
            "SELECT CAST(COALESCE(SUM(purchases), 0) AS BIGINT) FROM analytics_hourly \
             WHERE scope_id = 'scope_1'",
        )
        .expect("prepare")
        .query_row([], |row| row.get(0))
        .expect("row");
    assert_eq!(purchases, 1);
    drop(conn);

    let stored = db.get_order("ord_1").await.expect("load").expect("row");
    assert_eq!(stored.status, OrderStatus::Refunded);
}

#[tokio::test]
async fn dashboard_views_come_back_in_one_shape_from_both_paths() {
    let (engine, db) = engine_with_db();
    db.seed_scope("scope_1", "Electric Nights", None, 500, false)
        .await
        .expect("seed");

    engine
        .track(payload("page_view", "vis_1"))
        .await
        .expect("track");

    let overview = engine
        .overview("scope_1", Period::Last7Days)
        .await
        .expect("overview");
    assert_eq!(overview.visits.total, 1);

    // The range clamps to the scope's creation day, so the chart covers
    // exactly today.
    let chart = engine
        .chart("scope_1", Period::Last7Days)
        .await
        .expect("chart");
    assert_eq!(chart.len(), 1);
    assert_eq!(chart[0].visits, 1);

    let funnel = engine
        .funnel("scope_1", Period::Last7Days)
        .await
        .expect("funnel");
    assert_eq!(funnel.page_views, 1);
}

#[tokio::test]
async fn backfill_reports_per_item_outcomes() {
    let (engine, db) = engine_with_db();
    db.seed_scope("scope_1", "Electric Nights", None, 500, true)
        .await
        .expect("seed");
    db.insert_campaign(&active_campaign())
        .await
        .expect("campaign");

    for i in 0..2 {
        let mut purchase = payload("purchase", &format!("vis_{i}"));
        purchase.utm_campaign = Some("spring_sale".to_string());
        purchase.value = Some(10.0);
        engine.track(purchase).await.expect("track");
    }

    // track() already attributed both; the sweep finds nothing left.
    let report = engine
        .backfill_attribution("scope_1", 100)
        .await
        .expect("backfill");
    assert_eq!(report.examined, 0);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn daily_rollup_runs_through_the_engine() {
    let (engine, db) = engine_with_db();
    db.seed_scope("scope_1", "Electric Nights", None, 500, true)
        .await
        .expect("seed");

    engine
        .track(payload("page_view", "vis_1"))
        .await
        .expect("track");

    let today = Utc::now().date_naive();
    engine
        .run_daily_rollup("scope_1", today)
        .await
        .expect("rollup");

    let conn = db.conn_for_test().await;
    let page_views: i64 = conn
        .prepare("SELECT page_views FROM analytics_daily WHERE scope_id = 'scope_1'")
        .expect("prepare")
        .query_row([], |row| row.get(0))
        .expect("row");
    assert_eq!(page_views, 1);
}

#[tokio::test]
async fn realtime_view_is_cached_under_its_own_key() {
    let (engine, db) = engine_with_db();
    db.seed_scope("scope_1", "Electric Nights", None, 500, true)
        .await
        .expect("seed");

    engine
        .track(payload("page_view", "vis_1"))
        .await
        .expect("track");

    let first = engine.realtime("scope_1").await.expect("realtime");
    assert_eq!(first.hourly_chart.len(), 24);

    // A second event lands, but the cached snapshot is still served until
    // the 60-second TTL lapses.
    engine
        .track(payload("page_view", "vis_2"))
        .await
        .expect("track");
    let cached = engine.realtime("scope_1").await.expect("realtime");
    assert_eq!(cached.today.page_views, first.today.page_views);
}
