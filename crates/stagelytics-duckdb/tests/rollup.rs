use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use stagelytics_core::analytics::DateRange;
use stagelytics_core::event::InteractionEvent;
use stagelytics_core::order::{Order, OrderStatus};
use stagelytics_duckdb::DuckDbBackend;

fn event(id: &str, scope_id: &str, event_type: &str, day: u32, hour: u32) -> InteractionEvent {
    InteractionEvent {
        id: id.to_string(),
        scope_id: scope_id.to_string(),
        tenant_id: None,
        session_id: format!("sess_{id}"),
        visitor_id: format!("vis_{id}"),
        event_type: event_type.to_string(),
        occurred_at: Utc.with_ymd_and_hms(2026, 6, day, hour, 0, 0).unwrap(),
        value: None,
        quantity: None,
        order_id: None,
        content_id: None,
        page_title: None,
        referrer: None,
        utm_source: Some("facebook".to_string()),
        utm_medium: None,
        utm_campaign: None,
        utm_term: None,
        utm_content: None,
        gclid: None,
        fbclid: None,
        ttclid: None,
        device_type: None,
        country_code: Some("RO".to_string()),
        region: None,
        city: Some("Bucharest".to_string()),
        latitude: None,
        longitude: None,
        attributed_campaign_id: None,
    }
}

fn order(id: &str, scope_id: &str, total: f64, tickets: i64, day: u32, hour: u32) -> Order {
    let at = Utc.with_ymd_and_hms(2026, 6, day, hour, 0, 0).unwrap();
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

async fn seeded(db: &DuckDbBackend, id: &str, rollups: bool) {
    db.seed_scope(id, "Open Air Fest", None, 1000, rollups)
        .await
        .expect("seed");
}

#[tokio::test]
async fn daily_rollup_feeds_the_fast_path_with_identical_results() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    seeded(&db, "scope_1", true).await;

    let mut batch = Vec::new();
    for i in 0..6 {
        batch.push(event(&format!("pv_{i}"), "scope_1", "page_view", 10, 11));
    }
    for i in 0..2 {
        batch.push(event(&format!("cart_{i}"), "scope_1", "add_to_cart", 10, 12));
    }
    db.insert_events(&batch).await.expect("insert");
    db.upsert_order(&order("ord_1", "scope_1", 250.0, 2, 10, 13))
        .await
        .expect("order");

    let date = NaiveDate::from_ymd_opt(2026, 6, 10).unwrap();
    db.aggregate_daily("scope_1", date).await.expect("rollup");

    let range = DateRange {
        start: date,
        end: date,
    };
    // Aggregated path (rollups enabled) vs derived path (fresh raw scope
    // with identical data) must agree.
    let fast = db.get_funnel_metrics("scope_1", &range).await.expect("fast");

    seeded(&db, "scope_raw", false).await;
    let mut raw_batch = Vec::new();
    for i in 0..6 {
        raw_batch.push(event(&format!("rpv_{i}"), "scope_raw", "page_view", 10, 11));
    }
    for i in 0..2 {
        raw_batch.push(event(&format!("rcart_{i}"), "scope_raw", "add_to_cart", 10, 12));
    }
    db.insert_events(&raw_batch).await.expect("insert");
    db.upsert_order(&order("ord_raw", "scope_raw", 250.0, 2, 10, 13))
        .await
        .expect("order");
    let slow = db
        .get_funnel_metrics("scope_raw", &range)
        .await
        .expect("slow");

    assert_eq!(fast.page_views, slow.page_views);
    assert_eq!(fast.unique_visitors, slow.unique_visitors);
    assert_eq!(fast.add_to_cart, slow.add_to_cart);
    assert_eq!(fast.view_to_cart_rate, slow.view_to_cart_rate);

    // The chart's aggregated arm reads the daily bucket directly.
    let chart = db.get_chart_data("scope_1", &range).await.expect("chart");
    assert_eq!(chart.len(), 1);
    assert_eq!(chart[0].visits, 6);
    assert_eq!(chart[0].revenue, 250.0);
    assert_eq!(chart[0].tickets, 2);
}

#[tokio::test]
async fn daily_rollup_is_safe_to_rerun() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    seeded(&db, "scope_1", true).await;

    db.insert_events(&[event("pv_0", "scope_1", "page_view", 10, 9)])
        .await
        .expect("insert");

    let date = NaiveDate::from_ymd_opt(2026, 6, 10).unwrap();
    db.aggregate_daily("scope_1", date).await.expect("rollup");
    db.aggregate_daily("scope_1", date).await.expect("rollup again");

    let conn = db.conn_for_test().await;
    let (rows, page_views): (i64, i64) = conn
        .prepare(
            "SELECT COUNT(*), CAST(COALESCE(SUM(page_views), 0) AS BIGINT) FROM analytics_daily \
             WHERE scope_id = 'scope_1'",
        )
        .expect("prepare")
        .query_row([], |row| Ok((row.get(0)?, row.get(1)?)))
        .expect("row");
    assert_eq!(rows, 1);
    assert_eq!(page_views, 1);
}

#[tokio::test]
async fn hourly_buckets_sum_to_the_daily_bucket() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    seeded(&db, "scope_1", true).await;

    // Two sales in different hours feed both the hourly counters (write
    // path) and, via the stored orders, the daily rollup (derive path).
    for (id, hour) in [("ord_1", 10), ("ord_2", 19)] {
        let o = order(id, "scope_1", 100.0, 1, 10, hour);
        db.upsert_order(&o).await.expect("order");
        db.record_purchase(&o, o.created_at).await;
    }

    let date = NaiveDate::from_ymd_opt(2026, 6, 10).unwrap();
    db.aggregate_daily("scope_1", date).await.expect("rollup");

    let conn = db.conn_for_test().await;
    let hourly_sum: i64 = conn
        .prepare(
            "SELECT CAST(COALESCE(SUM(purchases), 0) AS BIGINT) FROM analytics_hourly \
             WHERE scope_id = 'scope_1' AND date = '2026-06-10'",
        )
        .expect("prepare")
        .query_row([], |row| row.get(0))
        .expect("row");
    let daily: i64 = conn
        .prepare(
            "SELECT purchases_count FROM analytics_daily \
             WHERE scope_id = 'scope_1' AND date = '2026-06-10'",
        )
        .expect("prepare")
        .query_row([], |row| row.get(0))
        .expect("row");
    assert_eq!(hourly_sum, daily);
}

#[tokio::test]
async fn weekly_rollup_sums_daily_rows() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    seeded(&db, "scope_1", true).await;

    // Monday 2026-06-08 through Wednesday, one view per day.
    for day in [8, 9, 10] {
        db.insert_events(&[event(&format!("pv_{day}"), "scope_1", "page_view", day, 12)])
            .await
            .expect("insert");
        db.aggregate_daily(
            "scope_1",
            NaiveDate::from_ymd_opt(2026, 6, day).unwrap(),
        )
        .await
        .expect("daily");
    }

    let week_start = NaiveDate::from_ymd_opt(2026, 6, 8).unwrap();
    db.aggregate_weekly("scope_1", week_start)
        .await
        .expect("weekly");

    let conn = db.conn_for_test().await;
    let page_views: i64 = conn
        .prepare(
            "SELECT page_views FROM analytics_weekly \
             WHERE scope_id = 'scope_1' AND week_start = '2026-06-08'",
        )
        .expect("prepare")
        .query_row([], |row| row.get(0))
        .expect("row");
    assert_eq!(page_views, 3);
}

#[tokio::test]
async fn realtime_snapshot_reads_hourly_buckets() {
    let db = Arc::new(DuckDbBackend::open_in_memory().expect("db"));
    seeded(&db, "scope_1", true).await;

    let now = Utc.with_ymd_and_hms(2026, 6, 10, 15, 30, 0).unwrap();
    db.increment_metric("scope_1", "page_views", 4, now)
        .await
        .expect("increment");
    db.increment_metric(
        "scope_1",
        "page_views",
        2,
        now - chrono::Duration::hours(3),
    )
    .await
    .expect("increment");
    // Outside the 24h window; must not be counted.
    db.increment_metric(
        "scope_1",
        "page_views",
        9,
        now - chrono::Duration::hours(30),
    )
    .await
    .expect("increment");

    let snapshot = db
        .get_realtime_snapshot_at("scope_1", now)
        .await
        .expect("snapshot");

    assert_eq!(snapshot.current_hour.page_views, 4);
    assert_eq!(snapshot.today.page_views, 6);
    assert_eq!(snapshot.last_24h.page_views, 6);
    assert_eq!(snapshot.hourly_chart.len(), 24);
    let current = snapshot.hourly_chart.last().expect("chart point");
    assert_eq!(current.hour, "15:00");
    assert_eq!(current.page_views, 4);
}
