use anyhow::Result;

use stagelytics_core::analytics::{rate_pct, DateRange, FunnelMetrics, RollupSource};

use crate::backend::DuckDbBackend;

pub async fn get_funnel_inner(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<FunnelMetrics> {
    let scope = db.get_scope(scope_id).await?;
    let source = RollupSource::for_scope(scope.rollups_enabled);

    let (page_views, unique_visitors, add_to_cart, checkout_started, purchases) = match source {
        RollupSource::Aggregated => aggregated_stages(db, scope_id, range).await?,
        RollupSource::Derived => derived_stages(db, scope_id, range).await?,
    };

    Ok(FunnelMetrics {
        page_views,
        unique_visitors,
        add_to_cart,
        checkout_started,
        purchases,
        view_to_cart_rate: rate_pct(add_to_cart, unique_visitors),
        cart_to_checkout_rate: rate_pct(checkout_started, add_to_cart),
        checkout_to_purchase_rate: rate_pct(purchases, checkout_started),
        overall_conversion_rate: rate_pct(purchases, unique_visitors),
    })
}

async fn aggregated_stages(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<(i64, i64, i64, i64, i64)> {
    let conn = db.conn.lock().await;
    let row = conn
        .prepare(
            "SELECT CAST(COALESCE(SUM(page_views), 0) AS BIGINT), \
                    CAST(COALESCE(SUM(unique_visitors), 0) AS BIGINT), \
                    CAST(COALESCE(SUM(add_to_cart_count), 0) AS BIGINT), \
                    CAST(COALESCE(SUM(checkout_started_count), 0) AS BIGINT), \
                    CAST(COALESCE(SUM(purchases_count), 0) AS BIGINT) \
             FROM analytics_daily \
             WHERE scope_id = ?1 AND date >= ?2 AND date <= ?3",
        )?
        .query_row(
            duckdb::params![
                scope_id,
                range.start.format("%Y-%m-%d").to_string(),
                range.end.format("%Y-%m-%d").to_string()
            ],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )?;
    Ok(row)
}

/// Stage counts straight from raw rows. Carts and checkouts count distinct
/// sessions (one visitor adding five times is one funnel entry); views and
/// purchases count rows.
async fn derived_stages(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<(i64, i64, i64, i64, i64)> {
    let start = range.start.format("%Y-%m-%d").to_string();
    let end_next = (range.end + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();

    let conn = db.conn.lock().await;
    let (page_views, unique_visitors): (i64, i64) = conn
        .prepare(
            "SELECT COUNT(*), COUNT(DISTINCT visitor_id) FROM events \
             WHERE scope_id = ?1 \
               AND (event_type = 'page_view' OR event_type IS NULL OR event_type = '') \
               AND (occurred_at >= ?2 AND occurred_at < ?3 OR occurred_at IS NULL)",
        )?
        .query_row(duckdb::params![scope_id, start, end_next], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;

    let distinct_sessions = |event_type: &str| -> String {
        format!(
            "SELECT COUNT(DISTINCT session_id) FROM events \
             WHERE scope_id = ?1 AND event_type = '{event_type}' \
               AND occurred_at >= ?2 AND occurred_at < ?3"
        )
    };

    let add_to_cart: i64 = conn
        .prepare(&distinct_sessions("add_to_cart"))?
        .query_row(duckdb::params![scope_id, start, end_next], |row| row.get(0))?;
    let checkout_started: i64 = conn
        .prepare(&distinct_sessions("begin_checkout"))?
        .query_row(duckdb::params![scope_id, start, end_next], |row| row.get(0))?;
    let purchases: i64 = conn
        .prepare(
            "SELECT COUNT(*) FROM events \
             WHERE scope_id = ?1 AND event_type = 'purchase' \
               AND occurred_at >= ?2 AND occurred_at < ?3",
        )?
        .query_row(duckdb::params![scope_id, start, end_next], |row| row.get(0))?;

    Ok((
        page_views,
        unique_visitors,
        add_to_cart,
        checkout_started,
        purchases,
    ))
}

impl DuckDbBackend {
    pub async fn get_funnel_metrics(
        &self,
        scope_id: &str,
        range: &DateRange,
    ) -> Result<FunnelMetrics> {
        get_funnel_inner(self, scope_id, range).await
    }
}
