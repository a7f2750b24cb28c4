use anyhow::Result;
use chrono::Utc;

use stagelytics_core::analytics::{
    pct_change, rate_pct, round2, ConversionOverview, DateRange, OverviewStats, RevenueOverview,
    RollupSource, Scope, ScopeCountdown, TicketOverview, VisitOverview,
};

use crate::backend::DuckDbBackend;

struct RangeActivity {
    visits: i64,
    unique_visitors: i64,
    purchases: i64,
}

pub async fn get_overview_inner(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<OverviewStats> {
    let scope = db.get_scope(scope_id).await?;
    let source = RollupSource::for_scope(scope.rollups_enabled);

    let activity = match source {
        RollupSource::Aggregated => aggregated_activity(db, scope_id, range).await?,
        RollupSource::Derived => derived_activity(db, scope_id, range).await?,
    };

    // Orders are the system of record for money and tickets on both paths.
    let (total_revenue, tickets_sold) = lifetime_sales(db, scope_id).await?;
    let (window_revenue, _) = window_sales(db, scope_id, range).await?;
    let previous = range.previous();
    let (previous_revenue, _) = window_sales(db, scope_id, &previous).await?;
    let tickets_today = tickets_on(db, scope_id, Utc::now().date_naive()).await?;

    let revenue_target = scope
        .revenue_target
        .unwrap_or(scope.capacity as f64 * 100.0);

    let days_until = scope
        .starts_at
        .map(|starts| (starts.date_naive() - Utc::now().date_naive()).num_days())
        .unwrap_or(0);

    Ok(OverviewStats {
        revenue: RevenueOverview {
            total: total_revenue,
            target: revenue_target,
            change_pct: pct_change(window_revenue, previous_revenue),
            progress_pct: if revenue_target > 0.0 {
                round2(total_revenue / revenue_target * 100.0)
            } else {
                0.0
            },
        },
        tickets: TicketOverview {
            sold: tickets_sold,
            capacity: scope.capacity,
            today: tickets_today,
            progress_pct: if scope.capacity > 0 {
                round2(tickets_sold as f64 / scope.capacity as f64 * 100.0)
            } else {
                0.0
            },
        },
        visits: VisitOverview {
            total: activity.visits,
            unique: activity.unique_visitors,
        },
        conversion: ConversionOverview {
            rate: rate_pct(activity.purchases, activity.unique_visitors),
            purchases: activity.purchases,
        },
        countdown: countdown(&scope, days_until),
    })
}

fn countdown(scope: &Scope, days_until: i64) -> ScopeCountdown {
    ScopeCountdown {
        days_until,
        status: scope.status.clone(),
        starts_at: scope
            .starts_at
            .map(|s| s.date_naive().format("%Y-%m-%d").to_string()),
    }
}

/// Fast path: sum daily bucket rows for the range.
async fn aggregated_activity(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<RangeActivity> {
    let conn = db.conn.lock().await;
    let (visits, unique_visitors, purchases): (i64, i64, i64) = conn
        .prepare(
            "SELECT CAST(COALESCE(SUM(page_views), 0) AS BIGINT), \
                    CAST(COALESCE(SUM(unique_visitors), 0) AS BIGINT), \
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
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
    Ok(RangeActivity {
        visits,
        unique_visitors,
        purchases,
    })
}

/// Slow path: derive from raw interaction rows.
///
/// Visit counts include rows whose event_type is NULL or '' — legacy
/// untagged rows predate typed tracking and have always been page views.
async fn derived_activity(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<RangeActivity> {
    let start = range.start.format("%Y-%m-%d").to_string();
    let end_next = (range.end + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();

    let conn = db.conn.lock().await;
    let (visits, unique_visitors): (i64, i64) = conn
        .prepare(
            "SELECT COUNT(*), COUNT(DISTINCT visitor_id) FROM events \
             WHERE scope_id = ?1 \
               AND (event_type = 'page_view' OR event_type IS NULL OR event_type = '') \
               AND (occurred_at >= ?2 AND occurred_at < ?3 OR occurred_at IS NULL)",
        )?
        .query_row(duckdb::params![scope_id, start, end_next], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
    let purchases: i64 = conn
        .prepare(
            "SELECT COUNT(*) FROM events \
             WHERE scope_id = ?1 AND event_type = 'purchase' \
               AND occurred_at >= ?2 AND occurred_at < ?3",
        )?
        .query_row(duckdb::params![scope_id, start, end_next], |row| row.get(0))?;

    Ok(RangeActivity {
        visits,
        unique_visitors,
        purchases,
    })
}

/// All-time settled revenue and ticket count.
async fn lifetime_sales(db: &DuckDbBackend, scope_id: &str) -> Result<(f64, i64)> {
    let conn = db.conn.lock().await;
    let row: (f64, i64) = conn
        .prepare(
            "SELECT COALESCE(SUM(total), 0), CAST(COALESCE(SUM(ticket_count), 0) AS BIGINT) \
             FROM orders \
             WHERE scope_id = ?1 AND status IN ('paid', 'confirmed', 'completed')",
        )?
        .query_row(duckdb::params![scope_id], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
    Ok(row)
}

/// Settled revenue and ticket count within a window (by paid_at).
async fn window_sales(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<(f64, i64)> {
    let start = range.start.format("%Y-%m-%d").to_string();
    let end_next = (range.end + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();
    let conn = db.conn.lock().await;
    let row: (f64, i64) = conn
        .prepare(
            "SELECT COALESCE(SUM(total), 0), CAST(COALESCE(SUM(ticket_count), 0) AS BIGINT) \
             FROM orders \
             WHERE scope_id = ?1 AND status IN ('paid', 'confirmed', 'completed') \
               AND paid_at >= ?2 AND paid_at < ?3",
        )?
        .query_row(duckdb::params![scope_id, start, end_next], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
    Ok(row)
}

async fn tickets_on(
    db: &DuckDbBackend,
    scope_id: &str,
    date: chrono::NaiveDate,
) -> Result<i64> {
    let start = date.format("%Y-%m-%d").to_string();
    let end_next = (date + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();
    let conn = db.conn.lock().await;
    let count: i64 = conn
        .prepare(
            "SELECT CAST(COALESCE(SUM(ticket_count), 0) AS BIGINT) FROM orders \
             WHERE scope_id = ?1 AND status IN ('paid', 'confirmed', 'completed') \
               AND paid_at >= ?2 AND paid_at < ?3",
        )?
        .query_row(duckdb::params![scope_id, start, end_next], |row| row.get(0))?;
    Ok(count)
}

impl DuckDbBackend {
    pub async fn get_overview_stats(
        &self,
        scope_id: &str,
        range: &DateRange,
    ) -> Result<OverviewStats> {
        get_overview_inner(self, scope_id, range).await
    }
}
