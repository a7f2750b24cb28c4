use anyhow::Result;

use stagelytics_core::analytics::{
    pct_change, rate_pct, DateRange, PeriodChanges, PeriodComparison, PeriodTotals, RollupSource,
};

use crate::backend::DuckDbBackend;

pub async fn get_comparison_inner(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<PeriodComparison> {
    let scope = db.get_scope(scope_id).await?;
    let source = RollupSource::for_scope(scope.rollups_enabled);
    let previous_range = range.previous();

    let (current, previous) = match source {
        RollupSource::Aggregated => (
            aggregated_totals(db, scope_id, range).await?,
            aggregated_totals(db, scope_id, &previous_range).await?,
        ),
        RollupSource::Derived => (
            derived_totals(db, scope_id, range).await?,
            derived_totals(db, scope_id, &previous_range).await?,
        ),
    };

    let changes = PeriodChanges {
        revenue_pct: pct_change(current.revenue, previous.revenue),
        visitors_pct: pct_change(current.visitors as f64, previous.visitors as f64),
        purchases_pct: pct_change(current.purchases as f64, previous.purchases as f64),
    };

    Ok(PeriodComparison {
        current,
        previous,
        changes,
    })
}

async fn aggregated_totals(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<PeriodTotals> {
    let conn = db.conn.lock().await;
    let (revenue, visitors, purchases): (f64, i64, i64) = conn
        .prepare(
            "SELECT COALESCE(SUM(revenue), 0), \
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
    Ok(PeriodTotals {
        revenue,
        visitors,
        purchases,
        conversion_rate: rate_pct(purchases, visitors),
    })
}

async fn derived_totals(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<PeriodTotals> {
    let start = range.start.format("%Y-%m-%d").to_string();
    let end_next = (range.end + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();

    let conn = db.conn.lock().await;
    let revenue: f64 = conn
        .prepare(
            "SELECT COALESCE(SUM(total), 0) FROM orders \
             WHERE scope_id = ?1 AND status IN ('paid', 'confirmed', 'completed') \
               AND paid_at >= ?2 AND paid_at < ?3",
        )?
        .query_row(duckdb::params![scope_id, start, end_next], |row| row.get(0))?;
    let visitors: i64 = conn
        .prepare(
            "SELECT COUNT(DISTINCT visitor_id) FROM events \
             WHERE scope_id = ?1 \
               AND (event_type = 'page_view' OR event_type IS NULL OR event_type = '') \
               AND occurred_at >= ?2 AND occurred_at < ?3",
        )?
        .query_row(duckdb::params![scope_id, start, end_next], |row| row.get(0))?;
    let purchases: i64 = conn
        .prepare(
            "SELECT COUNT(*) FROM events \
             WHERE scope_id = ?1 AND event_type = 'purchase' \
               AND occurred_at >= ?2 AND occurred_at < ?3",
        )?
        .query_row(duckdb::params![scope_id, start, end_next], |row| row.get(0))?;

    Ok(PeriodTotals {
        revenue,
        visitors,
        purchases,
        conversion_rate: rate_pct(purchases, visitors),
    })
}

impl DuckDbBackend {
    pub async fn get_period_comparison(
        &self,
        scope_id: &str,
        range: &DateRange,
    ) -> Result<PeriodComparison> {
        get_comparison_inner(self, scope_id, range).await
    }
}
