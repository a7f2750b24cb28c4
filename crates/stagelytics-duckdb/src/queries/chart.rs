use std::collections::HashMap;

use anyhow::Result;

use stagelytics_core::analytics::{ChartPoint, DateRange, RollupSource};

use crate::backend::DuckDbBackend;

/// Day-level counters collected by either arm before zero-filling.
#[derive(Debug, Clone, Copy, Default)]
struct DayTotals {
    revenue: f64,
    tickets: i64,
    visits: i64,
    unique_visitors: i64,
    purchases: i64,
}

pub async fn get_chart_inner(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<Vec<ChartPoint>> {
    let scope = db.get_scope(scope_id).await?;
    let source = RollupSource::for_scope(scope.rollups_enabled);

    let by_day = match source {
        RollupSource::Aggregated => {
            let rows = aggregated_days(db, scope_id, range).await?;
            // Scopes enable rollups before the first rollup run; until a
            // daily row exists the raw rows are still the only truth.
            if rows.is_empty() {
                derived_days(db, scope_id, range).await?
            } else {
                rows
            }
        }
        RollupSource::Derived => derived_days(db, scope_id, range).await?,
    };

    // Zero-fill: one row per calendar day, no day may be omitted.
    let mut series = Vec::with_capacity(range.days() as usize);
    let mut current = range.start;
    while current <= range.end {
        let key = current.format("%Y-%m-%d").to_string();
        let totals = by_day.get(&key).copied().unwrap_or_default();
        series.push(ChartPoint {
            date: key,
            revenue: totals.revenue,
            tickets: totals.tickets,
            visits: totals.visits,
            unique_visitors: totals.unique_visitors,
            purchases: totals.purchases,
        });
        current += chrono::Duration::days(1);
    }
    Ok(series)
}

async fn aggregated_days(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<HashMap<String, DayTotals>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        "SELECT CAST(date AS VARCHAR), revenue, tickets_sold, page_views, \
                unique_visitors, purchases_count \
         FROM analytics_daily \
         WHERE scope_id = ?1 AND date >= ?2 AND date <= ?3",
    )?;
    let rows = stmt.query_map(
        duckdb::params![
            scope_id,
            range.start.format("%Y-%m-%d").to_string(),
            range.end.format("%Y-%m-%d").to_string()
        ],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                DayTotals {
                    revenue: row.get(1)?,
                    tickets: row.get(2)?,
                    visits: row.get(3)?,
                    unique_visitors: row.get(4)?,
                    purchases: row.get(5)?,
                },
            ))
        },
    )?;

    let mut by_day = HashMap::new();
    for row in rows {
        let (date, totals) = row?;
        by_day.insert(date, totals);
    }
    Ok(by_day)
}

async fn derived_days(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<HashMap<String, DayTotals>> {
    let start = range.start.format("%Y-%m-%d").to_string();
    let end_next = (range.end + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();

    let conn = db.conn.lock().await;
    let mut by_day: HashMap<String, DayTotals> = HashMap::new();

    // Settled orders give revenue, tickets and purchase counts.
    let mut stmt = conn.prepare(
        "SELECT CAST(CAST(paid_at AS DATE) AS VARCHAR), \
                SUM(total), CAST(SUM(ticket_count) AS BIGINT), COUNT(*) \
         FROM orders \
         WHERE scope_id = ?1 AND status IN ('paid', 'confirmed', 'completed') \
           AND paid_at >= ?2 AND paid_at < ?3 \
         GROUP BY 1",
    )?;
    let rows = stmt.query_map(duckdb::params![scope_id, start, end_next], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, f64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;
    for row in rows {
        let (date, revenue, tickets, purchases) = row?;
        let entry = by_day.entry(date).or_default();
        entry.revenue = revenue;
        entry.tickets = tickets;
        entry.purchases = purchases;
    }

    // Interaction rows give visits; the legacy untyped rows count as views.
    let mut stmt = conn.prepare(
        "SELECT CAST(CAST(occurred_at AS DATE) AS VARCHAR), \
                COUNT(*), COUNT(DISTINCT visitor_id) \
         FROM events \
         WHERE scope_id = ?1 \
           AND (event_type = 'page_view' OR event_type IS NULL OR event_type = '') \
           AND occurred_at >= ?2 AND occurred_at < ?3 \
         GROUP BY 1",
    )?;
    let rows = stmt.query_map(duckdb::params![scope_id, start, end_next], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    for row in rows {
        let (date, visits, unique_visitors) = row?;
        let entry = by_day.entry(date).or_default();
        entry.visits = visits;
        entry.unique_visitors = unique_visitors;
    }

    Ok(by_day)
}

impl DuckDbBackend {
    pub async fn get_chart_data(
        &self,
        scope_id: &str,
        range: &DateRange,
    ) -> Result<Vec<ChartPoint>> {
        get_chart_inner(self, scope_id, range).await
    }
}
