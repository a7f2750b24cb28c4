use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};

use stagelytics_core::analytics::{
    HourPoint, HourTotals, RealtimeSnapshot, RollupSource, WindowTotals,
};

use crate::backend::{ts_str, DuckDbBackend};

/// Per-hour counters keyed "YYYY-MM-DD_H".
#[derive(Debug, Clone, Copy, Default)]
struct HourRow {
    page_views: i64,
    unique_visitors: i64,
    purchases: i64,
    tickets_sold: i64,
    revenue_cents: i64,
}

pub async fn get_realtime_inner(
    db: &DuckDbBackend,
    scope_id: &str,
    now: DateTime<Utc>,
) -> Result<RealtimeSnapshot> {
    let scope = db.get_scope(scope_id).await?;
    let source = RollupSource::for_scope(scope.rollups_enabled);

    let by_hour = match source {
        RollupSource::Aggregated => hourly_bucket_rows(db, scope_id, now).await?,
        RollupSource::Derived => derived_hour_rows(db, scope_id, now).await?,
    };

    let today_key_prefix = now.date_naive().format("%Y-%m-%d").to_string();
    let current_key = hour_key(now);

    let current = by_hour.get(&current_key).copied().unwrap_or_default();
    let mut today = WindowTotals::default();
    let mut last_24h = WindowTotals::default();
    let mut chart = Vec::with_capacity(24);

    // Walk the trailing 24 hours oldest-first; the same pass accumulates
    // both window summaries and the chart series.
    for offset in (0..24).rev() {
        let slot = now - chrono::Duration::hours(offset);
        let key = hour_key(slot);
        let row = by_hour.get(&key).copied().unwrap_or_default();

        accumulate(&mut last_24h, &row);
        if key.starts_with(&today_key_prefix) {
            accumulate(&mut today, &row);
        }
        chart.push(HourPoint {
            hour: format!("{:02}:00", slot.hour()),
            page_views: row.page_views,
            purchases: row.purchases,
            revenue: row.revenue_cents as f64 / 100.0,
        });
    }

    Ok(RealtimeSnapshot {
        current_hour: HourTotals {
            page_views: current.page_views,
            unique_visitors: current.unique_visitors,
            purchases: current.purchases,
            revenue: current.revenue_cents as f64 / 100.0,
        },
        today,
        last_24h,
        hourly_chart: chart,
    })
}

fn hour_key(at: DateTime<Utc>) -> String {
    format!("{}_{}", at.date_naive().format("%Y-%m-%d"), at.hour())
}

fn accumulate(totals: &mut WindowTotals, row: &HourRow) {
    totals.page_views += row.page_views;
    totals.unique_visitors += row.unique_visitors;
    totals.purchases += row.purchases;
    totals.tickets_sold += row.tickets_sold;
    totals.revenue += row.revenue_cents as f64 / 100.0;
}

/// Fast path: the hourly counter buckets for the trailing 24 hours.
async fn hourly_bucket_rows(
    db: &DuckDbBackend,
    scope_id: &str,
    now: DateTime<Utc>,
) -> Result<HashMap<String, HourRow>> {
    let window_start = now - chrono::Duration::hours(24);
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        "SELECT CAST(date AS VARCHAR), hour, page_views, unique_visitors, \
                purchases, tickets_sold, revenue_cents \
         FROM analytics_hourly \
         WHERE scope_id = ?1 AND date >= ?2",
    )?;
    let rows = stmt.query_map(
        duckdb::params![
            scope_id,
            window_start.date_naive().format("%Y-%m-%d").to_string()
        ],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                HourRow {
                    page_views: row.get(2)?,
                    unique_visitors: row.get(3)?,
                    purchases: row.get(4)?,
                    tickets_sold: row.get(5)?,
                    revenue_cents: row.get(6)?,
                },
            ))
        },
    )?;

    let mut by_hour = HashMap::new();
    for row in rows {
        let (date, hour, counters) = row?;
        by_hour.insert(format!("{date}_{hour}"), counters);
    }
    Ok(by_hour)
}

/// Slow path: group raw rows by hour across the trailing 24 hours.
async fn derived_hour_rows(
    db: &DuckDbBackend,
    scope_id: &str,
    now: DateTime<Utc>,
) -> Result<HashMap<String, HourRow>> {
    let window_start = ts_str(now - chrono::Duration::hours(24));
    let conn = db.conn.lock().await;

    let mut by_hour: HashMap<String, HourRow> = HashMap::new();

    let mut stmt = conn.prepare(
        "SELECT CAST(CAST(occurred_at AS DATE) AS VARCHAR), \
                EXTRACT(hour FROM occurred_at), \
                COUNT(CASE WHEN event_type = 'page_view' THEN 1 END), \
                COUNT(DISTINCT CASE WHEN event_type = 'page_view' THEN visitor_id END), \
                COUNT(CASE WHEN event_type = 'purchase' THEN 1 END) \
         FROM events \
         WHERE scope_id = ?1 AND occurred_at >= ?2 \
         GROUP BY 1, 2",
    )?;
    let rows = stmt.query_map(duckdb::params![scope_id, window_start], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;
    for row in rows {
        let (date, hour, page_views, unique_visitors, purchases) = row?;
        let entry = by_hour.entry(format!("{date}_{hour}")).or_default();
        entry.page_views = page_views;
        entry.unique_visitors = unique_visitors;
        entry.purchases = purchases;
    }

    let mut stmt = conn.prepare(
        "SELECT CAST(CAST(paid_at AS DATE) AS VARCHAR), \
                EXTRACT(hour FROM paid_at), \
                CAST(SUM(ticket_count) AS BIGINT), CAST(ROUND(SUM(total) * 100) AS BIGINT) \
         FROM orders \
         WHERE scope_id = ?1 AND status IN ('paid', 'confirmed', 'completed') \
           AND paid_at >= ?2 \
         GROUP BY 1, 2",
    )?;
    let rows = stmt.query_map(duckdb::params![scope_id, window_start], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;
    for row in rows {
        let (date, hour, tickets_sold, revenue_cents) = row?;
        let entry = by_hour.entry(format!("{date}_{hour}")).or_default();
        entry.tickets_sold = tickets_sold;
        entry.revenue_cents = revenue_cents;
    }

    Ok(by_hour)
}

impl DuckDbBackend {
    pub async fn get_realtime_snapshot(&self, scope_id: &str) -> Result<RealtimeSnapshot> {
        get_realtime_inner(self, scope_id, Utc::now()).await
    }

    /// Clock-injected variant for tests.
    pub async fn get_realtime_snapshot_at(
        &self,
        scope_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RealtimeSnapshot> {
        get_realtime_inner(self, scope_id, now).await
    }
}
