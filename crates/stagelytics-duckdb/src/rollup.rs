//! Daily / weekly / monthly rollup jobs.
//!
//! Each job derives one bucket row wholesale from raw rows (or from daily
//! buckets, for the coarser granularities) and upserts it, so re-running a
//! job for the same period is always safe. These are invoked by an external
//! periodic trigger; the engine never depends on them having run — the
//! query layer falls back to raw derivation when buckets are missing.

use anyhow::Result;
use chrono::{Datelike, NaiveDate, Utc};
use tracing::info;

use stagelytics_core::analytics::{rate_pct, round2, DateRange};

use crate::backend::{ts_str, DuckDbBackend};
use crate::queries::{locations, traffic};

impl DuckDbBackend {
    /// Derive and upsert the daily bucket for (scope, date).
    pub async fn aggregate_daily(&self, scope_id: &str, date: NaiveDate) -> Result<()> {
        let range = DateRange {
            start: date,
            end: date,
        };
        let start = date.format("%Y-%m-%d").to_string();
        let end_next = (date + chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();

        let traffic_json =
            serde_json::to_string(&traffic::derived_tallies(self, scope_id, &range).await?)?;
        let locations_json = serde_json::to_string(
            &locations::derived_tallies(self, scope_id, &range, 5).await?,
        )?;

        let conn = self.conn.lock().await;

        let (page_views, unique_visitors, sessions): (i64, i64, i64) = conn
            .prepare(
                "SELECT COUNT(CASE WHEN event_type = 'page_view' THEN 1 END), \
                        COUNT(DISTINCT CASE WHEN event_type = 'page_view' THEN visitor_id END), \
                        COUNT(DISTINCT session_id) \
                 FROM events \
                 WHERE scope_id = ?1 AND occurred_at >= ?2 AND occurred_at < ?3",
            )?
            .query_row(duckdb::params![scope_id, start, end_next], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;

        let add_to_cart: i64 = conn
            .prepare(
                "SELECT COUNT(DISTINCT session_id) FROM events \
                 WHERE scope_id = ?1 AND event_type = 'add_to_cart' \
                   AND occurred_at >= ?2 AND occurred_at < ?3",
            )?
            .query_row(duckdb::params![scope_id, start, end_next], |row| row.get(0))?;
        let checkout_started: i64 = conn
            .prepare(
                "SELECT COUNT(DISTINCT session_id) FROM events \
                 WHERE scope_id = ?1 AND event_type = 'begin_checkout' \
                   AND occurred_at >= ?2 AND occurred_at < ?3",
            )?
            .query_row(duckdb::params![scope_id, start, end_next], |row| row.get(0))?;

        let (purchases, revenue, tickets_sold): (i64, f64, i64) = conn
            .prepare(
                "SELECT COUNT(*), COALESCE(SUM(total), 0), CAST(COALESCE(SUM(ticket_count), 0) AS BIGINT) \
                 FROM orders \
                 WHERE scope_id = ?1 AND status IN ('paid', 'confirmed', 'completed') \
                   AND paid_at >= ?2 AND paid_at < ?3",
            )?
            .query_row(duckdb::params![scope_id, start, end_next], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;

        let conversion_rate = rate_pct(purchases, unique_visitors);
        let avg_order_value = if purchases > 0 {
            round2(revenue / purchases as f64)
        } else {
            0.0
        };

        conn.execute(
            r#"INSERT INTO analytics_daily (
                scope_id, date, page_views, unique_visitors, sessions,
                add_to_cart_count, checkout_started_count, purchases_count,
                conversion_rate, revenue, tickets_sold, avg_order_value,
                traffic_sources, top_locations, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT (scope_id, date) DO UPDATE SET
                page_views = excluded.page_views,
                unique_visitors = excluded.unique_visitors,
                sessions = excluded.sessions,
                add_to_cart_count = excluded.add_to_cart_count,
                checkout_started_count = excluded.checkout_started_count,
                purchases_count = excluded.purchases_count,
                conversion_rate = excluded.conversion_rate,
                revenue = excluded.revenue,
                tickets_sold = excluded.tickets_sold,
                avg_order_value = excluded.avg_order_value,
                traffic_sources = excluded.traffic_sources,
                top_locations = excluded.top_locations,
                updated_at = excluded.updated_at"#,
            duckdb::params![
                scope_id,
                start,
                page_views,
                unique_visitors,
                sessions,
                add_to_cart,
                checkout_started,
                purchases,
                conversion_rate,
                revenue,
                tickets_sold,
                avg_order_value,
                traffic_json,
                locations_json,
                ts_str(Utc::now()),
            ],
        )?;

        info!(scope_id, date = %start, "daily rollup refreshed");
        Ok(())
    }

    /// Sum seven daily buckets into the weekly row starting `week_start`
    /// (callers pass a Monday). Revenue change compares the previous week's
    /// bucket when present.
    pub async fn aggregate_weekly(&self, scope_id: &str, week_start: NaiveDate) -> Result<()> {
        self.aggregate_span(
            scope_id,
            week_start,
            week_start + chrono::Duration::days(6),
            "analytics_weekly",
            "week_start",
            week_start - chrono::Duration::days(7),
        )
        .await
    }

    /// Sum a calendar month of daily buckets into the monthly row.
    pub async fn aggregate_monthly(&self, scope_id: &str, month_start: NaiveDate) -> Result<()> {
        let next_month = if month_start.month() == 12 {
            NaiveDate::from_ymd_opt(month_start.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(month_start.year(), month_start.month() + 1, 1)
        }
        .unwrap_or(month_start);
        let prev_month = if month_start.month() == 1 {
            NaiveDate::from_ymd_opt(month_start.year() - 1, 12, 1)
        } else {
            NaiveDate::from_ymd_opt(month_start.year(), month_start.month() - 1, 1)
        }
        .unwrap_or(month_start);

        self.aggregate_span(
            scope_id,
            month_start,
            next_month - chrono::Duration::days(1),
            "analytics_monthly",
            "month_start",
            prev_month,
        )
        .await
    }

    async fn aggregate_span(
        &self,
        scope_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        table: &str,
        period_column: &str,
        previous_start: NaiveDate,
    ) -> Result<()> {
        let start_str = start.format("%Y-%m-%d").to_string();
        let end_str = end.format("%Y-%m-%d").to_string();

        let conn = self.conn.lock().await;
        let (page_views, unique_visitors, purchases, revenue, tickets_sold): (
            i64,
            i64,
            i64,
            f64,
            i64,
        ) = conn
            .prepare(
                "SELECT CAST(COALESCE(SUM(page_views), 0) AS BIGINT), \
                        CAST(COALESCE(SUM(unique_visitors), 0) AS BIGINT), \
                        CAST(COALESCE(SUM(purchases_count), 0) AS BIGINT), \
                        COALESCE(SUM(revenue), 0), \
                        CAST(COALESCE(SUM(tickets_sold), 0) AS BIGINT) \
                 FROM analytics_daily \
                 WHERE scope_id = ?1 AND date >= ?2 AND date <= ?3",
            )?
            .query_row(duckdb::params![scope_id, start_str, end_str], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?;

        // table/period_column are fixed by the two public callers above.
        let previous_revenue: f64 = conn
            .prepare(&format!(
                "SELECT COALESCE(SUM(revenue), 0) FROM {table} \
                 WHERE scope_id = ?1 AND {period_column} = ?2"
            ))?
            .query_row(
                duckdb::params![scope_id, previous_start.format("%Y-%m-%d").to_string()],
                |row| row.get(0),
            )?;

        let revenue_change_pct = if previous_revenue > 0.0 {
            round2((revenue - previous_revenue) / previous_revenue * 100.0)
        } else {
            0.0
        };

        let sql = format!(
            "INSERT INTO {table} ( \
                scope_id, {period_column}, page_views, unique_visitors, purchases, \
                revenue, tickets_sold, conversion_rate, revenue_change_pct, updated_at \
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
            ON CONFLICT (scope_id, {period_column}) DO UPDATE SET \
                page_views = excluded.page_views, \
                unique_visitors = excluded.unique_visitors, \
                purchases = excluded.purchases, \
                revenue = excluded.revenue, \
                tickets_sold = excluded.tickets_sold, \
                conversion_rate = excluded.conversion_rate, \
                revenue_change_pct = excluded.revenue_change_pct, \
                updated_at = excluded.updated_at"
        );
        conn.execute(
            &sql,
            duckdb::params![
                scope_id,
                start_str,
                page_views,
                unique_visitors,
                purchases,
                revenue,
                tickets_sold,
                rate_pct(purchases, unique_visitors),
                revenue_change_pct,
                ts_str(Utc::now()),
            ],
        )?;
        Ok(())
    }
}
