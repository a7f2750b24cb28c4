use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use stagelytics_core::analytics::{round2, DateRange, RollupSource, TrafficSource};

use crate::backend::DuckDbBackend;

/// Display metadata per known source category; unknown categories fall back
/// to the Direct styling.
fn source_display(name: &str) -> (&'static str, &'static str) {
    match name {
        "Facebook" => ("📘", "#1877f2"),
        "Google" => ("🔍", "#ea4335"),
        "Instagram" => ("📸", "#e4405f"),
        "TikTok" => ("🎵", "#000000"),
        "Email" => ("📧", "#f59e0b"),
        "Organic" => ("🌱", "#22c55e"),
        _ => ("🔗", "#6b7280"),
    }
}

/// Categorization CASE shared by the derived arm and the daily rollup job.
/// Priority: click-id > UTM source > referrer-host pattern > Direct.
pub(crate) const SOURCE_CASE_SQL: &str = "
    CASE
        WHEN fbclid IS NOT NULL OR utm_source = 'facebook' THEN 'Facebook'
        WHEN gclid IS NOT NULL OR utm_source = 'google' THEN 'Google'
        WHEN utm_source = 'instagram' OR referrer LIKE '%instagram%' THEN 'Instagram'
        WHEN ttclid IS NOT NULL OR utm_source = 'tiktok' THEN 'TikTok'
        WHEN utm_medium = 'email' THEN 'Email'
        WHEN referrer IS NULL OR referrer = '' THEN 'Direct'
        ELSE 'Organic'
    END";

/// Raw per-source tallies before percentages are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct SourceTally {
    pub name: String,
    pub visitors: i64,
    pub conversions: i64,
    pub revenue: f64,
}

pub async fn get_traffic_sources_inner(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<Vec<TrafficSource>> {
    let scope = db.get_scope(scope_id).await?;
    let source = RollupSource::for_scope(scope.rollups_enabled);

    let tallies = match source {
        RollupSource::Aggregated => {
            let merged = merged_daily_tallies(db, scope_id, range).await?;
            if merged.is_empty() {
                derived_tallies(db, scope_id, range).await?
            } else {
                merged
            }
        }
        RollupSource::Derived => derived_tallies(db, scope_id, range).await?,
    };

    let total_visitors: i64 = tallies.iter().map(|t| t.visitors).sum();
    Ok(tallies
        .into_iter()
        .map(|t| {
            let (icon, color) = source_display(&t.name);
            TrafficSource {
                icon: icon.to_string(),
                color: color.to_string(),
                percent: if total_visitors > 0 {
                    round2(t.visitors as f64 / total_visitors as f64 * 100.0)
                } else {
                    0.0
                },
                name: t.name,
                visitors: t.visitors,
                conversions: t.conversions,
                revenue: t.revenue,
            }
        })
        .collect())
}

/// Derived arm: categorize raw interaction rows, one pass.
pub(crate) async fn derived_tallies(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<Vec<SourceTally>> {
    let start = range.start.format("%Y-%m-%d").to_string();
    let end_next = (range.end + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();

    let conn = db.conn.lock().await;
    let sql = format!(
        "SELECT {SOURCE_CASE_SQL} AS source, \
                COUNT(DISTINCT visitor_id) AS visitors, \
                COUNT(CASE WHEN event_type = 'purchase' THEN 1 END) AS conversions, \
                COALESCE(SUM(CASE WHEN event_type = 'purchase' THEN value ELSE 0 END), 0) AS revenue \
         FROM events \
         WHERE scope_id = ?1 \
           AND (occurred_at >= ?2 AND occurred_at < ?3 OR occurred_at IS NULL) \
         GROUP BY source \
         ORDER BY visitors DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(duckdb::params![scope_id, start, end_next], |row| {
        Ok(SourceTally {
            name: row.get(0)?,
            visitors: row.get(1)?,
            conversions: row.get(2)?,
            revenue: row.get(3)?,
        })
    })?;

    let mut tallies = Vec::new();
    for row in rows {
        tallies.push(row?);
    }
    Ok(tallies)
}

/// Aggregated arm: merge the JSON snapshots the daily rollup job stored.
async fn merged_daily_tallies(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<Vec<SourceTally>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        "SELECT traffic_sources FROM analytics_daily \
         WHERE scope_id = ?1 AND date >= ?2 AND date <= ?3 \
           AND traffic_sources IS NOT NULL",
    )?;
    let rows = stmt.query_map(
        duckdb::params![
            scope_id,
            range.start.format("%Y-%m-%d").to_string(),
            range.end.format("%Y-%m-%d").to_string()
        ],
        |row| row.get::<_, String>(0),
    )?;

    let mut merged: HashMap<String, SourceTally> = HashMap::new();
    for row in rows {
        let snapshot: Vec<SourceTally> = serde_json::from_str(&row?)?;
        for tally in snapshot {
            let entry = merged.entry(tally.name.clone()).or_insert_with(|| SourceTally {
                name: tally.name.clone(),
                ..Default::default()
            });
            entry.visitors += tally.visitors;
            entry.conversions += tally.conversions;
            entry.revenue += tally.revenue;
        }
    }

    let mut tallies: Vec<SourceTally> = merged.into_values().collect();
    tallies.sort_by(|a, b| b.visitors.cmp(&a.visitors));
    Ok(tallies)
}

impl DuckDbBackend {
    pub async fn get_traffic_sources(
        &self,
        scope_id: &str,
        range: &DateRange,
    ) -> Result<Vec<TrafficSource>> {
        get_traffic_sources_inner(self, scope_id, range).await
    }
}
