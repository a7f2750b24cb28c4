use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use stagelytics_core::analytics::{DateRange, RollupSource, TopLocation};

use crate::backend::DuckDbBackend;

fn country_flag(code: &str) -> &'static str {
    match code {
        "RO" => "🇷🇴",
        "HU" => "🇭🇺",
        "AT" => "🇦🇹",
        "DE" => "🇩🇪",
        "GB" => "🇬🇧",
        "FR" => "🇫🇷",
        "IT" => "🇮🇹",
        "ES" => "🇪🇸",
        "NL" => "🇳🇱",
        "BE" => "🇧🇪",
        "PL" => "🇵🇱",
        "CZ" => "🇨🇿",
        "BG" => "🇧🇬",
        "MD" => "🇲🇩",
        "UA" => "🇺🇦",
        "RS" => "🇷🇸",
        "US" => "🇺🇸",
        _ => "🌍",
    }
}

/// City-level purchase tally, also the JSON snapshot shape the daily rollup
/// stores in `analytics_daily.top_locations`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct LocationTally {
    pub city: String,
    pub country_code: String,
    pub purchases: i64,
    pub revenue: f64,
}

pub async fn get_top_locations_inner(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
    limit: i64,
) -> Result<Vec<TopLocation>> {
    let scope = db.get_scope(scope_id).await?;
    let source = RollupSource::for_scope(scope.rollups_enabled);

    let mut tallies = match source {
        RollupSource::Aggregated => {
            let merged = merged_daily_tallies(db, scope_id, range).await?;
            if merged.is_empty() {
                derived_tallies(db, scope_id, range, limit).await?
            } else {
                merged
            }
        }
        RollupSource::Derived => derived_tallies(db, scope_id, range, limit).await?,
    };
    tallies.truncate(limit as usize);

    Ok(tallies
        .into_iter()
        .map(|t| TopLocation {
            flag: country_flag(&t.country_code).to_string(),
            city: t.city,
            country_code: t.country_code,
            purchases: t.purchases,
            revenue: t.revenue,
        })
        .collect())
}

/// Derived arm: purchase events with a known city, ranked by count.
pub(crate) async fn derived_tallies(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
    limit: i64,
) -> Result<Vec<LocationTally>> {
    let start = range.start.format("%Y-%m-%d").to_string();
    let end_next = (range.end + chrono::Duration::days(1))
        .format("%Y-%m-%d")
        .to_string();

    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        "SELECT city, COALESCE(country_code, 'RO'), COUNT(*), COALESCE(SUM(value), 0) \
         FROM events \
         WHERE scope_id = ?1 AND event_type = 'purchase' AND city IS NOT NULL \
           AND (occurred_at >= ?2 AND occurred_at < ?3 OR occurred_at IS NULL) \
         GROUP BY city, country_code \
         ORDER BY COUNT(*) DESC \
         LIMIT ?4",
    )?;
    let rows = stmt.query_map(
        duckdb::params![scope_id, start, end_next, limit],
        |row| {
            Ok(LocationTally {
                city: row.get(0)?,
                country_code: row.get(1)?,
                purchases: row.get(2)?,
                revenue: row.get(3)?,
            })
        },
    )?;

    let mut tallies = Vec::new();
    for row in rows {
        tallies.push(row?);
    }
    Ok(tallies)
}

/// Aggregated arm: merge daily JSON snapshots, re-rank by purchases.
async fn merged_daily_tallies(
    db: &DuckDbBackend,
    scope_id: &str,
    range: &DateRange,
) -> Result<Vec<LocationTally>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        "SELECT top_locations FROM analytics_daily \
         WHERE scope_id = ?1 AND date >= ?2 AND date <= ?3 \
           AND top_locations IS NOT NULL",
    )?;
    let rows = stmt.query_map(
        duckdb::params![
            scope_id,
            range.start.format("%Y-%m-%d").to_string(),
            range.end.format("%Y-%m-%d").to_string()
        ],
        |row| row.get::<_, String>(0),
    )?;

    let mut merged: HashMap<(String, String), LocationTally> = HashMap::new();
    for row in rows {
        let snapshot: Vec<LocationTally> = serde_json::from_str(&row?)?;
        for tally in snapshot {
            let key = (tally.city.clone(), tally.country_code.clone());
            let entry = merged.entry(key).or_insert_with(|| LocationTally {
                city: tally.city.clone(),
                country_code: tally.country_code.clone(),
                ..Default::default()
            });
            entry.purchases += tally.purchases;
            entry.revenue += tally.revenue;
        }
    }

    let mut tallies: Vec<LocationTally> = merged.into_values().collect();
    tallies.sort_by(|a, b| b.purchases.cmp(&a.purchases));
    Ok(tallies)
}

impl DuckDbBackend {
    pub async fn get_top_locations(
        &self,
        scope_id: &str,
        range: &DateRange,
        limit: i64,
    ) -> Result<Vec<TopLocation>> {
        get_top_locations_inner(self, scope_id, range, limit).await
    }
}
