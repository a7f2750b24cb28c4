use anyhow::Result;
use chrono::{DateTime, Utc};

use stagelytics_core::event::compute_session_id;

use crate::backend::{ts_str, DuckDbBackend};

/// Result of a session lookup/create operation.
pub struct SessionResult {
    pub session_id: String,
    /// True when this call created a fresh session — the signal the
    /// aggregator uses to count a unique visitor.
    pub is_new: bool,
}

/// Look up or create a session for the given visitor on the given scope.
///
/// A session stays open while the visitor keeps interacting within
/// `window_minutes` of their last event; after that a new session starts.
pub(crate) async fn get_or_create_session_inner(
    db: &DuckDbBackend,
    visitor_id: &str,
    scope_id: &str,
    window_minutes: i64,
    now: DateTime<Utc>,
) -> Result<SessionResult> {
    let conn = db.conn.lock().await;
    let cutoff = now - chrono::Duration::minutes(window_minutes);
    let cutoff_str = ts_str(cutoff);
    let now_str = ts_str(now);

    let mut stmt = conn.prepare(
        "SELECT session_id, pageview_count FROM sessions \
         WHERE visitor_id = ?1 AND scope_id = ?2 AND last_seen > ?3 \
         ORDER BY last_seen DESC LIMIT 1",
    )?;

    let existing: Option<(String, i32)> = stmt
        .query_row(duckdb::params![visitor_id, scope_id, cutoff_str], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .ok();

    if let Some((session_id, pageview_count)) = existing {
        conn.execute(
            "UPDATE sessions SET last_seen = ?1, pageview_count = ?2 WHERE session_id = ?3",
            duckdb::params![now_str, pageview_count + 1, session_id],
        )?;
        return Ok(SessionResult {
            session_id,
            is_new: false,
        });
    }

    let session_id = compute_session_id(visitor_id, scope_id, now.timestamp_millis());

    conn.execute(
        "INSERT INTO sessions (session_id, scope_id, tenant_id, visitor_id, first_seen, last_seen, pageview_count) \
         VALUES (?1, ?2, NULL, ?3, ?4, ?5, 1) \
         ON CONFLICT (session_id) DO UPDATE SET last_seen = EXCLUDED.last_seen, pageview_count = sessions.pageview_count + 1",
        duckdb::params![session_id, scope_id, visitor_id, now_str, now_str],
    )?;

    Ok(SessionResult {
        session_id,
        is_new: true,
    })
}

impl DuckDbBackend {
    pub async fn get_or_create_session(
        &self,
        scope_id: &str,
        visitor_id: &str,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<SessionResult> {
        get_or_create_session_inner(self, visitor_id, scope_id, window_minutes, now).await
    }
}
