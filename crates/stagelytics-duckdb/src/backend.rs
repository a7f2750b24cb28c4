use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::info;

use stagelytics_core::event::InteractionEvent;
use stagelytics_core::order::{Order, OrderStatus};

use crate::schema::init_sql;

/// Generate a cryptographically random hex string of `n` bytes (2n hex chars).
pub(crate) fn rand_hex(n: usize) -> String {
    use rand::RngCore;
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

pub(crate) const TS_FMT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub(crate) fn ts_str(dt: DateTime<Utc>) -> String {
    dt.format(TS_FMT).to_string()
}

/// Parse a timestamp string as DuckDB renders it via `CAST(col AS VARCHAR)`.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, TS_FMT)
        .map_err(|e| anyhow!("unparseable timestamp {raw:?}: {e}"))?;
    Ok(naive.and_utc())
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| anyhow!("unparseable date {raw:?}: {e}"))
}

/// A DuckDB backend for Stagelytics.
///
/// DuckDB is single-writer: concurrent reads are fine, but concurrent writes
/// cause contention. We wrap the connection in `Arc<Mutex<_>>` so the async
/// runtime serialises all writes while the struct stays cheaply cloneable
/// and shareable across request handlers. The mutex is also what makes the
/// attribution set-if-null write race-free within one process; the
/// conditional `WHERE attributed_campaign_id IS NULL` guard covers
/// multi-process deployments.
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`,
    /// read from `Config.duckdb_memory_limit` at the call site. Runs the
    /// idempotent schema init SQL so all tables and indexes exist.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        info!("DuckDB opened at {} with memory_limit={}", path, memory_limit);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an **in-memory** DuckDB database.
    ///
    /// Intended for unit tests only — data is discarded when the struct is
    /// dropped.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&init_sql("1GB"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a batch of interaction events in a single transaction.
    ///
    /// Events arrive already validated and deduplicated from the ingestion
    /// boundary. Returns immediately (no-op) if `events` is empty.
    pub async fn insert_events(&self, events: &[InteractionEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().await;

        // One transaction for the whole batch: one fsync instead of N.
        let tx = conn.transaction()?;
        for event in events {
            tx.execute(
                r#"INSERT INTO events (
                    id, scope_id, tenant_id, session_id, visitor_id,
                    event_type, occurred_at, value, quantity, order_id,
                    content_id, page_title, referrer,
                    utm_source, utm_medium, utm_campaign, utm_term, utm_content,
                    gclid, fbclid, ttclid,
                    device_type, country_code, region, city, latitude, longitude,
                    attributed_campaign_id
                ) VALUES (
                    ?1,  ?2,  ?3,  ?4,  ?5,
                    ?6,  ?7,  ?8,  ?9,  ?10,
                    ?11, ?12, ?13,
                    ?14, ?15, ?16, ?17, ?18,
                    ?19, ?20, ?21,
                    ?22, ?23, ?24, ?25, ?26, ?27,
                    ?28
                )"#,
                duckdb::params![
                    event.id,
                    event.scope_id,
                    event.tenant_id,
                    event.session_id,
                    event.visitor_id,
                    event.event_type,
                    ts_str(event.occurred_at),
                    event.value,
                    event.quantity,
                    event.order_id,
                    event.content_id,
                    event.page_title,
                    event.referrer,
                    event.utm_source,
                    event.utm_medium,
                    event.utm_campaign,
                    event.utm_term,
                    event.utm_content,
                    event.gclid,
                    event.fbclid,
                    event.ttclid,
                    event.device_type,
                    event.country_code,
                    event.region,
                    event.city,
                    event.latitude,
                    event.longitude,
                    event.attributed_campaign_id,
                ],
            )?;
        }
        tx.commit()?;
        tracing::info!("Inserted {} events", events.len());
        Ok(())
    }

    /// Upsert an order row from the payment boundary's notification.
    ///
    /// Every lifecycle notification carries the full current order state;
    /// on conflict all mutable fields are replaced while
    /// `attributed_campaign_id` is deliberately left untouched — attribution
    /// history survives status transitions.
    pub async fn upsert_order(&self, order: &Order) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO orders (
                id, scope_id, tenant_id, status, total, ticket_count,
                visitor_id, session_id,
                utm_source, utm_medium, utm_campaign, gclid, fbclid, ttclid,
                country_code, city, created_at, paid_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8,
                ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18
            )
            ON CONFLICT (id) DO UPDATE SET
                status = excluded.status,
                total = excluded.total,
                ticket_count = excluded.ticket_count,
                visitor_id = excluded.visitor_id,
                session_id = excluded.session_id,
                utm_source = excluded.utm_source,
                utm_medium = excluded.utm_medium,
                utm_campaign = excluded.utm_campaign,
                gclid = excluded.gclid,
                fbclid = excluded.fbclid,
                ttclid = excluded.ttclid,
                country_code = excluded.country_code,
                city = excluded.city,
                paid_at = excluded.paid_at"#,
            duckdb::params![
                order.id,
                order.scope_id,
                order.tenant_id,
                order.status.as_str(),
                order.total,
                order.ticket_count,
                order.visitor_id,
                order.session_id,
                order.utm_source,
                order.utm_medium,
                order.utm_campaign,
                order.gclid,
                order.fbclid,
                order.ttclid,
                order.country_code,
                order.city,
                ts_str(order.created_at),
                order.paid_at.map(ts_str),
            ],
        )?;
        Ok(())
    }

    /// Load a single order, or `None` when the id is unknown.
    pub async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT id, scope_id, tenant_id, status, total, ticket_count,
                      visitor_id, session_id,
                      utm_source, utm_medium, utm_campaign, gclid, fbclid, ttclid,
                      country_code, city,
                      CAST(created_at AS VARCHAR), CAST(paid_at AS VARCHAR)
               FROM orders WHERE id = ?1"#,
        )?;
        let row = stmt
            .query_row(duckdb::params![order_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, Option<String>>(11)?,
                    row.get::<_, Option<String>>(12)?,
                    row.get::<_, Option<String>>(13)?,
                    row.get::<_, Option<String>>(14)?,
                    row.get::<_, Option<String>>(15)?,
                    row.get::<_, String>(16)?,
                    row.get::<_, Option<String>>(17)?,
                ))
            })
            .ok();

        let Some(row) = row else {
            return Ok(None);
        };
        let status = OrderStatus::parse(&row.3)
            .ok_or_else(|| anyhow!("unknown order status {:?}", row.3))?;
        Ok(Some(Order {
            id: row.0,
            scope_id: row.1,
            tenant_id: row.2,
            status,
            total: row.4,
            ticket_count: row.5,
            visitor_id: row.6,
            session_id: row.7,
            utm_source: row.8,
            utm_medium: row.9,
            utm_campaign: row.10,
            gclid: row.11,
            fbclid: row.12,
            ttclid: row.13,
            country_code: row.14,
            city: row.15,
            created_at: parse_ts(&row.16)?,
            paid_at: row.17.as_deref().map(parse_ts).transpose()?,
        }))
    }

    /// Execute `SELECT 1` as a lightweight liveness check.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    /// Acquire the DuckDB connection lock for direct queries.
    ///
    /// Intended for integration tests that need to verify stored data.
    /// Production code should use the typed methods.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

/// Map a full `events` row (column order as in [`EVENT_COLUMNS_SQL`]) into an
/// [`InteractionEvent`].
pub(crate) fn map_event_row(row: &duckdb::Row<'_>) -> duckdb::Result<RawEventRow> {
    Ok(RawEventRow {
        id: row.get(0)?,
        scope_id: row.get(1)?,
        tenant_id: row.get(2)?,
        session_id: row.get(3)?,
        visitor_id: row.get(4)?,
        event_type: row.get(5)?,
        occurred_at: row.get(6)?,
        value: row.get(7)?,
        quantity: row.get(8)?,
        order_id: row.get(9)?,
        content_id: row.get(10)?,
        page_title: row.get(11)?,
        referrer: row.get(12)?,
        utm_source: row.get(13)?,
        utm_medium: row.get(14)?,
        utm_campaign: row.get(15)?,
        utm_term: row.get(16)?,
        utm_content: row.get(17)?,
        gclid: row.get(18)?,
        fbclid: row.get(19)?,
        ttclid: row.get(20)?,
        device_type: row.get(21)?,
        country_code: row.get(22)?,
        region: row.get(23)?,
        city: row.get(24)?,
        latitude: row.get(25)?,
        longitude: row.get(26)?,
        attributed_campaign_id: row.get(27)?,
    })
}

/// Column list matching [`map_event_row`], with `occurred_at` cast to VARCHAR.
pub(crate) const EVENT_COLUMNS_SQL: &str = "id, scope_id, tenant_id, session_id, visitor_id, \
     event_type, CAST(occurred_at AS VARCHAR), value, quantity, order_id, \
     content_id, page_title, referrer, \
     utm_source, utm_medium, utm_campaign, utm_term, utm_content, \
     gclid, fbclid, ttclid, \
     device_type, country_code, region, city, latitude, longitude, \
     attributed_campaign_id";

/// Intermediate row with the timestamp still as text; converted via
/// [`RawEventRow::into_event`] once outside the row-mapping closure (duckdb's
/// mapper can only return `duckdb::Error`).
pub(crate) struct RawEventRow {
    id: String,
    scope_id: String,
    tenant_id: Option<String>,
    session_id: String,
    visitor_id: String,
    event_type: Option<String>,
    occurred_at: Option<String>,
    value: Option<f64>,
    quantity: Option<i64>,
    order_id: Option<String>,
    content_id: Option<String>,
    page_title: Option<String>,
    referrer: Option<String>,
    utm_source: Option<String>,
    utm_medium: Option<String>,
    utm_campaign: Option<String>,
    utm_term: Option<String>,
    utm_content: Option<String>,
    gclid: Option<String>,
    fbclid: Option<String>,
    ttclid: Option<String>,
    device_type: Option<String>,
    country_code: Option<String>,
    region: Option<String>,
    city: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    attributed_campaign_id: Option<String>,
}

impl RawEventRow {
    pub(crate) fn into_event(self) -> Result<InteractionEvent> {
        let occurred_at = match self.occurred_at.as_deref() {
            Some(raw) => parse_ts(raw)?,
            // Legacy rows can miss the timestamp; epoch keeps them sortable.
            None => DateTime::<Utc>::UNIX_EPOCH,
        };
        Ok(InteractionEvent {
            id: self.id,
            scope_id: self.scope_id,
            tenant_id: self.tenant_id,
            session_id: self.session_id,
            visitor_id: self.visitor_id,
            event_type: self.event_type.unwrap_or_default(),
            occurred_at,
            value: self.value,
            quantity: self.quantity,
            order_id: self.order_id,
            content_id: self.content_id,
            page_title: self.page_title,
            referrer: self.referrer,
            utm_source: self.utm_source,
            utm_medium: self.utm_medium,
            utm_campaign: self.utm_campaign,
            utm_term: self.utm_term,
            utm_content: self.utm_content,
            gclid: self.gclid,
            fbclid: self.fbclid,
            ttclid: self.ttclid,
            device_type: self.device_type,
            country_code: self.country_code,
            region: self.region,
            city: self.city,
            latitude: self.latitude,
            longitude: self.longitude,
            attributed_campaign_id: self.attributed_campaign_id,
        })
    }
}
