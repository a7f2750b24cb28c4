/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup (idempotent).
///
/// `memory_limit` is passed at runtime from `Config.duckdb_memory_limit`
/// (env `STAGELYTICS_DUCKDB_MEMORY`, default `"1GB"`). DuckDB accepts any
/// size string it supports — e.g. `"512MB"`, `"1GB"`, `"4GB"`.
///
/// Counter upserts rely on the PRIMARY KEY of `analytics_hourly` /
/// `hourly_dimensions` as the `ON CONFLICT` target: a single
/// `INSERT ... ON CONFLICT DO UPDATE SET col = col + excluded.col`
/// statement is the atomic add-or-create primitive the aggregator needs.
/// Categorical breakdowns are one row per (dimension, key) — never a JSON
/// blob mutated read-modify-write style.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- SCOPES (sellable event/listing pages)
-- ===========================================
CREATE TABLE IF NOT EXISTS scopes (
    id              VARCHAR PRIMARY KEY,           -- 'scope_' + random hex
    tenant_id       VARCHAR,                       -- NULL in single-tenant deployments
    name            VARCHAR NOT NULL,
    status          VARCHAR NOT NULL DEFAULT 'on_sale',
    starts_at       TIMESTAMP,                     -- the event's door time
    capacity        BIGINT NOT NULL DEFAULT 0,
    revenue_target  DOUBLE,
    rollups_enabled BOOLEAN NOT NULL DEFAULT true, -- false => derived (raw-row) query path only
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_scopes_tenant ON scopes(tenant_id);

-- ===========================================
-- EVENTS (raw interaction store, append-only)
-- ===========================================
-- attributed_campaign_id transitions NULL -> set exactly once; the
-- attribution resolver writes it with a conditional
-- `WHERE attributed_campaign_id IS NULL` update, never unconditionally.
CREATE TABLE IF NOT EXISTS events (
    id              VARCHAR NOT NULL,              -- UUID v4
    scope_id        VARCHAR NOT NULL,
    tenant_id       VARCHAR,
    session_id      VARCHAR NOT NULL,
    visitor_id      VARCHAR NOT NULL,

    event_type      VARCHAR,                       -- 'page_view' | 'view_item' | 'add_to_cart'
                                                   -- | 'begin_checkout' | 'purchase' | custom.
                                                   -- NULL/'' on legacy rows; overview/chart/funnel
                                                   -- queries treat those as page views.
    occurred_at     TIMESTAMP,
    value           DOUBLE,                        -- monetary value for purchases
    quantity        BIGINT,
    order_id        VARCHAR,
    content_id      VARCHAR,                       -- ticket-type / content reference
    page_title      VARCHAR,
    referrer        VARCHAR,

    utm_source      VARCHAR,
    utm_medium      VARCHAR,
    utm_campaign    VARCHAR,
    utm_term        VARCHAR,
    utm_content     VARCHAR,
    gclid           VARCHAR,
    fbclid          VARCHAR,
    ttclid          VARCHAR,

    device_type     VARCHAR,                       -- 'desktop' | 'mobile' | 'tablet'
    country_code    VARCHAR(2),
    region          VARCHAR,
    city            VARCHAR,
    latitude        DOUBLE,
    longitude       DOUBLE,

    attributed_campaign_id VARCHAR                 -- NULL until the resolver links a campaign
);

-- Primary query pattern: scope + date range
CREATE INDEX IF NOT EXISTS idx_events_scope_time
    ON events(scope_id, occurred_at DESC);
-- Accelerates funnel stage counts by type
CREATE INDEX IF NOT EXISTS idx_events_scope_type_time
    ON events(scope_id, event_type, occurred_at);
-- Accelerates per-visitor touchpoint lookups (order attribution fallback)
CREATE INDEX IF NOT EXISTS idx_events_scope_visitor
    ON events(scope_id, visitor_id, occurred_at DESC);
-- Accelerates the unattributed-purchase backfill sweep
CREATE INDEX IF NOT EXISTS idx_events_attribution
    ON events(scope_id, event_type, attributed_campaign_id);

-- ===========================================
-- SESSIONS (derived, updated on each event)
-- ===========================================
CREATE TABLE IF NOT EXISTS sessions (
    session_id      VARCHAR PRIMARY KEY,
    scope_id        VARCHAR NOT NULL,
    tenant_id       VARCHAR,
    visitor_id      VARCHAR NOT NULL,
    first_seen      TIMESTAMP NOT NULL,
    last_seen       TIMESTAMP NOT NULL,
    pageview_count  INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_sessions_scope_visitor
    ON sessions(scope_id, visitor_id, last_seen DESC);

-- ===========================================
-- ORDERS (read model of the payment boundary)
-- ===========================================
-- Rows are written by the order-lifecycle boundary; this engine only reads
-- them, except for attributed_campaign_id (set-if-null, same rule as events).
CREATE TABLE IF NOT EXISTS orders (
    id              VARCHAR PRIMARY KEY,
    scope_id        VARCHAR NOT NULL,
    tenant_id       VARCHAR,
    status          VARCHAR NOT NULL,              -- created|paid|confirmed|completed|cancelled|refunded
    total           DOUBLE NOT NULL DEFAULT 0,
    ticket_count    BIGINT NOT NULL DEFAULT 0,
    visitor_id      VARCHAR,
    session_id      VARCHAR,
    utm_source      VARCHAR,
    utm_medium      VARCHAR,
    utm_campaign    VARCHAR,
    gclid           VARCHAR,
    fbclid          VARCHAR,
    ttclid          VARCHAR,
    country_code    VARCHAR(2),
    city            VARCHAR,
    attributed_campaign_id VARCHAR,
    created_at      TIMESTAMP NOT NULL,
    paid_at         TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_orders_scope_status
    ON orders(scope_id, status, paid_at);
CREATE INDEX IF NOT EXISTS idx_orders_scope_created
    ON orders(scope_id, created_at);

-- ===========================================
-- CAMPAIGNS (marketing touchpoints)
-- ===========================================
-- Definition fields are owned by the campaign boundary; the derived-metric
-- block (conversions .. impact_metric) is written only by the resolver.
-- Campaigns are soft-deactivated via is_active, never deleted while
-- attribution history references them.
CREATE TABLE IF NOT EXISTS campaigns (
    id                  VARCHAR PRIMARY KEY,       -- 'cmp_' + random hex
    scope_id            VARCHAR NOT NULL,
    tenant_id           VARCHAR,
    campaign_type       VARCHAR NOT NULL,          -- google_ads|facebook_ads|tiktok_ads|email|organic|announcement|price_change
    title               VARCHAR NOT NULL,
    start_date          DATE NOT NULL,
    end_date            DATE,
    utm_source          VARCHAR,
    utm_campaign        VARCHAR,
    budget              DOUBLE,
    currency            VARCHAR NOT NULL DEFAULT 'EUR',
    conversions         BIGINT NOT NULL DEFAULT 0,
    attributed_revenue  DOUBLE NOT NULL DEFAULT 0,
    cac                 DOUBLE,
    roi                 DOUBLE,
    roas                DOUBLE,
    baseline_value      DOUBLE,
    post_value          DOUBLE,
    impact_metric       VARCHAR,
    is_active           BOOLEAN NOT NULL DEFAULT true,
    created_at          TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    metrics_updated_at  TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_campaigns_scope_active
    ON campaigns(scope_id, is_active, start_date DESC);

-- ===========================================
-- HOURLY BUCKETS (atomic counter rows)
-- ===========================================
CREATE TABLE IF NOT EXISTS analytics_hourly (
    scope_id            VARCHAR NOT NULL,
    date                DATE NOT NULL,
    hour                INTEGER NOT NULL,          -- 0..23
    page_views          BIGINT NOT NULL DEFAULT 0,
    unique_visitors     BIGINT NOT NULL DEFAULT 0,
    ticket_views        BIGINT NOT NULL DEFAULT 0,
    add_to_carts        BIGINT NOT NULL DEFAULT 0,
    checkouts_started   BIGINT NOT NULL DEFAULT 0,
    purchases           BIGINT NOT NULL DEFAULT 0,
    tickets_sold        BIGINT NOT NULL DEFAULT 0,
    revenue_cents       BIGINT NOT NULL DEFAULT 0,
    bounces             BIGINT NOT NULL DEFAULT 0,
    lineup_views        BIGINT NOT NULL DEFAULT 0,
    pricing_views       BIGINT NOT NULL DEFAULT 0,
    faq_views           BIGINT NOT NULL DEFAULT 0,
    gallery_views       BIGINT NOT NULL DEFAULT 0,
    shares              BIGINT NOT NULL DEFAULT 0,
    interests           BIGINT NOT NULL DEFAULT 0,
    created_at          TIMESTAMP NOT NULL,
    updated_at          TIMESTAMP NOT NULL,
    PRIMARY KEY (scope_id, date, hour)
);

-- Categorical counters, one row per key. PRIMARY KEY doubles as the
-- ON CONFLICT target so increments are atomic per (dimension, key).
-- Tracked dimensions: 'traffic_sources', 'devices', 'locations',
-- 'utm_campaigns'. Which keys exist inside each is a product decision.
CREATE TABLE IF NOT EXISTS hourly_dimensions (
    scope_id            VARCHAR NOT NULL,
    date                DATE NOT NULL,
    hour                INTEGER NOT NULL,
    dimension           VARCHAR NOT NULL,
    key                 VARCHAR NOT NULL,
    count               BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (scope_id, date, hour, dimension, key)
);

-- ===========================================
-- DAILY / WEEKLY / MONTHLY ROLLUPS
-- ===========================================
-- Written by the rollup jobs (single writer, derived wholesale from raw
-- rows), read by the fast query path. The categorical snapshots are JSON
-- because they are replaced whole on every rollup run, never incremented.
CREATE TABLE IF NOT EXISTS analytics_daily (
    scope_id                VARCHAR NOT NULL,
    date                    DATE NOT NULL,
    page_views              BIGINT NOT NULL DEFAULT 0,
    unique_visitors         BIGINT NOT NULL DEFAULT 0,
    sessions                BIGINT NOT NULL DEFAULT 0,
    add_to_cart_count       BIGINT NOT NULL DEFAULT 0,
    checkout_started_count  BIGINT NOT NULL DEFAULT 0,
    purchases_count         BIGINT NOT NULL DEFAULT 0,
    conversion_rate         DOUBLE NOT NULL DEFAULT 0,
    revenue                 DOUBLE NOT NULL DEFAULT 0,
    tickets_sold            BIGINT NOT NULL DEFAULT 0,
    avg_order_value         DOUBLE NOT NULL DEFAULT 0,
    traffic_sources         VARCHAR,               -- JSON snapshot
    top_locations           VARCHAR,               -- JSON snapshot
    updated_at              TIMESTAMP NOT NULL,
    PRIMARY KEY (scope_id, date)
);

CREATE TABLE IF NOT EXISTS analytics_weekly (
    scope_id            VARCHAR NOT NULL,
    week_start          DATE NOT NULL,             -- Monday
    page_views          BIGINT NOT NULL DEFAULT 0,
    unique_visitors     BIGINT NOT NULL DEFAULT 0,
    purchases           BIGINT NOT NULL DEFAULT 0,
    revenue             DOUBLE NOT NULL DEFAULT 0,
    tickets_sold        BIGINT NOT NULL DEFAULT 0,
    conversion_rate     DOUBLE NOT NULL DEFAULT 0,
    revenue_change_pct  DOUBLE NOT NULL DEFAULT 0, -- vs previous week
    updated_at          TIMESTAMP NOT NULL,
    PRIMARY KEY (scope_id, week_start)
);

CREATE TABLE IF NOT EXISTS analytics_monthly (
    scope_id            VARCHAR NOT NULL,
    month_start         DATE NOT NULL,
    page_views          BIGINT NOT NULL DEFAULT 0,
    unique_visitors     BIGINT NOT NULL DEFAULT 0,
    purchases           BIGINT NOT NULL DEFAULT 0,
    revenue             DOUBLE NOT NULL DEFAULT 0,
    tickets_sold        BIGINT NOT NULL DEFAULT 0,
    conversion_rate     DOUBLE NOT NULL DEFAULT 0,
    revenue_change_pct  DOUBLE NOT NULL DEFAULT 0, -- vs previous month
    updated_at          TIMESTAMP NOT NULL,
    PRIMARY KEY (scope_id, month_start)
);
"#
    )
}
