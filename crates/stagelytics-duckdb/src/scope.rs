use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use stagelytics_core::analytics::Scope;
use stagelytics_core::campaign::{Campaign, CampaignType};
use stagelytics_core::error::CoreError;

use crate::backend::{parse_date, parse_ts, rand_hex, ts_str, DuckDbBackend};

const CAMPAIGN_COLUMNS_SQL: &str = "id, scope_id, campaign_type, title, \
     CAST(start_date AS VARCHAR), CAST(end_date AS VARCHAR), \
     utm_source, utm_campaign, budget, currency, \
     conversions, attributed_revenue, cac, roi, roas, \
     baseline_value, post_value, impact_metric, is_active, \
     CAST(created_at AS VARCHAR), CAST(metrics_updated_at AS VARCHAR)";

struct RawCampaignRow {
    id: String,
    scope_id: String,
    campaign_type: String,
    title: String,
    start_date: String,
    end_date: Option<String>,
    utm_source: Option<String>,
    utm_campaign: Option<String>,
    budget: Option<f64>,
    currency: String,
    conversions: i64,
    attributed_revenue: f64,
    cac: Option<f64>,
    roi: Option<f64>,
    roas: Option<f64>,
    baseline_value: Option<f64>,
    post_value: Option<f64>,
    impact_metric: Option<String>,
    is_active: bool,
    created_at: String,
    metrics_updated_at: Option<String>,
}

fn map_campaign_row(row: &duckdb::Row<'_>) -> duckdb::Result<RawCampaignRow> {
    Ok(RawCampaignRow {
        id: row.get(0)?,
        scope_id: row.get(1)?,
        campaign_type: row.get(2)?,
        title: row.get(3)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        utm_source: row.get(6)?,
        utm_campaign: row.get(7)?,
        budget: row.get(8)?,
        currency: row.get(9)?,
        conversions: row.get(10)?,
        attributed_revenue: row.get(11)?,
        cac: row.get(12)?,
        roi: row.get(13)?,
        roas: row.get(14)?,
        baseline_value: row.get(15)?,
        post_value: row.get(16)?,
        impact_metric: row.get(17)?,
        is_active: row.get(18)?,
        created_at: row.get(19)?,
        metrics_updated_at: row.get(20)?,
    })
}

impl RawCampaignRow {
    fn into_campaign(self) -> Result<Campaign> {
        let campaign_type = CampaignType::parse(&self.campaign_type)
            .ok_or_else(|| anyhow!("unknown campaign type {:?}", self.campaign_type))?;
        Ok(Campaign {
            id: self.id,
            scope_id: self.scope_id,
            campaign_type,
            title: self.title,
            start_date: parse_date(&self.start_date)?,
            end_date: self.end_date.as_deref().map(parse_date).transpose()?,
            utm_source: self.utm_source,
            utm_campaign: self.utm_campaign,
            budget: self.budget,
            currency: self.currency,
            conversions: self.conversions,
            attributed_revenue: self.attributed_revenue,
            cac: self.cac,
            roi: self.roi,
            roas: self.roas,
            baseline_value: self.baseline_value,
            post_value: self.post_value,
            impact_metric: self.impact_metric,
            is_active: self.is_active,
            created_at: parse_ts(&self.created_at)?,
            metrics_updated_at: self.metrics_updated_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

impl DuckDbBackend {
    /// Load a scope row. Unknown ids are a hard error — every dashboard
    /// query validates the scope before touching data.
    pub async fn get_scope(&self, scope_id: &str) -> Result<Scope> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, name, status, CAST(starts_at AS VARCHAR), \
                    capacity, revenue_target, rollups_enabled, CAST(created_at AS VARCHAR) \
             FROM scopes WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(duckdb::params![scope_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<f64>>(6)?,
                    row.get::<_, bool>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })
            .ok();

        let Some(row) = row else {
            return Err(CoreError::UnknownScope(scope_id.to_string()).into());
        };
        Ok(Scope {
            id: row.0,
            tenant_id: row.1,
            name: row.2,
            status: row.3,
            starts_at: row.4.as_deref().map(parse_ts).transpose()?,
            capacity: row.5,
            revenue_target: row.6,
            rollups_enabled: row.7,
            created_at: parse_ts(&row.8)?,
        })
    }

    pub async fn scope_exists(&self, scope_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .prepare("SELECT COUNT(*) FROM scopes WHERE id = ?1")?
            .query_row(duckdb::params![scope_id], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Insert or update a scope row.
    ///
    /// Intended for test fixtures and the scope-management boundary. Safe to
    /// call repeatedly with the same `id`.
    pub async fn seed_scope(
        &self,
        id: &str,
        name: &str,
        starts_at: Option<DateTime<Utc>>,
        capacity: i64,
        rollups_enabled: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO scopes (id, name, status, starts_at, capacity, rollups_enabled, created_at)
               VALUES (?1, ?2, 'on_sale', ?3, ?4, ?5, CURRENT_TIMESTAMP)
               ON CONFLICT (id) DO UPDATE SET
                   name = excluded.name,
                   starts_at = excluded.starts_at,
                   capacity = excluded.capacity,
                   rollups_enabled = excluded.rollups_enabled"#,
            duckdb::params![id, name, starts_at.map(ts_str), capacity, rollups_enabled],
        )?;
        Ok(())
    }

    /// Insert a campaign definition (the campaign boundary owns edits; this
    /// is the write side it uses, also handy for fixtures). Generates a
    /// `cmp_` id when the campaign's id field is empty.
    pub async fn insert_campaign(&self, campaign: &Campaign) -> Result<String> {
        let id = if campaign.id.is_empty() {
            format!("cmp_{}", rand_hex(8))
        } else {
            campaign.id.clone()
        };
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO campaigns (
                id, scope_id, campaign_type, title, start_date, end_date,
                utm_source, utm_campaign, budget, currency, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT (id) DO UPDATE SET
                title = excluded.title,
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                utm_source = excluded.utm_source,
                utm_campaign = excluded.utm_campaign,
                budget = excluded.budget,
                currency = excluded.currency,
                is_active = excluded.is_active"#,
            duckdb::params![
                id,
                campaign.scope_id,
                campaign.campaign_type.as_str(),
                campaign.title,
                campaign.start_date.format("%Y-%m-%d").to_string(),
                campaign.end_date.map(|d| d.format("%Y-%m-%d").to_string()),
                campaign.utm_source,
                campaign.utm_campaign,
                campaign.budget,
                campaign.currency,
                campaign.is_active,
                ts_str(campaign.created_at),
            ],
        )?;
        Ok(id)
    }

    /// Active campaigns for a scope, newest start first — the candidate set
    /// the attribution resolver walks in priority order.
    pub async fn list_active_campaigns(&self, scope_id: &str) -> Result<Vec<Campaign>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS_SQL} FROM campaigns \
             WHERE scope_id = ?1 AND is_active ORDER BY start_date DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(duckdb::params![scope_id], map_campaign_row)?;
        let mut campaigns = Vec::new();
        for row in rows {
            campaigns.push(row?.into_campaign()?);
        }
        Ok(campaigns)
    }

    /// All campaigns for a scope (dashboard listing), newest start first.
    pub async fn list_campaigns(&self, scope_id: &str) -> Result<Vec<Campaign>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS_SQL} FROM campaigns \
             WHERE scope_id = ?1 ORDER BY start_date DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(duckdb::params![scope_id], map_campaign_row)?;
        let mut campaigns = Vec::new();
        for row in rows {
            campaigns.push(row?.into_campaign()?);
        }
        Ok(campaigns)
    }

    pub async fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {CAMPAIGN_COLUMNS_SQL} FROM campaigns WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let row = stmt
            .query_row(duckdb::params![campaign_id], map_campaign_row)
            .ok();
        row.map(RawCampaignRow::into_campaign).transpose()
    }

    /// Soft-deactivate: campaigns referenced by attribution history are
    /// never deleted.
    pub async fn set_campaign_active(&self, campaign_id: &str, is_active: bool) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE campaigns SET is_active = ?2 WHERE id = ?1",
            duckdb::params![campaign_id, is_active],
        )?;
        Ok(())
    }

    /// Write back the wholesale-recomputed derived metrics.
    pub(crate) async fn write_campaign_metrics(
        &self,
        campaign_id: &str,
        conversions: i64,
        attributed_revenue: f64,
        cac: Option<f64>,
        roi: Option<f64>,
        roas: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE campaigns SET conversions = ?2, attributed_revenue = ?3, \
             cac = ?4, roi = ?5, roas = ?6, metrics_updated_at = ?7 WHERE id = ?1",
            duckdb::params![
                campaign_id,
                conversions,
                attributed_revenue,
                cac,
                roi,
                roas,
                ts_str(now)
            ],
        )?;
        Ok(())
    }

    /// Write back the non-ad impact comparison result.
    pub(crate) async fn write_campaign_impact(
        &self,
        campaign_id: &str,
        baseline_value: f64,
        post_value: f64,
        impact_metric: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE campaigns SET baseline_value = ?2, post_value = ?3, \
             impact_metric = ?4, metrics_updated_at = ?5 WHERE id = ?1",
            duckdb::params![
                campaign_id,
                baseline_value,
                post_value,
                impact_metric,
                ts_str(now)
            ],
        )?;
        Ok(())
    }
}
