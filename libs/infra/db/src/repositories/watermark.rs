//! Watermark persistence (§6 `watermarks` table): the per-tenant,
//! per-entity-type cutoff an incremental sync resumes from.

use crate::errors::DbError;
use cama_sync_models::Watermark;
use chrono::{DateTime, Utc};
use libsql::{params, Connection};
use tokio::sync::Mutex;

pub struct WatermarkStore {
    connection: Mutex<Connection>,
}

impl WatermarkStore {
    pub fn new(connection: Connection) -> Self {
        Self { connection: Mutex::new(connection) }
    }

    pub async fn get(&self, tenant_id: &str, entity_type: &str) -> Result<Option<Watermark>, DbError> {
        let connection = self.connection.lock().await;
        let mut rows = connection
            .query(
                "SELECT tenant_id, entity_type, last_cutoff_ts FROM watermarks WHERE tenant_id = ?1 AND entity_type = ?2",
                params![tenant_id.to_string(), entity_type.to_string()],
            )
            .await
            .map_err(DbError::Query)?;

        let Some(row) = rows.next().await.map_err(DbError::Query)? else {
            return Ok(None);
        };

        let tenant_id: String = row.get(0).map_err(DbError::Query)?;
        let entity_type: String = row.get(1).map_err(DbError::Query)?;
        let last_cutoff_ts: String = row.get(2).map_err(DbError::Query)?;
        let last_cutoff = DateTime::parse_from_rfc3339(&last_cutoff_ts)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DbError::Mapping(e.to_string()))?;

        Ok(Some(Watermark { tenant_id, entity_type, last_cutoff }))
    }

    /// Upserts the watermark. Only called after a job completes fully
    /// (§4.10 step 3) — per-record failures don't advance it.
    pub async fn advance(&self, watermark: &Watermark) -> Result<(), DbError> {
        let connection = self.connection.lock().await;
        connection
            .execute(
                "INSERT INTO watermarks (tenant_id, entity_type, last_cutoff_ts) VALUES (?1, ?2, ?3)
                 ON CONFLICT (tenant_id, entity_type) DO UPDATE SET last_cutoff_ts = excluded.last_cutoff_ts",
                params![watermark.tenant_id.clone(), watermark.entity_type.clone(), watermark.last_cutoff.to_rfc3339()],
            )
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }
}
