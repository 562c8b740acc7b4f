//! Connection bootstrap, grounded in the teacher's `TursoClient`: detect
//! remote vs. local vs. in-memory URLs, keep an anchor connection alive for
//! `:memory:` databases, and apply the schema once up front.

use crate::errors::DbError;
use crate::schema::apply_schema;
use libsql::{Builder, Connection, Database};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct DbClient {
    database: Arc<Database>,
    /// Keeps an in-memory database alive for the life of the process; SQLite
    /// drops `:memory:` data as soon as its last connection closes.
    _memory_anchor: Option<Arc<Connection>>,
}

impl DbClient {
    #[instrument(skip(auth_token))]
    pub async fn connect(url: &str, auth_token: Option<String>) -> Result<Self, DbError> {
        if url.is_empty() {
            return Err(DbError::Connection("DATABASE_URL is empty".into()));
        }

        let is_remote = url.starts_with("libsql://") || url.starts_with("https://");
        let is_memory = url.contains(":memory:");

        let database = if is_remote {
            let token = auth_token.ok_or_else(|| DbError::Connection("remote database requires an auth token".into()))?;
            Builder::new_remote(url.to_string(), token).build().await
        } else {
            Builder::new_local(url).build().await
        }
        .map_err(|e| DbError::Connection(e.to_string()))?;

        let database = Arc::new(database);

        let anchor = if is_memory {
            let conn = database.connect().map_err(|e| DbError::Connection(e.to_string()))?;
            apply_schema(&conn).await?;
            Some(Arc::new(conn))
        } else {
            let conn = database.connect().map_err(|e| DbError::Connection(e.to_string()))?;
            apply_schema(&conn).await?;
            None
        };

        info!(url, "database connected and schema applied");
        Ok(Self { database, _memory_anchor: anchor })
    }

    pub fn connection(&self) -> Result<Connection, DbError> {
        self.database.connect().map_err(|e| DbError::Connection(e.to_string()))
    }
}
