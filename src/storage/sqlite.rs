//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked by the actor writing its state
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StateStore};
use super::error::{StorageError, StorageResult};
use super::schema::{EntityKey, EntityKind, ReminderRow, StateRow};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path` and run migrations
    ///
    /// ```no_run
    /// # use health_trends::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./health-trends.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn entity_key(row: &SqliteRow) -> StorageResult<EntityKey> {
        let kind: String = row.try_get("kind")?;
        Ok(EntityKey {
            kind: kind.parse::<EntityKind>()?,
            id: row.try_get("id")?,
        })
    }

    fn reminder_from_row(row: &SqliteRow) -> StorageResult<ReminderRow> {
        let period_ms: i64 = row.try_get("period_ms")?;
        Ok(ReminderRow {
            key: Self::entity_key(row)?,
            name: row.try_get("name")?,
            due_at: Self::millis_to_timestamp(row.try_get("due_at")?),
            period: Duration::from_millis(period_ms.max(0) as u64),
        })
    }
}

#[async_trait]
impl StateStore for SqliteBackend {
    #[instrument(skip(self), fields(key = %key))]
    async fn load_state(&self, key: &EntityKey) -> StorageResult<Option<StateRow>> {
        let row = sqlx::query(
            r#"
            SELECT kind, id, payload, updated_at
            FROM entity_state
            WHERE kind = ? AND id = ?
            "#,
        )
        .bind(key.kind.to_string())
        .bind(&key.id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> StorageResult<StateRow> {
            Ok(StateRow {
                key: Self::entity_key(&row)?,
                payload: row.try_get("payload")?,
                updated_at: Self::millis_to_timestamp(row.try_get("updated_at")?),
            })
        })
        .transpose()
    }

    #[instrument(skip(self, row), fields(key = %row.key, bytes = row.payload.len()))]
    async fn save_state(&self, row: StateRow) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO entity_state (kind, id, payload, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (kind, id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(row.key.kind.to_string())
        .bind(&row.key.id)
        .bind(&row.payload)
        .bind(Self::timestamp_to_millis(&row.updated_at))
        .execute(&self.pool)
        .await?;

        debug!("state saved");
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete_state(&self, key: &EntityKey) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM entity_state WHERE kind = ? AND id = ?")
            .bind(key.kind.to_string())
            .bind(&key.id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, row), fields(key = %row.key, name = %row.name))]
    async fn save_reminder(&self, row: ReminderRow) -> StorageResult<()> {
        let period_ms = i64::try_from(row.period.as_millis()).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO reminders (kind, id, name, due_at, period_ms)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (kind, id, name) DO UPDATE SET
                due_at = excluded.due_at,
                period_ms = excluded.period_ms
            "#,
        )
        .bind(row.key.kind.to_string())
        .bind(&row.key.id)
        .bind(&row.name)
        .bind(Self::timestamp_to_millis(&row.due_at))
        .bind(period_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete_reminder(&self, key: &EntityKey, name: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM reminders WHERE kind = ? AND id = ? AND name = ?")
            .bind(key.kind.to_string())
            .bind(&key.id)
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn load_reminders(&self) -> StorageResult<Vec<ReminderRow>> {
        let rows = sqlx::query(
            r#"
            SELECT kind, id, name, due_at, period_ms
            FROM reminders
            ORDER BY due_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let reminders = rows
            .iter()
            .map(Self::reminder_from_row)
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("loaded {} reminders", reminders.len());
        Ok(reminders)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
