//! SQLite storage backend
//!
//! Events and alert states are stored as JSON next to the columns used for
//! lookups and retention (kind, key, timestamp). Timestamps are Unix
//! milliseconds, so two observations within the same millisecond collapse
//! into one entry.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Migrations**: Automatic schema versioning with sqlx

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::{AlertStateStore, HistoryEntry, HistoryStore, Retention, Store};
use super::error::{StorageError, StorageResult};
use crate::dedup::AlertState;
use crate::event::{ObservedEvent, ResourceId, ResourceKind};
use crate::rules::Rule;

pub struct SqliteStore {
    pool: Pool<Sqlite>,
    retention: Retention,
}

impl SqliteStore {
    /// Open (or create) the database and run migrations
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>, retention: Retention) -> StorageResult<Self> {
        let db_path = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self { pool, retention })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    #[instrument(skip_all, fields(resource = %event.resource))]
    async fn append(&self, event: &ObservedEvent) -> StorageResult<()> {
        let policy = self.retention.policy(event.kind());
        let kind = event.kind().as_str();
        let key = event.key();
        let payload = serde_json::to_string(event)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO history (kind, key, timestamp, event)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (kind, key, timestamp) DO UPDATE SET event = excluded.event
            "#,
        )
        .bind(kind)
        .bind(key)
        .bind(Self::timestamp_to_millis(&event.timestamp))
        .bind(payload)
        .execute(&mut *tx)
        .await?;

        let (newest,): (i64,) =
            sqlx::query_as("SELECT MAX(timestamp) FROM history WHERE kind = ? AND key = ?")
                .bind(kind)
                .bind(key)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM history WHERE kind = ? AND key = ? AND timestamp < ?")
            .bind(kind)
            .bind(key)
            .bind(newest - policy.window().num_milliseconds())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            DELETE FROM history
            WHERE kind = ? AND key = ? AND timestamp NOT IN (
                SELECT timestamp FROM history
                WHERE kind = ? AND key = ?
                ORDER BY timestamp DESC
                LIMIT ?
            )
            "#,
        )
        .bind(kind)
        .bind(key)
        .bind(kind)
        .bind(key)
        .bind(policy.capacity as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn window(
        &self,
        resource: &ResourceId,
        duration: TimeDelta,
        as_of: DateTime<Utc>,
    ) -> StorageResult<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT event FROM history
            WHERE kind = ? AND key = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(resource.kind.as_str())
        .bind(&resource.key)
        .bind(Self::timestamp_to_millis(&(as_of - duration)))
        .bind(Self::timestamp_to_millis(&as_of))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let payload: String = row.get("event");
                let event: ObservedEvent = serde_json::from_str(&payload)?;
                Ok(HistoryEntry::new(event))
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn purge_stale(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let cutoff = Self::timestamp_to_millis(&(now - self.retention.ttl));
        let mut tx = self.pool.begin().await?;

        let stale: Vec<(String, String)> = sqlx::query_as(
            "SELECT kind, key FROM history GROUP BY kind, key HAVING MAX(timestamp) < ?",
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        for (kind, key) in &stale {
            sqlx::query("DELETE FROM history WHERE kind = ? AND key = ?")
                .bind(kind)
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        if !stale.is_empty() {
            debug!("purged history of {} idle resources", stale.len());
        }
        Ok(stale.len())
    }

    async fn keys(&self, kind: ResourceKind) -> StorageResult<Vec<ResourceId>> {
        let keys: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT key FROM history WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(keys
            .into_iter()
            .map(|(key,)| ResourceId::new(kind, key))
            .collect())
    }

    async fn tracked(&self) -> StorageResult<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM (SELECT DISTINCT kind, key FROM history)")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }
}

#[async_trait]
impl AlertStateStore for SqliteStore {
    async fn get(&self, resource: &ResourceId, rule: Rule) -> StorageResult<Option<AlertState>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state FROM alert_state WHERE kind = ? AND key = ? AND rule = ?")
                .bind(resource.kind.as_str())
                .bind(&resource.key)
                .bind(rule.as_str())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(state,)| serde_json::from_str(&state).map_err(StorageError::from))
            .transpose()
    }

    async fn put(&self, state: &AlertState) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_state (kind, key, rule, state, tombstoned_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (kind, key, rule) DO UPDATE SET
                state = excluded.state,
                tombstoned_at = excluded.tombstoned_at
            "#,
        )
        .bind(state.resource.kind.as_str())
        .bind(&state.resource.key)
        .bind(state.rule.as_str())
        .bind(serde_json::to_string(state)?)
        .bind(state.tombstoned_at.as_ref().map(Self::timestamp_to_millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn snapshot(&self) -> StorageResult<Vec<AlertState>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT state FROM alert_state")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|(state,)| serde_json::from_str(&state).map_err(StorageError::from))
            .collect()
    }

    async fn mark_tombstoned(
        &self,
        resource: &ResourceId,
        at: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT state FROM alert_state WHERE kind = ? AND key = ? AND tombstoned_at IS NULL",
        )
        .bind(resource.kind.as_str())
        .bind(&resource.key)
        .fetch_all(&mut *tx)
        .await?;

        for (state,) in &rows {
            let mut state: AlertState = serde_json::from_str(state)?;
            state.tombstoned_at = Some(at);
            sqlx::query(
                "UPDATE alert_state SET state = ?, tombstoned_at = ? WHERE kind = ? AND key = ? AND rule = ?",
            )
            .bind(serde_json::to_string(&state)?)
            .bind(Self::timestamp_to_millis(&at))
            .bind(resource.kind.as_str())
            .bind(&resource.key)
            .bind(state.rule.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(rows.len())
    }

    async fn purge_tombstoned(
        &self,
        now: DateTime<Utc>,
        grace: TimeDelta,
    ) -> StorageResult<usize> {
        let result = sqlx::query(
            "DELETE FROM alert_state WHERE tombstoned_at IS NOT NULL AND tombstoned_at <= ?",
        )
        .bind(Self::timestamp_to_millis(&(now - grace)))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }
}

impl Store for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
