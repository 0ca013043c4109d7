// ABOUTME: Sandbox registry persisted in SQLite
// ABOUTME: One row per live sandbox with owner, container handle, port and activity timestamps

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Sandbox not found: {0}")]
    NotFound(String),
    #[error("Invalid status: {0}")]
    InvalidStatus(String),
    #[error("Invalid timestamp in column {column}: {value}")]
    InvalidTimestamp { column: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Starting,
    Running,
    Stopping,
}

impl SandboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            _ => Err(StorageError::InvalidStatus(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sandbox {
    pub id: String,
    pub project_id: String,
    pub owner_user_id: String,
    /// Runtime container id; `None` until the container exists
    pub container_id: Option<String>,
    /// Base host port of the leased block
    pub port: Option<u16>,
    pub status: SandboxStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Sandbox {
    /// A fresh record stamped with `now` for both timestamps.
    pub fn new(project_id: &str, owner_user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("sbx-{}", uuid::Uuid::new_v4()),
            project_id: project_id.to_string(),
            owner_user_id: owner_user_id.to_string(),
            container_id: None,
            port: None,
            status: SandboxStatus::Starting,
            created_at: now,
            last_activity_at: now,
        }
    }
}

const SANDBOX_COLUMNS: &str =
    "id, project_id, owner_user_id, container_id, port, status, created_at, last_activity_at";

/// Thin accessor over the `sandboxes` table.
///
/// Enforces no uniqueness of its own; callers keep the one-per-project and
/// one-per-owner invariants.
#[derive(Clone)]
pub struct SandboxRegistry {
    pool: SqlitePool,
}

impl SandboxRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get(&self, id: &str) -> Result<Option<Sandbox>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sandboxes WHERE id = ?1",
            SANDBOX_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_sandbox).transpose()
    }

    pub async fn get_by_project(&self, project_id: &str) -> Result<Option<Sandbox>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sandboxes WHERE project_id = ?1 ORDER BY created_at DESC LIMIT 1",
            SANDBOX_COLUMNS
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_sandbox).transpose()
    }

    pub async fn get_by_owner(&self, owner_user_id: &str) -> Result<Option<Sandbox>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sandboxes WHERE owner_user_id = ?1 ORDER BY created_at DESC LIMIT 1",
            SANDBOX_COLUMNS
        ))
        .bind(owner_user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_sandbox).transpose()
    }

    pub async fn create(&self, sandbox: &Sandbox) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sandboxes (
                id, project_id, owner_user_id, container_id, port, status,
                created_at, last_activity_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&sandbox.id)
        .bind(&sandbox.project_id)
        .bind(&sandbox.owner_user_id)
        .bind(&sandbox.container_id)
        .bind(sandbox.port.map(i64::from))
        .bind(sandbox.status.as_str())
        .bind(format_timestamp(sandbox.created_at))
        .bind(format_timestamp(sandbox.last_activity_at))
        .execute(&self.pool)
        .await?;

        debug!(
            "Registered sandbox {} for project {}",
            sandbox.id, sandbox.project_id
        );
        Ok(())
    }

    /// Overwrite every mutable column of an existing record.
    pub async fn update(&self, sandbox: &Sandbox) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sandboxes
            SET project_id = ?2, owner_user_id = ?3, container_id = ?4, port = ?5,
                status = ?6, last_activity_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&sandbox.id)
        .bind(&sandbox.project_id)
        .bind(&sandbox.owner_user_id)
        .bind(&sandbox.container_id)
        .bind(sandbox.port.map(i64::from))
        .bind(sandbox.status.as_str())
        .bind(format_timestamp(sandbox.last_activity_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(sandbox.id.clone()));
        }
        Ok(())
    }

    /// Flip a record to `stopping` unless it already is. Exactly one caller
    /// wins for a given record; that caller owns its teardown.
    pub async fn mark_stopping(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sandboxes SET status = ?2 WHERE id = ?1 AND status != ?2",
        )
        .bind(id)
        .bind(SandboxStatus::Stopping.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Remove a record. Returns whether a row was actually deleted.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sandboxes WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_all(&self) -> Result<Vec<Sandbox>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sandboxes ORDER BY created_at ASC",
            SANDBOX_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_sandbox).collect()
    }

    /// Bump `last_activity_at`. A record deleted in the meantime is ignored.
    pub async fn touch(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sandboxes SET last_activity_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(format_timestamp(at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Fixed-width UTC form so text ordering matches time ordering
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(row: &SqliteRow, column: &'static str) -> Result<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidTimestamp { column, value: raw })
}

fn row_to_sandbox(row: SqliteRow) -> Result<Sandbox> {
    Ok(Sandbox {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        owner_user_id: row.try_get("owner_user_id")?,
        container_id: row.try_get("container_id")?,
        port: row
            .try_get::<Option<i64>, _>("port")?
            .and_then(|p| u16::try_from(p).ok()),
        status: SandboxStatus::from_str(&row.try_get::<String, _>("status")?)?,
        created_at: parse_timestamp(&row, "created_at")?,
        last_activity_at: parse_timestamp(&row, "last_activity_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        // One connection so every query sees the same in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool
    }

    fn record(project: &str, owner: &str) -> Sandbox {
        let mut sandbox = Sandbox::new(project, owner, Utc::now());
        sandbox.container_id = Some(format!("ctr-{}", project));
        sandbox.port = Some(20000);
        sandbox.status = SandboxStatus::Running;
        sandbox
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let registry = SandboxRegistry::new(setup_test_db().await);
        let sandbox = record("p1", "u1");
        registry.create(&sandbox).await.unwrap();

        let by_id = registry.get(&sandbox.id).await.unwrap().unwrap();
        // RFC 3339 keeps sub-second precision, so the record round-trips exactly
        assert_eq!(by_id, sandbox);
        assert_eq!(
            registry.get_by_project("p1").await.unwrap().unwrap().id,
            sandbox.id
        );
        assert_eq!(
            registry.get_by_owner("u1").await.unwrap().unwrap().id,
            sandbox.id
        );
        assert!(registry.get_by_project("p2").await.unwrap().is_none());
        assert!(registry.get_by_owner("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_and_touch() {
        let registry = SandboxRegistry::new(setup_test_db().await);
        let mut sandbox = Sandbox::new("p1", "u1", Utc::now() - Duration::minutes(5));
        registry.create(&sandbox).await.unwrap();

        sandbox.container_id = Some("abc".to_string());
        sandbox.port = Some(20003);
        sandbox.status = SandboxStatus::Running;
        registry.update(&sandbox).await.unwrap();

        let later = Utc::now();
        registry.touch(&sandbox.id, later).await.unwrap();

        let stored = registry.get(&sandbox.id).await.unwrap().unwrap();
        assert_eq!(stored.container_id.as_deref(), Some("abc"));
        assert_eq!(stored.port, Some(20003));
        assert_eq!(stored.status, SandboxStatus::Running);
        assert_eq!(stored.last_activity_at, later);
        assert_eq!(stored.created_at, sandbox.created_at);
    }

    #[tokio::test]
    async fn test_update_missing_record_fails() {
        let registry = SandboxRegistry::new(setup_test_db().await);
        let result = registry.update(&record("p1", "u1")).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_is_tolerant() {
        let registry = SandboxRegistry::new(setup_test_db().await);
        let sandbox = record("p1", "u1");
        registry.create(&sandbox).await.unwrap();

        assert!(registry.delete(&sandbox.id).await.unwrap());
        assert!(!registry.delete(&sandbox.id).await.unwrap());
        // touching a deleted record is silently ignored
        registry.touch(&sandbox.id, Utc::now()).await.unwrap();
        assert!(registry.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_stopping_has_one_winner() {
        let registry = SandboxRegistry::new(setup_test_db().await);
        let sandbox = record("p1", "u1");
        registry.create(&sandbox).await.unwrap();

        assert!(registry.mark_stopping(&sandbox.id).await.unwrap());
        assert!(!registry.mark_stopping(&sandbox.id).await.unwrap());
        assert!(!registry.mark_stopping("sbx-missing").await.unwrap());

        let stored = registry.get(&sandbox.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SandboxStatus::Stopping);
    }

    #[tokio::test]
    async fn test_list_all_orders_by_creation() {
        let registry = SandboxRegistry::new(setup_test_db().await);
        let now = Utc::now();
        let newer = Sandbox::new("p2", "u2", now);
        let older = Sandbox::new("p1", "u1", now - Duration::hours(1));
        registry.create(&newer).await.unwrap();
        registry.create(&older).await.unwrap();

        let ids: Vec<String> = registry
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![older.id, newer.id]);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            SandboxStatus::Starting,
            SandboxStatus::Running,
            SandboxStatus::Stopping,
        ] {
            assert_eq!(SandboxStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(SandboxStatus::from_str("stopped").is_err());
    }
}
