// ABOUTME: Boundary traits for identity, project access and the authoritative file listing
// ABOUTME: Includes a SQLite-backed store so the service can run standalone

use crate::error::{Result, SandboxError};
use crate::storage::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// One file of a project's authoritative file set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFile {
    pub path: String,
    pub content: Vec<u8>,
}

/// Resolves a session token to a user id.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fails with [`SandboxError::Unauthenticated`] for unknown or expired tokens.
    async fn resolve_user(&self, token: &str) -> Result<String>;
}

#[async_trait]
pub trait ProjectAccess: Send + Sync {
    async fn can_access(&self, project_id: &str, user_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait ProjectFiles: Send + Sync {
    async fn list_files(&self, project_id: &str) -> Result<Vec<ProjectFile>>;
}

/// All three collaborators over the `user_sessions`, `project_members` and
/// `project_files` tables.
#[derive(Clone)]
pub struct SqliteProjectStore {
    pool: SqlitePool,
}

impl SqliteProjectStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_session(
        &self,
        token: &str,
        user_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO user_sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
        )
        .bind(token)
        .bind(user_id)
        .bind(expires_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn add_member(&self, project_id: &str, user_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO project_members (project_id, user_id) VALUES (?1, ?2)")
            .bind(project_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    pub async fn put_file(&self, project_id: &str, path: &str, content: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_files (project_id, path, content, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(project_id, path) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(path)
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for SqliteProjectStore {
    async fn resolve_user(&self, token: &str) -> Result<String> {
        let row = sqlx::query("SELECT user_id, expires_at FROM user_sessions WHERE token = ?1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?
            .ok_or(SandboxError::Unauthenticated)?;

        let expires_at: Option<String> = row.try_get("expires_at").map_err(StorageError::from)?;
        if let Some(raw) = expires_at {
            let expired = DateTime::parse_from_rfc3339(&raw)
                .map(|at| at.with_timezone(&Utc) <= Utc::now())
                .unwrap_or(true);
            if expired {
                debug!("Rejected expired session token");
                return Err(SandboxError::Unauthenticated);
            }
        }

        Ok(row.try_get("user_id").map_err(StorageError::from)?)
    }
}

#[async_trait]
impl ProjectAccess for SqliteProjectStore {
    async fn can_access(&self, project_id: &str, user_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 AS found FROM project_members WHERE project_id = ?1 AND user_id = ?2",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl ProjectFiles for SqliteProjectStore {
    async fn list_files(&self, project_id: &str) -> Result<Vec<ProjectFile>> {
        let rows = sqlx::query(
            "SELECT path, content FROM project_files WHERE project_id = ?1 ORDER BY path",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;

        rows.into_iter()
            .map(|row| {
                Ok(ProjectFile {
                    path: row.try_get("path").map_err(StorageError::from)?,
                    content: row.try_get("content").map_err(StorageError::from)?,
                })
            })
            .collect()
    }
}
