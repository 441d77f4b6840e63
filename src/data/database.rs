//! SQLite database operations
//!
//! All database access goes through this module.

use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;
use crate::federation::FollowerCount;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    /// Count followers.
    pub async fn count_followers(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM followers")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Get follower inbox URIs for activity delivery
    pub async fn get_follower_inboxes(&self) -> Result<Vec<String>, AppError> {
        let inboxes = sqlx::query_scalar::<_, String>("SELECT DISTINCT inbox_uri FROM followers")
            .fetch_all(&self.pool)
            .await?;

        Ok(inboxes)
    }

    /// Get follower by address (case-insensitive)
    pub async fn get_follower(&self, follower_address: &str) -> Result<Option<Follower>, AppError> {
        let follower = sqlx::query_as::<_, Follower>(
            "SELECT * FROM followers WHERE follower_address COLLATE NOCASE = ?",
        )
        .bind(follower_address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(follower)
    }

    /// Insert new follower
    pub async fn insert_follower(&self, follower: &Follower) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO followers (id, follower_address, inbox_uri, uri, created_at) VALUES (?, ?, ?, ?, ?)"
        )
        .bind(&follower.id)
        .bind(&follower.follower_address)
        .bind(&follower.inbox_uri)
        .bind(&follower.uri)
        .bind(follower.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete follower
    ///
    /// # Returns
    /// `true` if a follower was removed
    pub async fn delete_follower(&self, follower_address: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM followers WHERE follower_address COLLATE NOCASE = ?")
            .bind(follower_address)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl FollowerCount for Database {
    async fn follower_count(&self) -> Result<u64, AppError> {
        let count = self.count_followers().await?;
        u64::try_from(count)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("negative follower count: {count}")))
    }
}
