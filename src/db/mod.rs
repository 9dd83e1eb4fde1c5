/// Database layer for the account portal
///
/// Manages the SQLite connection pool and embedded migrations, and provides
/// typed row models for accounts, categories, tokens, sessions and documents.

pub mod models;

use crate::error::{PortalError, PortalResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

/// Create a SQLite connection pool
///
/// A path of `:memory:` yields a single-connection in-memory database.
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> PortalResult<SqlitePool> {
    if path.as_os_str() == ":memory:" {
        return memory_pool().await;
    }

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(if options.enable_wal {
                    SqliteJournalMode::Wal
                } else {
                    SqliteJournalMode::Delete
                })
                .foreign_keys(true)
                .busy_timeout(std::time::Duration::from_secs(5)),
        )
        .await
        .map_err(PortalError::Database)?;

    Ok(pool)
}

/// In-memory database; one connection so every query sees the same data
pub async fn memory_pool() -> PortalResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Run migrations
/// Migrations are embedded at compile time from ./migrations directory
pub async fn run_migrations(pool: &SqlitePool) -> PortalResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> PortalResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Whether an error is a UNIQUE constraint failure
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Migrated in-memory database
pub async fn migrated_memory_pool() -> PortalResult<SqlitePool> {
    let pool = memory_pool().await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let pool = migrated_memory_pool().await.unwrap();
        test_connection(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        for table in [
            "account",
            "activation_token",
            "category",
            "document",
            "password_reset_token",
            "web_session",
        ] {
            assert!(tables.iter().any(|t| t == table), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_category_delete_is_protected() {
        let pool = migrated_memory_pool().await.unwrap();
        sqlx::query("INSERT INTO category (name, slug) VALUES ('Student', 'student')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO account (email, password_hash, category_id, date_joined)
             VALUES ('a@gmail.com', 'x', 1, ?1)",
        )
        .bind(chrono::Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        let result = sqlx::query("DELETE FROM category WHERE id = 1")
            .execute(&pool)
            .await;
        assert!(result.is_err());
    }
}
