use std::str::FromStr;
use std::time::Duration;

use signoff_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// Opens a pool, creating the database file when it is missing.
///
/// Every pooled connection to `:memory:` would see its own empty database,
/// so in-memory urls are pinned to a single connection.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let url = normalize_url(database_url);
    let max_connections = if is_in_memory(&url) { 1 } else { max_connections.max(1) };
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await
}

fn normalize_url(database_url: &str) -> String {
    let trimmed = database_url.trim();
    if trimmed == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        trimmed.to_string()
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}
