//! Database setup and the small key/value state store
//!
//! The host tells us where the database lives; everything else (pool sizing,
//! migrations) is handled here.

use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::CoreError;

pub type DbPool = SqlitePool;

/// Initialize the connection pool and run migrations
///
/// `db_url` is a sqlx SQLite URL, e.g. `sqlite:///path/to/ghost-coach.db?mode=rwc`
/// or `sqlite::memory:` for tests.
pub async fn initialize_db(db_url: &str) -> Result<DbPool, CoreError> {
  let pool = SqlitePoolOptions::new()
    .max_connections(5)
    .connect(db_url)
    .await?;

  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .map_err(|e| CoreError::Database(e.to_string()))?;

  tracing::info!("database ready");

  Ok(pool)
}

/// ---------------------------------------------------------------------------
/// Cycle State Store
/// ---------------------------------------------------------------------------

/// Durable key/value store for cycle stamps, daily quota counters, and the
/// pending triage request. Keys are namespaced by component.
#[derive(Clone)]
pub struct StateStore {
  pool: DbPool,
}

impl StateStore {
  pub fn new(pool: DbPool) -> Self {
    Self { pool }
  }

  pub async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM cycle_state WHERE key = ?1")
      .bind(key)
      .fetch_optional(&self.pool)
      .await?;

    Ok(row.map(|(v,)| v))
  }

  pub async fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
    sqlx::query(
      r#"
      INSERT INTO cycle_state (key, value, updated_at)
      VALUES (?1, ?2, ?3)
      ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        updated_at = excluded.updated_at
      "#,
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  pub async fn delete(&self, key: &str) -> Result<(), CoreError> {
    sqlx::query("DELETE FROM cycle_state WHERE key = ?1")
      .bind(key)
      .execute(&self.pool)
      .await?;

    Ok(())
  }

  /// Integer counter helper for daily quotas; missing keys read as 0
  pub async fn get_counter(&self, key: &str) -> Result<u32, CoreError> {
    Ok(
      self
        .get(key)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0),
    )
  }

  pub async fn increment(&self, key: &str) -> Result<u32, CoreError> {
    let next = self.get_counter(key).await? + 1;
    self.set(key, &next.to_string()).await?;
    Ok(next)
  }
}
