//! Training blocks - calendar-backed workout sessions
//!
//! Blocks are created by the orchestrator, mutated by transformation or
//! cancellation, and never re-opened once they leave `scheduled`.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::CoreError;
use crate::models::workout::{DetectedWorkout, WorkoutType};

/// ---------------------------------------------------------------------------
/// Block Status
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
  Scheduled,
  Completed,
  Missed,
  Cancelled,
  Transformed,
}

impl BlockStatus {
  /// Status transitions are monotonic: the only legal moves are out of
  /// `Scheduled`, and every other status is terminal.
  pub fn can_transition_to(&self, next: BlockStatus) -> bool {
    *self == BlockStatus::Scheduled && next != BlockStatus::Scheduled
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      BlockStatus::Scheduled => "scheduled",
      BlockStatus::Completed => "completed",
      BlockStatus::Missed => "missed",
      BlockStatus::Cancelled => "cancelled",
      BlockStatus::Transformed => "transformed",
    }
  }
}

impl std::str::FromStr for BlockStatus {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "scheduled" => Ok(Self::Scheduled),
      "completed" => Ok(Self::Completed),
      "missed" => Ok(Self::Missed),
      "cancelled" => Ok(Self::Cancelled),
      "transformed" => Ok(Self::Transformed),
      _ => Err(format!("Unknown block status: {}", s)),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Training Block
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingBlock {
  pub id: i64,
  pub calendar_event_id: Option<String>,
  pub workout_type: WorkoutType,
  pub starts_at: DateTime<Utc>,
  pub ends_at: DateTime<Utc>,
  pub was_auto_scheduled: bool,
  pub status: BlockStatus,
}

/// For inserting new blocks (without id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrainingBlock {
  pub calendar_event_id: Option<String>,
  pub workout_type: WorkoutType,
  pub starts_at: DateTime<Utc>,
  pub ends_at: DateTime<Utc>,
  pub was_auto_scheduled: bool,
}

impl TrainingBlock {
  pub fn duration_minutes(&self) -> i64 {
    (self.ends_at - self.starts_at).num_minutes()
  }
}

type BlockRow = (i64, Option<String>, String, DateTime<Utc>, DateTime<Utc>, i64, String);

fn block_from_row(row: BlockRow) -> Option<TrainingBlock> {
  let (id, calendar_event_id, workout_type, starts_at, ends_at, auto, status) = row;
  Some(TrainingBlock {
    id,
    calendar_event_id,
    workout_type: workout_type.parse().ok()?,
    starts_at,
    ends_at,
    was_auto_scheduled: auto != 0,
    status: status.parse().ok()?,
  })
}

const BLOCK_COLUMNS: &str =
  "id, calendar_event_id, workout_type, starts_at, ends_at, was_auto_scheduled, status";

/// ---------------------------------------------------------------------------
/// Block Store
/// ---------------------------------------------------------------------------

/// Persistence for training blocks. The orchestrator is the only writer.
#[derive(Clone)]
pub struct BlockStore {
  pool: SqlitePool,
}

impl BlockStore {
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  pub async fn insert(&self, block: &NewTrainingBlock) -> Result<i64, CoreError> {
    let result = sqlx::query(
      r#"
      INSERT INTO training_blocks (
        calendar_event_id, workout_type, starts_at, ends_at, was_auto_scheduled, status
      )
      VALUES (?1, ?2, ?3, ?4, ?5, 'scheduled')
      "#,
    )
    .bind(&block.calendar_event_id)
    .bind(block.workout_type.as_str())
    .bind(block.starts_at)
    .bind(block.ends_at)
    .bind(block.was_auto_scheduled as i64)
    .execute(&self.pool)
    .await?;

    Ok(result.last_insert_rowid())
  }

  pub async fn get(&self, id: i64) -> Result<Option<TrainingBlock>, CoreError> {
    let row: Option<BlockRow> = sqlx::query_as(&format!(
      "SELECT {} FROM training_blocks WHERE id = ?1",
      BLOCK_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&self.pool)
    .await?;

    Ok(row.and_then(block_from_row))
  }

  /// Scheduled blocks starting on the given UTC calendar day
  pub async fn scheduled_on(&self, day: NaiveDate) -> Result<Vec<TrainingBlock>, CoreError> {
    let from = day.and_hms_opt(0, 0, 0).expect("valid midnight").and_utc();
    let to = from + Duration::days(1);

    let rows: Vec<BlockRow> = sqlx::query_as(&format!(
      r#"
      SELECT {}
      FROM training_blocks
      WHERE status = 'scheduled' AND starts_at >= ?1 AND starts_at < ?2
      ORDER BY starts_at ASC
      "#,
      BLOCK_COLUMNS
    ))
    .bind(from)
    .bind(to)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().filter_map(block_from_row).collect())
  }

  /// Scheduled blocks starting inside the range, soonest first
  pub async fn scheduled_between(
    &self,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<TrainingBlock>, CoreError> {
    let rows: Vec<BlockRow> = sqlx::query_as(&format!(
      r#"
      SELECT {}
      FROM training_blocks
      WHERE status = 'scheduled' AND starts_at >= ?1 AND starts_at < ?2
      ORDER BY starts_at ASC
      "#,
      BLOCK_COLUMNS
    ))
    .bind(from)
    .bind(to)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().filter_map(block_from_row).collect())
  }

  /// Scheduled blocks whose end time has already passed
  pub async fn overdue(&self, now: DateTime<Utc>) -> Result<Vec<TrainingBlock>, CoreError> {
    let rows: Vec<BlockRow> = sqlx::query_as(&format!(
      r#"
      SELECT {}
      FROM training_blocks
      WHERE status = 'scheduled' AND ends_at < ?1
      ORDER BY ends_at ASC
      "#,
      BLOCK_COLUMNS
    ))
    .bind(now)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().filter_map(block_from_row).collect())
  }

  /// Move a block to a terminal status. Returns false (and changes nothing)
  /// if the block has already left `scheduled`.
  pub async fn set_status(&self, id: i64, next: BlockStatus) -> Result<bool, CoreError> {
    let current = match self.get(id).await? {
      Some(block) => block.status,
      None => return Ok(false),
    };

    if !current.can_transition_to(next) {
      tracing::warn!(block_id = id, from = current.as_str(), to = next.as_str(),
        "refusing non-monotonic block status transition");
      return Ok(false);
    }

    sqlx::query("UPDATE training_blocks SET status = ?1 WHERE id = ?2")
      .bind(next.as_str())
      .bind(id)
      .execute(&self.pool)
      .await?;

    Ok(true)
  }

  /// Newest scheduled block matching a detected workout: same type, start
  /// within two hours either side.
  pub async fn find_match(
    &self,
    workout: &DetectedWorkout,
  ) -> Result<Option<TrainingBlock>, CoreError> {
    let from = workout.started_at - Duration::hours(2);
    let to = workout.started_at + Duration::hours(2);

    let rows: Vec<BlockRow> = sqlx::query_as(&format!(
      r#"
      SELECT {}
      FROM training_blocks
      WHERE status = 'scheduled' AND workout_type = ?1
        AND starts_at >= ?2 AND starts_at <= ?3
      ORDER BY starts_at DESC
      LIMIT 1
      "#,
      BLOCK_COLUMNS
    ))
    .bind(workout.workout_type.as_str())
    .bind(from)
    .bind(to)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().filter_map(block_from_row).next())
  }

  /// Count of blocks per status with a start inside the range
  pub async fn count_with_status(
    &self,
    status: BlockStatus,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<i64, CoreError> {
    let (count,): (i64,) = sqlx::query_as(
      r#"
      SELECT COUNT(*)
      FROM training_blocks
      WHERE status = ?1 AND starts_at >= ?2 AND starts_at < ?3
      "#,
    )
    .bind(status.as_str())
    .bind(from)
    .bind(to)
    .fetch_one(&self.pool)
    .await?;

    Ok(count)
  }

  /// Total completed minutes inside the range
  pub async fn completed_minutes(
    &self,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<i64, CoreError> {
    let rows: Vec<BlockRow> = sqlx::query_as(&format!(
      r#"
      SELECT {}
      FROM training_blocks
      WHERE status = 'completed' AND starts_at >= ?1 AND starts_at < ?2
      "#,
      BLOCK_COLUMNS
    ))
    .bind(from)
    .bind(to)
    .fetch_all(&self.pool)
    .await?;

    Ok(
      rows
        .into_iter()
        .filter_map(block_from_row)
        .map(|b| b.duration_minutes())
        .sum(),
    )
  }

  /// Distinct UTC days with a completed block, newest first
  pub async fn completed_days(&self, limit: i64) -> Result<Vec<NaiveDate>, CoreError> {
    let rows: Vec<(String,)> = sqlx::query_as(
      r#"
      SELECT DISTINCT date(starts_at)
      FROM training_blocks
      WHERE status = 'completed'
      ORDER BY date(starts_at) DESC
      LIMIT ?1
      "#,
    )
    .bind(limit)
    .fetch_all(&self.pool)
    .await?;

    Ok(
      rows
        .into_iter()
        .filter_map(|(d,)| d.parse().ok())
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::setup_test_db;
  use chrono::TimeZone;

  fn new_block(hour: u32, workout_type: WorkoutType) -> NewTrainingBlock {
    let starts_at = Utc.with_ymd_and_hms(2025, 6, 2, hour, 0, 0).unwrap();
    NewTrainingBlock {
      calendar_event_id: Some(format!("evt-{}", hour)),
      workout_type,
      starts_at,
      ends_at: starts_at + Duration::minutes(45),
      was_auto_scheduled: true,
    }
  }

  #[tokio::test]
  async fn test_insert_and_fetch_scheduled() {
    let pool = setup_test_db().await;
    let store = BlockStore::new(pool);

    let id = store.insert(&new_block(7, WorkoutType::Strength)).await.unwrap();
    let day = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();

    let blocks = store.scheduled_on(day).await.unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].id, id);
    assert_eq!(blocks[0].workout_type, WorkoutType::Strength);
    assert_eq!(blocks[0].status, BlockStatus::Scheduled);
  }

  #[tokio::test]
  async fn test_status_is_monotonic() {
    let pool = setup_test_db().await;
    let store = BlockStore::new(pool);
    let id = store.insert(&new_block(7, WorkoutType::Run)).await.unwrap();

    assert!(store.set_status(id, BlockStatus::Completed).await.unwrap());

    // A completed block cannot be cancelled, missed, or re-scheduled
    assert!(!store.set_status(id, BlockStatus::Cancelled).await.unwrap());
    assert!(!store.set_status(id, BlockStatus::Scheduled).await.unwrap());

    let block = store.get(id).await.unwrap().unwrap();
    assert_eq!(block.status, BlockStatus::Completed);
  }

  #[tokio::test]
  async fn test_find_match_requires_type_and_time() {
    let pool = setup_test_db().await;
    let store = BlockStore::new(pool);
    let id = store.insert(&new_block(7, WorkoutType::Run)).await.unwrap();

    let near = DetectedWorkout {
      workout_type: WorkoutType::Run,
      started_at: Utc.with_ymd_and_hms(2025, 6, 2, 8, 30, 0).unwrap(),
      duration_minutes: 40,
      source: "watch".into(),
    };
    assert_eq!(store.find_match(&near).await.unwrap().unwrap().id, id);

    let wrong_type = DetectedWorkout {
      workout_type: WorkoutType::Cycling,
      ..near.clone()
    };
    assert!(store.find_match(&wrong_type).await.unwrap().is_none());

    let too_late = DetectedWorkout {
      started_at: Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap(),
      ..near
    };
    assert!(store.find_match(&too_late).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_overdue_excludes_terminal_blocks() {
    let pool = setup_test_db().await;
    let store = BlockStore::new(pool);

    let missed = store.insert(&new_block(7, WorkoutType::Run)).await.unwrap();
    let done = store.insert(&new_block(8, WorkoutType::Hiit)).await.unwrap();
    store.set_status(done, BlockStatus::Completed).await.unwrap();

    let now = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
    let overdue = store.overdue(now).await.unwrap();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].id, missed);
  }
}
