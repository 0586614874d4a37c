//! Missed-block triage
//!
//! When a scheduled block goes by without a matching workout, the
//! disambiguator works out why. Cheap signals are tried first; the user is
//! only asked when every automatic rule comes up empty, and never more than
//! once per day. An unanswered question expires to `unknown` after 24 hours
//! rather than nagging.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::adapters::{
  BiometricSource, CalendarAdapter, NotificationAdapter, PatternLearner, PatternObservation,
  TrustEvent, TrustGate,
};
use crate::config::CoreConfig;
use crate::db::StateStore;
use crate::error::CoreError;
use crate::ledger::DecisionLedger;
use crate::models::receipt::{ActionKind, NewReceipt, Outcome};
use crate::models::sacred::SlotKey;
use crate::models::TrainingBlock;

/// ---------------------------------------------------------------------------
/// Failure Causes
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
  /// The slot keeps not working out; scheduling should avoid it
  BadTimeSlot,
  /// The user was under-recovered, not mis-scheduled
  TooTired,
  /// An unusually packed day crowded the block out
  LifeHappened,
  Unknown,
}

impl FailureCause {
  pub fn as_str(&self) -> &'static str {
    match self {
      FailureCause::BadTimeSlot => "bad_time_slot",
      FailureCause::TooTired => "too_tired",
      FailureCause::LifeHappened => "life_happened",
      FailureCause::Unknown => "unknown",
    }
  }

  /// Whether the cause indicts the slot rather than the user's state
  pub fn is_schedule_attributable(&self) -> bool {
    matches!(self, FailureCause::BadTimeSlot | FailureCause::LifeHappened)
  }
}

impl std::str::FromStr for FailureCause {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "bad_time_slot" => Ok(Self::BadTimeSlot),
      "too_tired" => Ok(Self::TooTired),
      "life_happened" => Ok(Self::LifeHappened),
      "unknown" => Ok(Self::Unknown),
      _ => Err(format!("Unknown failure cause: {}", s)),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriageOutcome {
  /// An automatic rule produced an answer
  Attributed(FailureCause),
  /// The user was asked; an answer may arrive later
  Asked,
  /// Already waiting on an answer for this block
  AlreadyPending,
  /// Daily question budget spent; recorded as unknown without asking
  SilentUnknown,
}

/// An open question to the user, persisted across restarts
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingTriage {
  block_id: i64,
  weekday: u8,
  hour: u8,
  workout_type: String,
  asked_at: DateTime<Utc>,
}

const PENDING_KEY: &str = "triage:pending";
const PENDING_EXPIRY_HOURS: i64 = 24;

/// Penalty count at which a slot is considered problematic
const PROBLEMATIC_PENALTIES: i64 = 3;

/// ---------------------------------------------------------------------------
/// Disambiguator
/// ---------------------------------------------------------------------------

pub struct FailureDisambiguator {
  pool: SqlitePool,
  state: StateStore,
  biometrics: Arc<dyn BiometricSource>,
  calendar: Arc<dyn CalendarAdapter>,
  notifications: Arc<dyn NotificationAdapter>,
  trust: Arc<dyn TrustGate>,
  learner: Arc<dyn PatternLearner>,
  ledger: Arc<DecisionLedger>,
  config: CoreConfig,
}

impl FailureDisambiguator {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    pool: SqlitePool,
    biometrics: Arc<dyn BiometricSource>,
    calendar: Arc<dyn CalendarAdapter>,
    notifications: Arc<dyn NotificationAdapter>,
    trust: Arc<dyn TrustGate>,
    learner: Arc<dyn PatternLearner>,
    ledger: Arc<DecisionLedger>,
    config: CoreConfig,
  ) -> Self {
    Self {
      state: StateStore::new(pool.clone()),
      pool,
      biometrics,
      calendar,
      notifications,
      trust,
      learner,
      ledger,
      config,
    }
  }

  /// Triage one missed block. At most one triage per day: a second
  /// same-day miss is recorded as unknown before any rule runs.
  pub async fn triage_missed(&self, block: &TrainingBlock) -> Result<TriageOutcome, CoreError> {
    let mut pending = self.load_pending().await?;
    if pending.iter().any(|p| p.block_id == block.id) {
      return Ok(TriageOutcome::AlreadyPending);
    }

    let now = Utc::now();
    let quota_key = format!("triage_asks:{}", now.date_naive());
    if !pending.is_empty()
      || self.state.get_counter(&quota_key).await? >= self.config.daily_triage_quota
    {
      self
        .record_cause(block, FailureCause::Unknown, "quota")
        .await?;
      return Ok(TriageOutcome::SilentUnknown);
    }

    if let Some(cause) = self.attribute_automatically(block).await? {
      self.record_cause(block, cause, "auto").await?;
      return Ok(TriageOutcome::Attributed(cause));
    }

    self.notifications.send_triage_request(block).await?;
    self.state.increment(&quota_key).await?;

    pending.push(PendingTriage {
      block_id: block.id,
      weekday: block.starts_at.weekday().num_days_from_monday() as u8,
      hour: block.starts_at.hour() as u8,
      workout_type: block.workout_type.as_str().to_string(),
      asked_at: now,
    });
    self.store_pending(&pending).await?;

    Ok(TriageOutcome::Asked)
  }

  /// Apply a user's answer to an open question. Returns false when nothing
  /// was pending for the block.
  pub async fn resolve_pending(
    &self,
    block_id: i64,
    cause: FailureCause,
  ) -> Result<bool, CoreError> {
    let mut pending = self.load_pending().await?;
    let Some(pos) = pending.iter().position(|p| p.block_id == block_id) else {
      return Ok(false);
    };
    let entry = pending.remove(pos);
    self.store_pending(&pending).await?;

    self.record_entry(&entry, cause, "user").await?;
    Ok(true)
  }

  /// Expire unanswered questions older than 24 hours to `unknown`
  pub async fn expire_pending(&self, now: DateTime<Utc>) -> Result<usize, CoreError> {
    let pending = self.load_pending().await?;
    let cutoff = now - Duration::hours(PENDING_EXPIRY_HOURS);

    let (expired, kept): (Vec<_>, Vec<_>) =
      pending.into_iter().partition(|p| p.asked_at < cutoff);
    if expired.is_empty() {
      return Ok(0);
    }

    self.store_pending(&kept).await?;
    let count = expired.len();
    for entry in expired {
      self
        .record_entry(&entry, FailureCause::Unknown, "expired")
        .await?;
    }
    Ok(count)
  }

  /// Slots the scheduler should route around
  pub async fn problematic_slots(&self) -> Result<Vec<SlotKey>, CoreError> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
      "SELECT weekday, hour FROM slot_penalties WHERE penalties >= ?1 ORDER BY weekday, hour",
    )
    .bind(PROBLEMATIC_PENALTIES)
    .fetch_all(&self.pool)
    .await?;

    Ok(
      rows
        .into_iter()
        .map(|(weekday, hour)| SlotKey {
          weekday: weekday as u8,
          hour: hour as u8,
        })
        .collect(),
    )
  }

  /// Automatic attribution, cheapest signal first
  async fn attribute_automatically(
    &self,
    block: &TrainingBlock,
  ) -> Result<Option<FailureCause>, CoreError> {
    let slot = SlotKey::new(block.starts_at.weekday(), block.starts_at.hour());
    if self.penalty_count(slot).await? >= 2 {
      return Ok(Some(FailureCause::BadTimeSlot));
    }

    let sleep = self.biometrics.recent_sleep(1).await?;
    if let Some(last_night) = sleep.first() {
      if last_night.duration_hours < 5.0 {
        return Ok(Some(FailureCause::TooTired));
      }
    }

    if self.was_unusually_busy(block.starts_at).await? {
      return Ok(Some(FailureCause::LifeHappened));
    }

    Ok(None)
  }

  /// A day is unusually busy when it carries more than 1.5x the trailing
  /// 30-day average event count
  async fn was_unusually_busy(&self, day: DateTime<Utc>) -> Result<bool, CoreError> {
    let day_start = day
      .date_naive()
      .and_hms_opt(0, 0, 0)
      .expect("valid midnight")
      .and_utc();
    let day_events = self
      .calendar
      .all_events(day_start, day_start + Duration::days(1))
      .await?
      .len() as f64;

    let history = self
      .calendar
      .all_events(day_start - Duration::days(30), day_start)
      .await?
      .len() as f64;
    let daily_average = history / 30.0;

    Ok(daily_average > 0.0 && day_events > 1.5 * daily_average)
  }

  async fn penalty_count(&self, slot: SlotKey) -> Result<i64, CoreError> {
    let row: Option<(i64,)> =
      sqlx::query_as("SELECT penalties FROM slot_penalties WHERE weekday = ?1 AND hour = ?2")
        .bind(slot.weekday as i64)
        .bind(slot.hour as i64)
        .fetch_optional(&self.pool)
        .await?;
    Ok(row.map(|(p,)| p).unwrap_or(0))
  }

  async fn bump_penalty(&self, slot: SlotKey) -> Result<(), CoreError> {
    sqlx::query(
      r#"
      INSERT INTO slot_penalties (weekday, hour, penalties, updated_at)
      VALUES (?1, ?2, 1, datetime('now'))
      ON CONFLICT(weekday, hour)
      DO UPDATE SET penalties = penalties + 1, updated_at = datetime('now')
      "#,
    )
    .bind(slot.weekday as i64)
    .bind(slot.hour as i64)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn record_cause(
    &self,
    block: &TrainingBlock,
    cause: FailureCause,
    via: &str,
  ) -> Result<(), CoreError> {
    let entry = PendingTriage {
      block_id: block.id,
      weekday: block.starts_at.weekday().num_days_from_monday() as u8,
      hour: block.starts_at.hour() as u8,
      workout_type: block.workout_type.as_str().to_string(),
      asked_at: Utc::now(),
    };
    self.record_entry(&entry, cause, via).await
  }

  /// Shared tail of every attribution path: penalties, pattern learning,
  /// trust signal, receipt.
  async fn record_entry(
    &self,
    entry: &PendingTriage,
    cause: FailureCause,
    via: &str,
  ) -> Result<(), CoreError> {
    let slot = SlotKey {
      weekday: entry.weekday,
      hour: entry.hour,
    };

    if cause.is_schedule_attributable() {
      self.bump_penalty(slot).await?;
    }

    self.learner.observe(PatternObservation {
      weekday: entry.weekday,
      hour: entry.hour,
      workout_type: entry.workout_type.clone(),
      cause: cause.as_str().to_string(),
    });

    self
      .trust
      .record_event(TrustEvent::Negative(format!(
        "block missed: {}",
        cause.as_str()
      )))
      .await?;

    self
      .ledger
      .record(
        NewReceipt::new(ActionKind::TriageRecorded)
          .input("block_id", entry.block_id)
          .input("cause", cause.as_str())
          .input("via", via)
          .input("weekday", entry.weekday)
          .input("hour", entry.hour)
          .outcome(Outcome::Success),
      )
      .await?;

    tracing::info!(
      block_id = entry.block_id,
      cause = cause.as_str(),
      via,
      "missed block triaged"
    );
    Ok(())
  }

  async fn load_pending(&self) -> Result<Vec<PendingTriage>, CoreError> {
    match self.state.get(PENDING_KEY).await? {
      Some(json) => Ok(serde_json::from_str(&json)?),
      None => Ok(Vec::new()),
    }
  }

  async fn store_pending(&self, pending: &[PendingTriage]) -> Result<(), CoreError> {
    self
      .state
      .set(PENDING_KEY, &serde_json::to_string(pending)?)
      .await
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
