//! Shared test fixtures: an in-memory database and mock collaborators

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::adapters::{
  AnonymizedSnapshot, BiometricSource, CalendarAdapter, CalendarEvent, NotificationAdapter,
  PatternLearner, PatternObservation, RemoteGenerator, TrustCapability, TrustEvent, TrustGate,
  TrustPhase,
};
use crate::error::CoreError;
use crate::generator::UserPreferences;
use crate::ledger::DecisionLedger;
use crate::models::{
  DetectedWorkout, HrvRecord, Interval, SleepRecord, TimeWindow, TrainingBlock, Workout,
};
use crate::orchestrator::WeeklyValueReport;

/// In-memory database with migrations applied. One connection so the
/// `:memory:` database survives for the whole test.
pub async fn setup_test_db() -> SqlitePool {
  let pool = SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("in-memory sqlite");

  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("migrations");

  pool
}

pub async fn test_ledger(pool: SqlitePool) -> DecisionLedger {
  DecisionLedger::new(pool, 90, 10).await.expect("ledger")
}

/// ---------------------------------------------------------------------------
/// Mock Calendar
/// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockCalendar {
  pub events: Mutex<Vec<CalendarEvent>>,
  pub busy: Mutex<Vec<Interval>>,
  pub created: Mutex<Vec<(Workout, TimeWindow)>>,
  pub removed: Mutex<Vec<String>>,
  pub rescheduled: Mutex<Vec<(String, DateTime<Utc>)>>,
  pub fail_busy: AtomicBool,
  pub fail_create: AtomicBool,
  pub fail_remove: AtomicBool,
  pub next_event: AtomicU64,
}

#[async_trait]
impl CalendarAdapter for MockCalendar {
  async fn busy_slots(
    &self,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<Interval>, CoreError> {
    if self.fail_busy.load(Ordering::SeqCst) {
      return Err(CoreError::Transient("calendar unreachable".into()));
    }
    let range = Interval::new(from, to);
    Ok(
      self
        .busy
        .lock()
        .unwrap()
        .iter()
        .filter(|b| b.overlaps(&range))
        .copied()
        .collect(),
    )
  }

  async fn create_block(
    &self,
    workout: &Workout,
    window: &TimeWindow,
  ) -> Result<String, CoreError> {
    if self.fail_create.load(Ordering::SeqCst) {
      return Err(CoreError::Transient("calendar write rejected".into()));
    }
    let id = format!("mock-evt-{}", self.next_event.fetch_add(1, Ordering::SeqCst));
    self.created.lock().unwrap().push((workout.clone(), *window));
    Ok(id)
  }

  async fn remove_block(&self, block: &TrainingBlock) -> Result<(), CoreError> {
    if self.fail_remove.load(Ordering::SeqCst) {
      return Err(CoreError::Transient("calendar delete rejected".into()));
    }
    let event_id = block.calendar_event_id.clone().unwrap_or_default();
    self.removed.lock().unwrap().push(event_id);
    Ok(())
  }

  async fn reschedule_block(
    &self,
    event_id: &str,
    new_start: DateTime<Utc>,
  ) -> Result<(), CoreError> {
    self
      .rescheduled
      .lock()
      .unwrap()
      .push((event_id.to_string(), new_start));
    Ok(())
  }

  async fn all_events(
    &self,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<CalendarEvent>, CoreError> {
    Ok(
      self
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.start >= from && e.start < to)
        .cloned()
        .collect(),
    )
  }
}

/// ---------------------------------------------------------------------------
/// Mock Biometrics
/// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockBiometrics {
  pub sleep: Vec<SleepRecord>,
  pub hrv: Vec<HrvRecord>,
  pub resting_hr: Vec<i64>,
  pub workouts: Vec<DetectedWorkout>,
}

#[async_trait]
impl BiometricSource for MockBiometrics {
  async fn recent_sleep(&self, _days: u32) -> Result<Vec<SleepRecord>, CoreError> {
    Ok(self.sleep.clone())
  }

  async fn recent_hrv(&self, _days: u32) -> Result<Vec<HrvRecord>, CoreError> {
    Ok(self.hrv.clone())
  }

  async fn recent_resting_hr(&self, _days: u32) -> Result<Vec<i64>, CoreError> {
    Ok(self.resting_hr.clone())
  }

  async fn recent_workouts(&self, _days: u32) -> Result<Vec<DetectedWorkout>, CoreError> {
    Ok(self.workouts.clone())
  }
}

/// ---------------------------------------------------------------------------
/// Mock Notifications
/// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockNotifications {
  pub proposals: Mutex<Vec<(Workout, TimeWindow)>>,
  pub confirmations: Mutex<Vec<DetectedWorkout>>,
  pub removals: Mutex<Vec<(i64, String)>>,
  pub transformations: Mutex<Vec<(i64, String)>>,
  pub weekly_reports: Mutex<Vec<WeeklyValueReport>>,
  pub conflict_alerts: Mutex<Vec<(i64, String)>>,
  pub triage_requests: Mutex<Vec<i64>>,
}

#[async_trait]
impl NotificationAdapter for MockNotifications {
  async fn send_proposal(&self, workout: &Workout, window: &TimeWindow) -> Result<(), CoreError> {
    self.proposals.lock().unwrap().push((workout.clone(), *window));
    Ok(())
  }

  async fn send_confirmation(&self, workout: &DetectedWorkout) -> Result<(), CoreError> {
    self.confirmations.lock().unwrap().push(workout.clone());
    Ok(())
  }

  async fn send_removal_notice(
    &self,
    block: &TrainingBlock,
    reason: &str,
  ) -> Result<(), CoreError> {
    self.removals.lock().unwrap().push((block.id, reason.to_string()));
    Ok(())
  }

  async fn send_transformation_notice(
    &self,
    block: &TrainingBlock,
    _new_workout: &Workout,
    reason: &str,
  ) -> Result<(), CoreError> {
    self
      .transformations
      .lock()
      .unwrap()
      .push((block.id, reason.to_string()));
    Ok(())
  }

  async fn send_weekly_report(&self, report: &WeeklyValueReport) -> Result<(), CoreError> {
    self.weekly_reports.lock().unwrap().push(report.clone());
    Ok(())
  }

  async fn send_conflict_alert(
    &self,
    block: &TrainingBlock,
    reason: &str,
  ) -> Result<(), CoreError> {
    self
      .conflict_alerts
      .lock()
      .unwrap()
      .push((block.id, reason.to_string()));
    Ok(())
  }

  async fn send_triage_request(&self, block: &TrainingBlock) -> Result<(), CoreError> {
    self.triage_requests.lock().unwrap().push(block.id);
    Ok(())
  }
}

/// ---------------------------------------------------------------------------
/// Mock Remote Generator
/// ---------------------------------------------------------------------------

/// Unreachable by default; seed `workout` to simulate a reachable service.
#[derive(Default)]
pub struct MockRemoteGenerator {
  pub workout: Mutex<Option<Workout>>,
  pub calls: AtomicU64,
}

#[async_trait]
impl RemoteGenerator for MockRemoteGenerator {
  async fn generate(
    &self,
    _window: &TimeWindow,
    _preferences: &UserPreferences,
    _snapshot: &AnonymizedSnapshot,
  ) -> Result<Workout, CoreError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    match self.workout.lock().unwrap().clone() {
      Some(workout) => Ok(workout),
      None => Err(CoreError::CapabilityUnavailable("remote generator offline".into())),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Mock Trust Gate
/// ---------------------------------------------------------------------------

pub struct MockTrustGate {
  pub phase: Mutex<TrustPhase>,
  pub caps: Mutex<HashSet<TrustCapability>>,
  pub events: Mutex<Vec<TrustEvent>>,
}

impl Default for MockTrustGate {
  fn default() -> Self {
    Self::with_capabilities([TrustCapability::Propose])
  }
}

impl MockTrustGate {
  pub fn with_capabilities(caps: impl IntoIterator<Item = TrustCapability>) -> Self {
    let caps: HashSet<TrustCapability> = caps.into_iter().collect();
    let phase = if caps.contains(&TrustCapability::AutoTransform) {
      TrustPhase::Autonomous
    } else if caps.contains(&TrustCapability::AutoSchedule) {
      TrustPhase::Scheduling
    } else if caps.contains(&TrustCapability::Propose) {
      TrustPhase::Proposing
    } else {
      TrustPhase::Observing
    };

    Self {
      phase: Mutex::new(phase),
      caps: Mutex::new(caps),
      events: Mutex::new(Vec::new()),
    }
  }
}

#[async_trait]
impl TrustGate for MockTrustGate {
  async fn current_phase(&self) -> Result<TrustPhase, CoreError> {
    Ok(*self.phase.lock().unwrap())
  }

  async fn capabilities(
    &self,
    _phase: TrustPhase,
  ) -> Result<HashSet<TrustCapability>, CoreError> {
    Ok(self.caps.lock().unwrap().clone())
  }

  async fn record_event(&self, event: TrustEvent) -> Result<(), CoreError> {
    self.events.lock().unwrap().push(event);
    Ok(())
  }
}

/// ---------------------------------------------------------------------------
/// Pattern Learner
/// ---------------------------------------------------------------------------

pub struct NullLearner;

impl PatternLearner for NullLearner {
  fn observe(&self, _observation: PatternObservation) {}
}
