//! Collaborator interfaces
//!
//! The core never talks to a wearable, a calendar platform, or a push
//! service directly. The host injects implementations of these traits; the
//! tests inject mocks from `test_utils`. All traits are object-safe so they
//! can live behind `Arc<dyn ...>`.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::generator::UserPreferences;
use crate::models::{
  DetectedWorkout, HrvRecord, Interval, SleepRecord, TimeWindow, TrainingBlock, Workout,
};
use crate::orchestrator::WeeklyValueReport;

/// ---------------------------------------------------------------------------
/// Biometric Source
/// ---------------------------------------------------------------------------

#[async_trait]
pub trait BiometricSource: Send + Sync {
  async fn recent_sleep(&self, days: u32) -> Result<Vec<SleepRecord>, CoreError>;
  async fn recent_hrv(&self, days: u32) -> Result<Vec<HrvRecord>, CoreError>;
  /// Resting heart rates, newest first
  async fn recent_resting_hr(&self, days: u32) -> Result<Vec<i64>, CoreError>;
  async fn recent_workouts(&self, days: u32) -> Result<Vec<DetectedWorkout>, CoreError>;
}

/// ---------------------------------------------------------------------------
/// Calendar Adapter
/// ---------------------------------------------------------------------------

/// A raw calendar entry, used for busy checks and sacred-time mining
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
  pub title: String,
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
}

#[async_trait]
pub trait CalendarAdapter: Send + Sync {
  async fn busy_slots(
    &self,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<Interval>, CoreError>;

  /// Writes the block to the calendar and returns the platform event id.
  /// This is the commit point of every mutating sequence.
  async fn create_block(
    &self,
    workout: &Workout,
    window: &TimeWindow,
  ) -> Result<String, CoreError>;

  async fn remove_block(&self, block: &TrainingBlock) -> Result<(), CoreError>;

  async fn reschedule_block(
    &self,
    event_id: &str,
    new_start: DateTime<Utc>,
  ) -> Result<(), CoreError>;

  /// All events in the range, for sacred-time pattern mining
  async fn all_events(
    &self,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<CalendarEvent>, CoreError>;
}

/// ---------------------------------------------------------------------------
/// Notification Adapter
/// ---------------------------------------------------------------------------

/// User-facing messages. Health-mode changes are deliberately absent from
/// this interface: system diagnostics are not user-actionable.
#[async_trait]
pub trait NotificationAdapter: Send + Sync {
  async fn send_proposal(&self, workout: &Workout, window: &TimeWindow) -> Result<(), CoreError>;
  async fn send_confirmation(&self, workout: &DetectedWorkout) -> Result<(), CoreError>;
  async fn send_removal_notice(&self, block: &TrainingBlock, reason: &str)
    -> Result<(), CoreError>;
  async fn send_transformation_notice(
    &self,
    block: &TrainingBlock,
    new_workout: &Workout,
    reason: &str,
  ) -> Result<(), CoreError>;
  async fn send_weekly_report(&self, report: &WeeklyValueReport) -> Result<(), CoreError>;
  /// A conflicted block could not be moved; the user decides what to do
  async fn send_conflict_alert(&self, block: &TrainingBlock, reason: &str)
    -> Result<(), CoreError>;
  /// Rate-limited to one per day by the disambiguator
  async fn send_triage_request(&self, block: &TrainingBlock) -> Result<(), CoreError>;
}

/// ---------------------------------------------------------------------------
/// Remote Generation Fallback
/// ---------------------------------------------------------------------------

/// Privacy-scrubbed state handed to the remote generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymizedSnapshot {
  pub recovery_score: Option<f64>,
  pub recent_workout_types: Vec<String>,
  pub minutes_this_week: i64,
}

#[async_trait]
pub trait RemoteGenerator: Send + Sync {
  async fn generate(
    &self,
    window: &TimeWindow,
    preferences: &UserPreferences,
    snapshot: &AnonymizedSnapshot,
  ) -> Result<Workout, CoreError>;
}

/// ---------------------------------------------------------------------------
/// Trust Gate
/// ---------------------------------------------------------------------------

/// Autonomy phase granted by the external trust system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustPhase {
  Observing,
  Proposing,
  Scheduling,
  Autonomous,
}

impl TrustPhase {
  pub fn as_str(&self) -> &'static str {
    match self {
      TrustPhase::Observing => "observing",
      TrustPhase::Proposing => "proposing",
      TrustPhase::Scheduling => "scheduling",
      TrustPhase::Autonomous => "autonomous",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustCapability {
  Propose,
  AutoSchedule,
  AutoTransform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "detail", rename_all = "snake_case")]
pub enum TrustEvent {
  Positive(String),
  Negative(String),
}

#[async_trait]
pub trait TrustGate: Send + Sync {
  async fn current_phase(&self) -> Result<TrustPhase, CoreError>;
  async fn capabilities(&self, phase: TrustPhase) -> Result<HashSet<TrustCapability>, CoreError>;
  async fn record_event(&self, event: TrustEvent) -> Result<(), CoreError>;
}

/// ---------------------------------------------------------------------------
/// Pattern Learning
/// ---------------------------------------------------------------------------

/// Observation fed to the behavioral pattern learner when a block is missed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternObservation {
  pub weekday: u8,
  pub hour: u8,
  pub workout_type: String,
  pub cause: String,
}

pub trait PatternLearner: Send + Sync {
  fn observe(&self, observation: PatternObservation);
}

/// ---------------------------------------------------------------------------
/// Cycle Scheduling
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
  Morning,
  Evening,
  Weekly,
}

impl CycleKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      CycleKind::Morning => "morning",
      CycleKind::Evening => "evening",
      CycleKind::Weekly => "weekly",
    }
  }
}

/// Host-side background scheduler. The core registers the cycles it wants
/// run "at approximately hour H"; the host decides the exact mechanism.
pub trait CycleScheduler: Send + Sync {
  fn schedule(&self, cycle: CycleKind, hour: u32);
}
