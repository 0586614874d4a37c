//! Background cycle orchestration
//!
//! Three daily rhythms drive the whole system: the morning cycle adjusts
//! today's plan to last night's recovery, the evening cycle plans tomorrow,
//! and the weekly cycle reports value and does maintenance. Each cycle is
//! idempotent per day, retried with a short backoff, and halted entirely
//! while the health monitor holds the core suspended.
//!
//! Every calendar write is the commit point of its sequence: local rows and
//! notifications only follow a successful write, so a crash can at worst
//! leave an event the next cycle reconciles, never a phantom local record.
//! Failures past a commit point are logged, never retried, so a retry can
//! never write the same event twice.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::adapters::{
  AnonymizedSnapshot, BiometricSource, CalendarAdapter, CycleKind, CycleScheduler,
  NotificationAdapter, RemoteGenerator, TrustCapability, TrustEvent, TrustGate,
};
use crate::config::CoreConfig;
use crate::conflict::{
  classify_conflict, Conflict, ConflictSeverity, ResolveOutcome, ScheduleConflictResolver,
  ScoredWindow,
};
use crate::db::StateStore;
use crate::error::CoreError;
use crate::generator::{LocalWorkoutGenerator, UserPreferences};
use crate::health::HealthDegradationMonitor;
use crate::ledger::DecisionLedger;
use crate::models::health::FailureKind;
use crate::models::receipt::{ActionKind, NewReceipt, Outcome};
use crate::models::recovery::{BlockAdjustment, RecoveryAnalysis};
use crate::models::sacred::SlotKey;
use crate::models::{
  BlockStatus, BlockStore, DetectedWorkout, Interval, NewTrainingBlock, TrainingBlock, Workout,
  WorkoutType,
};
use crate::recovery::{RecoveryInputs, RecoveryScorer};
use crate::triage::FailureDisambiguator;

/// Minutes of planning effort credited per autonomous decision
const MINUTES_SAVED_PER_DECISION: i64 = 5;

/// Length of the window the evening cycle books
const DEFAULT_SESSION_MINUTES: i64 = 60;

const BREAKER_COUNT_KEY: &str = "breaker:consecutive";
const BREAKER_TRIPPED_KEY: &str = "breaker:tripped";

/// ---------------------------------------------------------------------------
/// Reports
/// ---------------------------------------------------------------------------

/// The weekly "what did autonomy buy you" summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyValueReport {
  pub week_start: NaiveDate,
  pub blocks_completed: i64,
  pub blocks_scheduled: i64,
  pub blocks_missed: i64,
  pub blocks_transformed: i64,
  pub minutes_trained: i64,
  pub decisions: i64,
  pub minutes_saved: i64,
  pub day_streak: i64,
  /// Recurring calendar patterns currently protected as sacred
  pub detected_patterns: i64,
  pub trust_phase: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
  Completed,
  /// The idempotence stamp for this period already exists
  AlreadyRan,
  /// The health monitor holds the core suspended
  Suspended,
  Failed(String),
}

/// ---------------------------------------------------------------------------
/// Orchestrator
/// ---------------------------------------------------------------------------

pub struct GhostOrchestrator {
  blocks: BlockStore,
  state: StateStore,
  ledger: Arc<DecisionLedger>,
  health: Arc<HealthDegradationMonitor>,
  resolver: Arc<ScheduleConflictResolver>,
  triage: Arc<FailureDisambiguator>,
  generator: LocalWorkoutGenerator,
  remote: Arc<dyn RemoteGenerator>,
  biometrics: Arc<dyn BiometricSource>,
  calendar: Arc<dyn CalendarAdapter>,
  notifications: Arc<dyn NotificationAdapter>,
  trust: Arc<dyn TrustGate>,
  prefs: UserPreferences,
  config: CoreConfig,
}

impl GhostOrchestrator {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    pool: sqlx::SqlitePool,
    ledger: Arc<DecisionLedger>,
    health: Arc<HealthDegradationMonitor>,
    resolver: Arc<ScheduleConflictResolver>,
    triage: Arc<FailureDisambiguator>,
    remote: Arc<dyn RemoteGenerator>,
    biometrics: Arc<dyn BiometricSource>,
    calendar: Arc<dyn CalendarAdapter>,
    notifications: Arc<dyn NotificationAdapter>,
    trust: Arc<dyn TrustGate>,
    prefs: UserPreferences,
    config: CoreConfig,
  ) -> Self {
    Self {
      blocks: BlockStore::new(pool.clone()),
      state: StateStore::new(pool),
      ledger,
      health,
      resolver,
      triage,
      generator: LocalWorkoutGenerator::new(config.window_buffer_minutes),
      remote,
      biometrics,
      calendar,
      notifications,
      trust,
      prefs,
      config,
    }
  }

  /// Register the three cycles with the host's background scheduler
  pub fn register_cycles(&self, scheduler: &dyn CycleScheduler) {
    scheduler.schedule(CycleKind::Morning, 6);
    scheduler.schedule(CycleKind::Evening, 20);
    scheduler.schedule(CycleKind::Weekly, 18);
  }

  /// Run one cycle: suspension and idempotence guards, then the body with
  /// bounded retries. An exhausted cycle counts toward the safety breaker.
  pub async fn run_cycle(&self, kind: CycleKind) -> Result<CycleOutcome, CoreError> {
    if self.health.is_suspended().await {
      tracing::warn!(cycle = kind.as_str(), "cycle skipped while suspended");
      return Ok(CycleOutcome::Suspended);
    }

    let stamp = Self::stamp_key(kind, Utc::now());
    if self.state.get(&stamp).await?.is_some() {
      tracing::debug!(cycle = kind.as_str(), "cycle already ran this period");
      return Ok(CycleOutcome::AlreadyRan);
    }

    let mut last_error = String::new();
    let delays: Vec<u64> = std::iter::once(0)
      .chain(self.config.retry_backoff_secs.iter().copied())
      .collect();

    for (attempt, delay) in delays.into_iter().enumerate() {
      if delay > 0 {
        tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
      }

      match self.cycle_body(kind).await {
        Ok(skip) => {
          self.state.set(&stamp, &Utc::now().to_rfc3339()).await?;
          self.reset_breaker().await?;

          let outcome = match skip {
            None => Outcome::Success,
            Some(reason) => Outcome::Skipped(reason),
          };
          self
            .ledger
            .record(
              NewReceipt::new(Self::cycle_action(kind))
                .input("attempt", attempt as i64)
                .outcome(outcome),
            )
            .await?;
          return Ok(CycleOutcome::Completed);
        }
        Err(err) => {
          tracing::warn!(cycle = kind.as_str(), attempt, error = %err, "cycle attempt failed");
          last_error = err.to_string();
        }
      }
    }

    if let Err(report_err) = self.health.report_failure(FailureKind::Cycle).await {
      tracing::warn!(error = %report_err, "could not report cycle failure to health monitor");
    }

    self
      .ledger
      .record(
        NewReceipt::new(Self::cycle_action(kind)).outcome(Outcome::Failure(last_error.clone())),
      )
      .await?;

    let consecutive = self.state.increment(BREAKER_COUNT_KEY).await?;
    if consecutive >= self.config.safety_breaker_limit
      && self.state.get(BREAKER_TRIPPED_KEY).await?.is_none()
    {
      self.state.set(BREAKER_TRIPPED_KEY, &Utc::now().to_rfc3339()).await?;
      self
        .ledger
        .record(
          NewReceipt::new(ActionKind::SafetyBreakerTriggered)
            .input("consecutive_failures", consecutive)
            .outcome(Outcome::Success),
        )
        .await?;
      tracing::error!(consecutive, "safety breaker tripped, autonomy reduced to proposals");
    }

    Ok(CycleOutcome::Failed(last_error))
  }

  /// Credit a detected workout against its scheduled block. Safe to call
  /// repeatedly: a block leaves `scheduled` on the first credit.
  pub async fn on_workout_detected(&self, workout: &DetectedWorkout) -> Result<(), CoreError> {
    if self.health.is_suspended().await {
      tracing::warn!("workout credit skipped while suspended");
      return Ok(());
    }

    let Some(block) = self.blocks.find_match(workout).await? else {
      self
        .ledger
        .record(
          NewReceipt::new(ActionKind::WorkoutDetected)
            .input("workout_type", workout.workout_type.as_str())
            .input("source", &workout.source)
            .outcome(Outcome::Skipped("no matching block".into())),
        )
        .await?;
      return Ok(());
    };

    if !self.blocks.set_status(block.id, BlockStatus::Completed).await? {
      return Ok(());
    }

    self.reset_breaker().await?;
    self
      .trust
      .record_event(TrustEvent::Positive(format!(
        "completed scheduled {}",
        workout.workout_type.as_str()
      )))
      .await?;
    self.notifications.send_confirmation(workout).await?;

    self
      .ledger
      .record(
        NewReceipt::new(ActionKind::WorkoutDetected)
          .input("block_id", block.id)
          .input("workout_type", workout.workout_type.as_str())
          .input("duration_minutes", workout.duration_minutes)
          .outcome(Outcome::Success)
          .trust_delta(1.0),
      )
      .await?;

    tracing::info!(block_id = block.id, "detected workout credited to block");
    Ok(())
  }

  fn cycle_action(kind: CycleKind) -> ActionKind {
    match kind {
      CycleKind::Morning => ActionKind::MorningCycle,
      CycleKind::Evening => ActionKind::EveningCycle,
      CycleKind::Weekly => ActionKind::WeeklyCycle,
    }
  }

  fn stamp_key(kind: CycleKind, now: DateTime<Utc>) -> String {
    match kind {
      CycleKind::Weekly => {
        let week = now.iso_week();
        format!("cycle:weekly:{}-W{:02}", week.year(), week.week())
      }
      _ => format!("cycle:{}:{}", kind.as_str(), now.date_naive()),
    }
  }

  async fn cycle_body(&self, kind: CycleKind) -> Result<Option<String>, CoreError> {
    match kind {
      CycleKind::Morning => self.morning_body().await,
      CycleKind::Evening => self.evening_body().await,
      CycleKind::Weekly => self.weekly_body().await,
    }
  }

  /// -------------------------------------------------------------------------
  /// Morning: adjust today to last night
  /// -------------------------------------------------------------------------

  async fn morning_body(&self) -> Result<Option<String>, CoreError> {
    let now = Utc::now();

    let expired = self.triage.expire_pending(now).await?;
    if expired > 0 {
      tracing::info!(expired, "unanswered triage questions expired to unknown");
    }

    for block in self.blocks.overdue(now).await? {
      if self.blocks.set_status(block.id, BlockStatus::Missed).await? {
        let outcome = self.triage.triage_missed(&block).await?;
        tracing::info!(block_id = block.id, ?outcome, "overdue block marked missed");
      }
    }

    let analysis = self.recovery_analysis().await?;
    self
      .state
      .set(
        &format!("recovery:{}", now.date_naive()),
        &format!("{:.1}", analysis.score),
      )
      .await?;

    let upcoming = self
      .blocks
      .scheduled_between(now, now + Duration::hours(24))
      .await?;
    if upcoming.is_empty() {
      return Ok(Some("no upcoming blocks".into()));
    }

    let caps = self.trust.capabilities(self.trust.current_phase().await?).await?;
    let autonomous =
      caps.contains(&TrustCapability::AutoSchedule) && !self.breaker_tripped().await?;
    let busy = self.calendar.busy_slots(now, now + Duration::hours(24)).await?;
    let excluded = self.triage.problematic_slots().await?;

    for block in upcoming {
      let plan = analysis.plan_for_block(
        block.workout_type,
        self.config.remove_threshold,
        self.config.downgrade_threshold,
      );
      match plan {
        BlockAdjustment::Keep => {
          self.handle_conflict(&block, &busy, &caps, &excluded).await?;
        }
        BlockAdjustment::Downgrade(target) => {
          self.downgrade_block(&block, target, &analysis, autonomous).await?;
        }
        BlockAdjustment::Remove => {
          self.remove_block(&block, &analysis, autonomous).await?;
        }
      }
    }

    Ok(None)
  }

  async fn handle_conflict(
    &self,
    block: &TrainingBlock,
    busy: &[Interval],
    caps: &HashSet<TrustCapability>,
    excluded: &[SlotKey],
  ) -> Result<(), CoreError> {
    let interval = Interval::new(block.starts_at, block.ends_at);
    let conflict: Option<Conflict> = busy
      .iter()
      .find_map(|b| classify_conflict(&interval, b, self.config.window_buffer_minutes));
    let Some(conflict) = conflict else {
      return Ok(());
    };
    if conflict.severity == ConflictSeverity::Low {
      // Buffer-zone contact is tolerated rather than churned
      return Ok(());
    }

    match self.resolver.resolve(block, &conflict, caps, excluded).await? {
      ResolveOutcome::Rescheduled(scored) => {
        // The calendar move already committed inside the resolver
        if let Err(err) = self.finish_transform(block, &scored).await {
          tracing::warn!(block_id = block.id, error = %err, "post-commit transform bookkeeping failed");
        }
      }
      ResolveOutcome::Refused(refusal) => {
        // Never silently drop a conflicted block
        tracing::warn!(block_id = block.id, reason = refusal.reason(), "transformation refused");
        self.notifications.send_conflict_alert(block, refusal.reason()).await?;
        self
          .ledger
          .record(
            NewReceipt::new(ActionKind::BlockTransformed)
              .input("block_id", block.id)
              .outcome(Outcome::Skipped(refusal.reason().into())),
          )
          .await?;
      }
      ResolveOutcome::NoWindow => {
        self
          .notifications
          .send_conflict_alert(block, "no acceptable window today or tomorrow")
          .await?;
        self
          .ledger
          .record(
            NewReceipt::new(ActionKind::BlockTransformed)
              .input("block_id", block.id)
              .outcome(Outcome::Skipped("no acceptable window".into())),
          )
          .await?;
      }
    }
    Ok(())
  }

  /// Bookkeeping after a committed conflict reschedule
  async fn finish_transform(
    &self,
    block: &TrainingBlock,
    scored: &ScoredWindow,
  ) -> Result<(), CoreError> {
    self.blocks.set_status(block.id, BlockStatus::Transformed).await?;
    let moved = NewTrainingBlock {
      calendar_event_id: block.calendar_event_id.clone(),
      workout_type: block.workout_type,
      starts_at: scored.window.start,
      ends_at: scored.window.start + Duration::minutes(block.duration_minutes()),
      was_auto_scheduled: true,
    };
    let new_id = self.blocks.insert(&moved).await?;

    if let Some(workout) =
      self.generator.generate_typed(&scored.window, &self.prefs, block.workout_type)
    {
      if let Err(err) = self
        .notifications
        .send_transformation_notice(block, &workout, "calendar conflict")
        .await
      {
        tracing::warn!(block_id = block.id, error = %err, "transformation notice failed");
      }
    }

    self
      .ledger
      .record(
        NewReceipt::new(ActionKind::BlockTransformed)
          .input("block_id", block.id)
          .input("new_block_id", new_id)
          .input("new_start", scored.window.start.to_rfc3339())
          .input("window_quality", format!("{:.2}", scored.quality))
          .confidence(scored.quality)
          .outcome(Outcome::Success),
      )
      .await?;
    Ok(())
  }

  async fn downgrade_block(
    &self,
    block: &TrainingBlock,
    target: WorkoutType,
    analysis: &RecoveryAnalysis,
    autonomous: bool,
  ) -> Result<(), CoreError> {
    let window = Interval::new(block.starts_at, block.ends_at);
    let Some(workout) = self.generator.generate_typed(&window, &self.prefs, target) else {
      // Nothing easier fits the slot, so treat it like a removal
      return self.remove_block(block, analysis, autonomous).await;
    };
    let reason = format!("Low recovery ({:.0}), easier session swapped in", analysis.score);

    if !autonomous {
      self
        .notifications
        .send_transformation_notice(block, &workout, &reason)
        .await?;
      self
        .ledger
        .record(
          NewReceipt::new(ActionKind::BlockTransformed)
            .input("block_id", block.id)
            .input("to", target.as_str())
            .input("recovery_score", format!("{:.1}", analysis.score))
            .outcome(Outcome::Skipped("proposal only".into())),
        )
        .await?;
      return Ok(());
    }

    // Commit point: the replacement event must exist before anything local
    let event_id = match self.calendar.create_block(&workout, &window).await {
      Ok(id) => id,
      Err(err) => {
        self.note_calendar_failure().await;
        return Err(err);
      }
    };
    if let Err(err) = self
      .finish_downgrade(block, target, &window, event_id, &workout, &reason, analysis)
      .await
    {
      tracing::warn!(block_id = block.id, error = %err, "post-commit downgrade bookkeeping failed");
    }
    Ok(())
  }

  async fn finish_downgrade(
    &self,
    block: &TrainingBlock,
    target: WorkoutType,
    window: &Interval,
    event_id: String,
    workout: &Workout,
    reason: &str,
    analysis: &RecoveryAnalysis,
  ) -> Result<(), CoreError> {
    if let Err(err) = self.calendar.remove_block(block).await {
      self.note_calendar_failure().await;
      tracing::warn!(block_id = block.id, error = %err, "superseded calendar event left behind");
    }
    self.blocks.set_status(block.id, BlockStatus::Transformed).await?;
    let new_id = self
      .blocks
      .insert(&NewTrainingBlock {
        calendar_event_id: Some(event_id),
        workout_type: target,
        starts_at: window.start,
        ends_at: window.end,
        was_auto_scheduled: true,
      })
      .await?;
    if let Err(err) = self
      .notifications
      .send_transformation_notice(block, workout, reason)
      .await
    {
      tracing::warn!(block_id = block.id, error = %err, "transformation notice failed");
    }

    self
      .ledger
      .record(
        NewReceipt::new(ActionKind::BlockTransformed)
          .input("block_id", block.id)
          .input("new_block_id", new_id)
          .input("from", block.workout_type.as_str())
          .input("to", target.as_str())
          .input("recovery_score", format!("{:.1}", analysis.score))
          .alternative("keep as planned")
          .alternative("remove entirely")
          .outcome(Outcome::Success),
      )
      .await?;
    Ok(())
  }

  async fn remove_block(
    &self,
    block: &TrainingBlock,
    analysis: &RecoveryAnalysis,
    autonomous: bool,
  ) -> Result<(), CoreError> {
    let reason = format!("Low recovery ({:.0}), rest recommended", analysis.score);
    let receipt = |outcome: Outcome| {
      NewReceipt::new(ActionKind::BlockRemoved)
        .input("block_id", block.id)
        .input("workout_type", block.workout_type.as_str())
        .input("recovery_score", format!("{:.1}", analysis.score))
        .alternative("downgrade instead")
        .outcome(outcome)
    };

    if !autonomous {
      self.notifications.send_removal_notice(block, &reason).await?;
      self
        .ledger
        .record(receipt(Outcome::Skipped("proposal only".into())))
        .await?;
      return Ok(());
    }

    // Commit point
    if let Err(err) = self.calendar.remove_block(block).await {
      self.note_calendar_failure().await;
      return Err(err);
    }
    let finish = async {
      self.blocks.set_status(block.id, BlockStatus::Cancelled).await?;
      if let Err(err) = self.notifications.send_removal_notice(block, &reason).await {
        tracing::warn!(block_id = block.id, error = %err, "removal notice failed");
      }
      self.ledger.record(receipt(Outcome::Success)).await
    };
    if let Err(err) = finish.await {
      tracing::warn!(block_id = block.id, error = %err, "post-commit removal bookkeeping failed");
    }
    Ok(())
  }

  /// -------------------------------------------------------------------------
  /// Evening: plan tomorrow
  /// -------------------------------------------------------------------------

  async fn evening_body(&self) -> Result<Option<String>, CoreError> {
    let now = Utc::now();
    let tomorrow = (now + Duration::days(1)).date_naive();

    if !self.blocks.scheduled_on(tomorrow).await?.is_empty() {
      return Ok(Some("tomorrow already planned".into()));
    }

    let phase = self.trust.current_phase().await?;
    let caps = self.trust.capabilities(phase).await?;
    if !caps.contains(&TrustCapability::Propose) {
      return Ok(Some("observing only".into()));
    }

    let day_start = tomorrow
      .and_hms_opt(0, 0, 0)
      .ok_or_else(|| CoreError::Transient("invalid day start".into()))?
      .and_utc();
    let busy = self
      .calendar
      .busy_slots(day_start, day_start + Duration::days(1))
      .await?;
    let excluded = self.triage.problematic_slots().await?;

    let Some(scored) = self
      .resolver
      .find_free_window(tomorrow, DEFAULT_SESSION_MINUTES, &busy, &excluded)
      .await
    else {
      return Ok(Some("no acceptable window".into()));
    };

    let recent: Vec<WorkoutType> = self
      .biometrics
      .recent_workouts(14)
      .await?
      .iter()
      .map(|w| w.workout_type)
      .collect();

    let workout = match self.generator.generate(&scored.window, &self.prefs, &recent) {
      Some(workout) => workout,
      None => {
        // Nothing on-device fits; only now does the anonymized snapshot
        // leave the device
        let snapshot = self.anonymized_snapshot(&recent).await?;
        match self.remote.generate(&scored.window, &self.prefs, &snapshot).await {
          Ok(workout) => workout,
          Err(err) => {
            tracing::warn!(error = %err, "remote generation unavailable");
            return Ok(Some("no workout fits the window".into()));
          }
        }
      }
    };

    if caps.contains(&TrustCapability::AutoSchedule) && !self.breaker_tripped().await? {
      // Commit point
      let event_id = match self.calendar.create_block(&workout, &scored.window).await {
        Ok(id) => id,
        Err(err) => {
          self.note_calendar_failure().await;
          return Err(err);
        }
      };
      if let Err(err) = self.finish_schedule(&workout, &scored, event_id).await {
        tracing::warn!(error = %err, "post-commit scheduling bookkeeping failed");
      }
    } else {
      self.notifications.send_proposal(&workout, &scored.window).await?;
      self
        .ledger
        .record(
          NewReceipt::new(ActionKind::BlockCreated)
            .input("workout_type", workout.workout_type.as_str())
            .input("start", scored.window.start.to_rfc3339())
            .outcome(Outcome::Skipped("proposed, awaiting user".into())),
        )
        .await?;
    }

    Ok(None)
  }

  async fn anonymized_snapshot(
    &self,
    recent: &[WorkoutType],
  ) -> Result<AnonymizedSnapshot, CoreError> {
    let now = Utc::now();
    let recovery_score = self
      .state
      .get(&format!("recovery:{}", now.date_naive()))
      .await?
      .and_then(|s| s.parse().ok());
    let minutes_this_week = self
      .blocks
      .completed_minutes(now - Duration::days(7), now)
      .await?;

    Ok(AnonymizedSnapshot {
      recovery_score,
      recent_workout_types: recent.iter().map(|t| t.as_str().to_string()).collect(),
      minutes_this_week,
    })
  }

  /// Bookkeeping after a committed evening calendar write
  async fn finish_schedule(
    &self,
    workout: &Workout,
    scored: &ScoredWindow,
    event_id: String,
  ) -> Result<(), CoreError> {
    let block_id = self
      .blocks
      .insert(&NewTrainingBlock {
        calendar_event_id: Some(event_id),
        workout_type: workout.workout_type,
        starts_at: scored.window.start,
        ends_at: scored.window.end,
        was_auto_scheduled: true,
      })
      .await?;

    self
      .ledger
      .record(
        NewReceipt::new(ActionKind::BlockCreated)
          .input("block_id", block_id)
          .input("workout_type", workout.workout_type.as_str())
          .input("start", scored.window.start.to_rfc3339())
          .input("window_quality", format!("{:.2}", scored.quality))
          .confidence(scored.quality)
          .outcome(Outcome::Success),
      )
      .await?;
    tracing::info!(block_id, workout_type = workout.workout_type.as_str(),
      "tomorrow's block scheduled");
    Ok(())
  }

  /// -------------------------------------------------------------------------
  /// Weekly: report and maintenance
  /// -------------------------------------------------------------------------

  async fn weekly_body(&self) -> Result<Option<String>, CoreError> {
    let now = Utc::now();
    let week_ago = now - Duration::days(7);

    let blocks_completed = self
      .blocks
      .count_with_status(BlockStatus::Completed, week_ago, now)
      .await?;
    let blocks_scheduled = self
      .blocks
      .count_with_status(BlockStatus::Scheduled, week_ago, now)
      .await?;
    let blocks_missed = self
      .blocks
      .count_with_status(BlockStatus::Missed, week_ago, now)
      .await?;
    let blocks_transformed = self
      .blocks
      .count_with_status(BlockStatus::Transformed, week_ago, now)
      .await?;
    let minutes_trained = self.blocks.completed_minutes(week_ago, now).await?;
    let decisions: i64 = self
      .ledger
      .action_counts(7)
      .await?
      .iter()
      .map(|(_, count)| count)
      .sum();

    let detected_patterns = self.resolver.refresh_sacred_patterns().await? as i64;
    let pruned = self.ledger.prune_expired().await?;
    tracing::info!(detected_patterns, pruned, "weekly maintenance done");

    let report = WeeklyValueReport {
      week_start: week_ago.date_naive(),
      blocks_completed,
      blocks_scheduled,
      blocks_missed,
      blocks_transformed,
      minutes_trained,
      decisions,
      minutes_saved: decisions * MINUTES_SAVED_PER_DECISION,
      day_streak: self.day_streak().await?,
      detected_patterns,
      trust_phase: self.trust.current_phase().await?.as_str().to_string(),
    };

    self.notifications.send_weekly_report(&report).await?;
    Ok(None)
  }

  /// Consecutive days with a completed block, ending today or yesterday
  async fn day_streak(&self) -> Result<i64, CoreError> {
    let days = self.blocks.completed_days(60).await?;
    let today = Utc::now().date_naive();

    let mut streak = 0i64;
    let mut expected = today;
    for day in days {
      if day == expected {
        streak += 1;
      } else if streak == 0 && day == today - Duration::days(1) {
        streak = 1;
        expected = day;
      } else {
        break;
      }
      expected = expected - Duration::days(1);
    }
    Ok(streak)
  }

  /// -------------------------------------------------------------------------
  /// Shared
  /// -------------------------------------------------------------------------

  async fn recovery_analysis(&self) -> Result<RecoveryAnalysis, CoreError> {
    let sleep = self.biometrics.recent_sleep(7).await?;
    let hrv = self.biometrics.recent_hrv(30).await?;
    let resting_hr = self.biometrics.recent_resting_hr(30).await?;
    let workouts = self.biometrics.recent_workouts(7).await?;

    let now = Utc::now();
    let weekly_minutes = self
      .blocks
      .completed_minutes(now - Duration::days(7), now)
      .await? as f64;
    let average_intensity = if workouts.is_empty() {
      0.5
    } else {
      workouts
        .iter()
        .map(|w| if w.workout_type.is_high_intensity() { 0.9 } else { 0.4 })
        .sum::<f64>()
        / workouts.len() as f64
    };

    Ok(RecoveryScorer::analyze(&RecoveryInputs::assemble(
      &sleep,
      &hrv,
      &resting_hr,
      weekly_minutes,
      average_intensity,
    )))
  }

  /// Calendar writes carry their own failure kind in the health score
  async fn note_calendar_failure(&self) {
    if let Err(err) = self.health.report_failure(FailureKind::CalendarWrite).await {
      tracing::warn!(error = %err, "could not report calendar failure to health monitor");
    }
  }

  async fn breaker_tripped(&self) -> Result<bool, CoreError> {
    Ok(self.state.get(BREAKER_TRIPPED_KEY).await?.is_some())
  }

  async fn reset_breaker(&self) -> Result<(), CoreError> {
    self.state.delete(BREAKER_COUNT_KEY).await?;
    self.state.delete(BREAKER_TRIPPED_KEY).await
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::workout::{HrvRecord, SleepRecord};
  use crate::test_utils::{
    setup_test_db, test_ledger, MockBiometrics, MockCalendar, MockNotifications,
    MockRemoteGenerator, MockTrustGate, NullLearner,
  };
  use crate::models::CapabilityKind;

  struct Fixture {
    orchestrator: GhostOrchestrator,
    blocks: BlockStore,
    health: Arc<HealthDegradationMonitor>,
    calendar: Arc<MockCalendar>,
    notifications: Arc<MockNotifications>,
    trust: Arc<MockTrustGate>,
    ledger: Arc<DecisionLedger>,
    remote: Arc<MockRemoteGenerator>,
  }

  async fn fixture(
    biometrics: MockBiometrics,
    calendar: MockCalendar,
    trust: MockTrustGate,
    config: CoreConfig,
  ) -> Fixture {
    let pool = setup_test_db().await;
    let ledger = Arc::new(test_ledger(pool.clone()).await);
    let health = Arc::new(HealthDegradationMonitor::new(ledger.clone()));
    let calendar = Arc::new(calendar);
    let notifications = Arc::new(MockNotifications::default());
    let trust = Arc::new(trust);
    let biometrics = Arc::new(biometrics);
    let remote = Arc::new(MockRemoteGenerator::default());

    let resolver = Arc::new(ScheduleConflictResolver::new(
      calendar.clone(),
      StateStore::new(pool.clone()),
      config.clone(),
    ));
    let triage = Arc::new(FailureDisambiguator::new(
      pool.clone(),
      biometrics.clone(),
      calendar.clone(),
      notifications.clone(),
      trust.clone(),
      Arc::new(NullLearner),
      ledger.clone(),
      config.clone(),
    ));

    let orchestrator = GhostOrchestrator::new(
      pool.clone(),
      ledger.clone(),
      health.clone(),
      resolver,
      triage,
      remote.clone(),
      biometrics,
      calendar.clone(),
      notifications.clone(),
      trust.clone(),
      UserPreferences::default(),
      config,
    );

    Fixture {
      orchestrator,
      blocks: BlockStore::new(pool),
      health,
      calendar,
      notifications,
      trust,
      ledger,
      remote,
    }
  }

  fn scheduling_trust() -> MockTrustGate {
    MockTrustGate::with_capabilities([TrustCapability::Propose, TrustCapability::AutoSchedule])
  }

  #[tokio::test]
  async fn test_evening_cycle_is_idempotent_per_day() {
    let f = fixture(
      MockBiometrics::default(),
      MockCalendar::default(),
      scheduling_trust(),
      CoreConfig::instant(),
    )
    .await;

    let first = f.orchestrator.run_cycle(CycleKind::Evening).await.unwrap();
    assert_eq!(first, CycleOutcome::Completed);

    let second = f.orchestrator.run_cycle(CycleKind::Evening).await.unwrap();
    assert_eq!(second, CycleOutcome::AlreadyRan);

    // Only one block was ever created
    assert_eq!(f.calendar.created.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_evening_schedules_with_autonomy() {
    let f = fixture(
      MockBiometrics::default(),
      MockCalendar::default(),
      scheduling_trust(),
      CoreConfig::instant(),
    )
    .await;

    f.orchestrator.run_cycle(CycleKind::Evening).await.unwrap();

    let tomorrow = (Utc::now() + Duration::days(1)).date_naive();
    let blocks = f.blocks.scheduled_on(tomorrow).await.unwrap();
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].was_auto_scheduled);
    assert!(blocks[0].calendar_event_id.is_some());
    assert!(f.notifications.proposals.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_evening_proposes_without_autoschedule() {
    let trust = MockTrustGate::with_capabilities([TrustCapability::Propose]);
    let f = fixture(
      MockBiometrics::default(),
      MockCalendar::default(),
      trust,
      CoreConfig::instant(),
    )
    .await;

    f.orchestrator.run_cycle(CycleKind::Evening).await.unwrap();

    assert_eq!(f.notifications.proposals.lock().unwrap().len(), 1);
    assert!(f.calendar.created.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_evening_prefers_local_generation() {
    let f = fixture(
      MockBiometrics::default(),
      MockCalendar::default(),
      scheduling_trust(),
      CoreConfig::instant(),
    )
    .await;

    // A reachable remote service with a distinctive plan must not win while
    // the local generator can fill the window
    *f.remote.workout.lock().unwrap() = Some(Workout {
      workout_type: WorkoutType::Cycling,
      title: "Coach special".into(),
      duration_minutes: 40,
      warm_up: vec![],
      main: vec![],
      cool_down: vec![],
    });

    f.orchestrator.run_cycle(CycleKind::Evening).await.unwrap();

    let created = f.calendar.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_ne!(created[0].0.title, "Coach special");
    // The anonymized snapshot never left the device
    assert_eq!(f.remote.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_calendar_write_failure_scored_distinctly() {
    let f = fixture(
      MockBiometrics::default(),
      MockCalendar::default(),
      scheduling_trust(),
      CoreConfig::instant(),
    )
    .await;
    f.calendar.fail_create.store(true, std::sync::atomic::Ordering::SeqCst);

    let outcome = f.orchestrator.run_cycle(CycleKind::Evening).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Failed(_)));

    // Three write penalties, one per attempt, plus the exhausted-cycle penalty
    let snapshot = f.health.snapshot().await;
    assert_eq!(snapshot.score, 55.0);
  }

  #[tokio::test]
  async fn test_suspension_halts_cycles() {
    let f = fixture(
      MockBiometrics::default(),
      MockCalendar::default(),
      scheduling_trust(),
      CoreConfig::instant(),
    )
    .await;

    // Losing health data, calendar, and push plus a cycle failure drops the
    // health score below the suspension line
    f.health.mark_onboarded().await;
    f.health.report_capability(CapabilityKind::HealthData, false).await.unwrap();
    f.health.report_capability(CapabilityKind::Calendar, false).await.unwrap();
    f.health.report_capability(CapabilityKind::Push, false).await.unwrap();
    f.health.report_failure(FailureKind::Cycle).await.unwrap();

    let outcome = f.orchestrator.run_cycle(CycleKind::Evening).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Suspended);
    assert!(f.calendar.created.lock().unwrap().is_empty());
    assert!(f.notifications.proposals.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_breaker_trips_after_consecutive_failures() {
    let f = fixture(
      MockBiometrics::default(),
      MockCalendar::default(),
      scheduling_trust(),
      CoreConfig::instant(),
    )
    .await;

    f.calendar.fail_busy.store(true, std::sync::atomic::Ordering::SeqCst);
    for _ in 0..3 {
      let outcome = f.orchestrator.run_cycle(CycleKind::Evening).await.unwrap();
      assert!(matches!(outcome, CycleOutcome::Failed(_)));
    }

    let tripped = f
      .ledger
      .query(crate::ledger::ReceiptFilter::action(ActionKind::SafetyBreakerTriggered))
      .await
      .unwrap();
    assert_eq!(tripped.len(), 1);

    // With the breaker tripped, a working cycle proposes instead of booking
    f.calendar.fail_busy.store(false, std::sync::atomic::Ordering::SeqCst);
    let outcome = f.orchestrator.run_cycle(CycleKind::Evening).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed);
    assert_eq!(f.notifications.proposals.lock().unwrap().len(), 1);
    assert!(f.calendar.created.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_workout_detected_credits_block_once() {
    let f = fixture(
      MockBiometrics::default(),
      MockCalendar::default(),
      scheduling_trust(),
      CoreConfig::instant(),
    )
    .await;

    let starts_at = Utc::now() - Duration::hours(1);
    let id = f
      .blocks
      .insert(&NewTrainingBlock {
        calendar_event_id: Some("evt-1".into()),
        workout_type: WorkoutType::Run,
        starts_at,
        ends_at: starts_at + Duration::minutes(45),
        was_auto_scheduled: true,
      })
      .await
      .unwrap();

    let detected = DetectedWorkout {
      workout_type: WorkoutType::Run,
      started_at: Utc::now() - Duration::minutes(30),
      duration_minutes: 40,
      source: "watch".into(),
    };

    f.orchestrator.on_workout_detected(&detected).await.unwrap();
    let block = f.blocks.get(id).await.unwrap().unwrap();
    assert_eq!(block.status, BlockStatus::Completed);
    assert_eq!(f.notifications.confirmations.lock().unwrap().len(), 1);

    let events = f.trust.events.lock().unwrap().clone();
    assert!(matches!(events.as_slice(), [TrustEvent::Positive(_)]));

    // The second report finds no scheduled block and changes nothing
    f.orchestrator.on_workout_detected(&detected).await.unwrap();
    assert_eq!(f.notifications.confirmations.lock().unwrap().len(), 1);
  }

  fn wrecked_biometrics() -> MockBiometrics {
    let today = Utc::now().date_naive();
    let mut hrv = vec![HrvRecord {
      date: today,
      average_ms: 35.0,
    }];
    for d in 1..30 {
      hrv.push(HrvRecord {
        date: today - Duration::days(d),
        average_ms: 50.0,
      });
    }

    let mut resting_hr = vec![66];
    resting_hr.extend(std::iter::repeat(58).take(29));

    MockBiometrics {
      sleep: vec![SleepRecord {
        date: today,
        duration_hours: 3.5,
        quality: Some(0.0),
      }],
      hrv,
      resting_hr,
      workouts: vec![
        DetectedWorkout {
          workout_type: WorkoutType::Hiit,
          started_at: Utc::now() - Duration::days(1),
          duration_minutes: 45,
          source: "watch".into(),
        };
        3
      ],
    }
  }

  #[tokio::test]
  async fn test_morning_removes_block_on_poor_recovery() {
    let f = fixture(
      wrecked_biometrics(),
      MockCalendar::default(),
      scheduling_trust(),
      CoreConfig::instant(),
    )
    .await;

    // Heavy completed training this week pushes strain into the red
    let two_days_ago = Utc::now() - Duration::days(2);
    let done = f
      .blocks
      .insert(&NewTrainingBlock {
        calendar_event_id: Some("evt-done".into()),
        workout_type: WorkoutType::Hiit,
        starts_at: two_days_ago,
        ends_at: two_days_ago + Duration::minutes(300),
        was_auto_scheduled: true,
      })
      .await
      .unwrap();
    f.blocks.set_status(done, BlockStatus::Completed).await.unwrap();

    let starts_at = Utc::now() + Duration::hours(3);
    let upcoming = f
      .blocks
      .insert(&NewTrainingBlock {
        calendar_event_id: Some("evt-up".into()),
        workout_type: WorkoutType::Strength,
        starts_at,
        ends_at: starts_at + Duration::minutes(45),
        was_auto_scheduled: true,
      })
      .await
      .unwrap();

    let outcome = f.orchestrator.run_cycle(CycleKind::Morning).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed);

    let block = f.blocks.get(upcoming).await.unwrap().unwrap();
    assert_eq!(block.status, BlockStatus::Cancelled);
    assert_eq!(f.calendar.removed.lock().unwrap().len(), 1);
    assert_eq!(f.notifications.removals.lock().unwrap().len(), 1);
  }

  fn fatigued_biometrics() -> MockBiometrics {
    let today = Utc::now().date_naive();
    let mut hrv = vec![HrvRecord {
      date: today,
      average_ms: 48.0,
    }];
    for d in 1..30 {
      hrv.push(HrvRecord {
        date: today - Duration::days(d),
        average_ms: 58.0,
      });
    }

    let mut resting_hr = vec![53];
    resting_hr.extend(std::iter::repeat(50).take(29));

    MockBiometrics {
      sleep: vec![SleepRecord {
        date: today,
        duration_hours: 4.5,
        quality: Some(0.3),
      }],
      hrv,
      resting_hr,
      workouts: vec![
        DetectedWorkout {
          workout_type: WorkoutType::Hiit,
          started_at: Utc::now() - Duration::days(1),
          duration_minutes: 45,
          source: "watch".into(),
        };
        3
      ],
    }
  }

  #[tokio::test]
  async fn test_downgrade_commit_survives_cleanup_failure() {
    let f = fixture(
      fatigued_biometrics(),
      MockCalendar::default(),
      scheduling_trust(),
      CoreConfig::instant(),
    )
    .await;
    f.calendar.fail_remove.store(true, std::sync::atomic::Ordering::SeqCst);

    // Enough completed volume this week to keep the score in downgrade range
    let two_days_ago = Utc::now() - Duration::days(2);
    let done = f
      .blocks
      .insert(&NewTrainingBlock {
        calendar_event_id: Some("evt-done".into()),
        workout_type: WorkoutType::Hiit,
        starts_at: two_days_ago,
        ends_at: two_days_ago + Duration::minutes(300),
        was_auto_scheduled: true,
      })
      .await
      .unwrap();
    f.blocks.set_status(done, BlockStatus::Completed).await.unwrap();

    let starts_at = Utc::now() + Duration::hours(3);
    let upcoming = f
      .blocks
      .insert(&NewTrainingBlock {
        calendar_event_id: Some("evt-up".into()),
        workout_type: WorkoutType::Hiit,
        starts_at,
        ends_at: starts_at + Duration::minutes(60),
        was_auto_scheduled: true,
      })
      .await
      .unwrap();

    let outcome = f.orchestrator.run_cycle(CycleKind::Morning).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed);

    // The failing cleanup never replays the committed write: exactly one
    // replacement event exists and the swap still lands locally
    assert_eq!(f.calendar.created.lock().unwrap().len(), 1);
    let old = f.blocks.get(upcoming).await.unwrap().unwrap();
    assert_eq!(old.status, BlockStatus::Transformed);
    let replacements = f
      .blocks
      .scheduled_between(Utc::now(), Utc::now() + Duration::hours(24))
      .await
      .unwrap();
    assert_eq!(replacements.len(), 1);
    assert_eq!(replacements[0].workout_type, WorkoutType::RecoveryWalk);
  }

  #[tokio::test]
  async fn test_morning_marks_missed_and_asks_triage() {
    let f = fixture(
      MockBiometrics::default(),
      MockCalendar::default(),
      scheduling_trust(),
      CoreConfig::instant(),
    )
    .await;

    let starts_at = Utc::now() - Duration::hours(3);
    let id = f
      .blocks
      .insert(&NewTrainingBlock {
        calendar_event_id: Some("evt-1".into()),
        workout_type: WorkoutType::Run,
        starts_at,
        ends_at: starts_at + Duration::minutes(45),
        was_auto_scheduled: true,
      })
      .await
      .unwrap();

    f.orchestrator.run_cycle(CycleKind::Morning).await.unwrap();

    let block = f.blocks.get(id).await.unwrap().unwrap();
    assert_eq!(block.status, BlockStatus::Missed);
    // No automatic rule fired, so the user was asked once
    assert_eq!(f.notifications.triage_requests.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_weekly_report_totals() {
    let f = fixture(
      MockBiometrics::default(),
      MockCalendar::default(),
      scheduling_trust(),
      CoreConfig::instant(),
    )
    .await;

    let yesterday = Utc::now() - Duration::days(1);
    let done = f
      .blocks
      .insert(&NewTrainingBlock {
        calendar_event_id: Some("evt-1".into()),
        workout_type: WorkoutType::Run,
        starts_at: yesterday,
        ends_at: yesterday + Duration::minutes(40),
        was_auto_scheduled: true,
      })
      .await
      .unwrap();
    f.blocks.set_status(done, BlockStatus::Completed).await.unwrap();

    // A booked session still waiting to happen
    let an_hour_ago = Utc::now() - Duration::hours(1);
    f.blocks
      .insert(&NewTrainingBlock {
        calendar_event_id: Some("evt-2".into()),
        workout_type: WorkoutType::Yoga,
        starts_at: an_hour_ago,
        ends_at: an_hour_ago + Duration::minutes(30),
        was_auto_scheduled: true,
      })
      .await
      .unwrap();

    let outcome = f.orchestrator.run_cycle(CycleKind::Weekly).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed);

    let reports = f.notifications.weekly_reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.blocks_completed, 1);
    assert_eq!(report.blocks_scheduled, 1);
    assert_eq!(report.minutes_trained, 40);
    assert_eq!(report.day_streak, 1);
    assert_eq!(report.minutes_saved, report.decisions * 5);
    assert_eq!(report.trust_phase, "scheduling");
  }
}
