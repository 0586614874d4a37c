//! Self-degrading health monitor
//!
//! Tracks operational failures and capability outages, derives a health
//! score and operating mode, and attempts bounded self-recovery. Mode
//! changes are audited to the decision ledger and surfaced to subscribers;
//! they are never user-facing notifications, because system diagnostics are
//! not user-actionable.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::ledger::DecisionLedger;
use crate::models::health::{CapabilityKind, FailureKind, HealthMode, HealthSnapshot};
use crate::models::receipt::{ActionKind, NewReceipt, Outcome};

const FAILURE_WINDOW_HOURS: i64 = 24;
const MAX_RECOVERY_ATTEMPTS: u32 = 3;

type ModeCallback = Box<dyn Fn(&HealthSnapshot) + Send + Sync>;

struct MonitorState {
  failures: Vec<(FailureKind, DateTime<Utc>)>,
  /// Capabilities currently unavailable, with when we learned of it
  capability_issues: HashMap<CapabilityKind, DateTime<Utc>>,
  /// Capability penalties only apply once onboarding has completed, to
  /// avoid spurious degradation before permissions were ever requested
  onboarded: bool,
  recovery_attempts: u32,
  snapshot: HealthSnapshot,
}

pub struct HealthDegradationMonitor {
  ledger: Arc<DecisionLedger>,
  state: Mutex<MonitorState>,
  callbacks: std::sync::Mutex<Vec<ModeCallback>>,
}

impl HealthDegradationMonitor {
  pub fn new(ledger: Arc<DecisionLedger>) -> Self {
    Self {
      ledger,
      state: Mutex::new(MonitorState {
        failures: Vec::new(),
        capability_issues: HashMap::new(),
        onboarded: false,
        recovery_attempts: 0,
        snapshot: HealthSnapshot {
          mode: HealthMode::Healthy,
          score: 100.0,
          open_issues: 0,
          checked_at: Utc::now(),
        },
      }),
      callbacks: std::sync::Mutex::new(Vec::new()),
    }
  }

  /// One-time setup/onboarding is done; capability outages count from now on
  pub async fn mark_onboarded(&self) {
    let mut state = self.state.lock().await;
    state.onboarded = true;
  }

  /// Subscribe to mode changes. Called synchronously after each transition.
  pub fn on_mode_change(&self, callback: impl Fn(&HealthSnapshot) + Send + Sync + 'static) {
    self
      .callbacks
      .lock()
      .expect("callback lock poisoned")
      .push(Box::new(callback));
  }

  pub async fn report_failure(&self, kind: FailureKind) -> Result<HealthSnapshot, CoreError> {
    let transition = {
      let mut state = self.state.lock().await;
      state.failures.push((kind, Utc::now()));
      tracing::warn!(kind = kind.as_str(), "operational failure reported");
      Self::recompute_and_recover(&mut state)
    };

    self.finish_report(transition).await
  }

  pub async fn report_capability(
    &self,
    kind: CapabilityKind,
    available: bool,
  ) -> Result<HealthSnapshot, CoreError> {
    let transition = {
      let mut state = self.state.lock().await;
      if available {
        state.capability_issues.remove(&kind);
      } else {
        state.capability_issues.entry(kind).or_insert_with(Utc::now);
        tracing::warn!(capability = kind.as_str(), "capability unavailable");
      }
      Self::recompute_and_recover(&mut state)
    };

    self.finish_report(transition).await
  }

  pub async fn snapshot(&self) -> HealthSnapshot {
    self.state.lock().await.snapshot.clone()
  }

  /// While suspended the orchestrator halts all cycles
  pub async fn is_suspended(&self) -> bool {
    self.state.lock().await.snapshot.mode == HealthMode::Suspended
  }

  /// Recompute from scratch, then run one bounded auto-recovery pass if the
  /// result is unhealthy. Returns (old_mode, new_snapshot) when the mode moved.
  fn recompute_and_recover(state: &mut MonitorState) -> Option<(HealthMode, HealthSnapshot)> {
    let before = state.snapshot.mode;
    Self::recompute(state);

    if state.snapshot.mode == HealthMode::Healthy {
      state.recovery_attempts = 0;
    } else if state.recovery_attempts < MAX_RECOVERY_ATTEMPTS {
      state.recovery_attempts += 1;
      let cutoff = Utc::now() - Duration::hours(FAILURE_WINDOW_HOURS);
      state.failures.retain(|(_, at)| *at > cutoff);
      Self::recompute(state);
      if state.snapshot.mode == HealthMode::Healthy {
        state.recovery_attempts = 0;
      }
    }

    if state.snapshot.mode != before {
      Some((before, state.snapshot.clone()))
    } else {
      None
    }
  }

  /// Score is rebuilt from 100 on every report; only the trailing 24 hours
  /// of failures count, and capability penalties wait for onboarding.
  fn recompute(state: &mut MonitorState) {
    let cutoff = Utc::now() - Duration::hours(FAILURE_WINDOW_HOURS);
    let recent_failures: Vec<_> = state
      .failures
      .iter()
      .filter(|(_, at)| *at > cutoff)
      .collect();

    let mut score = 100.0;
    for (kind, _) in &recent_failures {
      score -= kind.penalty();
    }

    if state.onboarded {
      for kind in state.capability_issues.keys() {
        score -= kind.penalty();
      }
    }

    let score = score.clamp(0.0, 100.0);
    let open_issues = recent_failures.len()
      + if state.onboarded {
        state.capability_issues.len()
      } else {
        0
      };

    state.snapshot = HealthSnapshot {
      mode: HealthMode::from_score(score),
      score,
      open_issues,
      checked_at: Utc::now(),
    };
  }

  async fn finish_report(
    &self,
    transition: Option<(HealthMode, HealthSnapshot)>,
  ) -> Result<HealthSnapshot, CoreError> {
    let Some((from, snapshot)) = transition else {
      return Ok(self.snapshot().await);
    };

    tracing::info!(
      from = from.as_str(),
      to = snapshot.mode.as_str(),
      score = snapshot.score,
      "health mode changed"
    );

    // Audit only. Mode changes must never reach the notification adapter.
    self
      .ledger
      .record(
        NewReceipt::new(ActionKind::HealthModeChanged)
          .input("from", from.as_str())
          .input("to", snapshot.mode.as_str())
          .input("score", format!("{:.0}", snapshot.score))
          .input("open_issues", snapshot.open_issues)
          .outcome(Outcome::Success),
      )
      .await?;

    for callback in self.callbacks.lock().expect("callback lock poisoned").iter() {
      callback(&snapshot);
    }

    Ok(snapshot)
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
