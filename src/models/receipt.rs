//! Decision receipts - the forensic record of every autonomous action

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ---------------------------------------------------------------------------
/// Action Kinds
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
  MorningCycle,
  EveningCycle,
  WeeklyCycle,
  WorkoutDetected,
  BlockCreated,
  BlockTransformed,
  BlockRemoved,
  TrustAdvanced,
  TrustRetreated,
  SafetyBreakerTriggered,
  TriageRecorded,
  HealthModeChanged,
}

impl ActionKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ActionKind::MorningCycle => "morning_cycle",
      ActionKind::EveningCycle => "evening_cycle",
      ActionKind::WeeklyCycle => "weekly_cycle",
      ActionKind::WorkoutDetected => "workout_detected",
      ActionKind::BlockCreated => "block_created",
      ActionKind::BlockTransformed => "block_transformed",
      ActionKind::BlockRemoved => "block_removed",
      ActionKind::TrustAdvanced => "trust_advanced",
      ActionKind::TrustRetreated => "trust_retreated",
      ActionKind::SafetyBreakerTriggered => "safety_breaker_triggered",
      ActionKind::TriageRecorded => "triage_recorded",
      ActionKind::HealthModeChanged => "health_mode_changed",
    }
  }
}

impl std::str::FromStr for ActionKind {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "morning_cycle" => Ok(Self::MorningCycle),
      "evening_cycle" => Ok(Self::EveningCycle),
      "weekly_cycle" => Ok(Self::WeeklyCycle),
      "workout_detected" => Ok(Self::WorkoutDetected),
      "block_created" => Ok(Self::BlockCreated),
      "block_transformed" => Ok(Self::BlockTransformed),
      "block_removed" => Ok(Self::BlockRemoved),
      "trust_advanced" => Ok(Self::TrustAdvanced),
      "trust_retreated" => Ok(Self::TrustRetreated),
      "safety_breaker_triggered" => Ok(Self::SafetyBreakerTriggered),
      "triage_recorded" => Ok(Self::TriageRecorded),
      "health_mode_changed" => Ok(Self::HealthModeChanged),
      _ => Err(format!("Unknown action kind: {}", s)),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Outcomes
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
  Pending,
  Success,
  Failure(String),
  Skipped(String),
}

impl Outcome {
  pub fn tag(&self) -> &'static str {
    match self {
      Outcome::Pending => "pending",
      Outcome::Success => "success",
      Outcome::Failure(_) => "failure",
      Outcome::Skipped(_) => "skipped",
    }
  }

  pub fn reason(&self) -> Option<&str> {
    match self {
      Outcome::Failure(r) | Outcome::Skipped(r) => Some(r),
      _ => None,
    }
  }

  pub fn from_columns(tag: &str, reason: Option<String>) -> Self {
    match tag {
      "success" => Outcome::Success,
      "failure" => Outcome::Failure(reason.unwrap_or_default()),
      "skipped" => Outcome::Skipped(reason.unwrap_or_default()),
      _ => Outcome::Pending,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Receipts
/// ---------------------------------------------------------------------------

/// An immutable audit record of one autonomous decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionReceipt {
  pub id: i64,
  pub action: ActionKind,
  pub created_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
  /// Ordered (key, value) inputs; sensitive values are hashed before storage
  pub inputs: Vec<(String, String)>,
  pub alternatives: Vec<String>,
  pub confidence: f64,
  pub outcome: Outcome,
  pub trust_delta: Option<f64>,
}

/// Draft receipt handed to the ledger (without id/timestamps)
#[derive(Debug, Clone)]
pub struct NewReceipt {
  pub action: ActionKind,
  pub inputs: Vec<(String, String)>,
  pub alternatives: Vec<String>,
  pub confidence: f64,
  pub outcome: Outcome,
  pub trust_delta: Option<f64>,
}

impl NewReceipt {
  pub fn new(action: ActionKind) -> Self {
    Self {
      action,
      inputs: Vec::new(),
      alternatives: Vec::new(),
      confidence: 1.0,
      outcome: Outcome::Pending,
      trust_delta: None,
    }
  }

  pub fn input(mut self, key: &str, value: impl ToString) -> Self {
    self.inputs.push((key.to_string(), value.to_string()));
    self
  }

  pub fn alternative(mut self, alt: impl Into<String>) -> Self {
    self.alternatives.push(alt.into());
    self
  }

  pub fn confidence(mut self, confidence: f64) -> Self {
    self.confidence = confidence.clamp(0.0, 1.0);
    self
  }

  pub fn outcome(mut self, outcome: Outcome) -> Self {
    self.outcome = outcome;
    self
  }

  pub fn trust_delta(mut self, delta: f64) -> Self {
    self.trust_delta = Some(delta);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::str::FromStr;

  #[test]
  fn test_action_kind_roundtrip() {
    for kind in [
      ActionKind::MorningCycle,
      ActionKind::EveningCycle,
      ActionKind::WeeklyCycle,
      ActionKind::WorkoutDetected,
      ActionKind::BlockCreated,
      ActionKind::BlockTransformed,
      ActionKind::BlockRemoved,
      ActionKind::TrustAdvanced,
      ActionKind::TrustRetreated,
      ActionKind::SafetyBreakerTriggered,
      ActionKind::TriageRecorded,
      ActionKind::HealthModeChanged,
    ] {
      assert_eq!(ActionKind::from_str(kind.as_str()), Ok(kind));
    }
  }

  #[test]
  fn test_outcome_columns() {
    let failure = Outcome::Failure("calendar write failed".into());
    assert_eq!(failure.tag(), "failure");
    assert_eq!(failure.reason(), Some("calendar write failed"));

    let back = Outcome::from_columns("failure", Some("calendar write failed".into()));
    assert_eq!(back, failure);

    assert_eq!(Outcome::from_columns("success", None), Outcome::Success);
  }

  #[test]
  fn test_builder_clamps_confidence() {
    let receipt = NewReceipt::new(ActionKind::EveningCycle).confidence(1.7);
    assert_eq!(receipt.confidence, 1.0);
  }
}
