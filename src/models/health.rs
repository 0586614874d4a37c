use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ---------------------------------------------------------------------------
/// Operating Modes
/// ---------------------------------------------------------------------------

/// Self-assessed operational capacity, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthMode {
  Healthy,
  Degraded,
  SafeMode,
  Suspended,
}

impl HealthMode {
  pub fn from_score(score: f64) -> Self {
    match score {
      s if s >= 70.0 => Self::Healthy,
      s if s >= 40.0 => Self::Degraded,
      s if s >= 20.0 => Self::SafeMode,
      _ => Self::Suspended,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      HealthMode::Healthy => "healthy",
      HealthMode::Degraded => "degraded",
      HealthMode::SafeMode => "safe_mode",
      HealthMode::Suspended => "suspended",
    }
  }
}

/// ---------------------------------------------------------------------------
/// Failures and Capabilities
/// ---------------------------------------------------------------------------

/// Operational failures the monitor scores, with their penalties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  /// Reported by the host when a registered cycle fails to fire at all
  BackgroundScheduling,
  /// A cycle body exhausted its retries
  Cycle,
  /// A calendar mutation was rejected by the adapter
  CalendarWrite,
}

impl FailureKind {
  pub fn penalty(&self) -> f64 {
    match self {
      FailureKind::BackgroundScheduling => 10.0,
      FailureKind::Cycle => 15.0,
      FailureKind::CalendarWrite => 10.0,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      FailureKind::BackgroundScheduling => "background_scheduling",
      FailureKind::Cycle => "cycle",
      FailureKind::CalendarWrite => "calendar_write",
    }
  }
}

/// Capabilities whose absence degrades the health score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
  Push,
  HealthData,
  Calendar,
}

impl CapabilityKind {
  pub fn penalty(&self) -> f64 {
    match self {
      CapabilityKind::Push => 10.0,
      CapabilityKind::HealthData => 40.0,
      CapabilityKind::Calendar => 30.0,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      CapabilityKind::Push => "push",
      CapabilityKind::HealthData => "health_data",
      CapabilityKind::Calendar => "calendar",
    }
  }
}

/// ---------------------------------------------------------------------------
/// Snapshot
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
  pub mode: HealthMode,
  /// Clamped to [0, 100]
  pub score: f64,
  pub open_issues: usize,
  pub checked_at: DateTime<Utc>,
}
