use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// ---------------------------------------------------------------------------
/// Workout Types
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkoutType {
  Strength,
  Hiit,
  Run,
  Cycling,
  Yoga,
  Mobility,
  RecoveryWalk,
}

impl WorkoutType {
  pub fn is_high_intensity(&self) -> bool {
    matches!(
      self,
      WorkoutType::Strength | WorkoutType::Hiit | WorkoutType::Run | WorkoutType::Cycling
    )
  }

  /// Low-intensity counterpart used when recovery is poor.
  /// Recovery-oriented types have nowhere further down to go.
  pub fn downgraded(&self) -> Option<WorkoutType> {
    match self {
      WorkoutType::Hiit => Some(WorkoutType::RecoveryWalk),
      WorkoutType::Strength => Some(WorkoutType::Mobility),
      WorkoutType::Run => Some(WorkoutType::RecoveryWalk),
      WorkoutType::Cycling => Some(WorkoutType::RecoveryWalk),
      WorkoutType::Yoga | WorkoutType::Mobility | WorkoutType::RecoveryWalk => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      WorkoutType::Strength => "strength",
      WorkoutType::Hiit => "hiit",
      WorkoutType::Run => "run",
      WorkoutType::Cycling => "cycling",
      WorkoutType::Yoga => "yoga",
      WorkoutType::Mobility => "mobility",
      WorkoutType::RecoveryWalk => "recovery_walk",
    }
  }
}

impl std::fmt::Display for WorkoutType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl std::str::FromStr for WorkoutType {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "strength" => Ok(Self::Strength),
      "hiit" => Ok(Self::Hiit),
      "run" => Ok(Self::Run),
      "cycling" => Ok(Self::Cycling),
      "yoga" => Ok(Self::Yoga),
      "mobility" => Ok(Self::Mobility),
      "recovery_walk" => Ok(Self::RecoveryWalk),
      _ => Err(format!("Unknown workout type: {}", s)),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Generated Workout Plans
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedExercise {
  pub name: String,
  pub sets: u32,
  /// Free-form prescription, e.g. "10 each side" or "30 sec on / 30 off"
  pub reps: String,
  pub minutes: i64,
}

/// A concrete workout plan: warm-up, main block sized to available
/// minutes, cool-down
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workout {
  pub workout_type: WorkoutType,
  pub title: String,
  pub duration_minutes: i64,
  pub warm_up: Vec<PlannedExercise>,
  pub main: Vec<PlannedExercise>,
  pub cool_down: Vec<PlannedExercise>,
}

/// ---------------------------------------------------------------------------
/// Externally Detected Workouts and Biometric Records
/// ---------------------------------------------------------------------------

/// A completed workout reported by the wearable platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedWorkout {
  pub workout_type: WorkoutType,
  pub started_at: DateTime<Utc>,
  pub duration_minutes: i64,
  pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepRecord {
  pub date: NaiveDate,
  pub duration_hours: f64,
  /// 0.0-1.0 quality fraction when the source provides one
  pub quality: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrvRecord {
  pub date: NaiveDate,
  pub average_ms: f64,
}
