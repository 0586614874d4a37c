use serde::{Deserialize, Serialize};

use crate::models::workout::WorkoutType;

/// ---------------------------------------------------------------------------
/// Recovery Status Bands
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
  /// [75, 100]
  FullyRecovered,
  /// [50, 75)
  PartiallyRecovered,
  /// [25, 50)
  Fatigued,
  /// [0, 25)
  NeedsRest,
}

impl RecoveryStatus {
  pub fn from_score(score: f64) -> Self {
    match score {
      s if s >= 75.0 => Self::FullyRecovered,
      s if s >= 50.0 => Self::PartiallyRecovered,
      s if s >= 25.0 => Self::Fatigued,
      _ => Self::NeedsRest,
    }
  }
}

/// Fixed recommendation per status band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationAction {
  Proceed,
  ReduceIntensity,
  SuggestRecovery,
  RestDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedIntensity {
  High,
  Moderate,
  Low,
  Rest,
}

/// ---------------------------------------------------------------------------
/// Per-Factor Breakdown
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorImpact {
  Positive,
  Neutral,
  Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorTrend {
  Improving,
  Stable,
  Declining,
  Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryFactor {
  pub name: String,
  /// Contribution in [0, 1] before weighting
  pub normalized: f64,
  pub weight: f64,
  pub impact: FactorImpact,
  pub trend: FactorTrend,
  pub detail: String,
}

/// ---------------------------------------------------------------------------
/// Analysis Result
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAnalysis {
  /// Composite score in [0, 100]
  pub score: f64,
  pub status: RecoveryStatus,
  pub factors: Vec<RecoveryFactor>,
  pub action: RecommendationAction,
  /// Free-text adjustments derived from negative factors
  pub adjustments: Vec<String>,
  pub suggested_intensity: SuggestedIntensity,
}

impl RecoveryAnalysis {
  /// What the morning cycle should do with a scheduled block at this score
  pub fn plan_for_block(&self, workout_type: WorkoutType, remove_below: f64, downgrade_below: f64) -> BlockAdjustment {
    if self.score < remove_below {
      return BlockAdjustment::Remove;
    }
    if self.score < downgrade_below {
      if let Some(target) = workout_type.downgraded() {
        return BlockAdjustment::Downgrade(target);
      }
    }
    BlockAdjustment::Keep
  }
}

/// Morning-cycle decision for one scheduled block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAdjustment {
  Keep,
  Downgrade(WorkoutType),
  Remove,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_bands() {
    assert_eq!(RecoveryStatus::from_score(100.0), RecoveryStatus::FullyRecovered);
    assert_eq!(RecoveryStatus::from_score(75.0), RecoveryStatus::FullyRecovered);
    assert_eq!(RecoveryStatus::from_score(74.9), RecoveryStatus::PartiallyRecovered);
    assert_eq!(RecoveryStatus::from_score(50.0), RecoveryStatus::PartiallyRecovered);
    assert_eq!(RecoveryStatus::from_score(49.9), RecoveryStatus::Fatigued);
    assert_eq!(RecoveryStatus::from_score(25.0), RecoveryStatus::Fatigued);
    assert_eq!(RecoveryStatus::from_score(24.9), RecoveryStatus::NeedsRest);
    assert_eq!(RecoveryStatus::from_score(0.0), RecoveryStatus::NeedsRest);
  }

  fn analysis_with_score(score: f64) -> RecoveryAnalysis {
    RecoveryAnalysis {
      score,
      status: RecoveryStatus::from_score(score),
      factors: vec![],
      action: RecommendationAction::Proceed,
      adjustments: vec![],
      suggested_intensity: SuggestedIntensity::Moderate,
    }
  }

  #[test]
  fn test_score_15_removes_strength_block() {
    let analysis = analysis_with_score(15.0);
    let plan = analysis.plan_for_block(WorkoutType::Strength, 20.0, 40.0);
    assert_eq!(plan, BlockAdjustment::Remove);
  }

  #[test]
  fn test_score_35_downgrades_hiit_to_recovery_walk() {
    let analysis = analysis_with_score(35.0);
    let plan = analysis.plan_for_block(WorkoutType::Hiit, 20.0, 40.0);
    assert_eq!(plan, BlockAdjustment::Downgrade(WorkoutType::RecoveryWalk));
  }

  #[test]
  fn test_low_intensity_block_is_kept_above_remove_line() {
    let analysis = analysis_with_score(35.0);
    let plan = analysis.plan_for_block(WorkoutType::Mobility, 20.0, 40.0);
    assert_eq!(plan, BlockAdjustment::Keep);
  }
}
