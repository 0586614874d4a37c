//! Composite recovery scoring
//!
//! Four independently normalized factors, weighted into a 0-100 score.
//! This is deterministic math over raw biometric data - no proprietary
//! readiness scores, and missing data never fails the computation (it
//! degrades the factor to a neutral 0.5 with an explicit description).
//!
//! Factor weights:
//! - HRV trend            0.30
//! - Sleep quality        0.30
//! - Training strain      0.25
//! - Resting HR trend     0.15

use crate::models::recovery::{
  FactorImpact, FactorTrend, RecommendationAction, RecoveryAnalysis, RecoveryFactor,
  RecoveryStatus, SuggestedIntensity,
};
use crate::models::workout::{HrvRecord, SleepRecord};

const HRV_WEIGHT: f64 = 0.30;
const SLEEP_WEIGHT: f64 = 0.30;
const STRAIN_WEIGHT: f64 = 0.25;
const RESTING_HR_WEIGHT: f64 = 0.15;

/// Weekly training-minutes x intensity target the strain factor is scored against
const WEEKLY_LOAD_TARGET: f64 = 150.0;

/// ---------------------------------------------------------------------------
/// Inputs
/// ---------------------------------------------------------------------------

/// Raw material for one recovery analysis. Built by the orchestrator from
/// the biometric source; any field may be absent.
#[derive(Debug, Clone, Default)]
pub struct RecoveryInputs {
  pub last_night_sleep: Option<SleepRecord>,
  /// Last night's average HRV in milliseconds
  pub hrv_last_night: Option<f64>,
  /// 30-day HRV baseline in milliseconds
  pub hrv_baseline: Option<f64>,
  pub resting_hr_current: Option<i64>,
  pub resting_hr_baseline: Option<f64>,
  /// Minutes trained over the trailing 7 days
  pub weekly_training_minutes: f64,
  /// Average session intensity in [0, 1] over the same window
  pub average_intensity: f64,
}

impl RecoveryInputs {
  /// Assemble inputs from adapter data: 7 days of sleep, 30 days of HRV,
  /// 30 days of resting HR (newest first), and recent training volume.
  pub fn assemble(
    sleep: &[SleepRecord],
    hrv: &[HrvRecord],
    resting_hr: &[i64],
    weekly_training_minutes: f64,
    average_intensity: f64,
  ) -> Self {
    let last_night_sleep = sleep.iter().max_by_key(|s| s.date).cloned();

    let hrv_last_night = hrv.iter().max_by_key(|h| h.date).map(|h| h.average_ms);
    let hrv_baseline = if hrv.len() >= 7 {
      Some(hrv.iter().map(|h| h.average_ms).sum::<f64>() / hrv.len() as f64)
    } else {
      None
    };

    let resting_hr_current = resting_hr.first().copied();
    let resting_hr_baseline = if resting_hr.len() >= 7 {
      Some(resting_hr.iter().map(|&r| r as f64).sum::<f64>() / resting_hr.len() as f64)
    } else {
      None
    };

    Self {
      last_night_sleep,
      hrv_last_night,
      hrv_baseline,
      resting_hr_current,
      resting_hr_baseline,
      weekly_training_minutes,
      average_intensity,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Scorer
/// ---------------------------------------------------------------------------

pub struct RecoveryScorer;

impl RecoveryScorer {
  /// Compute the full recovery analysis. Never fails: missing factors
  /// contribute a neutral 0.5.
  pub fn analyze(inputs: &RecoveryInputs) -> RecoveryAnalysis {
    let factors = vec![
      Self::score_hrv(inputs.hrv_last_night, inputs.hrv_baseline),
      Self::score_sleep(inputs.last_night_sleep.as_ref()),
      Self::score_strain(inputs.weekly_training_minutes, inputs.average_intensity),
      Self::score_resting_hr(inputs.resting_hr_current, inputs.resting_hr_baseline),
    ];

    let score = (factors
      .iter()
      .map(|f| f.normalized * f.weight)
      .sum::<f64>()
      * 100.0)
      .clamp(0.0, 100.0);

    let status = RecoveryStatus::from_score(score);
    let (action, suggested_intensity) = Self::recommend(status);

    let adjustments = factors
      .iter()
      .filter(|f| f.impact == FactorImpact::Negative)
      .map(|f| format!("{}: {}", f.name, f.detail))
      .collect();

    RecoveryAnalysis {
      score,
      status,
      factors,
      action,
      adjustments,
      suggested_intensity,
    }
  }

  fn recommend(status: RecoveryStatus) -> (RecommendationAction, SuggestedIntensity) {
    match status {
      RecoveryStatus::FullyRecovered => (RecommendationAction::Proceed, SuggestedIntensity::High),
      RecoveryStatus::PartiallyRecovered => {
        (RecommendationAction::ReduceIntensity, SuggestedIntensity::Moderate)
      }
      RecoveryStatus::Fatigued => (RecommendationAction::SuggestRecovery, SuggestedIntensity::Low),
      RecoveryStatus::NeedsRest => (RecommendationAction::RestDay, SuggestedIntensity::Rest),
    }
  }

  /// HRV vs 30-day baseline:
  /// >= 110% of baseline is a strong positive signal; below 80% the
  /// autonomic system is clearly still loaded.
  fn score_hrv(current: Option<f64>, baseline: Option<f64>) -> RecoveryFactor {
    let (current, baseline) = match (current, baseline) {
      (Some(c), Some(b)) if b > 0.0 => (c, b),
      _ => return Self::neutral("hrv", HRV_WEIGHT),
    };

    let ratio = current / baseline;
    let (normalized, trend) = match ratio {
      r if r >= 1.10 => (1.0, FactorTrend::Improving),
      r if r >= 1.00 => (0.8, FactorTrend::Stable),
      r if r >= 0.90 => (0.55, FactorTrend::Stable),
      r if r >= 0.80 => (0.3, FactorTrend::Declining),
      _ => (0.15, FactorTrend::Declining),
    };

    RecoveryFactor {
      name: "hrv".to_string(),
      normalized,
      weight: HRV_WEIGHT,
      impact: Self::impact(normalized),
      trend,
      detail: format!("{:.0}ms vs {:.0}ms baseline ({:.0}%)", current, baseline, ratio * 100.0),
    }
  }

  /// Sleep: 7-9 hours is the full-credit band, blended with the source's
  /// quality fraction when one exists (60/40 duration/quality).
  fn score_sleep(sleep: Option<&SleepRecord>) -> RecoveryFactor {
    let sleep = match sleep {
      Some(s) => s,
      None => return Self::neutral("sleep", SLEEP_WEIGHT),
    };

    let duration_score = match sleep.duration_hours {
      h if (7.0..=9.0).contains(&h) => 1.0,
      h if h > 9.0 => 0.8,
      h if h >= 6.0 => 0.7,
      h if h >= 5.0 => 0.45,
      _ => 0.2,
    };

    let quality = sleep.quality.unwrap_or(0.5);
    let normalized = 0.6 * duration_score + 0.4 * quality;

    let trend = if duration_score >= 1.0 {
      FactorTrend::Stable
    } else if duration_score <= 0.45 {
      FactorTrend::Declining
    } else {
      FactorTrend::Unknown
    };

    RecoveryFactor {
      name: "sleep".to_string(),
      normalized,
      weight: SLEEP_WEIGHT,
      impact: Self::impact(normalized),
      trend,
      detail: format!("{:.1}h, quality {:.0}%", sleep.duration_hours, quality * 100.0),
    }
  }

  /// Recent training strain: weekly minutes x average intensity relative to
  /// a 150-minute target. Low accumulated load means more recovery headroom.
  fn score_strain(weekly_minutes: f64, average_intensity: f64) -> RecoveryFactor {
    if weekly_minutes <= 0.0 {
      return Self::neutral("training_strain", STRAIN_WEIGHT);
    }

    let load = weekly_minutes * average_intensity.clamp(0.0, 1.0);
    let ratio = load / WEEKLY_LOAD_TARGET;
    let (normalized, trend) = match ratio {
      r if r <= 0.8 => (0.9, FactorTrend::Stable),
      r if r <= 1.2 => (0.7, FactorTrend::Stable),
      r if r <= 1.6 => (0.45, FactorTrend::Declining),
      _ => (0.2, FactorTrend::Declining),
    };

    RecoveryFactor {
      name: "training_strain".to_string(),
      normalized,
      weight: STRAIN_WEIGHT,
      impact: Self::impact(normalized),
      trend,
      detail: format!("{:.0} load-min vs {:.0} target", load, WEEKLY_LOAD_TARGET),
    }
  }

  /// Resting HR vs baseline: elevation of 5+ bpm is a fatigue marker,
  /// suppression below baseline reads as positive.
  fn score_resting_hr(current: Option<i64>, baseline: Option<f64>) -> RecoveryFactor {
    let (current, baseline) = match (current, baseline) {
      (Some(c), Some(b)) => (c as f64, b),
      _ => return Self::neutral("resting_hr", RESTING_HR_WEIGHT),
    };

    let delta = current - baseline;
    let (normalized, trend) = match delta {
      d if d <= -2.0 => (0.9, FactorTrend::Improving),
      d if d < 2.0 => (0.7, FactorTrend::Stable),
      d if d < 5.0 => (0.45, FactorTrend::Declining),
      _ => (0.2, FactorTrend::Declining),
    };

    RecoveryFactor {
      name: "resting_hr".to_string(),
      normalized,
      weight: RESTING_HR_WEIGHT,
      impact: Self::impact(normalized),
      trend,
      detail: format!("{:.0}bpm vs {:.1}bpm baseline", current, baseline),
    }
  }

  fn neutral(name: &str, weight: f64) -> RecoveryFactor {
    RecoveryFactor {
      name: name.to_string(),
      normalized: 0.5,
      weight,
      impact: FactorImpact::Neutral,
      trend: FactorTrend::Unknown,
      detail: "insufficient data".to_string(),
    }
  }

  fn impact(normalized: f64) -> FactorImpact {
    match normalized {
      n if n >= 0.7 => FactorImpact::Positive,
      n if n >= 0.45 => FactorImpact::Neutral,
      _ => FactorImpact::Negative,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
