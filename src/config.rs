//! Core configuration
//!
//! Every quota, threshold, and delay the core uses lives here so a host can
//! override them from its own config file. Defaults match the product
//! behavior; tests shrink the retry backoff to zero.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
  /// Receipts older than this are eligible for deletion
  pub retention_days: i64,

  /// Pending receipts are flushed to storage once this many accumulate
  pub ledger_flush_threshold: usize,

  /// Block transformations allowed per calendar day
  pub daily_transform_quota: u32,

  /// Manual triage requests resolved per calendar day
  pub daily_triage_quota: u32,

  /// Minimum hours before a block for a transformation to be allowed
  pub min_transform_lead_hours: i64,

  /// A window must score at least this to be accepted
  pub min_window_quality: f64,

  /// Recovery score below which the morning cycle downgrades blocks
  pub downgrade_threshold: f64,

  /// Recovery score below which the morning cycle removes blocks
  pub remove_threshold: f64,

  /// Extra cycle attempts after the first failure, with these delays (seconds)
  pub retry_backoff_secs: Vec<u64>,

  /// Consecutive cycle failures before the safety breaker trips
  pub safety_breaker_limit: u32,

  /// Preferred start hour for auto-scheduled workouts (local clock)
  pub preferred_hour: u32,

  /// Buffer kept free on each side of a scheduled block, in minutes
  pub window_buffer_minutes: i64,
}

impl Default for CoreConfig {
  fn default() -> Self {
    Self {
      retention_days: 90,
      ledger_flush_threshold: 10,
      daily_transform_quota: 2,
      daily_triage_quota: 1,
      min_transform_lead_hours: 2,
      min_window_quality: 0.6,
      downgrade_threshold: 40.0,
      remove_threshold: 20.0,
      retry_backoff_secs: vec![30, 60],
      safety_breaker_limit: 3,
      preferred_hour: 7,
      window_buffer_minutes: 15,
    }
  }
}

impl CoreConfig {
  /// Config with no retry delays, for tests
  pub fn instant() -> Self {
    Self {
      retry_backoff_secs: vec![0, 0],
      ..Self::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_product_behavior() {
    let cfg = CoreConfig::default();
    assert_eq!(cfg.retention_days, 90);
    assert_eq!(cfg.daily_transform_quota, 2);
    assert_eq!(cfg.daily_triage_quota, 1);
    assert_eq!(cfg.retry_backoff_secs, vec![30, 60]);
  }

  #[test]
  fn test_roundtrips_through_json() {
    let cfg = CoreConfig::default();
    let json = serde_json::to_string(&cfg).unwrap();
    let back: CoreConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.min_window_quality, cfg.min_window_quality);
  }
}
