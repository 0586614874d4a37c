//! Error taxonomy for the scheduling core
//!
//! Cycles run unattended, so transient failures are retried and recorded
//! rather than surfaced to the host. The variants here mirror how a failed
//! attempt should degrade: retry, skip, fall back, or report to health.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum CoreError {
  /// Biometric or calendar I/O that may succeed on retry
  #[error("Transient failure: {0}")]
  Transient(String),

  /// A required permission/capability is not currently granted
  #[error("Capability unavailable: {0}")]
  CapabilityUnavailable(String),

  /// No acceptable window could be found for a workout
  #[error("No window found: {0}")]
  NoWindowFound(String),

  /// A daily budget (transforms, triage) is spent
  #[error("Quota exhausted: {0}")]
  QuotaExhausted(String),

  /// Not enough history to compute something; callers should use a neutral default
  #[error("Insufficient data: {0}")]
  InsufficientData(String),

  #[error("Database error: {0}")]
  Database(String),
}

impl From<sqlx::Error> for CoreError {
  fn from(e: sqlx::Error) -> Self {
    CoreError::Database(e.to_string())
  }
}

impl From<serde_json::Error> for CoreError {
  fn from(e: serde_json::Error) -> Self {
    CoreError::Database(format!("serialization: {}", e))
  }
}
