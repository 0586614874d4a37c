//! Autonomous scheduling core for an ambient fitness coach.
//!
//! The crate owns the decision-making: recovery scoring, window search,
//! conflict transformation, failure triage, and the daily cycles that tie
//! them together. It deliberately owns nothing platform-specific; wearable,
//! calendar, and notification access arrive through the traits in
//! [`adapters`], and everything the core decides on its own leaves a
//! receipt in the [`ledger`].

pub mod adapters;
pub mod config;
pub mod conflict;
pub mod db;
pub mod error;
pub mod generator;
pub mod health;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod recovery;
pub mod triage;

#[cfg(test)]
pub mod test_utils;

pub use config::CoreConfig;
pub use conflict::ScheduleConflictResolver;
pub use db::{initialize_db, StateStore};
pub use error::CoreError;
pub use generator::{LocalWorkoutGenerator, UserPreferences};
pub use health::HealthDegradationMonitor;
pub use ledger::DecisionLedger;
pub use orchestrator::{CycleOutcome, GhostOrchestrator, WeeklyValueReport};
pub use recovery::RecoveryScorer;
pub use triage::FailureDisambiguator;
