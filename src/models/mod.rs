pub mod block;
pub mod health;
pub mod receipt;
pub mod recovery;
pub mod sacred;
pub mod time;
pub mod workout;

pub use block::{BlockStatus, BlockStore, NewTrainingBlock, TrainingBlock};
pub use health::{CapabilityKind, FailureKind, HealthMode, HealthSnapshot};
pub use receipt::{ActionKind, DecisionReceipt, NewReceipt, Outcome};
pub use recovery::{BlockAdjustment, RecoveryAnalysis, RecoveryStatus};
pub use sacred::{SacredSource, SacredTime, SlotKey};
pub use time::{Interval, TimeWindow};
pub use workout::{DetectedWorkout, HrvRecord, SleepRecord, Workout, WorkoutType};
