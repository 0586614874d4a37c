use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A half-open busy interval on the calendar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
}

impl Interval {
  pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
    Self { start, end }
  }

  pub fn overlaps(&self, other: &Interval) -> bool {
    self.start < other.end && other.start < self.end
  }

  /// Whether `other` is fully inside this interval
  pub fn contains(&self, other: &Interval) -> bool {
    self.start <= other.start && other.end <= self.end
  }

  pub fn duration_minutes(&self) -> i64 {
    (self.end - self.start).num_minutes()
  }
}

/// A candidate slot for placing a workout
pub type TimeWindow = Interval;
