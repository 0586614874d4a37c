use chrono::Weekday;
use serde::{Deserialize, Serialize};

/// A recurring (day-of-week, hour) bucket on the weekly grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
  /// Monday = 0 ... Sunday = 6
  pub weekday: u8,
  pub hour: u8,
}

impl SlotKey {
  pub fn new(weekday: Weekday, hour: u32) -> Self {
    Self {
      weekday: weekday.num_days_from_monday() as u8,
      hour: hour as u8,
    }
  }
}

/// Where a sacred time came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SacredSource {
  /// User-declared, always authoritative
  Declared,
  /// Mined from recurring calendar events
  Detected,
}

/// A recurring protected interval the scheduler must never book over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SacredTime {
  /// Monday = 0 ... Sunday = 6
  pub weekday: u8,
  pub start_hour: u8,
  pub end_hour: u8,
  pub label: String,
  pub source: SacredSource,
  /// 1.0 for declared entries; detected entries carry their weekly frequency
  pub confidence: f64,
}

impl SacredTime {
  pub fn declared(weekday: Weekday, start_hour: u8, end_hour: u8, label: &str) -> Self {
    Self {
      weekday: weekday.num_days_from_monday() as u8,
      start_hour,
      end_hour,
      label: label.to_string(),
      source: SacredSource::Declared,
      confidence: 1.0,
    }
  }

  pub fn covers(&self, slot: SlotKey) -> bool {
    self.weekday == slot.weekday && self.start_hour <= slot.hour && slot.hour < self.end_hour
  }
}
