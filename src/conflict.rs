//! Calendar conflict resolution, window search, and sacred-time protection
//!
//! A transformation moves a scheduled block out of the way of a calendar
//! conflict. It is refused outright when trust does not grant the transform
//! capability, when less than two hours remain before the block, or when the
//! daily transform budget is spent - refusals are returned to the caller so
//! the user can be told, never silently dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::adapters::{CalendarAdapter, CalendarEvent, TrustCapability};
use crate::config::CoreConfig;
use crate::db::StateStore;
use crate::error::CoreError;
use crate::models::sacred::{SacredSource, SacredTime, SlotKey};
use crate::models::time::{Interval, TimeWindow};
use crate::models::TrainingBlock;

/// ---------------------------------------------------------------------------
/// Conflict Classification
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
  Low,
  Medium,
  High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
  pub busy: Interval,
  pub severity: ConflictSeverity,
}

/// Classify how badly a busy interval collides with a block: full overlap
/// is high, partial is medium, touching only the buffer zone is low. None
/// when the two do not interact at all.
pub fn classify_conflict(
  block: &Interval,
  busy: &Interval,
  buffer_minutes: i64,
) -> Option<Conflict> {
  let severity = if busy.contains(block) {
    ConflictSeverity::High
  } else if busy.overlaps(block) {
    ConflictSeverity::Medium
  } else {
    let buffered = Interval::new(
      block.start - Duration::minutes(buffer_minutes),
      block.end + Duration::minutes(buffer_minutes),
    );
    if busy.overlaps(&buffered) {
      ConflictSeverity::Low
    } else {
      return None;
    }
  };

  Some(Conflict {
    busy: *busy,
    severity,
  })
}

/// ---------------------------------------------------------------------------
/// Sacred Times
/// ---------------------------------------------------------------------------

/// Declared and detected protected intervals. Declared entries always win
/// when both cover the same slot.
#[derive(Debug, Clone, Default)]
pub struct SacredTimes {
  declared: Vec<SacredTime>,
  detected: Vec<SacredTime>,
}

impl SacredTimes {
  pub fn declare(&mut self, sacred: SacredTime) {
    self.declared.push(sacred);
  }

  pub fn replace_detected(&mut self, detected: Vec<SacredTime>) {
    self.detected = detected;
  }

  /// The authoritative entry covering a slot, if any
  pub fn covering(&self, slot: SlotKey) -> Option<&SacredTime> {
    self
      .declared
      .iter()
      .find(|s| s.covers(slot))
      .or_else(|| self.detected.iter().find(|s| s.covers(slot)))
  }

  pub fn is_protected(&self, slot: SlotKey) -> bool {
    self.covering(slot).is_some()
  }
}

fn normalize_title(title: &str) -> String {
  title.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Mine recurring patterns from an 8-week event history: a normalized title
/// recurring at the same (weekday, hour) at least 3 times, in at least 75%
/// of the weeks, becomes a detected sacred time.
pub fn detect_sacred_patterns(events: &[CalendarEvent], now: DateTime<Utc>) -> Vec<SacredTime> {
  const WINDOW_WEEKS: i64 = 8;
  const MIN_OCCURRENCES: usize = 3;
  const MIN_WEEKLY_FREQUENCY: f64 = 0.75;

  let window_start = now - Duration::weeks(WINDOW_WEEKS);

  // (normalized title, weekday, hour) -> (occurrence count, distinct weeks, max end hour)
  let mut buckets: HashMap<(String, u8, u8), (usize, HashSet<i64>, u8)> = HashMap::new();

  for event in events {
    if event.start < window_start || event.start > now {
      continue;
    }

    let key = (
      normalize_title(&event.title),
      event.start.weekday().num_days_from_monday() as u8,
      event.start.hour() as u8,
    );
    let week = (event.start - window_start).num_weeks();
    let end_hour = event.end.hour().max(event.start.hour() + 1) as u8;

    let entry = buckets.entry(key).or_insert((0, HashSet::new(), 0));
    entry.0 += 1;
    entry.1.insert(week);
    entry.2 = entry.2.max(end_hour);
  }

  let mut detected: Vec<SacredTime> = buckets
    .into_iter()
    .filter_map(|((title, weekday, hour), (count, weeks, end_hour))| {
      let frequency = weeks.len() as f64 / WINDOW_WEEKS as f64;
      if count >= MIN_OCCURRENCES && frequency >= MIN_WEEKLY_FREQUENCY {
        Some(SacredTime {
          weekday,
          start_hour: hour,
          end_hour,
          label: title,
          source: SacredSource::Detected,
          confidence: frequency,
        })
      } else {
        None
      }
    })
    .collect();

  detected.sort_by(|a, b| (a.weekday, a.start_hour).cmp(&(b.weekday, b.start_hour)));
  detected
}

/// ---------------------------------------------------------------------------
/// Window Search
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredWindow {
  pub window: TimeWindow,
  pub quality: f64,
}

const SEARCH_START_HOUR: u32 = 6;
const SEARCH_END_HOUR: u32 = 21;

/// Window quality in [0, 1]:
/// - 0.5 x closeness to the preferred hour, falling off linearly over 6 hours
/// - 0.3 x margin from the nearest busy interval, saturating at 60 minutes
/// - 0.2 x morning bias (07:00-10:00 starts)
fn score_window(window: &TimeWindow, busy: &[Interval], preferred_hour: u32) -> f64 {
  let hour = window.start.hour() as f64 + window.start.minute() as f64 / 60.0;

  let distance = (hour - preferred_hour as f64).abs();
  let closeness = (1.0 - distance / 6.0).max(0.0);

  let margin_minutes = busy
    .iter()
    .map(|b| {
      if b.end <= window.start {
        (window.start - b.end).num_minutes()
      } else if b.start >= window.end {
        (b.start - window.end).num_minutes()
      } else {
        0
      }
    })
    .min()
    .unwrap_or(60);
  let margin = (margin_minutes.min(60) as f64) / 60.0;

  let morning = if (7.0..=10.0).contains(&hour) { 1.0 } else { 0.0 };

  0.5 * closeness + 0.3 * margin + 0.2 * morning
}

/// Search one day for the best acceptable window, scanning half-hour starts
/// and skipping anything overlapping busy time, sacred time, or a
/// problematic slot. Returns the highest-quality window clearing the
/// acceptance threshold.
pub fn find_window_on_day(
  day: NaiveDate,
  duration_minutes: i64,
  busy: &[Interval],
  sacred: &SacredTimes,
  excluded_slots: &[SlotKey],
  preferred_hour: u32,
  min_quality: f64,
) -> Option<ScoredWindow> {
  let mut best: Option<ScoredWindow> = None;

  for hour in SEARCH_START_HOUR..SEARCH_END_HOUR {
    for minute in [0u32, 30] {
      let start = day.and_hms_opt(hour, minute, 0).expect("valid time").and_utc();
      let window = Interval::new(start, start + Duration::minutes(duration_minutes));

      if window.end.hour() > SEARCH_END_HOUR && window.end.date_naive() == day {
        continue;
      }
      if busy.iter().any(|b| b.overlaps(&window)) {
        continue;
      }

      // Every hour the window touches must be clear, not just the start
      let last_hour = if window.end.minute() == 0 {
        window.end.hour().saturating_sub(1)
      } else {
        window.end.hour()
      };
      let blocked = (hour..=last_hour).any(|h| {
        let slot = SlotKey::new(day.weekday(), h);
        sacred.is_protected(slot) || excluded_slots.contains(&slot)
      });
      if blocked {
        continue;
      }

      let quality = score_window(&window, busy, preferred_hour);
      if quality >= min_quality {
        match best {
          Some(b) if b.quality >= quality => {}
          _ => best = Some(ScoredWindow { window, quality }),
        }
      }
    }
  }

  best
}

/// ---------------------------------------------------------------------------
/// Resolver
/// ---------------------------------------------------------------------------

/// Why a transformation was refused. Callers must tell the user; a refusal
/// never silently drops the block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformRefusal {
  MissingCapability,
  InsufficientLead,
  DailyLimitReached,
}

impl TransformRefusal {
  pub fn reason(&self) -> &'static str {
    match self {
      TransformRefusal::MissingCapability => "trust phase does not allow transformations",
      TransformRefusal::InsufficientLead => "less than two hours remain before the block",
      TransformRefusal::DailyLimitReached => "daily transformation limit reached",
    }
  }
}

#[derive(Debug, Clone)]
pub enum ResolveOutcome {
  /// The block was moved on the calendar; the new window is committed
  Rescheduled(ScoredWindow),
  Refused(TransformRefusal),
  /// No acceptable window today or tomorrow
  NoWindow,
}

pub struct ScheduleConflictResolver {
  calendar: Arc<dyn CalendarAdapter>,
  state: StateStore,
  config: CoreConfig,
  sacred: Mutex<SacredTimes>,
}

impl ScheduleConflictResolver {
  pub fn new(calendar: Arc<dyn CalendarAdapter>, state: StateStore, config: CoreConfig) -> Self {
    Self {
      calendar,
      state,
      config,
      sacred: Mutex::new(SacredTimes::default()),
    }
  }

  pub async fn declare_sacred_time(&self, sacred: SacredTime) {
    self.sacred.lock().await.declare(sacred);
  }

  /// Re-mine detected sacred patterns from the trailing 8 weeks of events
  pub async fn refresh_sacred_patterns(&self) -> Result<usize, CoreError> {
    let now = Utc::now();
    let events = self.calendar.all_events(now - Duration::weeks(8), now).await?;
    let detected = detect_sacred_patterns(&events, now);
    let count = detected.len();
    self.sacred.lock().await.replace_detected(detected);
    Ok(count)
  }

  /// The authoritative sacred entry covering a slot, declared preferred
  pub async fn sacred_covering(&self, slot: SlotKey) -> Option<SacredTime> {
    self.sacred.lock().await.covering(slot).cloned()
  }

  /// Find an acceptable free window on the given day, honoring sacred times
  /// and problematic slots. Used by the evening cycle and by transforms.
  pub async fn find_free_window(
    &self,
    day: NaiveDate,
    duration_minutes: i64,
    busy: &[Interval],
    excluded_slots: &[SlotKey],
  ) -> Option<ScoredWindow> {
    let sacred = self.sacred.lock().await;
    find_window_on_day(
      day,
      duration_minutes,
      busy,
      &sacred,
      excluded_slots,
      self.config.preferred_hour,
      self.config.min_window_quality,
    )
  }

  /// Attempt to move a conflicted block. On success the calendar write has
  /// already happened - that is the commit point - and the daily quota is
  /// consumed.
  pub async fn resolve(
    &self,
    block: &TrainingBlock,
    conflict: &Conflict,
    capabilities: &HashSet<TrustCapability>,
    excluded_slots: &[SlotKey],
  ) -> Result<ResolveOutcome, CoreError> {
    if !capabilities.contains(&TrustCapability::AutoTransform) {
      return Ok(ResolveOutcome::Refused(TransformRefusal::MissingCapability));
    }

    let now = Utc::now();
    if block.starts_at - now < Duration::hours(self.config.min_transform_lead_hours) {
      return Ok(ResolveOutcome::Refused(TransformRefusal::InsufficientLead));
    }

    let quota_key = format!("transforms:{}", now.date_naive());
    if self.state.get_counter(&quota_key).await? >= self.config.daily_transform_quota {
      return Ok(ResolveOutcome::Refused(TransformRefusal::DailyLimitReached));
    }

    let duration = block.duration_minutes();
    let today = block.starts_at.date_naive();

    let mut found = None;
    for day in [today, today + Duration::days(1)] {
      let day_start = day.and_hms_opt(0, 0, 0).expect("valid midnight").and_utc();
      let mut busy = self
        .calendar
        .busy_slots(day_start, day_start + Duration::days(1))
        .await?;
      busy.push(conflict.busy);

      if let Some(window) = self
        .find_free_window(day, duration, &busy, excluded_slots)
        .await
      {
        found = Some(window);
        break;
      }
    }

    let Some(scored) = found else {
      return Ok(ResolveOutcome::NoWindow);
    };

    let event_id = block
      .calendar_event_id
      .as_deref()
      .ok_or_else(|| CoreError::Transient("block has no calendar event".into()))?;

    // Commit point: once the calendar write lands, the move happened
    self
      .calendar
      .reschedule_block(event_id, scored.window.start)
      .await?;
    self.state.increment(&quota_key).await?;

    tracing::info!(
      block_id = block.id,
      new_start = %scored.window.start,
      quality = scored.quality,
      "block rescheduled around conflict"
    );

    Ok(ResolveOutcome::Rescheduled(scored))
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
