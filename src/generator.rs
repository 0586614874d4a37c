//! On-device workout generation
//!
//! The local generator is the fallback path when the remote service is
//! unreachable, and the only path while trust is still being earned. It is
//! deliberately deterministic: the same window, preferences, and history
//! always produce the same plan, which keeps receipts reproducible.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use crate::models::time::TimeWindow;
use crate::models::workout::{PlannedExercise, Workout, WorkoutType};

/// ---------------------------------------------------------------------------
/// Preferences
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Equipment {
  Dumbbells,
  Kettlebell,
  ResistanceBands,
  PullUpBar,
  Bike,
  YogaMat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Injury {
  Knee,
  Shoulder,
  LowerBack,
  Ankle,
  Wrist,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
  pub equipment: Vec<Equipment>,
  pub injuries: Vec<Injury>,
  /// Hour of day the user likes to train, used by window scoring
  pub preferred_hour: u32,
}

impl Default for UserPreferences {
  fn default() -> Self {
    Self {
      equipment: vec![Equipment::YogaMat],
      injuries: Vec::new(),
      preferred_hour: 7,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Exercise Catalog
/// ---------------------------------------------------------------------------

struct CatalogExercise {
  name: &'static str,
  sets: u32,
  reps: &'static str,
  minutes: i64,
  needs: Option<Equipment>,
  avoid_with: &'static [Injury],
}

struct Template {
  workout_type: WorkoutType,
  title: &'static str,
  warm_up: &'static [CatalogExercise],
  main: &'static [CatalogExercise],
  cool_down: &'static [CatalogExercise],
}

const JOG_WARMUP: CatalogExercise = CatalogExercise {
  name: "Easy jog in place",
  sets: 1,
  reps: "3 min",
  minutes: 3,
  needs: None,
  avoid_with: &[],
};

const ARM_CIRCLES: CatalogExercise = CatalogExercise {
  name: "Arm circles",
  sets: 2,
  reps: "10 each way",
  minutes: 2,
  needs: None,
  avoid_with: &[Injury::Shoulder],
};

const STRETCH: CatalogExercise = CatalogExercise {
  name: "Full-body stretch",
  sets: 1,
  reps: "5 min",
  minutes: 5,
  needs: None,
  avoid_with: &[],
};

const TEMPLATES: &[Template] = &[
  Template {
    workout_type: WorkoutType::Strength,
    title: "Full-body strength",
    warm_up: &[JOG_WARMUP, ARM_CIRCLES],
    main: &[
      CatalogExercise {
        name: "Goblet squats",
        sets: 3,
        reps: "10",
        minutes: 8,
        needs: Some(Equipment::Dumbbells),
        avoid_with: &[Injury::Knee],
      },
      CatalogExercise {
        name: "Bodyweight squats",
        sets: 3,
        reps: "15",
        minutes: 6,
        needs: None,
        avoid_with: &[Injury::Knee],
      },
      CatalogExercise {
        name: "Push-ups",
        sets: 3,
        reps: "12",
        minutes: 6,
        needs: None,
        avoid_with: &[Injury::Shoulder, Injury::Wrist],
      },
      CatalogExercise {
        name: "Dumbbell rows",
        sets: 3,
        reps: "10 each side",
        minutes: 8,
        needs: Some(Equipment::Dumbbells),
        avoid_with: &[Injury::LowerBack],
      },
      CatalogExercise {
        name: "Band pull-aparts",
        sets: 3,
        reps: "15",
        minutes: 5,
        needs: Some(Equipment::ResistanceBands),
        avoid_with: &[],
      },
      CatalogExercise {
        name: "Plank",
        sets: 3,
        reps: "45 sec",
        minutes: 5,
        needs: None,
        avoid_with: &[Injury::LowerBack, Injury::Wrist],
      },
    ],
    cool_down: &[STRETCH],
  },
  Template {
    workout_type: WorkoutType::Hiit,
    title: "Interval circuit",
    warm_up: &[JOG_WARMUP],
    main: &[
      CatalogExercise {
        name: "Burpees",
        sets: 4,
        reps: "30 sec on / 30 off",
        minutes: 4,
        needs: None,
        avoid_with: &[Injury::Knee, Injury::Wrist],
      },
      CatalogExercise {
        name: "Mountain climbers",
        sets: 4,
        reps: "30 sec on / 30 off",
        minutes: 4,
        needs: None,
        avoid_with: &[Injury::Wrist],
      },
      CatalogExercise {
        name: "Jump squats",
        sets: 4,
        reps: "30 sec on / 30 off",
        minutes: 4,
        needs: None,
        avoid_with: &[Injury::Knee, Injury::Ankle],
      },
      CatalogExercise {
        name: "Kettlebell swings",
        sets: 4,
        reps: "15",
        minutes: 6,
        needs: Some(Equipment::Kettlebell),
        avoid_with: &[Injury::LowerBack],
      },
      CatalogExercise {
        name: "High knees",
        sets: 4,
        reps: "30 sec on / 30 off",
        minutes: 4,
        needs: None,
        avoid_with: &[Injury::Ankle],
      },
    ],
    cool_down: &[STRETCH],
  },
  Template {
    workout_type: WorkoutType::Run,
    title: "Steady run",
    warm_up: &[JOG_WARMUP],
    main: &[CatalogExercise {
      name: "Steady-pace run",
      sets: 1,
      reps: "conversational pace",
      minutes: 30,
      needs: None,
      avoid_with: &[Injury::Knee, Injury::Ankle],
    }],
    cool_down: &[STRETCH],
  },
  Template {
    workout_type: WorkoutType::Cycling,
    title: "Endurance ride",
    warm_up: &[CatalogExercise {
      name: "Easy spin",
      sets: 1,
      reps: "5 min",
      minutes: 5,
      needs: Some(Equipment::Bike),
      avoid_with: &[],
    }],
    main: &[CatalogExercise {
      name: "Steady ride",
      sets: 1,
      reps: "zone 2",
      minutes: 35,
      needs: Some(Equipment::Bike),
      avoid_with: &[Injury::Knee],
    }],
    cool_down: &[STRETCH],
  },
  Template {
    workout_type: WorkoutType::Yoga,
    title: "Yoga flow",
    warm_up: &[CatalogExercise {
      name: "Cat-cow",
      sets: 1,
      reps: "2 min",
      minutes: 2,
      needs: Some(Equipment::YogaMat),
      avoid_with: &[],
    }],
    main: &[
      CatalogExercise {
        name: "Sun salutations",
        sets: 5,
        reps: "1 flow",
        minutes: 10,
        needs: Some(Equipment::YogaMat),
        avoid_with: &[Injury::Wrist],
      },
      CatalogExercise {
        name: "Warrior sequence",
        sets: 2,
        reps: "each side",
        minutes: 8,
        needs: Some(Equipment::YogaMat),
        avoid_with: &[Injury::Knee],
      },
      CatalogExercise {
        name: "Seated forward folds",
        sets: 2,
        reps: "90 sec",
        minutes: 6,
        needs: Some(Equipment::YogaMat),
        avoid_with: &[Injury::LowerBack],
      },
    ],
    cool_down: &[CatalogExercise {
      name: "Savasana",
      sets: 1,
      reps: "4 min",
      minutes: 4,
      needs: Some(Equipment::YogaMat),
      avoid_with: &[],
    }],
  },
  Template {
    workout_type: WorkoutType::Mobility,
    title: "Mobility session",
    warm_up: &[ARM_CIRCLES],
    main: &[
      CatalogExercise {
        name: "Hip openers",
        sets: 2,
        reps: "60 sec each side",
        minutes: 8,
        needs: None,
        avoid_with: &[],
      },
      CatalogExercise {
        name: "Thoracic rotations",
        sets: 2,
        reps: "10 each side",
        minutes: 6,
        needs: None,
        avoid_with: &[],
      },
      CatalogExercise {
        name: "Ankle circles",
        sets: 2,
        reps: "15 each way",
        minutes: 4,
        needs: None,
        avoid_with: &[Injury::Ankle],
      },
      CatalogExercise {
        name: "Banded shoulder dislocates",
        sets: 2,
        reps: "10",
        minutes: 5,
        needs: Some(Equipment::ResistanceBands),
        avoid_with: &[Injury::Shoulder],
      },
    ],
    cool_down: &[STRETCH],
  },
  Template {
    workout_type: WorkoutType::RecoveryWalk,
    title: "Recovery walk",
    warm_up: &[],
    main: &[CatalogExercise {
      name: "Brisk walk",
      sets: 1,
      reps: "easy effort",
      minutes: 25,
      needs: None,
      avoid_with: &[],
    }],
    cool_down: &[STRETCH],
  },
];

/// ---------------------------------------------------------------------------
/// Generator
/// ---------------------------------------------------------------------------

/// No session shorter than this is worth scheduling
pub const MIN_WORKOUT_MINUTES: i64 = 20;

const VARIETY_LOOKBACK: usize = 3;

pub struct LocalWorkoutGenerator {
  buffer_minutes: i64,
}

impl LocalWorkoutGenerator {
  pub fn new(buffer_minutes: i64) -> Self {
    Self { buffer_minutes }
  }

  /// Build a session for the window, or None when the usable time after
  /// buffers falls under the 20-minute floor. Recently used workout types
  /// are avoided when an alternative exists, and a high-intensity streak
  /// steers the pick toward easy work.
  pub fn generate(
    &self,
    window: &TimeWindow,
    prefs: &UserPreferences,
    recent: &[WorkoutType],
  ) -> Option<Workout> {
    let usable = window.duration_minutes() - self.buffer_minutes;
    if usable < MIN_WORKOUT_MINUTES {
      tracing::debug!(usable, "window too short for a workout");
      return None;
    }

    let last: Vec<WorkoutType> = recent.iter().rev().take(VARIETY_LOOKBACK).copied().collect();
    let hard_streak = last.iter().filter(|t| t.is_high_intensity()).count() >= 2;

    let mut candidates: Vec<&Template> = TEMPLATES
      .iter()
      .filter(|t| self.is_viable(t, prefs, usable))
      .collect();
    if candidates.is_empty() {
      return None;
    }

    if hard_streak {
      let easy: Vec<&Template> = candidates
        .iter()
        .copied()
        .filter(|t| !t.workout_type.is_high_intensity())
        .collect();
      if !easy.is_empty() {
        candidates = easy;
      }
    }

    let fresh: Vec<&Template> = candidates
      .iter()
      .copied()
      .filter(|t| !last.contains(&t.workout_type))
      .collect();
    if !fresh.is_empty() {
      candidates = fresh;
    }

    // Deterministic rotation keyed on the calendar day
    let pick = (window.start.ordinal() as usize + window.start.hour() as usize)
      % candidates.len();
    Some(self.build(candidates[pick], prefs, usable))
  }

  /// Build a session of a specific type, used when the morning cycle
  /// downgrades a block to easier work
  pub fn generate_typed(
    &self,
    window: &TimeWindow,
    prefs: &UserPreferences,
    workout_type: WorkoutType,
  ) -> Option<Workout> {
    let usable = window.duration_minutes() - self.buffer_minutes;
    if usable < MIN_WORKOUT_MINUTES {
      return None;
    }
    let template = TEMPLATES.iter().find(|t| t.workout_type == workout_type)?;
    if !self.is_viable(template, prefs, usable) {
      return None;
    }
    Some(self.build(template, prefs, usable))
  }

  fn allowed(exercise: &CatalogExercise, prefs: &UserPreferences) -> bool {
    if let Some(needed) = exercise.needs {
      if !prefs.equipment.contains(&needed) {
        return false;
      }
    }
    !exercise.avoid_with.iter().any(|i| prefs.injuries.contains(i))
  }

  /// A template is viable when its main section still fills the floor after
  /// equipment and injury filtering
  fn is_viable(&self, template: &Template, prefs: &UserPreferences, usable: i64) -> bool {
    let main_minutes: i64 = template
      .main
      .iter()
      .filter(|e| Self::allowed(e, prefs))
      .map(|e| e.minutes)
      .sum();
    main_minutes >= MIN_WORKOUT_MINUTES / 2 && usable >= MIN_WORKOUT_MINUTES
  }

  fn build(&self, template: &Template, prefs: &UserPreferences, usable: i64) -> Workout {
    let planned = |list: &[CatalogExercise]| -> Vec<PlannedExercise> {
      list
        .iter()
        .filter(|e| Self::allowed(e, prefs))
        .map(|e| PlannedExercise {
          name: e.name.to_string(),
          sets: e.sets,
          reps: e.reps.to_string(),
          minutes: e.minutes,
        })
        .collect()
    };

    let warm_up = planned(template.warm_up);
    let cool_down = planned(template.cool_down);
    let overhead: i64 = warm_up.iter().chain(&cool_down).map(|e| e.minutes).sum();

    // Trim main-section exercises from the end until the session fits
    let mut main = planned(template.main);
    let mut total = overhead + main.iter().map(|e| e.minutes).sum::<i64>();
    while total > usable && main.len() > 1 {
      let dropped = main.pop().expect("non-empty");
      total -= dropped.minutes;
    }

    Workout {
      workout_type: template.workout_type,
      title: template.title.to_string(),
      duration_minutes: total.min(usable),
      warm_up,
      main,
      cool_down,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
