//! Reading and writing per-day habit completions.
//!
//! Writes belong to the server: the client sends a [`ToggleRequest`] and
//! replaces its cached habits with whatever comes back, whether that is
//! the one updated habit or the whole list.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::datetime::normalize_str;
use crate::habit::Habit;

pub fn is_completed(habit: &Habit, date_str: &str) -> bool {
    habit.habit_completions.is_completed(date_str)
}

/// Local copy of `habit` with `date_str` flagged. Only used for the
/// optimistic render; the server response overwrites it.
pub fn set_completed(mut habit: Habit, date_str: &str, completed: bool) -> Habit {
    habit.habit_completions.set(date_str, completed);
    habit
}

/// Body of `POST /api/habits/calendar`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRequest {
    pub habit_id: String,
    pub date: String,
    pub completed: bool,
}

impl ToggleRequest {
    /// `None` when `date` does not normalise to a calendar day.
    pub fn new(habit: &Habit, date: &str) -> Option<Self> {
        let date = normalize_str(date);
        if date.is_empty() {
            return None;
        }
        let completed = !habit.habit_completions.is_completed(&date);
        Some(Self {
            habit_id: habit.id.clone(),
            date,
            completed,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToggleResponse {
    Many(Vec<Habit>),
    One(Habit),
}

/// Client-side copy of the habit list. The backend stays authoritative.
#[derive(Debug, Clone, Default)]
pub struct HabitCache {
    habits: Vec<Habit>,
}

impl HabitCache {
    pub fn new(habits: Vec<Habit>) -> Self {
        Self { habits }
    }

    pub fn habits(&self) -> &[Habit] {
        &self.habits
    }

    pub fn get(&self, id: &str) -> Option<&Habit> {
        self.habits.iter().find(|h| h.id == id)
    }

    pub fn into_habits(self) -> Vec<Habit> {
        self.habits
    }

    /// Replaces one habit in place (appending it if unknown).
    pub fn upsert(&mut self, habit: Habit) {
        match self.habits.iter_mut().find(|h| h.id == habit.id) {
            Some(slot) => *slot = habit,
            None => self.habits.push(habit),
        }
    }

    #[tracing::instrument(skip(self, response))]
    pub fn apply_response(&mut self, response: ToggleResponse) {
        match response {
            ToggleResponse::Many(habits) => {
                info!(count = habits.len(), "replacing habit cache with server list");
                self.habits = habits;
            }
            ToggleResponse::One(habit) => {
                debug!(habit = %habit.id, "merging server habit into cache");
                self.upsert(habit);
            }
        }
    }

    /// Applies a toggle locally and returns the value to restore if the
    /// request fails.
    pub fn apply_optimistic(&mut self, request: &ToggleRequest) -> Option<Habit> {
        let Some(slot) = self.habits.iter_mut().find(|h| h.id == request.habit_id) else {
            warn!(habit = %request.habit_id, "optimistic toggle for unknown habit");
            return None;
        };
        let previous = slot.clone();
        slot.habit_completions.set(&request.date, request.completed);
        Some(previous)
    }
}
