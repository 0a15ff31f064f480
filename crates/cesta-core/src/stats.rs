use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, trace};

use crate::datetime::{add_days, format_date, iter_days};
use crate::habit::Habit;
use crate::schedule::ScheduleEvaluator;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HabitStats {
    pub total_planned: u32,
    pub total_completed: u32,
    pub completed_outside_plan: u32,
    pub current_streak: u32,
    pub max_streak: u32,
}

impl HabitStats {
    /// Planned days that were done, over planned days. Zero when nothing
    /// was planned.
    pub fn completion_rate(&self) -> f64 {
        if self.total_planned == 0 {
            return 0.0;
        }
        let in_plan = self.total_completed.saturating_sub(self.completed_outside_plan);
        f64::from(in_plan) / f64::from(self.total_planned)
    }

    /// Counts add up, streaks take the best single habit.
    pub fn merge(self, other: HabitStats) -> HabitStats {
        HabitStats {
            total_planned: self.total_planned + other.total_planned,
            total_completed: self.total_completed + other.total_completed,
            completed_outside_plan: self.completed_outside_plan + other.completed_outside_plan,
            current_streak: self.current_streak.max(other.current_streak),
            max_streak: self.max_streak.max(other.max_streak),
        }
    }
}

pub fn aggregate<I>(stats: I) -> HabitStats
where
    I: IntoIterator<Item = HabitStats>,
{
    stats.into_iter().fold(HabitStats::default(), HabitStats::merge)
}

/// First day counted for `habit`: its creation day, else its earliest
/// completion, else `today`.
pub fn start_date(habit: &Habit, today: NaiveDate) -> NaiveDate {
    if let Some(created) = habit.created_at.to_date() {
        return created;
    }
    habit.habit_completions.completed_dates().next().unwrap_or(today)
}

#[tracing::instrument(skip(habit, eval), fields(habit = %habit.id))]
pub fn compute_stats(habit: &Habit, today: NaiveDate, eval: &ScheduleEvaluator) -> HabitStats {
    let start = start_date(habit, today);
    let mut stats = HabitStats::default();
    if start > today {
        debug!(%start, "habit starts after today; no stats");
        return stats;
    }

    let mut running = 0_u32;
    for day in iter_days(start, today) {
        let scheduled = eval.is_scheduled(habit, day);
        let done = habit.habit_completions.is_completed(&format_date(day));
        match (scheduled, done) {
            (true, true) => {
                stats.total_planned += 1;
                stats.total_completed += 1;
                running += 1;
                stats.max_streak = stats.max_streak.max(running);
            }
            (true, false) => {
                stats.total_planned += 1;
                running = 0;
            }
            (false, true) => {
                stats.total_completed += 1;
                stats.completed_outside_plan += 1;
            }
            (false, false) => {}
        }
    }

    stats.current_streak = current_streak(habit, start, today, eval);
    trace!(?stats, "computed habit stats");
    stats
}

/// Walks back from `today`: unplanned days are skipped, a planned day that
/// was done extends the streak, the first planned miss ends it.
pub fn current_streak(habit: &Habit, start: NaiveDate, today: NaiveDate, eval: &ScheduleEvaluator) -> u32 {
    let mut streak = 0;
    let mut day = today;
    while day >= start {
        if eval.is_scheduled(habit, day) {
            if habit.habit_completions.is_completed(&format_date(day)) {
                streak += 1;
            } else {
                break;
            }
        }
        let previous = add_days(day, -1);
        if previous == day {
            break;
        }
        day = previous;
    }
    streak
}

pub fn compute_all(habits: &[Habit], today: NaiveDate, eval: &ScheduleEvaluator) -> Vec<(String, HabitStats)> {
    habits
        .iter()
        .map(|habit| (habit.id.clone(), compute_stats(habit, today, eval)))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, NaiveDate, Weekday};

    use super::{HabitStats, aggregate, compute_stats};
    use crate::datetime::{DateInput, format_date, iter_days};
    use crate::habit::{Frequency, Habit};
    use crate::schedule::ScheduleEvaluator;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn monday_habit(created: NaiveDate) -> Habit {
        let mut habit = Habit::new("h1", "Run", Frequency::Weekly);
        habit.selected_days = ["monday"].iter().collect();
        habit.created_at = DateInput::from(format!("{}T09:30:00.000Z", format_date(created)));
        habit
    }

    fn mondays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        iter_days(start, end).filter(|d| d.weekday() == Weekday::Mon).collect()
    }

    #[test]
    fn unbroken_mondays() {
        let created = date(2024, 1, 1);
        let today = date(2024, 3, 25);
        let mut habit = monday_habit(created);
        let all = mondays(created, today);
        for day in &all {
            habit.habit_completions.set(&format_date(*day), true);
        }

        let stats = compute_stats(&habit, today, &ScheduleEvaluator::default());
        assert_eq!(stats.current_streak as usize, all.len());
        assert_eq!(stats.max_streak as usize, all.len());
        assert_eq!(stats.total_planned as usize, all.len());
        assert_eq!(stats.completed_outside_plan, 0);
    }

    #[test]
    fn missed_monday_resets_current_but_not_max() {
        let created = date(2024, 1, 1);
        let today = date(2024, 3, 25);
        let mut habit = monday_habit(created);
        let all = mondays(created, today);
        let missed = all[6];
        for day in all.iter().filter(|d| **d != missed) {
            habit.habit_completions.set(&format_date(*day), true);
        }

        let stats = compute_stats(&habit, today, &ScheduleEvaluator::default());
        let after_miss = all.iter().filter(|d| **d > missed).count();
        assert_eq!(stats.current_streak as usize, after_miss);
        assert_eq!(stats.max_streak, 6);
        assert_eq!(stats.total_planned as usize, all.len());
        assert_eq!(stats.total_completed as usize, all.len() - 1);
    }

    #[test]
    fn off_plan_completion_only_moves_completed_counts() {
        let created = date(2024, 3, 4);
        let today = date(2024, 3, 18);
        let mut habit = monday_habit(created);
        habit.habit_completions.set("2024-03-04", true);
        habit.habit_completions.set("2024-03-11", true);
        habit.habit_completions.set("2024-03-18", true);
        let eval = ScheduleEvaluator::default();
        let before = compute_stats(&habit, today, &eval);

        habit.habit_completions.set("2024-03-13", true);
        let after = compute_stats(&habit, today, &eval);

        assert_eq!(after.completed_outside_plan, before.completed_outside_plan + 1);
        assert_eq!(after.total_completed, before.total_completed + 1);
        assert_eq!(after.total_planned, before.total_planned);
        assert_eq!(after.current_streak, before.current_streak);
        assert_eq!(after.max_streak, before.max_streak);
    }

    #[test]
    fn unscheduled_days_never_break_a_streak() {
        let created = date(2024, 3, 4);
        let mut habit = monday_habit(created);
        habit.habit_completions.set("2024-03-04", true);
        habit.habit_completions.set("2024-03-11", true);

        // Thursday after the second Monday: nothing planned since.
        let stats = compute_stats(&habit, date(2024, 3, 14), &ScheduleEvaluator::default());
        assert_eq!(stats.current_streak, 2);
    }

    #[test]
    fn nothing_before_creation() {
        let mut habit = monday_habit(date(2024, 3, 11));
        habit.habit_completions.set("2024-03-04", true);
        let stats = compute_stats(&habit, date(2024, 3, 11), &ScheduleEvaluator::default());
        assert_eq!(stats.total_completed, 0);
        assert_eq!(stats.total_planned, 1);

        let future = compute_stats(&habit, date(2024, 3, 1), &ScheduleEvaluator::default());
        assert_eq!(future, HabitStats::default());
    }

    #[test]
    fn missing_created_at_starts_at_first_completion() {
        let mut habit = Habit::new("h2", "Floss", Frequency::Daily);
        habit.habit_completions.set("2024-03-02", true);
        habit.habit_completions.set("2024-03-03", true);
        let stats = compute_stats(&habit, date(2024, 3, 3), &ScheduleEvaluator::default());
        assert_eq!(stats.total_planned, 2);
        assert_eq!(stats.current_streak, 2);
        assert!((stats.completion_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn aggregate_sums_counts_and_maxes_streaks() {
        let a = HabitStats {
            total_planned: 10,
            total_completed: 8,
            completed_outside_plan: 1,
            current_streak: 3,
            max_streak: 5,
        };
        let b = HabitStats {
            total_planned: 4,
            total_completed: 7,
            completed_outside_plan: 0,
            current_streak: 7,
            max_streak: 7,
        };

        let total = aggregate([a, b]);
        assert_eq!(total.total_planned, 14);
        assert_eq!(total.total_completed, 15);
        assert_eq!(total.completed_outside_plan, 1);
        assert_eq!(total.current_streak, 7);
        assert_eq!(total.max_streak, 7);
        assert_eq!(aggregate(Vec::new()), HabitStats::default());
    }
}
