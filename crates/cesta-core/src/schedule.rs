//! Deciding whether a habit is due on a given calendar day.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;
use tracing::{debug, trace};

use crate::datetime::{days_in_month, first_day_of_month, format_date, iter_days, parse_weekday_name};
use crate::habit::{Frequency, Habit};

/// Long and short weekday names for one display locale, Monday first.
#[derive(Debug)]
pub struct WeekdayNames {
    pub locale: &'static str,
    long: [&'static str; 7],
    short: [&'static str; 7],
}

pub const ENGLISH: WeekdayNames = WeekdayNames {
    locale: "en",
    long: ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday"],
    short: ["mon", "tue", "wed", "thu", "fri", "sat", "sun"],
};

pub const CZECH: WeekdayNames = WeekdayNames {
    locale: "cs",
    long: ["pondělí", "úterý", "středa", "čtvrtek", "pátek", "sobota", "neděle"],
    short: ["po", "út", "st", "čt", "pá", "so", "ne"],
};

impl WeekdayNames {
    pub fn for_locale(code: &str) -> &'static WeekdayNames {
        let lang = code
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match lang.as_str() {
            "cs" => &CZECH,
            "en" | "" => &ENGLISH,
            other => {
                debug!(locale = %other, "no weekday names for locale; using english");
                &ENGLISH
            }
        }
    }

    pub fn long(&self, weekday: Weekday) -> &'static str {
        self.long[weekday.num_days_from_monday() as usize]
    }

    pub fn short(&self, weekday: Weekday) -> &'static str {
        self.short[weekday.num_days_from_monday() as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekOrdinal {
    First,
    Second,
    Third,
    Fourth,
    Last,
}

impl WeekOrdinal {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "first" => Some(Self::First),
            "second" => Some(Self::Second),
            "third" => Some(Self::Third),
            "fourth" => Some(Self::Fourth),
            "last" => Some(Self::Last),
            _ => None,
        }
    }

    /// Whether `date` is this occurrence of its own weekday within its month.
    pub fn matches(&self, date: NaiveDate) -> bool {
        let week_index = (date.day() - 1) / 7;
        match self {
            Self::First => week_index == 0,
            Self::Second => week_index == 1,
            Self::Third => week_index == 2,
            Self::Fourth => week_index == 3,
            Self::Last => date.day() + 7 > days_in_month(date.year(), date.month()),
        }
    }
}

/// Monthly recurrence as configured in the habit editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonthlyRule {
    DaysOfMonth { days: BTreeSet<u32>, auto_adjust_31: bool },
    WeekdayInMonth(Vec<(WeekOrdinal, Weekday)>),
}

impl MonthlyRule {
    /// `None` when `selected_days` holds neither `{week}_{day}` pairs nor
    /// purely numeric day-of-month tokens.
    pub fn from_habit(habit: &Habit) -> Option<Self> {
        let pairs: Vec<(WeekOrdinal, Weekday)> = habit
            .selected_days
            .iter()
            .filter_map(|token| {
                let (week, day) = token.split_once('_')?;
                Some((WeekOrdinal::parse(week)?, parse_weekday_name(day)?))
            })
            .collect();
        if !pairs.is_empty() {
            return Some(Self::WeekdayInMonth(pairs));
        }

        if habit.selected_days.is_empty() {
            return None;
        }

        let mut days = BTreeSet::new();
        for token in habit.selected_days.iter() {
            match token.parse::<u32>() {
                Ok(day) if (1..=31).contains(&day) => {
                    days.insert(day);
                }
                _ => return None,
            }
        }

        Some(Self::DaysOfMonth {
            days,
            auto_adjust_31: habit.auto_adjust_31,
        })
    }

    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            Self::DaysOfMonth { days, auto_adjust_31 } => {
                let day = date.day();
                if days.contains(&day) {
                    return true;
                }
                // Day 31 moves to the 30th, never further; February keeps nothing.
                *auto_adjust_31
                    && day == 30
                    && days.contains(&31)
                    && days_in_month(date.year(), date.month()) < 31
            }
            Self::WeekdayInMonth(pairs) => pairs
                .iter()
                .any(|(week, weekday)| date.weekday() == *weekday && week.matches(date)),
        }
    }
}

/// How a day looks in a habit's month calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayMark {
    Done,
    Extra,
    Missed,
    Planned,
    Off,
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleEvaluator {
    names: &'static WeekdayNames,
}

impl Default for ScheduleEvaluator {
    fn default() -> Self {
        Self { names: &ENGLISH }
    }
}

impl ScheduleEvaluator {
    pub fn new(locale: &str) -> Self {
        Self {
            names: WeekdayNames::for_locale(locale),
        }
    }

    pub fn locale(&self) -> &'static str {
        self.names.locale
    }

    /// Every spelling of `date`'s weekday that stored schedules are known
    /// to use. Translated names make matching depend on the display locale.
    pub fn weekday_tokens(&self, date: NaiveDate) -> BTreeSet<String> {
        let weekday = date.weekday();
        let mut tokens = BTreeSet::new();
        tokens.insert(weekday.num_days_from_sunday().to_string());
        tokens.insert(weekday.number_from_monday().to_string());
        tokens.insert(ENGLISH.long(weekday).to_string());
        tokens.insert(ENGLISH.short(weekday).to_string());
        tokens.insert(self.names.long(weekday).to_lowercase());
        tokens.insert(self.names.short(weekday).to_lowercase());
        tokens
    }

    /// Whether the habit should be shown on `date`.
    pub fn is_due(&self, habit: &Habit, date: NaiveDate) -> bool {
        if habit.always_show {
            return true;
        }

        let date_str = format_date(date);
        if habit.habit_completions.is_completed(&date_str) {
            return true;
        }

        self.is_scheduled(habit, date)
    }

    /// Whether the recurrence rule or an explicit date plans the habit on
    /// `date`. Ignores `always_show` and completions.
    pub fn is_scheduled(&self, habit: &Habit, date: NaiveDate) -> bool {
        if habit.frequency == Frequency::Daily {
            return true;
        }

        if self.matches_recurrence(habit, date) {
            return true;
        }

        habit.has_explicit_date(&format_date(date))
    }

    fn matches_recurrence(&self, habit: &Habit, date: NaiveDate) -> bool {
        if habit.frequency == Frequency::Monthly
            && let Some(rule) = MonthlyRule::from_habit(habit)
        {
            trace!(habit = %habit.id, ?rule, "evaluating monthly rule");
            return rule.matches(date);
        }

        if habit.selected_days.is_empty() {
            return false;
        }

        let tokens = self.weekday_tokens(date);
        habit.selected_days.iter().any(|day| tokens.contains(day))
    }

    /// Habits due on `date`, in display order.
    #[tracing::instrument(skip(self, habits), fields(count = habits.len()))]
    pub fn due_habits<'a>(&self, habits: &'a [Habit], date: NaiveDate) -> Vec<&'a Habit> {
        let mut due: Vec<&Habit> = habits.iter().filter(|h| self.is_due(h, date)).collect();
        due.sort_by(|a, b| {
            a.order
                .unwrap_or(i64::MAX)
                .cmp(&b.order.unwrap_or(i64::MAX))
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        debug!(due = due.len(), "collected due habits");
        due
    }

    /// One mark per day of `year`-`month`. Days before `today` that were
    /// planned but not done are `Missed`; later ones are `Planned`.
    pub fn month_grid(&self, habit: &Habit, year: i32, month: u32, today: NaiveDate) -> Vec<(NaiveDate, DayMark)> {
        let Some(first) = first_day_of_month(year, month) else {
            return Vec::new();
        };
        let Some(last) = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month)) else {
            return Vec::new();
        };

        iter_days(first, last)
            .map(|day| {
                let scheduled = self.is_scheduled(habit, day);
                let done = habit.habit_completions.is_completed(&format_date(day));
                let mark = match (scheduled, done) {
                    (true, true) => DayMark::Done,
                    (false, true) => DayMark::Extra,
                    (true, false) if day < today => DayMark::Missed,
                    (true, false) => DayMark::Planned,
                    (false, false) => DayMark::Off,
                };
                (day, mark)
            })
            .collect()
    }
}
