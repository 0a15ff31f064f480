use std::io::{self, IsTerminal, Write};

use chrono::{Datelike, NaiveDate, Weekday};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::{format_date, normalize};
use crate::goals::{Area, Goal};
use crate::habit::Habit;
use crate::schedule::DayMark;
use crate::stats::HabitStats;
use crate::steps::DailyStep;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self { color: cfg.color }
    }

    #[tracing::instrument(skip(self, rows))]
    pub fn print_due(&mut self, date: NaiveDate, rows: &[(&Habit, bool)]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "Habits due {}", format_date(date))?;

        let headers = vec!["ID".to_string(), "Done".to_string(), "Habit".to_string(), "Frequency".to_string()];
        let rows = rows
            .iter()
            .map(|(habit, done)| {
                let mark = if *done { self.paint("[x]", "32") } else { "[ ]".to_string() };
                vec![
                    self.paint(&habit.id, "33"),
                    mark,
                    habit.name.clone(),
                    habit.frequency.as_str().to_string(),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, rows, total))]
    pub fn print_stats(&mut self, rows: &[(&Habit, HabitStats)], total: HabitStats) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = ["Habit", "Planned", "Done", "Extra", "Streak", "Best", "Rate"]
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut table: Vec<Vec<String>> = rows
            .iter()
            .map(|(habit, stats)| stats_row(&habit.name, stats))
            .collect();
        let mut footer = stats_row("All habits", &total);
        footer[0] = self.paint(&footer[0], "1");
        table.push(footer);

        write_table(&mut out, headers, table)?;
        Ok(())
    }

    /// Month grid with one glyph per day: `#` done, `+` extra, `!` missed,
    /// `o` planned, `.` off.
    #[tracing::instrument(skip(self, habit, grid))]
    pub fn print_month(&mut self, habit: &Habit, grid: &[(NaiveDate, DayMark)], week_start: Weekday) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let Some((first, _)) = grid.first() else {
            return Ok(());
        };
        writeln!(out, "{} {}", habit.name, first.format("%B %Y"))?;

        let mut day = week_start;
        for _ in 0..7 {
            write!(out, "{:>4}", &format!("{day:?}")[..2])?;
            day = day.succ();
        }
        writeln!(out)?;

        let offset = (7 + first.weekday().num_days_from_monday() - week_start.num_days_from_monday()) % 7;
        write!(out, "{}", " ".repeat(4 * offset as usize))?;
        for (date, mark) in grid {
            let cell = format!("{:>2}{}", date.day(), self.glyph(*mark));
            write!(out, "{cell:>4}")?;
            if date.weekday() == week_start.pred() {
                writeln!(out)?;
            }
        }
        writeln!(out)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, scheduled, overdue))]
    pub fn print_steps(&mut self, date: NaiveDate, scheduled: &[&DailyStep], overdue: &[&DailyStep]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "Steps for {}", format_date(date))?;
        write_table(&mut out, step_headers(), scheduled.iter().map(|s| self.step_row(s)).collect())?;

        if !overdue.is_empty() {
            writeln!(out)?;
            writeln!(out, "{}", self.paint("Overdue", "31"))?;
            write_table(&mut out, step_headers(), overdue.iter().map(|s| self.step_row(s)).collect())?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, groups))]
    pub fn print_focus(&mut self, groups: &[(Option<&Area>, Vec<&Goal>)]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if groups.is_empty() {
            writeln!(out, "No goals in active focus.")?;
            return Ok(());
        }

        for (area, goals) in groups {
            let heading = area.map(|a| a.name.as_str()).unwrap_or("No area");
            writeln!(out, "{}", self.paint(heading, "1"))?;
            for goal in goals {
                let rank = goal.focus_order.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());
                let target = normalize(&goal.target_date);
                if target.is_empty() {
                    writeln!(out, "  {rank:>3}. {}", goal.title)?;
                } else {
                    writeln!(out, "  {rank:>3}. {} (by {target})", goal.title)?;
                }
            }
        }
        Ok(())
    }

    fn step_row(&self, step: &DailyStep) -> Vec<String> {
        let mark = if step.completed { self.paint("[x]", "32") } else { "[ ]".to_string() };
        let flags = match (step.is_important, step.is_urgent) {
            (true, true) => "!!",
            (true, false) => "!",
            (false, true) => "~",
            (false, false) => "",
        };
        let checklist = if step.checklist.is_empty() {
            String::new()
        } else {
            let done = step.checklist.len() - step.open_checklist_items();
            format!("{done}/{}", step.checklist.len())
        };
        let minutes = step.estimated_time.map(|m| format!("{m}m")).unwrap_or_default();

        vec![
            self.paint(&step.id, "33"),
            mark,
            flags.to_string(),
            step.title.clone(),
            checklist,
            minutes,
        ]
    }

    fn glyph(&self, mark: DayMark) -> String {
        match mark {
            DayMark::Done => self.paint("#", "32"),
            DayMark::Extra => self.paint("+", "36"),
            DayMark::Missed => self.paint("!", "31"),
            DayMark::Planned => "o".to_string(),
            DayMark::Off => ".".to_string(),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn step_headers() -> Vec<String> {
    ["ID", "Done", "", "Step", "List", "Est"].iter().map(|h| h.to_string()).collect()
}

fn stats_row(name: &str, stats: &HabitStats) -> Vec<String> {
    vec![
        name.to_string(),
        stats.total_planned.to_string(),
        stats.total_completed.to_string(),
        stats.completed_outside_plan.to_string(),
        stats.current_streak.to_string(),
        stats.max_streak.to_string(),
        format!("{:.0}%", stats.completion_rate() * 100.0),
    ]
}

pub(crate) fn write_table<W: Write>(mut writer: W, headers: Vec<String>, rows: Vec<Vec<String>>) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{strip_ansi, write_table};

    #[test]
    fn table_pads_by_visible_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["ID".to_string(), "Habit".to_string()],
            vec![
                vec!["\x1b[33m1\x1b[0m".to_string(), "Čtení".to_string()],
                vec!["22".to_string(), "Run".to_string()],
            ],
        )
        .expect("write table");

        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(strip_ansi(lines[2]), "1  Čtení ");
        assert_eq!(lines[3], "22 Run   ");
    }
}
