use anyhow::{Context, anyhow};
use chrono::{Datelike, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use crate::cli::{Invocation, known_command_names};
use crate::completion::{HabitCache, ToggleRequest, ToggleResponse};
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::{format_date, normalize_str, parse_date_expr, today};
use crate::goals::{focus_goals, goals_by_area, reorder_focus};
use crate::render::Renderer;
use crate::schedule::ScheduleEvaluator;
use crate::stats::{aggregate, compute_stats};
use crate::steps::{StepToggle, overdue_steps, steps_for_date};
use crate::sync::Tracked;
use crate::ui_state::NavState;

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(store: &mut DataStore, cfg: &Config, renderer: &mut Renderer, inv: Invocation) -> anyhow::Result<()> {
    let today = today();
    let eval = ScheduleEvaluator::new(&cfg.locale);
    let command = inv.command.as_str();

    debug!(command, args = ?inv.args, %today, locale = eval.locale(), "dispatching command");

    match command {
        "due" => cmd_due(store, renderer, &eval, &inv.args, today),
        "stats" => cmd_stats(store, renderer, &eval, &inv.args, today),
        "month" => cmd_month(store, cfg, renderer, &eval, &inv.args, today),
        "toggle" => cmd_toggle(store, &inv.args, today),
        "steps" => cmd_steps(store, renderer, &inv.args, today),
        "step-done" => cmd_step_done(store, &inv.args),
        "check" => cmd_check(store, &inv.args),
        "focus" => cmd_focus(store, renderer, &inv.args),
        "normalize" => cmd_normalize(&inv.args),
        "nav" => cmd_nav(store, &inv.args),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

fn date_arg(arg: Option<&String>, today: NaiveDate) -> anyhow::Result<NaiveDate> {
    match arg {
        Some(raw) => parse_date_expr(raw, today).with_context(|| format!("invalid date: {raw}")),
        None => Ok(today),
    }
}

#[instrument(skip(store, renderer, eval, args))]
fn cmd_due(
    store: &DataStore,
    renderer: &mut Renderer,
    eval: &ScheduleEvaluator,
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command due");

    let date = date_arg(args.first(), today)?;
    let habits = store.load_habits()?;
    let key = format_date(date);

    let rows: Vec<_> = eval
        .due_habits(&habits, date)
        .into_iter()
        .map(|habit| (habit, habit.habit_completions.is_completed(&key)))
        .collect();

    debug!(total = habits.len(), due = rows.len(), "filtered due habits");
    renderer.print_due(date, &rows)
}

#[instrument(skip(store, renderer, eval, args))]
fn cmd_stats(
    store: &DataStore,
    renderer: &mut Renderer,
    eval: &ScheduleEvaluator,
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command stats");

    let as_of = date_arg(args.first(), today)?;
    let habits = store.load_habits()?;

    let rows: Vec<_> = habits.iter().map(|habit| (habit, compute_stats(habit, as_of, eval))).collect();
    let total = aggregate(rows.iter().map(|(_, stats)| *stats));

    renderer.print_stats(&rows, total)
}

#[instrument(skip(store, cfg, renderer, eval, args))]
fn cmd_month(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    eval: &ScheduleEvaluator,
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command month");

    let habit_id = args.first().ok_or_else(|| anyhow!("month requires a habit id"))?;
    let (year, month) = match args.get(1) {
        Some(raw) => parse_year_month(raw)?,
        None => (today.year(), today.month()),
    };

    let habits = store.load_habits()?;
    let habit = habits
        .iter()
        .find(|h| h.id == *habit_id)
        .ok_or_else(|| anyhow!("no habit with id {habit_id}"))?;

    let grid = eval.month_grid(habit, year, month, today);
    renderer.print_month(habit, &grid, cfg.week_start())
}

fn parse_year_month(raw: &str) -> anyhow::Result<(i32, u32)> {
    let first = NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d")
        .with_context(|| format!("expected YYYY-MM, got: {raw}"))?;
    Ok((first.year(), first.month()))
}

/// Flips one completion. The local write plays the role of the server
/// round-trip. A marker in the data directory refuses a concurrent toggle
/// of the same habit and day.
#[instrument(skip(store, args))]
fn cmd_toggle(store: &mut DataStore, args: &[String], today: NaiveDate) -> anyhow::Result<()> {
    info!("command toggle");

    let habit_id = args.first().ok_or_else(|| anyhow!("toggle requires a habit id"))?;
    let date = date_arg(args.get(1), today)?;

    let mut cache = HabitCache::new(store.load_habits()?);
    let current = cache
        .get(habit_id)
        .cloned()
        .ok_or_else(|| anyhow!("no habit with id {habit_id}"))?;
    let request = ToggleRequest::new(&current, &format_date(date))
        .ok_or_else(|| anyhow!("cannot toggle on an invalid date"))?;

    let mut in_flight = store.in_flight()?;
    if !in_flight.try_begin(&request.habit_id, &request.date)? {
        return Err(anyhow!(
            "toggle for {} on {} already in progress (marker in {})",
            request.habit_id,
            request.date,
            store.in_flight_dir.display()
        ));
    }

    let mut tracked = Tracked::new(current);
    let optimistic = cache
        .apply_optimistic(&request)
        .and_then(|_| cache.get(&request.habit_id).cloned())
        .ok_or_else(|| anyhow!("habit {} vanished from cache", request.habit_id))?;
    let mutation = tracked.begin(optimistic);

    let saved = store.save_habits(cache.habits()).and_then(|()| store.load_habits());
    in_flight.finish(&request.habit_id, &request.date);

    match saved {
        Ok(server_habits) => {
            cache.apply_response(ToggleResponse::Many(server_habits));
            if let Some(server) = cache.get(&request.habit_id).cloned() {
                tracked.commit(mutation, server);
            }
        }
        Err(err) => {
            tracked.rollback(mutation);
            warn!(habit = %request.habit_id, date = %request.date, "toggle rolled back");
            return Err(err.context("failed to save completion"));
        }
    }

    let habit = tracked.value();
    let state = if habit.habit_completions.is_completed(&request.date) {
        "done"
    } else {
        "not done"
    };
    println!("Marked '{}' {state} on {}.", habit.name, request.date);
    Ok(())
}

#[instrument(skip(store, renderer, args))]
fn cmd_steps(store: &DataStore, renderer: &mut Renderer, args: &[String], today: NaiveDate) -> anyhow::Result<()> {
    info!("command steps");

    let date = date_arg(args.first(), today)?;
    let steps = store.load_steps()?;
    let scheduled = steps_for_date(&steps, date);
    let overdue = if date == today {
        overdue_steps(&steps, today)
    } else {
        Vec::new()
    };

    renderer.print_steps(date, &scheduled, &overdue)
}

#[instrument(skip(store, args))]
fn cmd_step_done(store: &mut DataStore, args: &[String]) -> anyhow::Result<()> {
    info!("command step-done");

    let step_id = args.first().ok_or_else(|| anyhow!("step-done requires a step id"))?;
    let mut steps = store.load_steps()?;
    let step = steps
        .iter_mut()
        .find(|s| s.id == *step_id)
        .ok_or_else(|| anyhow!("no step with id {step_id}"))?;

    match step.toggle_completed(Utc::now()) {
        StepToggle::Blocked { remaining } => {
            return Err(anyhow!(
                "step '{}' has {remaining} open checklist item(s); finish them first",
                step.title
            ));
        }
        StepToggle::Completed => println!("Completed step '{}'.", step.title),
        StepToggle::Reopened => println!("Reopened step '{}'.", step.title),
    }

    store.save_steps(&steps)
}

#[instrument(skip(store, args))]
fn cmd_check(store: &mut DataStore, args: &[String]) -> anyhow::Result<()> {
    info!("command check");

    let [step_id, item_id, ..] = args else {
        return Err(anyhow!("check requires a step id and a checklist item id"));
    };

    let mut steps = store.load_steps()?;
    let step = steps
        .iter_mut()
        .find(|s| s.id == *step_id)
        .ok_or_else(|| anyhow!("no step with id {step_id}"))?;

    if !step.toggle_checklist_item(item_id) {
        return Err(anyhow!("step {step_id} has no checklist item {item_id}"));
    }
    println!(
        "Step '{}': {} of {} checklist item(s) open.",
        step.title,
        step.open_checklist_items(),
        step.checklist.len()
    );

    store.save_steps(&steps)
}

/// `focus` lists; `focus ID...` re-ranks the given goals first.
#[instrument(skip(store, renderer, args))]
fn cmd_focus(store: &mut DataStore, renderer: &mut Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command focus");

    let mut goals = store.load_goals()?;
    if !args.is_empty() {
        let ranked = reorder_focus(&mut goals, args);
        if ranked == 0 {
            return Err(anyhow!("none of the given ids name a goal"));
        }
        store.save_goals(&goals)?;
        debug!(ranked, "focus order saved");
    }

    let areas = store.load_areas()?;
    let focused = focus_goals(&goals);
    let groups = goals_by_area(&focused, &areas);
    renderer.print_focus(&groups)
}

fn cmd_normalize(args: &[String]) -> anyhow::Result<()> {
    if args.is_empty() {
        return Err(anyhow!("normalize requires at least one value"));
    }
    for raw in args {
        println!("{}", normalize_str(raw));
    }
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_nav(store: &DataStore, args: &[String]) -> anyhow::Result<()> {
    info!("command nav");

    let mut kv = store.ui_store()?;
    let mut state = NavState::load(&kv);

    let mut changed = false;
    for edit in args {
        changed |= state.apply_edit(edit)?;
    }
    if changed {
        state.save(&mut kv)?;
    }

    println!("page={}", state.page);
    println!("section={}", state.panel_section);
    println!("width={}", state.sidebar_width);
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!("usage: cesta [-v|-q] [--config PATH] [--data DIR] [--rc key=value] <command> [args]");
    println!();
    println!("commands: {}", known_command_names().join(", "));
    println!("dates: YYYY-MM-DD, today, yesterday, tomorrow, monday.., +3d, -1w");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::parse_year_month;

    #[test]
    fn year_month_argument() {
        assert_eq!(parse_year_month("2024-02").expect("parse"), (2024, 2));
        assert!(parse_year_month("2024-13").is_err());
        assert!(parse_year_month("March").is_err());
    }
}
