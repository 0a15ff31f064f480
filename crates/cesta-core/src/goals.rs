use std::collections::BTreeMap;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::datetime::DateInput;
use crate::flexible::{lenient_i64_opt, opaque_id, opaque_id_opt};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    #[default]
    Active,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FocusStatus {
    ActiveFocus,
    Deferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub target_date: DateInput,

    #[serde(default)]
    pub status: GoalStatus,

    #[serde(default, deserialize_with = "opaque_id_opt")]
    pub area_id: Option<String>,

    #[serde(default)]
    pub focus_status: Option<FocusStatus>,

    #[serde(default, deserialize_with = "lenient_i64_opt")]
    pub focus_order: Option<i64>,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Goal {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            target_date: DateInput::Missing,
            status: GoalStatus::Active,
            area_id: None,
            focus_status: None,
            focus_order: None,
            icon: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn in_focus(&self) -> bool {
        self.status == GoalStatus::Active && self.focus_status == Some(FocusStatus::ActiveFocus)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

/// Where a step or habit hangs: under a goal, under an area, or nowhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Goal(String),
    Area(String),
    Unassigned,
}

impl Assignment {
    pub fn from_ids(goal_id: Option<&str>, area_id: Option<&str>) -> anyhow::Result<Self> {
        match (goal_id, area_id) {
            (Some(goal), Some(area)) => Err(anyhow!(
                "item references both goal {goal} and area {area}; only one is allowed"
            )),
            (Some(goal), None) => Ok(Self::Goal(goal.to_string())),
            (None, Some(area)) => Ok(Self::Area(area.to_string())),
            (None, None) => Ok(Self::Unassigned),
        }
    }
}

/// Active-focus goals in rank order; unranked ones last, then by title.
pub fn focus_goals(goals: &[Goal]) -> Vec<&Goal> {
    let mut out: Vec<&Goal> = goals.iter().filter(|g| g.in_focus()).collect();
    out.sort_by(|a, b| {
        a.focus_order
            .unwrap_or(i64::MAX)
            .cmp(&b.focus_order.unwrap_or(i64::MAX))
            .then_with(|| a.title.cmp(&b.title))
    });
    out
}

/// Renumbers `focus_order` from 1: the goals named in `ordered_ids` first,
/// then the rest of the active focus list in its current order, so ranks
/// stay unique. Ids that do not name a goal are skipped. Returns how many
/// of `ordered_ids` were ranked.
pub fn reorder_focus(goals: &mut [Goal], ordered_ids: &[String]) -> usize {
    let mut sequence: Vec<String> = Vec::new();
    for id in ordered_ids {
        if sequence.contains(id) {
            continue;
        }
        if goals.iter().any(|g| &g.id == id) {
            sequence.push(id.clone());
        } else {
            warn!(goal = %id, "reorder named an unknown goal");
        }
    }
    let listed = sequence.len();

    let rest: Vec<String> = focus_goals(goals)
        .into_iter()
        .filter(|g| !sequence.contains(&g.id))
        .map(|g| g.id.clone())
        .collect();
    sequence.extend(rest);

    for (idx, id) in sequence.iter().enumerate() {
        let Some(goal) = goals.iter_mut().find(|g| &g.id == id) else {
            continue;
        };
        goal.focus_order = i64::try_from(idx + 1).ok();
        if goal.focus_status != Some(FocusStatus::ActiveFocus) {
            debug!(goal = %goal.id, "moving goal into active focus");
            goal.focus_status = Some(FocusStatus::ActiveFocus);
        }
    }
    listed
}

/// Goals grouped under their area, in area order; goals with no or an
/// unknown area come last under `None`.
pub fn goals_by_area<'a>(goals: &[&'a Goal], areas: &'a [Area]) -> Vec<(Option<&'a Area>, Vec<&'a Goal>)> {
    let mut out: Vec<(Option<&Area>, Vec<&Goal>)> = areas.iter().map(|a| (Some(a), Vec::new())).collect();
    let mut loose = Vec::new();

    for goal in goals {
        let slot = goal
            .area_id
            .as_deref()
            .and_then(|id| out.iter_mut().find(|(area, _)| area.is_some_and(|a| a.id == id)));
        match slot {
            Some((_, bucket)) => bucket.push(*goal),
            None => loose.push(*goal),
        }
    }

    out.retain(|(_, bucket)| !bucket.is_empty());
    if !loose.is_empty() {
        out.push((None, loose));
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Area, Assignment, FocusStatus, Goal, GoalStatus, focus_goals, goals_by_area, reorder_focus};

    fn focused(id: &str, order: Option<i64>) -> Goal {
        let mut goal = Goal::new(id, id.to_uppercase());
        goal.focus_status = Some(FocusStatus::ActiveFocus);
        goal.focus_order = order;
        goal
    }

    #[test]
    fn focus_list_ordering() {
        let mut paused = focused("p", Some(0));
        paused.status = GoalStatus::Paused;
        let mut deferred = Goal::new("d", "D");
        deferred.focus_status = Some(FocusStatus::Deferred);
        let goals = vec![focused("c", None), focused("b", Some(2)), paused, deferred, focused("a", Some(1))];

        let ids: Vec<&str> = focus_goals(&goals).iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn reorder_renumbers_and_promotes() {
        let mut goals = vec![focused("a", Some(1)), focused("b", Some(2)), Goal::new("c", "C")];
        let ranked = reorder_focus(&mut goals, &["c".to_string(), "zz".to_string(), "a".to_string()]);

        assert_eq!(ranked, 2);
        assert_eq!(goals[2].focus_order, Some(1));
        assert_eq!(goals[2].focus_status, Some(FocusStatus::ActiveFocus));
        assert_eq!(goals[0].focus_order, Some(2));
        assert_eq!(goals[1].focus_order, Some(3));
    }

    #[test]
    fn partial_reorder_keeps_ranks_unique() {
        let mut goals = vec![focused("a", Some(1)), focused("b", Some(2)), focused("c", Some(3))];
        assert_eq!(reorder_focus(&mut goals, &["c".to_string()]), 1);

        let ranked: Vec<(&str, Option<i64>)> =
            focus_goals(&goals).iter().map(|g| (g.id.as_str(), g.focus_order)).collect();
        assert_eq!(ranked, vec![("c", Some(1)), ("a", Some(2)), ("b", Some(3))]);
    }

    #[test]
    fn decodes_goal_payload() {
        let goal: Goal = serde_json::from_value(json!({
            "id": 7, "title": "Marathon", "status": "paused",
            "focus_status": null, "target_date": "2024-10-01T00:00:00.000Z"
        }))
        .expect("decode goal");
        assert_eq!(goal.id, "7");
        assert_eq!(goal.status, GoalStatus::Paused);
        assert_eq!(goal.focus_status, None);
        assert_eq!(goal.target_date.to_date().map(|d| d.to_string()), Some("2024-10-01".to_string()));
    }

    #[test]
    fn grouping_by_area() {
        let areas = vec![
            Area { id: "health".into(), name: "Health".into(), description: None, color: None, icon: None },
            Area { id: "work".into(), name: "Work".into(), description: None, color: None, icon: None },
        ];
        let mut run = Goal::new("run", "Run");
        run.area_id = Some("health".into());
        let mut ghost = Goal::new("ghost", "Ghost");
        ghost.area_id = Some("gone".into());
        let free = Goal::new("free", "Free");
        let goals = vec![&run, &ghost, &free];

        let groups = goals_by_area(&goals, &areas);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.map(|a| a.id.as_str()), Some("health"));
        assert!(groups[1].0.is_none());
        assert_eq!(groups[1].1.len(), 2);
    }

    #[test]
    fn assignment_is_exclusive() {
        assert_eq!(Assignment::from_ids(None, Some("a")).expect("area"), Assignment::Area("a".into()));
        assert!(Assignment::from_ids(Some("g"), Some("a")).is_err());
    }
}
