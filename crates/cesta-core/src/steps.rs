use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::datetime::{DateInput, format_date, normalize};
use crate::flexible::{lenient_bool, lenient_u32_opt, opaque_id, opaque_id_opt};
use crate::goals::Assignment;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecklistItem {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStep {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Scheduled day. Listings are keyed by this, never by `completed_at`.
    #[serde(default)]
    pub date: DateInput,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub completed: bool,

    #[serde(default)]
    pub completed_at: DateInput,

    #[serde(default, deserialize_with = "opaque_id_opt")]
    pub goal_id: Option<String>,

    #[serde(default, deserialize_with = "opaque_id_opt")]
    pub area_id: Option<String>,

    #[serde(default, deserialize_with = "lenient_u32_opt")]
    pub estimated_time: Option<u32>,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_important: bool,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_urgent: bool,

    #[serde(default)]
    pub deadline: DateInput,

    #[serde(default)]
    pub checklist: Vec<ChecklistItem>,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub require_checklist_complete: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepToggle {
    Completed,
    Reopened,
    /// Completion refused; `remaining` checklist items are still open.
    Blocked { remaining: usize },
}

impl DailyStep {
    pub fn new(id: impl Into<String>, title: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            date: DateInput::from(date),
            completed: false,
            completed_at: DateInput::Missing,
            goal_id: None,
            area_id: None,
            estimated_time: None,
            is_important: false,
            is_urgent: false,
            deadline: DateInput::Missing,
            checklist: Vec::new(),
            require_checklist_complete: false,
            extra: BTreeMap::new(),
        }
    }

    pub fn scheduled_date(&self) -> Option<NaiveDate> {
        self.date.to_date()
    }

    pub fn open_checklist_items(&self) -> usize {
        self.checklist.iter().filter(|item| !item.completed).count()
    }

    pub fn assignment(&self) -> anyhow::Result<Assignment> {
        Assignment::from_ids(self.goal_id.as_deref(), self.area_id.as_deref())
    }

    #[tracing::instrument(skip(self, now), fields(step = %self.id))]
    pub fn toggle_completed(&mut self, now: DateTime<Utc>) -> StepToggle {
        if self.completed {
            self.completed = false;
            self.completed_at = DateInput::Missing;
            info!("step reopened");
            return StepToggle::Reopened;
        }

        let remaining = self.open_checklist_items();
        if self.require_checklist_complete && remaining > 0 {
            debug!(remaining, "checklist incomplete; completion blocked");
            return StepToggle::Blocked { remaining };
        }

        self.completed = true;
        self.completed_at = DateInput::Instant(now);
        info!("step completed");
        StepToggle::Completed
    }

    /// Flips one checklist item; false when no item has `item_id`.
    pub fn toggle_checklist_item(&mut self, item_id: &str) -> bool {
        match self.checklist.iter_mut().find(|item| item.id == item_id) {
            Some(item) => {
                item.completed = !item.completed;
                true
            }
            None => false,
        }
    }
}

fn priority_rank(step: &DailyStep) -> u8 {
    match (step.is_important, step.is_urgent) {
        (true, true) => 0,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    }
}

/// Steps scheduled on `date`, open ones first, then important+urgent
/// before the rest.
pub fn steps_for_date(steps: &[DailyStep], date: NaiveDate) -> Vec<&DailyStep> {
    let key = format_date(date);
    let mut out: Vec<&DailyStep> = steps.iter().filter(|step| normalize(&step.date) == key).collect();
    out.sort_by(|a, b| {
        a.completed
            .cmp(&b.completed)
            .then_with(|| priority_rank(a).cmp(&priority_rank(b)))
            .then_with(|| a.title.cmp(&b.title))
    });
    out
}

/// Open steps scheduled before `today`, oldest first.
pub fn overdue_steps(steps: &[DailyStep], today: NaiveDate) -> Vec<&DailyStep> {
    let mut out: Vec<(NaiveDate, &DailyStep)> = steps
        .iter()
        .filter(|step| !step.completed)
        .filter_map(|step| step.scheduled_date().map(|day| (day, step)))
        .filter(|(day, _)| *day < today)
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.title.cmp(&b.1.title)));
    out.into_iter().map(|(_, step)| step).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use serde_json::json;

    use super::{ChecklistItem, DailyStep, StepToggle, overdue_steps, steps_for_date};
    use crate::datetime::DateInput;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn item(id: &str, completed: bool) -> ChecklistItem {
        ChecklistItem {
            id: id.to_string(),
            title: id.to_string(),
            completed,
        }
    }

    #[test]
    fn checklist_gate_blocks_completion() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).single().expect("valid now");
        let mut step = DailyStep::new("s1", "Pack", date(2024, 3, 5));
        step.require_checklist_complete = true;
        step.checklist = vec![item("a", true), item("b", false)];

        assert_eq!(step.toggle_completed(now), StepToggle::Blocked { remaining: 1 });
        assert!(!step.completed);
        assert!(step.completed_at.is_missing());

        assert!(step.toggle_checklist_item("b"));
        assert_eq!(step.toggle_completed(now), StepToggle::Completed);
        assert!(step.completed);
        assert_eq!(step.completed_at, DateInput::Instant(now));

        assert_eq!(step.toggle_completed(now), StepToggle::Reopened);
        assert!(step.completed_at.is_missing());
        assert!(!step.toggle_checklist_item("missing"));
    }

    #[test]
    fn ungated_step_completes_with_open_items() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).single().expect("valid now");
        let mut step = DailyStep::new("s1", "Pack", date(2024, 3, 5));
        step.checklist = vec![item("a", false)];
        assert_eq!(step.toggle_completed(now), StepToggle::Completed);
    }

    #[test]
    fn listing_uses_scheduled_date_not_completion_time() {
        let steps: Vec<DailyStep> = serde_json::from_value(json!([
            {"id": 1, "title": "later", "date": "2024-03-05T00:00:00.000Z",
             "completed": true, "completed_at": "2024-03-07T12:00:00Z"},
            {"id": 2, "title": "urgent", "date": "2024-03-05", "is_urgent": true},
            {"id": 3, "title": "both", "date": "2024-03-05", "is_urgent": true, "is_important": true},
            {"id": 4, "title": "elsewhere", "date": "2024-03-07"}
        ]))
        .expect("decode steps");

        let ids: Vec<&str> = steps_for_date(&steps, date(2024, 3, 5)).iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2", "1"]);
        assert!(steps_for_date(&steps, date(2024, 3, 7)).iter().all(|s| s.id == "4"));

        let overdue: Vec<&str> = overdue_steps(&steps, date(2024, 3, 8)).iter().map(|s| s.id.as_str()).collect();
        assert_eq!(overdue, vec!["3", "2", "4"]);
    }

    #[test]
    fn goal_and_area_together_is_rejected() {
        let mut step = DailyStep::new("s1", "Pack", date(2024, 3, 5));
        step.goal_id = Some("g".to_string());
        assert!(step.assignment().is_ok());
        step.area_id = Some("a".to_string());
        assert!(step.assignment().is_err());
    }

    #[test]
    fn loose_row_values_decode_instead_of_failing() {
        let step: DailyStep = serde_json::from_value(json!({
            "id": "s9", "title": "Loose", "date": "2024-03-04",
            "completed": "true", "completed_at": "2024-03-04T10:00:00",
            "estimated_time": "30"
        }))
        .expect("decode loose step");
        assert_eq!(step.estimated_time, Some(30));
        assert_eq!(step.completed_at.to_date(), Some(date(2024, 3, 4)));

        let junk: DailyStep = serde_json::from_value(json!({
            "id": "s10", "estimated_time": "half an hour", "completed_at": false
        }))
        .expect("decode junk step");
        assert_eq!(junk.estimated_time, None);
        assert!(junk.completed_at.is_missing());
    }
}
