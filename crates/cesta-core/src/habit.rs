use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::datetime::DateInput;
use crate::flexible::{CompletionMap, DateList, DayTokens, lenient_bool, lenient_i64_opt, opaque_id, opaque_id_opt};
use crate::goals::Assignment;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Custom => "custom",
        }
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
            None => Self::Daily,
            Some(value) => match value.as_str() {
                "" | "daily" => Self::Daily,
                "weekly" => Self::Weekly,
                "monthly" => Self::Monthly,
                _ => Self::Custom,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Habit {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub frequency: Frequency,

    #[serde(default)]
    pub selected_days: DayTokens,

    #[serde(default)]
    pub selected_dates: DateList,

    #[serde(default)]
    pub dates: DateList,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub always_show: bool,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub auto_adjust_31: bool,

    #[serde(default)]
    pub habit_completions: CompletionMap,

    #[serde(default)]
    pub created_at: DateInput,

    #[serde(default, deserialize_with = "opaque_id_opt")]
    pub area_id: Option<String>,

    #[serde(default, deserialize_with = "opaque_id_opt")]
    pub goal_id: Option<String>,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default, deserialize_with = "lenient_i64_opt")]
    pub order: Option<i64>,

    #[serde(default)]
    pub reminder_time: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Habit {
    pub fn new(id: impl Into<String>, name: impl Into<String>, frequency: Frequency) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            frequency,
            selected_days: DayTokens::default(),
            selected_dates: DateList::default(),
            dates: DateList::default(),
            always_show: false,
            auto_adjust_31: false,
            habit_completions: CompletionMap::default(),
            created_at: DateInput::Missing,
            area_id: None,
            goal_id: None,
            icon: None,
            order: None,
            reminder_time: None,
            extra: BTreeMap::new(),
        }
    }

    /// The goal or area this habit hangs under; both at once is rejected.
    pub fn assignment(&self) -> anyhow::Result<Assignment> {
        Assignment::from_ids(self.goal_id.as_deref(), self.area_id.as_deref())
    }

    /// True when `date_str` is listed in either explicit date field.
    pub fn has_explicit_date(&self, date_str: &str) -> bool {
        self.selected_dates.contains(date_str) || self.dates.contains(date_str)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Frequency, Habit};
    use crate::goals::Assignment;

    #[test]
    fn decodes_backend_row_with_mixed_encodings() {
        let habit: Habit = serde_json::from_value(json!({
            "id": 42,
            "name": "Read",
            "frequency": "Weekly",
            "selected_days": "[\"monday\",\"thursday\"]",
            "habit_completions": "{\"2024-03-04\": true}",
            "always_show": null,
            "created_at": "2024-03-01T08:15:00.000Z",
            "area_id": "",
            "xp_reward": 5
        }))
        .expect("decode habit");

        assert_eq!(habit.id, "42");
        assert_eq!(habit.frequency, Frequency::Weekly);
        assert!(habit.selected_days.contains("thursday"));
        assert!(habit.habit_completions.is_completed("2024-03-04"));
        assert!(!habit.always_show);
        assert_eq!(habit.area_id, None);
        assert_eq!(habit.extra.get("xp_reward"), Some(&json!(5)));
    }

    #[test]
    fn unknown_frequency_falls_back_to_custom() {
        let habit: Habit =
            serde_json::from_value(json!({"id": "h", "frequency": "fortnightly"})).expect("decode habit");
        assert_eq!(habit.frequency, Frequency::Custom);

        let habit: Habit = serde_json::from_value(json!({"id": "h"})).expect("decode habit");
        assert_eq!(habit.frequency, Frequency::Daily);
    }

    #[test]
    fn assignment_rejects_goal_and_area_together() {
        let mut habit = Habit::new("h1", "Read", Frequency::Daily);
        assert_eq!(habit.assignment().expect("unassigned"), Assignment::Unassigned);

        habit.area_id = Some("health".to_string());
        assert_eq!(habit.assignment().expect("area"), Assignment::Area("health".to_string()));

        habit.goal_id = Some("g1".to_string());
        assert!(habit.assignment().is_err());
    }

    #[test]
    fn loose_order_and_numeric_created_at() {
        let habit: Habit = serde_json::from_value(json!({
            "id": "h2", "order": "3", "created_at": 1709510400000_i64
        }))
        .expect("decode habit");
        assert_eq!(habit.order, Some(3));
        assert!(habit.created_at.to_date().is_some());

        let habit: Habit =
            serde_json::from_value(json!({"id": "h3", "order": "first"})).expect("decode habit");
        assert_eq!(habit.order, None);
    }
}
