//! Decoders for habit fields whose stored encoding varies between rows.
//!
//! The backend has written `selected_days` as a native list, as a
//! JSON-encoded string and as a plain comma-separated string, and
//! `habit_completions` as an object or a JSON string whose values are
//! booleans or `"true"`. Everything is decoded once at deserialisation
//! time into the canonical types below; nothing downstream looks at the
//! raw shape again.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

use crate::datetime::{normalize_str, parse_calendar_date};

/// Ordered, de-duplicated, lower-cased schedule tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayTokens(Vec<String>);

impl DayTokens {
    pub fn from_value(value: &Value) -> Self {
        let mut out = Self::default();
        out.extend_from_value(value);
        out
    }

    pub fn parse_str(raw: &str) -> Self {
        let mut out = Self::default();
        out.extend_from_str(raw);
        out
    }

    fn extend_from_value(&mut self, value: &Value) {
        match value {
            Value::Null => {}
            Value::String(raw) => self.extend_from_str(raw),
            Value::Number(num) => self.push(&num.to_string()),
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::String(raw) => self.push(raw),
                        Value::Number(num) => self.push(&num.to_string()),
                        other => debug!(?other, "ignoring non-scalar day token"),
                    }
                }
            }
            other => debug!(?other, "ignoring unsupported selected_days shape"),
        }
    }

    fn extend_from_str(&mut self, raw: &str) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return;
        }

        if trimmed.starts_with('[') {
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Array(items)) => {
                    self.extend_from_value(&Value::Array(items));
                    return;
                }
                Ok(other) => debug!(?other, "json day list was not an array"),
                Err(err) => debug!(error = %err, "day list looked like json but did not parse"),
            }
        }

        for part in trimmed
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
        {
            self.push(part);
        }
    }

    fn push(&mut self, raw: &str) {
        let token = raw.trim().trim_matches('"').trim().to_lowercase();
        if token.is_empty() || self.0.contains(&token) {
            return;
        }
        self.0.push(token);
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|t| t == token)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<S: AsRef<str>> FromIterator<S> for DayTokens {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut out = Self::default();
        for item in iter {
            out.push(item.as_ref());
        }
        out
    }
}

impl Serialize for DayTokens {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DayTokens {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

/// Explicit calendar days, each normalised to `YYYY-MM-DD`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateList(Vec<String>);

impl DateList {
    pub fn from_value(value: &Value) -> Self {
        let tokens = match value {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            Value::String(raw) => {
                let trimmed = raw.trim();
                match serde_json::from_str::<Vec<String>>(trimmed) {
                    Ok(items) => items,
                    Err(_) => trimmed.split(',').map(str::to_string).collect(),
                }
            }
            _ => Vec::new(),
        };

        tokens.into_iter().collect()
    }

    pub fn contains(&self, date_str: &str) -> bool {
        self.0.iter().any(|d| d == date_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for DateList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut out: Vec<String> = Vec::new();
        for item in iter {
            let date = normalize_str(item.as_ref());
            if !date.is_empty() && !out.contains(&date) {
                out.push(date);
            }
        }
        Self(out)
    }
}

impl Serialize for DateList {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DateList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

/// Per-day completion flags keyed by canonical date string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionMap(BTreeMap<String, bool>);

impl CompletionMap {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(entries) => {
                let mut out = BTreeMap::new();
                for (key, flag) in entries {
                    let date = normalize_str(key);
                    if date.is_empty() {
                        debug!(key = %key, "dropping completion with unparseable date key");
                        continue;
                    }
                    *out.entry(date).or_insert(false) |= flag_is_set(flag);
                }
                Self(out)
            }
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(inner @ Value::Object(_)) => Self::from_value(&inner),
                Ok(_) => Self::default(),
                Err(err) => {
                    debug!(error = %err, "habit_completions string is not valid json");
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    pub fn is_completed(&self, date_str: &str) -> bool {
        let key = normalize_str(date_str);
        self.0.get(&key).copied().unwrap_or(false)
    }

    pub fn set(&mut self, date_str: &str, completed: bool) {
        let key = normalize_str(date_str);
        if key.is_empty() {
            debug!(input = %date_str, "ignoring completion for unparseable date");
            return;
        }
        self.0.insert(key, completed);
    }

    /// Days flagged complete, oldest first.
    pub fn completed_dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.0
            .iter()
            .filter(|(_, done)| **done)
            .filter_map(|(key, _)| parse_calendar_date(key))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn flag_is_set(flag: &Value) -> bool {
    match flag {
        Value::Bool(done) => *done,
        Value::String(raw) => raw == "true",
        _ => false,
    }
}

/// `deserialize_with` helper for boolean columns that have shown up as
/// `"true"`, `1` or `null`.
pub fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(flag) => flag,
        Value::String(raw) => matches!(raw.trim(), "true" | "1"),
        Value::Number(num) => num.as_i64() == Some(1),
        _ => false,
    })
}

/// `deserialize_with` helper for optional counts and ranks that may arrive
/// as numbers, numeric strings or junk. Junk reads as `None`.
pub fn lenient_i64_opt<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(integer_from_value(&value))
}

/// Unsigned variant of [`lenient_i64_opt`]; negatives read as `None`.
pub fn lenient_u32_opt<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(integer_from_value(&value).and_then(|n| u32::try_from(n).ok()))
}

fn integer_from_value(value: &Value) -> Option<i64> {
    let parsed = match value {
        Value::Number(num) => num.as_i64().or_else(|| num.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    };
    if parsed.is_none() && !value.is_null() {
        debug!(%value, "ignoring non-integer value");
    }
    parsed
}

/// `deserialize_with` helper for identifiers the backend sends either as
/// strings or as numbers.
pub fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(raw) => Ok(raw),
        Value::Number(num) => Ok(num.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

/// Optional variant of [`opaque_id`]; empty strings read as `None`.
pub fn opaque_id_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(raw) if !raw.trim().is_empty() => Some(raw),
        Value::Number(num) => Some(num.to_string()),
        _ => None,
    })
}

impl Serialize for CompletionMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CompletionMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{CompletionMap, DateList, DayTokens};

    #[test]
    fn day_tokens_accept_all_three_encodings() {
        let native = DayTokens::from_value(&json!(["Monday", "wednesday"]));
        let encoded = DayTokens::from_value(&json!("[\"monday\",\"wednesday\"]"));
        let csv = DayTokens::from_value(&json!("monday, Wednesday"));

        assert_eq!(native, encoded);
        assert_eq!(native, csv);
        assert_eq!(native.iter().collect::<Vec<_>>(), vec!["monday", "wednesday"]);
    }

    #[test]
    fn day_tokens_keep_numbers_and_drop_duplicates() {
        let tokens = DayTokens::from_value(&json!([1, "1", "15", null]));
        assert_eq!(tokens.iter().collect::<Vec<_>>(), vec!["1", "15"]);
    }

    #[test]
    fn day_tokens_tolerate_broken_json() {
        let tokens = DayTokens::parse_str("[\"monday\", \"friday\"");
        assert!(tokens.contains("monday"));
        assert!(tokens.contains("friday"));
        assert!(DayTokens::from_value(&json!({"monday": true})).is_empty());
    }

    #[test]
    fn completion_flags_accept_bool_and_string() {
        let map = CompletionMap::from_value(&json!({
            "2024-03-01": true,
            "2024-03-02": "true",
            "2024-03-03": false,
            "2024-03-04": "false",
            "2024-03-05": 1
        }));

        assert!(map.is_completed("2024-03-01"));
        assert!(map.is_completed("2024-03-02"));
        assert!(!map.is_completed("2024-03-03"));
        assert!(!map.is_completed("2024-03-04"));
        assert!(!map.is_completed("2024-03-05"));
        assert!(!map.is_completed("2024-03-06"));
        assert_eq!(map.completed_dates().count(), 2);
    }

    #[test]
    fn completion_json_string_and_garbage() {
        let encoded = CompletionMap::from_value(&json!("{\"2024-03-01\":\"true\"}"));
        assert!(encoded.is_completed("2024-03-01T00:00:00.000Z"));

        assert!(CompletionMap::from_value(&json!("{not json")).is_empty());
        assert!(CompletionMap::from_value(&json!(null)).is_empty());
        assert!(CompletionMap::from_value(&json!([1, 2])).is_empty());
    }

    #[test]
    fn date_list_normalizes_entries() {
        let dates = DateList::from_value(&json!([
            "2024-03-01T00:00:00.000Z",
            "2024-03-01",
            "garbage",
            "2024-03-09"
        ]));
        assert_eq!(dates.iter().collect::<Vec<_>>(), vec!["2024-03-01", "2024-03-09"]);
    }
}
