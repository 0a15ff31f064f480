use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  NaiveDate,
  NaiveDateTime,
  TimeDelta,
  Timelike,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::{
  Deserialize,
  Deserializer,
  Serialize,
  Serializer
};

pub const TIMEZONE_ENV_VAR: &str =
  "CESTA_TIMEZONE";
pub const DEFAULT_PROJECT_TIMEZONE:
  &str = "Europe/Prague";
pub const DATE_FORMAT: &str =
  "%Y-%m-%d";

static PROJECT_TZ: OnceLock<Tz> =
  OnceLock::new();

/// Timezone used as "local" when a
/// value carries no usable offset.
///
/// Set once at startup through
/// [`set_project_timezone`]; if nobody
/// did, `CESTA_TIMEZONE` and then the
/// built-in default are used.
pub fn project_timezone() -> Tz {
  *PROJECT_TZ.get_or_init(
    resolve_project_timezone
  )
}

/// Returns false when a timezone was
/// already fixed for this process.
pub fn set_project_timezone(
  tz: Tz
) -> bool {
  let accepted =
    PROJECT_TZ.set(tz).is_ok();
  if !accepted {
    tracing::debug!(
      requested = %tz,
      active = %project_timezone(),
      "project timezone already set"
    );
  }
  accepted
}

fn resolve_project_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
  {
    if let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    ) {
      return tz;
    }
  }

  parse_timezone(
    DEFAULT_PROJECT_TIMEZONE,
    "DEFAULT_PROJECT_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// A date as it arrives from the
/// backend or from a caller.
#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub enum DateInput {
  Text(String),
  Instant(DateTime<Utc>),
  #[default]
  Missing
}

impl From<&str> for DateInput {
  fn from(value: &str) -> Self {
    Self::Text(value.to_string())
  }
}

impl From<String> for DateInput {
  fn from(value: String) -> Self {
    Self::Text(value)
  }
}

impl From<DateTime<Utc>> for DateInput {
  fn from(
    value: DateTime<Utc>
  ) -> Self {
    Self::Instant(value)
  }
}

impl From<NaiveDate> for DateInput {
  fn from(value: NaiveDate) -> Self {
    Self::Text(format_date(value))
  }
}

impl DateInput {
  pub fn is_missing(&self) -> bool {
    match self {
      | Self::Missing => true,
      | Self::Text(raw) => {
        raw.trim().is_empty()
      }
      | Self::Instant(_) => false
    }
  }

  pub fn to_date(
    &self
  ) -> Option<NaiveDate> {
    parse_canonical(&normalize(self))
  }
}

impl Serialize for DateInput {
  fn serialize<S>(
    &self,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    match self {
      | Self::Text(raw) => {
        serializer.serialize_str(raw)
      }
      | Self::Instant(dt) => {
        serializer.serialize_str(
          &dt.to_rfc3339()
        )
      }
      | Self::Missing => {
        serializer.serialize_none()
      }
    }
  }
}

impl<'de> Deserialize<'de> for DateInput {
  fn deserialize<D>(
    deserializer: D
  ) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>
  {
    let value =
      serde_json::Value::deserialize(
        deserializer
      )?;
    Ok(Self::from_json(&value))
  }
}

impl DateInput {
  /// Strings are kept as text; numbers
  /// are epoch milliseconds. Anything
  /// else reads as missing.
  pub fn from_json(
    value: &serde_json::Value
  ) -> Self {
    match value {
      | serde_json::Value::String(
        text
      ) => Self::Text(text.clone()),
      | serde_json::Value::Number(
        num
      ) => {
        num
          .as_i64()
          .and_then(
            DateTime::from_timestamp_millis
          )
          .map_or(
            Self::Missing,
            Self::Instant
          )
      }
      | serde_json::Value::Null => {
        Self::Missing
      }
      | other => {
        tracing::debug!(
          value = %other,
          "unsupported date value; \
           treating as missing"
        );
        Self::Missing
      }
    }
  }
}

fn date_only_re()
-> Option<&'static Regex> {
  static RE: OnceLock<Option<Regex>> =
    OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}$")
      .map_err(|err| {
        tracing::error!(
          error = %err,
          "internal regex compile failure"
        );
      })
      .ok()
  })
  .as_ref()
}

fn is_date_only(raw: &str) -> bool {
  date_only_re()
    .is_some_and(|re| re.is_match(raw))
}

/// Canonical `YYYY-MM-DD` for `input`
/// using the project timezone as local.
pub fn normalize(
  input: &DateInput
) -> String {
  normalize_in(
    input,
    project_timezone()
  )
}

pub fn normalize_str(raw: &str) -> String {
  normalize_in(
    &DateInput::Text(raw.to_string()),
    project_timezone()
  )
}

/// Canonical `YYYY-MM-DD`, or an empty
/// string when nothing usable was given.
///
/// Date-only strings and the date part
/// of ISO datetimes are returned as
/// stored; a backend `DATE` column that
/// serialised as UTC midnight must not
/// shift by a day in western timezones.
pub fn normalize_in(
  input: &DateInput,
  local: Tz
) -> String {
  match input {
    | DateInput::Missing => {
      String::new()
    }
    | DateInput::Text(raw) => {
      normalize_text(raw, local)
    }
    | DateInput::Instant(dt) => {
      format_date(instant_date(
        *dt, local
      ))
    }
  }
}

fn normalize_text(
  raw: &str,
  local: Tz
) -> String {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return String::new();
  }

  if is_date_only(trimmed) {
    return trimmed.to_string();
  }

  if let Some((date_part, _)) =
    trimmed.split_once('T')
    && is_date_only(date_part)
  {
    return date_part.to_string();
  }

  match parse_loose(trimmed, local) {
    | Some(date) => format_date(date),
    | None => {
      tracing::debug!(
        input = %trimmed,
        "unparseable date; treating as empty"
      );
      String::new()
    }
  }
}

fn instant_date(
  dt: DateTime<Utc>,
  local: Tz
) -> NaiveDate {
  let at_utc_midnight = dt
    .num_seconds_from_midnight()
    == 0
    && dt.nanosecond() == 0;
  if at_utc_midnight {
    dt.date_naive()
  } else {
    dt.with_timezone(&local)
      .date_naive()
  }
}

fn parse_loose(
  raw: &str,
  local: Tz
) -> Option<NaiveDate> {
  let utc_marked = raw.ends_with('Z')
    || raw.ends_with('z');

  let rfc3339 =
    DateTime::parse_from_rfc3339(raw)
      .or_else(|_| {
        DateTime::parse_from_rfc3339(
          &raw.replacen(' ', "T", 1)
        )
      });
  if let Ok(dt) = rfc3339 {
    return Some(if utc_marked {
      dt.with_timezone(&Utc)
        .date_naive()
    } else {
      dt.with_timezone(&local)
        .date_naive()
    });
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc2822(raw)
  {
    return Some(
      dt.with_timezone(&local)
        .date_naive()
    );
  }

  for fmt in [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M"
  ] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        raw, fmt
      )
    {
      return Some(ndt.date());
    }
  }

  for fmt in [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%Y%m%d"
  ] {
    if let Ok(date) =
      NaiveDate::parse_from_str(
        raw, fmt
      )
    {
      return Some(date);
    }
  }

  None
}

fn parse_canonical(
  raw: &str
) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(
    raw,
    DATE_FORMAT
  )
  .ok()
}

/// Normalizes and then parses; `None`
/// for anything that is not a real
/// calendar day.
pub fn parse_calendar_date(
  raw: &str
) -> Option<NaiveDate> {
  parse_canonical(&normalize_str(raw))
}

#[must_use]
pub fn format_date(
  date: NaiveDate
) -> String {
  date.format(DATE_FORMAT).to_string()
}

#[must_use]
pub fn today_in(tz: Tz) -> NaiveDate {
  Utc::now()
    .with_timezone(&tz)
    .date_naive()
}

#[must_use]
pub fn today() -> NaiveDate {
  today_in(project_timezone())
}

/// `date` shifted by `days`; `None`
/// outside chrono's calendar range.
pub fn checked_add_days(
  date: NaiveDate,
  days: i64
) -> Option<NaiveDate> {
  TimeDelta::try_days(days).and_then(
    |delta| {
      date.checked_add_signed(delta)
    }
  )
}

/// Saturating variant for calendar
/// walks: an out-of-range shift returns
/// `date` unchanged.
pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  checked_add_days(date, days)
    .unwrap_or(date)
}

pub fn first_day_of_month(
  year: i32,
  month: u32
) -> Option<NaiveDate> {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
}

pub fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  first_day_of_month(
    next_year, next_month
  )
  .map(|next| add_days(next, -1).day())
  .unwrap_or(30)
}

/// Every day from `start` to `end`,
/// both inclusive.
pub fn iter_days(
  start: NaiveDate,
  end: NaiveDate
) -> impl Iterator<Item = NaiveDate> {
  start
    .iter_days()
    .take_while(move |day| *day <= end)
}

pub(crate) fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  add_days(from, delta)
}

/// Resolves a command-line date
/// argument relative to `today`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" => return Ok(today),
    | "tomorrow" => {
      return Ok(add_days(today, 1));
    }
    | "yesterday" => {
      return Ok(add_days(today, -1));
    }
    | _ => {}
  }

  if let Some(target) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today, target
    ));
  }

  let rel_re = Regex::new(
    r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dw])$"
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let days = match caps
      .name("unit")
      .map(|m| m.as_str())
    {
      | Some("w") => num.checked_mul(7),
      | _ => Some(num)
    }
    .map(|days| {
      if sign == "-" { -days } else { days }
    });

    return days
      .and_then(|days| {
        checked_add_days(today, days)
      })
      .ok_or_else(|| {
        anyhow!(
          "relative date out of range: \
           {input}"
        )
      });
  }

  parse_calendar_date(token)
    .ok_or_else(|| {
      anyhow!(
        "unrecognized date \
         expression: {input}"
      )
    })
    .with_context(|| {
      "supported formats: \
       today/tomorrow/yesterday, \
       weekday names (e.g. monday), \
       +Nd/-Nd/+Nw, YYYY-MM-DD, \
       RFC3339, YYYY/MM/DD, DD.MM.YYYY"
    })
}
