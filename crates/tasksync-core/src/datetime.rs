use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;
use tasksync_shared::BackendTimestamp;

pub const DAY_FORMAT: &str = "%d-%m-%Y";
pub const NO_DUE_DATE: &str =
  "No Due Date";

const TIMEZONE_CONFIG_FILE: &str =
  "tasksync-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "TASKSYNC_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "TASKSYNC_TIME_CONFIG";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

static PROJECT_TZ: OnceLock<Tz> =
  OnceLock::new();

pub fn project_timezone() -> &'static Tz
{
  PROJECT_TZ.get_or_init(|| {
    resolve_project_timezone(None)
  })
}

/// Fixes the project timezone from the
/// rc `timezone` key. `$TASKSYNC_TIMEZONE`
/// still wins. Has no effect once the
/// timezone has been read.
pub fn configure_project_timezone(
  rc_value: Option<&str>
) -> &'static Tz {
  PROJECT_TZ.get_or_init(|| {
    resolve_project_timezone(rc_value)
  })
}

/// Calendar day of `now` in the project timezone.
#[must_use]
pub fn today(
  now: DateTime<Utc>
) -> NaiveDate {
  to_project_date(now)
}

#[must_use]
pub fn to_project_date(
  dt: DateTime<Utc>
) -> NaiveDate {
  dt.with_timezone(project_timezone())
    .date_naive()
}

#[must_use]
pub fn format_day(
  date: NaiveDate
) -> String {
  date.format(DAY_FORMAT).to_string()
}

/// Parses the fixed `DD-MM-YYYY` day encoding used for stored dates.
pub fn parse_day(
  raw: &str
) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(
    raw.trim(),
    DAY_FORMAT
  )
  .ok()
}

pub fn timestamp_to_utc(
  ts: BackendTimestamp
) -> Option<DateTime<Utc>> {
  DateTime::<Utc>::from_timestamp(
    ts.seconds,
    ts.nanoseconds
  )
}

#[must_use]
pub fn utc_to_timestamp(
  dt: DateTime<Utc>
) -> BackendTimestamp {
  BackendTimestamp {
    seconds:     dt.timestamp(),
    nanoseconds: dt
      .timestamp_subsec_nanos()
  }
}

/// Accepts an RFC 3339 instant or a `DD-MM-YYYY` day (read as local
/// midnight in the project timezone).
pub fn parse_instant(
  raw: &str
) -> Option<DateTime<Utc>> {
  let token = raw.trim();
  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Some(dt.with_timezone(&Utc));
  }
  let day = parse_day(token)?;
  day_start_utc(day).ok()
}

pub fn day_start_utc(
  day: NaiveDate
) -> anyhow::Result<DateTime<Utc>> {
  let midnight = day
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      anyhow!(
        "failed to construct \
         midnight for {day}"
      )
    })?;
  match project_timezone()
    .from_local_datetime(&midnight)
  {
    | LocalResult::Single(local) => {
      Ok(local.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        day = %day,
        "ambiguous local midnight; using earliest"
      );
      Ok(
        first
          .min(second)
          .with_timezone(&Utc)
      )
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local midnight does not \
         exist in configured \
         timezone: {day}"
      ))
    }
  }
}

/// Sunday through Saturday of the week containing `today`.
#[must_use]
pub fn week_bounds(
  today: NaiveDate
) -> (NaiveDate, NaiveDate) {
  let offset = i64::from(
    today
      .weekday()
      .num_days_from_sunday()
  );
  let start =
    today - Duration::days(offset);
  (start, start + Duration::days(6))
}

#[must_use]
pub fn month_bounds(
  today: NaiveDate
) -> (NaiveDate, NaiveDate) {
  let start = today
    .with_day(1)
    .unwrap_or(today);
  let next_month = if today.month()
    == 12
  {
    NaiveDate::from_ymd_opt(
      today.year() + 1,
      1,
      1
    )
  } else {
    NaiveDate::from_ymd_opt(
      today.year(),
      today.month() + 1,
      1
    )
  };
  let end = next_month
    .and_then(|d| d.pred_opt())
    .unwrap_or(today);
  (start, end)
}

#[derive(
  Debug, Clone, PartialEq, Eq,
)]
pub enum DueLabel {
  Today,
  Tomorrow,
  Overdue,
  Upcoming(String),
  NoDueDate,
  Invalid
}

impl DueLabel {
  pub fn is_overdue(&self) -> bool {
    matches!(self, DueLabel::Overdue)
  }
}

impl std::fmt::Display for DueLabel {
  fn fmt(
    &self,
    f: &mut std::fmt::Formatter<'_>
  ) -> std::fmt::Result {
    match self {
      | DueLabel::Today => {
        f.write_str("Today")
      }
      | DueLabel::Tomorrow => {
        f.write_str("Tomorrow")
      }
      | DueLabel::Overdue => {
        f.write_str("! Overdue")
      }
      | DueLabel::Upcoming(day) => {
        f.write_str(day)
      }
      | DueLabel::NoDueDate => {
        f.write_str(NO_DUE_DATE)
      }
      | DueLabel::Invalid => {
        f.write_str("Invalid Date")
      }
    }
  }
}

#[must_use]
pub fn due_label(
  due: Option<NaiveDate>,
  today: NaiveDate
) -> DueLabel {
  let Some(due) = due else {
    return DueLabel::NoDueDate;
  };
  let diff = (due - today).num_days();
  match diff {
    | 0 => DueLabel::Today,
    | 1 => DueLabel::Tomorrow,
    | d if d < 0 => DueLabel::Overdue,
    | _ => {
      DueLabel::Upcoming(format_day(
        due
      ))
    }
  }
}

/// Resolves a user-entered due date. Accepts `today`, `tomorrow`, `+Nd`,
/// `DD-MM-YYYY` and `YYYY-MM-DD`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_due_input(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" => return Ok(today),
    | "tomorrow" => {
      return Ok(
        today + Duration::days(1)
      );
    }
    | "yesterday" => {
      return Ok(
        today - Duration::days(1)
      );
    }
    | _ => {}
  }

  let rel_re = Regex::new(
    r"^(?P<sign>[+-])(?P<num>\d+)d$"
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
    let negative = caps
      .name("sign")
      .is_some_and(|m| m.as_str() == "-");
    let shifted =
      Duration::try_days(num).and_then(
        |delta| {
          if negative {
            today.checked_sub_signed(delta)
          } else {
            today.checked_add_signed(delta)
          }
        }
      );
    return shifted.ok_or_else(|| {
      anyhow!("due date out of range")
    });
  }

  if let Some(day) = parse_day(token) {
    return Ok(day);
  }

  if let Ok(day) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(day);
  }

  Err(anyhow!(
    "unrecognized date: {input}"
  ))
  .with_context(|| {
    "supported formats: \
     today/tomorrow/yesterday, +Nd, \
     DD-MM-YYYY, YYYY-MM-DD"
  })
}

fn resolve_project_timezone(
  rc_value: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(raw) = rc_value
    && let Some(tz) =
      parse_timezone(raw, "rc.timezone")
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  chrono_tz::UTC
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
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

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::{
    DueLabel,
    due_label,
    month_bounds,
    parse_day,
    parse_due_input,
    week_bounds
  };

  fn day(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn parses_fixed_day_encoding() {
    assert_eq!(
      parse_day("10-05-2025"),
      Some(day(2025, 5, 10))
    );
    assert_eq!(
      parse_day("No Due Date"),
      None
    );
    assert_eq!(
      parse_day("2025-05-10"),
      None
    );
  }

  #[test]
  fn week_runs_sunday_to_saturday() {
    // 10 May 2025 is a Saturday.
    let (start, end) =
      week_bounds(day(2025, 5, 10));
    assert_eq!(start, day(2025, 5, 4));
    assert_eq!(end, day(2025, 5, 10));

    let (start, end) =
      week_bounds(day(2025, 5, 4));
    assert_eq!(start, day(2025, 5, 4));
    assert_eq!(end, day(2025, 5, 10));
  }

  #[test]
  fn month_bounds_handle_december() {
    let (start, end) =
      month_bounds(day(2025, 12, 17));
    assert_eq!(start, day(2025, 12, 1));
    assert_eq!(end, day(2025, 12, 31));

    let (start, end) =
      month_bounds(day(2024, 2, 10));
    assert_eq!(start, day(2024, 2, 1));
    assert_eq!(end, day(2024, 2, 29));
  }

  #[test]
  fn due_labels_relative_to_today() {
    let today = day(2025, 5, 10);
    assert_eq!(
      due_label(Some(today), today),
      DueLabel::Today
    );
    assert_eq!(
      due_label(
        Some(day(2025, 5, 11)),
        today
      ),
      DueLabel::Tomorrow
    );
    let overdue = due_label(
      Some(day(2025, 1, 1)),
      today
    );
    assert!(overdue.is_overdue());
    assert_eq!(
      overdue.to_string(),
      "! Overdue"
    );
    assert_eq!(
      due_label(
        Some(day(2025, 6, 1)),
        today
      )
      .to_string(),
      "01-06-2025"
    );
    assert_eq!(
      due_label(None, today),
      DueLabel::NoDueDate
    );
  }

  #[test]
  fn parses_due_input_forms() {
    let today = day(2025, 5, 10);
    assert_eq!(
      parse_due_input("today", today)
        .expect("today"),
      today
    );
    assert_eq!(
      parse_due_input("+3d", today)
        .expect("relative"),
      day(2025, 5, 13)
    );
    assert_eq!(
      parse_due_input(
        "2025-05-20",
        today
      )
      .expect("iso"),
      day(2025, 5, 20)
    );
    assert_eq!(
      parse_due_input(
        "20-05-2025",
        today
      )
      .expect("dmy"),
      day(2025, 5, 20)
    );
    assert!(
      parse_due_input("soon", today)
        .is_err()
    );
  }

  #[test]
  fn out_of_range_relative_due_is_an_error() {
    let today = day(2025, 5, 10);
    for input in [
      "+99999999999d",
      "-99999999999d",
      "+999999999999999d",
      "+9223372036854775807d"
    ] {
      let err =
        parse_due_input(input, today)
          .expect_err(input);
      assert!(
        format!("{err:#}")
          .contains("out of range"),
        "{input}: {err:#}"
      );
    }
  }
}
