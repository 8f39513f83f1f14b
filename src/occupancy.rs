//! Weekly occupancy schedule gating actuation.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::config::ConfigError;

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Occupancy rule for one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaySchedule {
    AlwaysOn,
    AlwaysOff,
    /// Occupied for `start <= time < end`, local time.
    Window { start: NaiveTime, end: NaiveTime },
}

impl DaySchedule {
    fn is_occupied(&self, time: NaiveTime) -> bool {
        match *self {
            Self::AlwaysOn => true,
            Self::AlwaysOff => false,
            Self::Window { start, end } => start <= time && time < end,
        }
    }
}

/// A day entry as written in configuration: `"always_on"`, `"always_off"`
/// or `{ start = "08:00", end = "18:00" }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DayEntryConfig {
    Keyword(String),
    Window { start: String, end: String },
}

/// Weekday name to entry. An empty map means the space is always occupied.
pub type OccupancyConfig = BTreeMap<String, DayEntryConfig>;

/// Answers whether the space is occupied at a given instant.
///
/// Immutable after construction, so one instance is shared between an asset
/// and its actuation manager behind an `Arc`.
#[derive(Debug, Clone)]
pub struct OccupancyManager {
    week: Option<[DaySchedule; 7]>,
    tz: Tz,
}

impl OccupancyManager {
    /// A manager without a schedule: every instant is occupied.
    pub fn always_occupied(tz: Tz) -> Self {
        Self { week: None, tz }
    }

    /// Builds a manager from a full week of rules, indexed Monday first.
    pub fn with_week(week: [DaySchedule; 7], tz: Tz) -> Self {
        Self {
            week: Some(week),
            tz,
        }
    }

    /// Parses a configured schedule.
    ///
    /// An empty schedule yields an always-occupied manager. A non-empty one
    /// must resolve all seven weekdays exactly once.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unknown day names, duplicate or missing
    /// days, unparseable times, and windows whose start is not before the end.
    pub fn from_config(config: &OccupancyConfig, tz: Tz) -> Result<Self, ConfigError> {
        if config.is_empty() {
            return Ok(Self::always_occupied(tz));
        }

        let mut days: [Option<DaySchedule>; 7] = [None; 7];
        for (key, entry) in config {
            let field = format!("occupancy.{key}");
            let weekday: Weekday = key
                .parse()
                .map_err(|_| ConfigError::new(&field, "not a weekday name"))?;
            let slot = &mut days[weekday.num_days_from_monday() as usize];
            if slot.is_some() {
                return Err(ConfigError::new(
                    &field,
                    format!("{weekday} is configured more than once"),
                ));
            }
            *slot = Some(parse_entry(entry, &field)?);
        }

        let mut week = [DaySchedule::AlwaysOn; 7];
        for (day, slot) in WEEK.iter().zip(days) {
            week[day.num_days_from_monday() as usize] = slot.ok_or_else(|| {
                ConfigError::new("occupancy", format!("no entry for {day}"))
            })?;
        }
        Ok(Self::with_week(week, tz))
    }

    /// Returns `true` when the space is occupied at `at`.
    pub fn check_schedule(&self, at: DateTime<Utc>) -> bool {
        let Some(week) = &self.week else {
            return true;
        };
        let local = at.with_timezone(&self.tz);
        week[local.weekday().num_days_from_monday() as usize].is_occupied(local.time())
    }

    pub fn is_always_occupied(&self) -> bool {
        self.week.is_none()
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }
}

fn parse_entry(entry: &DayEntryConfig, field: &str) -> Result<DaySchedule, ConfigError> {
    match entry {
        DayEntryConfig::Keyword(word) => match word.to_ascii_lowercase().as_str() {
            "always_on" => Ok(DaySchedule::AlwaysOn),
            "always_off" => Ok(DaySchedule::AlwaysOff),
            _ => Err(ConfigError::new(
                field,
                format!("expected \"always_on\", \"always_off\" or a window, got \"{word}\""),
            )),
        },
        DayEntryConfig::Window { start, end } => {
            let start = parse_time(start, &format!("{field}.start"))?;
            let end = parse_time(end, &format!("{field}.end"))?;
            if start >= end {
                return Err(ConfigError::new(field, "window start must be before end"));
            }
            Ok(DaySchedule::Window { start, end })
        }
    }
}

fn parse_time(raw: &str, field: &str) -> Result<NaiveTime, ConfigError> {
    let raw = raw.trim();
    ["%H:%M:%S", "%H:%M", "%I:%M %p"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| ConfigError::new(field, format!("cannot parse time \"{raw}\"")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // 2024-06-03 is a Monday.
    fn monday(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, h, m, 0).unwrap()
    }

    fn office_hours() -> OccupancyConfig {
        let window = DayEntryConfig::Window {
            start: "08:00".to_string(),
            end: "18:00".to_string(),
        };
        let mut cfg = OccupancyConfig::new();
        for day in ["monday", "tuesday", "wednesday", "thursday", "friday"] {
            cfg.insert(day.to_string(), window.clone());
        }
        cfg.insert("Sat".to_string(), DayEntryConfig::Keyword("always_off".to_string()));
        cfg.insert("sun".to_string(), DayEntryConfig::Keyword("always_on".to_string()));
        cfg
    }

    #[test]
    fn empty_schedule_is_always_occupied() {
        let om = OccupancyManager::from_config(&OccupancyConfig::new(), Tz::UTC).unwrap();
        assert!(om.is_always_occupied());
        for day in 0..7 {
            for hour in [0, 7, 12, 23] {
                let at = monday(hour, 30) + chrono::Duration::days(day);
                assert!(om.check_schedule(at));
            }
        }
    }

    #[test]
    fn window_is_end_exclusive() {
        let om = OccupancyManager::from_config(&office_hours(), Tz::UTC).unwrap();
        assert!(om.check_schedule(monday(8, 0)));
        assert!(om.check_schedule(monday(17, 59)));
        assert!(!om.check_schedule(monday(18, 0)));
        assert!(!om.check_schedule(monday(7, 59)));
    }

    #[test]
    fn keywords_ignore_time_of_day() {
        let om = OccupancyManager::from_config(&office_hours(), Tz::UTC).unwrap();
        let saturday_noon = monday(12, 0) + chrono::Duration::days(5);
        let sunday_night = monday(3, 0) + chrono::Duration::days(6);
        assert!(!om.check_schedule(saturday_noon));
        assert!(om.check_schedule(sunday_night));
    }

    #[test]
    fn schedule_is_evaluated_in_local_time() {
        let om = OccupancyManager::from_config(&office_hours(), chrono_tz::America::New_York)
            .unwrap();
        // 12:30 UTC is 08:30 EDT.
        assert!(om.check_schedule(monday(12, 30)));
        // 08:30 UTC is 04:30 EDT.
        assert!(!om.check_schedule(monday(8, 30)));
    }

    #[test]
    fn missing_weekday_fails_at_construction() {
        let mut cfg = office_hours();
        cfg.remove("friday");
        let err = OccupancyManager::from_config(&cfg, Tz::UTC).unwrap_err();
        assert!(err.message.contains("Fri"), "{err}");
    }

    #[test]
    fn duplicate_weekday_is_rejected() {
        let mut cfg = office_hours();
        cfg.insert("Mon".to_string(), DayEntryConfig::Keyword("always_on".to_string()));
        assert!(OccupancyManager::from_config(&cfg, Tz::UTC).is_err());
    }

    #[test]
    fn inverted_window_is_rejected() {
        let mut cfg = office_hours();
        cfg.insert(
            "monday".to_string(),
            DayEntryConfig::Window {
                start: "18:00".to_string(),
                end: "08:00".to_string(),
            },
        );
        let err = OccupancyManager::from_config(&cfg, Tz::UTC).unwrap_err();
        assert_eq!(err.field, "occupancy.monday");
    }

    #[test]
    fn accepts_twelve_hour_times() {
        let mut cfg = office_hours();
        cfg.insert(
            "monday".to_string(),
            DayEntryConfig::Window {
                start: "9:00 AM".to_string(),
                end: "5:00 PM".to_string(),
            },
        );
        let om = OccupancyManager::from_config(&cfg, Tz::UTC).unwrap();
        assert!(!om.check_schedule(monday(8, 30)));
        assert!(om.check_schedule(monday(16, 59)));
    }
}
