use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MINUTES_PER_DAY: u16 = 24 * 60;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid time of day {0:?}, expected HH:mm")]
pub struct ParseTimeError(pub String);

/// Time of day at minute resolution, stored as minutes since midnight (0..=1439).
///
/// Ordering is chronological within a single day. Text form (`HH:mm`) is only
/// produced or parsed at the edges: serde, storage and user-facing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MIDNIGHT: TimeOfDay = TimeOfDay(0);
    pub const LAST_MINUTE: TimeOfDay = TimeOfDay(MINUTES_PER_DAY - 1);

    /// Build from minutes since midnight. Returns `None` past 23:59.
    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(Self(minutes))
    }

    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if hour >= 24 || minute >= 60 {
            return None;
        }
        Some(Self(hour * 60 + minute))
    }

    /// Round a fractional minute value to the nearest minute and clamp it to
    /// the [00:00, 23:59] day boundary.
    pub fn from_minutes_clamped(minutes: f64) -> Self {
        if minutes.is_nan() {
            return Self::MIDNIGHT;
        }
        let clamped = minutes.round().clamp(0.0, f64::from(MINUTES_PER_DAY - 1));
        Self(clamped as u16)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    pub fn minute(self) -> u16 {
        self.0 % 60
    }
}

impl From<NaiveTime> for TimeOfDay {
    fn from(time: NaiveTime) -> Self {
        Self((time.hour() * 60 + time.minute()) as u16)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTimeError(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(err)?;
        if h.is_empty() || m.is_empty() || h.len() > 2 || m.len() > 2 {
            return Err(err());
        }
        let hour: u16 = h.parse().map_err(|_| err())?;
        let minute: u16 = m.parse().map_err(|_| err())?;
        Self::from_hm(hour, minute).ok_or_else(err)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Full English weekday name ("Monday", ...), the label used in the arrival log.
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Parse a weekday label. Accepts full and short English names, any case.
pub fn parse_weekday(label: &str) -> Option<Weekday> {
    label.trim().parse().ok()
}

/// Serde adapter storing a [`Weekday`] under its full name.
pub mod weekday_label {
    use super::{parse_weekday, weekday_name};
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(day: &Weekday, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(weekday_name(*day))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Weekday, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_weekday(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown weekday {s:?}")))
    }
}

/// One logged arrival of the monitored person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arrival {
    pub id: String,
    pub date: NaiveDate,
    pub time: TimeOfDay,
    #[serde(with = "weekday_label")]
    pub day: Weekday,
    /// Person-detection confidence in [0, 1].
    pub confidence: f64,
    /// Tag of the detector that produced the event (e.g., "coco-ssd").
    #[serde(rename = "model")]
    pub detector: String,
    /// Face-match confidence in [0, 1], when a calibrated profile was available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_match_confidence: Option<f64>,
    pub timestamp: DateTime<Local>,
}

impl Arrival {
    /// Build an arrival at `timestamp`. Date, time and weekday are derived from it.
    pub fn new(
        timestamp: DateTime<Local>,
        confidence: f64,
        detector: impl Into<String>,
        face_match_confidence: Option<f64>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            date: timestamp.date_naive(),
            time: TimeOfDay::from(timestamp.time()),
            day: timestamp.weekday(),
            confidence: confidence.clamp(0.0, 1.0),
            detector: detector.into(),
            face_match_confidence: face_match_confidence.map(|c| c.clamp(0.0, 1.0)),
            timestamp,
        }
    }
}

/// Inferred arrival routine: mean arrival time and a ±1σ window around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Routine {
    pub last_updated: DateTime<Local>,
    pub window_start: TimeOfDay,
    pub window_end: TimeOfDay,
    pub mean_arrival_time: TimeOfDay,
    /// Population standard deviation of arrival times, in whole minutes.
    pub standard_deviation: u32,
    pub sample_size: usize,
    /// Heuristic reliability in [0.3, 1.0].
    pub confidence: f64,
}

impl Routine {
    /// Whether `time` falls inside `[window_start, window_end]` (inclusive).
    /// Windows never wrap past midnight.
    pub fn contains(&self, time: TimeOfDay) -> bool {
        self.window_start <= time && time <= self.window_end
    }
}

/// Predicted next arrival relative to a reference time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextArrival {
    pub time: TimeOfDay,
    /// Hours until `time`, rolled over to tomorrow when already past; one decimal.
    pub hours_away: f64,
}
