//! Arrival logging: turns person detections into arrival records.

use crate::clock::{Clock, SystemClock};
use crate::store::{ArrivalStore, StoreError};
use crate::types::{weekday_label, weekday_name, Arrival, TimeOfDay};
use chrono::{TimeDelta, Weekday};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Detector tag recorded on arrivals when none is configured.
pub const DEFAULT_DETECTOR: &str = "coco-ssd";
/// Object class that counts as an arrival.
pub const PERSON_LABEL: &str = "person";

/// A single object detection reported by the vision pipeline.
#[derive(Debug, Clone)]
pub struct Detection {
    pub label: String,
    pub score: f64,
}

/// When a detection is allowed to become an arrival.
#[derive(Debug, Clone)]
pub struct DetectionPolicy {
    /// Minimum detector score.
    pub min_confidence: f64,
    /// Detections within this long of the previous arrival are the same arrival.
    pub duplicate_window: Duration,
}

impl Default for DetectionPolicy {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            duplicate_window: Duration::from_secs(60),
        }
    }
}

/// Per-weekday summary in [`ArrivalStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayStats {
    #[serde(with = "weekday_label")]
    pub day: Weekday,
    pub count: usize,
    pub average_time: TimeOfDay,
    pub average_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalStats {
    pub total_arrivals: usize,
    pub average_confidence: f64,
    pub last_arrival: Option<Arrival>,
    /// Days with at least one arrival, Monday first.
    pub arrivals_by_day: Vec<DayStats>,
}

impl ArrivalStats {
    pub fn day(&self, day: Weekday) -> Option<&DayStats> {
        self.arrivals_by_day.iter().find(|s| s.day == day)
    }
}

/// Writes arrivals to the store using the clock's current time.
pub struct ArrivalLogger<S, C = SystemClock> {
    store: Arc<S>,
    clock: C,
    detector: String,
}

impl<S: ArrivalStore, C: Clock> ArrivalLogger<S, C> {
    pub fn new(store: Arc<S>, clock: C, detector: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            detector: detector.into(),
        }
    }

    /// Record an arrival happening now.
    pub fn log_arrival(
        &self,
        confidence: f64,
        face_match_confidence: Option<f64>,
    ) -> Result<Arrival, StoreError> {
        let arrival = Arrival::new(
            self.clock.now(),
            confidence,
            self.detector.as_str(),
            face_match_confidence,
        );
        self.store.append(&arrival)?;
        tracing::info!(
            id = %arrival.id,
            time = %arrival.time,
            day = weekday_name(arrival.day),
            confidence = arrival.confidence,
            face_match = ?arrival.face_match_confidence,
            "arrival logged"
        );
        Ok(arrival)
    }

    /// Whether the latest arrival is newer than `window`.
    pub fn was_recently_detected(&self, window: Duration) -> Result<bool, StoreError> {
        let Some(last) = self.store.last_arrival()? else {
            return Ok(false);
        };
        let elapsed = self.clock.now().signed_duration_since(last.timestamp);
        let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        Ok(elapsed < window)
    }

    /// Apply `policy` to a detection and log it as an arrival if it passes.
    ///
    /// Returns `None` for non-person detections, low scores, and repeats of an
    /// arrival already logged within the duplicate window.
    pub fn handle_detection(
        &self,
        detection: &Detection,
        face_match_confidence: Option<f64>,
        policy: &DetectionPolicy,
    ) -> Result<Option<Arrival>, StoreError> {
        if detection.label != PERSON_LABEL || detection.score < policy.min_confidence {
            return Ok(None);
        }
        if self.was_recently_detected(policy.duplicate_window)? {
            tracing::debug!(score = detection.score, "person already logged recently; skipping");
            return Ok(None);
        }
        self.log_arrival(detection.score, face_match_confidence).map(Some)
    }

    /// Arrivals dated within the last `days` days (today included).
    pub fn recent_arrivals(&self, days: u32) -> Result<Vec<Arrival>, StoreError> {
        let since = (self.clock.now() - TimeDelta::days(i64::from(days))).date_naive();
        let mut arrivals = self.store.arrivals()?;
        arrivals.retain(|a| a.date >= since);
        Ok(arrivals)
    }

    pub fn arrivals_on(&self, day: Weekday) -> Result<Vec<Arrival>, StoreError> {
        let mut arrivals = self.store.arrivals()?;
        arrivals.retain(|a| a.day == day);
        Ok(arrivals)
    }

    pub fn statistics(&self) -> Result<ArrivalStats, StoreError> {
        Ok(summarize(&self.store.arrivals()?))
    }
}

/// Totals, average confidence and per-weekday averages over `arrivals`.
pub fn summarize(arrivals: &[Arrival]) -> ArrivalStats {
    if arrivals.is_empty() {
        return ArrivalStats {
            total_arrivals: 0,
            average_confidence: 0.0,
            last_arrival: None,
            arrivals_by_day: Vec::new(),
        };
    }

    let mut grouped: [Vec<&Arrival>; 7] = Default::default();
    for arrival in arrivals {
        grouped[arrival.day.num_days_from_monday() as usize].push(arrival);
    }

    let arrivals_by_day = grouped
        .iter()
        .filter(|group| !group.is_empty())
        .map(|group| {
            let n = group.len() as f64;
            let minutes = group.iter().map(|a| f64::from(a.time.minutes())).sum::<f64>() / n;
            DayStats {
                day: group[0].day,
                count: group.len(),
                average_time: TimeOfDay::from_minutes_clamped(minutes),
                average_confidence: group.iter().map(|a| a.confidence).sum::<f64>() / n,
            }
        })
        .collect();

    ArrivalStats {
        total_arrivals: arrivals.len(),
        average_confidence: arrivals.iter().map(|a| a.confidence).sum::<f64>() / arrivals.len() as f64,
        last_arrival: arrivals.last().cloned(),
        arrivals_by_day,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{DateTime, Local, TimeZone};

    fn at(d: u32, h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, d, h, m, 0).unwrap()
    }

    fn logger(now: DateTime<Local>) -> (ArrivalLogger<MemoryStore, ManualClock>, ManualClock, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(now);
        (ArrivalLogger::new(store.clone(), clock.clone(), DEFAULT_DETECTOR), clock, store)
    }

    fn person(score: f64) -> Detection {
        Detection {
            label: PERSON_LABEL.to_string(),
            score,
        }
    }

    #[test]
    fn test_log_arrival_uses_clock() {
        let (logger, _, store) = logger(at(27, 17, 30));
        let arrival = logger.log_arrival(0.91, Some(0.8)).unwrap();
        assert_eq!(arrival.time.to_string(), "17:30");
        assert_eq!(arrival.day, Weekday::Mon);
        assert_eq!(arrival.detector, DEFAULT_DETECTOR);
        assert_eq!(store.arrivals().unwrap(), vec![arrival]);
    }

    #[test]
    fn test_was_recently_detected() {
        let (logger, clock, _) = logger(at(27, 17, 30));
        assert!(!logger.was_recently_detected(Duration::from_secs(300)).unwrap());

        logger.log_arrival(0.9, None).unwrap();
        clock.advance(TimeDelta::seconds(299));
        assert!(logger.was_recently_detected(Duration::from_secs(300)).unwrap());
        clock.advance(TimeDelta::seconds(1));
        assert!(!logger.was_recently_detected(Duration::from_secs(300)).unwrap());
    }

    #[test]
    fn test_handle_detection_applies_policy() {
        let (logger, clock, store) = logger(at(27, 17, 30));
        let policy = DetectionPolicy::default();

        let cat = Detection {
            label: "cat".into(),
            score: 0.99,
        };
        assert!(logger.handle_detection(&cat, None, &policy).unwrap().is_none());
        assert!(logger.handle_detection(&person(0.5), None, &policy).unwrap().is_none());

        assert!(logger.handle_detection(&person(0.8), None, &policy).unwrap().is_some());
        clock.advance(TimeDelta::seconds(30));
        assert!(logger.handle_detection(&person(0.95), None, &policy).unwrap().is_none());
        clock.advance(TimeDelta::seconds(31));
        assert!(logger.handle_detection(&person(0.95), None, &policy).unwrap().is_some());

        assert_eq!(store.arrivals().unwrap().len(), 2);
    }

    #[test]
    fn test_recent_arrivals_and_by_day() {
        let (logger, clock, _) = logger(at(20, 8, 0));
        logger.log_arrival(0.9, None).unwrap(); // Monday 20th
        clock.set(at(27, 8, 0));
        logger.log_arrival(0.9, None).unwrap(); // Monday 27th
        clock.set(at(28, 8, 0));
        logger.log_arrival(0.9, None).unwrap(); // Tuesday 28th

        assert_eq!(logger.recent_arrivals(3).unwrap().len(), 2);
        assert_eq!(logger.recent_arrivals(30).unwrap().len(), 3);
        assert_eq!(logger.arrivals_on(Weekday::Mon).unwrap().len(), 2);
    }

    #[test]
    fn test_statistics() {
        let (logger, clock, _) = logger(at(27, 17, 0));
        logger.log_arrival(0.8, None).unwrap();
        clock.set(at(28, 18, 0));
        logger.log_arrival(0.6, None).unwrap();
        let stats = logger.statistics().unwrap();

        assert_eq!(stats.total_arrivals, 2);
        assert!((stats.average_confidence - 0.7).abs() < 1e-9);
        assert_eq!(stats.last_arrival.as_ref().unwrap().time.to_string(), "18:00");
        assert_eq!(stats.day(Weekday::Mon).unwrap().count, 1);
        assert_eq!(stats.day(Weekday::Tue).unwrap().average_time.to_string(), "18:00");
        assert!(stats.day(Weekday::Wed).is_none());

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["arrivalsByDay"][0]["day"], "Monday");
        assert_eq!(json["arrivalsByDay"][1]["averageTime"], "18:00");
    }

    #[test]
    fn test_statistics_empty() {
        let stats = summarize(&[]);
        assert_eq!(stats.total_arrivals, 0);
        assert!(stats.last_arrival.is_none());
    }
}
