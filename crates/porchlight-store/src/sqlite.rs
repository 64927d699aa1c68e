//! SQLite-backed [`ArrivalStore`].

use crate::migrations::run_migrations;
use chrono::{DateTime, Local, NaiveDate};
use porchlight_core::store::{ArrivalStore, StoreError};
use porchlight_core::types::{parse_weekday, weekday_name, Arrival, Routine, TimeOfDay};
use porchlight_core::{DayPeriod, FaceProfile, Greeting};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Arrival row as stored, before the text columns are parsed.
struct ArrivalRow {
    id: String,
    date: String,
    time: String,
    day: String,
    confidence: f64,
    model: String,
    face_match_confidence: Option<f64>,
    timestamp: String,
}

impl ArrivalRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            date: row.get("date")?,
            time: row.get("time")?,
            day: row.get("day")?,
            confidence: row.get("confidence")?,
            model: row.get("model")?,
            face_match_confidence: row.get("face_match_confidence")?,
            timestamp: row.get("timestamp")?,
        })
    }

    fn parse(self) -> Result<Arrival, StoreError> {
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").map_err(|_| malformed("date", &self.date))?;
        let time: TimeOfDay = self.time.parse().map_err(|_| malformed("time", &self.time))?;
        let day = parse_weekday(&self.day).ok_or_else(|| malformed("day", &self.day))?;
        let timestamp = parse_timestamp(&self.timestamp)?;
        Ok(Arrival {
            id: self.id,
            date,
            time,
            day,
            confidence: self.confidence,
            detector: self.model,
            face_match_confidence: self.face_match_confidence,
            timestamp,
        })
    }
}

fn malformed(what: &'static str, value: &str) -> StoreError {
    StoreError::Malformed {
        what,
        value: value.to_string(),
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Local>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|_| malformed("timestamp", value))
}

fn parse_period(value: &str) -> Option<DayPeriod> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
}

/// Arrival log, routine, greetings and face profile in one SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(StoreError::backend)?;
            }
        }
        let conn = Connection::open(path).map_err(StoreError::backend)?;
        tracing::info!(path = %path.display(), "opened arrival database");
        Self::from_connection(conn)
    }

    /// A private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory().map_err(StoreError::backend)?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, StoreError> {
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ArrivalStore for SqliteStore {
    fn append(&self, arrival: &Arrival) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO arrivals (id, date, time, day, confidence, model, face_match_confidence, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    arrival.id,
                    arrival.date.format("%Y-%m-%d").to_string(),
                    arrival.time.to_string(),
                    weekday_name(arrival.day),
                    arrival.confidence,
                    arrival.detector,
                    arrival.face_match_confidence,
                    arrival.timestamp.to_rfc3339(),
                ],
            )
            .map_err(StoreError::backend)?;
        Ok(())
    }

    /// Rows that fail to parse are logged and skipped.
    fn arrivals(&self) -> Result<Vec<Arrival>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, date, time, day, confidence, model, face_match_confidence, timestamp
                 FROM arrivals ORDER BY seq",
            )
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map([], ArrivalRow::from_row)
            .map_err(StoreError::backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::backend)?;

        let mut arrivals = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id.clone();
            match row.parse() {
                Ok(arrival) => arrivals.push(arrival),
                Err(err) => tracing::warn!(id, error = %err, "skipping malformed arrival"),
            }
        }
        Ok(arrivals)
    }

    fn last_arrival(&self) -> Result<Option<Arrival>, StoreError> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, date, time, day, confidence, model, face_match_confidence, timestamp
                 FROM arrivals ORDER BY seq DESC LIMIT 1",
                [],
                ArrivalRow::from_row,
            )
            .optional()
            .map_err(StoreError::backend)?;
        match row.map(ArrivalRow::parse) {
            Some(Ok(arrival)) => Ok(Some(arrival)),
            Some(Err(err)) => {
                tracing::warn!(error = %err, "latest arrival is malformed; ignoring it");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.conn()
            .execute_batch(
                "DELETE FROM arrivals;
                 DELETE FROM routine;
                 DELETE FROM greetings;
                 DELETE FROM face_profile;",
            )
            .map_err(StoreError::backend)
    }

    fn routine(&self) -> Result<Option<Routine>, StoreError> {
        let row = self
            .conn()
            .query_row(
                "SELECT last_updated, window_start, window_end, mean_arrival_time,
                        standard_deviation, sample_size, confidence
                 FROM routine WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, f64>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(StoreError::backend)?;

        let Some((updated, start, end, mean, std_dev, samples, confidence)) = row else {
            return Ok(None);
        };

        let parsed = (|| -> Result<Routine, StoreError> {
            Ok(Routine {
                last_updated: parse_timestamp(&updated)?,
                window_start: start.parse().map_err(|_| malformed("window_start", &start))?,
                window_end: end.parse().map_err(|_| malformed("window_end", &end))?,
                mean_arrival_time: mean.parse().map_err(|_| malformed("mean_arrival_time", &mean))?,
                standard_deviation: u32::try_from(std_dev)
                    .map_err(|_| malformed("standard_deviation", &std_dev.to_string()))?,
                sample_size: usize::try_from(samples).map_err(|_| malformed("sample_size", &samples.to_string()))?,
                confidence,
            })
        })();

        match parsed {
            Ok(routine) => Ok(Some(routine)),
            Err(err) => {
                tracing::warn!(error = %err, "persisted routine is malformed; treating as absent");
                Ok(None)
            }
        }
    }

    fn save_routine(&self, routine: Option<&Routine>) -> Result<(), StoreError> {
        let conn = self.conn();
        match routine {
            Some(r) => conn.execute(
                "INSERT OR REPLACE INTO routine
                    (id, last_updated, window_start, window_end, mean_arrival_time,
                     standard_deviation, sample_size, confidence)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    r.last_updated.to_rfc3339(),
                    r.window_start.to_string(),
                    r.window_end.to_string(),
                    r.mean_arrival_time.to_string(),
                    r.standard_deviation,
                    r.sample_size as i64,
                    r.confidence,
                ],
            ),
            None => conn.execute("DELETE FROM routine", []),
        }
        .map_err(StoreError::backend)?;
        Ok(())
    }

    fn append_greeting(&self, greeting: &Greeting) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO greetings (message, timestamp, time_of_day) VALUES (?1, ?2, ?3)",
                params![
                    greeting.message,
                    greeting.timestamp.to_rfc3339(),
                    greeting.period.as_str(),
                ],
            )
            .map_err(StoreError::backend)?;
        Ok(())
    }

    fn greetings(&self) -> Result<Vec<Greeting>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT message, timestamp, time_of_day FROM greetings ORDER BY seq")
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(StoreError::backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::backend)?;

        let mut greetings = Vec::with_capacity(rows.len());
        for (message, timestamp, period) in rows {
            let (Ok(timestamp), Some(period)) = (parse_timestamp(&timestamp), parse_period(&period)) else {
                tracing::warn!(%timestamp, %period, "skipping malformed greeting");
                continue;
            };
            greetings.push(Greeting {
                message,
                timestamp,
                period,
            });
        }
        Ok(greetings)
    }

    fn face_profile(&self) -> Result<Option<FaceProfile>, StoreError> {
        let row = self
            .conn()
            .query_row(
                "SELECT calibrated_at, descriptors FROM face_profile WHERE id = 1",
                [],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(StoreError::backend)?;

        let Some((calibrated_at, descriptors)) = row else {
            return Ok(None);
        };
        let calibrated_at = match calibrated_at.as_deref().map(parse_timestamp).transpose() {
            Ok(at) => at,
            Err(err) => {
                tracing::warn!(error = %err, "face profile calibration time is malformed");
                None
            }
        };
        match serde_json::from_str(&descriptors) {
            Ok(descriptors) => Ok(Some(FaceProfile {
                descriptors,
                calibrated_at,
            })),
            Err(err) => {
                tracing::warn!(error = %err, "face profile descriptors are malformed; treating as uncalibrated");
                Ok(None)
            }
        }
    }

    fn save_face_profile(&self, profile: &FaceProfile) -> Result<(), StoreError> {
        let descriptors = serde_json::to_string(&profile.descriptors).map_err(StoreError::backend)?;
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO face_profile (id, calibrated_at, descriptors) VALUES (1, ?1, ?2)",
                params![profile.calibrated_at.map(|t| t.to_rfc3339()), descriptors],
            )
            .map_err(StoreError::backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};
    use porchlight_core::{ManualClock, RoutineEngine};
    use std::sync::Arc;

    fn at(d: u32, h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, d, h, m, 0).unwrap()
    }

    fn arrival(d: u32, h: u32, m: u32) -> Arrival {
        Arrival::new(at(d, h, m), 0.9, "coco-ssd", None)
    }

    #[test]
    fn test_arrivals_round_trip_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = arrival(27, 17, 30);
        let mut second = arrival(28, 8, 5);
        second.face_match_confidence = Some(0.66);
        store.append(&first).unwrap();
        store.append(&second).unwrap();

        let all = store.arrivals().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[1].time.to_string(), "08:05");
        assert_eq!(all[1].day, Weekday::Tue);
        assert_eq!(all[1].face_match_confidence, Some(0.66));
        assert_eq!(all[1].timestamp, second.timestamp);
        assert_eq!(store.last_arrival().unwrap().unwrap().id, second.id);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.append(&arrival(27, 17, 30)).unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO arrivals (id, date, time, day, confidence, model, timestamp)
                 VALUES ('bad', '2025-01-28', '25:99', 'Tuesday', 0.9, 'coco-ssd', '2025-01-28T17:30:00+00:00')",
                [],
            )
            .unwrap();
        store.append(&arrival(29, 17, 40)).unwrap();

        let all = store.arrivals().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|a| a.id != "bad"));
    }

    #[test]
    fn test_routine_replace_and_remove() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        for (d, h, m) in [(27, 17, 25), (28, 17, 30), (29, 17, 35)] {
            store.append(&arrival(d, h, m)).unwrap();
        }
        let clock = ManualClock::new(at(30, 2, 0));
        let mut engine = RoutineEngine::open(store.clone(), clock).unwrap();
        let routine = engine.recompute().unwrap();

        assert_eq!(store.routine().unwrap(), Some(routine.clone()));

        // a fresh engine over the same database sees the persisted routine
        let reopened = RoutineEngine::open(store.clone(), ManualClock::new(at(30, 17, 30))).unwrap();
        assert_eq!(reopened.current_routine(), Some(&routine));
        assert!(reopened.is_in_window());

        store.save_routine(None).unwrap();
        assert!(store.routine().unwrap().is_none());
    }

    #[test]
    fn test_greetings_and_profile() {
        let store = SqliteStore::open_in_memory().unwrap();
        let greeting = Greeting {
            message: "Welcome back!".into(),
            timestamp: at(27, 17, 30),
            period: DayPeriod::Evening,
        };
        store.append_greeting(&greeting).unwrap();
        assert_eq!(store.greetings().unwrap(), vec![greeting]);

        assert!(store.face_profile().unwrap().is_none());
        let profile = FaceProfile::from_samples(vec![vec![0.25, 0.5]], at(27, 9, 0)).unwrap();
        store.save_face_profile(&profile).unwrap();
        assert_eq!(store.face_profile().unwrap(), Some(profile));
    }

    #[test]
    fn test_clear_empties_everything() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.append(&arrival(27, 17, 30)).unwrap();
        store
            .save_face_profile(&FaceProfile::from_samples(vec![vec![1.0]], at(27, 9, 0)).unwrap())
            .unwrap();
        store.clear().unwrap();
        assert!(store.arrivals().unwrap().is_empty());
        assert!(store.last_arrival().unwrap().is_none());
        assert!(store.face_profile().unwrap().is_none());
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("porchlight-test-{}", std::process::id()));
        let path = dir.join("nested").join("porchlight.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.append(&arrival(27, 17, 30)).unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.arrivals().unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
