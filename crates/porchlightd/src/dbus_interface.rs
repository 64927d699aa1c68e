use crate::engine::{EngineError, EngineHandle, EngineStatus};
use crate::schedule::ScheduleState;
use porchlight_core::types::{parse_weekday, weekday_name};
use porchlight_core::Detection;
use serde::Serialize;
use tokio::sync::watch;
use zbus::{fdo, interface};

pub const BUS_NAME: &str = "org.porchlight.Porchlight1";
pub const OBJECT_PATH: &str = "/org/porchlight/Porchlight1";

/// D-Bus interface for the Porchlight daemon. Structured results are JSON.
///
/// Bus name: org.porchlight.Porchlight1
/// Object path: /org/porchlight/Porchlight1
pub struct PorchlightService {
    engine: EngineHandle,
    schedule: watch::Receiver<ScheduleState>,
}

impl PorchlightService {
    pub fn new(engine: EngineHandle, schedule: watch::Receiver<ScheduleState>) -> Self {
        Self {
            engine,
            schedule,
        }
    }
}

/// Reply body of `Status`: the engine snapshot plus daemon-level fields.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DaemonStatus {
    version: &'static str,
    #[serde(flatten)]
    engine: EngineStatus,
    schedule: ScheduleState,
}

fn failed(err: EngineError) -> fdo::Error {
    fdo::Error::Failed(err.to_string())
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.porchlight.Porchlight1")]
impl PorchlightService {
    /// Report one object detection. An empty descriptor means none was
    /// extracted. Returns the logged arrival, or `null` when it was filtered.
    async fn report_detection(&self, label: &str, score: f64, descriptor: Vec<f64>) -> fdo::Result<String> {
        tracing::debug!(label, score, "detection reported");
        let descriptor = (!descriptor.is_empty()).then(|| descriptor.into_iter().map(|v| v as f32).collect());
        let detection = Detection {
            label: label.to_string(),
            score,
        };
        let arrival = self
            .engine
            .report_detection(detection, descriptor)
            .await
            .map_err(failed)?;
        to_json(&arrival)
    }

    /// Log an arrival now, bypassing the detection policy.
    async fn log_arrival(&self, confidence: f64) -> fdo::Result<String> {
        let arrival = self.engine.log_arrival(confidence).await.map_err(failed)?;
        to_json(&arrival)
    }

    async fn recompute(&self) -> fdo::Result<String> {
        let routine = self.engine.recompute().await.map_err(failed)?;
        to_json(&routine)
    }

    /// Current routine, or `null` if none has been computed.
    async fn routine(&self) -> fdo::Result<String> {
        let routine = self.engine.current_routine().await.map_err(failed)?;
        to_json(&routine)
    }

    /// Routine for one weekday (full English name, case-insensitive).
    async fn routine_for_day(&self, day: &str) -> fdo::Result<String> {
        let weekday = parse_weekday(day).ok_or_else(|| fdo::Error::InvalidArgs(format!("unknown day: {day}")))?;
        let routine = self.engine.routine_for_day(weekday).await.map_err(failed)?;
        to_json(&routine)
    }

    /// Per-weekday routines as an object keyed by day name.
    async fn weekly(&self) -> fdo::Result<String> {
        let weekly = self.engine.weekly().await.map_err(failed)?;
        let map: serde_json::Map<String, serde_json::Value> = weekly
            .into_iter()
            .map(|(day, routine)| {
                let value = serde_json::to_value(routine).unwrap_or(serde_json::Value::Null);
                (weekday_name(day).to_string(), value)
            })
            .collect();
        to_json(&map)
    }

    async fn in_window(&self) -> fdo::Result<bool> {
        self.engine.in_window().await.map_err(failed)
    }

    async fn next_arrival(&self) -> fdo::Result<String> {
        let next = self.engine.next_arrival().await.map_err(failed)?;
        to_json(&next)
    }

    async fn statistics(&self) -> fdo::Result<String> {
        let stats = self.engine.statistics().await.map_err(failed)?;
        to_json(&stats)
    }

    /// Store face descriptors as the calibrated profile. Returns how many
    /// were kept.
    async fn calibrate(&self, samples: Vec<Vec<f64>>) -> fdo::Result<u32> {
        let samples = samples
            .into_iter()
            .map(|s| s.into_iter().map(|v| v as f32).collect())
            .collect();
        let kept = self.engine.calibrate(samples).await.map_err(failed)?;
        Ok(u32::try_from(kept).unwrap_or(u32::MAX))
    }

    /// Wipe arrivals, routine, greetings and face profile.
    async fn clear(&self) -> fdo::Result<()> {
        tracing::info!("clear requested over D-Bus");
        self.engine.reset().await.map_err(failed)
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let engine = self.engine.status().await.map_err(failed)?;
        to_json(&DaemonStatus {
            version: env!("CARGO_PKG_VERSION"),
            engine,
            schedule: *self.schedule.borrow(),
        })
    }
}
