use chrono::Weekday;
use porchlight_core::logger::ArrivalStats;
use porchlight_core::{
    Arrival, ArrivalLogger, ArrivalStore, Clock, Detection, DetectionPolicy, DistanceMatcher, FaceProfile, Greeting,
    Matcher, NextArrival, Routine, RoutineEngine, RoutineError, StoreError,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Routine(#[from] RoutineError),
    #[error("calibration needs at least one face descriptor")]
    NoSamples,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Knobs the engine thread needs from the daemon config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub detector: String,
    pub policy: DetectionPolicy,
    pub matcher: DistanceMatcher,
    /// Recompute the routine after every logged arrival instead of only on
    /// the nightly run and explicit requests.
    pub recompute_on_arrival: bool,
}

/// Snapshot returned by the `Status` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub total_arrivals: usize,
    pub routine: Option<Routine>,
    pub in_window: bool,
    pub face_profile_calibrated: bool,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from D-Bus handlers, the scheduler and the greeter to the
/// engine thread.
enum EngineRequest {
    ReportDetection {
        detection: Detection,
        descriptor: Option<Vec<f32>>,
        reply: Reply<Option<Arrival>>,
    },
    LogArrival {
        confidence: f64,
        reply: Reply<Arrival>,
    },
    Recompute {
        reply: Reply<Routine>,
    },
    RoutineForDay {
        day: Weekday,
        reply: Reply<Option<Routine>>,
    },
    Weekly {
        reply: Reply<Vec<(Weekday, Routine)>>,
    },
    CurrentRoutine {
        reply: Reply<Option<Routine>>,
    },
    InWindow {
        reply: Reply<bool>,
    },
    NextArrival {
        reply: Reply<Option<NextArrival>>,
    },
    Statistics {
        reply: Reply<ArrivalStats>,
    },
    RecordGreeting {
        greeting: Greeting,
        reply: Reply<()>,
    },
    Calibrate {
        samples: Vec<Vec<f32>>,
        reply: Reply<usize>,
    },
    Reset {
        reply: Reply<()>,
    },
    Status {
        reply: Reply<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> EngineRequest) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Run a detection through the arrival policy; a logged arrival
    /// triggers a routine recompute.
    pub async fn report_detection(
        &self,
        detection: Detection,
        descriptor: Option<Vec<f32>>,
    ) -> Result<Option<Arrival>, EngineError> {
        self.request(|reply| EngineRequest::ReportDetection {
            detection,
            descriptor,
            reply,
        })
        .await
    }

    pub async fn log_arrival(&self, confidence: f64) -> Result<Arrival, EngineError> {
        self.request(|reply| EngineRequest::LogArrival { confidence, reply }).await
    }

    pub async fn recompute(&self) -> Result<Routine, EngineError> {
        self.request(|reply| EngineRequest::Recompute { reply }).await
    }

    pub async fn routine_for_day(&self, day: Weekday) -> Result<Option<Routine>, EngineError> {
        self.request(|reply| EngineRequest::RoutineForDay { day, reply }).await
    }

    pub async fn weekly(&self) -> Result<Vec<(Weekday, Routine)>, EngineError> {
        self.request(|reply| EngineRequest::Weekly { reply }).await
    }

    pub async fn current_routine(&self) -> Result<Option<Routine>, EngineError> {
        self.request(|reply| EngineRequest::CurrentRoutine { reply }).await
    }

    pub async fn in_window(&self) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::InWindow { reply }).await
    }

    pub async fn next_arrival(&self) -> Result<Option<NextArrival>, EngineError> {
        self.request(|reply| EngineRequest::NextArrival { reply }).await
    }

    pub async fn statistics(&self) -> Result<ArrivalStats, EngineError> {
        self.request(|reply| EngineRequest::Statistics { reply }).await
    }

    pub async fn record_greeting(&self, greeting: Greeting) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::RecordGreeting { greeting, reply }).await
    }

    /// Replace the stored face profile; returns the descriptor count.
    pub async fn calibrate(&self, samples: Vec<Vec<f32>>) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::Calibrate { samples, reply }).await
    }

    pub async fn reset(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Reset { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

/// Body of the nightly job: recompute, staying quiet when the log is still
/// too short.
pub async fn nightly_recompute(engine: EngineHandle) -> Option<Routine> {
    match engine.recompute().await {
        Ok(routine) => Some(routine),
        Err(EngineError::Routine(err)) if err.is_not_enough_data() => None,
        Err(err) => {
            tracing::warn!(error = %err, "nightly recompute failed");
            None
        }
    }
}

/// State owned by the engine thread.
struct Engine<S, C> {
    routine: RoutineEngine<S, C>,
    logger: ArrivalLogger<S, C>,
    clock: C,
    settings: EngineSettings,
}

impl<S: ArrivalStore, C: Clock> Engine<S, C> {
    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::ReportDetection {
                detection,
                descriptor,
                reply,
            } => {
                let _ = reply.send(self.report_detection(&detection, descriptor.as_deref()));
            }
            EngineRequest::LogArrival { confidence, reply } => {
                let result = self.logger.log_arrival(confidence, None).map_err(EngineError::from);
                if result.is_ok() {
                    self.after_arrival();
                }
                let _ = reply.send(result);
            }
            EngineRequest::Recompute { reply } => {
                let _ = reply.send(self.routine.recompute().map_err(EngineError::from));
            }
            EngineRequest::RoutineForDay { day, reply } => {
                let _ = reply.send(self.routine.analyze_by_day(day).map_err(EngineError::from));
            }
            EngineRequest::Weekly { reply } => {
                let _ = reply.send(self.routine.weekly().map_err(EngineError::from));
            }
            EngineRequest::CurrentRoutine { reply } => {
                let _ = reply.send(Ok(self.routine.current_routine().cloned()));
            }
            EngineRequest::InWindow { reply } => {
                let _ = reply.send(Ok(self.routine.is_in_window()));
            }
            EngineRequest::NextArrival { reply } => {
                let _ = reply.send(Ok(self.routine.next_predicted_arrival()));
            }
            EngineRequest::Statistics { reply } => {
                let _ = reply.send(self.logger.statistics().map_err(EngineError::from));
            }
            EngineRequest::RecordGreeting { greeting, reply } => {
                let result = self.routine.store().append_greeting(&greeting);
                let _ = reply.send(result.map_err(EngineError::from));
            }
            EngineRequest::Calibrate { samples, reply } => {
                let _ = reply.send(self.calibrate(samples));
            }
            EngineRequest::Reset { reply } => {
                let _ = reply.send(self.routine.reset().map_err(EngineError::from));
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn report_detection(
        &mut self,
        detection: &Detection,
        descriptor: Option<&[f32]>,
    ) -> Result<Option<Arrival>, EngineError> {
        let face_match = match descriptor {
            Some(candidate) => self
                .routine
                .store()
                .face_profile()?
                .filter(FaceProfile::is_calibrated)
                .map(|profile| self.settings.matcher.confidence(candidate, &profile)),
            None => None,
        };

        let arrival = self
            .logger
            .handle_detection(detection, face_match, &self.settings.policy)?;
        if arrival.is_some() {
            self.after_arrival();
        }
        Ok(arrival)
    }

    /// Recompute after a new arrival when configured to. Too little data is
    /// expected early on.
    fn after_arrival(&mut self) {
        if !self.settings.recompute_on_arrival {
            return;
        }
        match self.routine.recompute() {
            Ok(_) => {}
            Err(err) if err.is_not_enough_data() => {}
            Err(err) => tracing::warn!(error = %err, "routine recompute after arrival failed"),
        }
    }

    fn calibrate(&mut self, samples: Vec<Vec<f32>>) -> Result<usize, EngineError> {
        let profile = FaceProfile::from_samples(samples, self.clock.now()).ok_or(EngineError::NoSamples)?;
        self.routine.store().save_face_profile(&profile)?;
        tracing::info!(descriptors = profile.descriptors.len(), "face profile calibrated");
        Ok(profile.descriptors.len())
    }

    fn status(&self) -> Result<EngineStatus, EngineError> {
        let store = self.routine.store();
        Ok(EngineStatus {
            total_arrivals: store.arrivals()?.len(),
            routine: self.routine.current_routine().cloned(),
            in_window: self.routine.is_in_window(),
            face_profile_calibrated: store.face_profile()?.is_some_and(|p| p.is_calibrated()),
        })
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads the persisted routine synchronously so a broken database fails
/// startup, then serves requests until every handle is dropped.
pub fn spawn_engine<S, C>(store: Arc<S>, clock: C, settings: EngineSettings) -> Result<EngineHandle, EngineError>
where
    S: ArrivalStore + 'static,
    C: Clock + Clone + 'static,
{
    let routine = RoutineEngine::open(store.clone(), clock.clone())?;
    let logger = ArrivalLogger::new(store, clock.clone(), settings.detector.clone());

    let mut engine = Engine {
        routine,
        logger,
        clock,
        settings,
    };
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("porchlight-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Local, TimeDelta, TimeZone};
    use porchlight_core::logger::PERSON_LABEL;
    use porchlight_core::{ManualClock, MemoryStore};
    use std::time::Duration;

    fn at(d: u32, h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, d, h, m, 0).unwrap()
    }

    fn settings(recompute_on_arrival: bool) -> EngineSettings {
        EngineSettings {
            detector: "coco-ssd".into(),
            policy: DetectionPolicy {
                min_confidence: 0.7,
                duplicate_window: Duration::from_secs(60),
            },
            matcher: DistanceMatcher::default(),
            recompute_on_arrival,
        }
    }

    fn person(score: f64) -> Detection {
        Detection {
            label: PERSON_LABEL.into(),
            score,
        }
    }

    fn spawn_with(now: DateTime<Local>, recompute_on_arrival: bool) -> (EngineHandle, ManualClock, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(now);
        let handle = spawn_engine(store.clone(), clock.clone(), settings(recompute_on_arrival)).unwrap();
        (handle, clock, store)
    }

    fn spawn(now: DateTime<Local>) -> (EngineHandle, ManualClock, Arc<MemoryStore>) {
        spawn_with(now, false)
    }

    #[tokio::test]
    async fn test_arrivals_leave_routine_alone_by_default() {
        let (engine, clock, _) = spawn(at(27, 17, 25));
        for d in [27, 28, 29] {
            clock.set(at(d, 17, 30));
            engine.log_arrival(0.9).await.unwrap();
        }
        assert!(engine.current_routine().await.unwrap().is_none());

        let routine = engine.recompute().await.unwrap();
        assert_eq!(routine.sample_size, 3);
        assert_eq!(engine.current_routine().await.unwrap(), Some(routine));
    }

    #[tokio::test]
    async fn test_routine_follows_arrivals_when_enabled() {
        let (engine, clock, _) = spawn_with(at(27, 17, 25), true);

        engine.log_arrival(0.9).await.unwrap();
        clock.set(at(28, 17, 30));
        engine.log_arrival(0.9).await.unwrap();
        assert!(engine.current_routine().await.unwrap().is_none());

        clock.set(at(29, 17, 35));
        engine.log_arrival(0.9).await.unwrap();
        let routine = engine.current_routine().await.unwrap().unwrap();
        assert_eq!(routine.mean_arrival_time.to_string(), "17:30");
        assert_eq!(routine.sample_size, 3);

        // window is 17:26-17:34
        assert!(!engine.in_window().await.unwrap());
        clock.set(at(30, 17, 30));
        assert!(engine.in_window().await.unwrap());
        assert_eq!(engine.next_arrival().await.unwrap().unwrap().hours_away, 0.0);
    }

    #[tokio::test]
    async fn test_nightly_recompute_is_silent_without_data() {
        let (engine, clock, _) = spawn(at(27, 2, 0));
        assert!(nightly_recompute(engine.clone()).await.is_none());

        for d in [24, 25, 26] {
            clock.set(at(d, 17, 30));
            engine.log_arrival(0.9).await.unwrap();
        }
        clock.set(at(27, 2, 0));
        let routine = nightly_recompute(engine.clone()).await.unwrap();
        assert_eq!(routine.last_updated, at(27, 2, 0));
    }

    #[tokio::test]
    async fn test_restarted_engine_serves_persisted_routine() {
        let (engine, clock, store) = spawn(at(27, 17, 25));
        for d in [27, 28, 29] {
            clock.set(at(d, 17, 30));
            engine.log_arrival(0.9).await.unwrap();
        }
        let routine = engine.recompute().await.unwrap();
        drop(engine);

        let restarted = spawn_engine(store, clock, settings(false)).unwrap();
        assert_eq!(restarted.current_routine().await.unwrap(), Some(routine));
    }

    #[tokio::test]
    async fn test_recompute_on_empty_log_reports_not_enough_data() {
        let (engine, _, _) = spawn(at(27, 2, 0));
        let err = engine.recompute().await.unwrap_err();
        assert!(matches!(err, EngineError::Routine(RoutineError::NotEnoughData { found: 0, .. })));
        assert!(!engine.in_window().await.unwrap());
        assert!(engine.next_arrival().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_report_detection_filters_and_dedups() {
        let (engine, clock, store) = spawn(at(27, 17, 30));

        assert!(engine.report_detection(person(0.4), None).await.unwrap().is_none());
        assert!(engine.report_detection(person(0.9), None).await.unwrap().is_some());
        clock.advance(TimeDelta::seconds(10));
        assert!(engine.report_detection(person(0.9), None).await.unwrap().is_none());
        assert_eq!(store.arrivals().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_face_match_attached_after_calibration() {
        let (engine, clock, _) = spawn(at(27, 17, 30));

        let uncalibrated = engine
            .report_detection(person(0.9), Some(vec![0.0, 0.0]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(uncalibrated.face_match_confidence, None);

        assert_eq!(engine.calibrate(vec![vec![0.0, 0.0]]).await.unwrap(), 1);
        clock.advance(TimeDelta::minutes(5));
        let matched = engine
            .report_detection(person(0.9), Some(vec![0.0, 0.0]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(matched.face_match_confidence, Some(1.0));
        assert!(engine.status().await.unwrap().face_profile_calibrated);
    }

    #[tokio::test]
    async fn test_calibrate_without_samples_fails() {
        let (engine, _, _) = spawn(at(27, 9, 0));
        assert!(matches!(engine.calibrate(Vec::new()).await, Err(EngineError::NoSamples)));
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let (engine, clock, store) = spawn(at(20, 8, 0));
        for d in [20, 21, 22] {
            clock.set(at(d, 8, 0));
            engine.log_arrival(0.9).await.unwrap();
        }
        engine.recompute().await.unwrap();
        assert!(engine.current_routine().await.unwrap().is_some());

        engine.reset().await.unwrap();
        assert!(engine.current_routine().await.unwrap().is_none());
        assert!(store.arrivals().unwrap().is_empty());
        assert_eq!(engine.status().await.unwrap().total_arrivals, 0);
    }

    #[tokio::test]
    async fn test_day_routines_and_statistics() {
        let (engine, clock, _) = spawn(at(20, 8, 0));
        // two Mondays and one Tuesday
        for (d, h) in [(20, 8), (27, 9), (28, 18)] {
            clock.set(at(d, h, 0));
            engine.log_arrival(0.8).await.unwrap();
        }
        let monday = engine.routine_for_day(Weekday::Mon).await.unwrap().unwrap();
        assert_eq!(monday.mean_arrival_time.to_string(), "08:30");
        assert!(engine.routine_for_day(Weekday::Tue).await.unwrap().is_none());
        assert_eq!(engine.weekly().await.unwrap().len(), 1);
        assert_eq!(engine.statistics().await.unwrap().total_arrivals, 3);
    }

    #[tokio::test]
    async fn test_record_greeting_appends_to_log() {
        let (engine, _, store) = spawn(at(27, 17, 30));
        let greeting = Greeting {
            message: "Welcome back!".into(),
            timestamp: at(27, 17, 30),
            period: porchlight_core::DayPeriod::Evening,
        };
        engine.record_greeting(greeting.clone()).await.unwrap();
        assert_eq!(store.greetings().unwrap(), vec![greeting]);
    }
}
