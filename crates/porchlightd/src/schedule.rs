//! Nightly routine recompute: one delay to the next run time, then every 24 h.

use crate::engine::{nightly_recompute, EngineHandle};
use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleState {
    /// The one-shot delay to the first run is pending.
    WaitingForFirstRun,
    /// The first run happened; the daily interval is pending.
    RecurringDaily,
    Disposed,
}

/// Time from `now` until the next occurrence of `run_at`. Exactly at `run_at`
/// the delay is zero; once past it, the run moves to tomorrow.
pub fn delay_until_next_run(now: NaiveDateTime, run_at: NaiveTime) -> Duration {
    let mut next = now.date().and_time(run_at);
    if next < now {
        next += TimeDelta::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// A running schedule. Dropping it cancels any pending run.
pub struct NightlySchedule {
    task: JoinHandle<()>,
    state: Arc<watch::Sender<ScheduleState>>,
}

impl NightlySchedule {
    /// Run `job` at the next `run_at` local time and every 24 h after.
    pub fn nightly<F, Fut>(now: NaiveDateTime, run_at: NaiveTime, job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = delay_until_next_run(now, run_at);
        tracing::info!(
            run_at = %run_at.format("%H:%M"),
            delay_secs = delay.as_secs(),
            "nightly recompute scheduled"
        );
        Self::start(delay, DAY, job)
    }

    /// Recompute the routine on `engine` at the next `run_at`, then daily.
    pub fn routine_recompute(now: NaiveDateTime, run_at: NaiveTime, engine: EngineHandle) -> Self {
        Self::nightly(now, run_at, move || {
            let engine = engine.clone();
            async move {
                nightly_recompute(engine).await;
            }
        })
    }

    /// Run `job` once after `first_delay`, then every `period`.
    pub fn start<F, Fut>(first_delay: Duration, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::new(watch::Sender::new(ScheduleState::WaitingForFirstRun));
        let task_state = state.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(first_delay).await;
            job().await;
            task_state.send_replace(ScheduleState::RecurringDaily);

            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                job().await;
            }
        });

        Self { task, state }
    }

    pub fn state(&self) -> ScheduleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScheduleState> {
        self.state.subscribe()
    }

    /// Cancel whichever timer is pending. Further calls are no-ops.
    pub fn dispose(&self) {
        self.task.abort();
        if self.state.send_replace(ScheduleState::Disposed) != ScheduleState::Disposed {
            tracing::info!("nightly schedule disposed");
        }
    }
}

impl Drop for NightlySchedule {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{spawn_engine, EngineSettings};
    use chrono::{Local, NaiveDate, TimeZone};
    use porchlight_core::{Arrival, DetectionPolicy, DistanceMatcher, ManualClock, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 27).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn two_am() -> NaiveTime {
        NaiveTime::from_hms_opt(2, 0, 0).unwrap()
    }

    fn counting_job() -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<()> + Send + 'static) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let job = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        };
        (runs, job)
    }

    #[test]
    fn test_delay_before_run_time_is_today() {
        assert_eq!(delay_until_next_run(dt(1, 0), two_am()), Duration::from_secs(3600));
    }

    #[test]
    fn test_delay_after_run_time_is_tomorrow() {
        assert_eq!(delay_until_next_run(dt(3, 0), two_am()), Duration::from_secs(23 * 3600));
    }

    #[test]
    fn test_delay_exactly_at_run_time_is_zero() {
        assert_eq!(delay_until_next_run(dt(2, 0), two_am()), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_then_daily() {
        let (runs, job) = counting_job();
        let schedule = NightlySchedule::start(Duration::from_secs(3600), DAY, job);
        assert_eq!(schedule.state(), ScheduleState::WaitingForFirstRun);

        tokio::time::sleep(Duration::from_secs(3599)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(schedule.state(), ScheduleState::RecurringDaily);

        tokio::time::sleep(DAY).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        tokio::time::sleep(DAY).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_fires_immediately() {
        let (runs, job) = counting_job();
        let _schedule = NightlySchedule::start(Duration::ZERO, DAY, job);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_before_first_run() {
        let (runs, job) = counting_job();
        let schedule = NightlySchedule::start(Duration::from_secs(60), DAY, job);
        schedule.dispose();
        assert_eq!(schedule.state(), ScheduleState::Disposed);

        tokio::time::sleep(DAY * 2).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_while_recurring() {
        let (runs, job) = counting_job();
        let schedule = NightlySchedule::start(Duration::ZERO, DAY, job);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(schedule.state(), ScheduleState::RecurringDaily);

        schedule.dispose();
        schedule.dispose();
        tokio::time::sleep(DAY * 3).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (runs, job) = counting_job();
        drop(NightlySchedule::start(Duration::from_secs(5), DAY, job));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    fn engine_over(arrivals: Vec<Arrival>) -> EngineHandle {
        let store = Arc::new(MemoryStore::with_arrivals(arrivals));
        let clock = ManualClock::new(Local.with_ymd_and_hms(2025, 1, 27, 2, 0, 0).unwrap());
        let settings = EngineSettings {
            detector: "coco-ssd".into(),
            policy: DetectionPolicy::default(),
            matcher: DistanceMatcher::default(),
            recompute_on_arrival: false,
        };
        spawn_engine(store, clock, settings).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_routine_recompute_runs_at_night() {
        let arrivals = [24, 25, 26]
            .into_iter()
            .map(|d| Arrival::new(Local.with_ymd_and_hms(2025, 1, d, 17, 30, 0).unwrap(), 0.9, "coco-ssd", None))
            .collect();
        let engine = engine_over(arrivals);
        let schedule = NightlySchedule::routine_recompute(dt(1, 0), two_am(), engine.clone());

        tokio::time::sleep(Duration::from_secs(3601)).await;
        let mut state = schedule.subscribe();
        state.wait_for(|s| *s == ScheduleState::RecurringDaily).await.unwrap();
        let routine = engine.current_routine().await.unwrap().unwrap();
        assert_eq!(routine.mean_arrival_time.to_string(), "17:30");
    }

    #[tokio::test(start_paused = true)]
    async fn test_routine_recompute_tolerates_empty_log() {
        let engine = engine_over(Vec::new());
        let schedule = NightlySchedule::routine_recompute(dt(2, 0), two_am(), engine.clone());

        let mut state = schedule.subscribe();
        state.wait_for(|s| *s == ScheduleState::RecurringDaily).await.unwrap();
        tokio::time::sleep(DAY + Duration::from_secs(1)).await;
        assert_eq!(schedule.state(), ScheduleState::RecurringDaily);
        assert!(engine.current_routine().await.unwrap().is_none());
    }
}
