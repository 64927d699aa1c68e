//! Routine inference over the arrival log.
//!
//! Arrival times are reduced to minutes since midnight and summarized with a
//! plain arithmetic mean and population standard deviation. The statistics are
//! linear, not circular: arrivals on both sides of midnight (23:50 and 00:10)
//! average to around noon. That is a known limitation and is kept as is.

use crate::clock::{Clock, SystemClock};
use crate::store::{ArrivalStore, StoreError};
use crate::types::{Arrival, NextArrival, Routine, TimeOfDay};
use chrono::{DateTime, Local, Weekday};
use std::sync::Arc;
use thiserror::Error;

/// Minimum arrivals for the global routine.
pub const MIN_ROUTINE_SAMPLES: usize = 3;
/// Minimum arrivals for a single weekday's routine.
pub const MIN_DAY_SAMPLES: usize = 2;

const CONFIDENCE_FLOOR: f64 = 0.3;
const CONFIDENCE_CEILING: f64 = 1.0;
/// Spread (minutes) at which confidence would reach zero before the floor applies.
const CONFIDENCE_SPREAD_MINUTES: f64 = 120.0;

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Error, Debug)]
pub enum RoutineError {
    /// Not fatal: there is simply no routine to infer yet.
    #[error("not enough arrival data for routine analysis: have {found}, need {required}")]
    NotEnoughData { found: usize, required: usize },
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl RoutineError {
    pub fn is_not_enough_data(&self) -> bool {
        matches!(self, Self::NotEnoughData { .. })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by n). Zero below two samples.
fn population_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Confidence for a given spread in minutes: `1 - σ/120` clamped to
/// [0.3, 1.0], rounded to two decimals. Non-increasing in `std_dev`.
pub fn confidence_for_spread(std_dev: f64) -> f64 {
    let raw = (1.0 - std_dev / CONFIDENCE_SPREAD_MINUTES).clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEILING);
    round_to(raw, 2)
}

/// Summarize `arrivals` into a routine stamped `updated_at`.
///
/// Returns `None` when fewer than `min_samples` arrivals are given. Pure: the
/// caller decides whether the result is persisted.
pub fn analyze<'a, I>(arrivals: I, min_samples: usize, updated_at: DateTime<Local>) -> Option<Routine>
where
    I: IntoIterator<Item = &'a Arrival>,
{
    let minutes: Vec<f64> = arrivals
        .into_iter()
        .map(|a| f64::from(a.time.minutes()))
        .collect();

    if minutes.len() < min_samples || minutes.is_empty() {
        return None;
    }

    let mu = mean(&minutes);
    let sigma = population_std_dev(&minutes, mu);

    Some(Routine {
        last_updated: updated_at,
        window_start: TimeOfDay::from_minutes_clamped(mu - sigma),
        window_end: TimeOfDay::from_minutes_clamped(mu + sigma),
        mean_arrival_time: TimeOfDay::from_minutes_clamped(mu),
        standard_deviation: sigma.round() as u32,
        sample_size: minutes.len(),
        confidence: confidence_for_spread(sigma),
    })
}

/// Hours from `now` until `routine`'s mean arrival, rolled to tomorrow when
/// already past, rounded to one decimal.
pub fn next_arrival_after(routine: &Routine, now: TimeOfDay) -> NextArrival {
    let mean = f64::from(routine.mean_arrival_time.minutes());
    let mut hours_away = (mean - f64::from(now.minutes())) / 60.0;
    if hours_away < 0.0 {
        hours_away += 24.0;
    }
    NextArrival {
        time: routine.mean_arrival_time,
        hours_away: round_to(hours_away, 1),
    }
}

/// Owns the current routine and keeps it in step with the arrival log.
///
/// The engine is the only writer of the persisted routine. It reads the log
/// but never modifies it, except through [`reset`](Self::reset).
pub struct RoutineEngine<S, C = SystemClock> {
    store: Arc<S>,
    clock: C,
    current: Option<Routine>,
}

impl<S: ArrivalStore, C: Clock> RoutineEngine<S, C> {
    /// Open the engine over `store`, picking up any routine persisted earlier.
    pub fn open(store: Arc<S>, clock: C) -> Result<Self, StoreError> {
        let current = store.routine()?;
        if let Some(routine) = &current {
            tracing::debug!(
                mean = %routine.mean_arrival_time,
                samples = routine.sample_size,
                "loaded persisted routine"
            );
        }
        Ok(Self {
            store,
            clock,
            current,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Recompute the global routine from the full arrival log and persist it.
    ///
    /// With fewer than [`MIN_ROUTINE_SAMPLES`] arrivals this returns
    /// [`RoutineError::NotEnoughData`] and leaves the current routine alone.
    pub fn recompute(&mut self) -> Result<Routine, RoutineError> {
        let arrivals = self.store.arrivals()?;
        let Some(routine) = analyze(&arrivals, MIN_ROUTINE_SAMPLES, self.clock.now()) else {
            tracing::info!(
                found = arrivals.len(),
                required = MIN_ROUTINE_SAMPLES,
                "not enough arrival data for routine analysis"
            );
            return Err(RoutineError::NotEnoughData {
                found: arrivals.len(),
                required: MIN_ROUTINE_SAMPLES,
            });
        };

        self.store.save_routine(Some(&routine))?;
        tracing::info!(
            window_start = %routine.window_start,
            window_end = %routine.window_end,
            mean = %routine.mean_arrival_time,
            std_dev = routine.standard_deviation,
            samples = routine.sample_size,
            confidence = routine.confidence,
            "routine recomputed"
        );
        self.current = Some(routine.clone());
        Ok(routine)
    }

    /// Routine for one weekday, computed on every call and never persisted.
    /// `None` below [`MIN_DAY_SAMPLES`] arrivals on that day.
    pub fn analyze_by_day(&self, day: Weekday) -> Result<Option<Routine>, StoreError> {
        let arrivals = self.store.arrivals()?;
        let on_day = arrivals.iter().filter(|a| a.day == day);
        Ok(analyze(on_day, MIN_DAY_SAMPLES, self.clock.now()))
    }

    /// Per-weekday routines, Monday first, for every day with enough data.
    pub fn weekly(&self) -> Result<Vec<(Weekday, Routine)>, StoreError> {
        let arrivals = self.store.arrivals()?;
        let now = self.clock.now();
        Ok(WEEK
            .iter()
            .filter_map(|&day| {
                analyze(arrivals.iter().filter(|a| a.day == day), MIN_DAY_SAMPLES, now)
                    .map(|r| (day, r))
            })
            .collect())
    }

    pub fn current_routine(&self) -> Option<&Routine> {
        self.current.as_ref()
    }

    /// Whether the current local time falls inside the predicted window.
    pub fn is_in_window(&self) -> bool {
        self.is_in_window_at(self.now_of_day())
    }

    pub fn is_in_window_at(&self, time: TimeOfDay) -> bool {
        self.current.as_ref().is_some_and(|r| r.contains(time))
    }

    pub fn next_predicted_arrival(&self) -> Option<NextArrival> {
        self.next_predicted_arrival_at(self.now_of_day())
    }

    pub fn next_predicted_arrival_at(&self, time: TimeOfDay) -> Option<NextArrival> {
        self.current.as_ref().map(|r| next_arrival_after(r, time))
    }

    /// Drop the current routine, keeping the arrival log.
    pub fn clear_routine(&mut self) -> Result<(), StoreError> {
        self.store.save_routine(None)?;
        self.current = None;
        Ok(())
    }

    /// Bulk clear of the whole store, routine included.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.store.clear()?;
        self.current = None;
        tracing::info!("arrival log and routine cleared");
        Ok(())
    }

    fn now_of_day(&self) -> TimeOfDay {
        TimeOfDay::from(self.clock.now().time())
    }
}
