//! porchlight-core: Arrival log, routine inference and greeting logic.
//!
//! Turns logged arrivals into a predicted arrival window, answers
//! "is the user due now?" and decides when a greeting should play. Vision,
//! speech and storage backends sit behind the seams defined here.

pub mod clock;
pub mod greeting;
pub mod logger;
pub mod profile;
pub mod routine;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use greeting::{DayPeriod, Greeting, GreetingTrigger};
pub use logger::{ArrivalLogger, ArrivalStats, Detection, DetectionPolicy};
pub use profile::{DistanceMatcher, FaceProfile, Matcher};
pub use routine::{RoutineEngine, RoutineError};
pub use store::{ArrivalStore, MemoryStore, StoreError};
pub use types::{Arrival, NextArrival, Routine, TimeOfDay};
