//! Persistence seam for the arrival log and the state derived from it.
//!
//! One store holds the whole persisted record: the append-only arrival log,
//! the current routine, the greeting log and the calibrated face profile.
//! [`MemoryStore`] is the in-process implementation; the SQLite one lives in
//! `porchlight-store`.

use crate::greeting::Greeting;
use crate::profile::FaceProfile;
use crate::types::{Arrival, Routine};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("malformed {what}: {value:?}")]
    Malformed { what: &'static str, value: String },
    #[error("schema error: {0}")]
    Schema(String),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Storage for arrivals, the persisted routine, greetings and the face profile.
///
/// Methods take `&self`; implementations synchronize internally so a store
/// can be shared between the routine engine and the arrival logger.
pub trait ArrivalStore: Send + Sync {
    /// Append one arrival to the end of the log.
    fn append(&self, arrival: &Arrival) -> Result<(), StoreError>;

    /// All arrivals, in insertion order.
    fn arrivals(&self) -> Result<Vec<Arrival>, StoreError>;

    /// Most recently appended arrival.
    fn last_arrival(&self) -> Result<Option<Arrival>, StoreError> {
        Ok(self.arrivals()?.pop())
    }

    /// Bulk clear: arrivals, routine, greetings and face profile.
    fn clear(&self) -> Result<(), StoreError>;

    fn routine(&self) -> Result<Option<Routine>, StoreError>;

    /// Replace the persisted routine wholesale (`None` removes it).
    fn save_routine(&self, routine: Option<&Routine>) -> Result<(), StoreError>;

    fn append_greeting(&self, greeting: &Greeting) -> Result<(), StoreError>;

    fn greetings(&self) -> Result<Vec<Greeting>, StoreError>;

    fn face_profile(&self) -> Result<Option<FaceProfile>, StoreError>;

    fn save_face_profile(&self, profile: &FaceProfile) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryState {
    arrivals: Vec<Arrival>,
    routine: Option<Routine>,
    greetings: Vec<Greeting>,
    profile: Option<FaceProfile>,
}

/// In-memory store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with an existing arrival log.
    pub fn with_arrivals(arrivals: Vec<Arrival>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                arrivals,
                ..MemoryState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ArrivalStore for MemoryStore {
    fn append(&self, arrival: &Arrival) -> Result<(), StoreError> {
        self.lock().arrivals.push(arrival.clone());
        Ok(())
    }

    fn arrivals(&self) -> Result<Vec<Arrival>, StoreError> {
        Ok(self.lock().arrivals.clone())
    }

    fn last_arrival(&self) -> Result<Option<Arrival>, StoreError> {
        Ok(self.lock().arrivals.last().cloned())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.lock() = MemoryState::default();
        Ok(())
    }

    fn routine(&self) -> Result<Option<Routine>, StoreError> {
        Ok(self.lock().routine.clone())
    }

    fn save_routine(&self, routine: Option<&Routine>) -> Result<(), StoreError> {
        self.lock().routine = routine.cloned();
        Ok(())
    }

    fn append_greeting(&self, greeting: &Greeting) -> Result<(), StoreError> {
        self.lock().greetings.push(greeting.clone());
        Ok(())
    }

    fn greetings(&self) -> Result<Vec<Greeting>, StoreError> {
        Ok(self.lock().greetings.clone())
    }

    fn face_profile(&self) -> Result<Option<FaceProfile>, StoreError> {
        Ok(self.lock().profile.clone())
    }

    fn save_face_profile(&self, profile: &FaceProfile) -> Result<(), StoreError> {
        self.lock().profile = Some(profile.clone());
        Ok(())
    }
}
