//! porchlight-store: SQLite persistence for the arrival log.
//!
//! Implements [`porchlight_core::ArrivalStore`] on a single SQLite file holding
//! arrivals, the current routine, the greeting log and the face profile.

mod migrations;
pub mod sqlite;

pub use sqlite::SqliteStore;

use std::path::PathBuf;

/// Default database location: `$XDG_DATA_HOME/porchlight/porchlight.db`,
/// falling back to `~/.local/share`.
pub fn default_db_path() -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("porchlight");
    data_dir.join("porchlight.db")
}

/// Database path from `PORCHLIGHT_DB_PATH`, or [`default_db_path`].
pub fn db_path_from_env() -> PathBuf {
    std::env::var("PORCHLIGHT_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_db_path())
}
