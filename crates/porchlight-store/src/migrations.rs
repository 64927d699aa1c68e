use porchlight_core::StoreError;
use rusqlite::{Connection, Transaction};

const CURRENT_SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS arrivals (
    seq                   INTEGER PRIMARY KEY AUTOINCREMENT,
    id                    TEXT NOT NULL UNIQUE,
    date                  TEXT NOT NULL,
    time                  TEXT NOT NULL,
    day                   TEXT NOT NULL,
    confidence            REAL NOT NULL,
    model                 TEXT NOT NULL,
    face_match_confidence REAL,
    timestamp             TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS routine (
    id                 INTEGER PRIMARY KEY CHECK (id = 1),
    last_updated       TEXT NOT NULL,
    window_start       TEXT NOT NULL,
    window_end         TEXT NOT NULL,
    mean_arrival_time  TEXT NOT NULL,
    standard_deviation INTEGER NOT NULL,
    sample_size        INTEGER NOT NULL,
    confidence         REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS greetings (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    message     TEXT NOT NULL,
    timestamp   TEXT NOT NULL,
    time_of_day TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS face_profile (
    id            INTEGER PRIMARY KEY CHECK (id = 1),
    calibrated_at TEXT,
    descriptors   TEXT NOT NULL
);
";

/// Bring the schema up to [`CURRENT_SCHEMA_VERSION`], tracked in `user_version`.
pub(crate) fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(StoreError::backend)?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::Schema(format!(
            "database version ({version}) is newer than supported schema ({CURRENT_SCHEMA_VERSION})"
        )));
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction().map_err(StoreError::backend)?;
    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        apply_migration(&tx, next)?;
        tracing::debug!(version = next, "applied schema migration");
        version = next;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .map_err(StoreError::backend)?;
    tx.commit().map_err(StoreError::backend)?;
    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<(), StoreError> {
    match version {
        1 => tx.execute_batch(SCHEMA_V1).map_err(StoreError::backend),
        other => Err(StoreError::Schema(format!("no migration to version {other}"))),
    }
}
