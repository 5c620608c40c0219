//! SQLite connection management and the shared store handle.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, DurationRound, SecondsFormat, TimeDelta, Utc};
use rusqlite::{Connection, ErrorCode};

use panopticon_core::config::DatabaseConfig;

use crate::schema;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{entity} not found with id {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Database operation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Whether the error is a transient busy/locked condition worth retrying.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Thread-safe handle to the embedded inventory database.
///
/// SQLite permits a single writer, so every mutation goes through the
/// `writer` connection behind one mutex and inside one transaction. Reads use
/// a separate connection and never wait on the write lock; under WAL they see
/// the last committed state.
///
/// Share between threads with `Arc<ReconciliationStore>`.
pub struct ReconciliationStore {
    path: PathBuf,
    busy_timeout_ms: u64,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl ReconciliationStore {
    /// Open (or create) the database described by the configuration.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        Self::open_with_timeout(Path::new(&config.path), config.busy_timeout_ms)
    }

    /// Open (or create) a database at a specific path with default settings.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_timeout(path.as_ref(), DatabaseConfig::default().busy_timeout_ms)
    }

    fn open_with_timeout(path: &Path, busy_timeout_ms: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = Connection::open(path)?;
        schema::apply_pragmas(&writer, busy_timeout_ms)?;
        schema::initialize(&writer)?;

        let reader = Connection::open(path)?;
        schema::apply_pragmas(&reader, busy_timeout_ms)?;

        tracing::info!(path = %path.display(), "Inventory database opened");
        Ok(Self {
            path: path.to_path_buf(),
            busy_timeout_ms,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the store-wide write lock.
    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Acquire the read connection. Independent of the write lock.
    pub(crate) fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub(crate) fn busy_timeout_ms(&self) -> u64 {
        self.busy_timeout_ms
    }
}

// ── Timestamp encoding ────────────────────────────────────────────
//
// Timestamps are stored as fixed-width RFC 3339 text so that SQL string
// comparison matches chronological order.

pub(crate) fn encode_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Truncate to the start of the hour. Repeated observations within the same
/// hour therefore write identical `first_seen`/`last_seen` values.
pub(crate) fn truncate_to_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.duration_trunc(TimeDelta::hours(1)).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encoded_timestamps_sort_chronologically() {
        let a = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let b = a + TimeDelta::milliseconds(1);
        let c = a + TimeDelta::days(400);
        assert!(encode_ts(a) < encode_ts(b));
        assert!(encode_ts(b) < encode_ts(c));
        assert_eq!(encode_ts(a).len(), encode_ts(c).len());
    }

    #[test]
    fn decode_round_trips() {
        let a = Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(decode_ts(0, &encode_ts(a)).unwrap(), a);
        assert!(decode_ts(0, "yesterday").is_err());
    }

    #[test]
    fn truncates_to_hour() {
        let a = Utc.with_ymd_and_hms(2026, 5, 6, 7, 59, 59).unwrap();
        assert_eq!(
            truncate_to_hour(a),
            Utc.with_ymd_and_hms(2026, 5, 6, 7, 0, 0).unwrap()
        );
    }

    #[test]
    fn busy_errors_are_classified() {
        let busy = StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        ));
        assert!(busy.is_busy());

        let constraint = StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        ));
        assert!(!constraint.is_busy());
        assert!(!StoreError::LockPoisoned.is_busy());
    }
}
