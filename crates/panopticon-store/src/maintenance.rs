//! Retention, backup and compaction.
//!
//! These hold the store-wide write lock for their whole duration. They are
//! meant for a low-frequency schedule, not per scan.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{params, TransactionBehavior};

use crate::client::{encode_ts, ReconciliationStore, Result};
use crate::schema;

impl ReconciliationStore {
    /// Delete history older than `retention_days` and return the number of
    /// rows removed.
    ///
    /// Changes and scans go by their timestamp, devices by `last_seen` (their
    /// ports and remaining changes cascade), logs by timestamp.
    pub fn clean_old_data(&self, retention_days: u32) -> Result<u64> {
        self.clean_old_data_at(retention_days, Utc::now())
    }

    /// [`ReconciliationStore::clean_old_data`] relative to `now`.
    ///
    /// A retention window reaching past the representable date range keeps
    /// everything.
    pub fn clean_old_data_at(&self, retention_days: u32, now: DateTime<Utc>) -> Result<u64> {
        let Some(cutoff) = TimeDelta::try_days(i64::from(retention_days))
            .and_then(|window| now.checked_sub_signed(window))
        else {
            tracing::info!(
                retention_days,
                "Retention window exceeds date range, nothing to clean"
            );
            return Ok(0);
        };
        let cutoff = encode_ts(cutoff);

        let mut conn = self.writer()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changes = tx.execute("DELETE FROM changes WHERE timestamp < ?1", params![cutoff])?;
        let scans = tx.execute("DELETE FROM scans WHERE timestamp < ?1", params![cutoff])?;
        let devices = tx.execute("DELETE FROM devices WHERE last_seen < ?1", params![cutoff])?;
        let logs = tx.execute("DELETE FROM logs WHERE timestamp < ?1", params![cutoff])?;

        tx.commit()?;

        let total = (changes + scans + devices + logs) as u64;
        tracing::info!(
            retention_days,
            changes,
            scans,
            devices,
            logs,
            total,
            "Cleaned old data"
        );
        Ok(total)
    }

    /// Write a consistent copy of the database to
    /// `<db dir>/backups/<stem>_<YYYYmmdd_HHMMSS><ext>` and return its path.
    pub fn backup_database(&self) -> Result<PathBuf> {
        let conn = self.writer()?;

        let backup_dir = self
            .path()
            .parent()
            .map(|p| p.join("backups"))
            .unwrap_or_else(|| PathBuf::from("backups"));
        std::fs::create_dir_all(&backup_dir)?;
        let backup_path = backup_file_path(&backup_dir, self.path(), Utc::now());

        if let Err(e) = conn.query_row("PRAGMA wal_checkpoint(FULL)", [], |_| Ok(())) {
            tracing::warn!(error = %e, "Failed to checkpoint WAL before backup");
        }

        let target = backup_path.to_string_lossy().into_owned();
        if let Err(vacuum_err) = conn.execute("VACUUM INTO ?1", params![target]) {
            std::fs::copy(self.path(), &backup_path)?;
            tracing::warn!(
                error = %vacuum_err,
                "VACUUM INTO failed, used file copy backup instead"
            );
        }

        tracing::info!(path = %backup_path.display(), "Database backup created");
        Ok(backup_path)
    }

    /// Reclaim free space, rebuild indexes and refresh planner statistics.
    pub fn optimize_database(&self) -> Result<()> {
        let conn = self.writer()?;
        tracing::info!("Optimizing database");

        conn.execute_batch("VACUUM; REINDEX; ANALYZE;")?;

        if let Err(e) = schema::apply_pragmas(&conn, self.busy_timeout_ms()) {
            tracing::warn!(error = %e, "Failed to reapply pragmas after vacuum");
        }
        Ok(())
    }
}

/// Timestamped backup file name, suffixed with `_N` if a backup was
/// already taken within the same second.
fn backup_file_path(dir: &Path, db_path: &Path, now: DateTime<Utc>) -> PathBuf {
    let file_name = db_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "database".to_string());
    let (stem, ext) = match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name.split_at(idx),
        _ => (file_name.as_str(), ""),
    };
    let stamp = now.format("%Y%m%d_%H%M%S");

    let mut candidate = dir.join(format!("{stem}_{stamp}{ext}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}_{stamp}_{n}{ext}"));
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn backup_name_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let path = backup_file_path(dir.path(), Path::new("/data/panopticon.db"), now);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "panopticon_20260304_050607.db"
        );

        let bare = backup_file_path(dir.path(), Path::new("/data/inventory"), now);
        assert_eq!(
            bare.file_name().unwrap().to_str().unwrap(),
            "inventory_20260304_050607"
        );
    }

    #[test]
    fn huge_retention_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReconciliationStore::open_path(dir.path().join("inv.db")).unwrap();
        let ancient = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();
        store
            .add_log_entry_at("info", "ancient", "test", ancient)
            .unwrap();

        assert_eq!(store.clean_old_data(100_000_000).unwrap(), 0);
        assert_eq!(store.clean_old_data(u32::MAX).unwrap(), 0);
        assert_eq!(store.get_log_entries(10, None, None).unwrap().len(), 1);
    }

    #[test]
    fn backup_name_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let first = backup_file_path(dir.path(), Path::new("inv.db"), now);
        std::fs::write(&first, b"x").unwrap();
        let second = backup_file_path(dir.path(), Path::new("inv.db"), now);
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("_1.db"));
    }
}
