//! Housekeeping for nmap report files.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::process::Command;
use walkdir::WalkDir;

/// Compress a report in place with `gzip`, returning the compressed path.
pub async fn compress_file(path: &Path) -> std::io::Result<PathBuf> {
    tracing::debug!(file = %path.display(), "Compressing scan output file");

    let status = Command::new("gzip").arg("-f").arg(path).status().await?;
    if !status.success() {
        return Err(std::io::Error::other(format!(
            "gzip exited with {status} for {}",
            path.display()
        )));
    }

    let mut compressed = path.as_os_str().to_owned();
    compressed.push(".gz");
    Ok(PathBuf::from(compressed))
}

/// Remove report files under `dir` older than `retention_days`.
///
/// A retention of zero keeps everything. Returns the number of files removed.
pub fn clean_output_files(dir: &Path, retention_days: u32) -> usize {
    if retention_days == 0 {
        return 0;
    }
    let age = Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
    let cutoff = SystemTime::now()
        .checked_sub(age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    remove_files_older_than(dir, cutoff)
}

/// Recursively remove regular files whose modification time precedes `cutoff`.
///
/// Entries that cannot be read are logged and skipped; the sweep continues.
pub fn remove_files_older_than(dir: &Path, cutoff: SystemTime) -> usize {
    if !dir.exists() {
        return 0;
    }

    let mut removed = 0;
    for entry in WalkDir::new(dir) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable entry in output directory");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let modified = match entry.metadata() {
            Ok(meta) => meta.modified(),
            Err(e) => Err(e.into()),
        };
        match modified {
            Ok(modified) if modified >= cutoff => continue,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Cannot read modification time");
                continue;
            }
        }

        tracing::debug!(file = %path.display(), "Removing old scan output file");
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "Failed to remove old scan file")
            }
        }
    }

    if removed > 0 {
        tracing::info!(dir = %dir.display(), removed, "Cleaned old scan output files");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn touch(path: &Path, modified: SystemTime) {
        let file = File::create(path).unwrap();
        file.set_modified(modified).unwrap();
    }

    #[test]
    fn removes_only_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("archive");
        std::fs::create_dir(&nested).unwrap();

        let now = SystemTime::now();
        let old = now - Duration::from_secs(40 * 24 * 3600);
        touch(&dir.path().join("scan_old.xml.gz"), old);
        touch(&nested.join("scan_older.xml"), old);
        touch(&dir.path().join("scan_new.xml"), now);

        let removed = clean_output_files(dir.path(), 30);
        assert_eq!(removed, 2);
        assert!(dir.path().join("scan_new.xml").exists());
        assert!(!dir.path().join("scan_old.xml.gz").exists());
        assert!(nested.exists());
    }

    #[test]
    fn zero_retention_and_missing_dir_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.xml"), SystemTime::UNIX_EPOCH);
        assert_eq!(clean_output_files(dir.path(), 0), 0);
        assert_eq!(clean_output_files(&dir.path().join("missing"), 30), 0);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subdirectory_does_not_stop_sweep() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        let old = SystemTime::now() - Duration::from_secs(90 * 24 * 3600);
        touch(&locked.join("scan_hidden.xml"), old);
        touch(&dir.path().join("scan_a.xml"), old);
        touch(&dir.path().join("scan_b.xml.gz"), old);
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        let removed = clean_output_files(dir.path(), 30);

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        // Privileged users can still read the locked directory.
        assert!(removed >= 2);
        assert!(!dir.path().join("scan_a.xml").exists());
        assert!(!dir.path().join("scan_b.xml.gz").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn compresses_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("scan_x.xml");
        std::fs::write(&report, "<nmaprun/>").unwrap();

        let compressed = compress_file(&report).await.unwrap();
        assert_eq!(compressed, dir.path().join("scan_x.xml.gz"));
        assert!(compressed.exists());
        assert!(!report.exists());
    }
}
