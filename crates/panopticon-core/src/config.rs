//! Configuration for the Panopticon scanner.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`PANOPTICON__` prefix, `__` as section separator)
//! 2. Config file (`panopticon.toml` or any format the `config` crate reads)
//! 3. Defaults
//!
//! The resulting [`AppConfig`] is built once at startup and handed to the
//! store and orchestrator constructors.

use std::time::Duration;

use serde::Deserialize;

use crate::error::PanopticonError;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    pub database: DatabaseConfig,
    pub maintenance: MaintenanceConfig,
}

/// Scan execution settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Path to the nmap binary.
    pub nmap_path: String,

    /// Network scanned when a request does not name one (CIDR).
    pub target_network: String,

    /// Template used by scheduled scans.
    pub default_template: String,

    /// Packets-per-second ceiling, validated at load. Scans take their
    /// `--max-rate` from the template or the request override instead.
    pub rate_limit: u32,

    /// Directory receiving raw XML snapshots.
    pub output_dir: String,

    /// Snapshot files older than this many days are removed by maintenance.
    pub output_retention_days: u32,

    /// Gzip snapshot files after a successful merge.
    pub compress_output: bool,

    /// Run scans on a fixed interval.
    pub enable_scheduler: bool,

    /// Interval between scheduled scans, in seconds.
    pub frequency_secs: u64,
}

/// Embedded store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file.
    pub path: String,

    /// Rows older than this many days are removed by the retention sweep.
    pub data_retention_days: u32,

    /// Busy timeout applied to every connection, in milliseconds.
    pub busy_timeout_ms: u64,
}

/// Periodic maintenance settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Interval between maintenance passes, in seconds.
    pub interval_secs: u64,
    pub database_backup: bool,
    pub database_optimize: bool,
    pub cleanup_old_data: bool,
    pub cleanup_output_files: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            nmap_path: "nmap".to_string(),
            target_network: "192.168.1.0/24".to_string(),
            default_template: "default".to_string(),
            rate_limit: 1000,
            output_dir: "./data/scans".to_string(),
            output_retention_days: 30,
            compress_output: true,
            enable_scheduler: true,
            frequency_secs: 3600,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./data/panopticon.db".to_string(),
            data_retention_days: 730,
            busy_timeout_ms: 10_000,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 24 * 3600,
            database_backup: true,
            database_optimize: true,
            cleanup_old_data: true,
            cleanup_output_files: true,
        }
    }
}

impl ScannerConfig {
    pub fn frequency(&self) -> Duration {
        Duration::from_secs(self.frequency_secs)
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl AppConfig {
    /// Load configuration from `file_prefix` (any supported extension,
    /// optional) layered under `PANOPTICON__*` environment variables.
    pub fn load(file_prefix: &str) -> Result<Self, PanopticonError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("PANOPTICON")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = cfg.try_deserialize()?;
        app.validate()?;

        tracing::info!(source = %file_prefix, "Configuration loaded");
        Ok(app)
    }

    /// Reject values the scanner cannot operate with.
    pub fn validate(&self) -> Result<(), PanopticonError> {
        if self.scanner.rate_limit == 0 {
            return Err(PanopticonError::Config(
                "scanner.rate_limit must be positive".to_string(),
            ));
        }
        if self.scanner.frequency_secs == 0 {
            return Err(PanopticonError::Config(
                "scanner.frequency_secs must be positive".to_string(),
            ));
        }
        if self.scanner.output_dir.trim().is_empty() {
            return Err(PanopticonError::Config(
                "scanner.output_dir is required".to_string(),
            ));
        }
        if self.database.path.trim().is_empty() {
            return Err(PanopticonError::Config(
                "database.path is required".to_string(),
            ));
        }
        if self.maintenance.interval_secs == 0 {
            return Err(PanopticonError::Config(
                "maintenance.interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.scanner.nmap_path, "nmap");
        assert_eq!(config.scanner.target_network, "192.168.1.0/24");
        assert_eq!(config.scanner.default_template, "default");
        assert_eq!(config.scanner.rate_limit, 1000);
        assert_eq!(config.database.data_retention_days, 730);
        assert_eq!(config.maintenance.interval(), Duration::from_secs(86_400));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let mut config = AppConfig::default();
        config.scanner.rate_limit = 0;
        assert!(matches!(
            config.validate(),
            Err(PanopticonError::Config(msg)) if msg.contains("rate_limit")
        ));
    }

    #[test]
    fn test_validate_rejects_empty_db_path() {
        let mut config = AppConfig::default();
        config.database.path = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panopticon.toml");
        std::fs::write(
            &path,
            r#"
[scanner]
target_network = "10.0.0.0/16"
rate_limit = 250

[database]
data_retention_days = 30
"#,
        )
        .unwrap();

        let prefix = dir.path().join("panopticon");
        let config = AppConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.scanner.target_network, "10.0.0.0/16");
        assert_eq!(config.scanner.rate_limit, 250);
        assert_eq!(config.database.data_retention_days, 30);
        // Untouched values keep their defaults.
        assert_eq!(config.scanner.default_template, "default");
        assert!(config.maintenance.database_backup);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("absent");
        let config = AppConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.scanner.frequency(), Duration::from_secs(3600));
    }
}
