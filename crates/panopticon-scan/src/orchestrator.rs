//! Single-flight scan orchestration.
//!
//! A scan moves `idle → running → {completed, error}`. Only one scan runs at a
//! time; a second request while one is in flight is rejected with
//! [`ScanError::AlreadyRunning`] before anything touches the store. The
//! in-memory [`ScanStats`] live behind their own mutex so status reads never
//! wait on the database.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use panopticon_core::config::ScannerConfig;
use panopticon_core::{Scan, ScanId, ScanParameters, ScanStatus, ScanTemplate};
use panopticon_store::ReconciliationStore;

use crate::error::{Result, ScanError};
use crate::output;
use crate::runner::{RunOutcome, ScanKind, ScanRequest, ScanRunner};
use crate::snapshot::{self, IngestCounts};
use crate::store_task::with_store;
use crate::templates;

/// Lifecycle of the most recent scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Idle,
    Running,
    Completed,
    Error,
}

/// Snapshot of the orchestrator's view of the current or last scan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub scan_id: Option<ScanId>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ScanState,
    pub devices_found: u32,
    pub ports_found: u32,
    pub error: Option<String>,
}

impl Default for ScanStats {
    fn default() -> Self {
        Self {
            scan_id: None,
            start_time: None,
            end_time: None,
            status: ScanState::Idle,
            devices_found: 0,
            ports_found: 0,
            error: None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    running: bool,
    stats: ScanStats,
}

fn lock(state: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the running flag however the scan ends, including cancellation.
struct RunGuard<'a> {
    state: &'a Mutex<Inner>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut inner = lock(self.state);
        inner.running = false;
        inner.stats.end_time = Some(Utc::now());
    }
}

/// Result of the runner and ingestion phase.
struct Collected {
    counts: IngestCounts,
    snapshot: Option<PathBuf>,
}

pub struct ScanOrchestrator {
    config: ScannerConfig,
    store: Arc<ReconciliationStore>,
    runner: Arc<dyn ScanRunner>,
    state: Mutex<Inner>,
}

impl ScanOrchestrator {
    pub fn new(
        config: ScannerConfig,
        store: Arc<ReconciliationStore>,
        runner: Arc<dyn ScanRunner>,
    ) -> Self {
        Self {
            config,
            store,
            runner,
            state: Mutex::new(Inner::default()),
        }
    }

    /// Run a scan with a template and no overrides.
    pub async fn run_scan(&self, template: &str) -> Result<ScanId> {
        self.execute(ScanKind::Scheduled, ScanParameters::for_template(template))
            .await
    }

    /// Run a scan with caller-supplied overrides.
    pub async fn run_manual_scan(&self, params: ScanParameters) -> Result<ScanId> {
        self.execute(ScanKind::Manual, params).await
    }

    pub fn get_status(&self) -> ScanStats {
        lock(&self.state).stats.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub async fn get_scan(&self, id: ScanId) -> Result<Option<Scan>> {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || store.get_scan(id)).await??)
    }

    pub async fn get_recent_scans(&self, limit: usize) -> Result<Vec<Scan>> {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || store.get_recent_scans(limit)).await??)
    }

    pub fn get_scan_templates(&self) -> Vec<ScanTemplate> {
        templates::builtin_templates()
    }

    fn begin(&self) -> Result<RunGuard<'_>> {
        let mut inner = lock(&self.state);
        if inner.running {
            return Err(ScanError::AlreadyRunning);
        }
        inner.running = true;
        inner.stats = ScanStats {
            status: ScanState::Running,
            start_time: Some(Utc::now()),
            ..ScanStats::default()
        };
        Ok(RunGuard { state: &self.state })
    }

    async fn execute(&self, kind: ScanKind, params: ScanParameters) -> Result<ScanId> {
        let _guard = self.begin()?;
        let started = Instant::now();

        let template = params.template.clone();
        let created = with_store(&self.store, move |s| s.create_scan(&template)).await;
        let scan_id = match created {
            Ok(id) => id,
            Err(e) => {
                self.record_error(&e);
                return Err(e);
            }
        };
        lock(&self.state).stats.scan_id = Some(scan_id);

        tracing::info!(scan_id = %scan_id, template = %params.template, kind = ?kind, "Starting scan");

        let collected = match self.collect(kind, &params, scan_id).await {
            Ok(c) => c,
            Err(e) => {
                self.fail(scan_id, &e, started).await;
                return Err(e);
            }
        };

        let IngestCounts { devices, ports } = collected.counts;
        let elapsed = started.elapsed();
        let finalized = with_store(&self.store, move |s| {
            s.update_scan(scan_id, ScanStatus::Completed, devices, ports, elapsed, None)
        })
        .await;
        if let Err(e) = finalized {
            tracing::error!(scan_id = %scan_id, error = %e, "Failed to finalize scan record");
            self.record_error(&e);
            return Err(e);
        }
        self.persist_log(
            "info",
            format!("Scan #{scan_id} completed: {devices} devices, {ports} ports"),
        )
        .await;

        {
            let mut inner = lock(&self.state);
            inner.stats.status = ScanState::Completed;
            inner.stats.devices_found = devices;
            inner.stats.ports_found = ports;
        }

        tracing::info!(
            scan_id = %scan_id,
            devices,
            ports,
            duration_ms = elapsed.as_millis() as u64,
            "Scan complete"
        );

        if self.config.compress_output {
            if let Some(path) = collected.snapshot {
                if let Err(e) = output::compress_file(&path).await {
                    tracing::error!(file = %path.display(), error = %e, "Failed to compress scan output");
                }
            }
        }

        Ok(scan_id)
    }

    async fn collect(
        &self,
        kind: ScanKind,
        params: &ScanParameters,
        scan_id: ScanId,
    ) -> Result<Collected> {
        let template = templates::resolve_template(&params.template);
        let output_dir = PathBuf::from(&self.config.output_dir);
        let output_path = output_dir.join(format!("scan_{}.xml", Uuid::new_v4()));
        let args = templates::build_args(
            &template,
            params,
            &self.config.target_network,
            &output_path,
        )?;
        tokio::fs::create_dir_all(&output_dir).await?;

        let request = ScanRequest {
            kind,
            args,
            output_path,
        };

        match self.runner.run(&request).await? {
            RunOutcome::Snapshot(path) => {
                let store = self.store.clone();
                let report = path.clone();
                let counts = tokio::task::spawn_blocking(move || {
                    snapshot::ingest_snapshot(&store, &report, Some(scan_id))
                })
                .await??;
                Ok(Collected {
                    counts,
                    snapshot: Some(path),
                })
            }
            RunOutcome::Synthetic { devices, ports } => Ok(Collected {
                counts: IngestCounts { devices, ports },
                snapshot: None,
            }),
        }
    }

    fn record_error(&self, error: &ScanError) {
        let mut inner = lock(&self.state);
        inner.stats.status = ScanState::Error;
        inner.stats.error = Some(error.to_string());
    }

    async fn fail(&self, scan_id: ScanId, error: &ScanError, started: Instant) {
        tracing::error!(scan_id = %scan_id, error = %error, "Scan failed");
        self.record_error(error);

        let message = error.to_string();
        let elapsed = started.elapsed();
        let recorded = {
            let message = message.clone();
            with_store(&self.store, move |s| {
                s.update_scan(scan_id, ScanStatus::Error, 0, 0, elapsed, Some(message.as_str()))
            })
            .await
        };
        if let Err(e) = recorded {
            tracing::error!(scan_id = %scan_id, error = %e, "Failed to record scan failure");
        }
        self.persist_log("error", format!("Scan #{scan_id} failed: {message}"))
            .await;
    }

    /// Best-effort copy of a scan event into the persisted log.
    async fn persist_log(&self, level: &'static str, message: String) {
        let written =
            with_store(&self.store, move |s| s.add_log_entry(level, &message, "scanner")).await;
        if let Err(e) = written {
            tracing::warn!(error = %e, "Failed to persist scan log entry");
        }
    }
}
