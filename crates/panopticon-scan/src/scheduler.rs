//! Periodic scan and maintenance loops.
//!
//! Two tokio tasks run side by side: a scan loop that triggers the default
//! template every `scanner.frequency_secs`, and a maintenance loop that runs
//! retention, output cleanup, backup and optimize every
//! `maintenance.interval_secs`. Both stop when the shutdown channel fires.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};

use panopticon_core::AppConfig;
use panopticon_store::ReconciliationStore;

use crate::error::ScanError;
use crate::orchestrator::ScanOrchestrator;
use crate::output;
use crate::store_task::with_store;

pub struct MaintenanceScheduler {
    config: Arc<AppConfig>,
    orchestrator: Arc<ScanOrchestrator>,
    store: Arc<ReconciliationStore>,
}

impl MaintenanceScheduler {
    pub fn new(
        config: Arc<AppConfig>,
        orchestrator: Arc<ScanOrchestrator>,
        store: Arc<ReconciliationStore>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            store,
        }
    }

    /// Run both loops until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::new();

        if self.config.scanner.enable_scheduler {
            let orchestrator = self.orchestrator.clone();
            let template = self.config.scanner.default_template.clone();
            let period = self.config.scanner.frequency();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                run_scan_loop(orchestrator, template, period, shutdown).await;
            }));
        } else {
            tracing::info!("Scheduled scanning disabled");
        }

        let config = self.config.clone();
        let store = self.store.clone();
        handles.push(tokio::spawn(async move {
            run_maintenance_loop(config, store, shutdown).await;
        }));

        tracing::info!(tasks = handles.len(), "Scheduler started");

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler task panicked");
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// One maintenance pass, outside the timer.
    pub async fn run_maintenance(&self) {
        run_maintenance_pass(&self.config, &self.store).await;
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Scheduled scans; the first tick fires immediately.
async fn run_scan_loop(
    orchestrator: Arc<ScanOrchestrator>,
    template: String,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stopped(&mut shutdown) => return,
        }

        tracing::info!(template = %template, "Scheduled scan triggered");

        // An in-flight scan runs to completion so its row is finalized.
        match orchestrator.run_scan(&template).await {
            Ok(scan_id) => tracing::info!(scan_id = %scan_id, "Scheduled scan finished"),
            Err(ScanError::AlreadyRunning) => {
                tracing::info!("Scan already in progress, skipping scheduled run")
            }
            Err(e) => tracing::error!(error = %e, "Scheduled scan failed"),
        }
    }
}

/// Maintenance every interval; nothing runs at startup.
async fn run_maintenance_loop(
    config: Arc<AppConfig>,
    store: Arc<ReconciliationStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = config.maintenance.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stopped(&mut shutdown) => return,
        }
        run_maintenance_pass(&config, &store).await;
    }
}

async fn run_maintenance_pass(config: &AppConfig, store: &Arc<ReconciliationStore>) {
    tracing::info!("Running maintenance tasks");
    let tasks = &config.maintenance;

    if tasks.cleanup_old_data {
        let days = config.database.data_retention_days;
        match with_store(store, move |s| s.clean_old_data(days)).await {
            Ok(removed) => tracing::info!(removed, retention_days = days, "Old data cleaned"),
            Err(e) => tracing::error!(error = %e, "Failed to clean old data"),
        }
    }

    if tasks.cleanup_output_files {
        let dir = PathBuf::from(&config.scanner.output_dir);
        let days = config.scanner.output_retention_days;
        let cleaned =
            tokio::task::spawn_blocking(move || output::clean_output_files(&dir, days)).await;
        match cleaned {
            Ok(removed) => tracing::debug!(removed, "Output directory swept"),
            Err(e) => tracing::error!(error = %e, "Output cleanup task failed"),
        }
    }

    if tasks.database_backup {
        match with_store(store, |s| s.backup_database()).await {
            Ok(path) => tracing::info!(backup = %path.display(), "Database backed up"),
            Err(e) => tracing::error!(error = %e, "Failed to backup database"),
        }
    }

    if tasks.database_optimize {
        match with_store(store, |s| s.optimize_database()).await {
            Ok(()) => tracing::info!("Database optimized"),
            Err(e) => tracing::error!(error = %e, "Failed to optimize database"),
        }
    }

    tracing::info!("Maintenance tasks completed");
}

#[cfg(test)]
mod tests {
    use super::*;

    use panopticon_core::HostObservation;

    use crate::runner::MockRunner;

    fn setup(
        dir: &tempfile::TempDir,
        enable_scheduler: bool,
    ) -> (MaintenanceScheduler, Arc<ReconciliationStore>) {
        let mut config = AppConfig::default();
        config.scanner.enable_scheduler = enable_scheduler;
        config.scanner.frequency_secs = 3600;
        config.scanner.output_dir = dir.path().join("scans").to_string_lossy().into_owned();
        config.database.path = dir.path().join("inv.db").to_string_lossy().into_owned();
        let config = Arc::new(config);

        let store = Arc::new(ReconciliationStore::open(&config.database).unwrap());
        let orchestrator = Arc::new(ScanOrchestrator::new(
            config.scanner.clone(),
            store.clone(),
            Arc::new(MockRunner::new(Duration::ZERO)),
        ));
        (
            MaintenanceScheduler::new(config, orchestrator, store.clone()),
            store,
        )
    }

    #[tokio::test]
    async fn scan_loop_runs_immediately_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, store) = setup(&dir, true);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { scheduler.run(rx).await });

        let mut scans = Vec::new();
        for _ in 0..200 {
            scans = store.get_recent_scans(10).unwrap();
            if scans
                .iter()
                .any(|s| s.status == panopticon_core::ScanStatus::Completed)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].template, "default");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn disabled_scheduler_does_not_scan() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, store) = setup(&dir, false);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { scheduler.run(rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(store.get_recent_scans(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn maintenance_pass_backs_up_and_keeps_recent_data() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, store) = setup(&dir, false);
        store
            .upsert_device(
                &HostObservation {
                    ip_address: "10.0.0.7".into(),
                    ..Default::default()
                },
                None,
            )
            .unwrap();

        scheduler.run_maintenance().await;

        let backups: Vec<_> = std::fs::read_dir(dir.path().join("backups"))
            .unwrap()
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(store.get_all_devices().unwrap().len(), 1);
    }
}
