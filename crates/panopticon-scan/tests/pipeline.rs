//! End-to-end scan pipeline: runner → report → reconciliation → change log.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use panopticon_core::config::ScannerConfig;
use panopticon_core::{ChangeType, ScanStatus};
use panopticon_scan::error::Result;
use panopticon_scan::runner::{RunOutcome, ScanRequest};
use panopticon_scan::{ScanOrchestrator, ScanRunner, ScanState};
use panopticon_store::ReconciliationStore;

fn report(hostname: &str, ssh_version: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap">
  <host>
    <status state="up"/>
    <address addr="198.51.100.20" addrtype="ipv4"/>
    <address addr="02:42:AC:11:00:02" addrtype="mac"/>
    <hostnames><hostname name="{hostname}" type="PTR"/></hostnames>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open"/>
        <service name="ssh" product="OpenSSH" version="{ssh_version}"/>
      </port>
    </ports>
  </host>
</nmaprun>"#
    )
}

/// Plays back queued reports, one per run, and records the arguments it saw.
struct ReplayRunner {
    reports: Mutex<Vec<String>>,
    seen_args: Mutex<Vec<Vec<String>>>,
}

impl ReplayRunner {
    fn new(mut reports: Vec<String>) -> Self {
        reports.reverse();
        Self {
            reports: Mutex::new(reports),
            seen_args: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ScanRunner for ReplayRunner {
    async fn run(&self, request: &ScanRequest) -> Result<RunOutcome> {
        self.seen_args.lock().unwrap().push(request.args.clone());
        let xml = self.reports.lock().unwrap().pop().unwrap_or_default();
        tokio::fs::write(&request.output_path, xml).await?;
        Ok(RunOutcome::Snapshot(request.output_path.clone()))
    }
}

#[tokio::test]
async fn repeated_scans_record_only_real_changes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ReconciliationStore::open_path(dir.path().join("inv.db")).unwrap());
    let runner = Arc::new(ReplayRunner::new(vec![
        report("build-01.lab", "9.3"),
        report("build-01.lab", "9.3"),
        report("build-02.lab", "9.6"),
    ]));
    let config = ScannerConfig {
        target_network: "198.51.100.0/24".into(),
        output_dir: dir.path().join("scans").to_string_lossy().into_owned(),
        compress_output: false,
        ..ScannerConfig::default()
    };
    let orchestrator = ScanOrchestrator::new(config, store.clone(), runner.clone());

    let first = orchestrator.run_scan("default").await.unwrap();
    let second = orchestrator.run_scan("default").await.unwrap();
    let third = orchestrator.run_scan("default").await.unwrap();

    let first_changes = store.get_changes_for_scan(first).unwrap();
    assert_eq!(first_changes.len(), 2);
    assert_eq!(first_changes[0].change_type, ChangeType::NewDevice);
    assert_eq!(first_changes[1].change_type, ChangeType::NewPort);

    assert!(store.get_changes_for_scan(second).unwrap().is_empty());

    let third_changes = store.get_changes_for_scan(third).unwrap();
    let kinds: Vec<_> = third_changes.iter().map(|c| c.change_type).collect();
    assert_eq!(
        kinds,
        vec![ChangeType::DeviceChange, ChangeType::PortChange]
    );
    assert!(third_changes[0].details.contains("build-01.lab"));
    assert!(third_changes[0].details.contains("build-02.lab"));

    let device = store.get_device_by_ip("198.51.100.20").unwrap().unwrap();
    assert_eq!(device.hostname, "build-02.lab");
    assert_eq!(device.mac_address.as_deref(), Some("02:42:AC:11:00:02"));
    assert_eq!(store.get_all_devices().unwrap().len(), 1);

    let ports = store.get_ports_for_device(device.id).unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].service_version, "OpenSSH 9.6");

    for id in [first, second, third] {
        let scan = store.get_scan(id).unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Completed);
        assert_eq!((scan.devices_found, scan.ports_found), (1, 1));
    }
    assert_eq!(orchestrator.get_status().status, ScanState::Completed);

    let seen = runner.seen_args.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].last().map(String::as_str), Some("198.51.100.0/24"));
    assert_ne!(seen[0][1], seen[1][1], "each run writes a fresh report file");
}
