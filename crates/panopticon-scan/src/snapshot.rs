//! Turn an nmap report into observations and merge them into the store.

use std::path::Path;

use panopticon_core::{HostObservation, PortObservation, ScanId};
use panopticon_store::ReconciliationStore;

use crate::error::Result;
use crate::nmap_xml::{self, NmapHost, NmapRun};

/// Devices and ports persisted from one report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounts {
    pub devices: u32,
    pub ports: u32,
}

/// Observations for every live host with an IPv4 address, in document order.
pub fn observations(run: &NmapRun) -> Vec<HostObservation> {
    run.hosts
        .iter()
        .filter(|h| h.is_up())
        .filter_map(host_observation)
        .collect()
}

fn host_observation(host: &NmapHost) -> Option<HostObservation> {
    let Some(ip) = host.ipv4() else {
        tracing::warn!(
            mac = host.mac().unwrap_or(""),
            "Skipping live host without an IPv4 address"
        );
        return None;
    };

    let ports = host
        .port_list()
        .iter()
        .filter(|p| p.is_open())
        .filter_map(|p| {
            let Some(number) = p.number() else {
                tracing::warn!(ip = %ip, port_id = %p.port_id, "Skipping port with invalid id");
                return None;
            };
            Some(PortObservation {
                port_number: number,
                protocol: p.protocol.clone(),
                service_name: p.service_name().to_string(),
                service_version: p.service_version(),
            })
        })
        .collect();

    Some(HostObservation {
        ip_address: ip.to_string(),
        mac_address: host.mac().map(String::from),
        hostname: host.hostname().unwrap_or("").to_string(),
        os_fingerprint: host.os_name().unwrap_or("").to_string(),
        ports,
    })
}

/// Read the report at `path` and merge every observation into the store.
///
/// Per-host and per-port failures are logged and skipped; only rows that were
/// persisted are counted. An unreadable or unparsable report is an error.
pub fn ingest_snapshot(
    store: &ReconciliationStore,
    path: &Path,
    scan_id: Option<ScanId>,
) -> Result<IngestCounts> {
    tracing::debug!(file = %path.display(), "Processing scan results");
    let xml = std::fs::read(path)?;
    let run = nmap_xml::parse_snapshot(&xml)?;
    Ok(merge_observations(store, &observations(&run), scan_id))
}

/// Merge observations host by host.
pub fn merge_observations(
    store: &ReconciliationStore,
    hosts: &[HostObservation],
    scan_id: Option<ScanId>,
) -> IngestCounts {
    let mut counts = IngestCounts::default();

    for host in hosts {
        let device_id = match store.upsert_device(host, scan_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(ip = %host.ip_address, error = %e, "Failed to save device");
                continue;
            }
        };
        counts.devices += 1;

        for port in &host.ports {
            match store.upsert_port(device_id, port, scan_id) {
                Ok(_) => counts.ports += 1,
                Err(e) => tracing::error!(
                    ip = %host.ip_address,
                    port = port.port_number,
                    protocol = %port.protocol,
                    error = %e,
                    "Failed to save port"
                ),
            }
        }
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap">
  <host>
    <status state="up"/>
    <address addr="203.0.113.5" addrtype="ipv4"/>
    <address addr="00:1A:2B:3C:4D:5E" addrtype="mac"/>
    <hostnames><hostname name="edge.example" type="PTR"/></hostnames>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open"/>
        <service name="ssh" product="OpenSSH" version="9.3"/>
      </port>
      <port protocol="tcp" portid="25">
        <state state="closed"/>
      </port>
      <port protocol="tcp" portid="443">
        <state state="open"/>
        <service name="https"/>
      </port>
    </ports>
    <os><osmatch name="Linux 5.4" accuracy="98"/></os>
  </host>
  <host>
    <status state="up"/>
    <address addr="fe80::1" addrtype="ipv6"/>
  </host>
  <host>
    <status state="down"/>
    <address addr="203.0.113.9" addrtype="ipv4"/>
  </host>
</nmaprun>"#;

    #[test]
    fn observations_keep_live_ipv4_hosts_and_open_ports() {
        let run = nmap_xml::parse_snapshot(REPORT.as_bytes()).unwrap();
        let hosts = observations(&run);
        assert_eq!(hosts.len(), 1);

        let host = &hosts[0];
        assert_eq!(host.ip_address, "203.0.113.5");
        assert_eq!(host.mac_address.as_deref(), Some("00:1A:2B:3C:4D:5E"));
        assert_eq!(host.hostname, "edge.example");
        assert_eq!(host.os_fingerprint, "Linux 5.4");
        assert_eq!(
            host.ports,
            vec![
                PortObservation {
                    port_number: 22,
                    protocol: "tcp".into(),
                    service_name: "ssh".into(),
                    service_version: "OpenSSH 9.3".into(),
                },
                PortObservation {
                    port_number: 443,
                    protocol: "tcp".into(),
                    service_name: "https".into(),
                    service_version: String::new(),
                },
            ]
        );
    }

    #[test]
    fn ingest_counts_persisted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReconciliationStore::open_path(dir.path().join("inv.db")).unwrap();
        let report = dir.path().join("scan.xml");
        std::fs::write(&report, REPORT).unwrap();

        let scan = store.create_scan("default").unwrap();
        let counts = ingest_snapshot(&store, &report, Some(scan)).unwrap();
        assert_eq!(counts, IngestCounts { devices: 1, ports: 2 });

        let device = store.get_device_by_ip("203.0.113.5").unwrap().unwrap();
        assert_eq!(device.port_count, 2);
        assert_eq!(store.get_changes_for_scan(scan).unwrap().len(), 3);
    }

    #[test]
    fn failed_host_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReconciliationStore::open_path(dir.path().join("inv.db")).unwrap();
        let hosts = vec![
            HostObservation::default(),
            HostObservation {
                ip_address: "10.0.0.2".into(),
                ..Default::default()
            },
        ];
        let counts = merge_observations(&store, &hosts, None);
        assert_eq!(counts, IngestCounts { devices: 1, ports: 0 });
    }

    #[test]
    fn unreadable_report_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReconciliationStore::open_path(dir.path().join("inv.db")).unwrap();
        assert!(ingest_snapshot(&store, &dir.path().join("missing.xml"), None).is_err());

        let garbage = dir.path().join("garbage.xml");
        std::fs::write(&garbage, "<nmaprun><host><status state=").unwrap();
        assert!(ingest_snapshot(&store, &garbage, None).is_err());
    }
}
