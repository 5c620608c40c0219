//! Core domain types for the Panopticon network inventory.
//!
//! These types describe the persisted entities (devices, ports, scans,
//! changes, logs) and the transient observations produced by a scan before
//! they are reconciled with stored history.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identifiers ───────────────────────────────────────────────────

/// Row id of a device in the inventory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct DeviceId(pub i64);

/// Row id of a port in the inventory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PortId(pub i64);

/// Row id of a scan execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ScanId(pub i64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Persisted entities ────────────────────────────────────────────

/// A discovered host.
///
/// Identity is `(ip_address, mac_address)`. An observation matches the row
/// with the same IP and MAC first. One carrying a MAC adopts the IP's
/// MAC-less row if there is no exact match; one without a MAC takes the
/// MAC-less row, else the most recently seen row for that IP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub ip_address: String,
    pub mac_address: Option<String>,
    pub hostname: String,
    pub os_fingerprint: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Number of ports currently stored for the device.
    #[serde(default)]
    pub port_count: u32,
}

/// An open network port on a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub id: PortId,
    pub device_id: DeviceId,
    pub port_number: u16,
    pub protocol: String,
    pub service_name: String,
    pub service_version: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A device together with its ports, ordered by port number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    pub device: Device,
    pub ports: Vec<Port>,
}

/// Lifecycle state of a persisted scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Completed,
    Error,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown scan status: {other}")),
        }
    }
}

/// One execution of the scan orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    pub id: ScanId,
    pub timestamp: DateTime<Utc>,
    pub template: String,
    /// Wall-clock duration in whole seconds.
    pub duration: u64,
    pub devices_found: u32,
    pub ports_found: u32,
    pub status: ScanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Kind of difference recorded in the audit trail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    NewDevice,
    DeviceChange,
    NewPort,
    PortChange,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewDevice => "new_device",
            Self::DeviceChange => "device_change",
            Self::NewPort => "new_port",
            Self::PortChange => "port_change",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new_device" => Ok(Self::NewDevice),
            "device_change" => Ok(Self::DeviceChange),
            "new_port" => Ok(Self::NewPort),
            "port_change" => Ok(Self::PortChange),
            other => Err(format!("unknown change type: {other}")),
        }
    }
}

/// Append-only audit record of a detected difference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub id: i64,
    /// Scan during which the change was observed. `None` when the change
    /// was recorded outside of any scan.
    pub scan_id: Option<ScanId>,
    pub device_id: DeviceId,
    pub change_type: ChangeType,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// A persisted log line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: i64,
    pub level: String,
    pub message: String,
    pub component: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate statistics over the inventory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub device_count: u64,
    pub port_count: u64,
    pub scan_count: u64,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    pub os_distribution: BTreeMap<String, u64>,
    pub service_distribution: BTreeMap<String, u64>,
    pub change_type_distribution: BTreeMap<String, u64>,
}

// ── Observations ──────────────────────────────────────────────────

/// One host's attributes as reported by a single scan.
///
/// Empty strings mean "not observed" and never overwrite stored values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostObservation {
    pub ip_address: String,
    pub mac_address: Option<String>,
    pub hostname: String,
    pub os_fingerprint: String,
    pub ports: Vec<PortObservation>,
}

/// One open port as reported by a single scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortObservation {
    pub port_number: u16,
    pub protocol: String,
    pub service_name: String,
    pub service_version: String,
}

// ── Scan requests ─────────────────────────────────────────────────

/// A named, reusable bundle of scan invocation parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub nmap_args: Vec<String>,
    pub rate_limit: u32,
}

/// Overrides applied on top of a template for a manual scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanParameters {
    pub template: String,
    /// Target network in CIDR notation; falls back to the configured default.
    #[serde(default)]
    pub target_network: Option<String>,
    /// Packets per second; `None` keeps the template's default.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default)]
    pub scan_all_ports: bool,
    #[serde(default)]
    pub disable_ping: bool,
}

impl ScanParameters {
    /// Parameters that only select a template.
    pub fn for_template(template: &str) -> Self {
        Self {
            template: template.to_string(),
            ..Default::default()
        }
    }
}
