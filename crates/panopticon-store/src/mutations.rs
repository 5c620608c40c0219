//! Write operations for the inventory.
//!
//! Every mutation takes the store-wide write lock and runs inside a single
//! immediate transaction, so a call is either fully applied or not at all.
//! Upserts compare incoming observations against stored rows and append a
//! Change record for each detected difference.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use panopticon_core::{
    ChangeType, DeviceId, HostObservation, PortId, PortObservation, ScanId, ScanStatus,
};

use crate::client::{encode_ts, truncate_to_hour, ReconciliationStore, Result, StoreError};

/// Stored identity and mutable attributes of a device.
#[derive(Debug)]
struct StoredDevice {
    id: i64,
    mac_address: Option<String>,
    hostname: String,
    os_fingerprint: String,
}

/// Stored service attributes of a port.
#[derive(Debug)]
struct StoredPort {
    id: i64,
    service_name: String,
    service_version: String,
}

impl ReconciliationStore {
    // ── Devices ──────────────────────────────────────────────────

    /// Insert or update a device from a scan observation.
    ///
    /// Returns the device's row id for both inserts and updates. Ports on the
    /// observation are ignored here; use [`ReconciliationStore::upsert_port`].
    pub fn upsert_device(&self, obs: &HostObservation, scan_id: Option<ScanId>) -> Result<DeviceId> {
        self.upsert_device_at(obs, scan_id, Utc::now())
    }

    /// [`ReconciliationStore::upsert_device`] with an explicit observation time.
    pub fn upsert_device_at(
        &self,
        obs: &HostObservation,
        scan_id: Option<ScanId>,
        observed_at: DateTime<Utc>,
    ) -> Result<DeviceId> {
        let ip = obs.ip_address.trim();
        if ip.is_empty() {
            return Err(StoreError::InvalidArgument(
                "device observation has no IP address".to_string(),
            ));
        }
        let mac = non_empty(obs.mac_address.as_deref());
        let rounded = encode_ts(truncate_to_hour(observed_at));

        let mut conn = self.writer()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let id = match find_device(&tx, ip, mac)? {
            None => {
                tx.execute(
                    "INSERT INTO devices (ip_address, mac_address, hostname, os_fingerprint, first_seen, last_seen)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![ip, mac, obs.hostname, obs.os_fingerprint, rounded],
                )?;
                let id = tx.last_insert_rowid();

                let scan = resolve_scan_id(&tx, scan_id)?;
                insert_change(
                    &tx,
                    scan,
                    id,
                    ChangeType::NewDevice,
                    &format!("New device discovered: {ip}"),
                    observed_at,
                )?;

                tracing::info!(
                    device_id = id,
                    ip = %ip,
                    hostname = %obs.hostname,
                    "New device discovered"
                );
                id
            }
            Some(stored) => {
                let changes = device_changes(&stored, mac, &obs.hostname, &obs.os_fingerprint);
                let fresh = is_fresh(observed_at);

                if !changes.is_empty() || fresh {
                    tx.execute(
                        "UPDATE devices
                         SET mac_address = ?1, hostname = ?2, os_fingerprint = ?3, last_seen = ?4
                         WHERE id = ?5",
                        params![
                            mac.or(stored.mac_address.as_deref()),
                            keep_if_empty(&obs.hostname, &stored.hostname),
                            keep_if_empty(&obs.os_fingerprint, &stored.os_fingerprint),
                            rounded,
                            stored.id,
                        ],
                    )?;

                    if !changes.is_empty() {
                        let scan = resolve_scan_id(&tx, scan_id)?;
                        insert_change(
                            &tx,
                            scan,
                            stored.id,
                            ChangeType::DeviceChange,
                            &changes.join("; "),
                            observed_at,
                        )?;
                    }

                    tracing::debug!(
                        device_id = stored.id,
                        ip = %ip,
                        has_changes = !changes.is_empty(),
                        "Updated existing device"
                    );
                }
                stored.id
            }
        };

        tx.commit()?;
        Ok(DeviceId(id))
    }

    // ── Ports ────────────────────────────────────────────────────

    /// Insert or update an open port on a device.
    pub fn upsert_port(
        &self,
        device_id: DeviceId,
        port: &PortObservation,
        scan_id: Option<ScanId>,
    ) -> Result<PortId> {
        self.upsert_port_at(device_id, port, scan_id, Utc::now())
    }

    /// [`ReconciliationStore::upsert_port`] with an explicit observation time.
    pub fn upsert_port_at(
        &self,
        device_id: DeviceId,
        port: &PortObservation,
        scan_id: Option<ScanId>,
        observed_at: DateTime<Utc>,
    ) -> Result<PortId> {
        if port.protocol.trim().is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "port {} has no protocol",
                port.port_number
            )));
        }
        let rounded = encode_ts(truncate_to_hour(observed_at));

        let mut conn = self.writer()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = tx
            .query_row(
                "SELECT id, service_name, service_version FROM ports
                 WHERE device_id = ?1 AND port_number = ?2 AND protocol = ?3",
                params![device_id.0, port.port_number, port.protocol],
                |r| {
                    Ok(StoredPort {
                        id: r.get(0)?,
                        service_name: r.get(1)?,
                        service_version: r.get(2)?,
                    })
                },
            )
            .optional()?;

        let id = match existing {
            None => {
                tx.execute(
                    "INSERT INTO ports (device_id, port_number, protocol, service_name, service_version, first_seen, last_seen)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    params![
                        device_id.0,
                        port.port_number,
                        port.protocol,
                        port.service_name,
                        port.service_version,
                        rounded,
                    ],
                )?;
                let id = tx.last_insert_rowid();

                let scan = resolve_scan_id(&tx, scan_id)?;
                insert_change(
                    &tx,
                    scan,
                    device_id.0,
                    ChangeType::NewPort,
                    &format!(
                        "New port discovered: {}/{} - {}",
                        port.port_number, port.protocol, port.service_name
                    ),
                    observed_at,
                )?;

                tracing::debug!(
                    device_id = device_id.0,
                    port = port.port_number,
                    protocol = %port.protocol,
                    "New port discovered"
                );
                id
            }
            Some(stored) => {
                let service_changed = differs(&port.service_name, &stored.service_name)
                    || differs(&port.service_version, &stored.service_version);

                if service_changed || is_fresh(observed_at) {
                    let name = keep_if_empty(&port.service_name, &stored.service_name);
                    let version = keep_if_empty(&port.service_version, &stored.service_version);

                    tx.execute(
                        "UPDATE ports SET service_name = ?1, service_version = ?2, last_seen = ?3
                         WHERE id = ?4",
                        params![name, version, rounded, stored.id],
                    )?;

                    if service_changed {
                        let scan = resolve_scan_id(&tx, scan_id)?;
                        insert_change(
                            &tx,
                            scan,
                            device_id.0,
                            ChangeType::PortChange,
                            &format!(
                                "Service on port {}/{} changed: {} -> {}",
                                port.port_number,
                                port.protocol,
                                join_service(&stored.service_name, &stored.service_version),
                                join_service(name, version),
                            ),
                            observed_at,
                        )?;
                    }

                    tracing::debug!(
                        port_id = stored.id,
                        port = port.port_number,
                        service_changed,
                        "Updated existing port"
                    );
                }
                stored.id
            }
        };

        tx.commit()?;
        Ok(PortId(id))
    }

    // ── Scans ────────────────────────────────────────────────────

    /// Record the start of a scan. The row is created in `running` state.
    pub fn create_scan(&self, template: &str) -> Result<ScanId> {
        self.create_scan_at(template, Utc::now())
    }

    /// [`ReconciliationStore::create_scan`] with an explicit start time.
    pub fn create_scan_at(&self, template: &str, started_at: DateTime<Utc>) -> Result<ScanId> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO scans (timestamp, template, status, duration, devices_found, ports_found)
             VALUES (?1, ?2, ?3, 0, 0, 0)",
            params![encode_ts(started_at), template, ScanStatus::Running.as_str()],
        )?;
        Ok(ScanId(conn.last_insert_rowid()))
    }

    /// Finalize a running scan. A scan transitions out of `running` once.
    pub fn update_scan(
        &self,
        id: ScanId,
        status: ScanStatus,
        devices_found: u32,
        ports_found: u32,
        duration: Duration,
        error_message: Option<&str>,
    ) -> Result<()> {
        if status == ScanStatus::Running {
            return Err(StoreError::InvalidArgument(
                "a scan can only transition to completed or error".to_string(),
            ));
        }

        let conn = self.writer()?;
        let updated = conn.execute(
            "UPDATE scans
             SET status = ?1, devices_found = ?2, ports_found = ?3, duration = ?4, error_message = ?5
             WHERE id = ?6 AND status = 'running'",
            params![
                status.as_str(),
                devices_found,
                ports_found,
                duration.as_secs() as i64,
                error_message,
                id.0,
            ],
        )?;

        if updated == 0 {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM scans WHERE id = ?1)",
                params![id.0],
                |r| r.get(0),
            )?;
            return Err(if exists {
                StoreError::InvalidArgument(format!("scan #{id} is already finalized"))
            } else {
                StoreError::NotFound {
                    entity: "scan",
                    id: id.0,
                }
            });
        }
        Ok(())
    }

    // ── Logs ─────────────────────────────────────────────────────

    /// Persist a log line.
    pub fn add_log_entry(&self, level: &str, message: &str, component: &str) -> Result<()> {
        self.add_log_entry_at(level, message, component, Utc::now())
    }

    pub fn add_log_entry_at(
        &self,
        level: &str,
        message: &str,
        component: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO logs (level, message, component, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![level, message, component, encode_ts(at)],
        )?;
        Ok(())
    }
}

/// Locate the stored device for an observation.
///
/// An exact `(ip, mac)` match wins. A MAC-bearing observation otherwise
/// adopts the row for the same IP that never had a MAC; a MAC-less
/// observation matches the MAC-less row, else the most recently seen row for
/// that IP.
fn find_device(
    tx: &rusqlite::Transaction<'_>,
    ip: &str,
    mac: Option<&str>,
) -> rusqlite::Result<Option<StoredDevice>> {
    const COLUMNS: &str = "SELECT id, mac_address, hostname, os_fingerprint FROM devices";
    let map = |r: &rusqlite::Row<'_>| {
        Ok(StoredDevice {
            id: r.get(0)?,
            mac_address: r.get(1)?,
            hostname: r.get(2)?,
            os_fingerprint: r.get(3)?,
        })
    };

    if let Some(mac) = mac {
        let exact = tx
            .query_row(
                &format!("{COLUMNS} WHERE ip_address = ?1 AND mac_address = ?2"),
                params![ip, mac],
                map,
            )
            .optional()?;
        if exact.is_some() {
            return Ok(exact);
        }
    }

    let without_mac = tx
        .query_row(
            &format!("{COLUMNS} WHERE ip_address = ?1 AND mac_address IS NULL"),
            params![ip],
            map,
        )
        .optional()?;
    if without_mac.is_some() || mac.is_some() {
        return Ok(without_mac);
    }

    tx.query_row(
        &format!("{COLUMNS} WHERE ip_address = ?1 ORDER BY last_seen DESC, id DESC LIMIT 1"),
        params![ip],
        map,
    )
    .optional()
}

/// Human-readable descriptions of each field that an observation changes.
fn device_changes(
    stored: &StoredDevice,
    mac: Option<&str>,
    hostname: &str,
    os_fingerprint: &str,
) -> Vec<String> {
    let mut changes = Vec::new();
    let old_mac = stored.mac_address.as_deref().unwrap_or("");

    if let Some(mac) = mac {
        if mac != old_mac {
            changes.push(format!("MAC address changed: {old_mac} -> {mac}"));
        }
    }
    if differs(hostname, &stored.hostname) {
        changes.push(format!(
            "Hostname changed: {} -> {hostname}",
            stored.hostname
        ));
    }
    if differs(os_fingerprint, &stored.os_fingerprint) {
        changes.push(format!(
            "OS changed: {} -> {os_fingerprint}",
            stored.os_fingerprint
        ));
    }
    changes
}

/// Scan to attribute a change to: the caller's scan, else the latest scan,
/// else none.
fn resolve_scan_id(
    tx: &rusqlite::Transaction<'_>,
    scan_id: Option<ScanId>,
) -> rusqlite::Result<Option<i64>> {
    match scan_id {
        Some(id) => Ok(Some(id.0)),
        None => tx.query_row("SELECT MAX(id) FROM scans", [], |r| r.get(0)),
    }
}

fn insert_change(
    tx: &rusqlite::Transaction<'_>,
    scan_id: Option<i64>,
    device_id: i64,
    change_type: ChangeType,
    details: &str,
    at: DateTime<Utc>,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO changes (scan_id, device_id, change_type, details, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![scan_id, device_id, change_type.as_str(), details, encode_ts(at)],
    )?;
    Ok(())
}

/// An observation made within the last hour is live activity: the row's
/// `last_seen` is refreshed even when nothing else changed. Replayed older
/// observations only touch rows they actually change.
fn is_fresh(observed_at: DateTime<Utc>) -> bool {
    observed_at > Utc::now() - TimeDelta::hours(1)
}

/// A non-empty incoming value that differs from storage.
fn differs(incoming: &str, stored: &str) -> bool {
    !incoming.is_empty() && incoming != stored
}

fn keep_if_empty<'a>(incoming: &'a str, stored: &'a str) -> &'a str {
    if incoming.is_empty() {
        stored
    } else {
        incoming
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn join_service(name: &str, version: &str) -> String {
    format!("{name} {version}").trim().to_string()
}
