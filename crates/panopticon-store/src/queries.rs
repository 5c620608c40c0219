//! Read-only queries against the inventory.
//!
//! All queries run on the read connection and never wait on the write lock.

use std::collections::BTreeMap;

use rusqlite::{params, params_from_iter, types::Type, OptionalExtension, Row};

use panopticon_core::{
    Change, ChangeType, DatabaseStats, Device, DeviceDetails, DeviceId, LogEntry, Port, PortId,
    Scan, ScanId, ScanStatus,
};

use crate::client::{decode_ts, ReconciliationStore, Result};

const DEVICE_COLUMNS: &str = "SELECT d.id, d.ip_address, d.mac_address, d.hostname, d.os_fingerprint,
        d.first_seen, d.last_seen,
        (SELECT COUNT(*) FROM ports p WHERE p.device_id = d.id) AS port_count
     FROM devices d";

const PORT_COLUMNS: &str = "SELECT id, device_id, port_number, protocol, service_name, service_version,
        first_seen, last_seen
     FROM ports";

const SCAN_COLUMNS: &str = "SELECT id, timestamp, template, duration, devices_found, ports_found,
        status, error_message
     FROM scans";

const CHANGE_COLUMNS: &str =
    "SELECT id, scan_id, device_id, change_type, details, timestamp FROM changes";

impl ReconciliationStore {
    // ── Devices ──────────────────────────────────────────────────

    /// Get a device by id, with its port count.
    pub fn get_device(&self, id: DeviceId) -> Result<Option<Device>> {
        let conn = self.reader()?;
        let device = conn
            .query_row(
                &format!("{DEVICE_COLUMNS} WHERE d.id = ?1"),
                params![id.0],
                device_from_row,
            )
            .optional()?;
        Ok(device)
    }

    /// Get the most recently seen device with this IP address.
    pub fn get_device_by_ip(&self, ip_address: &str) -> Result<Option<Device>> {
        let conn = self.reader()?;
        let device = conn
            .query_row(
                &format!(
                    "{DEVICE_COLUMNS} WHERE d.ip_address = ?1 ORDER BY d.last_seen DESC, d.id DESC LIMIT 1"
                ),
                params![ip_address],
                device_from_row,
            )
            .optional()?;
        Ok(device)
    }

    /// Get a device together with its ports, ordered by port number.
    pub fn get_device_details(&self, id: DeviceId) -> Result<Option<DeviceDetails>> {
        let Some(device) = self.get_device(id)? else {
            return Ok(None);
        };
        let ports = self.get_ports_for_device(id)?;
        Ok(Some(DeviceDetails { device, ports }))
    }

    /// All devices, most recently seen first.
    pub fn get_all_devices(&self) -> Result<Vec<Device>> {
        let conn = self.reader()?;
        let mut stmt =
            conn.prepare(&format!("{DEVICE_COLUMNS} ORDER BY d.last_seen DESC, d.id DESC"))?;
        let devices = stmt
            .query_map([], device_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(devices)
    }

    /// Devices whose IP, hostname, OS or MAC contains `query`.
    pub fn search_devices(&self, query: &str) -> Result<Vec<Device>> {
        let pattern = format!("%{}%", escape_like(query));
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "{DEVICE_COLUMNS}
             WHERE d.ip_address LIKE ?1 ESCAPE '\\'
                OR d.hostname LIKE ?1 ESCAPE '\\'
                OR d.os_fingerprint LIKE ?1 ESCAPE '\\'
                OR d.mac_address LIKE ?1 ESCAPE '\\'
             ORDER BY d.last_seen DESC, d.id DESC"
        ))?;
        let devices = stmt
            .query_map(params![pattern], device_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(devices)
    }

    pub fn get_ports_for_device(&self, id: DeviceId) -> Result<Vec<Port>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "{PORT_COLUMNS} WHERE device_id = ?1 ORDER BY port_number, protocol"
        ))?;
        let ports = stmt
            .query_map(params![id.0], port_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ports)
    }

    // ── Scans ────────────────────────────────────────────────────

    pub fn get_scan(&self, id: ScanId) -> Result<Option<Scan>> {
        let conn = self.reader()?;
        let scan = conn
            .query_row(
                &format!("{SCAN_COLUMNS} WHERE id = ?1"),
                params![id.0],
                scan_from_row,
            )
            .optional()?;
        Ok(scan)
    }

    /// The `limit` most recent scans, newest first.
    pub fn get_recent_scans(&self, limit: usize) -> Result<Vec<Scan>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "{SCAN_COLUMNS} ORDER BY timestamp DESC, id DESC LIMIT ?1"
        ))?;
        let scans = stmt
            .query_map(params![limit as i64], scan_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(scans)
    }

    // ── Changes ──────────────────────────────────────────────────

    /// Change history of a device, newest first.
    pub fn get_changes_for_device(&self, id: DeviceId) -> Result<Vec<Change>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "{CHANGE_COLUMNS} WHERE device_id = ?1 ORDER BY timestamp DESC, id DESC"
        ))?;
        let changes = stmt
            .query_map(params![id.0], change_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(changes)
    }

    /// Changes attributed to a scan, in the order they were recorded.
    pub fn get_changes_for_scan(&self, id: ScanId) -> Result<Vec<Change>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!("{CHANGE_COLUMNS} WHERE scan_id = ?1 ORDER BY id"))?;
        let changes = stmt
            .query_map(params![id.0], change_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(changes)
    }

    // ── Logs ─────────────────────────────────────────────────────

    /// The newest `limit` log entries, optionally filtered by level and
    /// component.
    pub fn get_log_entries(
        &self,
        limit: usize,
        level: Option<&str>,
        component: Option<&str>,
    ) -> Result<Vec<LogEntry>> {
        let limit = limit as i64;
        let mut conditions = Vec::new();
        let mut args: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(level) = level.as_ref() {
            conditions.push("level = ?");
            args.push(level);
        }
        if let Some(component) = component.as_ref() {
            conditions.push("component = ?");
            args.push(component);
        }
        args.push(&limit);

        let mut sql = String::from("SELECT id, level, message, component, timestamp FROM logs");
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ?");

        let conn = self.reader()?;
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(args), |r| {
                Ok(LogEntry {
                    id: r.get(0)?,
                    level: r.get(1)?,
                    message: r.get(2)?,
                    component: r.get(3)?,
                    timestamp: decode_ts(4, &r.get::<_, String>(4)?)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    // ── Statistics ───────────────────────────────────────────────

    /// Aggregate counts and distributions over the inventory.
    pub fn get_database_stats(&self) -> Result<DatabaseStats> {
        let conn = self.reader()?;
        let count = |sql: &str| -> rusqlite::Result<u64> {
            conn.query_row(sql, [], |r| r.get::<_, i64>(0))
                .map(|n| n.max(0) as u64)
        };

        let last_scan_time = conn
            .query_row("SELECT MAX(timestamp) FROM scans", [], |r| {
                r.get::<_, Option<String>>(0)
            })?
            .map(|raw| decode_ts(0, &raw))
            .transpose()?;

        let size_bytes = match std::fs::metadata(self.path()) {
            Ok(meta) => meta.len(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read database file size");
                0
            }
        };

        Ok(DatabaseStats {
            device_count: count("SELECT COUNT(*) FROM devices")?,
            port_count: count("SELECT COUNT(*) FROM ports")?,
            scan_count: count("SELECT COUNT(*) FROM scans")?,
            last_scan_time,
            size_bytes,
            os_distribution: distribution(
                &conn,
                "SELECT CASE WHEN os_fingerprint = '' THEN 'Unknown' ELSE os_fingerprint END,
                        COUNT(*)
                 FROM devices GROUP BY 1",
            )?,
            service_distribution: distribution(
                &conn,
                "SELECT CASE WHEN service_name = '' THEN 'unknown' ELSE service_name END,
                        COUNT(*)
                 FROM ports GROUP BY 1",
            )?,
            change_type_distribution: distribution(
                &conn,
                "SELECT change_type, COUNT(*) FROM changes GROUP BY change_type",
            )?,
        })
    }
}

fn distribution(conn: &rusqlite::Connection, sql: &str) -> rusqlite::Result<BTreeMap<String, u64>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?.max(0) as u64))
    })?;
    rows.collect()
}

// ── Row mapping ──────────────────────────────────────────────────

fn device_from_row(r: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: DeviceId(r.get(0)?),
        ip_address: r.get(1)?,
        mac_address: r.get(2)?,
        hostname: r.get(3)?,
        os_fingerprint: r.get(4)?,
        first_seen: decode_ts(5, &r.get::<_, String>(5)?)?,
        last_seen: decode_ts(6, &r.get::<_, String>(6)?)?,
        port_count: r.get(7)?,
    })
}

fn port_from_row(r: &Row<'_>) -> rusqlite::Result<Port> {
    Ok(Port {
        id: PortId(r.get(0)?),
        device_id: DeviceId(r.get(1)?),
        port_number: r.get(2)?,
        protocol: r.get(3)?,
        service_name: r.get(4)?,
        service_version: r.get(5)?,
        first_seen: decode_ts(6, &r.get::<_, String>(6)?)?,
        last_seen: decode_ts(7, &r.get::<_, String>(7)?)?,
    })
}

fn scan_from_row(r: &Row<'_>) -> rusqlite::Result<Scan> {
    let status: String = r.get(6)?;
    Ok(Scan {
        id: ScanId(r.get(0)?),
        timestamp: decode_ts(1, &r.get::<_, String>(1)?)?,
        template: r.get(2)?,
        duration: r.get::<_, i64>(3)?.max(0) as u64,
        devices_found: r.get(4)?,
        ports_found: r.get(5)?,
        status: status.parse::<ScanStatus>().map_err(|e| text_error(6, e))?,
        error_message: r.get(7)?,
    })
}

fn change_from_row(r: &Row<'_>) -> rusqlite::Result<Change> {
    let change_type: String = r.get(3)?;
    Ok(Change {
        id: r.get(0)?,
        scan_id: r.get::<_, Option<i64>>(1)?.map(ScanId),
        device_id: DeviceId(r.get(2)?),
        change_type: change_type
            .parse::<ChangeType>()
            .map_err(|e| text_error(3, e))?,
        details: r.get(4)?,
        timestamp: decode_ts(5, &r.get::<_, String>(5)?)?,
    })
}

fn text_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

/// Escape LIKE wildcards so user input matches literally.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
