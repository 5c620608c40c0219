//! Schema creation and connection pragmas.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Discovered hosts
CREATE TABLE IF NOT EXISTS devices (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_address     TEXT NOT NULL,
    mac_address    TEXT,
    hostname       TEXT NOT NULL DEFAULT '',
    os_fingerprint TEXT NOT NULL DEFAULT '',
    first_seen     TEXT NOT NULL,
    last_seen      TEXT NOT NULL,
    UNIQUE (ip_address, mac_address)
);
-- SQLite treats NULLs as distinct in UNIQUE constraints; this index makes a
-- missing MAC collide with another missing MAC on the same IP.
CREATE UNIQUE INDEX IF NOT EXISTS idx_devices_identity
    ON devices(ip_address, IFNULL(mac_address, ''));
CREATE INDEX IF NOT EXISTS idx_devices_ip ON devices(ip_address);
CREATE INDEX IF NOT EXISTS idx_devices_mac ON devices(mac_address);
CREATE INDEX IF NOT EXISTS idx_devices_last_seen ON devices(last_seen);

-- Open ports, owned by a device
CREATE TABLE IF NOT EXISTS ports (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id       INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    port_number     INTEGER NOT NULL CHECK (port_number BETWEEN 0 AND 65535),
    protocol        TEXT NOT NULL,
    service_name    TEXT NOT NULL DEFAULT '',
    service_version TEXT NOT NULL DEFAULT '',
    first_seen      TEXT NOT NULL,
    last_seen       TEXT NOT NULL,
    UNIQUE (device_id, port_number, protocol)
);
CREATE INDEX IF NOT EXISTS idx_ports_device_id ON ports(device_id);
CREATE INDEX IF NOT EXISTS idx_ports_port_protocol ON ports(port_number, protocol);

-- One row per orchestrator run
CREATE TABLE IF NOT EXISTS scans (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp     TEXT NOT NULL,
    template      TEXT NOT NULL,
    duration      INTEGER NOT NULL DEFAULT 0,
    devices_found INTEGER NOT NULL DEFAULT 0,
    ports_found   INTEGER NOT NULL DEFAULT 0,
    status        TEXT NOT NULL CHECK (status IN ('running','completed','error')),
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_scans_timestamp ON scans(timestamp);

-- Append-only audit trail
CREATE TABLE IF NOT EXISTS changes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id     INTEGER REFERENCES scans(id) ON DELETE CASCADE,
    device_id   INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    change_type TEXT NOT NULL CHECK (change_type IN ('new_device','device_change','new_port','port_change')),
    details     TEXT NOT NULL,
    timestamp   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_changes_scan_id ON changes(scan_id);
CREATE INDEX IF NOT EXISTS idx_changes_device_id ON changes(device_id);
CREATE INDEX IF NOT EXISTS idx_changes_timestamp ON changes(timestamp);

-- Persisted log lines
CREATE TABLE IF NOT EXISTS logs (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    level     TEXT NOT NULL,
    message   TEXT NOT NULL,
    component TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_logs_level_component ON logs(level, component);
CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);
"#;

/// Create all tables and indexes. Safe to call on an existing database.
pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

/// Apply per-connection pragmas.
///
/// WAL and foreign keys are required for correct behaviour; the cache and
/// mmap tuning are best-effort and only logged when rejected.
pub fn apply_pragmas(conn: &Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::warn!(journal_mode = %mode, "WAL journal mode not available");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))?;

    // ~20 MB page cache.
    if let Err(e) = conn.pragma_update(None, "cache_size", -20_000i64) {
        tracing::warn!(error = %e, "Failed to set cache_size pragma");
    }
    // 128 MiB
    if let Err(e) = conn.pragma_update(None, "mmap_size", 134_217_728i64) {
        tracing::warn!(error = %e, "Failed to set mmap_size pragma");
    }
    Ok(())
}
