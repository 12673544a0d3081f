// src/sync/log.rs

//! Change log storage and trigger installation
//!
//! Every replicated table gets three capture triggers (insert/update/delete)
//! that append one row to `_sync_log` unless the session suppression flag is
//! set. Log versions are assigned by the engine's AUTOINCREMENT counter, so
//! they are strictly monotonic within one store and sorting by version
//! reproduces causal local order.
//!
//! Metadata tables installed here are normative, so two peers installed by
//! this engine interoperate through a shared backing store:
//! `_sync_log`, `_sync_state`, `_sync_session`, `_sync_clients`.

use crate::error::{Error, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// State keys in `_sync_state`
pub const STATE_ORIGIN_ID: &str = "origin_id";
pub const STATE_LAST_SERVER_VERSION: &str = "last_server_version";
pub const STATE_LAST_PUSH_VERSION: &str = "last_push_version";

/// Logical operation captured in the change log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Operation::Insert),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            _ => Err(format!("Invalid operation: {}", s)),
        }
    }
}

/// One replicated row-level change.
///
/// `pk_value` is always a JSON object (`{col: val, ...}`) so composite keys
/// need no special casing. Deletes carry a null payload; inserts and updates
/// carry the full new row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub version: i64,
    #[serde(rename = "table")]
    pub table_name: String,
    #[serde(rename = "pk")]
    pub pk_value: serde_json::Value,
    #[serde(rename = "op")]
    pub operation: Operation,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    pub origin: String,
    #[serde(rename = "ts")]
    pub timestamp: String,
}

/// Current wall-clock time in the wire timestamp format (RFC3339, ms)
pub fn now_rfc3339() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Create the replication metadata tables and seed `_sync_state`.
///
/// Safe to call repeatedly; `origin_id` is assigned once and never mutated.
pub fn install_sync_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _sync_log (
            version INTEGER PRIMARY KEY AUTOINCREMENT,
            table_name TEXT NOT NULL,
            pk_value TEXT NOT NULL,
            operation TEXT NOT NULL CHECK (operation IN ('insert', 'update', 'delete')),
            payload TEXT,
            origin TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS ix_sync_log_version ON _sync_log (version);
        CREATE INDEX IF NOT EXISTS ix_sync_log_table_version ON _sync_log (table_name, version);

        CREATE TABLE IF NOT EXISTS _sync_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS _sync_session (
            sync_active INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS _sync_clients (
            origin_id TEXT PRIMARY KEY,
            last_sync_version INTEGER NOT NULL,
            last_sync_timestamp TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );",
    )?;

    conn.execute(
        "INSERT INTO _sync_session (sync_active)
         SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM _sync_session)",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO _sync_state (key, value) VALUES (?1, ?2)",
        params![STATE_ORIGIN_ID, Uuid::new_v4().to_string()],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO _sync_state (key, value) VALUES (?1, '0'), (?2, '0')",
        params![STATE_LAST_SERVER_VERSION, STATE_LAST_PUSH_VERSION],
    )?;

    info!("replication metadata installed, origin {}", origin_id(conn)?);
    Ok(())
}

/// Read one `_sync_state` value
pub fn get_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM _sync_state WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Write one `_sync_state` value
pub fn set_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO _sync_state (key, value) VALUES (?1, ?2)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// This store's stable peer identifier
pub fn origin_id(conn: &Connection) -> Result<String> {
    get_state(conn, STATE_ORIGIN_ID)?
        .ok_or_else(|| Error::InitError("sync state not initialized".to_string()))
}

fn get_version_state(conn: &Connection, key: &str) -> Result<i64> {
    Ok(get_state(conn, key)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

/// Highest remote version durably pulled into this store
pub fn last_server_version(conn: &Connection) -> Result<i64> {
    get_version_state(conn, STATE_LAST_SERVER_VERSION)
}

pub fn set_last_server_version(conn: &Connection, version: i64) -> Result<()> {
    set_state(conn, STATE_LAST_SERVER_VERSION, &version.to_string())
}

/// Highest local version this peer has pushed out
pub fn last_push_version(conn: &Connection) -> Result<i64> {
    get_version_state(conn, STATE_LAST_PUSH_VERSION)
}

pub fn set_last_push_version(conn: &Connection, version: i64) -> Result<()> {
    set_state(conn, STATE_LAST_PUSH_VERSION, &version.to_string())
}

/// Install the three capture triggers for one replicated table.
///
/// Reads the live column list, so re-installing after a migration refreshes
/// the captured payload shape. Existing triggers are replaced.
pub fn install_triggers(conn: &Connection, table: &str) -> Result<()> {
    let columns = table_columns(conn, table)?;
    let pk_columns = table_pk_columns(conn, table)?;
    if pk_columns.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "table {} needs a primary key to be replicated",
            table
        )));
    }

    let new_pk = json_object_sql(&pk_columns, "NEW");
    let old_pk = json_object_sql(&pk_columns, "OLD");
    let new_row = json_object_sql(&columns, "NEW");

    let origin_select = format!(
        "(SELECT value FROM _sync_state WHERE key = '{}')",
        STATE_ORIGIN_ID
    );
    let ts = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";
    let not_suppressed = "(SELECT sync_active FROM _sync_session LIMIT 1) = 0";

    let sql = format!(
        "DROP TRIGGER IF EXISTS _sync_trg_{table}_insert;
         DROP TRIGGER IF EXISTS _sync_trg_{table}_update;
         DROP TRIGGER IF EXISTS _sync_trg_{table}_delete;

         CREATE TRIGGER _sync_trg_{table}_insert
         AFTER INSERT ON {table}
         WHEN {not_suppressed}
         BEGIN
             INSERT INTO _sync_log (table_name, pk_value, operation, payload, origin, timestamp)
             VALUES ('{table}', {new_pk}, 'insert', {new_row}, {origin_select}, {ts});
         END;

         CREATE TRIGGER _sync_trg_{table}_update
         AFTER UPDATE ON {table}
         WHEN {not_suppressed}
         BEGIN
             INSERT INTO _sync_log (table_name, pk_value, operation, payload, origin, timestamp)
             VALUES ('{table}', {new_pk}, 'update', {new_row}, {origin_select}, {ts});
         END;

         CREATE TRIGGER _sync_trg_{table}_delete
         AFTER DELETE ON {table}
         WHEN {not_suppressed}
         BEGIN
             INSERT INTO _sync_log (table_name, pk_value, operation, payload, origin, timestamp)
             VALUES ('{table}', {old_pk}, 'delete', NULL, {origin_select}, {ts});
         END;"
    );
    conn.execute_batch(&sql)?;
    debug!("capture triggers installed on {}", table);
    Ok(())
}

fn json_object_sql(columns: &[String], prefix: &str) -> String {
    let args: Vec<String> = columns
        .iter()
        .map(|c| format!("'{}', {}.{}", c, prefix, c))
        .collect();
    format!("json_object({})", args.join(", "))
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table))?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Err(Error::InvalidArgument(format!("no such table: {}", table)));
    }
    Ok(columns)
}

fn table_pk_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table))?;
    let mut cols: Vec<(i32, String)> = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i32>(5)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|(pk, _)| *pk > 0)
        .collect();
    cols.sort_by_key(|(pk, _)| *pk);
    Ok(cols.into_iter().map(|(_, c)| c).collect())
}

/// Read log entries with `version > from_version` in ascending order
pub fn fetch_entries(conn: &Connection, from_version: i64, limit: usize) -> Result<Vec<SyncLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT version, table_name, pk_value, operation, payload, origin, timestamp
         FROM _sync_log
         WHERE version > ?1
         ORDER BY version ASC
         LIMIT ?2",
    )?;
    let entries = stmt
        .query_map(params![from_version, limit as i64], entry_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// Append a foreign entry to this store's log, preserving its origin and
/// timestamp. Used when a store acts as the shared hub for pushed batches;
/// the local engine assigns a fresh version.
pub fn insert_entry(conn: &Connection, entry: &SyncLogEntry) -> Result<i64> {
    conn.execute(
        "INSERT INTO _sync_log (table_name, pk_value, operation, payload, origin, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.table_name,
            entry.pk_value.to_string(),
            entry.operation.as_str(),
            entry.payload.as_ref().map(|p| p.to_string()),
            entry.origin,
            entry.timestamp,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Lowest retained log version, or 0 when the log is empty
pub fn oldest_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> =
        conn.query_row("SELECT MIN(version) FROM _sync_log", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

/// Highest assigned log version, or 0 when the log is empty
pub fn latest_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM _sync_log", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

pub fn log_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM _sync_log", [], |row| row.get(0))?)
}

/// Delete log rows with `version <= up_to`; returns how many were purged
pub fn purge_up_to(conn: &Connection, up_to: i64) -> Result<usize> {
    let purged = conn.execute("DELETE FROM _sync_log WHERE version <= ?1", [up_to])?;
    if purged > 0 {
        info!("purged {} log entries up to version {}", purged, up_to);
    }
    Ok(purged)
}

fn entry_from_row(row: &Row) -> rusqlite::Result<SyncLogEntry> {
    let op_str: String = row.get(3)?;
    let operation = op_str.parse::<Operation>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;
    let pk_raw: String = row.get(2)?;
    let payload_raw: Option<String> = row.get(4)?;

    Ok(SyncLogEntry {
        version: row.get(0)?,
        table_name: row.get(1)?,
        pk_value: serde_json::from_str(&pk_raw).unwrap_or(serde_json::Value::Null),
        operation,
        payload: payload_raw.map(|p| serde_json::from_str(&p).unwrap_or(serde_json::Value::Null)),
        origin: row.get(5)?,
        timestamp: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        install_sync_schema(&conn).unwrap();
        conn.execute_batch(
            "CREATE TABLE person (id TEXT PRIMARY KEY, name TEXT NOT NULL)",
        )
        .unwrap();
        install_triggers(&conn, "person").unwrap();
        conn
    }

    #[test]
    fn test_origin_id_is_stable() {
        let conn = setup();
        let first = origin_id(&conn).unwrap();
        install_sync_schema(&conn).unwrap();
        assert_eq!(origin_id(&conn).unwrap(), first);
    }

    #[test]
    fn test_insert_captures_one_entry() {
        let conn = setup();
        conn.execute(
            "INSERT INTO person (id, name) VALUES ('p1', 'Alice')",
            [],
        )
        .unwrap();

        let entries = fetch_entries(&conn, 0, 10).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.table_name, "person");
        assert_eq!(entry.operation, Operation::Insert);
        assert_eq!(entry.pk_value["id"], "p1");
        assert_eq!(entry.payload.as_ref().unwrap()["name"], "Alice");
        assert_eq!(entry.origin, origin_id(&conn).unwrap());
    }

    #[test]
    fn test_versions_are_strictly_monotonic() {
        let conn = setup();
        for i in 0..5 {
            conn.execute(
                "INSERT INTO person (id, name) VALUES (?1, 'x')",
                [format!("p{}", i)],
            )
            .unwrap();
        }
        let entries = fetch_entries(&conn, 0, 10).unwrap();
        let versions: Vec<i64> = entries.iter().map(|e| e.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
        assert_eq!(versions.len(), 5);
    }

    #[test]
    fn test_delete_has_null_payload() {
        let conn = setup();
        conn.execute(
            "INSERT INTO person (id, name) VALUES ('p1', 'Alice')",
            [],
        )
        .unwrap();
        conn.execute("DELETE FROM person WHERE id = 'p1'", []).unwrap();

        let entries = fetch_entries(&conn, 0, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].operation, Operation::Delete);
        assert!(entries[1].payload.is_none());
        assert_eq!(entries[1].pk_value["id"], "p1");
    }

    #[test]
    fn test_timestamp_is_rfc3339_with_millis() {
        let conn = setup();
        conn.execute(
            "INSERT INTO person (id, name) VALUES ('p1', 'Alice')",
            [],
        )
        .unwrap();
        let entries = fetch_entries(&conn, 0, 10).unwrap();
        let ts = &entries[0].timestamp;
        assert!(
            chrono::DateTime::parse_from_rfc3339(ts).is_ok(),
            "bad timestamp {}",
            ts
        );
        assert!(ts.contains('.'), "expected millisecond precision: {}", ts);
    }

    #[test]
    fn test_fetch_respects_from_version_and_limit() {
        let conn = setup();
        for i in 0..5 {
            conn.execute(
                "INSERT INTO person (id, name) VALUES (?1, 'x')",
                [format!("p{}", i)],
            )
            .unwrap();
        }
        let entries = fetch_entries(&conn, 2, 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.version > 2));
    }

    #[test]
    fn test_purge_and_oldest() {
        let conn = setup();
        for i in 0..4 {
            conn.execute(
                "INSERT INTO person (id, name) VALUES (?1, 'x')",
                [format!("p{}", i)],
            )
            .unwrap();
        }
        assert_eq!(purge_up_to(&conn, 2).unwrap(), 2);
        assert_eq!(oldest_version(&conn).unwrap(), 3);
        assert_eq!(log_count(&conn).unwrap(), 2);
    }

    #[test]
    fn test_wire_round_trip() {
        let entry = SyncLogEntry {
            version: 7,
            table_name: "person".to_string(),
            pk_value: serde_json::json!({"id": "p1"}),
            operation: Operation::Update,
            payload: Some(serde_json::json!({"id": "p1", "name": "Bob"})),
            origin: "origin-a".to_string(),
            timestamp: "2025-01-01T00:00:00.000Z".to_string(),
        };
        let wire = serde_json::to_string(&entry).unwrap();
        assert!(wire.contains("\"op\":\"update\""));
        assert!(wire.contains("\"table\":\"person\""));
        let back: SyncLogEntry = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, entry);
    }
}
