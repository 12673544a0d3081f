// src/sync/apply.rs

//! Applying replicated entries with deferred retry
//!
//! Entries are applied in version order; an entry whose apply reports a
//! foreign-key violation is deferred and retried on a later pass. Fixed-point
//! retry sidesteps topological sorting (which cyclic FK graphs defeat) and
//! transparently handles parents that arrive later in the same batch; the
//! bounded pass count keeps pathological batches from looping.
//!
//! The per-entry apply callback returns `Ok(true)` when the entry was
//! applied, `Ok(false)` to request deferral, and `Err` for anything fatal;
//! a fatal error aborts the whole batch.

use crate::error::{Error, Result};
use crate::sync::log::{Operation, SyncLogEntry};
use rusqlite::{Connection, ToSql, params_from_iter};
use serde_json::Value;
use tracing::{debug, warn};

/// Apply one batch of entries for `local_origin`.
///
/// Entries originating from this peer are skipped (echo suppression).
/// Returns the number of entries actually applied.
pub fn apply_batch(
    entries: &[SyncLogEntry],
    local_origin: &str,
    max_passes: u32,
    mut apply: impl FnMut(&SyncLogEntry) -> Result<bool>,
) -> Result<usize> {
    let mut pending: Vec<&SyncLogEntry> = entries
        .iter()
        .filter(|e| e.origin != local_origin)
        .collect();
    let skipped = entries.len() - pending.len();
    if skipped > 0 {
        debug!("skipped {} own entr(ies) during apply", skipped);
    }

    let mut applied = 0usize;
    let mut pass = 0u32;
    while !pending.is_empty() && pass < max_passes.max(1) {
        pass += 1;
        let mut deferred: Vec<&SyncLogEntry> = Vec::new();
        for entry in pending {
            if apply(entry)? {
                applied += 1;
            } else {
                deferred.push(entry);
            }
        }
        if !deferred.is_empty() {
            debug!(
                "pass {} deferred {} entr(ies)",
                pass,
                deferred.len()
            );
        }
        pending = deferred;
    }

    if let Some(first) = pending.first() {
        warn!(
            "deferral budget exhausted after {} pass(es); {} entr(ies) unapplied",
            pass,
            pending.len()
        );
        return Err(Error::DeferredChangeFailed {
            table: first.table_name.clone(),
            pk: first.pk_value.to_string(),
            reason: format!(
                "still violating a foreign key after {} pass(es)",
                pass
            ),
        });
    }
    Ok(applied)
}

/// Apply one replicated entry to an embedded SQLite store.
///
/// Inserts and updates land as `INSERT OR REPLACE` over the payload columns;
/// deletes are keyed on the PK object. Returns `Ok(false)` when the engine
/// reports a foreign-key violation so the caller can defer the entry;
/// anything else the engine rejects is fatal for the batch.
pub fn apply_entry_sqlite(conn: &Connection, entry: &SyncLogEntry) -> Result<bool> {
    let result = match entry.operation {
        Operation::Insert | Operation::Update => {
            let Some(Value::Object(payload)) = &entry.payload else {
                return Err(Error::InvalidArgument(format!(
                    "{} entry for {} has no row payload",
                    entry.operation.as_str(),
                    entry.table_name
                )));
            };
            let columns: Vec<&String> = payload.keys().collect();
            let placeholders: Vec<String> =
                (1..=columns.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "INSERT OR REPLACE INTO \"{}\" ({}) VALUES ({})",
                entry.table_name,
                columns
                    .iter()
                    .map(|c| format!("\"{}\"", c))
                    .collect::<Vec<_>>()
                    .join(", "),
                placeholders.join(", ")
            );
            let values: Vec<SqlJson> = payload.values().map(SqlJson).collect();
            conn.execute(&sql, params_from_iter(values.iter()))
        }
        Operation::Delete => {
            let Value::Object(pk) = &entry.pk_value else {
                return Err(Error::InvalidArgument(format!(
                    "delete entry for {} has a non-object pk",
                    entry.table_name
                )));
            };
            let clauses: Vec<String> = pk
                .keys()
                .enumerate()
                .map(|(i, c)| format!("\"{}\" = ?{}", c, i + 1))
                .collect();
            let sql = format!(
                "DELETE FROM \"{}\" WHERE {}",
                entry.table_name,
                clauses.join(" AND ")
            );
            let values: Vec<SqlJson> = pk.values().map(SqlJson).collect();
            conn.execute(&sql, params_from_iter(values.iter()))
        }
    };

    match result {
        Ok(_) => Ok(true),
        Err(e) if is_foreign_key_violation(&e) => {
            debug!(
                "deferring {} on {} (pk {}): {}",
                entry.operation.as_str(),
                entry.table_name,
                entry.pk_value,
                e
            );
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Engines disagree on FK error codes, so classification is by message
fn is_foreign_key_violation(e: &rusqlite::Error) -> bool {
    e.to_string().to_lowercase().contains("foreign key")
}

/// JSON scalar adapter for parameter binding
struct SqlJson<'a>(&'a Value);

impl ToSql for SqlJson<'_> {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value as SqlValue};
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(*b as i64)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ToSqlOutput::Owned(SqlValue::Integer(i))
                } else {
                    ToSqlOutput::Owned(SqlValue::Real(n.as_f64().unwrap_or(0.0)))
                }
            }
            Value::String(s) => ToSqlOutput::Owned(SqlValue::Text(s.clone())),
            // Nested structures persist as their JSON text
            other => ToSqlOutput::Owned(SqlValue::Text(other.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(version: i64, table: &str, origin: &str) -> SyncLogEntry {
        SyncLogEntry {
            version,
            table_name: table.to_string(),
            pk_value: json!({"id": format!("r{}", version)}),
            operation: Operation::Insert,
            payload: Some(json!({"id": format!("r{}", version)})),
            origin: origin.to_string(),
            timestamp: "2025-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_echo_suppression() {
        let entries = vec![entry(1, "t", "me"), entry(2, "t", "peer")];
        let mut seen = Vec::new();
        let applied = apply_batch(&entries, "me", 3, |e| {
            seen.push(e.version);
            Ok(true)
        })
        .unwrap();
        assert_eq!(applied, 1);
        assert_eq!(seen, vec![2]);
    }

    #[test]
    fn test_deferred_entries_retry_in_order() {
        // Entry 1 only applies after entry 2 has been seen.
        let entries = vec![entry(1, "child", "peer"), entry(2, "parent", "peer")];
        let mut parent_applied = false;
        let mut order = Vec::new();
        let applied = apply_batch(&entries, "me", 3, |e| {
            order.push(e.version);
            if e.table_name == "parent" {
                parent_applied = true;
                Ok(true)
            } else {
                Ok(parent_applied)
            }
        })
        .unwrap();
        assert_eq!(applied, 2);
        assert_eq!(order, vec![1, 2, 1]);
    }

    #[test]
    fn test_budget_exhaustion_names_first_failure() {
        let entries = vec![entry(1, "child", "peer")];
        let result = apply_batch(&entries, "me", 3, |_| Ok(false));
        match result {
            Err(Error::DeferredChangeFailed { table, .. }) => assert_eq!(table, "child"),
            other => panic!("expected DeferredChangeFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_single_pass_budget() {
        let entries = vec![entry(1, "child", "peer"), entry(2, "parent", "peer")];
        let mut parent_applied = false;
        let result = apply_batch(&entries, "me", 1, |e| {
            if e.table_name == "parent" {
                parent_applied = true;
                Ok(true)
            } else {
                Ok(parent_applied)
            }
        });
        assert!(matches!(result, Err(Error::DeferredChangeFailed { .. })));
    }

    #[test]
    fn test_fatal_error_aborts_batch() {
        let entries = vec![entry(1, "t", "peer"), entry(2, "t", "peer")];
        let mut calls = 0;
        let result = apply_batch(&entries, "me", 3, |_| {
            calls += 1;
            Err(Error::InvalidArgument("bad payload".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    fn fk_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE parent (id TEXT PRIMARY KEY);
             CREATE TABLE child (
                 id TEXT PRIMARY KEY,
                 parent_id TEXT NOT NULL REFERENCES parent (id)
             );",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_sqlite_applier_defers_fk_violation() {
        let conn = fk_db();
        let orphan = SyncLogEntry {
            version: 1,
            table_name: "child".to_string(),
            pk_value: json!({"id": "c1"}),
            operation: Operation::Insert,
            payload: Some(json!({"id": "c1", "parent_id": "missing"})),
            origin: "peer".to_string(),
            timestamp: "2025-01-01T00:00:00.000Z".to_string(),
        };
        assert!(!apply_entry_sqlite(&conn, &orphan).unwrap());
    }

    #[test]
    fn test_sqlite_applier_insert_update_delete() {
        let conn = fk_db();
        let insert = SyncLogEntry {
            version: 1,
            table_name: "parent".to_string(),
            pk_value: json!({"id": "p1"}),
            operation: Operation::Insert,
            payload: Some(json!({"id": "p1"})),
            origin: "peer".to_string(),
            timestamp: "2025-01-01T00:00:00.000Z".to_string(),
        };
        assert!(apply_entry_sqlite(&conn, &insert).unwrap());

        // Replay of the same insert replaces in place
        assert!(apply_entry_sqlite(&conn, &insert).unwrap());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM parent", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let delete = SyncLogEntry {
            operation: Operation::Delete,
            payload: None,
            ..insert
        };
        assert!(apply_entry_sqlite(&conn, &delete).unwrap());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM parent", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_sqlite_applier_non_fk_error_is_fatal() {
        let conn = fk_db();
        let bad = SyncLogEntry {
            version: 1,
            table_name: "child".to_string(),
            pk_value: json!({"id": "c1"}),
            operation: Operation::Insert,
            // parent_id is NOT NULL: a constraint failure that is not FK
            payload: Some(json!({"id": "c1", "parent_id": null})),
            origin: "peer".to_string(),
            timestamp: "2025-01-01T00:00:00.000Z".to_string(),
        };
        assert!(matches!(
            apply_entry_sqlite(&conn, &bad),
            Err(Error::Database(_))
        ));
    }
}
