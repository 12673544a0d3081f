// src/hash.rs

//! Canonical-JSON hashing for batch and snapshot integrity
//!
//! Canonical form sorts every object's keys lexicographically and strips all
//! insignificant whitespace; null values are preserved. Batch hashes fold the
//! canonical form of each entry in version order into SHA-256, rendered as
//! lower-case hex.

use crate::error::{Error, Result};
use crate::sync::log::SyncLogEntry;
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a JSON value in canonical form
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Scalars already have a single compact rendering
        other => out.push_str(&other.to_string()),
    }
}

/// SHA-256 over the canonical form of each entry in version order
pub fn compute_batch_hash(entries: &[SyncLogEntry]) -> Result<String> {
    let mut hasher = Sha256::new();
    for entry in entries {
        let value = serde_json::to_value(entry)?;
        hasher.update(canonical_json(&value).as_bytes());
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 over whole-table snapshots.
///
/// Tables are folded in alphabetical order; the fetcher must return each
/// table's rows in primary-key order.
pub fn compute_database_hash(
    table_names: &[String],
    mut row_fetcher: impl FnMut(&str) -> Result<Vec<Value>>,
) -> Result<String> {
    let mut names: Vec<&String> = table_names.iter().collect();
    names.sort_by_key(|n| n.to_lowercase());

    let mut hasher = Sha256::new();
    for name in names {
        hasher.update(name.to_lowercase().as_bytes());
        for row in row_fetcher(name)? {
            hasher.update(canonical_json(&row).as_bytes());
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Case-insensitive hash comparison
pub fn verify_hash(expected: &str, actual: &str) -> Result<()> {
    if expected.eq_ignore_ascii_case(actual) {
        Ok(())
    } else {
        Err(Error::HashMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Read a table's rows as JSON objects in primary-key order.
///
/// The standard row fetcher for [`compute_database_hash`] on the embedded
/// engine.
pub fn fetch_rows_sqlite(conn: &Connection, table: &str) -> Result<Vec<Value>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table))?;
    let mut pk_cols: Vec<(i32, String)> = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i32>(5)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|(pk, _)| *pk > 0)
        .collect();
    pk_cols.sort_by_key(|(pk, _)| *pk);

    let order = if pk_cols.is_empty() {
        "rowid".to_string()
    } else {
        pk_cols
            .iter()
            .map(|(_, c)| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT * FROM \"{}\" ORDER BY {}",
        table, order
    ))?;
    let column_names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|c| c.to_string())
        .collect();

    let rows = stmt
        .query_map([], |row| {
            let mut object = serde_json::Map::new();
            for (i, name) in column_names.iter().enumerate() {
                let value = match row.get_ref(i)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(v) => Value::from(v),
                    ValueRef::Real(v) => Value::from(v),
                    ValueRef::Text(v) => Value::from(String::from_utf8_lossy(v).to_string()),
                    ValueRef::Blob(v) => {
                        let mut hex = String::with_capacity(v.len() * 2);
                        for byte in v {
                            hex.push_str(&format!("{:02x}", byte));
                        }
                        Value::from(hex)
                    }
                };
                object.insert(name.clone(), value);
            }
            Ok(Value::Object(object))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
