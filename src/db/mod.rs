// src/db/mod.rs

//! Database layer for Tributary
//!
//! This module handles opening and initializing embedded replica stores:
//! - Database file creation and pragmas
//! - Replication metadata bootstrap (`_sync_*` tables, origin identity)
//!
//! Schema migrations for user tables live in [`crate::schema`]; the change
//! log and trigger installation live in [`crate::sync::log`].

use crate::error::{Error, Result};
use crate::sync::log::install_sync_schema;
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, info};

/// Initialize a new replica store at the specified path
///
/// Creates the database file, sets pragmas, and installs the replication
/// metadata tables. This is idempotent - calling it on an existing store is
/// safe and keeps its origin identity.
pub fn init(db_path: &str) -> Result<Connection> {
    debug!("Initializing replica store at: {}", db_path);

    // Create parent directories if they don't exist
    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::InitError(format!("Failed to create database directory: {}", e)))?;
    }

    let conn = Connection::open(db_path)?;

    // Set pragmas for better performance and reliability; foreign keys must
    // be enforced for the applier's deferral classification to work.
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    install_sync_schema(&conn)?;

    info!("Replica store initialized successfully");
    Ok(conn)
}

/// Open an existing replica store
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        return Err(Error::DatabaseNotFound(db_path.to_string()));
    }

    let conn = Connection::open(db_path)?;

    // Set pragmas
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    Ok(conn)
}

/// In-memory replica store with metadata installed; used by tests and demos
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    install_sync_schema(&conn)?;
    Ok(conn)
}
