// src/sync/session.rs

//! Trigger suppression
//!
//! The capture triggers consult the `_sync_session` flag and skip logging
//! while it is set, so replaying remote changes does not echo them back into
//! the local log. The flag is taken through [`SuppressionGuard`], which
//! releases it on every exit path, including panics.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, warn};

/// Whether change capture is currently suppressed
pub fn is_suppressed(conn: &Connection) -> Result<bool> {
    let active: i64 = conn.query_row(
        "SELECT sync_active FROM _sync_session LIMIT 1",
        [],
        |row| row.get(0),
    )?;
    Ok(active != 0)
}

/// Suppress change capture until the returned guard is dropped
pub fn suppress(conn: &Connection) -> Result<SuppressionGuard<'_>> {
    conn.execute("UPDATE _sync_session SET sync_active = 1", [])?;
    debug!("change capture suppressed");
    Ok(SuppressionGuard { conn })
}

/// Scoped suppression handle; dropping it re-enables change capture
pub struct SuppressionGuard<'c> {
    conn: &'c Connection,
}

impl Drop for SuppressionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self
            .conn
            .execute("UPDATE _sync_session SET sync_active = 0", [])
        {
            warn!("failed to release suppression flag: {}", e);
        } else {
            debug!("change capture re-enabled");
        }
    }
}
