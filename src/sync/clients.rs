// src/sync/clients.rs

//! Known-peer tracking and tombstone garbage collection
//!
//! The server side of a sync relationship records each peer's high-watermark
//! in `_sync_clients`. The minimum watermark across all known peers is the
//! safe purge point: log rows at or below it have been seen by everyone and
//! may be deleted, which is what finally retires delete tombstones. A peer
//! whose watermark fell behind the purged horizon can no longer be served
//! incrementally and must rebootstrap from a snapshot.

use crate::error::{Error, Result};
use crate::sync::log::{self, now_rfc3339};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, Row, params};
use tracing::{info, warn};

/// Server-side record of a known peer
#[derive(Debug, Clone)]
pub struct SyncClient {
    pub origin_id: String,
    pub last_sync_version: i64,
    pub last_sync_timestamp: String,
    pub created_at: Option<String>,
}

impl SyncClient {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            origin_id: row.get(0)?,
            last_sync_version: row.get(1)?,
            last_sync_timestamp: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

/// Upsert-on-contact: remember where a peer got to
pub fn record_contact(conn: &Connection, origin_id: &str, version: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO _sync_clients (origin_id, last_sync_version, last_sync_timestamp)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (origin_id) DO UPDATE SET
             last_sync_version = excluded.last_sync_version,
             last_sync_timestamp = excluded.last_sync_timestamp",
        params![origin_id, version, now_rfc3339()],
    )?;
    Ok(())
}

pub fn list_clients(conn: &Connection) -> Result<Vec<SyncClient>> {
    let mut stmt = conn.prepare(
        "SELECT origin_id, last_sync_version, last_sync_timestamp, created_at
         FROM _sync_clients
         ORDER BY origin_id",
    )?;
    let clients = stmt
        .query_map([], SyncClient::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(clients)
}

/// Highest log version every known peer has already seen.
///
/// With no known peers nothing is safe to purge.
pub fn safe_purge_version(clients: &[SyncClient]) -> i64 {
    clients
        .iter()
        .map(|c| c.last_sync_version)
        .min()
        .unwrap_or(0)
}

/// Purge log rows every known peer has moved past; returns how many
pub fn purge_seen_entries(conn: &Connection) -> Result<usize> {
    let clients = list_clients(conn)?;
    let purge_point = safe_purge_version(&clients);
    if purge_point == 0 {
        info!("no purgeable log entries ({} known peer(s))", clients.len());
        return Ok(0);
    }
    log::purge_up_to(conn, purge_point)
}

/// Check that a peer at `client_version` can still be served incrementally.
///
/// Fails with `FullResyncRequired` when entries between the peer's watermark
/// and the oldest retained version have been purged; the peer is expected to
/// discard local state and rebootstrap from a snapshot.
pub fn ensure_servable(client_version: i64, oldest_available: i64) -> Result<()> {
    if oldest_available > 0 && client_version + 1 < oldest_available {
        warn!(
            "peer at version {} is behind the retained horizon {}",
            client_version, oldest_available
        );
        return Err(Error::FullResyncRequired {
            client_version,
            oldest_available,
        });
    }
    Ok(())
}

/// Origin ids of peers not heard from within `window`.
///
/// Surfaced for administrative cleanup; nothing is deleted automatically.
/// Records with unparseable timestamps are treated as stale.
pub fn stale_clients(
    clients: &[SyncClient],
    now: DateTime<Utc>,
    window: Duration,
) -> Vec<String> {
    clients
        .iter()
        .filter(|c| {
            match DateTime::parse_from_rfc3339(&c.last_sync_timestamp) {
                Ok(ts) => now.signed_duration_since(ts.with_timezone(&Utc)) > window,
                Err(_) => true,
            }
        })
        .map(|c| c.origin_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::log::install_sync_schema;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        install_sync_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_upsert_on_contact() {
        let conn = setup();
        record_contact(&conn, "peer-1", 10).unwrap();
        record_contact(&conn, "peer-1", 25).unwrap();
        record_contact(&conn, "peer-2", 5).unwrap();

        let clients = list_clients(&conn).unwrap();
        assert_eq!(clients.len(), 2);
        assert_eq!(clients[0].last_sync_version, 25);
        assert_eq!(clients[1].last_sync_version, 5);
    }

    #[test]
    fn test_safe_purge_version() {
        assert_eq!(safe_purge_version(&[]), 0);

        let clients = vec![
            SyncClient {
                origin_id: "a".to_string(),
                last_sync_version: 40,
                last_sync_timestamp: now_rfc3339(),
                created_at: None,
            },
            SyncClient {
                origin_id: "b".to_string(),
                last_sync_version: 12,
                last_sync_timestamp: now_rfc3339(),
                created_at: None,
            },
        ];
        assert_eq!(safe_purge_version(&clients), 12);
    }

    #[test]
    fn test_too_far_behind() {
        let result = ensure_servable(50, 100);
        match result {
            Err(Error::FullResyncRequired {
                client_version,
                oldest_available,
            }) => {
                assert_eq!(client_version, 50);
                assert_eq!(oldest_available, 100);
            }
            other => panic!("expected FullResyncRequired, got {:?}", other),
        }

        // The peer that defined the purge point stays servable
        assert!(ensure_servable(50, 51).is_ok());
        // Empty log: nothing was ever purged
        assert!(ensure_servable(0, 0).is_ok());
    }

    #[test]
    fn test_stale_clients() {
        let now = Utc::now();
        let fresh = SyncClient {
            origin_id: "fresh".to_string(),
            last_sync_version: 1,
            last_sync_timestamp: now_rfc3339(),
            created_at: None,
        };
        let stale = SyncClient {
            origin_id: "stale".to_string(),
            last_sync_version: 1,
            last_sync_timestamp: "2020-01-01T00:00:00.000Z".to_string(),
            created_at: None,
        };
        let ids = stale_clients(&[fresh, stale], now, Duration::days(30));
        assert_eq!(ids, vec!["stale".to_string()]);
    }
}
