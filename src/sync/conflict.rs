// src/sync/conflict.rs

//! Conflict resolution
//!
//! Two log entries conflict when they touch the same table and primary key
//! but come from different origins. Timestamps are RFC3339 with millisecond
//! precision, so last-write-wins can compare them lexicographically; ties
//! fall back to the higher version.

use crate::error::{Error, Result};
use crate::hash::canonical_json;
use crate::sync::log::SyncLogEntry;

/// Caller-supplied resolver for [`ConflictStrategy::Custom`]
pub type CustomResolver<'a> = &'a dyn Fn(&SyncLogEntry, &SyncLogEntry) -> Result<SyncLogEntry>;

/// How concurrent modifications of the same key are decided
pub enum ConflictStrategy<'a> {
    /// Latest timestamp wins; ties go to the higher version
    LastWriteWins,
    /// The designated server peer's entry wins unconditionally
    ServerWins,
    /// The local entry wins unconditionally
    ClientWins,
    Custom(CustomResolver<'a>),
}

impl ConflictStrategy<'_> {
    pub fn as_str(&self) -> &str {
        match self {
            ConflictStrategy::LastWriteWins => "last_write_wins",
            ConflictStrategy::ServerWins => "server_wins",
            ConflictStrategy::ClientWins => "client_wins",
            ConflictStrategy::Custom(_) => "custom",
        }
    }
}

/// The decided winner plus the strategy that decided it
#[derive(Debug, Clone)]
pub struct Resolution {
    pub winner: SyncLogEntry,
    pub strategy: String,
}

/// Whether two entries are a genuine conflict
pub fn is_conflict(local: &SyncLogEntry, remote: &SyncLogEntry) -> bool {
    local.table_name.eq_ignore_ascii_case(&remote.table_name)
        && canonical_json(&local.pk_value) == canonical_json(&remote.pk_value)
        && local.origin != remote.origin
}

/// Decide a winner between a local and a remote entry.
///
/// `remote` is the entry from the designated server peer. A custom resolver
/// that declines (returns an error) propagates as `UnresolvedConflict`.
pub fn resolve(
    local: &SyncLogEntry,
    remote: &SyncLogEntry,
    strategy: &ConflictStrategy<'_>,
) -> Result<Resolution> {
    let winner = match strategy {
        ConflictStrategy::ServerWins => remote.clone(),
        ConflictStrategy::ClientWins => local.clone(),
        ConflictStrategy::LastWriteWins => {
            if remote.timestamp != local.timestamp {
                if remote.timestamp > local.timestamp {
                    remote.clone()
                } else {
                    local.clone()
                }
            } else if remote.version != local.version {
                if remote.version > local.version {
                    remote.clone()
                } else {
                    local.clone()
                }
            } else {
                return Err(unresolved(local, remote));
            }
        }
        ConflictStrategy::Custom(resolver) => {
            resolver(local, remote).map_err(|_| unresolved(local, remote))?
        }
    };
    Ok(Resolution {
        winner,
        strategy: strategy.as_str().to_string(),
    })
}

fn unresolved(local: &SyncLogEntry, remote: &SyncLogEntry) -> Error {
    Error::UnresolvedConflict {
        local: Box::new(local.clone()),
        remote: Box::new(remote.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::log::Operation;
    use serde_json::json;

    fn entry(version: i64, origin: &str, ts: &str) -> SyncLogEntry {
        SyncLogEntry {
            version,
            table_name: "person".to_string(),
            pk_value: json!({"id": "p1"}),
            operation: Operation::Update,
            payload: Some(json!({"id": "p1", "name": origin})),
            origin: origin.to_string(),
            timestamp: ts.to_string(),
        }
    }

    #[test]
    fn test_conflict_detection() {
        let a = entry(1, "origin-a", "2025-01-01T00:00:00.000Z");
        let b = entry(2, "origin-b", "2025-01-01T00:00:01.000Z");
        assert!(is_conflict(&a, &b));

        let same_origin = entry(3, "origin-a", "2025-01-01T00:00:02.000Z");
        assert!(!is_conflict(&a, &same_origin));

        let mut other_pk = b.clone();
        other_pk.pk_value = json!({"id": "p2"});
        assert!(!is_conflict(&a, &other_pk));
    }

    #[test]
    fn test_last_write_wins_by_timestamp() {
        let local = entry(1, "origin-a", "2025-01-01T00:00:00.000Z");
        let remote = entry(2, "origin-b", "2025-01-01T00:00:01.000Z");
        let resolution = resolve(&local, &remote, &ConflictStrategy::LastWriteWins).unwrap();
        assert_eq!(resolution.winner.origin, "origin-b");
        assert_eq!(resolution.strategy, "last_write_wins");
    }

    #[test]
    fn test_last_write_wins_tie_takes_higher_version() {
        let local = entry(1, "origin-a", "2025-01-01T00:00:00.000Z");
        let remote = entry(2, "origin-b", "2025-01-01T00:00:00.000Z");
        let resolution = resolve(&local, &remote, &ConflictStrategy::LastWriteWins).unwrap();
        assert_eq!(resolution.winner.version, 2);
    }

    #[test]
    fn test_full_tie_is_unresolved() {
        let local = entry(1, "origin-a", "2025-01-01T00:00:00.000Z");
        let remote = entry(1, "origin-b", "2025-01-01T00:00:00.000Z");
        assert!(matches!(
            resolve(&local, &remote, &ConflictStrategy::LastWriteWins),
            Err(Error::UnresolvedConflict { .. })
        ));
    }

    #[test]
    fn test_fixed_strategies() {
        let local = entry(1, "origin-a", "2025-01-01T00:00:05.000Z");
        let remote = entry(2, "origin-b", "2025-01-01T00:00:00.000Z");
        assert_eq!(
            resolve(&local, &remote, &ConflictStrategy::ServerWins)
                .unwrap()
                .winner
                .origin,
            "origin-b"
        );
        assert_eq!(
            resolve(&local, &remote, &ConflictStrategy::ClientWins)
                .unwrap()
                .winner
                .origin,
            "origin-a"
        );
    }

    #[test]
    fn test_custom_resolver_and_decline() {
        let local = entry(1, "origin-a", "2025-01-01T00:00:00.000Z");
        let remote = entry(2, "origin-b", "2025-01-01T00:00:01.000Z");

        let pick_local = |l: &SyncLogEntry, _: &SyncLogEntry| Ok(l.clone());
        let resolution =
            resolve(&local, &remote, &ConflictStrategy::Custom(&pick_local)).unwrap();
        assert_eq!(resolution.winner.origin, "origin-a");
        assert_eq!(resolution.strategy, "custom");

        let decline = |_: &SyncLogEntry, _: &SyncLogEntry| {
            Err(Error::InvalidArgument("cannot decide".to_string()))
        };
        assert!(matches!(
            resolve(&local, &remote, &ConflictStrategy::Custom(&decline)),
            Err(Error::UnresolvedConflict { .. })
        ));
    }
}
