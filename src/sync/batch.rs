// src/sync/batch.rs

//! Batched change-log paging
//!
//! Batches page the log by its monotonic version column. A fetcher callback
//! supplies the rows (local store or remote transport, the pager does not
//! care); `has_more` is true exactly when the underlying store had at least
//! one row beyond the requested size.

use crate::error::Result;
use crate::hash::compute_batch_hash;
use crate::sync::log::SyncLogEntry;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Paging and retry configuration for one sync pass
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Maximum entries per batch
    pub batch_size: usize,
    /// Deferred-retry pass budget for the change applier
    pub max_apply_passes: u32,
    /// Attach a batch hash for verification on arrival
    pub compute_hash: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_apply_passes: 3,
            compute_hash: false,
        }
    }
}

/// One page of the change log, the wire unit of replication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatch {
    pub entries: Vec<SyncLogEntry>,
    pub from_version: i64,
    pub to_version: i64,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Totals for a completed multi-batch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub changes_applied: usize,
    pub from_version: i64,
    pub to_version: i64,
}

/// Fetch one batch of entries with `version > from_version`.
///
/// The fetcher receives `(from_version, limit)` and returns up to `limit`
/// entries in ascending version order. One extra row is requested to decide
/// `has_more` without a second round trip. An empty batch keeps
/// `to_version == from_version`.
pub fn fetch_batch(
    from_version: i64,
    config: &BatchConfig,
    fetcher: &mut impl FnMut(i64, usize) -> Result<Vec<SyncLogEntry>>,
) -> Result<SyncBatch> {
    let mut entries = fetcher(from_version, config.batch_size + 1)?;
    let has_more = entries.len() > config.batch_size;
    entries.truncate(config.batch_size);

    let to_version = entries.last().map(|e| e.version).unwrap_or(from_version);
    let hash = if config.compute_hash && !entries.is_empty() {
        Some(compute_batch_hash(&entries)?)
    } else {
        None
    };

    Ok(SyncBatch {
        entries,
        from_version,
        to_version,
        has_more,
        hash,
    })
}

/// Drain the log from `start`, applying and committing batch by batch.
///
/// `commit_version` runs after each successfully applied batch with that
/// batch's `to_version`, so progress is durable across process restarts: an
/// abort mid-stream leaves the watermark at the last fully applied batch.
pub fn process_all_batches(
    start: i64,
    config: &BatchConfig,
    mut fetcher: impl FnMut(i64, usize) -> Result<Vec<SyncLogEntry>>,
    mut apply: impl FnMut(&SyncBatch) -> Result<usize>,
    mut commit_version: impl FnMut(i64) -> Result<()>,
) -> Result<BatchSummary> {
    let mut summary = BatchSummary {
        changes_applied: 0,
        from_version: start,
        to_version: start,
    };

    loop {
        let batch = fetch_batch(summary.to_version, config, &mut fetcher)?;
        if batch.entries.is_empty() {
            break;
        }
        debug!(
            "processing batch ({}, {}] with {} entries",
            batch.from_version,
            batch.to_version,
            batch.entries.len()
        );

        summary.changes_applied += apply(&batch)?;
        commit_version(batch.to_version)?;
        summary.to_version = batch.to_version;

        if !batch.has_more {
            break;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::log::Operation;
    use serde_json::json;

    fn entries(range: std::ops::RangeInclusive<i64>) -> Vec<SyncLogEntry> {
        range
            .map(|version| SyncLogEntry {
                version,
                table_name: "person".to_string(),
                pk_value: json!({"id": format!("p{}", version)}),
                operation: Operation::Insert,
                payload: Some(json!({"id": format!("p{}", version)})),
                origin: "origin-a".to_string(),
                timestamp: "2025-01-01T00:00:00.000Z".to_string(),
            })
            .collect()
    }

    fn store_fetcher(store: Vec<SyncLogEntry>) -> impl FnMut(i64, usize) -> Result<Vec<SyncLogEntry>> {
        move |from, limit| {
            Ok(store
                .iter()
                .filter(|e| e.version > from)
                .take(limit)
                .cloned()
                .collect())
        }
    }

    #[test]
    fn test_empty_batch_boundary() {
        let config = BatchConfig::default();
        let batch = fetch_batch(5, &config, &mut store_fetcher(Vec::new())).unwrap();
        assert_eq!(batch.to_version, 5);
        assert!(!batch.has_more);
        assert!(batch.entries.is_empty());
        assert!(batch.hash.is_none());
    }

    #[test]
    fn test_has_more_requires_an_extra_row() {
        let config = BatchConfig {
            batch_size: 3,
            ..Default::default()
        };
        let exact = fetch_batch(0, &config, &mut store_fetcher(entries(1..=3))).unwrap();
        assert!(!exact.has_more);
        assert_eq!(exact.to_version, 3);

        let more = fetch_batch(0, &config, &mut store_fetcher(entries(1..=4))).unwrap();
        assert!(more.has_more);
        assert_eq!(more.entries.len(), 3);
        assert_eq!(more.to_version, 3);
    }

    #[test]
    fn test_hash_attached_on_demand() {
        let config = BatchConfig {
            compute_hash: true,
            ..Default::default()
        };
        let batch = fetch_batch(0, &config, &mut store_fetcher(entries(1..=2))).unwrap();
        let expected = compute_batch_hash(&batch.entries).unwrap();
        assert_eq!(batch.hash, Some(expected));
    }

    #[test]
    fn test_process_all_batches_commits_per_batch() {
        let config = BatchConfig {
            batch_size: 2,
            ..Default::default()
        };
        let mut commits = Vec::new();
        let summary = process_all_batches(
            0,
            &config,
            store_fetcher(entries(1..=5)),
            |batch| Ok(batch.entries.len()),
            |version| {
                commits.push(version);
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(summary.changes_applied, 5);
        assert_eq!(summary.from_version, 0);
        assert_eq!(summary.to_version, 5);
        assert_eq!(commits, vec![2, 4, 5]);
    }

    #[test]
    fn test_process_all_batches_empty_store() {
        let summary = process_all_batches(
            7,
            &BatchConfig::default(),
            store_fetcher(Vec::new()),
            |_| Ok(0),
            |_| Ok(()),
        )
        .unwrap();
        assert_eq!(summary.changes_applied, 0);
        assert_eq!(summary.from_version, 7);
        assert_eq!(summary.to_version, 7);
    }

    #[test]
    fn test_batch_wire_form() {
        let batch = SyncBatch {
            entries: entries(1..=1),
            from_version: 0,
            to_version: 1,
            has_more: false,
            hash: None,
        };
        let wire = serde_json::to_string(&batch).unwrap();
        assert!(wire.contains("\"fromVersion\":0"));
        assert!(wire.contains("\"hasMore\":false"));
        assert!(!wire.contains("\"hash\""));
        let back: SyncBatch = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, batch);
    }
}
