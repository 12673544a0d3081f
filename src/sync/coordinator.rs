// src/sync/coordinator.rs

//! Pull, push, and combined sync passes
//!
//! The coordinator is synchronous and strictly sequential per batch; the
//! only suspension points are the caller-supplied fetch/send/apply callbacks.
//! Pull and push are serialized per peer; the coordinator never overlaps
//! them. Cancellation is cooperative: returning an error from any callback
//! aborts the current batch without committing its watermark.
//!
//! Batches carrying a hash are verified before anything is applied. Entries
//! pass through the mapping engine (when one is supplied) between the wire
//! and the applier.

use crate::error::Result;
use crate::hash::{compute_batch_hash, verify_hash};
use crate::mapping::{MappingEngine, SyncDirection};
use crate::sync::apply::apply_batch;
use crate::sync::batch::{BatchConfig, BatchSummary, SyncBatch, process_all_batches};
use crate::sync::log::SyncLogEntry;
use tracing::{debug, info};

/// Result of a combined sync pass
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOutcome {
    pub pulled: BatchSummary,
    pub pushed: BatchSummary,
}

/// Pull remote changes and apply them locally.
///
/// Change capture is suppressed for the whole pass through the RAII guard
/// returned by `suppress`; the guard is released on every exit path. After
/// each fully applied batch, `commit_version` persists the new watermark, so
/// an abort mid-stream resumes from the last committed batch.
pub fn pull<G>(
    local_origin: &str,
    last_version: i64,
    config: &BatchConfig,
    fetch_remote: impl FnMut(i64, usize) -> Result<Vec<SyncLogEntry>>,
    mapper: Option<&MappingEngine>,
    mut apply_local: impl FnMut(&SyncLogEntry) -> Result<bool>,
    suppress: impl FnOnce() -> Result<G>,
    commit_version: impl FnMut(i64) -> Result<()>,
) -> Result<BatchSummary> {
    let _guard = suppress()?;

    let summary = process_all_batches(
        last_version,
        config,
        fetch_remote,
        |batch| {
            verify_incoming(batch)?;
            let entries = map_entries(&batch.entries, mapper, SyncDirection::Pull)?;
            apply_batch(&entries, local_origin, config.max_apply_passes, &mut apply_local)
        },
        commit_version,
    )?;

    info!(
        "pull applied {} change(s), watermark {} -> {}",
        summary.changes_applied, summary.from_version, summary.to_version
    );
    Ok(summary)
}

/// Push local changes to a peer.
///
/// The sender receives whole batches (entries plus hash when configured) and
/// is opaque as to transport. A send failure aborts the push without rolling
/// back local state; the log remains the source of truth and the next push
/// resumes from the last committed push watermark.
pub fn push(
    last_push_version: i64,
    config: &BatchConfig,
    fetch_local: impl FnMut(i64, usize) -> Result<Vec<SyncLogEntry>>,
    mapper: Option<&MappingEngine>,
    mut send_remote: impl FnMut(&SyncBatch) -> Result<()>,
    commit_push_version: impl FnMut(i64) -> Result<()>,
) -> Result<BatchSummary> {
    let summary = process_all_batches(
        last_push_version,
        config,
        fetch_local,
        |batch| {
            let entries = map_entries(&batch.entries, mapper, SyncDirection::Push)?;
            let hash = if config.compute_hash && !entries.is_empty() {
                Some(compute_batch_hash(&entries)?)
            } else {
                None
            };
            let outgoing = SyncBatch {
                entries,
                from_version: batch.from_version,
                to_version: batch.to_version,
                has_more: batch.has_more,
                hash,
            };
            send_remote(&outgoing)?;
            Ok(outgoing.entries.len())
        },
        commit_push_version,
    )?;

    info!(
        "push sent {} change(s), watermark {} -> {}",
        summary.changes_applied, summary.from_version, summary.to_version
    );
    Ok(summary)
}

/// Pull, then push. A pull failure skips the push entirely; a push failure
/// surfaces while the pull's committed progress is retained.
#[allow(clippy::too_many_arguments)]
pub fn sync<G>(
    local_origin: &str,
    last_version: i64,
    last_push_version: i64,
    config: &BatchConfig,
    fetch_remote: impl FnMut(i64, usize) -> Result<Vec<SyncLogEntry>>,
    fetch_local: impl FnMut(i64, usize) -> Result<Vec<SyncLogEntry>>,
    mapper: Option<&MappingEngine>,
    apply_local: impl FnMut(&SyncLogEntry) -> Result<bool>,
    suppress: impl FnOnce() -> Result<G>,
    send_remote: impl FnMut(&SyncBatch) -> Result<()>,
    commit_version: impl FnMut(i64) -> Result<()>,
    commit_push_version: impl FnMut(i64) -> Result<()>,
) -> Result<SyncOutcome> {
    let pulled = pull(
        local_origin,
        last_version,
        config,
        fetch_remote,
        mapper,
        apply_local,
        suppress,
        commit_version,
    )?;
    let pushed = push(
        last_push_version,
        config,
        fetch_local,
        mapper,
        send_remote,
        commit_push_version,
    )?;
    Ok(SyncOutcome { pulled, pushed })
}

fn verify_incoming(batch: &SyncBatch) -> Result<()> {
    if let Some(expected) = &batch.hash {
        let actual = compute_batch_hash(&batch.entries)?;
        verify_hash(expected, &actual)?;
        debug!("batch hash verified ({})", &actual[..12.min(actual.len())]);
    }
    Ok(())
}

fn map_entries(
    entries: &[SyncLogEntry],
    mapper: Option<&MappingEngine>,
    direction: SyncDirection,
) -> Result<Vec<SyncLogEntry>> {
    let Some(mapper) = mapper else {
        return Ok(entries.to_vec());
    };
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        out.extend(mapper.map_entry(entry, direction)?.into_entries());
    }
    Ok(out)
}
