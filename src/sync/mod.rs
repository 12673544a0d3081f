// src/sync/mod.rs

//! The replication core
//!
//! Local writes flow through capture triggers into an append-only change log;
//! sync passes page that log in batches, rewrite entries through the optional
//! mapping layer, and apply them on the other side with echo suppression and
//! deferred retry for foreign-key ordering. Per-peer watermarks decide what
//! can be purged and when a peer has fallen too far behind to serve
//! incrementally.

pub mod apply;
pub mod batch;
pub mod clients;
pub mod conflict;
pub mod coordinator;
pub mod log;
pub mod session;
pub mod subscription;

pub use apply::{apply_batch, apply_entry_sqlite};
pub use batch::{BatchConfig, BatchSummary, SyncBatch};
pub use clients::SyncClient;
pub use conflict::{ConflictStrategy, Resolution};
pub use coordinator::{SyncOutcome, pull, push, sync};
pub use log::{Operation, SyncLogEntry};
pub use session::SuppressionGuard;
pub use subscription::{SubscriptionType, SyncSubscription};
