// src/lib.rs

//! Tributary Replication Engine
//!
//! Embedded bi-directional database replication between heterogeneous SQL
//! stores, preserving causal per-origin ordering across intermittently
//! connected peers that each mutate data independently.
//!
//! # Architecture
//!
//! - Change capture: triggers append row-level changes to an append-only log
//!   with an engine-assigned monotonic version
//! - Suppression: a session flag silences capture while remote changes replay
//! - Sync passes: batched pull/push with per-batch watermark commits,
//!   deferred retry for foreign-key ordering, and optional hash verification
//! - Conflicts: last-write-wins, server-wins, client-wins, or custom
//! - Mapping: a configurable transform layer (with the LQL expression
//!   language) lets two peers exchange data under non-identical schemas
//! - Migrations: declarative schema model, pure diff planner, idempotent DDL

pub mod db;
mod error;
pub mod hash;
pub mod mapping;
pub mod schema;
pub mod sync;

pub use error::{Error, Result};
