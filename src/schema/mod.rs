// src/schema/mod.rs

//! Declarative schema management
//!
//! This module holds the schema/migration core:
//! - Engine-neutral column types with per-engine rendering
//! - A default-expression DSL translated to each engine's SQL
//! - A declarative schema model with a fluent builder
//! - A live-schema inspector for the embedded engine
//! - A pure diff planner producing an ordered operation list
//! - An idempotent DDL generator and migration runner
//!
//! Planning is pure (`diff`); only the runner touches a database.

pub mod ddl;
pub mod defaults;
pub mod diff;
pub mod inspect;
pub mod model;
pub mod types;

pub use ddl::{MigrationOptions, MigrationReport, migrate};
pub use diff::{SchemaOperation, diff};
pub use model::{SchemaBuilder, SchemaDefinition, TableDefinition};
pub use types::{Engine, IntegerWidth, PortableType};
