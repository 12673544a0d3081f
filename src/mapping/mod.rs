// src/mapping/mod.rs

//! Row-level data mapping between non-identical schemas
//!
//! A versioned JSON mapping configuration describes how entries for a source
//! table are rewritten before they are applied on (or sent to) a peer:
//! column renames, constants, LQL transforms, excluded columns, primary-key
//! renames, row filters, change tracking stamps, and multi-target fan-out.
//!
//! The engine is pure: it rewrites [`SyncLogEntry`] values and never touches
//! a database.

pub mod lql;

use crate::error::{Error, Result};
use crate::hash::canonical_json;
use crate::sync::log::{Operation, SyncLogEntry};
use lql::LqlExpression;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

/// The only defined config version; forward-incompatible changes bump this
pub const CONFIG_VERSION: &str = "1.0";

/// What happens to entries whose table has no enabled mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UnmappedTableBehavior {
    /// Skip the entry with a reason
    Strict,
    /// Pass the entry through unchanged
    #[default]
    Passthrough,
}

/// Which sync direction a mapping participates in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    Push,
    Pull,
    Both,
}

impl SyncDirection {
    fn covers(&self, requested: SyncDirection) -> bool {
        *self == SyncDirection::Both || *self == requested
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TransformKind {
    #[default]
    None,
    Constant,
    Lql,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub target: String,
    #[serde(default)]
    pub transform: TransformKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lql: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkMapping {
    pub source_column: String,
    pub target_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LqlFilter {
    pub lql: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingStrategy {
    /// Stamp the source entry's log version
    Version,
    /// Stamp the SHA-256 of the canonical source payload
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTracking {
    pub enabled: bool,
    pub tracking_column: String,
    pub strategy: TrackingStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetMapping {
    pub table: String,
    #[serde(default)]
    pub column_mappings: Vec<ColumnMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMapping {
    pub id: String,
    pub source_table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_table: Option<String>,
    pub direction: SyncDirection,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk_mapping: Option<PkMapping>,
    #[serde(default)]
    pub column_mappings: Vec<ColumnMapping>,
    #[serde(default)]
    pub excluded_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<LqlFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_tracking: Option<SyncTracking>,
    #[serde(default)]
    pub multi_target: bool,
    #[serde(default)]
    pub targets: Vec<TargetMapping>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    pub version: String,
    #[serde(default)]
    pub unmapped_table_behavior: UnmappedTableBehavior,
    #[serde(default)]
    pub mappings: Vec<TableMapping>,
}

impl MappingConfig {
    pub fn from_json(source: &str) -> Result<Self> {
        let config: MappingConfig = serde_json::from_str(source)
            .map_err(|e| Error::InvalidArgument(format!("mapping config: {}", e)))?;
        if config.version != CONFIG_VERSION {
            return Err(Error::InvalidArgument(format!(
                "unsupported mapping config version {} (expected {})",
                config.version, CONFIG_VERSION
            )));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// What the engine decided for one entry
#[derive(Debug, Clone)]
pub enum MappingOutcome {
    /// No mapping applies and passthrough is allowed
    Unchanged(SyncLogEntry),
    /// Rewritten entries, one per target table
    Mapped(Vec<SyncLogEntry>),
    /// Dropped, with the reason
    Skipped { reason: String },
}

impl MappingOutcome {
    /// The entries to forward downstream
    pub fn into_entries(self) -> Vec<SyncLogEntry> {
        match self {
            MappingOutcome::Unchanged(entry) => vec![entry],
            MappingOutcome::Mapped(entries) => entries,
            MappingOutcome::Skipped { .. } => Vec::new(),
        }
    }
}

/// Applies a [`MappingConfig`] to log entries
pub struct MappingEngine {
    config: MappingConfig,
}

impl MappingEngine {
    /// Validate the config and build an engine.
    ///
    /// Transform consistency (a Constant carries a value, an Lql transform
    /// parses) is checked here so bad configs fail at load time, not
    /// mid-sync.
    pub fn new(config: MappingConfig) -> Result<Self> {
        if config.version != CONFIG_VERSION {
            return Err(Error::InvalidArgument(format!(
                "unsupported mapping config version {}",
                config.version
            )));
        }
        for mapping in &config.mappings {
            for cm in mapping
                .column_mappings
                .iter()
                .chain(mapping.targets.iter().flat_map(|t| t.column_mappings.iter()))
            {
                match cm.transform {
                    TransformKind::Constant if cm.value.is_none() => {
                        return Err(Error::InvalidArgument(format!(
                            "mapping {}: constant column {} has no value",
                            mapping.id, cm.target
                        )));
                    }
                    TransformKind::Lql => {
                        let Some(lql) = &cm.lql else {
                            return Err(Error::InvalidArgument(format!(
                                "mapping {}: LQL column {} has no expression",
                                mapping.id, cm.target
                            )));
                        };
                        LqlExpression::parse(lql)?;
                    }
                    _ => {}
                }
            }
            if let Some(filter) = &mapping.filter {
                LqlExpression::parse(&filter.lql)?;
            }
            if mapping.multi_target && mapping.targets.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "mapping {}: multi_target set but no targets given",
                    mapping.id
                )));
            }
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Rewrite one entry for the given sync direction
    pub fn map_entry(
        &self,
        entry: &SyncLogEntry,
        direction: SyncDirection,
    ) -> Result<MappingOutcome> {
        let mapping = self.config.mappings.iter().find(|m| {
            m.enabled
                && m.direction.covers(direction)
                && m.source_table.eq_ignore_ascii_case(&entry.table_name)
        });

        let Some(mapping) = mapping else {
            return Ok(match self.config.unmapped_table_behavior {
                UnmappedTableBehavior::Passthrough => MappingOutcome::Unchanged(entry.clone()),
                UnmappedTableBehavior::Strict => MappingOutcome::Skipped {
                    reason: format!("no mapping for table {}", entry.table_name),
                },
            });
        };

        // Row filter applies where there is a row to look at
        if let (Some(filter), Some(Value::Object(payload))) = (&mapping.filter, &entry.payload) {
            let keep = lql::evaluate(&filter.lql, payload)?;
            if !is_truthy(&keep) {
                debug!(
                    "mapping {} filtered out {} (pk {})",
                    mapping.id, entry.table_name, entry.pk_value
                );
                return Ok(MappingOutcome::Skipped {
                    reason: format!("filtered by mapping {}", mapping.id),
                });
            }
        }

        if mapping.multi_target {
            let entries = mapping
                .targets
                .iter()
                .map(|t| apply_target(entry, mapping, &t.table, &t.column_mappings))
                .collect::<Result<Vec<_>>>()?;
            return Ok(MappingOutcome::Mapped(entries));
        }

        let target_table = mapping
            .target_table
            .clone()
            .unwrap_or_else(|| mapping.source_table.clone());
        let mapped = apply_target(entry, mapping, &target_table, &mapping.column_mappings)?;
        Ok(MappingOutcome::Mapped(vec![mapped]))
    }
}

fn apply_target(
    entry: &SyncLogEntry,
    mapping: &TableMapping,
    target_table: &str,
    column_mappings: &[ColumnMapping],
) -> Result<SyncLogEntry> {
    let pk_value = rewrite_pk(&entry.pk_value, mapping.pk_mapping.as_ref());

    // Deletes carry no payload; only the key is rewritten
    let payload = match (&entry.operation, &entry.payload) {
        (Operation::Delete, _) | (_, None) => None,
        (_, Some(Value::Object(source))) => Some(Value::Object(rebuild_payload(
            source,
            entry,
            mapping,
            column_mappings,
        )?)),
        (_, Some(other)) => {
            return Err(Error::InvalidArgument(format!(
                "payload for {} is not a row object: {}",
                entry.table_name, other
            )));
        }
    };

    Ok(SyncLogEntry {
        version: entry.version,
        table_name: target_table.to_string(),
        pk_value,
        operation: entry.operation,
        payload,
        origin: entry.origin.clone(),
        timestamp: entry.timestamp.clone(),
    })
}

fn rebuild_payload(
    source: &Map<String, Value>,
    entry: &SyncLogEntry,
    mapping: &TableMapping,
    column_mappings: &[ColumnMapping],
) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for cm in column_mappings {
        let value = match cm.transform {
            TransformKind::None => {
                let source_name = cm.source.as_deref().unwrap_or(&cm.target);
                source
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(source_name))
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Null)
            }
            TransformKind::Constant => cm.value.clone().unwrap_or(Value::Null),
            TransformKind::Lql => {
                let lql = cm.lql.as_deref().unwrap_or_default();
                lql::evaluate(lql, source)?
            }
        };
        out.insert(cm.target.clone(), value);
    }

    // Exclusions run after emission, so a mapped-then-excluded column stays out
    for excluded in &mapping.excluded_columns {
        let keys: Vec<String> = out
            .keys()
            .filter(|k| k.eq_ignore_ascii_case(excluded))
            .cloned()
            .collect();
        for key in keys {
            out.remove(&key);
        }
    }

    if let Some(tracking) = &mapping.sync_tracking
        && tracking.enabled
    {
        let stamp = match tracking.strategy {
            TrackingStrategy::Version => Value::from(entry.version),
            TrackingStrategy::Hash => {
                let mut hasher = Sha256::new();
                hasher.update(canonical_json(&Value::Object(source.clone())).as_bytes());
                Value::from(format!("{:x}", hasher.finalize()))
            }
        };
        out.insert(tracking.tracking_column.clone(), stamp);
    }

    Ok(out)
}

fn rewrite_pk(pk: &Value, pk_mapping: Option<&PkMapping>) -> Value {
    let Some(pk_mapping) = pk_mapping else {
        return pk.clone();
    };
    let Value::Object(map) = pk else {
        return pk.clone();
    };
    let mut out = Map::new();
    for (key, value) in map {
        if key.eq_ignore_ascii_case(&pk_mapping.source_column) {
            out.insert(pk_mapping.target_column.clone(), value.clone());
        } else {
            out.insert(key.clone(), value.clone());
        }
    }
    Value::Object(out)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => true,
    }
}
