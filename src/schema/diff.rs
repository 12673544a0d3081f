// src/schema/diff.rs

//! Pure schema diff planner
//!
//! `diff(current, desired, allow_destructive)` produces an ordered operation
//! list and performs no I/O. Tables and columns are matched by name
//! (case-insensitive); indexes, foreign keys and unique constraints are
//! matched by name only; definition changes under an unchanged name are not
//! detected. Callers who change an index body must rename it (or opt into
//! destructive mode, drop the old name and recreate).
//!
//! Additive operations come first, grouped by kind; drop-kind operations are
//! only emitted when destructive mode is enabled and always follow the
//! additive ones, children before parents.

use crate::error::Result;
use crate::schema::model::{
    ColumnDefinition, ForeignKeyDefinition, IndexDefinition, SchemaDefinition, TableDefinition,
    UniqueConstraintDefinition,
};

/// A single planned schema change
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOperation {
    CreateTable(TableDefinition),
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: ColumnDefinition,
    },
    DropColumn {
        table: String,
        column: String,
    },
    CreateIndex {
        table: String,
        index: IndexDefinition,
    },
    DropIndex {
        table: String,
        index: String,
    },
    AddForeignKey {
        table: String,
        foreign_key: ForeignKeyDefinition,
    },
    DropForeignKey {
        table: String,
        constraint: String,
    },
    AddUniqueConstraint {
        table: String,
        constraint: UniqueConstraintDefinition,
    },
    DropUniqueConstraint {
        table: String,
        constraint: String,
    },
}

impl SchemaOperation {
    /// Whether applying this operation removes something
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            SchemaOperation::DropTable { .. }
                | SchemaOperation::DropColumn { .. }
                | SchemaOperation::DropIndex { .. }
                | SchemaOperation::DropForeignKey { .. }
                | SchemaOperation::DropUniqueConstraint { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SchemaOperation::CreateTable(_) => "CreateTable",
            SchemaOperation::DropTable { .. } => "DropTable",
            SchemaOperation::AddColumn { .. } => "AddColumn",
            SchemaOperation::DropColumn { .. } => "DropColumn",
            SchemaOperation::CreateIndex { .. } => "CreateIndex",
            SchemaOperation::DropIndex { .. } => "DropIndex",
            SchemaOperation::AddForeignKey { .. } => "AddForeignKey",
            SchemaOperation::DropForeignKey { .. } => "DropForeignKey",
            SchemaOperation::AddUniqueConstraint { .. } => "AddUniqueConstraint",
            SchemaOperation::DropUniqueConstraint { .. } => "DropUniqueConstraint",
        }
    }

    /// Name of the table this operation touches
    pub fn table_name(&self) -> &str {
        match self {
            SchemaOperation::CreateTable(t) => &t.name,
            SchemaOperation::DropTable { table }
            | SchemaOperation::AddColumn { table, .. }
            | SchemaOperation::DropColumn { table, .. }
            | SchemaOperation::CreateIndex { table, .. }
            | SchemaOperation::DropIndex { table, .. }
            | SchemaOperation::AddForeignKey { table, .. }
            | SchemaOperation::DropForeignKey { table, .. }
            | SchemaOperation::AddUniqueConstraint { table, .. }
            | SchemaOperation::DropUniqueConstraint { table, .. } => table,
        }
    }
}

/// Compute the ordered operation list that takes `current` to `desired`.
///
/// With `allow_destructive = false` (the default posture) the plan is
/// additive-only: drop-kind operations are suppressed entirely.
pub fn diff(
    current: &SchemaDefinition,
    desired: &SchemaDefinition,
    allow_destructive: bool,
) -> Result<Vec<SchemaOperation>> {
    current.validate()?;
    desired.validate()?;

    let mut creates = Vec::new();
    let mut add_columns = Vec::new();
    let mut create_indexes = Vec::new();
    let mut add_fks = Vec::new();
    let mut add_uniques = Vec::new();

    for table in &desired.tables {
        match current.find_table(&table.name) {
            None => {
                // New table: columns, primary key, foreign keys and unique
                // constraints ride inside CreateTable; indexes are separate
                // statements on every engine.
                creates.push(SchemaOperation::CreateTable(table.clone()));
                for index in &table.indexes {
                    create_indexes.push(SchemaOperation::CreateIndex {
                        table: table.name.clone(),
                        index: index.clone(),
                    });
                }
            }
            Some(existing) => {
                for column in &table.columns {
                    if existing.find_column(&column.name).is_none() {
                        add_columns.push(SchemaOperation::AddColumn {
                            table: table.name.clone(),
                            column: column.clone(),
                        });
                    }
                }
                for index in &table.indexes {
                    let present = existing
                        .indexes
                        .iter()
                        .any(|i| i.name.eq_ignore_ascii_case(&index.name));
                    if !present {
                        create_indexes.push(SchemaOperation::CreateIndex {
                            table: table.name.clone(),
                            index: index.clone(),
                        });
                    }
                }
                for fk in &table.foreign_keys {
                    let present = existing
                        .foreign_keys
                        .iter()
                        .any(|f| f.name.eq_ignore_ascii_case(&fk.name));
                    if !present {
                        add_fks.push(SchemaOperation::AddForeignKey {
                            table: table.name.clone(),
                            foreign_key: fk.clone(),
                        });
                    }
                }
                for uc in &table.unique_constraints {
                    let present = existing
                        .unique_constraints
                        .iter()
                        .any(|u| u.name.eq_ignore_ascii_case(&uc.name));
                    if !present {
                        add_uniques.push(SchemaOperation::AddUniqueConstraint {
                            table: table.name.clone(),
                            constraint: uc.clone(),
                        });
                    }
                }
            }
        }
    }

    let mut ops = creates;
    ops.extend(add_columns);
    ops.extend(create_indexes);
    ops.extend(add_fks);
    ops.extend(add_uniques);

    if allow_destructive {
        let mut drop_uniques = Vec::new();
        let mut drop_fks = Vec::new();
        let mut drop_indexes = Vec::new();
        let mut drop_columns = Vec::new();
        let mut drop_tables = Vec::new();

        for table in &current.tables {
            match desired.find_table(&table.name) {
                None => drop_tables.push(SchemaOperation::DropTable {
                    table: table.name.clone(),
                }),
                Some(target) => {
                    for uc in &table.unique_constraints {
                        let kept = target
                            .unique_constraints
                            .iter()
                            .any(|u| u.name.eq_ignore_ascii_case(&uc.name));
                        if !kept {
                            drop_uniques.push(SchemaOperation::DropUniqueConstraint {
                                table: table.name.clone(),
                                constraint: uc.name.clone(),
                            });
                        }
                    }
                    for fk in &table.foreign_keys {
                        let kept = target
                            .foreign_keys
                            .iter()
                            .any(|f| f.name.eq_ignore_ascii_case(&fk.name));
                        if !kept {
                            drop_fks.push(SchemaOperation::DropForeignKey {
                                table: table.name.clone(),
                                constraint: fk.name.clone(),
                            });
                        }
                    }
                    for index in &table.indexes {
                        let kept = target
                            .indexes
                            .iter()
                            .any(|i| i.name.eq_ignore_ascii_case(&index.name));
                        if !kept {
                            drop_indexes.push(SchemaOperation::DropIndex {
                                table: table.name.clone(),
                                index: index.name.clone(),
                            });
                        }
                    }
                    for column in &table.columns {
                        if target.find_column(&column.name).is_none() {
                            drop_columns.push(SchemaOperation::DropColumn {
                                table: table.name.clone(),
                                column: column.name.clone(),
                            });
                        }
                    }
                }
            }
        }

        // Tables drop children-first: reverse of creation order.
        drop_tables.reverse();

        ops.extend(drop_uniques);
        ops.extend(drop_fks);
        ops.extend(drop_indexes);
        ops.extend(drop_columns);
        ops.extend(drop_tables);
    }

    Ok(ops)
}
