// src/schema/ddl.rs

//! DDL generation and migration execution
//!
//! Operations from the diff planner are rendered as idempotent DDL per engine
//! and executed sequentially. SQLite has transactional DDL, so the runner
//! wraps a plan in one outer transaction; an individual operation failure is
//! recorded and reported without aborting the remaining unrelated operations,
//! so a partial migration is still useful. Destructive operations fail fast
//! unless the caller opted in.

use crate::error::{Error, Result};
use crate::schema::defaults::translate_default;
use crate::schema::diff::{self, SchemaOperation};
use crate::schema::inspect;
use crate::schema::model::{ColumnDefinition, SchemaDefinition, TableDefinition};
use crate::schema::types::Engine;
use rusqlite::Connection;
use tracing::{debug, info, warn};

/// Options honored by the migration runner
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationOptions {
    /// Allow drop-kind operations to execute
    pub allow_destructive: bool,
}

/// Progress callback payload, emitted once per operation
#[derive(Debug)]
pub enum MigrationEvent<'a> {
    Applied {
        table: &'a str,
        kind: &'a str,
    },
    Failed {
        table: &'a str,
        kind: &'a str,
        message: &'a str,
    },
}

/// Outcome of a migration run
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// Descriptions of applied operations, in execution order
    pub applied: Vec<String>,
    /// Failed operations with their error messages
    pub failed: Vec<(String, String)>,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Render one schema operation as DDL statements for the given engine.
///
/// SQLite cannot attach a foreign key to an existing table; those renderings
/// return `InvalidArgument` and surface as per-operation failures in the
/// runner. Unique constraints on existing SQLite tables render as unique
/// indexes, which is the engine's equivalent.
pub fn render_operation(op: &SchemaOperation, engine: Engine) -> Result<Vec<String>> {
    match op {
        SchemaOperation::CreateTable(table) => Ok(vec![render_create_table(table, engine)?]),
        SchemaOperation::DropTable { table } => {
            Ok(vec![format!("DROP TABLE IF EXISTS {}", table)])
        }
        SchemaOperation::AddColumn { table, column } => {
            let rendered = render_column(column, table, engine, false)?;
            Ok(vec![match engine {
                Engine::Sqlite => format!("ALTER TABLE {} ADD COLUMN {}", table, rendered),
                Engine::Postgres => {
                    format!("ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}", table, rendered)
                }
            }])
        }
        SchemaOperation::DropColumn { table, column } => Ok(vec![match engine {
            Engine::Sqlite => format!("ALTER TABLE {} DROP COLUMN {}", table, column),
            Engine::Postgres => {
                format!("ALTER TABLE {} DROP COLUMN IF EXISTS {}", table, column)
            }
        }]),
        SchemaOperation::CreateIndex { table, index } => {
            let unique = if index.unique { "UNIQUE " } else { "" };
            let body = if index.columns.is_empty() {
                index.expressions.join(", ")
            } else {
                index.columns.join(", ")
            };
            Ok(vec![format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                unique, index.name, table, body
            )])
        }
        SchemaOperation::DropIndex { index, .. } => {
            Ok(vec![format!("DROP INDEX IF EXISTS {}", index)])
        }
        SchemaOperation::AddForeignKey { table, foreign_key } => match engine {
            Engine::Sqlite => Err(Error::InvalidArgument(format!(
                "sqlite cannot add foreign key {} to existing table {}",
                foreign_key.name, table
            ))),
            Engine::Postgres => Ok(vec![format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
                table,
                foreign_key.name,
                foreign_key.local_columns.join(", "),
                foreign_key.referenced_table,
                foreign_key.referenced_columns.join(", "),
                foreign_key.on_delete.as_sql(),
                foreign_key.on_update.as_sql()
            )]),
        },
        SchemaOperation::DropForeignKey { table, constraint } => match engine {
            Engine::Sqlite => Err(Error::InvalidArgument(format!(
                "sqlite cannot drop foreign key {} from existing table {}",
                constraint, table
            ))),
            Engine::Postgres => Ok(vec![format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                table, constraint
            )]),
        },
        SchemaOperation::AddUniqueConstraint { table, constraint } => match engine {
            Engine::Sqlite => Ok(vec![format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
                constraint.name,
                table,
                constraint.columns.join(", ")
            )]),
            Engine::Postgres => Ok(vec![format!(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
                table,
                constraint.name,
                constraint.columns.join(", ")
            )]),
        },
        SchemaOperation::DropUniqueConstraint { table, constraint } => match engine {
            Engine::Sqlite => Ok(vec![format!("DROP INDEX IF EXISTS {}", constraint)]),
            Engine::Postgres => Ok(vec![format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                table, constraint
            )]),
        },
    }
}

/// Render a whole plan; fails fast on a destructive operation when the
/// options forbid them. Intended for hosts driving a remote engine through
/// their own driver.
pub fn render_plan(
    ops: &[SchemaOperation],
    engine: Engine,
    options: &MigrationOptions,
) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    for op in ops {
        if op.is_destructive() && !options.allow_destructive {
            return Err(Error::Destructive {
                operation: op.kind().to_string(),
            });
        }
        statements.extend(render_operation(op, engine)?);
    }
    Ok(statements)
}

fn render_create_table(table: &TableDefinition, engine: Engine) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();

    // A single-column integer primary key marked identity becomes the
    // engine's auto-increment form and absorbs the PRIMARY KEY clause.
    let identity_pk = table.primary_key.as_ref().and_then(|pk| {
        if pk.columns.len() != 1 {
            return None;
        }
        table
            .find_column(&pk.columns[0])
            .filter(|c| c.identity)
            .map(|c| c.name.clone())
    });

    for column in &table.columns {
        let is_identity_pk = identity_pk
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(&column.name));
        if is_identity_pk {
            parts.push(match engine {
                Engine::Sqlite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", column.name),
                Engine::Postgres => format!(
                    "{} {} GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY",
                    column.name,
                    column.ty.render(engine)
                ),
            });
        } else {
            parts.push(render_column(column, &table.name, engine, true)?);
        }
    }

    if identity_pk.is_none()
        && let Some(pk) = &table.primary_key
    {
        parts.push(format!("PRIMARY KEY ({})", pk.columns.join(", ")));
    }

    for uc in &table.unique_constraints {
        parts.push(format!(
            "CONSTRAINT {} UNIQUE ({})",
            uc.name,
            uc.columns.join(", ")
        ));
    }

    for fk in &table.foreign_keys {
        let clause = format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            fk.local_columns.join(", "),
            fk.referenced_table,
            fk.referenced_columns.join(", "),
            fk.on_delete.as_sql(),
            fk.on_update.as_sql()
        );
        parts.push(match engine {
            // SQLite keeps no constraint names for inline FKs
            Engine::Sqlite => clause,
            Engine::Postgres => format!("CONSTRAINT {} {}", fk.name, clause),
        });
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        table.qualified_name(),
        parts.join(",\n    ")
    ))
}

fn render_column(
    column: &ColumnDefinition,
    table: &str,
    engine: Engine,
    inline: bool,
) -> Result<String> {
    let mut sql = format!("{} {}", column.name, column.ty.render(engine));

    if column.identity && !inline {
        return Err(Error::InvalidArgument(format!(
            "identity column {}.{} cannot be added after table creation",
            table, column.name
        )));
    }
    if column.identity && engine == Engine::Postgres {
        sql.push_str(" GENERATED BY DEFAULT AS IDENTITY");
    }
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(literal) = &column.default_literal_sql {
        sql.push_str(&format!(" DEFAULT {}", literal));
    } else if let Some(dsl) = &column.default_expression {
        let translated = translate_default(dsl, engine)?;
        // SQLite requires parentheses around non-keyword default expressions
        let needs_parens =
            engine == Engine::Sqlite && translated.ends_with(')') && !translated.starts_with('(');
        if needs_parens {
            sql.push_str(&format!(" DEFAULT ({})", translated));
        } else {
            sql.push_str(&format!(" DEFAULT {}", translated));
        }
    }
    Ok(sql)
}

/// Execute a plan against an embedded SQLite database.
///
/// Runs inside one outer transaction. Destructive operations abort the whole
/// run with `Destructive` when not allowed; any other per-operation failure is
/// recorded in the report and execution continues.
pub fn apply_operations(
    conn: &Connection,
    ops: &[SchemaOperation],
    options: &MigrationOptions,
) -> Result<MigrationReport> {
    apply_operations_with(conn, ops, options, |event| match event {
        MigrationEvent::Applied { table, kind } => debug!("applied {} on {}", kind, table),
        MigrationEvent::Failed {
            table,
            kind,
            message,
        } => warn!("{} on {} failed: {}", kind, table, message),
    })
}

/// Like [`apply_operations`], with a caller-supplied progress callback
pub fn apply_operations_with(
    conn: &Connection,
    ops: &[SchemaOperation],
    options: &MigrationOptions,
    mut on_event: impl FnMut(MigrationEvent<'_>),
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    let tx = conn.unchecked_transaction()?;

    for op in ops {
        if op.is_destructive() && !options.allow_destructive {
            return Err(Error::Destructive {
                operation: op.kind().to_string(),
            });
        }

        let description = format!("{} {}", op.kind(), op.table_name());
        let statements = match render_operation(op, Engine::Sqlite) {
            Ok(statements) => statements,
            Err(e) => {
                let message = e.to_string();
                on_event(MigrationEvent::Failed {
                    table: op.table_name(),
                    kind: op.kind(),
                    message: message.as_str(),
                });
                report.failed.push((description, message));
                continue;
            }
        };

        let mut failed = false;
        for statement in &statements {
            match tx.execute_batch(statement) {
                Ok(()) => {}
                // Re-running an AddColumn is the idempotent no-op SQLite
                // cannot express in its DDL.
                Err(e)
                    if matches!(op, SchemaOperation::AddColumn { .. })
                        && e.to_string().contains("duplicate column name") =>
                {
                    debug!("column already present, skipping: {}", statement);
                }
                Err(e) => {
                    let message = e.to_string();
                    on_event(MigrationEvent::Failed {
                        table: op.table_name(),
                        kind: op.kind(),
                        message: message.as_str(),
                    });
                    report.failed.push((description.clone(), message));
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            on_event(MigrationEvent::Applied {
                table: op.table_name(),
                kind: op.kind(),
            });
            report.applied.push(description);
        }
    }

    tx.commit()?;
    Ok(report)
}

/// Inspect, diff, and apply: bring an embedded database to `desired`.
pub fn migrate(
    conn: &Connection,
    desired: &SchemaDefinition,
    options: &MigrationOptions,
) -> Result<MigrationReport> {
    let current = inspect::inspect_sqlite(conn)?;
    let ops = diff::diff(&current, desired, options.allow_destructive)?;
    info!("migration plan has {} operation(s)", ops.len());
    apply_operations(conn, &ops, options)
}
