// src/schema/inspect.rs

//! Live schema inspection for the embedded engine
//!
//! Reads `sqlite_master` plus the table/index/foreign-key PRAGMAs back into a
//! [`SchemaDefinition`] so the diff planner can compare a running database
//! against a desired model.
//!
//! SQLite keeps neither foreign-key nor unique-constraint names, so the
//! inspector derives them with the same formulas the schema builder uses
//! (`fk_<table>_<columns>`, `uq_<table>_<columns>`); unnamed constraints
//! therefore survive a full migration round-trip. Unique
//! indexes named with the `uq_` prefix are mapped back to unique constraints,
//! matching how the DDL generator expresses `AddUniqueConstraint` on this
//! engine. Replication metadata tables (`_sync_*`) are not part of user
//! schema and are skipped.

use crate::error::Result;
use crate::schema::model::{
    ColumnDefinition, FkAction, ForeignKeyDefinition, IndexDefinition, PrimaryKeyDefinition,
    SchemaDefinition, TableDefinition, UniqueConstraintDefinition, derived_fk_name,
    derived_unique_name,
};
use crate::schema::types::{Engine, PortableType};
use rusqlite::Connection;
use std::collections::BTreeMap;
use tracing::debug;

/// Inspect the full user schema of an embedded database
pub fn inspect_sqlite(conn: &Connection) -> Result<SchemaDefinition> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master
         WHERE type = 'table'
           AND name NOT LIKE 'sqlite_%'
           AND name NOT LIKE '\\_sync\\_%' ESCAPE '\\'
         ORDER BY rowid",
    )?;
    let tables: Vec<(String, Option<String>)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut schema = SchemaDefinition::default();
    for (name, sql) in tables {
        schema.tables.push(inspect_table(conn, &name, sql.as_deref())?);
    }
    debug!("inspected {} user table(s)", schema.tables.len());
    Ok(schema)
}

fn inspect_table(
    conn: &Connection,
    table: &str,
    create_sql: Option<&str>,
) -> Result<TableDefinition> {
    let has_autoincrement = create_sql
        .map(|s| s.to_ascii_uppercase().contains("AUTOINCREMENT"))
        .unwrap_or(false);

    // cid, name, type, notnull, dflt_value, pk
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quoted(table)))?;
    let raw_columns: Vec<(String, String, bool, Option<String>, i32)> = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i32>(3)? != 0,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i32>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut columns = Vec::new();
    let mut pk_cols: Vec<(i32, String)> = Vec::new();
    for (name, declared, not_null, default, pk_ord) in raw_columns {
        let ty = PortableType::parse_native(&declared, Engine::Sqlite)
            .unwrap_or(PortableType::Text);
        let mut column = ColumnDefinition::new(&name, ty);
        column.nullable = !not_null && pk_ord == 0;
        if let Some(default) = default {
            column.default_literal_sql = Some(default);
        }
        if pk_ord > 0 {
            // Single integer pk with AUTOINCREMENT is an identity column
            if has_autoincrement && ty.is_integer() {
                column.identity = true;
            }
            pk_cols.push((pk_ord, name.clone()));
        }
        columns.push(column);
    }
    pk_cols.sort_by_key(|(ord, _)| *ord);
    let primary_key = if pk_cols.is_empty() {
        None
    } else {
        Some(PrimaryKeyDefinition {
            columns: pk_cols.into_iter().map(|(_, c)| c).collect(),
        })
    };

    let (indexes, unique_constraints) = inspect_indexes(conn, table)?;
    let foreign_keys = inspect_foreign_keys(conn, table)?;

    Ok(TableDefinition {
        schema: None,
        name: table.to_string(),
        columns,
        primary_key,
        indexes,
        foreign_keys,
        unique_constraints,
    })
}

fn inspect_indexes(
    conn: &Connection,
    table: &str,
) -> Result<(Vec<IndexDefinition>, Vec<UniqueConstraintDefinition>)> {
    // seq, name, unique, origin, partial
    let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", quoted(table)))?;
    let raw: Vec<(String, bool, String)> = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, i32>(2)? != 0,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut indexes = Vec::new();
    let mut constraints = Vec::new();
    for (name, unique, origin) in raw {
        if origin == "pk" {
            continue;
        }
        let columns = index_columns(conn, &name)?;
        if origin == "u" {
            // Inline UNIQUE(...) clause; SQLite names the auto-index itself,
            // so reconstruct the derived constraint name.
            constraints.push(UniqueConstraintDefinition {
                name: derived_unique_name(table, &columns),
                columns,
            });
            continue;
        }
        if unique && name.to_lowercase().starts_with("uq_") {
            // AddUniqueConstraint renders as a unique index on this engine
            constraints.push(UniqueConstraintDefinition { name, columns });
            continue;
        }
        let expressions = if columns.is_empty() {
            index_expressions(conn, &name)?
        } else {
            Vec::new()
        };
        indexes.push(IndexDefinition {
            name,
            unique,
            columns,
            expressions,
        });
    }
    Ok((indexes, constraints))
}

/// Column names of an index; expression members come back NULL and are dropped
fn index_columns(conn: &Connection, index: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA index_info({})", quoted(index)))?;
    let cols: Vec<Option<String>> = stmt
        .query_map([], |row| row.get::<_, Option<String>>(2))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(cols.into_iter().flatten().collect())
}

/// Recover the body of an expression index from its CREATE INDEX text.
///
/// SQLite's PRAGMAs cannot return expression members, so this is best-effort;
/// an index whose definition cannot be recovered keeps an empty body and is
/// still matched by name in the diff.
fn index_expressions(conn: &Connection, index: &str) -> Result<Vec<String>> {
    let sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'index' AND name = ?1",
            [index],
            |row| row.get(0),
        )
        .unwrap_or(None);
    let Some(sql) = sql else {
        return Ok(Vec::new());
    };
    let Some(open) = sql.find('(') else {
        return Ok(Vec::new());
    };
    let Some(close) = sql.rfind(')') else {
        return Ok(Vec::new());
    };
    if close <= open {
        return Ok(Vec::new());
    }
    Ok(vec![sql[open + 1..close].trim().to_string()])
}

fn inspect_foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKeyDefinition>> {
    // id, seq, table, from, to, on_update, on_delete, match
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", quoted(table)))?;
    let raw: Vec<(i64, String, String, Option<String>, String, String)> = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // Composite keys arrive as one row per column, grouped by id
    let mut groups: BTreeMap<i64, ForeignKeyDefinition> = BTreeMap::new();
    for (id, ref_table, from, to, on_update, on_delete) in raw {
        let entry = groups.entry(id).or_insert_with(|| ForeignKeyDefinition {
            name: String::new(),
            local_columns: Vec::new(),
            referenced_table: ref_table.clone(),
            referenced_columns: Vec::new(),
            on_delete: on_delete.parse().unwrap_or_default(),
            on_update: on_update.parse().unwrap_or_default(),
        });
        entry.local_columns.push(from);
        if let Some(to) = to {
            entry.referenced_columns.push(to);
        }
    }

    Ok(groups
        .into_values()
        .map(|mut fk| {
            fk.name = derived_fk_name(table, &fk.local_columns);
            fk
        })
        .collect())
}

fn quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE parent (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 code TEXT NOT NULL,
                 CONSTRAINT uq UNIQUE (code)
             );
             CREATE TABLE child (
                 id TEXT NOT NULL,
                 parent_id INTEGER,
                 note TEXT DEFAULT 'none',
                 PRIMARY KEY (id),
                 FOREIGN KEY (parent_id) REFERENCES parent (id) ON DELETE CASCADE ON UPDATE NO ACTION
             );
             CREATE INDEX ix_child_parent ON child (parent_id);
             CREATE INDEX ix_child_lower_note ON child (lower(note));
             CREATE TABLE _sync_log (version INTEGER PRIMARY KEY);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_inspect_tables_and_columns() {
        let conn = setup();
        let schema = inspect_sqlite(&conn).unwrap();

        assert_eq!(schema.tables.len(), 2, "metadata tables are skipped");
        let parent = schema.find_table("parent").unwrap();
        assert!(parent.columns[0].identity);
        let child = schema.find_table("child").unwrap();
        assert_eq!(
            child.find_column("note").unwrap().default_literal_sql,
            Some("'none'".to_string())
        );
        assert_eq!(
            child.primary_key.as_ref().unwrap().columns,
            vec!["id".to_string()]
        );
    }

    #[test]
    fn test_inspect_foreign_keys_with_derived_names() {
        let conn = setup();
        let schema = inspect_sqlite(&conn).unwrap();
        let child = schema.find_table("child").unwrap();

        assert_eq!(child.foreign_keys.len(), 1);
        let fk = &child.foreign_keys[0];
        assert_eq!(fk.name, "fk_child_parent_id");
        assert_eq!(fk.referenced_table, "parent");
        assert_eq!(fk.on_delete, FkAction::Cascade);
    }

    #[test]
    fn test_inspect_unique_constraint_from_inline_clause() {
        let conn = setup();
        let schema = inspect_sqlite(&conn).unwrap();
        let parent = schema.find_table("parent").unwrap();

        assert_eq!(parent.unique_constraints.len(), 1);
        assert_eq!(parent.unique_constraints[0].name, "uq_parent_code");
    }

    #[test]
    fn test_inspect_expression_index() {
        let conn = setup();
        let schema = inspect_sqlite(&conn).unwrap();
        let child = schema.find_table("child").unwrap();

        let expr = child
            .indexes
            .iter()
            .find(|i| i.name == "ix_child_lower_note")
            .unwrap();
        assert!(expr.columns.is_empty());
        assert_eq!(expr.expressions, vec!["lower(note)".to_string()]);
    }
}
