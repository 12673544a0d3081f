// src/schema/model.rs

//! Declarative schema model and builder
//!
//! Tables, columns, indexes (column and expression), foreign keys and unique
//! constraints, described independently of any engine. Table order is
//! preserved from the builder because creation order must satisfy foreign-key
//! dependencies; the diff planner reuses it when emitting creations.
//!
//! Identifier comparison is case-insensitive throughout.

use crate::error::{Error, Result};
use crate::schema::types::PortableType;
use std::str::FromStr;

/// Referential action on delete/update of the parent row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FkAction {
    #[default]
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
}

impl FkAction {
    pub fn as_sql(&self) -> &str {
        match self {
            FkAction::NoAction => "NO ACTION",
            FkAction::Cascade => "CASCADE",
            FkAction::SetNull => "SET NULL",
            FkAction::SetDefault => "SET DEFAULT",
            FkAction::Restrict => "RESTRICT",
        }
    }
}

impl FromStr for FkAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NO ACTION" => Ok(FkAction::NoAction),
            "CASCADE" => Ok(FkAction::Cascade),
            "SET NULL" => Ok(FkAction::SetNull),
            "SET DEFAULT" => Ok(FkAction::SetDefault),
            "RESTRICT" => Ok(FkAction::Restrict),
            _ => Err(format!("Invalid foreign key action: {}", s)),
        }
    }
}

/// A single column
///
/// At most one of `default_literal_sql` / `default_expression` may be set:
/// the former is emitted verbatim, the latter goes through the
/// default-expression translator (which lowercases, including quoted string
/// content; use a literal for case-significant defaults).
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub ty: PortableType,
    pub nullable: bool,
    pub identity: bool,
    pub default_literal_sql: Option<String>,
    pub default_expression: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: &str, ty: PortableType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: true,
            identity: false,
            default_literal_sql: None,
            default_expression: None,
        }
    }

    pub fn not_null(&mut self) -> &mut Self {
        self.nullable = false;
        self
    }

    /// Engine-assigned auto-incrementing identity; requires an integer type
    pub fn identity(&mut self) -> &mut Self {
        self.identity = true;
        self
    }

    /// Verbatim SQL default, e.g. `'Pending'`
    pub fn default_literal(&mut self, sql: &str) -> &mut Self {
        self.default_literal_sql = Some(sql.to_string());
        self
    }

    /// DSL default, e.g. `now()` or `gen_uuid()`
    pub fn default_expression(&mut self, dsl: &str) -> &mut Self {
        self.default_expression = Some(dsl.to_string());
        self
    }
}

/// A column index or an expression index; exactly one of `columns` /
/// `expressions` is non-empty. Indexes are matched by name only; two
/// indexes with the same name but different bodies are not reconciled.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
    pub expressions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub local_columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: FkAction,
    pub on_update: FkAction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniqueConstraintDefinition {
    pub name: String,
    pub columns: Vec<String>,
}

/// Ordered primary key columns
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKeyDefinition {
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Option<PrimaryKeyDefinition>,
    pub indexes: Vec<IndexDefinition>,
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    pub unique_constraints: Vec<UniqueConstraintDefinition>,
}

impl TableDefinition {
    pub fn find_column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Schema-qualified name where a schema is set
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(s) => format!("{}.{}", s, self.name),
            None => self.name.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&col.name))
            {
                return Err(Error::InvalidArgument(format!(
                    "table {} has duplicate column {}",
                    self.name, col.name
                )));
            }
            if col.identity && !col.ty.is_integer() {
                return Err(Error::InvalidArgument(format!(
                    "identity column {}.{} must be an integer type",
                    self.name, col.name
                )));
            }
            if col.default_literal_sql.is_some() && col.default_expression.is_some() {
                return Err(Error::InvalidArgument(format!(
                    "column {}.{} sets both a literal and an expression default",
                    self.name, col.name
                )));
            }
        }
        for idx in &self.indexes {
            if idx.columns.is_empty() == idx.expressions.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "index {} must have exactly one of columns or expressions",
                    idx.name
                )));
            }
        }
        Ok(())
    }
}

/// An ordered set of tables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDefinition {
    pub tables: Vec<TableDefinition>,
}

impl SchemaDefinition {
    pub fn find_table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn validate(&self) -> Result<()> {
        for (i, table) in self.tables.iter().enumerate() {
            if self.tables[..i]
                .iter()
                .any(|t| t.name.eq_ignore_ascii_case(&table.name))
            {
                return Err(Error::InvalidArgument(format!(
                    "duplicate table {}",
                    table.name
                )));
            }
            table.validate()?;
        }
        Ok(())
    }
}

/// Default constraint name for an unnamed foreign key.
///
/// The SQLite inspector derives the same name, so an unnamed foreign key
/// survives a full migration round-trip (build, apply, inspect, diff).
pub fn derived_fk_name(table: &str, local_columns: &[String]) -> String {
    format!(
        "fk_{}_{}",
        table.to_lowercase(),
        local_columns
            .iter()
            .map(|c| c.to_lowercase())
            .collect::<Vec<_>>()
            .join("_")
    )
}

/// Default constraint name for an unnamed unique constraint
pub fn derived_unique_name(table: &str, columns: &[String]) -> String {
    format!(
        "uq_{}_{}",
        table.to_lowercase(),
        columns
            .iter()
            .map(|c| c.to_lowercase())
            .collect::<Vec<_>>()
            .join("_")
    )
}

/// Fluent builder for a [`SchemaDefinition`]
pub struct SchemaBuilder {
    tables: Vec<TableDefinition>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    /// Add a table; declaration order is creation order
    pub fn table(mut self, name: &str, f: impl FnOnce(&mut TableBuilder)) -> Self {
        let mut builder = TableBuilder {
            table: TableDefinition {
                schema: None,
                name: name.to_string(),
                columns: Vec::new(),
                primary_key: None,
                indexes: Vec::new(),
                foreign_keys: Vec::new(),
                unique_constraints: Vec::new(),
            },
        };
        f(&mut builder);
        self.tables.push(builder.table);
        self
    }

    pub fn build(self) -> Result<SchemaDefinition> {
        let schema = SchemaDefinition {
            tables: self.tables,
        };
        schema.validate()?;
        Ok(schema)
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TableBuilder {
    table: TableDefinition,
}

impl TableBuilder {
    pub fn schema(&mut self, schema: &str) -> &mut Self {
        self.table.schema = Some(schema.to_string());
        self
    }

    /// Add a column and return it for further configuration
    pub fn column(&mut self, name: &str, ty: PortableType) -> &mut ColumnDefinition {
        self.table.columns.push(ColumnDefinition::new(name, ty));
        self.table.columns.last_mut().unwrap()
    }

    pub fn primary_key(&mut self, columns: &[&str]) -> &mut Self {
        self.table.primary_key = Some(PrimaryKeyDefinition {
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn index(&mut self, name: &str, columns: &[&str]) -> &mut Self {
        self.table.indexes.push(IndexDefinition {
            name: name.to_string(),
            unique: false,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            expressions: Vec::new(),
        });
        self
    }

    pub fn unique_index(&mut self, name: &str, columns: &[&str]) -> &mut Self {
        self.table.indexes.push(IndexDefinition {
            name: name.to_string(),
            unique: true,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            expressions: Vec::new(),
        });
        self
    }

    pub fn expression_index(&mut self, name: &str, expressions: &[&str]) -> &mut Self {
        self.table.indexes.push(IndexDefinition {
            name: name.to_string(),
            unique: false,
            columns: Vec::new(),
            expressions: expressions.iter().map(|e| e.to_string()).collect(),
        });
        self
    }

    /// Add a foreign key under a derived name; returns it so callers can
    /// rename it or set referential actions
    pub fn foreign_key(
        &mut self,
        local_columns: &[&str],
        referenced_table: &str,
        referenced_columns: &[&str],
    ) -> &mut ForeignKeyDefinition {
        let local: Vec<String> = local_columns.iter().map(|c| c.to_string()).collect();
        let name = derived_fk_name(&self.table.name, &local);
        self.table.foreign_keys.push(ForeignKeyDefinition {
            name,
            local_columns: local,
            referenced_table: referenced_table.to_string(),
            referenced_columns: referenced_columns.iter().map(|c| c.to_string()).collect(),
            on_delete: FkAction::NoAction,
            on_update: FkAction::NoAction,
        });
        self.table.foreign_keys.last_mut().unwrap()
    }

    /// Add a unique constraint under a derived name
    pub fn unique(&mut self, columns: &[&str]) -> &mut Self {
        let cols: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let name = derived_unique_name(&self.table.name, &cols);
        self.table.unique_constraints.push(UniqueConstraintDefinition {
            name,
            columns: cols,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{IntegerWidth, PortableType};

    fn person_schema() -> SchemaDefinition {
        SchemaBuilder::new()
            .table("person", |t| {
                t.column("id", PortableType::Uuid).not_null();
                t.column("name", PortableType::VarChar(100)).not_null();
                t.column("created_at", PortableType::DateTime)
                    .default_expression("now()");
                t.primary_key(&["id"]);
                t.index("ix_person_name", &["name"]);
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_preserves_order() {
        let schema = SchemaBuilder::new()
            .table("parent", |t| {
                t.column("id", PortableType::Integer(IntegerWidth::Big))
                    .not_null();
                t.primary_key(&["id"]);
            })
            .table("child", |t| {
                t.column("id", PortableType::Integer(IntegerWidth::Big))
                    .not_null();
                t.column("parent_id", PortableType::Integer(IntegerWidth::Big));
                t.primary_key(&["id"]);
                t.foreign_key(&["parent_id"], "parent", &["id"]);
            })
            .build()
            .unwrap();

        assert_eq!(schema.tables[0].name, "parent");
        assert_eq!(schema.tables[1].name, "child");
        assert_eq!(
            schema.tables[1].foreign_keys[0].name,
            "fk_child_parent_id"
        );
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let schema = person_schema();
        assert!(schema.find_table("PERSON").is_some());
        assert!(
            schema
                .find_table("person")
                .unwrap()
                .find_column("NAME")
                .is_some()
        );
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let result = SchemaBuilder::new()
            .table("t", |t| {
                t.column("a", PortableType::Text);
                t.column("A", PortableType::Text);
            })
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_identity_requires_integer() {
        let result = SchemaBuilder::new()
            .table("t", |t| {
                t.column("id", PortableType::Uuid).identity();
            })
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_both_defaults_rejected() {
        let result = SchemaBuilder::new()
            .table("t", |t| {
                t.column("c", PortableType::Text)
                    .default_literal("'x'")
                    .default_expression("now()");
            })
            .build();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
