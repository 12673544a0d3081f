// src/schema/types.rs

//! Portable column-type vocabulary with per-engine SQL rendering
//!
//! Every portable type maps to exactly one native type per supported engine,
//! so rendering is total and never fails.

use std::fmt;
use std::str::FromStr;

/// Supported storage engines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// In-process embedded engine (rusqlite)
    Sqlite,
    /// Remote server engine; SQL rendering only, execution goes through the host's driver
    Postgres,
}

impl Engine {
    pub fn as_str(&self) -> &str {
        match self {
            Engine::Sqlite => "sqlite",
            Engine::Postgres => "postgres",
        }
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Engine::Sqlite),
            "postgres" | "postgresql" => Ok(Engine::Postgres),
            _ => Err(format!("Unknown engine: {}", s)),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage width of an integer column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerWidth {
    /// 16-bit
    Small,
    /// 32-bit
    Standard,
    /// 64-bit
    Big,
}

/// Engine-neutral column types
///
/// SQLite collapses most of these onto its four storage affinities; Postgres
/// keeps the distinctions. Identity columns require one of the `Integer`
/// widths (enforced by the schema builder).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortableType {
    Integer(IntegerWidth),
    Decimal(u8, u8),
    Float,
    Double,
    Money,
    Boolean,
    Char(u32),
    VarChar(u32),
    NChar(u32),
    NVarChar(u32),
    Text,
    Binary(u32),
    VarBinary(u32),
    Blob,
    Date,
    Time,
    DateTime,
    DateTimeOffset,
    Uuid,
    Json,
    Xml,
}

impl PortableType {
    /// Render the native type name for the given engine
    pub fn render(&self, engine: Engine) -> String {
        match engine {
            Engine::Sqlite => self.render_sqlite(),
            Engine::Postgres => self.render_postgres(),
        }
    }

    fn render_sqlite(&self) -> String {
        match self {
            PortableType::Integer(_) | PortableType::Boolean => "INTEGER".to_string(),
            PortableType::Decimal(p, s) => format!("NUMERIC({}, {})", p, s),
            PortableType::Money => "NUMERIC(19, 4)".to_string(),
            PortableType::Float | PortableType::Double => "REAL".to_string(),
            PortableType::Char(_)
            | PortableType::VarChar(_)
            | PortableType::NChar(_)
            | PortableType::NVarChar(_)
            | PortableType::Text
            | PortableType::Date
            | PortableType::Time
            | PortableType::DateTime
            | PortableType::DateTimeOffset
            | PortableType::Uuid
            | PortableType::Json
            | PortableType::Xml => "TEXT".to_string(),
            PortableType::Binary(_) | PortableType::VarBinary(_) | PortableType::Blob => {
                "BLOB".to_string()
            }
        }
    }

    fn render_postgres(&self) -> String {
        match self {
            PortableType::Integer(IntegerWidth::Small) => "SMALLINT".to_string(),
            PortableType::Integer(IntegerWidth::Standard) => "INTEGER".to_string(),
            PortableType::Integer(IntegerWidth::Big) => "BIGINT".to_string(),
            PortableType::Decimal(p, s) => format!("NUMERIC({}, {})", p, s),
            PortableType::Money => "NUMERIC(19, 4)".to_string(),
            PortableType::Float => "REAL".to_string(),
            PortableType::Double => "DOUBLE PRECISION".to_string(),
            PortableType::Boolean => "BOOLEAN".to_string(),
            PortableType::Char(n) | PortableType::NChar(n) => format!("CHAR({})", n),
            PortableType::VarChar(n) | PortableType::NVarChar(n) => format!("VARCHAR({})", n),
            PortableType::Text => "TEXT".to_string(),
            PortableType::Binary(_) | PortableType::VarBinary(_) | PortableType::Blob => {
                "BYTEA".to_string()
            }
            PortableType::Date => "DATE".to_string(),
            PortableType::Time => "TIME".to_string(),
            PortableType::DateTime => "TIMESTAMP".to_string(),
            PortableType::DateTimeOffset => "TIMESTAMPTZ".to_string(),
            PortableType::Uuid => "UUID".to_string(),
            PortableType::Json => "JSONB".to_string(),
            PortableType::Xml => "XML".to_string(),
        }
    }

    /// Whether this type may back an identity column
    pub fn is_integer(&self) -> bool {
        matches!(self, PortableType::Integer(_))
    }

    /// Best-effort reverse mapping from a declared native type name.
    ///
    /// Used by the schema inspector; only the renderings this module emits
    /// need to round-trip.
    pub fn parse_native(declared: &str, engine: Engine) -> Option<PortableType> {
        let upper = declared.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim().to_string();
        let args: Vec<u32> = upper
            .find('(')
            .map(|i| {
                upper[i + 1..upper.len().saturating_sub(1)]
                    .split(',')
                    .filter_map(|a| a.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        let ty = match (engine, base.as_str()) {
            (_, "INTEGER") => PortableType::Integer(IntegerWidth::Standard),
            (_, "SMALLINT") => PortableType::Integer(IntegerWidth::Small),
            (_, "BIGINT") => PortableType::Integer(IntegerWidth::Big),
            (_, "NUMERIC") | (_, "DECIMAL") => match args.as_slice() {
                [19, 4] => PortableType::Money,
                [p, s] => PortableType::Decimal(*p as u8, *s as u8),
                _ => PortableType::Decimal(18, 0),
            },
            (Engine::Sqlite, "REAL") => PortableType::Double,
            (Engine::Postgres, "REAL") => PortableType::Float,
            (_, "DOUBLE PRECISION") => PortableType::Double,
            (_, "BOOLEAN") => PortableType::Boolean,
            (_, "TEXT") => PortableType::Text,
            (_, "CHAR") => PortableType::Char(args.first().copied().unwrap_or(1)),
            (_, "VARCHAR") => PortableType::VarChar(args.first().copied().unwrap_or(255)),
            (_, "BLOB") | (_, "BYTEA") => PortableType::Blob,
            (_, "DATE") => PortableType::Date,
            (_, "TIME") => PortableType::Time,
            (_, "TIMESTAMP") => PortableType::DateTime,
            (_, "TIMESTAMPTZ") => PortableType::DateTimeOffset,
            (_, "UUID") => PortableType::Uuid,
            (_, "JSONB") | (_, "JSON") => PortableType::Json,
            (_, "XML") => PortableType::Xml,
            _ => return None,
        };
        Some(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendering_is_total() {
        let all = [
            PortableType::Integer(IntegerWidth::Small),
            PortableType::Integer(IntegerWidth::Standard),
            PortableType::Integer(IntegerWidth::Big),
            PortableType::Decimal(10, 2),
            PortableType::Float,
            PortableType::Double,
            PortableType::Money,
            PortableType::Boolean,
            PortableType::Char(8),
            PortableType::VarChar(64),
            PortableType::NChar(8),
            PortableType::NVarChar(64),
            PortableType::Text,
            PortableType::Binary(16),
            PortableType::VarBinary(16),
            PortableType::Blob,
            PortableType::Date,
            PortableType::Time,
            PortableType::DateTime,
            PortableType::DateTimeOffset,
            PortableType::Uuid,
            PortableType::Json,
            PortableType::Xml,
        ];
        for ty in all {
            for engine in [Engine::Sqlite, Engine::Postgres] {
                assert!(!ty.render(engine).is_empty(), "{:?} on {}", ty, engine);
            }
        }
    }

    #[test]
    fn test_sqlite_affinity_collapse() {
        assert_eq!(PortableType::VarChar(50).render(Engine::Sqlite), "TEXT");
        assert_eq!(PortableType::Uuid.render(Engine::Sqlite), "TEXT");
        assert_eq!(
            PortableType::Boolean.render(Engine::Sqlite),
            "INTEGER"
        );
    }

    #[test]
    fn test_postgres_keeps_distinctions() {
        assert_eq!(
            PortableType::VarChar(50).render(Engine::Postgres),
            "VARCHAR(50)"
        );
        assert_eq!(PortableType::Uuid.render(Engine::Postgres), "UUID");
        assert_eq!(
            PortableType::Decimal(10, 2).render(Engine::Postgres),
            "NUMERIC(10, 2)"
        );
    }

    #[test]
    fn test_parse_native_round_trip() {
        let rendered = PortableType::Decimal(10, 2).render(Engine::Postgres);
        assert_eq!(
            PortableType::parse_native(&rendered, Engine::Postgres),
            Some(PortableType::Decimal(10, 2))
        );
        assert_eq!(
            PortableType::parse_native("TEXT", Engine::Sqlite),
            Some(PortableType::Text)
        );
    }
}
