// src/schema/defaults.rs

//! Default-expression DSL translation
//!
//! Column defaults may be declared in a small engine-neutral DSL
//! (`now()`, `gen_uuid()`, literals, a curated set of scalar functions) that
//! is rendered to each engine's SQL. Input is normalized by trimming and
//! lowercasing; note that lowercasing applies inside single-quoted literals
//! as well, so case-significant string defaults should be declared as literal
//! SQL on the column instead of through this DSL.
//!
//! The translator is total: anything it does not recognize passes through
//! normalized but otherwise unmodified, and translating already-translated
//! output is a no-op.

use crate::error::{Error, Result};
use crate::schema::types::Engine;

/// Scalar functions rendered with the same name on every engine
const PORTABLE_FUNCTIONS: &[&str] = &[
    "lower", "upper", "coalesce", "length", "trim", "abs", "round",
];

/// Translate a default-expression DSL string to SQL for the given engine.
///
/// Empty or blank input is rejected with `InvalidArgument`.
pub fn translate_default(input: &str, engine: Engine) -> Result<String> {
    if input.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "default expression must not be empty".to_string(),
        ));
    }
    let normalized = input.trim().to_lowercase();
    Ok(translate_normalized(&normalized, engine))
}

fn translate_normalized(expr: &str, engine: Engine) -> String {
    // Timestamp nullaries; the bare keywords are recognized too so that
    // SQLite output re-translates to itself.
    match expr {
        "now()" | "current_timestamp()" | "current_timestamp" => {
            return match engine {
                Engine::Sqlite => "current_timestamp".to_string(),
                Engine::Postgres => "now()".to_string(),
            };
        }
        "current_date()" | "current_date" => return "current_date".to_string(),
        "current_time()" | "current_time" => return "current_time".to_string(),
        "gen_uuid()" | "uuid()" | "gen_random_uuid()" => {
            return match engine {
                Engine::Sqlite => "(lower(hex(randomblob(16))))".to_string(),
                Engine::Postgres => "gen_random_uuid()".to_string(),
            };
        }
        "true" => {
            return match engine {
                Engine::Sqlite => "1".to_string(),
                Engine::Postgres => "true".to_string(),
            };
        }
        "false" => {
            return match engine {
                Engine::Sqlite => "0".to_string(),
                Engine::Postgres => "false".to_string(),
            };
        }
        _ => {}
    }

    // Postgres substring output (`substring(x from a for b)`) must survive a
    // second pass unchanged.
    if let Some((name, args_src)) = split_call(expr) {
        if name == "substring" && args_src.contains(" from ") && !args_src.contains(',') {
            return expr.to_string();
        }
        let args: Vec<String> = split_args(args_src)
            .into_iter()
            .map(|a| translate_normalized(&a, engine))
            .collect();

        if PORTABLE_FUNCTIONS.contains(&name) {
            return format!("{}({})", name, args.join(", "));
        }
        if name == "substring" && args.len() == 3 {
            return match engine {
                Engine::Sqlite => format!("substr({}, {}, {})", args[0], args[1], args[2]),
                Engine::Postgres => {
                    format!("substring({} from {} for {})", args[0], args[1], args[2])
                }
            };
        }
        if name == "concat" && !args.is_empty() {
            return match engine {
                Engine::Sqlite => format!("({})", args.join(" || ")),
                Engine::Postgres => format!("concat({})", args.join(", ")),
            };
        }
    }

    // Numeric literals, quoted string literals, unknown functions and bare
    // identifiers all pass through after normalization.
    expr.to_string()
}

/// Split `name(args)` into its parts, or None if the input is not a single
/// well-formed call with an identifier head.
fn split_call(expr: &str) -> Option<(&str, &str)> {
    let open = expr.find('(')?;
    if !expr.ends_with(')') || open == 0 {
        return None;
    }
    let name = &expr[..open];
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    // The trailing ')' must close the opening paren, not an inner one.
    let body = &expr[open + 1..expr.len() - 1];
    let mut depth = 0i32;
    for c in body.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    Some((name, body))
}

/// Split call arguments on top-level commas, honoring parens and quotes
fn split_args(src: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut current = String::new();
    for c in src.chars() {
        match c {
            '\'' => {
                in_string = !in_string;
                current.push(c);
            }
            '(' if !in_string => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_string => {
                depth -= 1;
                current.push(c);
            }
            ',' if !in_string && depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        args.push(current.trim().to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_nullaries() {
        assert_eq!(
            translate_default("now()", Engine::Sqlite).unwrap(),
            "current_timestamp"
        );
        assert_eq!(
            translate_default("NOW()", Engine::Postgres).unwrap(),
            "now()"
        );
        assert_eq!(
            translate_default("  Current_Timestamp() ", Engine::Sqlite).unwrap(),
            "current_timestamp"
        );
    }

    #[test]
    fn test_uuid() {
        assert_eq!(
            translate_default("gen_uuid()", Engine::Postgres).unwrap(),
            "gen_random_uuid()"
        );
        assert_eq!(
            translate_default("uuid()", Engine::Sqlite).unwrap(),
            "(lower(hex(randomblob(16))))"
        );
    }

    #[test]
    fn test_boolean_literals() {
        assert_eq!(translate_default("TRUE", Engine::Sqlite).unwrap(), "1");
        assert_eq!(translate_default("false", Engine::Sqlite).unwrap(), "0");
        assert_eq!(
            translate_default("True", Engine::Postgres).unwrap(),
            "true"
        );
    }

    #[test]
    fn test_literals_pass_through() {
        assert_eq!(translate_default("42", Engine::Sqlite).unwrap(), "42");
        assert_eq!(
            translate_default("3.14", Engine::Postgres).unwrap(),
            "3.14"
        );
        // Quoted content is lowercased as part of normalization
        assert_eq!(
            translate_default("'Hello'", Engine::Sqlite).unwrap(),
            "'hello'"
        );
    }

    #[test]
    fn test_scalar_functions() {
        assert_eq!(
            translate_default("substring(name, 1, 3)", Engine::Sqlite).unwrap(),
            "substr(name, 1, 3)"
        );
        assert_eq!(
            translate_default("substring(name, 1, 3)", Engine::Postgres).unwrap(),
            "substring(name from 1 for 3)"
        );
        assert_eq!(
            translate_default("concat(a, b)", Engine::Sqlite).unwrap(),
            "(a || b)"
        );
        assert_eq!(
            translate_default("concat(a, b)", Engine::Postgres).unwrap(),
            "concat(a, b)"
        );
        assert_eq!(
            translate_default("LOWER(code)", Engine::Postgres).unwrap(),
            "lower(code)"
        );
    }

    #[test]
    fn test_nested_calls() {
        assert_eq!(
            translate_default("upper(concat(a, b))", Engine::Sqlite).unwrap(),
            "upper((a || b))"
        );
    }

    #[test]
    fn test_unknown_functions_pass_through() {
        assert_eq!(
            translate_default("my_func(x)", Engine::Sqlite).unwrap(),
            "my_func(x)"
        );
    }

    #[test]
    fn test_idempotent_on_translated_output() {
        for engine in [Engine::Sqlite, Engine::Postgres] {
            for dsl in [
                "now()",
                "current_date()",
                "gen_uuid()",
                "true",
                "false",
                "substring(name, 2, 5)",
                "concat(a, b)",
                "lower(x)",
                "42",
                "'abc'",
            ] {
                let once = translate_default(dsl, engine).unwrap();
                let twice = translate_default(&once, engine).unwrap();
                assert_eq!(once, twice, "{} on {}", dsl, engine);
            }
        }
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(matches!(
            translate_default("  ", Engine::Sqlite),
            Err(Error::InvalidArgument(_))
        ));
    }
}
