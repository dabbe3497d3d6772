//! Identifier escaping.
//!
//! Table and column names derived from Rust identifiers are converted to
//! `snake_case`. Only names that collide with a reserved PostgreSQL keyword are
//! quoted, so generated SQL stays readable:
//!
//! ```ignore
//! use pgmodel::ident::escape;
//!
//! assert_eq!(escape("CreatedAt"), "created_at");
//! assert_eq!(escape("User"), "\"user\"");
//! ```

use crate::error::{OrmError, OrmResult};

/// Reserved keywords that cannot be used unquoted as table or column names.
///
/// `SELECT word FROM pg_get_keywords() WHERE catcode = 'R' OR catdesc LIKE '%cannot%'`.
/// Must stay sorted: lookups use binary search.
pub const RESERVED_KEYWORDS: &[&str] = &[
    "all",
    "analyse",
    "analyze",
    "and",
    "any",
    "array",
    "as",
    "asc",
    "asymmetric",
    "between",
    "bigint",
    "bit",
    "boolean",
    "both",
    "case",
    "cast",
    "char",
    "character",
    "check",
    "coalesce",
    "collate",
    "column",
    "constraint",
    "create",
    "current_catalog",
    "current_date",
    "current_role",
    "current_time",
    "current_timestamp",
    "current_user",
    "dec",
    "decimal",
    "default",
    "deferrable",
    "desc",
    "distinct",
    "do",
    "else",
    "end",
    "except",
    "exists",
    "extract",
    "false",
    "fetch",
    "float",
    "for",
    "foreign",
    "from",
    "grant",
    "greatest",
    "group",
    "grouping",
    "having",
    "in",
    "initially",
    "inout",
    "int",
    "integer",
    "intersect",
    "interval",
    "into",
    "lateral",
    "leading",
    "least",
    "limit",
    "localtime",
    "localtimestamp",
    "national",
    "nchar",
    "none",
    "not",
    "null",
    "nullif",
    "numeric",
    "offset",
    "on",
    "only",
    "or",
    "order",
    "out",
    "overlay",
    "placing",
    "position",
    "precision",
    "primary",
    "real",
    "references",
    "returning",
    "row",
    "select",
    "session_user",
    "setof",
    "smallint",
    "some",
    "substring",
    "symmetric",
    "table",
    "then",
    "time",
    "timestamp",
    "to",
    "trailing",
    "treat",
    "trim",
    "true",
    "union",
    "unique",
    "user",
    "using",
    "values",
    "varchar",
    "variadic",
    "when",
    "where",
    "window",
    "with",
    "xmlattributes",
    "xmlconcat",
    "xmlelement",
    "xmlexists",
    "xmlforest",
    "xmlparse",
    "xmlpi",
    "xmlroot",
    "xmlserialize",
];

/// Returns `true` if `name` (case-insensitive) is a reserved keyword.
pub fn is_reserved(name: &str) -> bool {
    let lower = name.to_lowercase();
    RESERVED_KEYWORDS.binary_search(&lower.as_str()).is_ok()
}

/// Escape a table or column name.
///
/// Reserved keywords come back lower-cased and double-quoted; every other name
/// goes through [`to_snake_case`] and is never quoted. Escaping is idempotent.
pub fn escape(name: &str) -> String {
    let lower = name.to_lowercase();
    if RESERVED_KEYWORDS.binary_search(&lower.as_str()).is_ok() {
        return format!("\"{lower}\"");
    }
    to_snake_case(name)
}

/// Convert a `CamelCase` name to `snake_case`.
///
/// An underscore is inserted only where a lowercase letter is directly followed
/// by an uppercase one, so runs of capitals stay together (`HTTPServer` becomes
/// `httpserver`).
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.chars() {
        if let Some(p) = prev
            && p.is_lowercase()
            && c.is_uppercase()
        {
            out.push('_');
        }
        out.push(c);
        prev = Some(c);
    }
    out.to_lowercase()
}

/// Always-quoted identifier, for channel names and other user-supplied names
/// that must keep their exact spelling.
pub fn quote_ident(input: &str) -> OrmResult<String> {
    if input.trim().is_empty() {
        return Err(OrmError::validation("identifier cannot be empty"));
    }
    if input.as_bytes().contains(&0) {
        return Err(OrmError::validation("identifier cannot contain NUL byte"));
    }
    Ok(format!("\"{}\"", input.replace('"', "\"\"")))
}
