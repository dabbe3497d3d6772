//! Column types with PostgreSQL-specific mapping rules.

mod json;

pub use json::JsonObject;
