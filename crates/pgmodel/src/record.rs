//! Record mapping.
//!
//! A [`Record`] describes how a struct maps to one relation: its table name,
//! its persisted fields in declaration order (embedded records flattened in
//! place, skipped fields absent), the current value of each field, and how to
//! read the fields back from a row positionally.
//!
//! Implementations are normally generated with `#[derive(Record)]`:
//!
//! ```ignore
//! #[derive(Debug, Default, Record)]
//! #[orm(table = "users")]
//! struct User {
//!     #[orm(primary_key)]
//!     counter: i64,
//!     name: String,
//!     #[orm(default = "now()")]
//!     created_at: chrono::NaiveDateTime,
//! }
//! ```

use crate::args::Param;
use crate::error::OrmResult;
use crate::ident::{escape, to_snake_case};
use crate::row::RowCursor;
use std::sync::Arc;
use tokio_postgres::types::ToSql;

/// Static description of one persisted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Rust field name.
    pub name: &'static str,
    /// Column name override, used verbatim.
    pub column: Option<&'static str>,
    /// Whether this field is the primary key.
    pub primary_key: bool,
    /// SQL expression written instead of a blank value on insert/update.
    pub default: Option<&'static str>,
}

impl FieldDef {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            column: None,
            primary_key: false,
            default: None,
        }
    }

    pub fn with_column(mut self, column: &'static str) -> Self {
        self.column = Some(column);
        self
    }

    pub fn as_primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn with_default(mut self, expr: &'static str) -> Self {
        self.default = Some(expr);
        self
    }

    /// SQL column name of this field.
    pub fn column_name(&self) -> String {
        column_name(self)
    }
}

/// Current value of one persisted field.
#[derive(Debug, Clone)]
pub struct FieldValue {
    pub value: Param,
    /// `true` when the field holds its type's default value.
    pub blank: bool,
}

impl FieldValue {
    pub fn new(value: Param, blank: bool) -> Self {
        Self { value, blank }
    }

    /// Capture a field value, computing its blank flag.
    pub fn of<T>(value: &T) -> Self
    where
        T: ToSql + Sync + Send + Clone + Default + PartialEq + 'static,
    {
        Self {
            blank: is_blank(value),
            value: Arc::new(value.clone()),
        }
    }
}

/// A typed value mapped to a single relation.
pub trait Record: Send + Sync {
    /// Unescaped table name.
    fn table_name() -> &'static str;

    /// Persisted fields in declaration order, embedded records flattened.
    fn field_defs() -> Vec<FieldDef>;

    /// Values parallel to [`Record::field_defs`].
    fn field_values(&self) -> Vec<FieldValue>;

    /// Overwrite every persisted field from the row, in declaration order.
    fn read_row(&mut self, row: &mut RowCursor<'_>) -> OrmResult<()>;
}

/// A persisted field together with its current value.
#[derive(Debug, Clone)]
pub struct Field {
    pub def: FieldDef,
    pub value: FieldValue,
}

impl Field {
    pub fn column(&self) -> String {
        column_name(&self.def)
    }
}

/// `true` iff `value` equals its type's default.
pub fn is_blank<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// The column override if present, else the escaped snake_case field name.
pub fn column_name(def: &FieldDef) -> String {
    match def.column {
        Some(column) => column.to_string(),
        None => escape(&to_snake_case(def.name)),
    }
}

/// Escaped table name of `R`.
pub fn table_of<R: Record>() -> String {
    escape(R::table_name())
}

/// Persisted fields of `record` with their values, in declaration order.
pub fn persisted_fields<R: Record>(record: &R) -> Vec<Field> {
    R::field_defs()
        .into_iter()
        .zip(record.field_values())
        .map(|(def, value)| Field { def, value })
        .collect()
}

/// Column and value of the first field marked as primary key.
pub fn primary_key<R: Record>(record: &R) -> Option<(String, FieldValue)> {
    persisted_fields(record)
        .into_iter()
        .find(|f| f.def.primary_key)
        .map(|f| (f.column(), f.value))
}

/// Column of the first field marked as primary key, without needing a value.
pub fn primary_key_column<R: Record>() -> Option<String> {
    R::field_defs()
        .iter()
        .find(|d| d.primary_key)
        .map(column_name)
}

/// `table.column` for every persisted field of `R`.
pub fn qualified_columns<R: Record>(table: &str) -> Vec<String> {
    R::field_defs()
        .iter()
        .map(|d| format!("{table}.{}", column_name(d)))
        .collect()
}
