//! Derive macros for pgmodel
//!
//! Provides `#[derive(Record)]`.

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod attrs;
mod record;

/// Derive the `Record` trait for a struct with named fields.
///
/// # Example
///
/// ```ignore
/// use pgmodel::Record;
///
/// #[derive(Debug, Default, Record)]
/// #[orm(table = "users")]
/// struct User {
///     #[orm(primary_key)]
///     counter: i64,
///     name: String,
///     #[orm(column = "language")]
///     lang: Option<String>,
///     #[orm(default = "now()")]
///     created_at: chrono::NaiveDateTime,
///     #[orm(embed)]
///     audit: Audit,
///     #[orm(skip)]
///     cache: Vec<u8>,
/// }
/// ```
///
/// # Attributes
///
/// - `#[orm(table = "name")]` - Table name (default: snake_case struct name)
/// - `#[orm(primary_key)]` or `#[orm(id)]` - Mark the primary key (at most one)
/// - `#[orm(column = "name")]` - Column name, used verbatim
/// - `#[orm(default = "expr")]` - SQL expression written when the field is blank
/// - `#[orm(embed)]` - Flatten another `Record` in place
/// - `#[orm(skip)]` - Not persisted; left untouched when reading rows
///
/// Persisted field types must implement `ToSql`, `FromSql`, `Clone`,
/// `Default` and `PartialEq`.
#[proc_macro_derive(Record, attributes(orm))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    record::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
