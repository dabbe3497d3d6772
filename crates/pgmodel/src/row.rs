//! Row mapping traits and utilities

use crate::error::{OrmError, OrmResult};
use tokio_postgres::Row;
use tokio_postgres::types::FromSql;

/// Trait for types that can be constructed from a database row.
///
/// Implemented for tuples of up to eight columns, which covers ad-hoc
/// projections such as `SELECT name, count(*) ... GROUP BY name`:
///
/// ```ignore
/// let rows: Vec<(String, i64)> = db
///     .table("posts")
///     .select("author, count(*)", ())
///     .joins("GROUP BY author")
///     .scan_rows(&db)
///     .await?;
/// ```
pub trait FromRow: Sized {
    /// Convert a database row into Self
    fn from_row(row: &Row) -> OrmResult<Self>;
}

/// Positional reader used by [`Record::read_row`](crate::Record::read_row).
///
/// Each call to [`RowCursor::next_column`] decodes the next column, so a record reads
/// its fields in declaration order, embedded records included.
pub struct RowCursor<'r> {
    row: &'r Row,
    index: usize,
}

impl<'r> RowCursor<'r> {
    pub fn new(row: &'r Row) -> Self {
        Self { row, index: 0 }
    }

    /// Decode the next column.
    pub fn next_column<T>(&mut self) -> OrmResult<T>
    where
        T: for<'a> FromSql<'a>,
    {
        let idx = self.index;
        self.index += 1;
        self.row.try_get(idx).map_err(|e| {
            let column = self
                .row
                .columns()
                .get(idx)
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| idx.to_string());
            OrmError::decode(column, e.to_string())
        })
    }
}

macro_rules! impl_from_row_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name),+> FromRow for ($($name,)+)
        where
            $($name: for<'a> FromSql<'a>),+
        {
            fn from_row(row: &Row) -> OrmResult<Self> {
                Ok(($(
                    row.try_get($idx)
                        .map_err(|e| OrmError::decode(stringify!($idx), e.to_string()))?,
                )+))
            }
        }
    };
}

impl_from_row_tuple!(A: 0);
impl_from_row_tuple!(A: 0, B: 1);
impl_from_row_tuple!(A: 0, B: 1, C: 2);
impl_from_row_tuple!(A: 0, B: 1, C: 2, D: 3);
impl_from_row_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_from_row_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_from_row_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_from_row_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
