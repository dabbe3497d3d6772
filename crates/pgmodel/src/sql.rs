//! Placeholder-numbering SQL fragments.
//!
//! `Sql` stores SQL text and bound parameters separately. Placeholders are
//! numbered only when the statement is rendered with [`Sql::to_sql`], so
//! fragments can be built independently (CTE, SELECT list, WHERE clauses) and
//! assembled in any order without tracking `$n` indices by hand.
//!
//! # Example
//!
//! ```ignore
//! use pgmodel::Sql;
//!
//! let mut q = Sql::new("SELECT id FROM users WHERE ");
//! q.push_marked("status = ? AND id IN (?)", ("active", vec![1_i64, 2, 3]))?;
//! assert_eq!(q.to_sql(), "SELECT id FROM users WHERE status = $1 AND id IN ($2,$3,$4)");
//! ```

use crate::args::{Arg, IntoArgs, Param};
use crate::error::{OrmError, OrmResult};
use std::sync::Arc;
use tokio_postgres::types::ToSql;

#[derive(Debug, Clone)]
enum SqlPart {
    Raw(String),
    Param,
}

/// A parameter-safe SQL fragment.
#[derive(Debug, Clone, Default)]
pub struct Sql {
    parts: Vec<SqlPart>,
    params: Vec<Param>,
}

impl Sql {
    /// Create a new fragment with initial SQL text.
    pub fn new(initial_sql: impl Into<String>) -> Self {
        Self {
            parts: vec![SqlPart::Raw(initial_sql.into())],
            params: Vec::new(),
        }
    }

    /// Create an empty fragment.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a `?`-marked fragment, binding `args` positionally.
    pub fn marked(template: &str, args: impl IntoArgs) -> OrmResult<Self> {
        let mut out = Self::empty();
        out.push_marked(template, args)?;
        Ok(out)
    }

    /// `true` if no text and no parameters were pushed.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
            && self.parts.iter().all(|p| match p {
                SqlPart::Raw(s) => s.is_empty(),
                SqlPart::Param => false,
            })
    }

    /// Append raw SQL (no parameters).
    pub fn push(&mut self, sql: &str) -> &mut Self {
        if sql.is_empty() {
            return self;
        }

        match self.parts.last_mut() {
            Some(SqlPart::Raw(last)) => last.push_str(sql),
            _ => self.parts.push(SqlPart::Raw(sql.to_string())),
        }
        self
    }

    /// Append a parameter placeholder and bind its value.
    pub fn push_bind<T>(&mut self, value: T) -> &mut Self
    where
        T: ToSql + Sync + Send + 'static,
    {
        self.push_param(Arc::new(value))
    }

    /// Append a placeholder for an already type-erased value.
    pub fn push_param(&mut self, value: Param) -> &mut Self {
        self.parts.push(SqlPart::Param);
        self.params.push(value);
        self
    }

    /// Append a comma-separated list of placeholders and bind all values.
    ///
    /// If `values` is empty, this appends `NULL` (so `IN (NULL)` is valid SQL).
    pub fn push_bind_list(&mut self, values: impl IntoIterator<Item = Param>) -> &mut Self {
        let mut iter = values.into_iter();
        let Some(first) = iter.next() else {
            return self.push("NULL");
        };

        self.push_param(first);
        for v in iter {
            self.push(",");
            self.push_param(v);
        }
        self
    }

    /// Append a bound argument: one placeholder, or a list for sequences.
    pub fn push_arg(&mut self, arg: Arg) -> &mut Self {
        match arg {
            Arg::One(value) => self.push_param(value),
            Arg::Many(values) => self.push_bind_list(values),
        }
    }

    /// Append another fragment.
    pub fn push_sql(&mut self, other: &Sql) -> &mut Self {
        for part in &other.parts {
            match part {
                SqlPart::Raw(s) => {
                    self.push(s);
                }
                SqlPart::Param => self.parts.push(SqlPart::Param),
            }
        }
        self.params.extend(other.params.iter().cloned());
        self
    }

    /// Append a `?`-marked fragment.
    ///
    /// Every `?` outside a single-quoted literal consumes the next argument.
    /// The marker and argument counts must match.
    pub fn push_marked(&mut self, template: &str, args: impl IntoArgs) -> OrmResult<&mut Self> {
        let args = args.into_args();
        let markers = count_markers(template);
        if markers != args.len() {
            return Err(OrmError::invalid_query(format!(
                "`{template}` has {markers} `?` marker(s) but {} argument(s) were given",
                args.len()
            )));
        }

        let mut args = args.into_iter();
        let mut in_literal = false;
        let mut chunk = String::new();
        for c in template.chars() {
            match c {
                '\'' => {
                    in_literal = !in_literal;
                    chunk.push(c);
                }
                '?' if !in_literal => {
                    self.push(&chunk);
                    chunk.clear();
                    if let Some(arg) = args.next() {
                        self.push_arg(arg);
                    }
                }
                _ => chunk.push(c),
            }
        }
        self.push(&chunk);
        Ok(self)
    }

    /// Render SQL with `$1, $2, ...` placeholders.
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        let mut idx: usize = 0;

        for part in &self.parts {
            match part {
                SqlPart::Raw(s) => out.push_str(s),
                SqlPart::Param => {
                    idx += 1;
                    use std::fmt::Write;
                    let _ = write!(&mut out, "${}", idx);
                }
            }
        }
        out
    }

    /// Parameter refs compatible with `tokio-postgres`.
    pub fn params_ref(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }

    /// Bound parameters in placeholder order.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Number of bound parameters.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub(crate) fn validate(&self) -> OrmResult<()> {
        let placeholder_count = self
            .parts
            .iter()
            .filter(|p| matches!(p, SqlPart::Param))
            .count();

        if placeholder_count != self.params.len() {
            return Err(OrmError::invalid_query(format!(
                "Sql: {} placeholders but {} params",
                placeholder_count,
                self.params.len()
            )));
        }
        Ok(())
    }
}

/// Count `?` markers outside single-quoted literals.
pub(crate) fn count_markers(template: &str) -> usize {
    let mut in_literal = false;
    let mut count = 0;
    for c in template.chars() {
        match c {
            '\'' => in_literal = !in_literal,
            '?' if !in_literal => count += 1,
            _ => {}
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_placeholders_in_order() {
        let mut q = Sql::new("SELECT * FROM users WHERE a = ");
        q.push_bind(1).push(" AND b = ").push_bind("x");

        assert_eq!(q.to_sql(), "SELECT * FROM users WHERE a = $1 AND b = $2");
        assert_eq!(q.params_ref().len(), 2);
    }

    #[test]
    fn can_compose_fragments() {
        let mut w = Sql::empty();
        w.push(" WHERE id = ").push_bind(42);

        let mut q = Sql::new("SELECT * FROM users");
        q.push_sql(&w);

        assert_eq!(q.to_sql(), "SELECT * FROM users WHERE id = $1");
        assert_eq!(q.params_ref().len(), 1);
    }

    #[test]
    fn numbering_follows_assembly_order() {
        let where_part = Sql::marked("b = ?", ("late",)).unwrap();
        let cte = Sql::marked("WITH x AS (SELECT ? AS v)", (1_i64,)).unwrap();

        let mut q = Sql::empty();
        q.push_sql(&cte).push(" SELECT v FROM x WHERE ").push_sql(&where_part);
        assert_eq!(
            q.to_sql(),
            "WITH x AS (SELECT $1 AS v) SELECT v FROM x WHERE b = $2"
        );
    }

    #[test]
    fn marked_expands_sequences() {
        let q = Sql::marked("a = ? AND x IN (?)", (7_i64, vec![1_i64, 2, 3])).unwrap();
        assert_eq!(q.to_sql(), "a = $1 AND x IN ($2,$3,$4)");
        assert_eq!(q.param_count(), 4);
    }

    #[test]
    fn empty_sequence_renders_null() {
        let q = Sql::marked("x IN (?)", (Vec::<i64>::new(),)).unwrap();
        assert_eq!(q.to_sql(), "x IN (NULL)");
        assert_eq!(q.param_count(), 0);
    }

    #[test]
    fn markers_inside_literals_are_text() {
        let q = Sql::marked("note = 'why?' AND id = ?", (1_i64,)).unwrap();
        assert_eq!(q.to_sql(), "note = 'why?' AND id = $1");
    }

    #[test]
    fn marker_count_mismatch_is_invalid_query() {
        let err = Sql::marked("a = ? AND b = ?", (1_i64,)).unwrap_err();
        assert!(err.is_invalid_query());
    }

    #[test]
    fn validate_accepts_balanced_fragments() {
        let q = Sql::marked("a = ?", (1_i64,)).unwrap();
        assert!(q.validate().is_ok());
        assert!(Sql::empty().is_empty());
        assert!(!q.is_empty());
    }
}
