//! Record-driven statement builder.
//!
//! [`Query`] accumulates tables, joins, a SELECT list, a CTE prefix, WHERE
//! fragments and ORDER/LIMIT/OFFSET. Every configuration method borrows the
//! receiver and returns a new `Query`, so a shared base query can be extended
//! from several places without the chains observing each other.
//!
//! Terminal methods (`scan`, `create`, `updates`, `delete`, ...) take any
//! [`GenericClient`] (a [`Database`](crate::Database), a
//! [`Transaction`](crate::Transaction), or a raw `tokio_postgres` client).
//!
//! ```ignore
//! let mut user = User { counter: 5, name: "b".into() };
//! Query::new().updates(&db, &mut user).await?;
//! // UPDATE users SET name = $1 WHERE users.counter = $2 RETURNING users.counter,users.name
//!
//! let recent: Vec<User> = db
//!     .model::<User>()
//!     .where_sql("users.counter IN (?)", (vec![1_i64, 2, 3],))
//!     .order("counter DESC")
//!     .limit(10)
//!     .fetch_all(&db)
//!     .await?;
//! ```
//!
//! Placeholders are written as `?` in every fragment and numbered `$1..$n`
//! when the statement is rendered, in the order the fragments appear in the
//! final text (CTE, SELECT list, SET/VALUES, WHERE). Do not mix literal `$n`
//! placeholders with `?` markers.

use crate::args::{Arg, IntoArg, IntoArgs, Param};
use crate::client::GenericClient;
use crate::error::{OrmError, OrmResult};
use crate::ident::escape;
use crate::record::{self, Field, Record};
use crate::row::{FromRow, RowCursor};
use crate::sql::{Sql, count_markers};
use tokio_postgres::Row;
use tokio_postgres::types::FromSql;

/// Table-level metadata of a model added with [`Query::model`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMeta {
    /// Escaped table name.
    pub table: String,
    /// `table.column` for every persisted field.
    pub columns: Vec<String>,
    /// Primary key column, if the record declares one.
    pub primary_key: Option<String>,
}

impl ModelMeta {
    pub fn of<R: Record>() -> Self {
        let table = record::table_of::<R>();
        Self {
            columns: record::qualified_columns::<R>(&table),
            primary_key: record::primary_key_column::<R>(),
            table,
        }
    }
}

/// The kind of statement being executed, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Raw,
}

#[derive(Debug, Clone)]
struct WhereClause {
    sql: Sql,
    // Caller-written fragments are parenthesized when combined with others.
    raw: bool,
}

enum WriteValue {
    Bound(Param),
    Expr(&'static str),
}

/// An immutable, cloneable query description.
#[derive(Debug, Clone, Default)]
pub struct Query {
    tables: Vec<String>,
    models: Vec<ModelMeta>,
    joins: Vec<String>,
    select: Option<Sql>,
    cte: Option<Sql>,
    wheres: Vec<WhereClause>,
    order: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    raw: Option<Sql>,
    build_error: Option<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Configuration ====================

    /// Add `R`'s table to the FROM list and remember it as a model.
    pub fn model<R: Record>(&self) -> Self {
        let mut q = self.clone();
        let meta = ModelMeta::of::<R>();
        q.tables.push(meta.table.clone());
        q.models.push(meta);
        q
    }

    /// Add a table to the FROM list by name.
    pub fn table(&self, name: &str) -> Self {
        let mut q = self.clone();
        q.tables.push(escape(name));
        q
    }

    /// Append a join fragment, e.g. `JOIN posts ON posts.author = users.counter`.
    pub fn joins(&self, joins: &str) -> Self {
        let mut q = self.clone();
        q.joins.push(joins.to_string());
        q
    }

    /// Append to the SELECT list. `?` markers bind `args`.
    ///
    /// Without an explicit list, scanning into a record selects the record's
    /// persisted columns in declaration order.
    pub fn select(&self, fields: &str, args: impl IntoArgs) -> Self {
        let mut q = self.clone();
        match Sql::marked(fields, args) {
            Ok(fragment) => {
                let select = q.select.get_or_insert_with(Sql::empty);
                if !select.is_empty() {
                    select.push(",");
                }
                select.push_sql(&fragment);
            }
            Err(e) => q.record_error(e),
        }
        q
    }

    /// Append to the common table expression prefix. `?` markers bind `args`.
    pub fn cte(&self, cte: &str, args: impl IntoArgs) -> Self {
        let mut q = self.clone();
        match Sql::marked(cte, args) {
            Ok(fragment) => {
                q.cte.get_or_insert_with(Sql::empty).push_sql(&fragment);
            }
            Err(e) => q.record_error(e),
        }
        q
    }

    /// Filter by the non-blank fields of `record`.
    ///
    /// If the record's primary key is set, the filter is exactly
    /// `table.pk = ?` and every other field is ignored. Otherwise each
    /// non-blank field becomes `table.column = ?`, AND-ed in declaration order.
    /// When no table was set yet, `R`'s table is added first.
    pub fn where_model<R: Record>(&self, record: &R) -> Self {
        let mut q = self.with_default_model::<R>();
        let table = record::table_of::<R>();
        let fields = record::persisted_fields(record);

        let primary_key = fields.iter().find(|f| f.def.primary_key);
        if let Some(pk) = primary_key.filter(|f| !f.value.blank) {
            q.push_field_clause(&table, pk);
            return q;
        }

        for field in fields.iter().filter(|f| !f.value.blank) {
            q.push_field_clause(&table, field);
        }
        q
    }

    /// Filter with a SQL fragment. `?` markers bind `args` positionally and a
    /// sequence argument expands its marker into a placeholder list.
    ///
    /// A fragment without markers and exactly one argument is a column
    /// shorthand: `where_sql("name", ("Paolo",))` renders `name = $n`, and with
    /// a sequence argument `name IN ($n,...)`.
    pub fn where_sql(&self, clause: &str, args: impl IntoArgs) -> Self {
        let mut q = self.clone();
        let args = args.into_args();

        if count_markers(clause) == 0 && args.len() == 1 {
            let mut sql = Sql::new(escape(clause));
            for arg in args {
                match arg {
                    Arg::One(value) => {
                        sql.push(" = ").push_param(value);
                    }
                    Arg::Many(values) => {
                        sql.push(" IN (").push_bind_list(values).push(")");
                    }
                }
            }
            q.wheres.push(WhereClause { sql, raw: false });
            return q;
        }

        match Sql::marked(clause, args) {
            Ok(sql) => q.wheres.push(WhereClause { sql, raw: true }),
            Err(e) => q.record_error(e),
        }
        q
    }

    /// Set ORDER BY. The value is escaped like an identifier.
    pub fn order(&self, value: &str) -> Self {
        let mut q = self.clone();
        q.order = Some(escape(value));
        q
    }

    pub fn limit(&self, limit: i64) -> Self {
        let mut q = self.clone();
        q.limit = Some(limit);
        q
    }

    pub fn offset(&self, offset: i64) -> Self {
        let mut q = self.clone();
        q.offset = Some(offset);
        q
    }

    /// Replace the built statement with a raw one. `?` markers bind `args`.
    ///
    /// The scan methods then run this statement instead of building a SELECT;
    /// [`Query::exec`] runs it for its affected row count.
    pub fn raw(&self, sql: &str, args: impl IntoArgs) -> Self {
        let mut q = self.clone();
        match Sql::marked(sql, args) {
            Ok(sql) => q.raw = Some(sql),
            Err(e) => q.record_error(e),
        }
        q
    }

    // ==================== Compilation ====================

    /// Compile the SELECT that scanning into `R` would run.
    pub fn to_select_sql<R: Record>(&self) -> OrmResult<Sql> {
        let columns = inferred_columns::<R>();
        self.build_select(Some(columns.as_slice()))
    }

    /// Compile `INSERT ... RETURNING` for `record`.
    ///
    /// Non-blank fields are bound; blank fields with a default expression
    /// write that expression; other blank fields are left to the database.
    pub fn to_insert_sql<R: Record>(&self, record: &R) -> OrmResult<Sql> {
        let q = self.with_default_model::<R>();
        q.check()?;
        let table = q.single_table("INSERT")?;

        let values = write_set(record, false);
        if values.is_empty() {
            return Err(invalid_query(format!(
                "INSERT INTO {table}: no fields to write"
            )));
        }

        let mut out = Sql::empty();
        q.push_cte(&mut out);
        out.push(&format!("INSERT INTO {table} ("));
        let columns: Vec<&str> = values.iter().map(|(c, _)| c.as_str()).collect();
        out.push(&columns.join(","));
        out.push(") VALUES (");
        for (i, (_, value)) in values.into_iter().enumerate() {
            if i > 0 {
                out.push(",");
            }
            push_write_value(&mut out, value);
        }
        out.push(")");
        push_returning::<R>(&mut out, table);
        Ok(out)
    }

    /// Compile `UPDATE ... RETURNING` for `record`, filtered by
    /// [`Query::where_model`]. The primary key column is never written.
    pub fn to_update_sql<R: Record>(&self, record: &R) -> OrmResult<Sql> {
        let q = self.where_model(record);
        q.check()?;
        let table = q.single_table("UPDATE")?;

        let set = write_set(record, true);
        if set.is_empty() {
            return Err(invalid_query(format!("UPDATE {table}: no fields to write")));
        }
        if q.wheres.is_empty() {
            return Err(invalid_query(format!(
                "UPDATE {table} requires a WHERE clause"
            )));
        }

        let mut out = Sql::empty();
        q.push_cte(&mut out);
        out.push(&format!("UPDATE {table} SET "));
        for (i, (column, value)) in set.into_iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            out.push(&format!("{column} = "));
            push_write_value(&mut out, value);
        }
        q.push_where(&mut out);
        push_returning::<R>(&mut out, table);
        Ok(out)
    }

    /// Compile `DELETE` for `record`, filtered by [`Query::where_model`].
    pub fn to_delete_sql<R: Record>(&self, record: &R) -> OrmResult<Sql> {
        let q = self.where_model(record);
        q.check()?;
        let table = q.single_table("DELETE")?;
        if q.wheres.is_empty() {
            return Err(invalid_query(format!(
                "DELETE FROM {table} requires a WHERE clause"
            )));
        }

        let mut out = Sql::empty();
        q.push_cte(&mut out);
        out.push(&format!("DELETE FROM {table}"));
        q.push_where(&mut out);
        Ok(out)
    }

    fn build_select(&self, inferred: Option<&[String]>) -> OrmResult<Sql> {
        self.check()?;
        if self.tables.is_empty() {
            return Err(invalid_query(
                "SELECT requires a table: call model or table first",
            ));
        }

        let mut out = Sql::empty();
        self.push_cte(&mut out);
        out.push("SELECT ");
        match (&self.select, inferred) {
            (Some(select), _) => {
                out.push_sql(select);
            }
            (None, Some(columns)) if !columns.is_empty() => {
                out.push(&columns.join(","));
            }
            _ => {
                return Err(invalid_query(
                    "SELECT requires a field list: call select or scan into a record",
                ));
            }
        }

        out.push(" FROM ");
        out.push(&self.tables.join(","));
        if !self.joins.is_empty() {
            out.push(" ");
            out.push(&self.joins.join(" "));
        }
        self.push_where(&mut out);
        if let Some(order) = &self.order {
            out.push(" ORDER BY ");
            out.push(order);
        }
        if let Some(limit) = self.limit {
            out.push(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            out.push(&format!(" OFFSET {offset}"));
        }
        Ok(out)
    }

    fn select_or_raw(&self, inferred: Option<&[String]>) -> OrmResult<(StatementKind, Sql)> {
        if let Some(raw) = &self.raw {
            self.check()?;
            return Ok((StatementKind::Raw, raw.clone()));
        }
        Ok((StatementKind::Select, self.build_select(inferred)?))
    }

    fn count_query(&self) -> OrmResult<Query> {
        let Some(model) = self.models.first() else {
            return Err(invalid_query("count requires a model: call model first"));
        };
        let expr = match &model.primary_key {
            Some(pk) => format!("count({}.{pk})", model.table),
            None => "count(*)".to_string(),
        };
        Ok(self.replace_select(&expr))
    }

    fn replace_select(&self, fields: &str) -> Query {
        let mut q = self.clone();
        q.select = Some(Sql::new(fields));
        q
    }

    // ==================== Execution ====================

    /// Run the query and read the first row into `dest`.
    ///
    /// Returns [`OrmError::NotFound`] when no row matches.
    pub async fn scan<R: Record>(&self, conn: &impl GenericClient, dest: &mut R) -> OrmResult<()> {
        let columns = inferred_columns::<R>();
        let (kind, sql) = self.select_or_raw(Some(columns.as_slice()))?;
        let row = fetch_first(conn, kind, &sql)
            .await?
            .ok_or_else(|| OrmError::not_found(format!("no {} row matched", R::table_name())))?;
        dest.read_row(&mut RowCursor::new(&row))
    }

    /// Run the query and append one record per row to `dest`.
    pub async fn scan_all<R: Record + Default>(
        &self,
        conn: &impl GenericClient,
        dest: &mut Vec<R>,
    ) -> OrmResult<()> {
        let columns = inferred_columns::<R>();
        let (kind, sql) = self.select_or_raw(Some(columns.as_slice()))?;
        let rows = fetch_rows(conn, kind, &sql).await?;
        dest.reserve(rows.len());
        for row in &rows {
            let mut item = R::default();
            item.read_row(&mut RowCursor::new(row))?;
            dest.push(item);
        }
        Ok(())
    }

    /// Run the query and return the first row as a fresh record.
    pub async fn fetch_one<R: Record + Default>(&self, conn: &impl GenericClient) -> OrmResult<R> {
        let mut out = R::default();
        self.scan(conn, &mut out).await?;
        Ok(out)
    }

    /// Run the query and return every row as a fresh record.
    pub async fn fetch_all<R: Record + Default>(
        &self,
        conn: &impl GenericClient,
    ) -> OrmResult<Vec<R>> {
        let mut out = Vec::new();
        self.scan_all(conn, &mut out).await?;
        Ok(out)
    }

    /// Run the query (explicit `select` or `raw` required) and map the first
    /// row with [`FromRow`], e.g. into a tuple.
    pub async fn scan_row<T: FromRow>(&self, conn: &impl GenericClient) -> OrmResult<T> {
        let (kind, sql) = self.select_or_raw(None)?;
        let row = fetch_first(conn, kind, &sql)
            .await?
            .ok_or_else(|| OrmError::not_found("Expected one row, got none"))?;
        T::from_row(&row)
    }

    /// Run the query (explicit `select` or `raw` required) and map every row.
    pub async fn scan_rows<T: FromRow>(&self, conn: &impl GenericClient) -> OrmResult<Vec<T>> {
        let (kind, sql) = self.select_or_raw(None)?;
        let rows = fetch_rows(conn, kind, &sql).await?;
        rows.iter().map(T::from_row).collect()
    }

    /// First column of the first row.
    pub async fn scalar<T>(&self, conn: &impl GenericClient) -> OrmResult<T>
    where
        T: for<'a> FromSql<'a>,
    {
        let (value,): (T,) = self.scan_row(conn).await?;
        Ok(value)
    }

    /// Select a single column and collect it.
    pub async fn pluck<T>(&self, conn: &impl GenericClient, column: &str) -> OrmResult<Vec<T>>
    where
        T: for<'a> FromSql<'a>,
    {
        let rows: Vec<(T,)> = self.replace_select(column).scan_rows(conn).await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    /// `count(pk)` of the first model, or `count(*)` if it has no primary key.
    pub async fn count(&self, conn: &impl GenericClient) -> OrmResult<i64> {
        self.count_query()?.scalar(conn).await
    }

    /// Load the `R` row whose primary key equals `key` into `dest`.
    pub async fn first<R: Record>(
        &self,
        conn: &impl GenericClient,
        dest: &mut R,
        key: impl IntoArg,
    ) -> OrmResult<()> {
        let Some(pk) = record::primary_key_column::<R>() else {
            return Err(invalid_query(format!(
                "first: {} has no primary key",
                R::table_name()
            )));
        };
        let Arg::One(value) = key.into_arg() else {
            return Err(invalid_query("first: key must be a single value"));
        };

        let mut q = self.with_default_model::<R>();
        let mut clause = Sql::new(format!("{}.{pk} = ", record::table_of::<R>()));
        clause.push_param(value);
        q.wheres.push(WhereClause {
            sql: clause,
            raw: false,
        });
        q.scan(conn, dest).await
    }

    /// Insert `record` and re-read it from the `RETURNING` row.
    pub async fn create<R: Record>(&self, conn: &impl GenericClient, record: &mut R) -> OrmResult<()> {
        let sql = self.to_insert_sql(record)?;
        let row = fetch_first(conn, StatementKind::Insert, &sql)
            .await?
            .ok_or_else(|| OrmError::not_found("INSERT returned no row"))?;
        record.read_row(&mut RowCursor::new(&row))
    }

    /// Update `record` and re-read it from the `RETURNING` row.
    ///
    /// Returns [`OrmError::NotFound`] when no row matched the filter.
    pub async fn updates<R: Record>(
        &self,
        conn: &impl GenericClient,
        record: &mut R,
    ) -> OrmResult<()> {
        let sql = self.to_update_sql(record)?;
        let row = fetch_first(conn, StatementKind::Update, &sql)
            .await?
            .ok_or_else(|| OrmError::not_found(format!("no {} row updated", R::table_name())))?;
        record.read_row(&mut RowCursor::new(&row))
    }

    /// Delete the rows matching `record` and return how many were removed.
    pub async fn delete<R: Record>(&self, conn: &impl GenericClient, record: &R) -> OrmResult<u64> {
        let sql = self.to_delete_sql(record)?;
        execute_sql(conn, StatementKind::Delete, &sql).await
    }

    /// Execute the statement set with [`Query::raw`].
    pub async fn exec(&self, conn: &impl GenericClient) -> OrmResult<u64> {
        self.check()?;
        let Some(raw) = &self.raw else {
            return Err(invalid_query("exec requires a raw statement"));
        };
        execute_sql(conn, StatementKind::Raw, raw).await
    }

    // ==================== Helpers ====================

    fn with_default_model<R: Record>(&self) -> Self {
        if self.tables.is_empty() {
            self.model::<R>()
        } else {
            self.clone()
        }
    }

    fn record_error(&mut self, err: OrmError) {
        if self.build_error.is_none() {
            self.build_error = Some(match err {
                OrmError::InvalidQuery(msg) => msg,
                other => other.to_string(),
            });
        }
    }

    fn check(&self) -> OrmResult<()> {
        match &self.build_error {
            Some(msg) => Err(invalid_query(msg.clone())),
            None => Ok(()),
        }
    }

    fn single_table(&self, verb: &str) -> OrmResult<&str> {
        match self.tables.as_slice() {
            [table] => Ok(table.as_str()),
            tables => Err(invalid_query(format!(
                "{verb} requires exactly one table, got {}",
                tables.len()
            ))),
        }
    }

    fn push_field_clause(&mut self, table: &str, field: &Field) {
        let mut sql = Sql::new(format!("{table}.{} = ", field.column()));
        sql.push_param(field.value.value.clone());
        self.wheres.push(WhereClause { sql, raw: false });
    }

    fn push_cte(&self, out: &mut Sql) {
        if let Some(cte) = &self.cte {
            out.push_sql(cte);
            out.push(" ");
        }
    }

    fn push_where(&self, out: &mut Sql) {
        if self.wheres.is_empty() {
            return;
        }
        out.push(" WHERE ");
        let wrap = self.wheres.len() > 1;
        for (i, clause) in self.wheres.iter().enumerate() {
            if i > 0 {
                out.push(" AND ");
            }
            if wrap && clause.raw {
                out.push("(").push_sql(&clause.sql).push(")");
            } else {
                out.push_sql(&clause.sql);
            }
        }
    }
}

fn inferred_columns<R: Record>() -> Vec<String> {
    record::qualified_columns::<R>(&record::table_of::<R>())
}

fn write_set<R: Record>(record: &R, skip_primary_key: bool) -> Vec<(String, WriteValue)> {
    record::persisted_fields(record)
        .into_iter()
        .filter(|f| !(skip_primary_key && f.def.primary_key))
        .filter_map(|f| {
            let column = f.column();
            if !f.value.blank {
                Some((column, WriteValue::Bound(f.value.value)))
            } else {
                f.def.default.map(|expr| (column, WriteValue::Expr(expr)))
            }
        })
        .collect()
}

fn push_write_value(out: &mut Sql, value: WriteValue) {
    match value {
        WriteValue::Bound(param) => {
            out.push_param(param);
        }
        WriteValue::Expr(expr) => {
            out.push(expr);
        }
    }
}

fn push_returning<R: Record>(out: &mut Sql, table: &str) {
    out.push(" RETURNING ");
    out.push(&record::qualified_columns::<R>(table).join(","));
}

fn invalid_query(message: impl Into<String>) -> OrmError {
    let message = message.into();
    tracing::error!(target: "pgmodel.sql", error = %message, "invalid query");
    OrmError::InvalidQuery(message)
}

fn log_statement(kind: StatementKind, sql: &str, param_count: usize) {
    tracing::debug!(
        target: "pgmodel.sql",
        query_type = ?kind,
        param_count,
        sql = %sql,
        "executing statement"
    );
}

async fn fetch_rows(
    conn: &impl GenericClient,
    kind: StatementKind,
    sql: &Sql,
) -> OrmResult<Vec<Row>> {
    sql.validate()?;
    let text = sql.to_sql();
    log_statement(kind, &text, sql.param_count());
    conn.query(&text, &sql.params_ref()).await
}

async fn fetch_first(
    conn: &impl GenericClient,
    kind: StatementKind,
    sql: &Sql,
) -> OrmResult<Option<Row>> {
    sql.validate()?;
    let text = sql.to_sql();
    log_statement(kind, &text, sql.param_count());
    conn.query_opt(&text, &sql.params_ref()).await
}

pub(crate) async fn execute_sql(conn: &impl GenericClient, kind: StatementKind, sql: &Sql) -> OrmResult<u64> {
    sql.validate()?;
    let text = sql.to_sql();
    log_statement(kind, &text, sql.param_count());
    conn.execute(&text, &sql.params_ref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::{Audit, Counter, Event, User};

    /// Executor that records statements and matches no rows.
    #[derive(Default)]
    struct NoRows {
        statements: std::sync::Mutex<Vec<String>>,
    }

    impl NoRows {
        fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }
    }

    impl GenericClient for NoRows {
        async fn query(
            &self,
            sql: &str,
            _params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
        ) -> OrmResult<Vec<Row>> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(Vec::new())
        }

        async fn execute(
            &self,
            sql: &str,
            _params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
        ) -> OrmResult<u64> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(0)
        }
    }

    fn debug_params(sql: &Sql) -> Vec<String> {
        sql.params().iter().map(|p| format!("{p:?}")).collect()
    }

    #[test]
    fn update_writes_non_key_fields_and_filters_by_key() {
        let record = Counter {
            counter: 5,
            name: "b".to_string(),
        };
        let sql = Query::new().to_update_sql(&record).unwrap();
        assert_eq!(
            sql.to_sql(),
            "UPDATE t SET name = $1 WHERE t.counter = $2 RETURNING t.counter,t.name"
        );
        assert_eq!(debug_params(&sql), vec!["\"b\"", "5"]);
    }

    #[test]
    fn where_model_with_key_ignores_other_fields() {
        let record = Counter {
            counter: 5,
            name: "ignored".to_string(),
        };
        let sql = Query::new()
            .where_model(&record)
            .to_select_sql::<Counter>()
            .unwrap();
        assert_eq!(sql.to_sql(), "SELECT t.counter,t.name FROM t WHERE t.counter = $1");
        assert_eq!(sql.param_count(), 1);
    }

    #[test]
    fn where_model_without_key_ands_non_blank_fields_in_order() {
        let record = User {
            name: "paolo".to_string(),
            audit: Audit {
                created_by: String::new(),
                revision: 3,
            },
            lang: Some("it".to_string()),
            ..User::default()
        };
        let sql = Query::new()
            .where_model(&record)
            .to_select_sql::<User>()
            .unwrap();
        assert_eq!(
            sql.to_sql(),
            "SELECT \"user\".id,\"user\".name,\"user\".created_by,\"user\".revision,\
             \"user\".\"from\",\"user\".language FROM \"user\" \
             WHERE \"user\".name = $1 AND \"user\".revision = $2 AND \"user\".language = $3"
        );
    }

    #[test]
    fn sequence_argument_expands_in_list() {
        let sql = Query::new()
            .table("t")
            .where_sql("x IN (?)", (vec![1_i64, 2, 3],))
            .to_select_sql::<Counter>()
            .unwrap();
        assert_eq!(sql.to_sql(), "SELECT t.counter,t.name FROM t WHERE x IN ($1,$2,$3)");
        assert_eq!(debug_params(&sql), vec!["1", "2", "3"]);
    }

    #[test]
    fn column_shorthand_binds_equality_or_list() {
        let sql = Query::new()
            .table("t")
            .where_sql("name", ("Paolo",))
            .where_sql("Counter", (vec![1_i64, 2],))
            .to_select_sql::<Counter>()
            .unwrap();
        assert_eq!(
            sql.to_sql(),
            "SELECT t.counter,t.name FROM t WHERE name = $1 AND counter IN ($2,$3)"
        );
    }

    #[test]
    fn combined_raw_fragments_are_parenthesized() {
        let sql = Query::new()
            .model::<Counter>()
            .where_sql("name = ? OR name = ?", ("a", "b"))
            .where_model(&Counter {
                counter: 9,
                name: String::new(),
            })
            .to_select_sql::<Counter>()
            .unwrap();
        assert_eq!(
            sql.to_sql(),
            "SELECT t.counter,t.name FROM t WHERE (name = $1 OR name = $2) AND t.counter = $3"
        );
    }

    #[test]
    fn cte_placeholders_come_first() {
        let sql = Query::new()
            .cte("WITH recent AS (SELECT id FROM posts WHERE at > ?)", (5_i64,))
            .table("t")
            .where_sql("name", ("x",))
            .to_select_sql::<Counter>()
            .unwrap();
        assert_eq!(
            sql.to_sql(),
            "WITH recent AS (SELECT id FROM posts WHERE at > $1) \
             SELECT t.counter,t.name FROM t WHERE name = $2"
        );
    }

    #[test]
    fn order_limit_offset_and_joins() {
        let sql = Query::new()
            .model::<Counter>()
            .joins("JOIN audit ON audit.id = t.counter")
            .order("Name DESC")
            .limit(10)
            .offset(20)
            .to_select_sql::<Counter>()
            .unwrap();
        assert_eq!(
            sql.to_sql(),
            "SELECT t.counter,t.name FROM t JOIN audit ON audit.id = t.counter \
             ORDER BY name desc LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn explicit_select_binds_before_where() {
        let sql = Query::new()
            .table("t")
            .select("name", ())
            .select("? AS tag", ("x",))
            .where_sql("counter > ?", (1_i64,))
            .build_select(None)
            .unwrap();
        assert_eq!(sql.to_sql(), "SELECT name,$1 AS tag FROM t WHERE counter > $2");
    }

    #[test]
    fn insert_binds_set_fields_and_inlines_defaults() {
        let sql = Query::new()
            .to_insert_sql(&Counter {
                counter: 0,
                name: "a".to_string(),
            })
            .unwrap();
        assert_eq!(
            sql.to_sql(),
            "INSERT INTO t (name) VALUES ($1) RETURNING t.counter,t.name"
        );

        let sql = Query::new().to_insert_sql(&Event::default()).unwrap();
        assert_eq!(
            sql.to_sql(),
            "INSERT INTO events (kind,at) VALUES ('generic',now()) RETURNING events.kind,events.at"
        );
        assert_eq!(sql.param_count(), 0);
    }

    #[test]
    fn insert_into_reserved_table_quotes_it() {
        let user = User {
            id: 1,
            from: "it".to_string(),
            ..User::default()
        };
        let sql = Query::new().to_insert_sql(&user).unwrap();
        assert_eq!(
            sql.to_sql(),
            "INSERT INTO \"user\" (id,revision,\"from\") VALUES ($1,1,$2) RETURNING \
             \"user\".id,\"user\".name,\"user\".created_by,\"user\".revision,\
             \"user\".\"from\",\"user\".language"
        );
    }

    #[test]
    fn structural_errors_are_invalid_query() {
        assert!(Query::new().to_insert_sql(&Counter::default()).unwrap_err().is_invalid_query());
        assert!(Query::new().to_update_sql(&Counter::default()).unwrap_err().is_invalid_query());
        assert!(Query::new().to_delete_sql(&Counter::default()).unwrap_err().is_invalid_query());
        assert!(Query::new().to_select_sql::<Counter>().unwrap_err().is_invalid_query());
        assert!(
            Query::new()
                .table("a")
                .table("b")
                .to_insert_sql(&Counter {
                    counter: 1,
                    name: String::new(),
                })
                .unwrap_err()
                .is_invalid_query()
        );
    }

    #[test]
    fn marker_mismatch_is_reported_at_build_time() {
        let q = Query::new().table("t").where_sql("a = ? AND b = ?", (1_i64,));
        let err = q.to_select_sql::<Counter>().unwrap_err();
        assert!(err.is_invalid_query());
    }

    #[test]
    fn delete_filters_by_key() {
        let sql = Query::new()
            .to_delete_sql(&Counter {
                counter: 3,
                name: "x".to_string(),
            })
            .unwrap();
        assert_eq!(sql.to_sql(), "DELETE FROM t WHERE t.counter = $1");
    }

    #[test]
    fn delete_accepts_prior_where_with_blank_record() {
        let sql = Query::new()
            .model::<Counter>()
            .where_sql("name LIKE ?", ("tmp%",))
            .to_delete_sql(&Counter::default())
            .unwrap();
        assert_eq!(sql.to_sql(), "DELETE FROM t WHERE name LIKE $1");
    }

    #[test]
    fn configuration_never_mutates_the_base() {
        let base = Query::new().table("t");
        let a = base.where_sql("name", ("a",));
        let _b = base.where_sql("name", ("b",)).limit(1);

        assert_eq!(
            base.to_select_sql::<Counter>().unwrap().to_sql(),
            "SELECT t.counter,t.name FROM t"
        );
        assert_eq!(
            a.to_select_sql::<Counter>().unwrap().to_sql(),
            "SELECT t.counter,t.name FROM t WHERE name = $1"
        );
    }

    #[test]
    fn count_uses_primary_key_when_available() {
        let sql = Query::new()
            .model::<Counter>()
            .count_query()
            .unwrap()
            .build_select(None)
            .unwrap();
        assert_eq!(sql.to_sql(), "SELECT count(t.counter) FROM t");

        let sql = Query::new()
            .model::<Event>()
            .count_query()
            .unwrap()
            .build_select(None)
            .unwrap();
        assert_eq!(sql.to_sql(), "SELECT count(*) FROM events");

        assert!(Query::new().table("t").count_query().is_err());
    }

    #[test]
    fn raw_statement_replaces_select() {
        let q = Query::new().raw("SELECT id FROM t WHERE id IN (?) AND name = ?", (vec![1_i64, 2], "x"));
        let (kind, sql) = q.select_or_raw(None).unwrap();
        assert_eq!(kind, StatementKind::Raw);
        assert_eq!(sql.to_sql(), "SELECT id FROM t WHERE id IN ($1,$2) AND name = $3");
    }

    #[tokio::test]
    async fn single_row_terminals_report_missing_rows_as_not_found() {
        let conn = NoRows::default();

        let mut counter = Counter::default();
        let err = Query::new()
            .first(&conn, &mut counter, 7_i64)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let mut counter = Counter {
            counter: 5,
            name: "b".to_string(),
        };
        let err = Query::new().updates(&conn, &mut counter).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(counter.name, "b");

        let err = Query::new()
            .table("t")
            .select("count(*)", ())
            .scalar::<i64>(&conn)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(
            conn.statements(),
            vec![
                "SELECT t.counter,t.name FROM t WHERE t.counter = $1".to_string(),
                "UPDATE t SET name = $1 WHERE t.counter = $2 RETURNING t.counter,t.name"
                    .to_string(),
                "SELECT count(*) FROM t".to_string(),
            ]
        );
    }
}
