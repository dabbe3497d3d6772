//! Transactions over a pooled connection.
//!
//! [`Database::begin`](crate::Database::begin) checks out one connection and
//! issues `BEGIN`. The returned [`Transaction`] implements [`GenericClient`],
//! so every [`Query`](crate::Query) terminal method and every
//! [`Session`](crate::Session) shortcut runs inside it.
//!
//! For commit/rollback handling, use the [`transaction!`](crate::transaction)
//! macro.
//!
//! # Example
//!
//! ```ignore
//! use pgmodel::prelude::*;
//!
//! # async fn demo(db: &Database) -> OrmResult<()> {
//! pgmodel::transaction!(db, tx, {
//!     let mut order = Order { total: 100, ..Default::default() };
//!     tx.create(&mut order).await?;
//!     tx.exec("UPDATE stock SET qty = qty - 1 WHERE item = ?", (order.item,)).await?;
//!     Ok(())
//! })?;
//! # Ok(()) }
//! ```

use crate::client::GenericClient;
use crate::error::{OrmError, OrmResult};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// Runs the given block inside a database transaction.
///
/// - Begins a transaction via `$db.begin().await`.
/// - Commits on `Ok(_)`.
/// - Rolls back on `Err(_)`; if that fails too, returns
///   [`OrmError::RollbackFailed`](crate::OrmError::RollbackFailed) carrying both errors.
///
/// The block must evaluate to `pgmodel::OrmResult<T>`.
#[macro_export]
macro_rules! transaction {
    ($db:expr, $tx:ident, $body:block) => {{
        let $tx = ($db).begin().await?;

        let __pgmodel_tx_body_result = async { $body }.await;
        match __pgmodel_tx_body_result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(error) => match $tx.rollback().await {
                Ok(()) => Err(error),
                Err(rollback_err) => Err($crate::OrmError::RollbackFailed {
                    error: ::std::boxed::Box::new(error),
                    rollback: ::std::boxed::Box::new(rollback_err),
                }),
            },
        }
    }};
}

/// An open transaction owning one pooled connection.
///
/// Finish it with [`Transaction::commit`] or [`Transaction::rollback`]. A
/// transaction dropped while still open discards its connection instead of
/// returning it to the pool, which makes the server roll it back.
pub struct Transaction {
    conn: Option<deadpool_postgres::Object>,
}

impl Transaction {
    pub(crate) async fn begin(conn: deadpool_postgres::Object) -> OrmResult<Self> {
        conn.batch_execute("BEGIN")
            .await
            .map_err(OrmError::from_db_error)?;
        tracing::debug!(target: "pgmodel.sql", "BEGIN");
        Ok(Self { conn: Some(conn) })
    }

    /// Commit the transaction and return the connection to the pool.
    pub async fn commit(mut self) -> OrmResult<()> {
        self.finish("COMMIT").await
    }

    /// Roll back the transaction and return the connection to the pool.
    pub async fn rollback(mut self) -> OrmResult<()> {
        self.finish("ROLLBACK").await
    }

    async fn finish(&mut self, statement: &str) -> OrmResult<()> {
        let conn = self.client()?;
        conn.batch_execute(statement)
            .await
            .map_err(OrmError::from_db_error)?;
        tracing::debug!(target: "pgmodel.sql", statement, "transaction finished");
        self.conn = None;
        Ok(())
    }

    fn client(&self) -> OrmResult<&deadpool_postgres::Object> {
        self.conn
            .as_ref()
            .ok_or_else(|| OrmError::Other("transaction already finished".to_string()))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(
                target: "pgmodel.sql",
                "transaction dropped without commit or rollback, discarding its connection"
            );
            drop(deadpool_postgres::Object::take(conn));
        }
    }
}

impl GenericClient for Transaction {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        GenericClient::query(self.client()?, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        GenericClient::execute(self.client()?, sql, params).await
    }
}
