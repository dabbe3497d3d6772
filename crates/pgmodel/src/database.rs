//! Pooled database handle.

use crate::client::GenericClient;
use crate::error::{OrmError, OrmResult};
use crate::ident::quote_ident;
use crate::listen::{Listener, ListenerConfig, ListenerState, ListenerStats};
use crate::query::{StatementKind, execute_sql};
use crate::sql::Sql;
use crate::transaction::Transaction;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

const DEFAULT_MAX_POOL_SIZE: usize = 16;

/// Settings for [`Database::connect_with_config`].
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Maximum number of pooled connections.
    pub max_pool_size: usize,
    /// Settings of the LISTEN connection, created on the first `listen`.
    pub listener: ListenerConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            listener: ListenerConfig::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    pub fn listener(mut self, listener: ListenerConfig) -> Self {
        self.listener = listener;
        self
    }
}

/// A connection pool plus the lazily created notification listener.
///
/// `Database` never carries query state: build queries with
/// [`Session`](crate::Session) entry points or [`Query`](crate::Query) and pass the
/// database as the executor.
///
/// ```ignore
/// use pgmodel::prelude::*;
///
/// let db = Database::connect("host=localhost user=postgres dbname=app").await?;
/// let n: i64 = db.model::<User>().count(&db).await?;
/// ```
pub struct Database {
    pool: Pool,
    pg_config: tokio_postgres::Config,
    listener_config: ListenerConfig,
    listener: Mutex<Option<Listener>>,
}

impl Database {
    /// Connect with default settings.
    ///
    /// The connection string is passed verbatim to `tokio_postgres::Config`
    /// (key/value or URL form). The server is pinged before returning.
    pub async fn connect(connection: &str) -> OrmResult<Self> {
        Self::connect_with_config(connection, DatabaseConfig::default()).await
    }

    /// Connect with custom pool and listener settings.
    pub async fn connect_with_config(connection: &str, config: DatabaseConfig) -> OrmResult<Self> {
        let pg_config: tokio_postgres::Config = connection
            .parse()
            .map_err(|e: tokio_postgres::Error| OrmError::Connection(e.to_string()))?;

        let mgr = Manager::from_config(
            pg_config.clone(),
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(mgr)
            .max_size(config.max_pool_size)
            .build()
            .map_err(|e| OrmError::Pool(e.to_string()))?;

        let db = Self {
            pool,
            pg_config,
            listener_config: config.listener,
            listener: Mutex::new(None),
        };

        db.ping().await.map_err(|e| {
            OrmError::Connection(format!("Connection failed. Unable to ping the DB: {e}"))
        })?;
        tracing::info!(
            target: "pgmodel.sql",
            max_pool_size = config.max_pool_size,
            "database connected"
        );
        Ok(db)
    }

    /// Check out a connection and run `SELECT 1`.
    pub async fn ping(&self) -> OrmResult<()> {
        let client = self.pool.get().await?;
        client
            .batch_execute("SELECT 1")
            .await
            .map_err(OrmError::from_db_error)
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Begin a transaction on a dedicated pooled connection.
    pub async fn begin(&self) -> OrmResult<Transaction> {
        let conn = self.pool.get().await?;
        Transaction::begin(conn).await
    }

    // ==================== Notifications ====================

    /// Register `callback` for `channel` and execute `LISTEN "channel"`.
    ///
    /// The listener connection is created on the first call, and again if
    /// its worker has stopped. Each notification invokes `callback` with its
    /// payload as a one-element list. Fails with [`OrmError::AlreadySubscribed`] if `channel` already has a
    /// callback.
    pub async fn listen<F>(&self, channel: &str, callback: F) -> OrmResult<()>
    where
        F: Fn(Vec<String>) + Send + Sync + 'static,
    {
        let mut guard = self.listener.lock().await;
        let listener = match guard.take() {
            Some(listener) if listener.state() != ListenerState::Closed => listener,
            stale => {
                if stale.is_some() {
                    tracing::info!(target: "pgmodel.listen", "listener worker stopped, reconnecting");
                }
                Listener::connect(self.pg_config.clone(), self.listener_config.clone()).await?
            }
        };
        let listener = guard.insert(listener);
        listener.listen(channel, Arc::new(callback)).await
    }

    /// Execute `UNLISTEN "channel"` and drop its callback. `"*"` unlistens
    /// every channel.
    pub async fn unlisten(&self, channel: &str) -> OrmResult<()> {
        if channel == "*" {
            return self.unlisten_all().await;
        }
        let guard = self.listener.lock().await;
        let Some(listener) = guard.as_ref() else {
            return Err(no_listener());
        };
        listener.unlisten(channel).await
    }

    /// Execute `UNLISTEN *` and drop every callback.
    pub async fn unlisten_all(&self) -> OrmResult<()> {
        let guard = self.listener.lock().await;
        let Some(listener) = guard.as_ref() else {
            return Err(no_listener());
        };
        listener.unlisten_all().await
    }

    /// Send a notification on `channel`.
    ///
    /// Payload fragments are joined with commas and sent with `pg_notify`;
    /// without payloads a bare `NOTIFY "channel"` is issued.
    pub async fn notify(&self, channel: &str, payload: &[&str]) -> OrmResult<()> {
        let sql = notify_statement(channel, payload)?;
        execute_sql(self, StatementKind::Raw, &sql).await?;
        Ok(())
    }

    /// Close the listener connection, if any. A later `listen` opens a new one.
    pub async fn close_listener(&self) -> OrmResult<()> {
        let listener = self.listener.lock().await.take();
        match listener {
            Some(listener) => listener.close().await,
            None => Ok(()),
        }
    }

    /// State of the listener worker, `None` before the first `listen`.
    pub async fn listener_state(&self) -> Option<ListenerState> {
        self.listener.lock().await.as_ref().map(Listener::state)
    }

    /// Listener runtime statistics, `None` before the first `listen`.
    pub async fn listener_stats(&self) -> Option<ListenerStats> {
        self.listener.lock().await.as_ref().map(Listener::stats)
    }
}

fn notify_statement(channel: &str, payload: &[&str]) -> OrmResult<Sql> {
    if payload.is_empty() {
        return Ok(Sql::new(format!("NOTIFY {}", quote_ident(channel)?)));
    }
    let mut sql = Sql::new("SELECT pg_notify(");
    sql.push_bind(channel.to_string())
        .push(", ")
        .push_bind(payload.join(","))
        .push(")");
    Ok(sql)
}

fn no_listener() -> OrmError {
    OrmError::validation("no listener: call listen(channel, callback) first")
}

impl GenericClient for Database {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<Vec<Row>> {
        let client = self.pool.get().await?;
        GenericClient::query(&client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> OrmResult<u64> {
        let client = self.pool.get().await?;
        GenericClient::execute(&client, sql, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_notify_quotes_the_channel_verbatim() {
        let sql = notify_statement("a?b", &[]).unwrap();
        assert_eq!(sql.to_sql(), "NOTIFY \"a?b\"");
        assert_eq!(sql.param_count(), 0);

        assert!(notify_statement("", &[]).is_err());
    }

    #[test]
    fn payload_notify_binds_channel_and_joined_payload() {
        let sql = notify_statement("orders", &["a", "b"]).unwrap();
        assert_eq!(sql.to_sql(), "SELECT pg_notify($1, $2)");
        assert_eq!(sql.param_count(), 2);
    }
}
