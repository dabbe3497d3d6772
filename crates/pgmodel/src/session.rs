//! Record-level shortcuts available on every [`GenericClient`].
//!
//! ```ignore
//! use pgmodel::prelude::*;
//!
//! let mut user = User { name: "paolo".into(), ..Default::default() };
//! db.create(&mut user).await?;          // INSERT ... RETURNING, user.id is set
//! user.name = "galeone".into();
//! db.updates(&mut user).await?;         // UPDATE ... WHERE users.id = $2 RETURNING ...
//!
//! let mut same = User::default();
//! db.first(&mut same, user.id).await?;
//! ```

use crate::args::{IntoArg, IntoArgs};
use crate::client::GenericClient;
use crate::error::OrmResult;
use crate::query::Query;
use crate::record::Record;
use std::future::Future;

/// Entry points to [`Query`] plus the one-shot terminal operations.
pub trait Session: GenericClient + Sized {
    /// An empty builder.
    fn builder(&self) -> Query {
        Query::new()
    }

    /// A builder over `R`'s table.
    fn model<R: Record>(&self) -> Query {
        Query::new().model::<R>()
    }

    /// A builder over a named table.
    fn table(&self, name: &str) -> Query {
        Query::new().table(name)
    }

    /// A builder running a raw `?`-marked statement.
    fn raw(&self, sql: &str, args: impl IntoArgs) -> Query {
        Query::new().raw(sql, args)
    }

    /// Insert `record` and re-read it from the `RETURNING` row.
    fn create<'a, R: Record>(
        &'a self,
        record: &'a mut R,
    ) -> impl Future<Output = OrmResult<()>> + Send + 'a {
        async move { Query::new().create(self, record).await }
    }

    /// Update `record` by primary key (or its non-blank fields) and re-read it.
    fn updates<'a, R: Record>(
        &'a self,
        record: &'a mut R,
    ) -> impl Future<Output = OrmResult<()>> + Send + 'a {
        async move { Query::new().updates(self, record).await }
    }

    /// Delete the rows matching `record`.
    fn delete<'a, R: Record>(
        &'a self,
        record: &'a R,
    ) -> impl Future<Output = OrmResult<u64>> + Send + 'a {
        async move { Query::new().delete(self, record).await }
    }

    /// Load the row whose primary key equals `key` into `dest`.
    fn first<'a, R: Record>(
        &'a self,
        dest: &'a mut R,
        key: impl IntoArg,
    ) -> impl Future<Output = OrmResult<()>> + Send + 'a {
        let key = key.into_arg();
        async move { Query::new().first(self, dest, key).await }
    }

    /// Execute a raw `?`-marked statement and return the affected row count.
    fn exec<'a>(
        &'a self,
        sql: &str,
        args: impl IntoArgs,
    ) -> impl Future<Output = OrmResult<u64>> + Send + 'a {
        let query = Query::new().raw(sql, args);
        async move { query.exec(self).await }
    }
}

impl<C: GenericClient> Session for C {}
