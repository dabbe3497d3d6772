//! # pgmodel
//!
//! Record-driven PostgreSQL data access.
//!
//! ## Features
//!
//! - **Records, not strings**: a struct implementing [`Record`] (usually via
//!   `#[derive(Record)]`) drives column lists, WHERE filters and `RETURNING`
//! - **Immutable builder**: every [`Query`] configuration call returns a new
//!   value, so a base query can be shared and extended freely
//! - **`?` placeholders**: written as `?`, numbered `$1..$n` at render time;
//!   sequence arguments expand `IN (?)` into a placeholder list
//! - **Re-hydration**: `create` and `updates` read the row back from
//!   `RETURNING`, picking up defaults and triggers
//! - **Transaction-friendly**: pass a [`Transaction`] anywhere a
//!   [`GenericClient`] is expected
//! - **LISTEN/NOTIFY**: per-channel callbacks on a dedicated, self-healing
//!   connection
//!
//! ```ignore
//! use pgmodel::prelude::*;
//!
//! #[derive(Debug, Default, Record)]
//! #[orm(table = "users")]
//! struct User {
//!     #[orm(primary_key)]
//!     counter: i64,
//!     name: String,
//! }
//!
//! let db = Database::connect(&std::env::var("DATABASE_URL")?).await?;
//!
//! let mut user = User { name: "paolo".into(), ..Default::default() };
//! db.create(&mut user).await?;
//!
//! let names: Vec<String> = db
//!     .model::<User>()
//!     .where_sql("counter IN (?)", (vec![1_i64, 2, 3],))
//!     .order("name")
//!     .pluck(&db, "name")
//!     .await?;
//!
//! db.listen("users", |payloads| println!("{payloads:?}")).await?;
//! db.notify("users", &["created"]).await?;
//! ```

extern crate self as pgmodel;

pub mod args;
pub mod client;
pub mod database;
pub mod error;
pub mod ident;
pub mod listen;
pub mod prelude;
pub mod query;
pub mod record;
pub mod row;
pub mod session;
pub mod sql;
pub mod transaction;
pub mod types;

pub use args::{Arg, IntoArg, IntoArgs, Param, arg};
pub use client::GenericClient;
pub use database::{Database, DatabaseConfig};
pub use error::{OrmError, OrmResult};
pub use ident::{escape, quote_ident};
pub use listen::{
    Listener, ListenerConfig, ListenerQueuePolicy, ListenerState, ListenerStats,
    NotificationCallback,
};
pub use query::{ModelMeta, Query, StatementKind};
pub use record::{FieldDef, FieldValue, Record};
pub use row::{FromRow, RowCursor};
pub use session::Session;
pub use sql::Sql;
pub use transaction::Transaction;
pub use types::JsonObject;

#[cfg(feature = "derive")]
pub use pgmodel_derive::Record;
