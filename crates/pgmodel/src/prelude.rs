//! Convenient imports for typical `pgmodel` usage.
//!
//! ```ignore
//! use pgmodel::prelude::*;
//! ```

pub use crate::{
    Database, FromRow, GenericClient, JsonObject, OrmError, OrmResult, Query, Record,
    Session, Transaction, arg,
};
