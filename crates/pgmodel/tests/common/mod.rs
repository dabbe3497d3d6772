#![allow(dead_code)]

use pgmodel::{Database, DatabaseConfig, ListenerConfig, OrmResult, Record};

/// Connect to `DATABASE_URL`, or `None` when it is not set.
///
/// A single pooled connection keeps `TEMP` tables visible to every query.
pub async fn connect(test: &str) -> OrmResult<Option<Database>> {
    connect_with_listener(test, ListenerConfig::default()).await
}

/// Like [`connect`], with custom listener settings.
pub async fn connect_with_listener(
    test: &str,
    listener: ListenerConfig,
) -> OrmResult<Option<Database>> {
    dotenvy::dotenv().ok();
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL is not set; skipping {test}");
        return Ok(None);
    };
    let config = DatabaseConfig::new().max_pool_size(1).listener(listener);
    let db = Database::connect_with_config(&url, config).await?;
    Ok(Some(db))
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
pub struct Meta {
    #[orm(default = "'{}'")]
    pub settings: pgmodel::JsonObject,
    #[orm(default = "1")]
    pub revision: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
#[orm(table = "pgmodel_people")]
pub struct Person {
    #[orm(primary_key)]
    pub counter: i64,
    pub name: String,
    #[orm(column = "language")]
    pub lang: Option<String>,
    #[orm(default = "now()")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[orm(embed)]
    pub meta: Meta,
    #[orm(skip)]
    pub scratch: Vec<u8>,
}

pub const PEOPLE_DDL: &str = "CREATE TEMP TABLE IF NOT EXISTS pgmodel_people (
    counter bigserial PRIMARY KEY,
    name text NOT NULL UNIQUE,
    language text,
    created_at timestamptz NOT NULL DEFAULT now(),
    settings jsonb,
    revision integer NOT NULL DEFAULT 1
)";

pub fn person(name: &str) -> Person {
    Person {
        name: name.to_string(),
        ..Person::default()
    }
}
