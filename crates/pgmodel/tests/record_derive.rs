//! Derived records and the SQL they compile to. No database required.

mod common;

use common::{Meta, Person};
use pgmodel::record::{self, persisted_fields};
use pgmodel::{Query, Record};

#[derive(Debug, Clone, Default, PartialEq, Record)]
#[orm(table = "t")]
struct Counter {
    #[orm(id)]
    counter: i64,
    name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
struct UserProfile {
    user: String,
    r#from: String,
}

#[test]
fn table_name_defaults_to_snake_case() {
    assert_eq!(UserProfile::table_name(), "user_profile");
    assert_eq!(Person::table_name(), "pgmodel_people");
    assert_eq!(Meta::table_name(), "meta");
}

#[test]
fn reserved_field_names_are_quoted() {
    let columns: Vec<String> = UserProfile::field_defs()
        .iter()
        .map(|d| d.column_name())
        .collect();
    assert_eq!(columns, vec!["\"user\"", "\"from\""]);
}

#[test]
fn embedded_fields_flatten_and_skipped_fields_vanish() {
    let columns: Vec<String> = persisted_fields(&Person::default())
        .iter()
        .map(|f| f.column())
        .collect();
    assert_eq!(
        columns,
        vec!["counter", "name", "language", "created_at", "settings", "revision"]
    );
    assert_eq!(record::primary_key_column::<Person>().as_deref(), Some("counter"));
}

#[test]
fn updates_render_by_primary_key() {
    let record = Counter {
        counter: 5,
        name: "b".to_string(),
    };
    let sql = Query::new().to_update_sql(&record).unwrap();
    assert_eq!(
        sql.to_sql(),
        "UPDATE t SET name = $1 WHERE t.counter = $2 RETURNING t.counter,t.name"
    );
    assert_eq!(sql.param_count(), 2);
}

#[test]
fn insert_inlines_declared_defaults() {
    let sql = Query::new().to_insert_sql(&common::person("paolo")).unwrap();
    assert_eq!(
        sql.to_sql(),
        "INSERT INTO pgmodel_people (name,created_at,settings,revision) \
         VALUES ($1,now(),'{}',1) RETURNING pgmodel_people.counter,pgmodel_people.name,\
         pgmodel_people.language,pgmodel_people.created_at,pgmodel_people.settings,\
         pgmodel_people.revision"
    );
}

#[test]
fn delete_of_blank_record_is_rejected() {
    let err = Query::new().to_delete_sql(&Counter::default()).unwrap_err();
    assert!(err.is_invalid_query());
}

// Compile-only: the transaction macro composes with Session shortcuts.
#[allow(dead_code)]
async fn transaction_macro_compiles(db: &pgmodel::Database) -> pgmodel::OrmResult<i64> {
    use pgmodel::Session;

    pgmodel::transaction!(db, tx, {
        let mut row = Counter {
            counter: 0,
            name: "x".to_string(),
        };
        tx.create(&mut row).await?;
        Ok::<i64, pgmodel::OrmError>(row.counter)
    })
}
