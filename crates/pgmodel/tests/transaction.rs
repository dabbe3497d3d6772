mod common;

use common::{PEOPLE_DDL, Person, person};
use pgmodel::prelude::*;

async fn count_named(db: &Database, name: &str) -> OrmResult<i64> {
    db.model::<Person>().where_sql("name", (name,)).count(db).await
}

#[tokio::test]
async fn transaction_macro_commits_and_rolls_back() -> OrmResult<()> {
    let Some(db) = common::connect("transaction_macro_commits_and_rolls_back").await? else {
        return Ok(());
    };
    db.exec(PEOPLE_DDL, ()).await?;

    let counter = pgmodel::transaction!(&db, tx, {
        let mut p = person("tx_committed");
        tx.create(&mut p).await?;
        Ok::<i64, OrmError>(p.counter)
    })?;
    assert!(counter > 0);
    assert_eq!(count_named(&db, "tx_committed").await?, 1);

    let result: OrmResult<()> = async {
        pgmodel::transaction!(&db, tx, {
            tx.create(&mut person("tx_rolled_back")).await?;
            Err::<(), OrmError>(OrmError::validation("abort"))
        })
    }
    .await;
    assert!(matches!(result, Err(OrmError::Validation(_))));
    assert_eq!(count_named(&db, "tx_rolled_back").await?, 0);
    Ok(())
}

#[tokio::test]
async fn dropped_transaction_discards_its_work() -> OrmResult<()> {
    let Some(db) = common::connect("dropped_transaction_discards_its_work").await? else {
        return Ok(());
    };

    {
        let tx = db.begin().await?;
        tx.exec(PEOPLE_DDL, ()).await?;
        tx.create(&mut person("tx_dropped")).await?;
    }

    // The temp table lived on the discarded connection.
    db.exec(PEOPLE_DDL, ()).await?;
    assert_eq!(count_named(&db, "tx_dropped").await?, 0);
    Ok(())
}
