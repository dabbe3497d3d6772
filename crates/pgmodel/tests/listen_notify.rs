mod common;

use pgmodel::{Database, ListenerConfig, ListenerState, OrmError, OrmResult, Session};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

fn unique_channel(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before UNIX_EPOCH")
        .as_nanos();
    format!("{prefix}_{}_{nanos}", std::process::id())
}

#[tokio::test]
async fn listen_notify_invokes_callback() -> OrmResult<()> {
    let Some(db) = common::connect("listen_notify_invokes_callback").await? else {
        return Ok(());
    };
    assert_eq!(db.listener_state().await, None);

    let channel = unique_channel("pgmodel_listen");
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Vec<String>>();
    db.listen(&channel, move |payloads| {
        let _ = seen_tx.send(payloads);
    })
    .await?;
    assert_eq!(db.listener_state().await, Some(ListenerState::Connected));

    db.notify(&channel, &["payload"]).await?;
    let got = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("notification within 5s");
    assert_eq!(got, Some(vec!["payload".to_string()]));

    db.notify(&channel, &["a", "b"]).await?;
    let got = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("notification within 5s");
    assert_eq!(got, Some(vec!["a,b".to_string()]));

    let err = db.listen(&channel, |_| {}).await.unwrap_err();
    assert!(matches!(err, OrmError::AlreadySubscribed(ref c) if *c == channel));

    db.unlisten(&channel).await?;
    db.listen(&channel, |_| {}).await?;
    db.unlisten("*").await?;

    let stats = db.listener_stats().await.expect("listener exists");
    assert_eq!(stats.reconnect_count, 0);

    db.close_listener().await?;
    assert_eq!(db.listener_state().await, None);
    Ok(())
}

#[tokio::test]
async fn unlisten_requires_a_listener() -> OrmResult<()> {
    let Some(db) = common::connect("unlisten_requires_a_listener").await? else {
        return Ok(());
    };
    assert!(db.unlisten("nothing").await.is_err());
    assert!(db.unlisten_all().await.is_err());

    // NOTIFY without payload needs no listener.
    db.notify(&unique_channel("pgmodel_bare"), &[]).await?;
    Ok(())
}

/// Kill the listener's backend, found by the `LISTEN` it last ran.
async fn terminate_listener_backend(db: &Database, channel: &str) -> OrmResult<i64> {
    db.raw(
        "SELECT count(pg_terminate_backend(pid)) FROM pg_stat_activity \
         WHERE pid <> pg_backend_pid() AND query LIKE ?",
        (format!("LISTEN %{channel}%"),),
    )
    .scalar(db)
    .await
}

async fn wait_for_state(db: &Database, state: ListenerState) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while db.listener_state().await != Some(state) {
        assert!(Instant::now() < deadline, "listener never reached {state:?}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn listener_reconnects_and_relistens() -> OrmResult<()> {
    let config = ListenerConfig::new()
        .reconnect_backoff(Duration::from_millis(50), Duration::from_millis(200));
    let Some(db) = common::connect_with_listener("listener_reconnects_and_relistens", config).await?
    else {
        return Ok(());
    };

    let channel = unique_channel("pgmodel_reconnect");
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Vec<String>>();
    db.listen(&channel, move |payloads| {
        let _ = seen_tx.send(payloads);
    })
    .await?;

    assert_eq!(terminate_listener_backend(&db, &channel).await?, 1);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let stats = db.listener_stats().await.expect("listener exists");
        if stats.reconnect_count > 0 && db.listener_state().await == Some(ListenerState::Connected) {
            assert_eq!(stats.reconnect_count, 1);
            break;
        }
        assert!(Instant::now() < deadline, "listener did not reconnect");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    db.notify(&channel, &["after"]).await?;
    let got = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("notification after reconnect");
    assert_eq!(got, Some(vec!["after".to_string()]));

    db.close_listener().await?;
    Ok(())
}

#[tokio::test]
async fn listen_replaces_a_stopped_listener() -> OrmResult<()> {
    let config = ListenerConfig::new().reconnect(false);
    let Some(db) = common::connect_with_listener("listen_replaces_a_stopped_listener", config).await?
    else {
        return Ok(());
    };

    let first = unique_channel("pgmodel_stopped");
    db.listen(&first, |_| {}).await?;
    assert_eq!(terminate_listener_backend(&db, &first).await?, 1);
    wait_for_state(&db, ListenerState::Closed).await;

    let second = unique_channel("pgmodel_fresh");
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Vec<String>>();
    db.listen(&second, move |payloads| {
        let _ = seen_tx.send(payloads);
    })
    .await?;
    assert_eq!(db.listener_state().await, Some(ListenerState::Connected));

    db.notify(&second, &["fresh"]).await?;
    let got = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("notification on the new listener");
    assert_eq!(got, Some(vec!["fresh".to_string()]));

    db.close_listener().await?;
    Ok(())
}

#[tokio::test]
async fn bare_notify_accepts_question_marks_in_channel() -> OrmResult<()> {
    let Some(db) = common::connect("bare_notify_accepts_question_marks_in_channel").await? else {
        return Ok(());
    };
    db.notify(&unique_channel("pgmodel_what?"), &[]).await?;
    Ok(())
}
