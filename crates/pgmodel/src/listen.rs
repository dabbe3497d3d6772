//! PostgreSQL LISTEN/NOTIFY support.
//!
//! A [`Listener`] owns a dedicated connection driven by one background worker.
//! The worker multiplexes three event sources:
//!
//! - commands from the handle (`listen`, `unlisten`, `close`),
//! - notifications read from the connection,
//! - a keepalive timer that pings the server after a quiet period.
//!
//! Every registered channel has a bounded queue and one consumer task that
//! invokes the channel's callback with the notification payload. When the
//! connection is lost the worker reconnects with exponential backoff and
//! re-issues `LISTEN` for every registered channel.

use crate::error::{OrmError, OrmResult};
use crate::ident::quote_ident;
use std::collections::HashMap;
use std::future::poll_fn;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{AsyncMessage, Socket};

const DEFAULT_QUEUE_CAPACITY: usize = 256;
const DEFAULT_RECONNECT_BACKOFF_MIN: Duration = Duration::from_secs(10);
const DEFAULT_RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(60);
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(90);

/// Callback invoked with the payloads of a notification.
pub type NotificationCallback = Arc<dyn Fn(Vec<String>) + Send + Sync>;

/// Queue policy when a channel's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerQueuePolicy {
    /// Drop new incoming notifications.
    DropNewest,
    /// Apply backpressure and wait for the consumer.
    Block,
}

/// Connection state of a listener worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl ListenerState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Connected => 1,
            Self::Reconnecting => 2,
            Self::Closed => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Connected,
            2 => Self::Reconnecting,
            _ => Self::Closed,
        }
    }
}

/// Runtime statistics for a listener worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenerStats {
    /// Number of successful reconnects.
    pub reconnect_count: u64,
    /// Number of dropped notifications due to queue policy.
    pub dropped_notifications: u64,
}

/// Configuration for a [`Listener`].
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Per-channel notification queue capacity.
    pub queue_capacity: usize,
    /// Queue overflow policy.
    pub queue_policy: ListenerQueuePolicy,
    /// Whether to reconnect automatically after connection loss.
    pub reconnect: bool,
    /// Minimum reconnect backoff.
    pub reconnect_backoff_min: Duration,
    /// Maximum reconnect backoff.
    pub reconnect_backoff_max: Duration,
    /// Quiet period after which the connection is pinged.
    pub keepalive_interval: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_policy: ListenerQueuePolicy::DropNewest,
            reconnect: true,
            reconnect_backoff_min: DEFAULT_RECONNECT_BACKOFF_MIN,
            reconnect_backoff_max: DEFAULT_RECONNECT_BACKOFF_MAX,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }
}

impl ListenerConfig {
    /// Create config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set per-channel queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set queue policy.
    pub fn queue_policy(mut self, policy: ListenerQueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    /// Enable or disable reconnect.
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set reconnect backoff range.
    pub fn reconnect_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.reconnect_backoff_min = min;
        self.reconnect_backoff_max = max;
        self
    }

    /// Set the keepalive interval.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }
}

struct ListenerShared {
    state: AtomicU8,
    reconnect_count: AtomicU64,
    dropped_notifications: AtomicU64,
}

impl ListenerShared {
    fn new(initial_state: ListenerState) -> Self {
        Self {
            state: AtomicU8::new(initial_state.as_u8()),
            reconnect_count: AtomicU64::new(0),
            dropped_notifications: AtomicU64::new(0),
        }
    }

    fn set_state(&self, state: ListenerState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }

    fn state(&self) -> ListenerState {
        ListenerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn inc_reconnect(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_dropped_notifications(&self) {
        self.dropped_notifications.fetch_add(1, Ordering::Relaxed);
    }

    fn stats(&self) -> ListenerStats {
        ListenerStats {
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
            dropped_notifications: self.dropped_notifications.load(Ordering::Relaxed),
        }
    }
}

enum ListenerCommand {
    Listen {
        channel: String,
        callback: NotificationCallback,
        resp: oneshot::Sender<OrmResult<()>>,
    },
    Unlisten {
        channel: String,
        resp: oneshot::Sender<OrmResult<()>>,
    },
    UnlistenAll {
        resp: oneshot::Sender<OrmResult<()>>,
    },
    Close {
        resp: oneshot::Sender<OrmResult<()>>,
    },
}

/// A registered channel: its queue and the task draining it.
struct Registration {
    queue: mpsc::Sender<String>,
    _consumer: JoinHandle<()>,
}

impl Registration {
    fn spawn(channel: &str, callback: NotificationCallback, capacity: usize) -> Self {
        let (queue, mut rx) = mpsc::channel::<String>(capacity.max(1));
        let channel = channel.to_string();
        let consumer = tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                let callback = callback.clone();
                // Callbacks are synchronous and may block; keep them off the runtime.
                if let Err(e) = tokio::task::spawn_blocking(move || callback(vec![payload])).await {
                    tracing::warn!(
                        target: "pgmodel.listen",
                        channel = %channel,
                        error = %e,
                        "notification callback failed"
                    );
                }
            }
            tracing::trace!(target: "pgmodel.listen", channel = %channel, "consumer finished");
        });
        Self {
            queue,
            _consumer: consumer,
        }
    }
}

type Registrations = HashMap<String, Registration>;

/// Dedicated PostgreSQL LISTEN client dispatching to per-channel callbacks.
///
/// A listener uses its own connection, never one from the query pool.
pub struct Listener {
    cmd_tx: mpsc::Sender<ListenerCommand>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<ListenerShared>,
}

impl Listener {
    /// Connect a listener with `NoTls`.
    pub async fn connect(
        pg_config: tokio_postgres::Config,
        config: ListenerConfig,
    ) -> OrmResult<Self> {
        Self::connect_with_tls(pg_config, tokio_postgres::NoTls, config).await
    }

    /// Connect with a custom TLS connector.
    pub async fn connect_with_tls<T>(
        pg_config: tokio_postgres::Config,
        tls: T,
        config: ListenerConfig,
    ) -> OrmResult<Self>
    where
        T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
        T::Stream: Sync + Send,
        T::TlsConnect: Sync + Send,
        <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
    {
        let shared = Arc::new(ListenerShared::new(ListenerState::Connecting));

        let (client, connection) = pg_config
            .connect(tls.clone())
            .await
            .map_err(|e| OrmError::Connection(format!("listener: {e}")))?;

        shared.set_state(ListenerState::Connected);
        tracing::info!(target: "pgmodel.listen", "listener connected");

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let worker = tokio::spawn(run_listener_loop(
            pg_config,
            tls,
            config,
            ActiveConnection { client, connection },
            cmd_rx,
            shared.clone(),
        ));

        Ok(Self {
            cmd_tx,
            worker: Some(worker),
            shared,
        })
    }

    /// Register `callback` for `channel` and execute `LISTEN "channel"`.
    ///
    /// Fails with [`OrmError::AlreadySubscribed`] if the channel already has
    /// a callback.
    pub async fn listen(&self, channel: &str, callback: NotificationCallback) -> OrmResult<()> {
        send_command(&self.cmd_tx, |resp| ListenerCommand::Listen {
            channel: channel.to_string(),
            callback,
            resp,
        })
        .await
    }

    /// Execute `UNLISTEN "channel"` and drop its callback.
    pub async fn unlisten(&self, channel: &str) -> OrmResult<()> {
        send_command(&self.cmd_tx, |resp| ListenerCommand::Unlisten {
            channel: channel.to_string(),
            resp,
        })
        .await
    }

    /// Execute `UNLISTEN *` and drop every callback.
    pub async fn unlisten_all(&self) -> OrmResult<()> {
        send_command(&self.cmd_tx, |resp| ListenerCommand::UnlistenAll { resp }).await
    }

    /// Current worker state.
    pub fn state(&self) -> ListenerState {
        self.shared.state()
    }

    /// Current runtime stats.
    pub fn stats(&self) -> ListenerStats {
        self.shared.stats()
    }

    /// Gracefully close the listener.
    pub async fn close(mut self) -> OrmResult<()> {
        close_worker(&self.cmd_tx, &mut self.worker).await
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

struct ActiveConnection<S, TStream> {
    client: tokio_postgres::Client,
    connection: tokio_postgres::Connection<S, TStream>,
}

enum LoopOutcome {
    CloseRequested,
    Disconnected,
}

enum CommandOutcome {
    Continue,
    CloseRequested,
    Disconnected,
}

/// Options the worker consults while dispatching.
#[derive(Clone, Copy)]
struct DispatchOptions {
    queue_capacity: usize,
    queue_policy: ListenerQueuePolicy,
    keepalive_interval: Duration,
}

async fn run_listener_loop<T>(
    pg_config: tokio_postgres::Config,
    tls: T,
    config: ListenerConfig,
    mut active: ActiveConnection<Socket, T::Stream>,
    mut cmd_rx: mpsc::Receiver<ListenerCommand>,
    shared: Arc<ListenerShared>,
) where
    T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
    T::Stream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    T::TlsConnect: Sync + Send,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    let mut registrations = Registrations::new();
    let options = DispatchOptions {
        queue_capacity: config.queue_capacity,
        queue_policy: config.queue_policy,
        keepalive_interval: config.keepalive_interval.max(Duration::from_millis(1)),
    };

    let min_backoff = config.reconnect_backoff_min.max(Duration::from_millis(1));
    let max_backoff = config.reconnect_backoff_max.max(min_backoff);
    let mut backoff = min_backoff;

    loop {
        shared.set_state(ListenerState::Connected);

        match run_connected_loop(&mut active, &mut registrations, &mut cmd_rx, options, &shared)
            .await
        {
            LoopOutcome::CloseRequested => {
                shared.set_state(ListenerState::Closed);
                tracing::info!(target: "pgmodel.listen", "listener closed");
                break;
            }
            LoopOutcome::Disconnected => {
                if !config.reconnect {
                    tracing::error!(
                        target: "pgmodel.listen",
                        "listener connection lost, reconnect disabled"
                    );
                    shared.set_state(ListenerState::Closed);
                    break;
                }

                tracing::warn!(
                    target: "pgmodel.listen",
                    channels = registrations.len(),
                    "listener connection lost, reconnecting"
                );
                shared.set_state(ListenerState::Reconnecting);

                'reconnect: loop {
                    tokio::select! {
                        cmd = cmd_rx.recv() => {
                            match cmd {
                                Some(cmd) => {
                                    if handle_disconnected_command(cmd, &mut registrations, options) {
                                        shared.set_state(ListenerState::Closed);
                                        return;
                                    }
                                }
                                None => {
                                    shared.set_state(ListenerState::Closed);
                                    return;
                                }
                            }
                        }
                        _ = tokio::time::sleep(backoff) => {
                            match pg_config.connect(tls.clone()).await {
                                Ok((client, mut connection)) => {
                                    let mut reconnect_ok = true;
                                    let channels: Vec<String> = registrations.keys().cloned().collect();
                                    for channel in channels {
                                        let sql = match quote_ident(&channel) {
                                            Ok(quoted) => format!("LISTEN {quoted}"),
                                            Err(_) => continue,
                                        };
                                        if let Err(e) = execute_sql_with_polling(
                                            &client,
                                            &mut connection,
                                            &sql,
                                            &registrations,
                                            options,
                                            &shared,
                                        )
                                        .await
                                        {
                                            tracing::warn!(
                                                target: "pgmodel.listen",
                                                channel = %channel,
                                                error = %e,
                                                "re-listen failed"
                                            );
                                            reconnect_ok = false;
                                            break;
                                        }
                                    }

                                    if reconnect_ok {
                                        active = ActiveConnection { client, connection };
                                        shared.inc_reconnect();
                                        backoff = min_backoff;
                                        tracing::info!(target: "pgmodel.listen", "listener reconnected");
                                        break 'reconnect;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(
                                        target: "pgmodel.listen",
                                        error = %e,
                                        retry_in = ?next_backoff(backoff, max_backoff),
                                        "listener reconnect failed"
                                    );
                                }
                            }

                            backoff = next_backoff(backoff, max_backoff);
                        }
                    }
                }
            }
        }
    }
}

async fn run_connected_loop<S, TStream>(
    active: &mut ActiveConnection<S, TStream>,
    registrations: &mut Registrations,
    cmd_rx: &mut mpsc::Receiver<ListenerCommand>,
    options: DispatchOptions,
    shared: &ListenerShared,
) -> LoopOutcome
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    TStream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let period = options.keepalive_interval;
    let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    return LoopOutcome::CloseRequested;
                };

                match handle_connected_command(cmd, active, registrations, options, shared).await {
                    CommandOutcome::Continue => {}
                    CommandOutcome::CloseRequested => return LoopOutcome::CloseRequested,
                    CommandOutcome::Disconnected => return LoopOutcome::Disconnected,
                }
            }
            msg = poll_fn(|cx| active.connection.poll_message(cx)) => {
                match msg {
                    Some(Ok(AsyncMessage::Notification(n))) => {
                        keepalive.reset();
                        dispatch_notification(registrations, n.channel(), n.payload(), options, shared).await;
                    }
                    Some(Ok(AsyncMessage::Notice(notice))) => {
                        tracing::debug!(target: "pgmodel.listen", notice = %notice.message(), "server notice");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => return LoopOutcome::Disconnected,
                    None => return LoopOutcome::Disconnected,
                }
            }
            _ = keepalive.tick() => {
                if let Err(e) = execute_sql_with_polling(
                    &active.client,
                    &mut active.connection,
                    "SELECT 1",
                    registrations,
                    options,
                    shared,
                )
                .await
                {
                    tracing::warn!(target: "pgmodel.listen", error = %e, "listener keepalive failed");
                    return LoopOutcome::Disconnected;
                }
            }
        }
    }
}

async fn handle_connected_command<S, TStream>(
    cmd: ListenerCommand,
    active: &mut ActiveConnection<S, TStream>,
    registrations: &mut Registrations,
    options: DispatchOptions,
    shared: &ListenerShared,
) -> CommandOutcome
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    TStream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (sql, resp, pending) = match cmd {
        ListenerCommand::Listen {
            channel,
            callback,
            resp,
        } => {
            if registrations.contains_key(&channel) {
                let _ = resp.send(Err(OrmError::AlreadySubscribed(channel)));
                return CommandOutcome::Continue;
            }
            let quoted = match quote_ident(&channel) {
                Ok(v) => v,
                Err(e) => {
                    let _ = resp.send(Err(e));
                    return CommandOutcome::Continue;
                }
            };
            (
                format!("LISTEN {quoted}"),
                resp,
                Some((channel, callback)),
            )
        }
        ListenerCommand::Unlisten { channel, resp } => {
            if registrations.remove(&channel).is_none() {
                let _ = resp.send(Err(not_subscribed(&channel)));
                return CommandOutcome::Continue;
            }
            let quoted = match quote_ident(&channel) {
                Ok(v) => v,
                Err(e) => {
                    let _ = resp.send(Err(e));
                    return CommandOutcome::Continue;
                }
            };
            (format!("UNLISTEN {quoted}"), resp, None)
        }
        ListenerCommand::UnlistenAll { resp } => {
            registrations.clear();
            ("UNLISTEN *".to_string(), resp, None)
        }
        ListenerCommand::Close { resp } => {
            registrations.clear();
            let result = execute_sql_with_polling(
                &active.client,
                &mut active.connection,
                "UNLISTEN *",
                registrations,
                options,
                shared,
            )
            .await;
            let _ = resp.send(result);
            return CommandOutcome::CloseRequested;
        }
    };

    let result = execute_sql_with_polling(
        &active.client,
        &mut active.connection,
        &sql,
        registrations,
        options,
        shared,
    )
    .await;

    if result.is_ok()
        && let Some((channel, callback)) = pending
    {
        tracing::debug!(target: "pgmodel.listen", channel = %channel, "listening");
        let registration = Registration::spawn(&channel, callback, options.queue_capacity);
        registrations.insert(channel, registration);
    }

    let disconnected = result
        .as_ref()
        .err()
        .map(is_disconnect_error)
        .unwrap_or(false);
    let _ = resp.send(result);
    if disconnected {
        return CommandOutcome::Disconnected;
    }
    CommandOutcome::Continue
}

/// Apply a command while reconnecting. Registrations made here are
/// `LISTEN`ed once the connection is back. Returns `true` on close.
fn handle_disconnected_command(
    cmd: ListenerCommand,
    registrations: &mut Registrations,
    options: DispatchOptions,
) -> bool {
    match cmd {
        ListenerCommand::Listen {
            channel,
            callback,
            resp,
        } => {
            let result = if registrations.contains_key(&channel) {
                Err(OrmError::AlreadySubscribed(channel))
            } else {
                quote_ident(&channel).map(|_| {
                    let registration =
                        Registration::spawn(&channel, callback, options.queue_capacity);
                    registrations.insert(channel, registration);
                })
            };
            let _ = resp.send(result);
            false
        }
        ListenerCommand::Unlisten { channel, resp } => {
            let result = match registrations.remove(&channel) {
                Some(_) => Ok(()),
                None => Err(not_subscribed(&channel)),
            };
            let _ = resp.send(result);
            false
        }
        ListenerCommand::UnlistenAll { resp } => {
            registrations.clear();
            let _ = resp.send(Ok(()));
            false
        }
        ListenerCommand::Close { resp } => {
            registrations.clear();
            let _ = resp.send(Ok(()));
            true
        }
    }
}

async fn execute_sql_with_polling<S, TStream>(
    client: &tokio_postgres::Client,
    connection: &mut tokio_postgres::Connection<S, TStream>,
    sql: &str,
    registrations: &Registrations,
    options: DispatchOptions,
    shared: &ListenerShared,
) -> OrmResult<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    TStream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let execute = client.batch_execute(sql);
    tokio::pin!(execute);

    loop {
        tokio::select! {
            result = &mut execute => {
                return result.map_err(OrmError::from_db_error);
            }
            msg = poll_fn(|cx| connection.poll_message(cx)) => {
                match msg {
                    Some(Ok(AsyncMessage::Notification(n))) => {
                        dispatch_notification(registrations, n.channel(), n.payload(), options, shared).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(OrmError::from_db_error(e)),
                    None => return Err(OrmError::Connection("listener connection closed".to_string())),
                }
            }
        }
    }
}

async fn dispatch_notification(
    registrations: &Registrations,
    channel: &str,
    payload: &str,
    options: DispatchOptions,
    shared: &ListenerShared,
) {
    let Some(registration) = registrations.get(channel) else {
        tracing::trace!(target: "pgmodel.listen", channel = %channel, "notification without callback");
        return;
    };

    match options.queue_policy {
        ListenerQueuePolicy::DropNewest => {
            if let Err(mpsc::error::TrySendError::Full(_)) =
                registration.queue.try_send(payload.to_string())
            {
                shared.inc_dropped_notifications();
                tracing::debug!(target: "pgmodel.listen", channel = %channel, "queue full, notification dropped");
            }
        }
        ListenerQueuePolicy::Block => {
            let _ = registration.queue.send(payload.to_string()).await;
        }
    }
}

fn not_subscribed(channel: &str) -> OrmError {
    OrmError::NotFound(format!("not subscribed to channel {channel}"))
}

fn is_disconnect_error(err: &OrmError) -> bool {
    match err {
        OrmError::Connection(_) => true,
        OrmError::Query(e) => e.is_closed(),
        _ => false,
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    let doubled = current.saturating_mul(2);
    if doubled > max { max } else { doubled }
}

async fn send_command<F>(cmd_tx: &mpsc::Sender<ListenerCommand>, build: F) -> OrmResult<()>
where
    F: FnOnce(oneshot::Sender<OrmResult<()>>) -> ListenerCommand,
{
    let (resp_tx, resp_rx) = oneshot::channel();
    cmd_tx
        .send(build(resp_tx))
        .await
        .map_err(|_| OrmError::Connection("listener command channel is closed".to_string()))?;
    resp_rx.await.map_err(|_| {
        OrmError::Connection("listener worker closed before command reply".to_string())
    })?
}

async fn close_worker(
    cmd_tx: &mpsc::Sender<ListenerCommand>,
    worker: &mut Option<JoinHandle<()>>,
) -> OrmResult<()> {
    let close_result = send_command(cmd_tx, |resp| ListenerCommand::Close { resp }).await;
    if let Some(worker) = worker.take() {
        worker
            .await
            .map_err(|e| OrmError::Other(format!("listener worker join error: {e}")))?;
    }
    close_result
}
