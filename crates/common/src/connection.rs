//! Streaming connection manager with an explicit connect/disconnect state machine.
//!
//! ```text
//! disconnected --connect()--> connecting --handshake ok--> connected
//!      ^                          |                            |
//!      +------ close / disconnect()---------------------------+
//! connecting | connected --transport error--> error --connect()--> connecting
//! ```
//!
//! All status changes go through [`Shared::transition`]. Each `connect()` opens a
//! new session epoch; a session task can only change the status while its epoch
//! is current, so a session cancelled by `disconnect()` can never overwrite the
//! status afterwards.

use crate::error::{Error, Result};
use crate::status::{ConnectionState, ConnectionStatus, ReconnectPolicy, MAX_RECONNECT_ATTEMPTS_MESSAGE};
use crate::ws_handler::WsHandler;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for a [`StreamConnection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Interval between ping frames.
    pub ping_interval: Duration,
    /// Upper bound on the TCP + WebSocket handshake.
    pub connect_timeout: Duration,
    /// Behaviour after the server closes the stream or the transport fails.
    pub reconnect: ReconnectPolicy,
    /// Label for logs and metrics.
    pub label: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::Disabled,
            label: "gate_stream".to_string(),
        }
    }
}

struct Session {
    /// Dropping the sender also ends the session.
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

struct Inner {
    epoch: u64,
    retry_attempts: u32,
    session: Option<Session>,
}

struct Shared {
    inner: Mutex<Inner>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Must be called with `inner` locked.
    fn publish_status(&self, status: ConnectionStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Apply a status change on behalf of session `epoch`.
    ///
    /// Returns false (and changes nothing) when that session is no longer current.
    fn transition(&self, epoch: u64, status: ConnectionStatus) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return false;
        }
        if status.status == ConnectionState::Connected {
            inner.retry_attempts = 0;
        }
        self.publish_status(status);
        true
    }

    /// Claim the next retry number for session `epoch`.
    fn next_attempt(&self, epoch: u64) -> Option<u32> {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return None;
        }
        inner.retry_attempts = inner.retry_attempts.saturating_add(1);
        Some(inner.retry_attempts)
    }
}

/// How a session ended.
enum SessionEnd {
    /// `disconnect()` was called or the connection was dropped.
    Shutdown,
    /// The server closed the stream.
    Closed,
    /// Transport-level failure.
    Failed(Error),
}

/// Owns at most one live WebSocket connection to the handler's URL.
///
/// Frames are handed to the [`WsHandler`]; status is observable through
/// [`status`](Self::status) and [`watch_status`](Self::watch_status).
pub struct StreamConnection<H: WsHandler> {
    handler: Arc<H>,
    config: ConnectionConfig,
    shared: Arc<Shared>,
}

impl<H: WsHandler> StreamConnection<H> {
    pub fn new(handler: H, config: ConnectionConfig) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::disconnected());
        Self {
            handler: Arc::new(handler),
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    epoch: 0,
                    retry_attempts: 0,
                    session: None,
                }),
                status_tx,
            }),
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status_tx.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Open the connection.
    ///
    /// No-op while `connecting` or `connected`. From `disconnected` or `error`
    /// this moves to `connecting` and spawns the session task; any pending
    /// automatic retry is cancelled first.
    pub fn connect(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Generic(format!("connect requires a Tokio runtime: {}", e)))?;

        let mut inner = self.shared.lock();
        let current = self.shared.status_tx.borrow().clone();
        if current.is_active() {
            debug!(
                "[{}] connect() ignored, connection is {}",
                self.config.label, current.status
            );
            return Ok(());
        }

        if let Some(stale) = inner.session.take() {
            stale.task.abort();
        }

        inner.epoch += 1;
        let epoch = inner.epoch;
        self.shared.publish_status(ConnectionStatus::connecting());

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = runtime.spawn(run_session(
            self.handler.clone(),
            self.config.clone(),
            self.shared.clone(),
            epoch,
            shutdown_rx,
        ));
        inner.session = Some(Session { shutdown_tx, task });

        Ok(())
    }

    /// Close the connection and cancel any pending retry. Idempotent.
    pub fn disconnect(&self) {
        let session = {
            let mut inner = self.shared.lock();
            inner.epoch += 1;
            inner.retry_attempts = 0;
            self.shared.publish_status(ConnectionStatus::disconnected());
            inner.session.take()
        };

        if let Some(session) = session {
            info!("[{}] Disconnecting", self.config.label);
            // The session sends a normal close frame if the transport is open.
            let _ = session.shutdown_tx.try_send(());
        }
    }
}

impl<H: WsHandler> Drop for StreamConnection<H> {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        inner.epoch += 1;
        if let Some(session) = inner.session.take() {
            session.task.abort();
        }
    }
}

async fn run_session<H: WsHandler>(
    handler: Arc<H>,
    config: ConnectionConfig,
    shared: Arc<Shared>,
    epoch: u64,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        match connect_and_run_loop(&*handler, &config, &shared, epoch, &mut shutdown_rx).await {
            SessionEnd::Shutdown => {
                debug!("[{}] Session {} shut down", config.label, epoch);
                return;
            }
            SessionEnd::Closed => {
                info!("[{}] WebSocket disconnected", config.label);
                if !shared.transition(epoch, ConnectionStatus::disconnected()) {
                    return;
                }
            }
            SessionEnd::Failed(e) => {
                error!("[{}] WebSocket error: {}", config.label, e);
                counter!("gate_stream_errors_total", "endpoint" => config.label.clone())
                    .increment(1);
                if !shared.transition(epoch, ConnectionStatus::error(e.to_string())) {
                    return;
                }
            }
        }

        if !config.reconnect.is_enabled() {
            return;
        }

        let Some(attempt) = shared.next_attempt(epoch) else {
            return;
        };

        let Some(delay) = config.reconnect.delay_for(attempt) else {
            warn!("[{}] {}", config.label, MAX_RECONNECT_ATTEMPTS_MESSAGE);
            shared.transition(epoch, ConnectionStatus::error(MAX_RECONNECT_ATTEMPTS_MESSAGE));
            return;
        };

        info!(
            "[{}] Attempting to reconnect in {:?} (attempt {})",
            config.label, delay, attempt
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.recv() => return,
        }

        if !shared.transition(epoch, ConnectionStatus::connecting()) {
            return;
        }
    }
}

async fn connect_and_run_loop<H: WsHandler>(
    handler: &H,
    config: &ConnectionConfig,
    shared: &Shared,
    epoch: u64,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> SessionEnd {
    let ws_stream = tokio::select! {
        result = open(handler.url(), config) => match result {
            Ok(ws) => ws,
            Err(e) => return SessionEnd::Failed(e),
        },
        _ = shutdown_rx.recv() => return SessionEnd::Shutdown,
    };

    if !shared.transition(epoch, ConnectionStatus::connected()) {
        return SessionEnd::Shutdown;
    }

    info!("[{}] WebSocket connected", config.label);
    gauge!("gate_stream_active_connections", "endpoint" => config.label.clone()).increment(1.0);
    handler.on_connect().await;

    let end = run_loop(handler, config, ws_stream, shutdown_rx).await;

    gauge!("gate_stream_active_connections", "endpoint" => config.label.clone()).decrement(1.0);
    handler
        .on_disconnect(matches!(end, SessionEnd::Shutdown))
        .await;
    end
}

async fn open(url_str: &str, config: &ConnectionConfig) -> Result<WsStream> {
    let url = Url::parse(url_str)?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(Error::UnsupportedScheme(url.scheme().to_string()));
    }

    info!("[{}] Connecting to WebSocket: {}", config.label, url_str);

    let (ws_stream, response) = tokio::time::timeout(config.connect_timeout, connect_async(url_str))
        .await
        .map_err(|_| Error::ConnectTimeout(config.connect_timeout))??;

    debug!(
        "[{}] WebSocket handshake complete, status: {:?}",
        config.label,
        response.status()
    );
    Ok(ws_stream)
}

async fn run_loop<H: WsHandler>(
    handler: &H,
    config: &ConnectionConfig,
    ws_stream: WsStream,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> SessionEnd {
    let (mut write, mut read) = ws_stream.split();

    if let Some(init_msg) = handler.on_connect_message() {
        debug!("[{}] Sending initial message: {}", config.label, init_msg);
        if let Err(e) = write.send(Message::Text(init_msg)).await {
            return SessionEnd::Failed(e.into());
        }
    }

    let mut ping_interval = interval(config.ping_interval);
    ping_interval.reset(); // Don't fire immediately

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        counter!("gate_stream_frames_received_total", "endpoint" => config.label.clone()).increment(1);
                        if let Err(e) = handler.on_message(&text).await {
                            warn!("[{}] Error handling message: {}", config.label, e);
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if let Err(e) = handler.on_binary_message(&data).await {
                            warn!("[{}] Error handling binary message: {}", config.label, e);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!("[{}] Received ping, sending pong", config.label);
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            return SessionEnd::Failed(e.into());
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!("[{}] Received pong", config.label);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("[{}] Received close frame: {:?}", config.label, frame);
                        return SessionEnd::Closed;
                    }
                    Some(Ok(Message::Frame(_))) => {
                        // Raw frame, ignore
                    }
                    Some(Err(e)) => return SessionEnd::Failed(e.into()),
                    None => {
                        info!("[{}] WebSocket stream ended", config.label);
                        return SessionEnd::Closed;
                    }
                }
            }

            _ = shutdown_rx.recv() => {
                let close_frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "Shutdown".into(),
                };
                let _ = write.send(Message::Close(Some(close_frame))).await;
                return SessionEnd::Shutdown;
            }

            _ = ping_interval.tick() => {
                debug!("[{}] Sending ping", config.label);
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    return SessionEnd::Failed(e.into());
                }
            }
        }
    }
}
