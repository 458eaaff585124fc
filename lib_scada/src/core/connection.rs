//! # Connection Manager
//!
//! Owns the single persistent WebSocket connection of the mirror.
//!
//! One background task runs the whole lifecycle: connect, pump frames, detect
//! closure, wait the fixed reconnect delay, connect again. Each attempt gets a
//! new *generation* number and every event carries it, so listeners can tell
//! frames of a superseded connection apart from the live one.
//!
//! The manager knows nothing about entities. It publishes
//! [`ConnectionEvent`]s on a broadcast channel, the current
//! [`ConnectionState`] on a watch channel, and accepts best-effort outbound
//! sends while connected.
//!
//! Reconnect policy: fixed delay (5 s by default), no backoff growth, no jitter
//! and no retry cap. The loop only ends through [`ConnectionManager::close`] or
//! the shutdown token.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::envelope::OutboundEnvelope;
use crate::error::{MirrorError, Result};

/// Delay between a closed connection and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the event broadcast buffer.
const EVENT_BUFFER: usize = 1024;

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Something that happened on the connection, tagged with its generation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Emitted only when the state actually changes.
    StateChanged { state: ConnectionState, generation: u64 },
    /// One inbound text frame.
    Message { text: String, generation: u64 },
    /// A connect, read or write failure. A reconnect follows.
    Error { error: MirrorError, generation: u64 },
}

impl ConnectionEvent {
    pub fn generation(&self) -> u64 {
        match self {
            ConnectionEvent::StateChanged { generation, .. }
            | ConnectionEvent::Message { generation, .. }
            | ConnectionEvent::Error { generation, .. } => *generation,
        }
    }
}

/// Where to connect and how long to wait between attempts.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: Url,
    pub reconnect_delay: Duration,
}

impl StreamConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct Link {
    /// Writer of the live connection; `None` while not connected.
    outbound: Option<mpsc::UnboundedSender<Message>>,
    generation: u64,
    last_error: Option<MirrorError>,
}

#[derive(Debug)]
struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    link: Mutex<Link>,
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState, generation: u64) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            log::debug!("Stream connection #{} is now {:?}.", generation, state);
            let _ = self.events.send(ConnectionEvent::StateChanged { state, generation });
        }
    }

    /// Starts a new attempt and returns its generation.
    fn begin_attempt(&self) -> u64 {
        let generation = {
            let mut link = self.link();
            link.generation += 1;
            link.generation
        };
        self.set_state(ConnectionState::Connecting, generation);
        generation
    }

    fn fail(&self, generation: u64, error: MirrorError) {
        log::warn!("Stream connection #{} failed: {}", generation, error);
        self.link().last_error = Some(error.clone());
        let _ = self.events.send(ConnectionEvent::Error { error, generation });
    }

    fn emit_message(&self, text: String, generation: u64) {
        let _ = self.events.send(ConnectionEvent::Message { text, generation });
    }
}

/// Owner of the persistent connection. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct ConnectionManager {
    config: StreamConfig,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(config: StreamConfig) -> Self {
        Self::with_shutdown(config, CancellationToken::new())
    }

    /// Builds a manager that also stops when `shutdown` is cancelled.
    pub fn with_shutdown(config: StreamConfig, shutdown: CancellationToken) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            config,
            shared: Arc::new(Shared {
                state_tx,
                events,
                link: Mutex::new(Link::default()),
            }),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Starts the connection task. A no-op while the task is running or after
    /// [`close`](Self::close). Failures are reported through events, never here.
    pub fn connect(&self) {
        if self.shutdown.is_cancelled() {
            log::warn!("connect() called on a closed stream connection; ignoring.");
            return;
        }
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            log::debug!("Stream connection task already running.");
            return;
        }
        log::info!("Starting stream connection to {}", self.config.url);
        *task = Some(tokio::spawn(run_connection(
            self.config.clone(),
            self.shared.clone(),
            self.shutdown.clone(),
        )));
    }

    /// Sends one envelope over the live connection.
    ///
    /// Best effort, at most once: when not connected the envelope is dropped and
    /// [`MirrorError::NotConnected`] is returned. Nothing is queued.
    pub fn send(&self, envelope: &OutboundEnvelope) -> Result<()> {
        let text = envelope.to_text()?;
        let link = self.shared.link();
        if self.shared.state() != ConnectionState::Connected {
            log::debug!("Dropping outbound '{}': not connected.", envelope.kind);
            return Err(MirrorError::NotConnected);
        }
        match &link.outbound {
            Some(tx) => tx
                .send(Message::Text(text.into()))
                .map_err(|_| MirrorError::NotConnected),
            None => Err(MirrorError::NotConnected),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watch channel following the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// New listener on the event stream. Only events sent after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub fn last_error(&self) -> Option<MirrorError> {
        self.shared.link().last_error.clone()
    }

    /// Generation of the current (or last) connection attempt. 0 before the first.
    pub fn generation(&self) -> u64 {
        self.shared.link().generation
    }

    /// Token cancelled by [`close`](Self::close).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops the connection for good: cancels a pending reconnect, sends a close
    /// frame on a live connection and waits for the task to finish.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Stream connection task ended abnormally: {}", e);
            }
        }
        let generation = self.generation();
        self.shared.set_state(ConnectionState::Disconnected, generation);
    }
}

/// The connect / read / reconnect loop.
async fn run_connection(config: StreamConfig, shared: Arc<Shared>, shutdown: CancellationToken) {
    loop {
        let generation = shared.begin_attempt();
        log::info!("Connecting to {} (attempt #{})", config.url, generation);

        tokio::select! {
            _ = shutdown.cancelled() => {
                shared.set_state(ConnectionState::Disconnected, generation);
                break;
            }
            result = connect_async(config.url.as_str()) => match result {
                Ok((ws_stream, _)) => {
                    log::info!("Stream connection #{} established.", generation);
                    run_session(ws_stream, generation, &shared, &shutdown).await;
                }
                Err(e) => shared.fail(generation, e.into()),
            }
        }

        shared.set_state(ConnectionState::Disconnected, generation);
        if shutdown.is_cancelled() {
            break;
        }

        log::info!("Reconnecting in {:?}...", config.reconnect_delay);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }
    log::info!("Stream connection loop stopped.");
}

/// Pumps one established connection until it closes, fails or is shut down.
async fn run_session(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    generation: u64,
    shared: &Shared,
    shutdown: &CancellationToken,
) {
    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    shared.link().outbound = Some(tx);
    shared.set_state(ConnectionState::Connected, generation);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("Closing stream connection #{}.", generation);
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            Some(outgoing) = rx.recv() => {
                if let Err(e) = write.send(outgoing).await {
                    shared.fail(generation, e.into());
                    break;
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => shared.emit_message(text.as_str().to_owned(), generation),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => shared.emit_message(text, generation),
                    Err(_) => log::warn!("Discarding non-UTF-8 binary frame ({} bytes).", bytes.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    log::info!("Stream connection #{} closed by server: {:?}", generation, frame);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    shared.fail(generation, e.into());
                    break;
                }
                None => {
                    log::warn!("Stream connection #{} closed by remote host.", generation);
                    break;
                }
            }
        }
    }

    shared.link().outbound = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::envelope::Topic;

    /// A local address nothing listens on.
    fn dead_url() -> Url {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        Url::parse(&format!("ws://127.0.0.1:{port}/ws/tags/")).unwrap()
    }

    async fn next_event(rx: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("open channel")
    }

    #[tokio::test]
    async fn send_while_disconnected_is_dropped() {
        let manager = ConnectionManager::new(StreamConfig::new(dead_url()));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(
            manager.send(&OutboundEnvelope::subscribe(Topic::Tags)),
            Err(MirrorError::NotConnected)
        );
        assert_eq!(manager.generation(), 0);
    }

    #[tokio::test]
    async fn failed_attempts_are_reported_and_retried() {
        let config = StreamConfig::new(dead_url()).with_reconnect_delay(Duration::from_millis(50));
        let manager = ConnectionManager::new(config);
        let mut events = manager.subscribe();

        manager.connect();
        manager.connect();

        assert_eq!(
            next_event(&mut events).await,
            ConnectionEvent::StateChanged { state: ConnectionState::Connecting, generation: 1 }
        );
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Error { error: MirrorError::Transport(_), generation: 1 }
        ));
        assert_eq!(
            next_event(&mut events).await,
            ConnectionEvent::StateChanged { state: ConnectionState::Disconnected, generation: 1 }
        );
        assert_eq!(
            next_event(&mut events).await,
            ConnectionEvent::StateChanged { state: ConnectionState::Connecting, generation: 2 }
        );
        assert!(matches!(manager.last_error(), Some(MirrorError::Transport(_))));

        manager.close().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        // Closed for good: connect() is ignored and no attempt follows.
        manager.connect();
        let generation = manager.generation();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.generation(), generation);
    }
}
