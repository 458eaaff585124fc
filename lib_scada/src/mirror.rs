//! # Mirror
//!
//! Composition root. Owns one tag store, one alarm store and one connection,
//! and wires them together:
//!
//! ```text
//! ConnectionManager --events--> pump --> MessageRouter --> TagStore / AlarmStore
//!         ^                                                   ^
//!         '-- SubscriptionController (on Connected)           '-- load_snapshot(SnapshotChannel)
//! ```
//!
//! Snapshots and pushes converge on the same stores; each store mutation is a
//! single critical section, so the two paths never leave a store half-applied.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::configs::MirrorConfig;
use crate::core::connection::{ConnectionEvent, ConnectionManager, ConnectionState, StreamConfig};
use crate::core::envelope::Topic;
use crate::core::router::MessageRouter;
use crate::core::subscription::SubscriptionController;
use crate::error::{MirrorError, Result};
use crate::snapshot::{AlarmQuery, SnapshotChannel, TagQuery};
use crate::stores::{AckMode, AlarmStore, TagStore};

/// Counts returned by [`Mirror::load_snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotSummary {
    pub tags: usize,
    pub alarms: usize,
    /// Server-side total of active alarms.
    pub active_total: u64,
}

/// A running live mirror.
pub struct Mirror {
    tags: Arc<TagStore>,
    alarms: Arc<AlarmStore>,
    conn: Arc<ConnectionManager>,
    shutdown: CancellationToken,
    stale: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Mirror {
    /// Builds the mirror from its configuration and starts streaming.
    /// Must be called inside a Tokio runtime.
    pub fn start(config: &MirrorConfig) -> Result<Self> {
        Ok(Self::with_stream(config.stream_config()?, config.ack_mode))
    }

    /// Starts a mirror on an explicit stream configuration.
    pub fn with_stream(stream: StreamConfig, ack_mode: AckMode) -> Self {
        let shutdown = CancellationToken::new();
        let tags = Arc::new(TagStore::new());
        let alarms = Arc::new(AlarmStore::with_ack_mode(ack_mode));
        let conn = Arc::new(ConnectionManager::with_shutdown(stream, shutdown.child_token()));
        let stale = Arc::new(AtomicBool::new(false));

        // Listeners register before connect() so the first Connected is seen.
        let router = MessageRouter::new(tags.clone(), alarms.clone());
        let pump = tokio::spawn(pump_events(
            conn.subscribe(),
            conn.clone(),
            router,
            stale.clone(),
            shutdown.clone(),
        ));
        let controller = SubscriptionController::new(conn.clone(), Topic::ALL).spawn(shutdown.clone());

        conn.connect();

        Self {
            tags,
            alarms,
            conn,
            shutdown,
            stale,
            tasks: vec![pump, controller],
        }
    }

    pub fn tags(&self) -> &Arc<TagStore> {
        &self.tags
    }

    pub fn alarms(&self) -> &Arc<AlarmStore> {
        &self.alarms
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.conn
    }

    /// Loads tags, alarms and the active-alarms snapshot.
    ///
    /// Tags and alarms load concurrently; the active snapshot is merged after
    /// the alarm list so it is not overwritten by it. An `Unauthorized` from any
    /// call takes precedence over other errors.
    pub async fn load_snapshot<S: SnapshotChannel>(&self, source: &S) -> Result<SnapshotSummary> {
        let tag_query = TagQuery::default();
        let alarm_query = AlarmQuery::default();
        let (tags, alarms) = tokio::join!(
            self.tags.fetch_tags(source, &tag_query),
            async {
                let alarms = self.alarms.fetch_alarms(source, &alarm_query).await?;
                let active_total = self.alarms.fetch_active(source).await?;
                Ok::<_, MirrorError>((alarms, active_total))
            }
        );

        match (tags, alarms) {
            (Ok(tags), Ok((alarms, active_total))) => {
                log::info!(
                    "Snapshot loaded: {} tags, {} alarms ({} active on server).",
                    tags,
                    alarms,
                    active_total
                );
                Ok(SnapshotSummary {
                    tags,
                    alarms,
                    active_total,
                })
            }
            (Err(e), _) | (_, Err(e)) if e.is_auth() => Err(e),
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }

    /// Returns and clears the stale flag. Set when pushes may have been missed
    /// (lagging pump, or a reconnect after the first connection).
    pub fn take_stale(&self) -> bool {
        self.stale.swap(false, Ordering::SeqCst)
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    /// Stops streaming, waits for the background tasks and tears the stores down.
    pub async fn shutdown(mut self) {
        log::info!("Shutting down mirror...");
        self.shutdown.cancel();
        self.conn.close().await;
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                log::error!("Mirror task ended abnormally: {}", e);
            }
        }
        self.tags.teardown();
        self.alarms.teardown();
        log::info!("Mirror stopped.");
    }
}

impl Drop for Mirror {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Feeds inbound frames of the live connection to the router, in order.
async fn pump_events(
    mut events: broadcast::Receiver<ConnectionEvent>,
    conn: Arc<ConnectionManager>,
    router: MessageRouter,
    stale: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    let mut connected_once = false;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if event.generation() < conn.generation() {
                        log::trace!("Discarding event of superseded connection #{}.", event.generation());
                        continue;
                    }
                    match event {
                        ConnectionEvent::Message { text, .. } => {
                            router.route(&text);
                        }
                        ConnectionEvent::StateChanged { state: ConnectionState::Connected, generation } => {
                            if connected_once {
                                log::info!("Reconnected (#{}); pushes sent meanwhile were lost.", generation);
                                stale.store(true, Ordering::SeqCst);
                            }
                            connected_once = true;
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Event pump lagged; {} events lost. Mirror marked stale.", missed);
                    stale.store(true, Ordering::SeqCst);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
    log::debug!("Event pump stopped.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::testing::{alarm, tag, FakeChannel};
    use std::time::Duration;

    fn offline_mirror() -> Mirror {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let url = url::Url::parse(&format!("ws://127.0.0.1:{port}/ws/tags/")).unwrap();
        Mirror::with_stream(
            StreamConfig::new(url).with_reconnect_delay(Duration::from_secs(60)),
            AckMode::Confirmed,
        )
    }

    #[tokio::test]
    async fn snapshot_fills_both_stores() {
        let mirror = offline_mirror();
        let channel = FakeChannel {
            tags: vec![tag(1, "Valve", 0.0, 100.0, 95.0), tag(2, "Pump", 0.0, 100.0, 50.0)],
            alarms: vec![alarm(1, "HIGH", "ACTIVE"), alarm(2, "LOW", "RESOLVED")],
            active: vec![alarm(1, "HIGH", "ACTIVE"), alarm(3, "CRITICAL", "ACTIVE")],
            ..Default::default()
        };

        let summary = mirror.load_snapshot(&channel).await.unwrap();

        assert_eq!(
            summary,
            SnapshotSummary {
                tags: 2,
                alarms: 2,
                active_total: 2
            }
        );
        assert_eq!(mirror.tags().critical_tags().len(), 1);
        assert_eq!(mirror.alarms().len(), 3);
        assert_eq!(mirror.alarms().active_alarms().len(), 2);
        assert!(!mirror.take_stale());

        mirror.shutdown().await;
    }

    #[tokio::test]
    async fn unauthorized_is_surfaced() {
        let mirror = offline_mirror();
        let channel = FakeChannel {
            tags: vec![tag(1, "Valve", 0.0, 100.0, 95.0)],
            list_error: Some(MirrorError::Unauthorized),
            ..Default::default()
        };

        assert_eq!(mirror.load_snapshot(&channel).await, Err(MirrorError::Unauthorized));
        assert!(mirror.tags().is_empty());
        assert!(mirror.tags().error().is_some());

        mirror.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_connection() {
        let mirror = offline_mirror();
        let conn = mirror.connection().clone();
        let tags = mirror.tags().clone();

        mirror.shutdown().await;

        assert_eq!(conn.state(), ConnectionState::Disconnected);
        let channel = FakeChannel {
            tags: vec![tag(1, "Valve", 0.0, 100.0, 50.0)],
            ..Default::default()
        };
        assert_eq!(tags.fetch_tags(&channel, &TagQuery::default()).await, Err(MirrorError::Closed));
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn pump_discards_events_of_superseded_connections() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let url = url::Url::parse(&format!("ws://127.0.0.1:{port}/ws/tags/")).unwrap();
        let conn = Arc::new(ConnectionManager::new(
            StreamConfig::new(url).with_reconnect_delay(Duration::from_millis(20)),
        ));
        conn.connect();
        tokio::time::timeout(Duration::from_secs(5), async {
            while conn.generation() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("second attempt in time");
        conn.close().await;
        let current = conn.generation();

        let tags = Arc::new(TagStore::new());
        let alarms = Arc::new(AlarmStore::new());
        let stale = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();
        let (tx, rx) = broadcast::channel(16);
        let pump = tokio::spawn(pump_events(
            rx,
            conn.clone(),
            MessageRouter::new(tags.clone(), alarms.clone()),
            stale.clone(),
            shutdown.clone(),
        ));

        let push = |id, generation| ConnectionEvent::Message {
            text: serde_json::json!({"type": "tag_update", "data": tag(id, "Valve", 0.0, 10.0, 5.0)}).to_string(),
            generation,
        };
        let connected = |generation| ConnectionEvent::StateChanged {
            state: ConnectionState::Connected,
            generation,
        };
        tx.send(connected(current)).unwrap();
        tx.send(push(7, current - 1)).unwrap();
        tx.send(connected(current - 1)).unwrap();
        tx.send(push(8, current)).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while tags.get(8).is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("live push routed");
        assert!(tags.get(7).is_none());
        assert_eq!(tags.len(), 1);
        // A late Connected of an old connection is not a reconnect.
        assert!(!stale.load(Ordering::SeqCst));

        shutdown.cancel();
        pump.await.unwrap();
    }
}
