//! # Subscription Controller
//!
//! Re-issues the subscribe intents every time the connection (re)enters
//! `Connected`. Server-side subscriptions do not survive a reconnect, so this
//! is what keeps pushes flowing after the connection manager recovers.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::connection::{ConnectionEvent, ConnectionManager, ConnectionState};
use crate::core::envelope::{OutboundEnvelope, Topic};

pub struct SubscriptionController {
    conn: Arc<ConnectionManager>,
    topics: Vec<Topic>,
}

impl SubscriptionController {
    pub fn new(conn: Arc<ConnectionManager>, topics: impl IntoIterator<Item = Topic>) -> Self {
        Self {
            conn,
            topics: topics.into_iter().collect(),
        }
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Sends every intent once. Returns how many were handed to the transport.
    pub fn resubscribe(&self) -> usize {
        let mut sent = 0;
        for topic in &self.topics {
            match self.conn.send(&OutboundEnvelope::subscribe(*topic)) {
                Ok(()) => sent += 1,
                Err(e) => log::warn!("Could not send {}: {}", topic.subscribe_action(), e),
            }
        }
        log::info!("Subscribe intents sent: {}/{}", sent, self.topics.len());
        sent
    }

    /// Starts listening. The event listener is registered before this returns,
    /// so a `connect()` issued afterwards cannot be missed.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        let events = self.conn.subscribe();
        tokio::spawn(self.run(events, shutdown))
    }

    async fn run(self, mut events: broadcast::Receiver<ConnectionEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(ConnectionEvent::StateChanged { state: ConnectionState::Connected, generation }) => {
                        if generation < self.conn.generation() {
                            log::debug!("Skipping Connected of superseded connection #{}.", generation);
                            continue;
                        }
                        self.resubscribe();
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("Subscription controller lagged by {} events.", missed);
                        if self.conn.state() == ConnectionState::Connected {
                            self.resubscribe();
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        log::debug!("Subscription controller stopped.");
    }
}
