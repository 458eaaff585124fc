//! # Message Router
//!
//! Classifies inbound text frames and hands entity updates to the matching
//! store. A bad frame is logged and dropped; it never reaches a store and never
//! affects the connection.

use std::sync::Arc;

use crate::core::envelope::InboundEnvelope;
use crate::models::EntityId;
use crate::stores::{AlarmStore, TagStore};

/// What routing one frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A tag was upserted.
    Tag(EntityId),
    /// An alarm was upserted.
    Alarm(EntityId),
    /// An informational server notice was logged.
    Notice,
    /// A well-formed frame of an unknown type.
    Ignored,
    /// A frame that could not be parsed.
    Dropped,
}

/// Dispatches inbound frames to the stores.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    tags: Arc<TagStore>,
    alarms: Arc<AlarmStore>,
}

impl MessageRouter {
    pub fn new(tags: Arc<TagStore>, alarms: Arc<AlarmStore>) -> Self {
        Self { tags, alarms }
    }

    /// Routes one text frame.
    pub fn route(&self, text: &str) -> RouteOutcome {
        match InboundEnvelope::parse(text) {
            Ok(InboundEnvelope::TagUpdate(tag)) => {
                let id = tag.id;
                self.tags.upsert(tag);
                RouteOutcome::Tag(id)
            }
            Ok(InboundEnvelope::AlarmUpdate(alarm)) => {
                let id = alarm.id;
                self.alarms.upsert(alarm);
                RouteOutcome::Alarm(id)
            }
            Ok(InboundEnvelope::Notice { kind, message }) => {
                log::info!("Server notice '{}': {}", kind, message.as_deref().unwrap_or("-"));
                RouteOutcome::Notice
            }
            Ok(InboundEnvelope::Unrecognized { kind }) => {
                log::debug!("Ignoring stream message of unknown type '{}'.", kind);
                RouteOutcome::Ignored
            }
            Err(e) => {
                log::warn!("Dropping inbound frame: {}", e);
                RouteOutcome::Dropped
            }
        }
    }
}
