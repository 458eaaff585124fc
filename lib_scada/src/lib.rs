//! # lib_scada
//!
//! Live client-side mirror of a SCADA backend's tags and alarms.
//!
//! A REST snapshot seeds the in-memory stores; a persistent WebSocket stream
//! then pushes incremental updates into them, reconnecting with a fixed delay
//! and re-subscribing after every reconnect. Derived views (tag groups,
//! critical tags, alarm severity buckets, filters, stats) are always computed
//! from the canonical collections.
//!
//! Start with [`Mirror`].

pub mod configs;
pub mod core;
pub mod error;
pub mod mirror;
pub mod models;
pub mod snapshot;
pub mod stores;

#[cfg(feature = "retrieve")]
pub mod retrieve;

pub use configs::MirrorConfig;
pub use error::{MirrorError, Result};
pub use mirror::{Mirror, SnapshotSummary};
pub use models::{Alarm, AlarmState, EntityId, Severity, Tag, TagHistoryPoint};
pub use snapshot::{AlarmQuery, HistoryWindow, SnapshotChannel, TagQuery};
pub use stores::{AckMode, AlarmFilter, AlarmStore, TagStore};
