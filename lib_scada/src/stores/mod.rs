//! # Entity Stores
//!
//! The in-memory mirror itself. Both stores sit on the same building blocks:
//!
//! - **`collection`**: ordered, id-keyed container with O(1) upsert and a
//!   front-insert policy for records the stream introduces.
//! - **`status`**: per-operation `loading` / `error` tracking for the async
//!   snapshot and acknowledge calls.
//! - **`tags`**: the tag mirror with grouping, criticality, detail and history.
//! - **`alarms`**: the alarm mirror with its maintained active subset, severity
//!   buckets, filters, stats and acknowledge.
//!
//! Stores are shared behind `Arc` between the message router (writer) and any
//! number of readers. Locks are never held across an `.await`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Ordered id-keyed entity container.
pub mod collection;
/// Per-operation status bookkeeping.
pub mod status;
/// Tag mirror.
pub mod tags;
/// Alarm mirror.
pub mod alarms;

#[cfg(test)]
pub(crate) mod testing;

pub use alarms::{AckMode, AlarmFilter, AlarmOp, AlarmStats, AlarmStore, SeverityBuckets};
pub use collection::{EntityCollection, Upsert};
pub use status::OpStatus;
pub use tags::{TagGroup, TagOp, TagStore};
