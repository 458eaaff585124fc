//! # Core Streaming Module
//!
//! The live half of the mirror: everything between the WebSocket and the
//! stores.
//!
//! ## Core Components:
//!
//! - **`connection`**: owns the persistent connection, its fixed-delay
//!   reconnect loop, and the broadcast of state changes and inbound frames.
//!
//! - **`envelope`**: the wire shapes of inbound pushes and outbound subscribe
//!   intents.
//!
//! - **`router`**: classifies inbound frames and upserts entity updates into
//!   the matching store.
//!
//! - **`subscription`**: re-sends the subscribe intents after every
//!   (re)connection.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Persistent connection with reconnect.
pub mod connection;
/// Inbound and outbound wire envelopes.
pub mod envelope;
/// Inbound frame dispatch to the stores.
pub mod router;
/// Subscribe intents on every connect.
pub mod subscription;

pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, StreamConfig, DEFAULT_RECONNECT_DELAY};
pub use envelope::{InboundEnvelope, OutboundEnvelope, Topic};
pub use router::{MessageRouter, RouteOutcome};
pub use subscription::SubscriptionController;
