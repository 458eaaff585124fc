//! # Data Retrieval Module
//!
//! The HTTP side of the mirror, compiled with the `retrieve` feature.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: a generic JSON `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, with automatic retries and exponential backoff.
//! - **`snapshot_http`**: the REST implementation of the snapshot channel used
//!   for bulk loads, lookups and the acknowledge write.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware.
pub mod ky_http;
/// Snapshot channel over the REST API.
pub mod snapshot_http;

pub use ky_http::{ApiClient, ApiResponse};
pub use snapshot_http::HttpSnapshotChannel;
