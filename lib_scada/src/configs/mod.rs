//! # Configuration Modules
//!
//! Connection settings of the mirror: the backend origin and the paths,
//! timings and credentials derived from it.

/// Origin, endpoint paths, timeouts and acknowledge mode.
pub mod endpoints;

pub use endpoints::{MirrorConfig, DEFAULT_API_PATH, DEFAULT_REQUEST_TIMEOUT, DEFAULT_STREAM_PATH};
