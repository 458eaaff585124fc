//! # Project Test Harness
//!
//! Local stand-ins for the SCADA backend, shared by the integration tests in
//! `tests/`: a WebSocket event stream server and a REST responder.

#![forbid(unsafe_code)]

pub mod mock_http;
pub mod mock_stream;

/// Installs `env_logger` for a test binary; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
