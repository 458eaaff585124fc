//! # Error Taxonomy
//!
//! A single error type shared by the connection layer, the router and the
//! stores. Every variant is recoverable locally except `Unauthorized`, which
//! the host application is expected to escalate (session invalidation lives
//! outside this crate).
//!
//! The type is `Clone` so it can travel on broadcast channels next to the
//! connection events that produced it.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors produced while keeping the mirror in sync.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorError {
    /// The persistent connection could not be established or dropped.
    /// Recovered automatically by the reconnect loop.
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound payload could not be decoded. The frame is discarded.
    #[error("malformed inbound payload: {0}")]
    Parse(String),

    /// A snapshot or acknowledge call failed.
    #[error("remote call failed (status {status:?}): {message}")]
    Remote {
        /// HTTP status code, when the server answered at all.
        status: Option<u16>,
        /// Server error body or client-side failure description.
        message: String,
    },

    /// The remote rejected the session credentials (401).
    #[error("unauthorized: the session must be re-established")]
    Unauthorized,

    /// A best-effort send was dropped because the stream is not connected.
    #[error("not connected; outbound message dropped")]
    NotConnected,

    /// Invalid origin, path or other configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The store was torn down while the operation was in flight.
    #[error("mirror has been shut down")]
    Closed,
}

impl MirrorError {
    /// Shorthand for a `Remote` error.
    pub fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        MirrorError::Remote {
            status,
            message: message.into(),
        }
    }

    /// True for errors that must cross the collaborator boundary untouched.
    pub fn is_auth(&self) -> bool {
        matches!(self, MirrorError::Unauthorized)
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(e: serde_json::Error) -> Self {
        MirrorError::Parse(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MirrorError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        MirrorError::Transport(e.to_string())
    }
}

impl From<url::ParseError> for MirrorError {
    fn from(e: url::ParseError) -> Self {
        MirrorError::Config(e.to_string())
    }
}

#[cfg(feature = "retrieve")]
impl From<reqwest::Error> for MirrorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return MirrorError::Parse(e.to_string());
        }
        match e.status() {
            Some(status) if status == reqwest::StatusCode::UNAUTHORIZED => MirrorError::Unauthorized,
            status => MirrorError::remote(status.map(|s| s.as_u16()), e.to_string()),
        }
    }
}

#[cfg(feature = "retrieve")]
impl From<reqwest_middleware::Error> for MirrorError {
    fn from(e: reqwest_middleware::Error) -> Self {
        match e {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            reqwest_middleware::Error::Middleware(e) => MirrorError::remote(None, e.to_string()),
        }
    }
}
