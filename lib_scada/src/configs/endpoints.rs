use std::time::Duration;

use url::Url;

use crate::core::connection::{StreamConfig, DEFAULT_RECONNECT_DELAY};
use crate::error::{MirrorError, Result};
use crate::stores::AckMode;

/// Default REST prefix under the origin.
pub const DEFAULT_API_PATH: &str = "/api/";
/// Default event stream path under the origin.
pub const DEFAULT_STREAM_PATH: &str = "/ws/tags/";
/// Default per-request timeout of the snapshot channel.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the mirror needs to reach the backend.
///
/// One `http(s)` origin serves both channels: the REST base is
/// `origin + api_path`, the stream URL is `origin + stream_path` with the
/// scheme switched to `ws` (for `http`) or `wss` (for `https`).
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorConfig {
    pub origin: Url,
    pub api_path: String,
    pub stream_path: String,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    pub auth_token: Option<String>,
    pub ack_mode: AckMode,
}

impl MirrorConfig {
    /// Builds a config with default paths and timings.
    /// Rejects anything that is not an absolute `http` or `https` URL.
    pub fn new(origin: &str) -> Result<Self> {
        let origin = Url::parse(origin)?;
        match origin.scheme() {
            "http" | "https" => {}
            other => {
                return Err(MirrorError::Config(format!(
                    "origin must use http or https, got '{other}'"
                )))
            }
        }
        if origin.host_str().is_none() {
            return Err(MirrorError::Config("origin has no host".into()));
        }
        Ok(Self {
            origin,
            api_path: DEFAULT_API_PATH.into(),
            stream_path: DEFAULT_STREAM_PATH.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            auth_token: None,
            ack_mode: AckMode::default(),
        })
    }

    /// Base URL of the snapshot channel, always ending in `/` so relative
    /// endpoint paths join below it.
    pub fn api_base_url(&self) -> Result<Url> {
        let mut path = self.api_path.clone();
        if !path.ends_with('/') {
            path.push('/');
        }
        Ok(self.origin.join(&path)?)
    }

    /// URL of the event stream.
    pub fn stream_url(&self) -> Result<Url> {
        let mut url = self.origin.join(&self.stream_path)?;
        let scheme = if self.origin.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| MirrorError::Config(format!("cannot derive a {scheme} URL from {}", self.origin)))?;
        Ok(url)
    }

    pub fn stream_config(&self) -> Result<StreamConfig> {
        Ok(StreamConfig::new(self.stream_url()?).with_reconnect_delay(self.reconnect_delay))
    }
}
