use anyhow::{anyhow, Context, Result};
use clap::Parser;
use lib_scada::stores::AckMode;
use lib_scada::MirrorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "mirror_client.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Live mirror of SCADA tags and alarms", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "SCADA_ORIGIN", help = "Backend origin, e.g. http://localhost:8000.")]
    pub origin: Option<String>,

    #[clap(long, env = "SCADA_API_PATH", help = "REST prefix under the origin.")]
    pub api_path: Option<String>,

    #[clap(long, env = "SCADA_STREAM_PATH", help = "WebSocket event stream path under the origin.")]
    pub stream_path: Option<String>,

    #[clap(long, env = "SCADA_RECONNECT_DELAY_MS", help = "Fixed delay in milliseconds before reconnecting the stream.")]
    pub reconnect_delay_ms: Option<u64>,

    #[clap(long, env = "SCADA_REQUEST_TIMEOUT_SECS", help = "Timeout in seconds of each REST call.")]
    pub request_timeout_secs: Option<u64>,

    #[clap(long, env = "SCADA_AUTH_TOKEN", help = "Bearer token for the REST API.")]
    pub auth_token: Option<String>,

    #[clap(long, env = "SCADA_ACK_MODE", help = "Acknowledge mode: confirmed or optimistic.")]
    pub ack_mode: Option<String>,

    #[clap(long, env = "SCADA_STATS_INTERVAL_SECONDS", help = "Interval in seconds between mirror stats reports.")]
    pub stats_interval_seconds: Option<u64>,

    #[clap(long, env = "SCADA_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "SCADA_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "SCADA_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,
}

/// Fully resolved settings of one client run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mirror: MirrorConfig,
    pub stats_interval: Duration,
    pub log_dir: PathBuf,
    pub log_level: String,
}

impl Config {
    // 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            origin: other.origin.or(self.origin),
            api_path: other.api_path.or(self.api_path),
            stream_path: other.stream_path.or(self.stream_path),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            request_timeout_secs: other.request_timeout_secs.or(self.request_timeout_secs),
            auth_token: other.auth_token.or(self.auth_token),
            ack_mode: other.ack_mode.or(self.ack_mode),
            stats_interval_seconds: other.stats_interval_seconds.or(self.stats_interval_seconds),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            config_path: other.config_path.or(self.config_path),
        }
    }

    fn defaults() -> Config {
        Config {
            origin: Some("http://localhost:8000".to_string()),
            api_path: Some(lib_scada::configs::DEFAULT_API_PATH.to_string()),
            stream_path: Some(lib_scada::configs::DEFAULT_STREAM_PATH.to_string()),
            reconnect_delay_ms: Some(5000),
            request_timeout_secs: Some(10),
            ack_mode: Some("confirmed".to_string()),
            stats_interval_seconds: Some(30),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }

    /// Converts the merged options into run settings.
    pub fn resolve(&self) -> Result<Settings> {
        let origin = self.origin.as_deref().ok_or_else(|| anyhow!("no origin configured"))?;
        let mut mirror = MirrorConfig::new(origin).with_context(|| format!("invalid origin '{origin}'"))?;
        if let Some(path) = &self.api_path {
            mirror.api_path = path.clone();
        }
        if let Some(path) = &self.stream_path {
            mirror.stream_path = path.clone();
        }
        if let Some(ms) = self.reconnect_delay_ms {
            mirror.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = self.request_timeout_secs {
            mirror.request_timeout = Duration::from_secs(secs);
        }
        mirror.auth_token = self.auth_token.clone().filter(|t| !t.is_empty());
        mirror.ack_mode = parse_ack_mode(self.ack_mode.as_deref().unwrap_or("confirmed"))?;

        // Fail early on paths that cannot form URLs.
        mirror.api_base_url()?;
        mirror.stream_url()?;

        Ok(Settings {
            mirror,
            stats_interval: Duration::from_secs(self.stats_interval_seconds.unwrap_or(30).max(1)),
            log_dir: self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.clone().unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn parse_ack_mode(value: &str) -> Result<AckMode> {
    match value.to_lowercase().as_str() {
        "confirmed" => Ok(AckMode::Confirmed),
        "optimistic" => Ok(AckMode::Optimistic),
        other => Err(anyhow!("unknown ack mode '{other}' (expected confirmed or optimistic)")),
    }
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    match fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str::<Config>(&text) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                None
            }
        },
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Merges defaults < config file < environment/CLI.
pub fn load_config_with(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

    let mut current = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current = current.merge(file_config);
    }
    current.merge(cli)
}

pub fn load_config() -> Config {
    load_config_with(Config::parse())
}
