//! Runtime configuration and server config discovery.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::{Result, WebrtcError};
use crate::signaling::SignalingMode;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the render server, `http://` or `https://`.
    pub server_url: String,
    /// STUN/TURN URLs. Logged at connect time only: the str0m transport gathers host
    /// candidates and never contacts these servers.
    pub ice_servers: Vec<String>,
    pub pose_rate_hz: u32,
    pub stats_interval: Duration,
    /// Mailbox poll period of the HTTP relay.
    pub poll_interval: Duration,
    pub channel_label: String,
    /// Sent to the renderer in the offer metadata line.
    pub user: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1".to_string(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            pose_rate_hz: 72,
            stats_interval: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            channel_label: "data".to_string(),
            user: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(WebrtcError::Config(format!(
                "server url must be http(s): {}",
                self.server_url
            )));
        }
        if self.pose_rate_hz == 0 {
            return Err(WebrtcError::Config("pose rate must be positive".into()));
        }
        if self.stats_interval.is_zero() || self.poll_interval.is_zero() {
            return Err(WebrtcError::Config("intervals must be positive".into()));
        }
        Ok(())
    }

    fn base(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    /// `http` becomes `ws`, `https` becomes `wss`.
    pub fn websocket_url(&self) -> String {
        let base = self.base();
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}/")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}/")
        } else {
            format!("{base}/")
        }
    }

    pub fn signaling_url(&self) -> String {
        format!("{}/signaling", self.base())
    }

    pub fn config_url(&self) -> String {
        format!("{}/config", self.base())
    }

    pub fn pose_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.pose_rate_hz.max(1)))
    }
}

/// What the render server tells us at `/config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    #[serde(rename = "useWebSocket")]
    pub use_web_socket: bool,
}

impl ServerConfig {
    pub fn mode(&self) -> SignalingMode {
        if self.use_web_socket {
            SignalingMode::WebSocket
        } else {
            SignalingMode::HttpRelay
        }
    }
}

pub async fn discover_server_config(config: &Config) -> Result<ServerConfig> {
    let url = config.config_url();
    let server_config: ServerConfig = reqwest::get(&url)
        .await?
        .error_for_status()?
        .json()
        .await?;
    info!("Server config from {}: {:?}", url, server_config);
    Ok(server_config)
}
