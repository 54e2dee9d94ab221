//! WebRTC room configuration

use std::time::Duration;

use crate::config::SessionConfig;

/// Settings shared by every subscriber peer in a room
#[derive(Debug, Clone)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// Upper bound for ICE candidate gathering while answering an offer
    pub gathering_timeout: Duration,
    /// Media stream id announced for the published tracks
    pub stream_id: String,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            // Empty STUN servers: host candidates are enough on a local network
            stun_servers: vec![],
            gathering_timeout: Duration::from_secs(5),
            stream_id: "avatar".to_string(),
        }
    }
}

impl WebRtcConfig {
    pub fn from_session(session: &SessionConfig, stream_id: impl Into<String>) -> Self {
        Self {
            stun_servers: session.stun_servers.clone(),
            stream_id: stream_id.into(),
            ..Default::default()
        }
    }
}

/// API key pair checked on every signaling request
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub key: String,
    pub secret: String,
}

impl ApiCredentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    pub fn matches(&self, key: &str, secret: &str) -> bool {
        self.key == key && self.secret == secret
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("key", &self.key)
            .field("secret", &"***")
            .finish()
    }
}

/// Bind address for the signaling endpoint, e.g. `http://0.0.0.0:7880` -> `0.0.0.0:7880`
pub fn bind_address(url: &str) -> &str {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
}
