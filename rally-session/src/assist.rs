use async_trait::async_trait;
use rally_core::{IceServerConfig, IceServersResponse, PeerId};
use std::time::Duration;
use tracing::{debug, warn};

const ASSIST_TIMEOUT: Duration = Duration::from_secs(3);

/// Where a fresh connection record gets its STUN/TURN list from.
#[async_trait]
pub trait IceServerSource: Send + Sync {
    async fn ice_servers(&self, peer: &PeerId) -> Vec<IceServerConfig>;
}

#[derive(Debug, Clone)]
pub struct StaticIceServers(pub Vec<IceServerConfig>);

impl Default for StaticIceServers {
    fn default() -> Self {
        Self(IceServerConfig::default_stun())
    }
}

#[async_trait]
impl IceServerSource for StaticIceServers {
    async fn ice_servers(&self, _peer: &PeerId) -> Vec<IceServerConfig> {
        self.0.clone()
    }
}

/// Fetches per-peer servers from `<base>/ice`, falling back to a static list
/// when the endpoint is slow, down or returns nothing.
#[derive(Debug, Clone)]
pub struct HttpIceServers {
    client: reqwest::Client,
    base_url: String,
    fallback: Vec<IceServerConfig>,
}

impl HttpIceServers {
    pub fn new(base_url: impl Into<String>, fallback: Vec<IceServerConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            fallback,
        }
    }

    async fn fetch(&self, peer: &PeerId) -> Result<Vec<IceServerConfig>, reqwest::Error> {
        let url = format!("{}/ice?peer={}", self.base_url.trim_end_matches('/'), peer);
        let response = self
            .client
            .get(url)
            .timeout(ASSIST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let body: IceServersResponse = response.json().await?;
        Ok(body.ice_servers)
    }
}

#[async_trait]
impl IceServerSource for HttpIceServers {
    async fn ice_servers(&self, peer: &PeerId) -> Vec<IceServerConfig> {
        match self.fetch(peer).await {
            Ok(servers) if !servers.is_empty() => {
                debug!("Got {} ICE server entries from assist", servers.len());
                servers
            }
            Ok(_) => self.fallback.clone(),
            Err(e) => {
                warn!("ICE assist unavailable, using defaults: {}", e);
                self.fallback.clone()
            }
        }
    }
}

/// `true` when `<base>/health` answers with a success status.
pub async fn check_health(base_url: &str) -> bool {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(url)
        .timeout(ASSIST_TIMEOUT)
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            debug!("Health check failed: {}", e);
            false
        }
    }
}
