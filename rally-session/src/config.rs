use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the relay, e.g. `ws://127.0.0.1:3000`.
    pub relay_url: String,
    /// HTTP base URL serving `/ice` and `/health`. Without it the built-in
    /// STUN list is used.
    pub assist_url: Option<String>,
    pub keepalive_interval: Duration,
    pub watchdog_timeout: Duration,
    pub max_restarts: u32,
    pub send_interval: Duration,
    pub max_create_attempts: u32,
    pub channel_label: String,
    /// Where host credentials are persisted. In-memory when unset.
    pub credentials_path: Option<PathBuf>,
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:3000".to_owned(),
            assist_url: None,
            keepalive_interval: Duration::from_secs(20),
            watchdog_timeout: Duration::from_secs(8),
            max_restarts: 2,
            send_interval: Duration::from_millis(50),
            max_create_attempts: 5,
            channel_label: "game".to_owned(),
            credentials_path: None,
            command_buffer: 32,
        }
    }
}

impl SessionConfig {
    /// Reads `RALLY_RELAY_URL`, `RALLY_ASSIST_URL`, `RALLY_CREDENTIALS` and
    /// `RALLY_SEND_INTERVAL_MS` on top of the defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var("RALLY_RELAY_URL") {
            config.relay_url = url;
        }
        if let Ok(url) = env::var("RALLY_ASSIST_URL") {
            config.assist_url = Some(url);
        }
        if let Ok(path) = env::var("RALLY_CREDENTIALS") {
            config.credentials_path = Some(PathBuf::from(path));
        }
        if let Ok(ms) = env::var("RALLY_SEND_INTERVAL_MS") {
            config.send_interval = Duration::from_millis(ms.parse()?);
        }

        Ok(config)
    }

    /// The HTTP side of the relay when no assist URL is configured:
    /// `ws://host` becomes `http://host`.
    pub fn assist_base(&self) -> Option<String> {
        if let Some(url) = &self.assist_url {
            return Some(url.clone());
        }
        self.relay_url
            .strip_prefix("ws://")
            .map(|r| format!("http://{r}"))
            .or_else(|| {
                self.relay_url
                    .strip_prefix("wss://")
                    .map(|r| format!("https://{r}"))
            })
    }
}
