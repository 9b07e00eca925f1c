use rally_core::{DEFAULT_STUN_ADDR, DEFAULT_STUN_ADDR_2};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_TURN_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub url: String,
    /// Shared secret for minting short-lived credentials. Takes precedence over
    /// the static username/credential pair.
    pub secret: Option<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub addr: SocketAddr,
    pub stun_urls: Vec<String>,
    pub turn: Option<TurnConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            stun_urls: vec![DEFAULT_STUN_ADDR.to_owned(), DEFAULT_STUN_ADDR_2.to_owned()],
            turn: None,
        }
    }
}

impl RelayConfig {
    /// Reads `RALLY_RELAY_ADDR`, `RALLY_STUN_URLS` (comma separated), `TURN_URL`,
    /// `TURN_SECRET`, `TURN_USERNAME`, `TURN_CREDENTIAL` and `TURN_TTL_SECS`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = env::var("RALLY_RELAY_ADDR") {
            config.addr = addr.parse()?;
        }

        if let Ok(urls) = env::var("RALLY_STUN_URLS") {
            config.stun_urls = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_owned)
                .collect();
        }

        if let Ok(url) = env::var("TURN_URL") {
            let ttl = match env::var("TURN_TTL_SECS") {
                Ok(secs) => Duration::from_secs(secs.parse()?),
                Err(_) => DEFAULT_TURN_TTL,
            };
            config.turn = Some(TurnConfig {
                url,
                secret: env::var("TURN_SECRET").ok(),
                username: env::var("TURN_USERNAME").ok(),
                credential: env::var("TURN_CREDENTIAL").ok(),
                ttl,
            });
        }

        Ok(config)
    }
}
