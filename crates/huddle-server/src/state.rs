use crate::ws::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    /// Period of the liveness sweep; a dead session is evicted within two periods
    pub liveness_interval: Duration,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
}

#[derive(Clone)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| {
            let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
            format!("0.0.0.0:{}", port)
        });

        let liveness_interval =
            parse_liveness_interval(std::env::var("LIVENESS_INTERVAL_SECS").ok())?;

        let stun_servers = std::env::var("STUN_SERVERS")
            .map(|s| s.split(',').map(String::from).collect())
            .unwrap_or_else(|_| vec!["stun:stun.l.google.com:19302".to_string()]);

        let turn_servers = match std::env::var("TURN_URLS") {
            Ok(urls) => {
                let username = std::env::var("TURN_USERNAME").unwrap_or_default();
                let credential = std::env::var("TURN_CREDENTIAL").unwrap_or_default();
                if username.is_empty() {
                    tracing::warn!("TURN_URLS set without TURN_USERNAME");
                }
                urls.split(',')
                    .map(|url| TurnServer {
                        url: url.trim().to_string(),
                        username: username.clone(),
                        credential: credential.clone(),
                    })
                    .collect()
            }
            Err(_) => vec![],
        };

        Ok(Config {
            bind_address,
            liveness_interval,
            stun_servers,
            turn_servers,
        })
    }
}

fn parse_liveness_interval(value: Option<String>) -> anyhow::Result<Duration> {
    let secs: u64 = match value {
        Some(secs) => secs.trim().parse()?,
        None => 15,
    };
    if secs == 0 {
        anyhow::bail!("LIVENESS_INTERVAL_SECS must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            liveness_interval: Duration::from_secs(15),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: vec![],
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<Registry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
        }
    }
}
