//! Client settings
//!
//! Read from an optional `huddle.toml` next to the binary, then overridden by
//! `HUDDLE_*` environment variables (`HUDDLE_ROOM`, `HUDDLE_KEY`, ...).

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use huddle_protocol::{IceServer, Role};
use serde::Deserialize;
use std::time::Duration;

use crate::error::ClientError;

/// Floor for the keepalive period; the ping timer cannot run with a zero period
const MIN_KEEPALIVE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    /// Relay base URL; `http(s)://` is mapped to `ws(s)://`
    pub server_url: String,
    pub name: String,
    pub room: String,
    pub key: String,
    pub group: String,
    pub role: Role,
    pub reconnect_delay_ms: u64,
    pub keepalive_interval_ms: u64,
    /// Only use TURN relays for media
    pub turn_only: bool,
    pub stun_servers: Vec<String>,
    #[serde(default)]
    pub turn_urls: Vec<String>,
    #[serde(default)]
    pub turn_username: Option<String>,
    #[serde(default)]
    pub turn_credential: Option<String>,
}

impl ClientSettings {
    pub fn load() -> Result<Self, ClientError> {
        let settings: Self = Self::builder()?
            .add_source(File::with_name("huddle").required(false))
            .add_source(
                Environment::with_prefix("HUDDLE")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("stun_servers")
                    .with_list_parse_key("turn_urls"),
            )
            .build()?
            .try_deserialize::<Self>()?
            .validated()?;

        tracing::info!(
            "Loaded settings for {} in room {:?} via {}",
            settings.name,
            settings.room,
            settings.server_url
        );
        Ok(settings)
    }

    fn builder() -> Result<ConfigBuilder<DefaultState>, ClientError> {
        Ok(config::Config::builder()
            .set_default("server_url", "ws://127.0.0.1:8080")?
            .set_default("name", "Anonymous")?
            .set_default("room", "")?
            .set_default("key", "")?
            .set_default("group", huddle_protocol::DEFAULT_GROUP)?
            .set_default("role", "user")?
            .set_default("reconnect_delay_ms", 3000)?
            .set_default("keepalive_interval_ms", 10000)?
            .set_default("turn_only", false)?
            .set_default("stun_servers", vec!["stun:stun.l.google.com:19302"])?)
    }

    fn validated(self) -> Result<Self, ClientError> {
        if self.keepalive_interval_ms == 0 {
            return Err(ConfigError::Message(
                "keepalive_interval_ms must be greater than zero".to_string(),
            )
            .into());
        }
        Ok(self)
    }

    /// WebSocket endpoint of the relay
    pub fn ws_url(&self) -> String {
        let base = self
            .server_url
            .trim_end_matches('/')
            .replacen("http://", "ws://", 1)
            .replacen("https://", "wss://", 1);
        if base.ends_with("/ws") {
            base
        } else {
            format!("{}/ws", base)
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms).max(MIN_KEEPALIVE)
    }

    /// ICE servers handed to the media engine; STUN is left out in TURN-only mode
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let mut servers = Vec::new();

        if !self.turn_only {
            servers.extend(self.stun_servers.iter().map(|url| IceServer {
                urls: vec![url.clone()],
                username: None,
                credential: None,
            }));
        }

        if !self.turn_urls.is_empty() {
            servers.push(IceServer {
                urls: self.turn_urls.clone(),
                username: self.turn_username.clone(),
                credential: self.turn_credential.clone(),
            });
        }

        servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> ClientSettings {
        ClientSettings::builder()
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = from_toml("");
        assert_eq!(settings.name, "Anonymous");
        assert_eq!(settings.group, "default");
        assert_eq!(settings.role, Role::User);
        assert_eq!(settings.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(settings.keepalive_interval(), Duration::from_secs(10));
        assert!(!settings.turn_only);
    }

    #[test]
    fn test_file_overrides() {
        let settings = from_toml(
            r#"
            server_url = "https://relay.example.org/"
            room = "r1"
            key = "k"
            role = "admin"
            turn_only = true
            turn_urls = ["turn:relay.example.org:3478"]
            turn_username = "u"
            turn_credential = "p"
            "#,
        );

        assert_eq!(settings.role, Role::Admin);
        assert_eq!(settings.ws_url(), "wss://relay.example.org/ws");

        // TURN-only drops STUN
        let servers = settings.ice_servers();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec!["turn:relay.example.org:3478"]);
        assert_eq!(servers[0].username.as_deref(), Some("u"));
    }

    #[test]
    fn test_ws_url_variants() {
        let mut settings = from_toml("");
        assert_eq!(settings.ws_url(), "ws://127.0.0.1:8080/ws");

        settings.server_url = "http://localhost:3000".into();
        assert_eq!(settings.ws_url(), "ws://localhost:3000/ws");

        settings.server_url = "ws://localhost:3000/ws".into();
        assert_eq!(settings.ws_url(), "ws://localhost:3000/ws");
    }

    #[test]
    fn test_zero_keepalive_rejected() {
        let settings = from_toml("keepalive_interval_ms = 0");
        assert!(matches!(
            settings.clone().validated(),
            Err(ClientError::Config(ConfigError::Message(_)))
        ));

        // Built by hand it still yields a usable period
        assert_eq!(settings.keepalive_interval(), MIN_KEEPALIVE);
        assert!(from_toml("keepalive_interval_ms = 50").validated().is_ok());
    }

    #[test]
    fn test_stun_included_by_default() {
        let settings = from_toml("");
        let servers = settings.ice_servers();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
    }
}
