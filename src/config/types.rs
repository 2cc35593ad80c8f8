//! Configuration type definitions.

use std::net::Ipv6Addr;

use serde::Deserialize;

use crate::game::connection::{Credentials, ServerAddress};

/// Default command prefix on the gateway side.
pub const DEFAULT_PREFIX: &str = "!";

/// Default game server port when the address has none.
pub const DEFAULT_GAME_PORT: u16 = 25565;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    pub game: GameConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Gateway bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub token: String,
    /// Destination channel ID for relayed game chat.
    pub channel: u64,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Connect the game session as soon as the gateway is ready.
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

/// Game server connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    pub username: String,
    /// `"host"`, `"host port"` or `"host:port"`.
    pub server: String,
}

/// Relay queue tuning.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    /// Maximum queued fragments before the oldest is dropped. `0` or absent
    /// keeps the queue unbounded.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Parse `game.server` into host and port.
    pub fn server_address(&self) -> Option<ServerAddress> {
        parse_server_address(&self.game.server)
    }

    /// Credentials used for the game login.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.game.username.clone(),
        }
    }

    /// Queue bound, with `0` meaning unbounded.
    pub fn queue_capacity(&self) -> Option<usize> {
        self.relay.queue_capacity.filter(|&capacity| capacity > 0)
    }
}

/// Parse a server address in any of the accepted forms.
///
/// IPv6 literals are written `[addr]`, `[addr]:port` or `[addr] port`; a
/// bare literal without a port is accepted too. Returns `None` for an empty
/// host or a port that is not a valid `u16`.
pub fn parse_server_address(server: &str) -> Option<ServerAddress> {
    let server = server.trim();
    let (host, port) = if let Some(bracketed) = server.strip_prefix('[') {
        let (host, rest) = bracketed.split_once(']')?;
        host.parse::<Ipv6Addr>().ok()?;
        let rest = rest.trim_start();
        let port = match rest.strip_prefix(':') {
            Some(port) => Some(port),
            None if rest.is_empty() => None,
            None => Some(rest),
        };
        (host, port)
    } else if let Some((host, port)) = server.split_once(' ') {
        (host.trim(), Some(port.trim()))
    } else if server.parse::<Ipv6Addr>().is_ok() {
        (server, None)
    } else if let Some((host, port)) = server.rsplit_once(':') {
        (host, Some(port))
    } else {
        (server, None)
    };

    if host.is_empty() || (host.contains(':') && host.parse::<Ipv6Addr>().is_err()) {
        return None;
    }

    let port = match port {
        Some(port) => port.parse().ok()?,
        None => DEFAULT_GAME_PORT,
    };

    Some(ServerAddress {
        host: host.to_string(),
        port,
    })
}
