//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `INGAME_RELAY_DISCORD_TOKEN` - gateway bot token
//! - `INGAME_RELAY_DISCORD_CHANNEL` - destination channel ID
//! - `INGAME_RELAY_GAME_USERNAME` - game account name
//! - `INGAME_RELAY_GAME_SERVER` - game server address

use std::env;

use tracing::warn;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "INGAME_RELAY";

/// Apply environment variable overrides to a config.
///
/// This allows the token to be provided via the environment instead of the
/// config file.
pub fn apply_env_overrides(config: Config) -> Config {
    apply_overrides(config, |name| env::var(format!("{}_{}", ENV_PREFIX, name)).ok())
}

fn apply_overrides(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(token) = lookup("DISCORD_TOKEN") {
        config.discord.token = token;
    }
    if let Some(channel) = lookup("DISCORD_CHANNEL") {
        match channel.parse() {
            Ok(id) => config.discord.channel = id,
            Err(_) => warn!(
                "Ignoring {}_DISCORD_CHANNEL: '{}' is not a channel ID",
                ENV_PREFIX, channel
            ),
        }
    }
    if let Some(username) = lookup("GAME_USERNAME") {
        config.game.username = username;
    }
    if let Some(server) = lookup("GAME_SERVER") {
        config.game.server = server;
    }

    config
}

/// Get the config file path from environment or use default.
///
/// Checks `INGAME_RELAY_CONFIG`, otherwise returns "ingame-relay.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "ingame-relay.conf".to_string())
}
