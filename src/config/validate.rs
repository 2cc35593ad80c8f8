//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use crate::common::error::ConfigError;
use crate::config::types::{parse_server_address, Config};

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    // Validate Discord config
    if config.discord.token.is_empty() {
        errors.push("discord.token is required".to_string());
    }
    if config.discord.token == "YOUR_DISCORD_TOKEN_HERE" {
        errors.push("discord.token has not been configured (still using placeholder)".to_string());
    }
    if config.discord.channel == 0 {
        errors.push("discord.channel must be a non-zero channel ID".to_string());
    }
    if config.discord.prefix.is_empty() {
        errors.push("discord.prefix must not be empty".to_string());
    }

    // Validate game config
    let username = &config.game.username;
    if username.len() < 3 || username.len() > 16 {
        errors.push(format!(
            "game.username must be 3-16 characters (got {})",
            username.len()
        ));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        errors.push("game.username may only contain letters, digits and '_'".to_string());
    }
    if parse_server_address(&config.game.server).is_none() {
        errors.push(format!(
            "game.server '{}' is invalid (use: host, \"host port\" or host:port)",
            config.game.server
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}
