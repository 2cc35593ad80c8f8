//! Bridge commands (connect, disconnect, sudo, help).
//!
//! Parsing is prefix-based. Execution drives the bridge coordinator and turns
//! every outcome into reply text; state changes never depend on the reply
//! being delivered.

use std::time::Duration;

use tracing::{debug, info};

use crate::bridge::session::{BridgeCoordinator, DisconnectOutcome};
use crate::common::{BridgeError, GameError};

/// How long connect/disconnect confirmations stay in the channel.
pub const CONFIRMATION_LIFETIME: Duration = Duration::from_secs(15);

pub const ALREADY_CONNECTED: &str =
    "A connection should already be established. Kill it with the `disconnect` command if wanted.";
pub const NOT_CONNECTED: &str = "A connection is not already established.";
pub const DISCONNECTED: &str = "The account should have disconnected";
pub const ADMIN_REQUIRED: &str = "You need the Administrator permission to use this command.";

/// Commands understood by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    /// Open the game session.
    Connect,
    /// Close the game session.
    Disconnect,
    /// Say something in game as the bridge account, bypassing the relay queue.
    Sudo { message: String },
    Help,
}

impl BridgeCommand {
    pub fn requires_admin(&self) -> bool {
        !matches!(self, BridgeCommand::Help)
    }

    /// Whether the invoking message is removed before the command runs.
    pub fn deletes_invocation(&self) -> bool {
        matches!(self, BridgeCommand::Connect | BridgeCommand::Disconnect)
    }
}

/// A reply to post in the invoking channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub text: String,
    /// Delete the reply after this long.
    pub delete_after: Option<Duration>,
}

impl CommandResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            delete_after: None,
        }
    }

    pub fn temporary(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            delete_after: Some(CONFIRMATION_LIFETIME),
        }
    }
}

/// Whether `content` is a command invocation for `prefix`.
pub fn is_command(prefix: &str, content: &str) -> bool {
    !prefix.is_empty() && content.starts_with(prefix)
}

/// Parse a command invocation.
///
/// Returns `None` when `content` does not start with `prefix` or names a
/// command this bot does not have.
pub fn parse_command(prefix: &str, content: &str) -> Option<BridgeCommand> {
    if !is_command(prefix, content) {
        return None;
    }

    let rest = &content[prefix.len()..];
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    match name.to_lowercase().as_str() {
        "connect" => Some(BridgeCommand::Connect),
        "disconnect" => Some(BridgeCommand::Disconnect),
        "sudo" => Some(BridgeCommand::Sudo {
            message: args.to_string(),
        }),
        "help" => Some(BridgeCommand::Help),
        _ => None,
    }
}

pub fn help_text(prefix: &str) -> String {
    format!(
        "**Available Commands:**\n\
         • `{p}connect` - Connect the game account to the server\n\
         • `{p}disconnect` - Disconnect the game account from the server\n\
         • `{p}sudo <message>` - Get the game account to say something\n\
         • `{p}help` - Show this help message",
        p = prefix
    )
}

/// Reply text for a failed connect.
pub fn connect_failure_text(error: &BridgeError) -> String {
    match error {
        BridgeError::AlreadyActive => ALREADY_CONNECTED.to_string(),
        BridgeError::Game(GameError::AuthFailure(reason)) => format!("Login failure: {}", reason),
        other => format!("Connection failure: {}", other),
    }
}

/// Reply text for chat the game connection refused.
pub fn send_failure_text(error: &BridgeError) -> String {
    format!("Send failure: {}", error)
}

/// Run a command against the bridge and describe the outcome.
pub async fn execute(
    coordinator: &BridgeCoordinator,
    command: BridgeCommand,
    prefix: &str,
) -> CommandResponse {
    debug!("Executing command {:?}", command);

    match command {
        BridgeCommand::Connect => match coordinator.connect().await {
            Ok(session) => CommandResponse::temporary(format!(
                "`{}` should have connected to `{}`",
                session.username, session.server
            )),
            Err(e) => CommandResponse::new(connect_failure_text(&e)),
        },
        BridgeCommand::Disconnect => match coordinator.disconnect().await {
            DisconnectOutcome::Disconnected => CommandResponse::temporary(DISCONNECTED),
            DisconnectOutcome::NotConnected => CommandResponse::new(NOT_CONNECTED),
        },
        BridgeCommand::Sudo { message } if message.is_empty() => {
            CommandResponse::new(format!("Usage: `{}sudo <message>`", prefix))
        }
        BridgeCommand::Sudo { message } => match coordinator.send_to_game(&message).await {
            Ok(()) => {
                info!("Sudo -> game: {}", message);
                CommandResponse::new(format!(
                    "`{}` should have said: `{}`",
                    coordinator.username(),
                    message
                ))
            }
            Err(BridgeError::NotActive) => CommandResponse::new(NOT_CONNECTED),
            Err(e) => CommandResponse::new(send_failure_text(&e)),
        },
        BridgeCommand::Help => CommandResponse::new(help_text(prefix)),
    }
}
