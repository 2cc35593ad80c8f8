//! Gateway relay handling.
//!
//! The gateway-facing edge of the bridge: decides what to do with inbound
//! channel messages and posts drained batches to the destination channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serenity::async_trait;
use serenity::builder::{CreateEmbed, CreateMessage};
use serenity::http::{Http, HttpError};
use serenity::model::id::ChannelId;
use tracing::{debug, error, info, warn};

use crate::bridge::session::{BridgeCoordinator, SessionState};
use crate::common::{BridgeError, BridgeResult, DeliveryError, DrainBatch};
use crate::discord::commands::{
    execute, is_command, parse_command, send_failure_text, BridgeCommand,
};

/// The parts of a gateway message the relay looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub author_id: u64,
    pub guild_id: Option<u64>,
    pub content: String,
    pub is_bot: bool,
}

/// Why an inbound message is not relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Sent by a bot, including this one.
    Bot,
    /// Direct message rather than a guild channel.
    NotInGuild,
    /// Starts with the command prefix but names no known command.
    UnknownCommand,
    /// No bridge session is active.
    Inactive,
    Empty,
}

/// What to do with an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundAction {
    Ignore(IgnoreReason),
    Command(BridgeCommand),
    Relay(String),
}

/// Where relayed game chat and notices are posted.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Post relayed text as a single embed.
    async fn emit(&self, text: &str) -> Result<(), DeliveryError>;

    /// Post a plain notice, optionally deleting it after `delete_after`.
    async fn say(&self, text: &str, delete_after: Option<Duration>) -> Result<(), DeliveryError>;
}

/// A guild text channel reached over the REST API.
pub struct ChannelDestination {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelDestination {
    pub fn new(http: Arc<Http>, channel_id: u64) -> Self {
        Self {
            http,
            channel_id: ChannelId::new(channel_id),
        }
    }

    fn delivery_error(&self, error: serenity::Error) -> DeliveryError {
        if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &error {
            match response.status_code.as_u16() {
                429 => return DeliveryError::RateLimited,
                404 => {
                    return DeliveryError::NotFound {
                        channel_id: self.channel_id.get(),
                    }
                }
                _ => {}
            }
        }
        DeliveryError::Failed(error.to_string())
    }
}

#[async_trait]
impl Destination for ChannelDestination {
    async fn emit(&self, text: &str) -> Result<(), DeliveryError> {
        let message = CreateMessage::new().embed(CreateEmbed::new().description(text));
        self.channel_id
            .send_message(&self.http, message)
            .await
            .map(|_| ())
            .map_err(|e| self.delivery_error(e))
    }

    async fn say(&self, text: &str, delete_after: Option<Duration>) -> Result<(), DeliveryError> {
        let sent = self
            .channel_id
            .say(&self.http, text)
            .await
            .map_err(|e| self.delivery_error(e))?;

        if let Some(delay) = delete_after {
            let http = Arc::clone(&self.http);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = sent.delete(&http).await {
                    debug!("Failed to delete temporary message: {}", e);
                }
            });
        }
        Ok(())
    }
}

/// Routes between the gateway and the bridge coordinator.
pub struct GatewayRelayHandler {
    coordinator: Arc<BridgeCoordinator>,
    destination: Arc<dyn Destination>,
    prefix: String,
    /// Our own user id, 0 until the gateway reports ready.
    bot_user_id: AtomicU64,
}

impl GatewayRelayHandler {
    pub fn new(
        coordinator: Arc<BridgeCoordinator>,
        destination: Arc<dyn Destination>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            destination,
            prefix: prefix.into(),
            bot_user_id: AtomicU64::new(0),
        }
    }

    pub fn set_bot_user_id(&self, id: u64) {
        self.bot_user_id.store(id, Ordering::Relaxed);
    }

    pub fn coordinator(&self) -> &Arc<BridgeCoordinator> {
        &self.coordinator
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Decide what an inbound message is.
    ///
    /// Checks run in order: bot author, guild, command prefix, active
    /// session. Commands are recognised whether or not a session is active.
    pub fn classify(&self, message: &InboundMessage) -> InboundAction {
        if message.is_bot || message.author_id == self.bot_user_id.load(Ordering::Relaxed) {
            return InboundAction::Ignore(IgnoreReason::Bot);
        }
        if message.guild_id.is_none() {
            return InboundAction::Ignore(IgnoreReason::NotInGuild);
        }
        if is_command(&self.prefix, &message.content) {
            return match parse_command(&self.prefix, &message.content) {
                Some(command) => InboundAction::Command(command),
                None => InboundAction::Ignore(IgnoreReason::UnknownCommand),
            };
        }
        if self.coordinator.state() != SessionState::Active {
            return InboundAction::Ignore(IgnoreReason::Inactive);
        }
        if message.content.trim().is_empty() {
            return InboundAction::Ignore(IgnoreReason::Empty);
        }
        InboundAction::Relay(message.content.clone())
    }

    /// Forward chat text to the game through the active session.
    pub async fn relay(&self, text: &str) -> BridgeResult<()> {
        self.coordinator.send_to_game(text).await?;
        info!("Gateway -> game: {}", text);
        Ok(())
    }

    /// Relay chat text and tell the channel when the game refuses it.
    ///
    /// Returns whether the text reached the game. The session stays up
    /// either way.
    pub async fn relay_or_report(&self, text: &str) -> bool {
        match self.relay(text).await {
            Ok(()) => true,
            Err(BridgeError::NotActive) => {
                debug!("Session ended before the message could be relayed");
                false
            }
            Err(e) => {
                warn!("Failed to relay message to game: {}", e);
                self.notify(&send_failure_text(&e), None).await;
                false
            }
        }
    }

    /// Whether a gateway ready should reopen the game session.
    pub fn should_resume(&self, auto_connect: bool) -> bool {
        auto_connect && self.coordinator.state() == SessionState::Idle
    }

    /// Open the game session on startup and post the outcome.
    pub async fn resume(&self) {
        info!("Resuming the bridge session on startup");
        let response = execute(&self.coordinator, BridgeCommand::Connect, &self.prefix).await;
        self.notify(&response.text, response.delete_after).await;
    }

    /// Close a session whose game connection dropped and tell the channel.
    /// Reports for a session that is no longer current change nothing.
    pub async fn session_lost(&self, session_id: u64, reason: &str) {
        if self.coordinator.handle_connection_lost(session_id).await {
            self.notify(
                &format!("The connection to the game server was lost: {}", reason),
                None,
            )
            .await;
        }
    }

    /// Post a drained batch. Failures are logged and the batch is dropped.
    pub async fn deliver(&self, batch: &DrainBatch) {
        match self.destination.emit(&batch.text).await {
            Ok(()) => debug!(fragments = batch.fragments, "Game -> gateway batch delivered"),
            Err(DeliveryError::RateLimited) => {
                warn!(fragments = batch.fragments, "Rate limited, dropping batch")
            }
            Err(e) => error!(fragments = batch.fragments, "Dropping batch: {}", e),
        }
    }

    /// Post a notice to the destination channel, best effort.
    pub async fn notify(&self, text: &str, delete_after: Option<Duration>) {
        if let Err(e) = self.destination.say(text, delete_after).await {
            warn!("Failed to post notice: {}", e);
        }
    }
}
