//! Discord bot client abstraction.
//!
//! Provides a high-level interface for creating and running the Discord bot,
//! hiding serenity implementation details from the rest of the application.
//! All gateway work happens on one event loop: serenity events and
//! [`GatewayTask`]s from the game-session threads are both consumed by
//! [`DiscordBot::process_events`].

use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use serenity::async_trait;
use serenity::http::HttpBuilder;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use serenity::Client;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bridge::channels::GatewaySideChannels;
use crate::bridge::session::BridgeCoordinator;
use crate::common::GatewayTask;
use crate::config::types::DiscordConfig;
use crate::discord::commands::{execute, BridgeCommand, CommandResponse, ADMIN_REQUIRED};
use crate::discord::handler::{
    ChannelDestination, GatewayRelayHandler, InboundAction, InboundMessage,
};

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub enum DiscordBotEvent {
    /// Bot connected and ready.
    Ready(Ready),
    /// Message received.
    Message {
        context: Context,
        message: Message,
    },
    Disconnected,
}

struct DiscordBotEvents {
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
}

impl DiscordBotEvents {
    fn new(discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>) -> Self {
        Self { discord_events_tx }
    }
}

#[async_trait]
impl EventHandler for DiscordBotEvents {
    async fn ready(&self, _context: Context, ready: Ready) {
        if let Err(error) = self.discord_events_tx.send(DiscordBotEvent::Ready(ready)) {
            warn!("Failed to process discord event: {}", error);
        }
    }

    async fn message(&self, context: Context, message: Message) {
        if let Err(error) = self
            .discord_events_tx
            .send(DiscordBotEvent::Message { context, message })
        {
            warn!("Failed to process discord event: {}", error);
        }
    }
}

/// Builder for creating the Discord bot.
pub struct DiscordBotBuilder {
    config: DiscordConfig,
    coordinator: Arc<BridgeCoordinator>,
    channels: GatewaySideChannels,
}

impl DiscordBotBuilder {
    pub fn new(
        config: DiscordConfig,
        coordinator: Arc<BridgeCoordinator>,
        channels: GatewaySideChannels,
    ) -> Self {
        Self {
            config,
            coordinator,
            channels,
        }
    }

    /// Build the Discord bot.
    pub async fn build(self) -> anyhow::Result<DiscordBot> {
        let (discord_events_tx, discord_events_rx) = mpsc::unbounded_channel::<DiscordBotEvent>();

        let client = build_client(&self.config.token, discord_events_tx.clone()).await?;
        let destination = Arc::new(ChannelDestination::new(
            client.http.clone(),
            self.config.channel,
        ));

        info!(
            "Relaying to channel {} with command prefix '{}'",
            self.config.channel, self.config.prefix
        );

        let handler = Arc::new(GatewayRelayHandler::new(
            self.coordinator,
            destination,
            self.config.prefix.clone(),
        ));

        Ok(DiscordBot {
            client: Some(client),
            token: self.config.token,
            auto_connect: self.config.auto_connect,
            handler,
            discord_events_rx,
            discord_events_tx,
            channels: self.channels,
        })
    }
}

async fn build_client(
    token: &str,
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
) -> anyhow::Result<Client> {
    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILDS;

    // Build a custom reqwest client with timeout settings
    let reqwest_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let http = HttpBuilder::new(token).client(reqwest_client).build();

    let events = DiscordBotEvents::new(discord_events_tx);
    let client = serenity::client::ClientBuilder::new_with_http(http, intents)
        .event_handler(events)
        .await?;
    Ok(client)
}

/// Whether the author of `message` holds the administrator permission in the
/// guild it was sent in.
fn is_admin(context: &Context, message: &Message) -> bool {
    let (Some(guild_id), Some(member)) = (message.guild_id, message.member.as_deref()) else {
        return false;
    };
    match context.cache.guild(guild_id) {
        Some(guild) => guild
            .partial_member_permissions(message.author.id, member)
            .administrator(),
        None => {
            debug!("Guild {} not cached, treating author as non-admin", guild_id);
            false
        }
    }
}

fn inbound(message: &Message) -> InboundMessage {
    InboundMessage {
        author_id: message.author.id.get(),
        guild_id: message.guild_id.map(|id| id.get()),
        content: message.content.clone(),
        is_bot: message.author.bot,
    }
}

async fn reply(context: &Context, message: &Message, response: CommandResponse) {
    let sent = match message.channel_id.say(&context.http, &response.text).await {
        Ok(sent) => sent,
        Err(e) => {
            warn!("Failed to send command reply: {}", e);
            return;
        }
    };

    if let Some(delay) = response.delete_after {
        let http = context.http.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            if let Err(e) = sent.delete(&http).await {
                debug!("Failed to delete command reply: {}", e);
            }
        });
    }
}

async fn handle_command(
    handler: Arc<GatewayRelayHandler>,
    context: Context,
    message: Message,
    command: BridgeCommand,
) {
    if command.requires_admin() && !is_admin(&context, &message) {
        info!("Refusing {:?} from non-admin {}", command, message.author.name);
        reply(&context, &message, CommandResponse::new(ADMIN_REQUIRED)).await;
        return;
    }

    if command.deletes_invocation() {
        if let Err(e) = message.delete(&context.http).await {
            debug!("Could not delete command message: {}", e);
        }
    }

    info!("Command {:?} from {}", command, message.author.name);
    let response = execute(handler.coordinator(), command, handler.prefix()).await;
    reply(&context, &message, response).await;
}

async fn handle_relay(
    handler: Arc<GatewayRelayHandler>,
    context: Context,
    message: Message,
    text: String,
) {
    if !handler.relay_or_report(&text).await {
        return;
    }
    if let Err(e) = message.delete(&context.http).await {
        debug!("Could not delete relayed message: {}", e);
    }
}

pub struct DiscordBot {
    client: Option<Client>,
    token: String,
    auto_connect: bool,
    handler: Arc<GatewayRelayHandler>,
    discord_events_rx: mpsc::UnboundedReceiver<DiscordBotEvent>,
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
    channels: GatewaySideChannels,
}

impl DiscordBot {
    pub async fn run(mut self) {
        // Extract shard manager before we move client into run_connection
        let shard_manager = self.client.as_ref().map(|c| c.shard_manager.clone());
        let client = &mut self.client;
        let discord_events_rx = &mut self.discord_events_rx;
        let channels = &mut self.channels;
        let handler = &self.handler;
        let mut shutdown_rx = channels.shutdown_rx.clone();

        tokio::select! {
            _ = Self::run_connection(client, &self.token, &self.discord_events_tx) => {},
            _ = Self::process_events(discord_events_rx, channels, handler, self.auto_connect) => {},
            _ = async {
                // Wait for shutdown signal
                loop {
                    if shutdown_rx.changed().await.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                // Gracefully shutdown Discord gateway
                if let Some(ref manager) = shard_manager {
                    info!("Initiating graceful Discord shutdown...");
                    manager.shutdown_all().await;
                    info!("Discord shutdown complete");
                }
            } => {}
        }
        info!("Discord task ended");
    }

    async fn run_connection(
        client: &mut Option<Client>,
        token: &str,
        discord_events_tx: &mpsc::UnboundedSender<DiscordBotEvent>,
    ) {
        /// Create an exponential backoff iterator for Discord reconnection.
        /// 5s initial, 5min max, factor 1.1, with jitter, unlimited retries.
        fn discord_backoff() -> impl Iterator<Item = Duration> {
            backon::ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(5))
                .with_max_delay(MAX_RECONNECT_DELAY)
                .with_factor(1.1)
                .with_jitter()
                .without_max_times()
                .build()
        }

        let mut backoff = discord_backoff();

        loop {
            info!("Connecting to Discord...");

            let mut client = match client.take() {
                Some(client) => client,
                None => {
                    // serenity mostly handles reconnections itself.
                    match build_client(token, discord_events_tx.clone()).await {
                        Ok(client) => {
                            backoff = discord_backoff();
                            client
                        }
                        Err(e) => {
                            error!("Failed to rebuild Discord client: {}", e);
                            let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
                            warn!("Retrying in {:.1}s...", delay.as_secs_f64());
                            sleep(delay).await;
                            continue;
                        }
                    }
                }
            };

            match client.start().await {
                Ok(()) => {
                    info!("Discord client disconnected normally");
                    if let Err(error) = discord_events_tx.send(DiscordBotEvent::Disconnected) {
                        warn!("Failed to process discord event: {}", error);
                    }
                    break;
                }
                Err(e) => {
                    error!("Discord client error: {}", e);
                    let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
                    warn!(
                        "Discord disconnected. Reconnecting in {:.1}s...",
                        delay.as_secs_f64(),
                    );
                    if let Err(error) = discord_events_tx.send(DiscordBotEvent::Disconnected) {
                        warn!("Failed to process discord event: {}", error);
                    }
                    sleep(delay).await;
                }
            }
        }
    }

    async fn process_events(
        discord_events_rx: &mut mpsc::UnboundedReceiver<DiscordBotEvent>,
        channels: &mut GatewaySideChannels,
        handler: &Arc<GatewayRelayHandler>,
        auto_connect_enabled: bool,
    ) {
        let mut connected = false;

        loop {
            tokio::select! {
                // Discord events
                event = discord_events_rx.recv() => {
                    match event {
                        Some(DiscordBotEvent::Ready(ready)) => {
                            info!("Discord bot connected as {}", ready.user.name);
                            handler.set_bot_user_id(ready.user.id.get());
                            connected = true;
                            if handler.should_resume(auto_connect_enabled) {
                                let handler = Arc::clone(handler);
                                tokio::spawn(async move { handler.resume().await });
                            }
                        }
                        Some(DiscordBotEvent::Message { context, message }) => {
                            match handler.classify(&inbound(&message)) {
                                InboundAction::Command(command) => {
                                    let handler = Arc::clone(handler);
                                    let task = handle_command(handler, context, message, command);
                                    tokio::spawn(task);
                                }
                                InboundAction::Relay(text) => {
                                    let handler = Arc::clone(handler);
                                    tokio::spawn(handle_relay(handler, context, message, text));
                                }
                                InboundAction::Ignore(reason) => {
                                    debug!(?reason, "Ignoring message {}", message.id);
                                }
                            }
                        }
                        Some(DiscordBotEvent::Disconnected) => {
                            connected = false;
                        }
                        None => {
                            debug!("Discord events channel closed.");
                            break;
                        }
                    }
                }

                // Work handed off by the game-session threads
                task = channels.tasks_rx.recv() => {
                    match task {
                        Some(GatewayTask::Deliver(batch)) => {
                            if connected {
                                handler.deliver(&batch).await;
                            } else {
                                debug!(
                                    fragments = batch.fragments,
                                    "Dropping batch - Discord not connected"
                                );
                            }
                        }
                        Some(GatewayTask::SessionLost { session_id, reason }) => {
                            let handler = Arc::clone(handler);
                            tokio::spawn(async move {
                                handler.session_lost(session_id, &reason).await
                            });
                        }
                        None => {
                            warn!("Gateway task channel closed");
                            break;
                        }
                    }
                }

                // Shutdown signal
                changed = channels.shutdown_rx.changed() => {
                    if changed.is_err() || *channels.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event processing");
                        break;
                    }
                }
            }
        }
    }
}
