//! Ingame Relay - Discord bridge for block-game server chat
//!
//! Logs a game account into a server and relays its chat to a Discord
//! channel, and messages from that channel back into the game.

mod bridge;
mod common;
mod config;
mod discord;
mod game;
mod protocol;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::signal;
use tracing::{debug, error, info, warn};

use bridge::session::DisconnectOutcome;
use bridge::{BridgeCoordinator, ChannelBundle};
use config::{env::get_config_path, load_and_validate};
use discord::DiscordBotBuilder;
use protocol::ProtocolConnector;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Ingame Relay v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    let address = config
        .server_address()
        .ok_or_else(|| anyhow!("invalid game server address '{}'", config.game.server))?;

    info!("Configuration loaded successfully");
    info!("  Game account: {}", config.game.username);
    info!("  Game server: {}", address);
    info!("  Destination channel: {}", config.discord.channel);
    match config.queue_capacity() {
        Some(capacity) => info!("  Relay queue: bounded at {} fragments", capacity),
        None => info!("  Relay queue: unbounded"),
    }

    let channels = ChannelBundle::new();

    let coordinator = Arc::new(
        BridgeCoordinator::new(
            Arc::new(ProtocolConnector::new()),
            address,
            config.credentials(),
            channels.game.tasks_tx,
        )
        .with_queue_capacity(config.queue_capacity()),
    );

    let discord_bot = DiscordBotBuilder::new(
        config.discord.clone(),
        Arc::clone(&coordinator),
        channels.gateway,
    )
    .build()
    .await?;

    info!("Starting Discord bot...");
    let mut discord_task = tokio::spawn(discord_bot.run());
    let shutdown_tx = channels.control.shutdown_tx;

    let shutdown = tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - closing the bridge...");
            true
        }
        _ = &mut discord_task => false,
    };

    match coordinator.disconnect().await {
        DisconnectOutcome::Disconnected => info!("Game session closed"),
        DisconnectOutcome::NotConnected => debug!("No game session to close"),
    }

    if shutdown {
        if let Err(e) = shutdown_tx.send(true) {
            debug!("Shutdown channel closed (Discord task already exited): {}", e);
        }
        let timeout = tokio::time::Duration::from_secs(5);
        match tokio::time::timeout(timeout, discord_task).await {
            Ok(Ok(())) => info!("Discord client stopped"),
            Ok(Err(e)) => warn!("Discord task panicked: {}", e),
            Err(_) => warn!("Discord shutdown timed out"),
        }
    }

    info!("Exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
