//! Discord bot integration.
//!
//! This module provides the gateway edge of the bridge: the bot client and
//! event loop, relay handling and the command surface.

pub mod client;
pub mod commands;
pub mod handler;

pub use client::DiscordBotBuilder;
