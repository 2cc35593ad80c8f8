//! Built-in game protocol client.
//!
//! Offline-mode only: logs in with a username, answers keep-alives and
//! surfaces chat packets. It plugs into the bridge through
//! [`crate::game::connection::GameConnector`].

pub mod client;
pub mod packets;

pub use client::ProtocolConnector;
