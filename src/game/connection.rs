//! The game-protocol connection seam.
//!
//! The bridge only needs four primitives from a game connection: connect,
//! disconnect, send a chat line, and a stream of chat packets. A successful
//! connect yields a [`GameLink`] split into a blocking [`PacketSource`] (owned
//! by the receive thread) and a shared [`ChatSink`] (used for sends and for
//! closing the socket).

use std::fmt;
use std::sync::Arc;

use crate::common::GameError;

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Who to log in as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
}

/// A raw chat packet as received from the game server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPacket {
    /// Chat component JSON.
    pub json_data: String,
    /// Display position (0 = chat, 1 = system, 2 = game info).
    pub position: u8,
}

/// Chat packet position for action-bar text, which is never relayed.
pub const POSITION_GAME_INFO: u8 = 2;

/// Blocking source of chat packets.
pub trait PacketSource: Send {
    /// Block until the next chat packet arrives.
    ///
    /// `Ok(None)` means the server closed the connection cleanly.
    fn next_chat(&mut self) -> Result<Option<ChatPacket>, GameError>;
}

/// Outbound half of a game connection.
pub trait ChatSink: Send + Sync {
    /// Send one chat line verbatim.
    fn send_chat(&self, text: &str) -> Result<(), GameError>;

    /// Close the socket. Unblocks a pending [`PacketSource::next_chat`].
    fn close(&self) -> std::io::Result<()>;
}

/// An established game connection.
pub struct GameLink {
    pub source: Box<dyn PacketSource>,
    pub sink: Arc<dyn ChatSink>,
}

/// Opens game connections.
///
/// `connect` blocks on network I/O and must not be called on the gateway
/// event loop directly.
pub trait GameConnector: Send + Sync + 'static {
    fn connect(
        &self,
        address: &ServerAddress,
        credentials: &Credentials,
    ) -> Result<GameLink, GameError>;
}
