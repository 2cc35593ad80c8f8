//! Error types for the application.

use thiserror::Error;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Errors raised by the game-side connection.
///
/// The `Display` text of `AuthFailure` and `ConnectFailure` is only the
/// provider's reason; the command layer adds its own prefix.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GameError {
    /// The server refused the login.
    #[error("{0}")]
    AuthFailure(String),

    /// The server could not be reached.
    #[error("{0}")]
    ConnectFailure(String),

    /// A chat message could not be written to the game connection.
    #[error("{0}")]
    SendFailure(String),

    /// The established connection went away without being asked to.
    #[error("{0}")]
    ConnectionLost(String),
}

/// Errors from the bridge lifecycle and relay paths.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("a bridge session is already connecting or active")]
    AlreadyActive,

    #[error("no bridge session is active")]
    NotActive,

    #[error(transparent)]
    Game(#[from] GameError),

    /// A worker thread or blocking task could not be started or joined.
    #[error("worker failure: {0}")]
    Worker(String),
}

/// Gateway-side delivery failures. Terminal for the batch concerned.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("rate limited")]
    RateLimited,

    #[error("destination channel {channel_id} not found")]
    NotFound { channel_id: u64 },

    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Framing and decoding errors of the built-in game-protocol client.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("VarInt is too long")]
    VarIntTooLong,

    #[error("Packet too short: need {needed} bytes, got {got}")]
    PacketTooShort { needed: usize, got: usize },

    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Compressed frame declared {declared} bytes but inflated to {actual}")]
    DataLengthMismatch { declared: usize, actual: usize },

    #[error("Invalid string encoding: {message}")]
    InvalidString { message: String },

    #[error("Unexpected packet 0x{id:02X} during {phase}")]
    UnexpectedPacket { id: i32, phase: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
