//! Packet ids for protocol version 340.

/// Protocol version sent in the handshake.
pub const PROTOCOL_VERSION: i32 = 340;

/// Handshake `next state` value for logging in.
pub const NEXT_STATE_LOGIN: i32 = 2;

// ============================================================================
// Handshaking / Login
// ============================================================================

/// Client -> Server: Handshake
pub const HANDSHAKE: i32 = 0x00;
/// Client -> Server: Login Start
pub const LOGIN_START: i32 = 0x00;

/// Server -> Client: Login Disconnect
pub const LOGIN_DISCONNECT: i32 = 0x00;
/// Server -> Client: Encryption Request
pub const ENCRYPTION_REQUEST: i32 = 0x01;
/// Server -> Client: Login Success
pub const LOGIN_SUCCESS: i32 = 0x02;
/// Server -> Client: Set Compression
pub const SET_COMPRESSION: i32 = 0x03;

// ============================================================================
// Play
// ============================================================================

pub const CLIENTBOUND_CHAT_MESSAGE: i32 = 0x0F;
pub const CLIENTBOUND_DISCONNECT: i32 = 0x1A;
pub const CLIENTBOUND_KEEP_ALIVE: i32 = 0x1F;

pub const SERVERBOUND_CHAT_MESSAGE: i32 = 0x02;
pub const SERVERBOUND_KEEP_ALIVE: i32 = 0x0B;

/// Longest chat line the server accepts, in UTF-16 code units.
pub const MAX_CHAT_LENGTH: usize = 256;
