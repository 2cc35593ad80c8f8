//! The bridge core.
//!
//! ## Module Structure
//!
//! - `queue`: relay queue between the game session and the drain loop
//! - `drain`: rate-limited drain loop
//! - `session`: single-session lifecycle (`BridgeCoordinator`)
//! - `channels`: hand-off channels between the game threads and the gateway loop

pub mod channels;
pub mod drain;
pub mod queue;
pub mod session;

pub use channels::ChannelBundle;
pub use session::BridgeCoordinator;
