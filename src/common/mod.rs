//! Common utilities and types shared across the application.

pub mod error;
pub mod messages;

pub use error::{BridgeError, BridgeResult, DeliveryError, GameError};
pub use messages::{ChatFragment, DrainBatch, GatewayTask};
