//! Game-world side of the bridge.
//!
//! This module contains:
//! - The connection seam the bridge drives (`connection`)
//! - The session adapter that feeds the relay queue (`adapter`)
//! - Chat component text extraction (`parser`)

pub mod adapter;
pub mod connection;
pub mod parser;

