//! Shared types for the Societas realtime client and anything that speaks its protocol.

pub mod error;
pub mod protocol;

pub use error::*;
pub use protocol::*;
