//! Port traits. API boundaries for the hexagon.
//!
//! The bot runner and HTTP server are inbound adapters calling straight
//! into the use cases; only outbound boundaries need traits here.

pub mod outbound;

pub use outbound::{TelegramGateway, UserStore};
