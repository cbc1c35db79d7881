//! Telegram adapters: gateway, media mapper, bot runner, session storage.

pub mod bot;
pub mod client;
pub mod mapper;
pub mod session;

pub use bot::BotRunner;
pub use client::GrammersMediaGateway;
pub use session::{connect_bot, BotConnection};
