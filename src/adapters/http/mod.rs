//! HTTP adapters: router, stream endpoint, player socket, proxy, API.

pub mod api;
pub mod proxy;
pub mod range;
pub mod server;
pub mod stream;
pub mod ws;

pub use server::{router, serve, AppState};
