//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these. `Clone` is required so a
//! single-flight block fetch can hand the same failure to every waiter.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DomainError {
    /// Bad client input: unknown message id, bad hash, malformed range.
    #[error("invalid input: {0}")]
    Input(String),

    /// Telegram RPC failed while fetching a block or resolving a message.
    #[error("Telegram gateway error: {0}")]
    Upstream(String),

    /// Local disk I/O in the block cache (already retried once).
    #[error("block cache error: {0}")]
    Cache(String),

    /// A cached non-tail block came back short twice in a row.
    #[error("corrupt cache entry for file {file_id} block {index}")]
    CorruptCache { file_id: i64, index: u64 },

    /// Media variant the extractor does not know how to stream.
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),

    /// Web player socket failure (write error, displaced session).
    #[error("player socket error: {0}")]
    Socket(String),

    /// Pass-through proxy refused or failed the upstream request.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// User-store persistence failure.
    #[error("user store error: {0}")]
    Store(String),

    /// Invalid or unreadable configuration (env vars or config file).
    #[error("configuration error: {0}")]
    Config(String),

    /// FloodWait: caller should retry after `seconds` seconds.
    #[error("FloodWait: retry after {seconds} seconds")]
    FloodWait { seconds: u64 },
}
