//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters.

use bytes::Bytes;

use crate::domain::{DomainError, FileDescriptor, LocationHandle};

/// Telegram API gateway. Resolve messages to file descriptors and fetch
/// byte ranges from file locations.
#[async_trait::async_trait]
pub trait TelegramGateway: Send + Sync {
    /// Fetch the message with the given id and extract its media
    /// descriptor. Fails with `Input` when the message does not exist and
    /// `UnsupportedMedia` when its media variant cannot be streamed.
    async fn resolve_media(&self, message_id: i32) -> Result<FileDescriptor, DomainError>;

    /// Download exactly `[offset, offset+len)` from the file location.
    /// The returned buffer may be shorter only when the range crosses the
    /// end of the file.
    async fn download_block(
        &self,
        location: &LocationHandle,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, DomainError>;

    /// Fetch the chat's current profile photo, smallest size. `None` when
    /// the peer has no photo or is not cached yet.
    async fn download_avatar(&self, chat_id: i64) -> Result<Option<Bytes>, DomainError>;
}

/// Authorized-user store. Chat ids allowed to open the player.
#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    async fn is_authorized(&self, chat_id: i64) -> Result<bool, DomainError>;

    async fn authorize(&self, chat_id: i64) -> Result<(), DomainError>;

    async fn revoke(&self, chat_id: i64) -> Result<(), DomainError>;

    /// All authorized chat ids, unordered.
    async fn list(&self) -> Result<Vec<i64>, DomainError>;
}
