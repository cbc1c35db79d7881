//! Short-TTL cache of message-id → file descriptor.
//!
//! Saves the `messages.getMessages` round-trip on every range request the
//! browser issues while seeking. Keys carry the bot id so descriptors from
//! different bot sessions never collide.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{DomainError, FileDescriptor};
use crate::ports::TelegramGateway;

/// How long extracted descriptors stay valid.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

pub struct MetadataCache {
    gateway: Arc<dyn TelegramGateway>,
    bot_id: i64,
    ttl: Duration,
    entries: RwLock<HashMap<String, (FileDescriptor, Instant)>>,
}

impl MetadataCache {
    pub fn new(gateway: Arc<dyn TelegramGateway>, bot_id: i64) -> Self {
        Self::with_ttl(gateway, bot_id, DEFAULT_TTL)
    }

    pub fn with_ttl(gateway: Arc<dyn TelegramGateway>, bot_id: i64, ttl: Duration) -> Self {
        Self {
            gateway,
            bot_id,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn key(&self, message_id: i32) -> String {
        format!("file:{}:{}", message_id, self.bot_id)
    }

    /// Resolve the descriptor for a message, from cache when fresh.
    pub async fn descriptor(&self, message_id: i32) -> Result<FileDescriptor, DomainError> {
        let key = self.key(message_id);
        {
            let entries = self.entries.read().await;
            if let Some((descriptor, stored_at)) = entries.get(&key) {
                if stored_at.elapsed() < self.ttl {
                    return Ok(descriptor.clone());
                }
            }
        }

        let descriptor = self.gateway.resolve_media(message_id).await?;
        debug!(
            message_id,
            file_id = descriptor.id,
            mime = %descriptor.mime,
            size = descriptor.size,
            "resolved media descriptor"
        );

        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, stored_at)| stored_at.elapsed() < self.ttl);
        entries.insert(key, (descriptor.clone(), Instant::now()));
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LocationHandle;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGateway {
        resolves: AtomicUsize,
    }

    #[async_trait]
    impl TelegramGateway for CountingGateway {
        async fn resolve_media(&self, message_id: i32) -> Result<FileDescriptor, DomainError> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            Ok(FileDescriptor {
                id: message_id as i64 * 10,
                chat_id: 42,
                location: LocationHandle(vec![0]),
                size: 1,
                name: "f".into(),
                mime: "video/mp4".into(),
                width: 0,
                height: 0,
                duration: 0.0,
                title: String::new(),
                performer: String::new(),
                is_voice: false,
                is_animation: false,
                external_url: None,
            })
        }

        async fn download_block(
            &self,
            _location: &LocationHandle,
            _offset: u64,
            _len: u64,
        ) -> Result<Bytes, DomainError> {
            Err(DomainError::Upstream("not used".into()))
        }

        async fn download_avatar(&self, _chat_id: i64) -> Result<Option<Bytes>, DomainError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn fresh_entries_skip_the_gateway() {
        let gateway = Arc::new(CountingGateway {
            resolves: AtomicUsize::new(0),
        });
        let cache = MetadataCache::new(gateway.clone(), 1);

        let a = cache.descriptor(5).await.unwrap();
        let b = cache.descriptor(5).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(gateway.resolves.load(Ordering::SeqCst), 1);

        cache.descriptor(6).await.unwrap();
        assert_eq!(gateway.resolves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_resolved_again() {
        let gateway = Arc::new(CountingGateway {
            resolves: AtomicUsize::new(0),
        });
        let cache = MetadataCache::with_ttl(gateway.clone(), 1, Duration::from_secs(10));

        cache.descriptor(5).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        cache.descriptor(5).await.unwrap();
        assert_eq!(gateway.resolves.load(Ordering::SeqCst), 2);
    }
}
