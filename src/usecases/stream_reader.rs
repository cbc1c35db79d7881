//! Ordered byte source over a Telegram file location.
//!
//! Translates an inclusive byte range into aligned 1 MiB block fetches
//! through the block cache, keeps a small read-ahead window of prefetches
//! in flight, and emits bytes in strictly increasing offset order. Closing
//! the stream stops the reader at the next block boundary and abandons
//! pending prefetch waits; fetches already running complete into the cache.

use std::collections::VecDeque;
use std::sync::Arc;

use async_stream::try_stream;
use bytes::Bytes;
use futures_util::Stream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::{BlockKey, DomainError, FileDescriptor, LocationHandle, BLOCK_SIZE};
use crate::ports::TelegramGateway;
use crate::usecases::block_cache::BlockCache;

/// Blocks prefetched beyond the one currently being drained.
const READ_AHEAD: u64 = 2;

/// Byte-range reader for one file. Cheap to construct per request.
pub struct TelegramReader {
    gateway: Arc<dyn TelegramGateway>,
    cache: Arc<BlockCache>,
    file_id: i64,
    location: LocationHandle,
    content_length: u64,
}

/// Pending block fetches, front first. Dropping it aborts the waits (the
/// shared fetch itself keeps running and caches its result).
struct Prefetcher {
    queue: VecDeque<(u64, JoinHandle<Result<Bytes, DomainError>>)>,
}

impl Prefetcher {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    fn take(&mut self, index: u64) -> Option<JoinHandle<Result<Bytes, DomainError>>> {
        match self.queue.pop_front() {
            Some((i, handle)) if i == index => Some(handle),
            Some((i, handle)) => {
                // Out-of-order take would reorder delivery; put it back.
                self.queue.push_front((i, handle));
                None
            }
            None => None,
        }
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        for (_, handle) in &self.queue {
            handle.abort();
        }
    }
}

impl TelegramReader {
    pub fn new(
        gateway: Arc<dyn TelegramGateway>,
        cache: Arc<BlockCache>,
        descriptor: &FileDescriptor,
    ) -> Self {
        Self {
            gateway,
            cache,
            file_id: descriptor.id,
            location: descriptor.location.clone(),
            content_length: descriptor.size.max(0) as u64,
        }
    }

    /// Spawn the cache-backed fetch of one block. The producer issues the
    /// ranged download through the gateway; single-flight in the cache
    /// guarantees at most one upstream request per block.
    fn spawn_fetch(&self, index: u64) -> JoinHandle<Result<Bytes, DomainError>> {
        let key = BlockKey {
            file_id: self.file_id,
            index,
        };
        let cache = Arc::clone(&self.cache);
        let gateway = Arc::clone(&self.gateway);
        let location = self.location.clone();
        let offset = key.offset();
        let len = BLOCK_SIZE.min(self.content_length - offset);
        tokio::spawn(async move {
            cache
                .get_or_fetch(key, move || async move {
                    gateway.download_block(&location, offset, len).await
                })
                .await
        })
    }

    /// Stream the inclusive byte range `[start, end]`. The caller must
    /// have clamped the range to `[0, size - 1]` already.
    pub fn into_stream(
        self,
        start: u64,
        end: u64,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Bytes, DomainError>> {
        // An empty file or inverted range yields an immediately-finished
        // stream; iterating `first..=last` blindly would underflow.
        let blocks = if self.content_length > 0 && start <= end {
            Some((start / BLOCK_SIZE, end / BLOCK_SIZE))
        } else {
            None
        };
        try_stream! {
            if let Some((first_block, last_block)) = blocks {
                let mut prefetcher = Prefetcher::new();
                let mut next_spawn = first_block;

                for index in first_block..=last_block {
                    // Cancellation is observed at block boundaries.
                    if cancel.is_cancelled() {
                        break;
                    }

                    // Keep the window of queued fetches topped up.
                    let window_end = (index + READ_AHEAD).min(last_block);
                    while next_spawn <= window_end {
                        let handle = self.spawn_fetch(next_spawn);
                        prefetcher.queue.push_back((next_spawn, handle));
                        next_spawn += 1;
                    }

                    let handle = prefetcher
                        .take(index)
                        .ok_or_else(|| DomainError::Cache("prefetch queue out of order".into()))?;
                    let joined = tokio::select! {
                        _ = cancel.cancelled() => None,
                        joined = handle => Some(joined),
                    };
                    let Some(joined) = joined else {
                        break;
                    };
                    let joined = joined
                        .map_err(|e| DomainError::Upstream(format!("block fetch aborted: {}", e)))?;
                    let block = joined?;

                    let block_offset = index * BLOCK_SIZE;
                    let lo = if index == first_block {
                        (start - block_offset) as usize
                    } else {
                        0
                    };
                    let hi = if index == last_block {
                        (end - block_offset) as usize + 1
                    } else {
                        BLOCK_SIZE.min(self.content_length - block_offset) as usize
                    };
                    if block.len() < hi {
                        Err(DomainError::Upstream(format!(
                            "short block {} from upstream: {} < {}",
                            index,
                            block.len(),
                            hi
                        )))?;
                    }

                    yield block.slice(lo..hi);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Deterministic 2.5 MB file served straight from memory.
    struct MockGateway {
        data: Bytes,
        fetches: AtomicUsize,
        /// Optional per-fetch delay, to exercise cancellation.
        delay: Duration,
        /// Block index that fails with an upstream error, if any.
        poison_block: Option<u64>,
    }

    impl MockGateway {
        fn new(size: usize) -> Self {
            let data: Vec<u8> = (0..size).map(|i| ((i * 31 + 7) % 256) as u8).collect();
            Self {
                data: Bytes::from(data),
                fetches: AtomicUsize::new(0),
                delay: Duration::ZERO,
                poison_block: None,
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TelegramGateway for MockGateway {
        async fn resolve_media(&self, _message_id: i32) -> Result<FileDescriptor, DomainError> {
            Err(DomainError::Input("not used in reader tests".into()))
        }

        async fn download_block(
            &self,
            _location: &LocationHandle,
            offset: u64,
            len: u64,
        ) -> Result<Bytes, DomainError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.poison_block == Some(offset / BLOCK_SIZE) {
                return Err(DomainError::Upstream("FILE_REFERENCE_EXPIRED".into()));
            }
            let start = offset as usize;
            let end = (offset + len).min(self.data.len() as u64) as usize;
            Ok(self.data.slice(start..end))
        }

        async fn download_avatar(&self, _chat_id: i64) -> Result<Option<Bytes>, DomainError> {
            Ok(None)
        }
    }

    fn descriptor(size: i64) -> FileDescriptor {
        FileDescriptor {
            id: 77,
            chat_id: 42,
            location: LocationHandle(vec![1, 2, 3]),
            size,
            name: "clip.mp4".into(),
            mime: "video/mp4".into(),
            width: 0,
            height: 0,
            duration: 0.0,
            title: String::new(),
            performer: String::new(),
            is_voice: false,
            is_animation: false,
            external_url: None,
        }
    }

    async fn collect(
        stream: impl Stream<Item = Result<Bytes, DomainError>>,
    ) -> Result<Vec<u8>, DomainError> {
        let mut out = Vec::new();
        let mut stream = std::pin::pin!(stream);
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    const SIZE: usize = 2_500_000;

    #[tokio::test]
    async fn full_read_matches_source_and_fetches_each_block_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(BlockCache::open(dir.path(), u64::MAX).await.unwrap());
        let gateway = Arc::new(MockGateway::new(SIZE));

        let reader = TelegramReader::new(gateway.clone(), cache, &descriptor(SIZE as i64));
        let body = collect(reader.into_stream(0, SIZE as u64 - 1, CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(body.len(), SIZE);
        assert_eq!(body, gateway.data.to_vec());
        // Blocks 0..=2, one upstream fetch each despite read-ahead.
        assert_eq!(gateway.fetches(), 3);
    }

    #[tokio::test]
    async fn range_crossing_block_boundary_is_sliced_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(BlockCache::open(dir.path(), u64::MAX).await.unwrap());
        let gateway = Arc::new(MockGateway::new(SIZE));

        let start = BLOCK_SIZE - 500;
        let end = BLOCK_SIZE + 499;
        let reader = TelegramReader::new(gateway.clone(), cache, &descriptor(SIZE as i64));
        let body = collect(reader.into_stream(start, end, CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(body.len(), 1000);
        assert_eq!(body, &gateway.data[start as usize..=end as usize]);
        assert_eq!(gateway.fetches(), 2);
    }

    #[tokio::test]
    async fn suffix_range_fetches_only_the_tail_block() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(BlockCache::open(dir.path(), u64::MAX).await.unwrap());
        let gateway = Arc::new(MockGateway::new(SIZE));

        let start = SIZE as u64 - 500;
        let end = SIZE as u64 - 1;
        let reader = TelegramReader::new(gateway.clone(), cache, &descriptor(SIZE as i64));
        let body = collect(reader.into_stream(start, end, CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(body, &gateway.data[start as usize..]);
        assert_eq!(gateway.fetches(), 1);
    }

    #[tokio::test]
    async fn second_pass_serves_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(BlockCache::open(dir.path(), u64::MAX).await.unwrap());
        let gateway = Arc::new(MockGateway::new(SIZE));

        let reader = TelegramReader::new(gateway.clone(), cache.clone(), &descriptor(SIZE as i64));
        let first = collect(reader.into_stream(0, SIZE as u64 - 1, CancellationToken::new()))
            .await
            .unwrap();
        let fetched = gateway.fetches();

        let reader = TelegramReader::new(gateway.clone(), cache, &descriptor(SIZE as i64));
        let second = collect(reader.into_stream(0, SIZE as u64 - 1, CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(gateway.fetches(), fetched, "cache hit must not refetch");
    }

    #[tokio::test]
    async fn upstream_failure_surfaces_after_earlier_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(BlockCache::open(dir.path(), u64::MAX).await.unwrap());
        let mut gateway = MockGateway::new(SIZE);
        gateway.poison_block = Some(1);
        let gateway = Arc::new(gateway);

        let reader = TelegramReader::new(gateway.clone(), cache, &descriptor(SIZE as i64));
        let mut stream =
            std::pin::pin!(reader.into_stream(0, SIZE as u64 - 1, CancellationToken::new()));

        let mut delivered = 0usize;
        let mut saw_error = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => delivered += chunk.len(),
                Err(e) => {
                    assert!(matches!(e, DomainError::Upstream(_)), "{e:?}");
                    saw_error = true;
                    break;
                }
            }
        }
        assert!(saw_error);
        // Block 0 made it out before the failure on block 1.
        assert_eq!(delivered, BLOCK_SIZE as usize);
    }

    #[tokio::test]
    async fn cancellation_stops_at_a_block_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(BlockCache::open(dir.path(), u64::MAX).await.unwrap());
        let mut gateway = MockGateway::new(SIZE);
        gateway.delay = Duration::from_millis(20);
        let gateway = Arc::new(gateway);

        let cancel = CancellationToken::new();
        let reader = TelegramReader::new(gateway.clone(), cache, &descriptor(SIZE as i64));
        let mut stream = std::pin::pin!(reader.into_stream(0, SIZE as u64 - 1, cancel.clone()));

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.len(), BLOCK_SIZE as usize);

        cancel.cancel();
        let mut rest = 0usize;
        while let Some(item) = stream.next().await {
            rest += item.unwrap().len();
        }
        // At most the block already in flight is delivered after cancel.
        assert!(rest <= BLOCK_SIZE as usize, "delivered {rest} after cancel");
    }
}
