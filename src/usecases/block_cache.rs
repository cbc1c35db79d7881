//! Content-addressed disk store of fixed-size media blocks.
//!
//! One file per block under `<root>/<file-id hex>/<index>.blk`, written
//! atomically (temp file + rename). An in-memory LRU index tracks which
//! blocks are present and their sizes; eviction keeps the on-disk total
//! under the configured byte cap. `get_or_fetch` is single-flight: one
//! producer per key, every concurrent caller shares its result.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use lru::LruCache;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, warn};

use crate::domain::{BlockKey, DomainError};

/// A short read on the same key this many times surfaces `CorruptCache`.
const MAX_SHORT_READS: u32 = 2;

struct Index {
    /// Present blocks and their byte sizes, most recently used first.
    entries: LruCache<BlockKey, u64>,
    total_bytes: u64,
}

/// Shared state of one in-flight block fetch. Waiters park on `notify`
/// until the producer task stores the outcome.
struct Flight {
    notify: Notify,
    outcome: OnceLock<Result<Bytes, DomainError>>,
}

impl Flight {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            outcome: OnceLock::new(),
        }
    }

    async fn wait(&self) -> Result<Bytes, DomainError> {
        loop {
            let mut notified = pin!(self.notify.notified());
            // Register before checking the outcome so a producer that
            // finishes between the check and the await cannot be missed.
            notified.as_mut().enable();
            if let Some(out) = self.outcome.get() {
                return out.clone();
            }
            notified.await;
        }
    }
}

/// Process-wide block cache. Created once at startup and passed into each
/// component as `Arc<BlockCache>`.
pub struct BlockCache {
    root: PathBuf,
    max_bytes: u64,
    index: RwLock<Index>,
    in_flight: Mutex<HashMap<BlockKey, Arc<Flight>>>,
    short_reads: Mutex<HashMap<BlockKey, u32>>,
}

impl BlockCache {
    /// Open the cache at `root`, rebuilding the index from blocks already
    /// on disk so restarts start warm.
    pub async fn open(root: impl Into<PathBuf>, max_bytes: u64) -> Result<Self, DomainError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| DomainError::Cache(format!("create cache root: {}", e)))?;

        let mut entries = LruCache::unbounded();
        let mut total_bytes = 0u64;

        let mut dirs = tokio::fs::read_dir(&root)
            .await
            .map_err(|e| DomainError::Cache(format!("scan cache root: {}", e)))?;
        while let Some(dir) = dirs
            .next_entry()
            .await
            .map_err(|e| DomainError::Cache(format!("scan cache root: {}", e)))?
        {
            let Some(file_id) = dir
                .file_name()
                .to_str()
                .and_then(|name| u64::from_str_radix(name, 16).ok())
                .map(|raw| raw as i64)
            else {
                continue; // not a block directory (e.g. avatars/)
            };
            let mut blocks = match tokio::fs::read_dir(dir.path()).await {
                Ok(blocks) => blocks,
                Err(_) => continue,
            };
            while let Some(block) = blocks
                .next_entry()
                .await
                .map_err(|e| DomainError::Cache(format!("scan cache dir: {}", e)))?
            {
                let name = block.file_name();
                let Some(index) = name
                    .to_str()
                    .and_then(|n| n.strip_suffix(".blk"))
                    .and_then(|n| n.parse::<u64>().ok())
                else {
                    continue;
                };
                let Ok(meta) = block.metadata().await else {
                    continue;
                };
                entries.push(BlockKey { file_id, index }, meta.len());
                total_bytes += meta.len();
            }
        }

        if entries.len() > 0 {
            debug!(
                blocks = entries.len(),
                total_bytes, "rebuilt block index from disk"
            );
        }

        Ok(Self {
            root,
            max_bytes,
            index: RwLock::new(Index {
                entries,
                total_bytes,
            }),
            in_flight: Mutex::new(HashMap::new()),
            short_reads: Mutex::new(HashMap::new()),
        })
    }

    fn block_path(&self, key: &BlockKey) -> PathBuf {
        self.root
            .join(format!("{:016x}", key.file_id as u64))
            .join(format!("{}.blk", key.index))
    }

    /// Look up one block. A block that reads back shorter than recorded is
    /// discarded (miss) once; the next short read on the same key is a
    /// `CorruptCache` error.
    pub async fn get(&self, key: BlockKey) -> Result<Option<Bytes>, DomainError> {
        let recorded = {
            let mut index = self.index.write().await;
            match index.entries.get(&key) {
                Some(len) => *len,
                None => return Ok(None),
            }
        };

        match tokio::fs::read(self.block_path(&key)).await {
            Ok(bytes) if (bytes.len() as u64) < recorded => {
                let strikes = {
                    let mut short_reads = self.short_reads.lock().await;
                    let strikes = short_reads.entry(key).or_insert(0);
                    *strikes += 1;
                    *strikes
                };
                warn!(
                    file_id = key.file_id,
                    index = key.index,
                    read = bytes.len(),
                    recorded,
                    strikes,
                    "short block read, discarding cached block"
                );
                self.remove(key).await;
                if strikes >= MAX_SHORT_READS {
                    return Err(DomainError::CorruptCache {
                        file_id: key.file_id,
                        index: key.index,
                    });
                }
                Ok(None)
            }
            Ok(bytes) => {
                self.short_reads.lock().await.remove(&key);
                Ok(Some(Bytes::from(bytes)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Index entry outlived its file (external cleanup); drop it.
                self.index.write().await.forget(&key);
                Ok(None)
            }
            Err(e) => Err(DomainError::Cache(format!("read block: {}", e))),
        }
    }

    /// Insert a block, evicting coldest entries first so the on-disk total
    /// stays under the byte cap. The write goes to a temp file and is
    /// renamed into place; one retry with a fresh temp file on failure.
    pub async fn put(&self, key: BlockKey, bytes: Bytes) -> Result<(), DomainError> {
        let len = bytes.len() as u64;
        self.make_room(len).await;

        if let Err(first) = self.write_block(&key, &bytes).await {
            debug!(
                file_id = key.file_id,
                index = key.index,
                error = %first,
                "block write failed, evicting and retrying"
            );
            self.evict_coldest_tenth().await;
            self.write_block(&key, &bytes)
                .await
                .map_err(|e| DomainError::Cache(format!("write block: {}", e)))?;
        }

        let mut index = self.index.write().await;
        if let Some((_, old_len)) = index.entries.push(key, len) {
            index.total_bytes = index.total_bytes.saturating_sub(old_len);
        }
        index.total_bytes += len;
        Ok(())
    }

    /// Fetch-through with single-flight: at most one producer runs per key
    /// and every concurrent caller observes its result. The producer runs
    /// in its own task, so cancelling a waiting caller never aborts the
    /// fetch; a completed fetch always lands in the cache.
    pub async fn get_or_fetch<F, Fut>(
        self: &Arc<Self>,
        key: BlockKey,
        producer: F,
    ) -> Result<Bytes, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Bytes, DomainError>> + Send + 'static,
    {
        if let Some(bytes) = self.get(key).await? {
            return Ok(bytes);
        }

        let flight = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&key) {
                Some(flight) => Arc::clone(flight),
                None => {
                    let flight = Arc::new(Flight::new());
                    in_flight.insert(key, Arc::clone(&flight));
                    let cache = Arc::clone(self);
                    let fetch = producer();
                    let task_flight = Arc::clone(&flight);
                    tokio::spawn(async move {
                        let outcome = match fetch.await {
                            Ok(bytes) => cache.put(key, bytes.clone()).await.map(|_| bytes),
                            Err(e) => Err(e),
                        };
                        let _ = task_flight.outcome.set(outcome);
                        cache.in_flight.lock().await.remove(&key);
                        task_flight.notify.notify_waiters();
                    });
                    flight
                }
            }
        };

        flight.wait().await
    }

    /// Total bytes currently accounted on disk.
    pub async fn total_bytes(&self) -> u64 {
        self.index.read().await.total_bytes
    }

    async fn remove(&self, key: BlockKey) {
        let path = self.block_path(&key);
        let mut index = self.index.write().await;
        index.forget(&key);
        let _ = tokio::fs::remove_file(path).await;
    }

    /// Evict coldest entries until `incoming` more bytes fit under the cap.
    async fn make_room(&self, incoming: u64) {
        let mut index = self.index.write().await;
        while index.total_bytes + incoming > self.max_bytes {
            let Some((cold, len)) = index.entries.pop_lru() else {
                break;
            };
            index.total_bytes = index.total_bytes.saturating_sub(len);
            let path = self.block_path(&cold);
            let _ = tokio::fs::remove_file(path).await;
            debug!(
                file_id = cold.file_id,
                index = cold.index,
                freed = len,
                "evicted block"
            );
        }
    }

    /// Drop the coldest tenth of the index, used when a write fails and
    /// the likely cause is disk pressure.
    async fn evict_coldest_tenth(&self) {
        let mut index = self.index.write().await;
        let victims = (index.entries.len() / 10).max(1);
        for _ in 0..victims {
            let Some((cold, len)) = index.entries.pop_lru() else {
                break;
            };
            index.total_bytes = index.total_bytes.saturating_sub(len);
            let _ = tokio::fs::remove_file(self.block_path(&cold)).await;
        }
    }

    async fn write_block(&self, key: &BlockKey, bytes: &Bytes) -> std::io::Result<()> {
        let path = self.block_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = path.with_extension("blk.tmp");
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, &path).await
    }
}

impl Index {
    fn forget(&mut self, key: &BlockKey) {
        if let Some(len) = self.entries.pop(key) {
            self.total_bytes = self.total_bytes.saturating_sub(len);
        }
    }
}
