//! Implements UserStore using a JSON file.
//!
//! Tracks the set of chat ids allowed to open the web player.

use crate::domain::DomainError;
use crate::ports::UserStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserData {
    authorized: BTreeSet<i64>,
}

/// JSON file-based user store. The admin chat is always authorized.
pub struct UsersJson {
    path: std::path::PathBuf,
    admin_chat_id: Option<i64>,
    cache: tokio::sync::RwLock<UserData>,
}

impl UsersJson {
    pub fn new(path: impl AsRef<Path>, admin_chat_id: Option<i64>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            admin_chat_id,
            cache: tokio::sync::RwLock::new(UserData::default()),
        }
    }

    /// Load the authorized set from disk. Call after construction.
    pub async fn load(&self) -> Result<(), DomainError> {
        let data = match fs::read_to_string(&self.path).await {
            Ok(s) => serde_json::from_str(&s).unwrap_or_default(),
            Err(_) => UserData::default(),
        };
        *self.cache.write().await = data;
        Ok(())
    }

    /// Atomic save using the write-replace pattern: write to a temp file,
    /// flush, rename over the target. A crash mid-write leaves the old
    /// file intact.
    async fn save(&self) -> Result<(), DomainError> {
        let data = self.cache.read().await;
        let json =
            serde_json::to_string_pretty(&*data).map_err(|e| DomainError::Store(e.to_string()))?;

        let temp_path = self.path.with_extension("json.tmp");
        let mut f = fs::File::create(&temp_path)
            .await
            .map_err(|e| DomainError::Store(format!("create temp file: {}", e)))?;
        f.write_all(json.as_bytes())
            .await
            .map_err(|e| DomainError::Store(format!("write temp file: {}", e)))?;
        f.sync_all()
            .await
            .map_err(|e| DomainError::Store(format!("sync temp file: {}", e)))?;
        drop(f);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| DomainError::Store(format!("atomic rename failed: {}", e)))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl UserStore for UsersJson {
    async fn is_authorized(&self, chat_id: i64) -> Result<bool, DomainError> {
        if self.admin_chat_id == Some(chat_id) {
            return Ok(true);
        }
        Ok(self.cache.read().await.authorized.contains(&chat_id))
    }

    async fn authorize(&self, chat_id: i64) -> Result<(), DomainError> {
        {
            let mut cache = self.cache.write().await;
            if !cache.authorized.insert(chat_id) {
                return Ok(());
            }
        }
        self.save().await
    }

    async fn revoke(&self, chat_id: i64) -> Result<(), DomainError> {
        {
            let mut cache = self.cache.write().await;
            if !cache.authorized.remove(&chat_id) {
                return Ok(());
            }
        }
        self.save().await
    }

    async fn list(&self) -> Result<Vec<i64>, DomainError> {
        Ok(self.cache.read().await.authorized.iter().copied().collect())
    }
}
