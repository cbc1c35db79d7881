//! Application configuration. API credentials, base URL, cache bounds.

use serde::Deserialize;

use crate::domain::DomainError;

/// Default byte cap for the on-disk block cache: 10 GiB.
pub const DEFAULT_CACHE_MAX_BYTES: u64 = 10 * 1024 * 1024 * 1024;

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    pub api_id: Option<i32>,
    pub api_hash: Option<String>,
    pub bot_token: Option<String>,
    /// Public base URL browsers reach the bridge at, e.g. `https://bridge.example.org`.
    pub base_url: Option<String>,
    pub port: Option<u16>,
    /// Chat id that is always authorized and receives registration notices.
    pub admin_chat_id: Option<i64>,
    pub users_path: Option<String>,
    pub session_path: Option<String>,
    /// HTML template for the player page; `{{chatId}}` and `{{wsUrl}}` are substituted.
    pub player_template_path: Option<String>,
    /// Hex characters in stream-URL hashes. Raising it only invalidates old URLs.
    #[serde(default)]
    pub hash_length: Option<usize>,
    pub cache_root: Option<String>,
    /// On-disk block cache byte cap. Read from TG_BRIDGE_CACHE_MAX_BYTES.
    #[serde(default)]
    pub cache_max_bytes: Option<u64>,
    /// Streaming connections idle longer than this are pruned. Default 300.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// How often the connection tracker sweeps for idle records. Default 60.
    #[serde(default)]
    pub cleanup_interval_secs: Option<u64>,
    /// Optional channel that receives a copy of every bridged media message.
    #[serde(default)]
    pub log_channel_id: Option<i64>,
    #[serde(default)]
    pub debug: Option<bool>,
}

impl AppConfig {
    /// Load from the environment (TG_BRIDGE_ prefix) plus the optional
    /// file named by TG_BRIDGE_CONFIG. A malformed file or an env var
    /// that fails to parse is an error, not a silent default.
    pub fn load() -> Result<Self, DomainError> {
        dotenv::dotenv().ok();
        let mut c = config::Config::builder();
        c = c.add_source(config::Environment::with_prefix("TG_BRIDGE"));
        if let Ok(path) = std::env::var("TG_BRIDGE_CONFIG") {
            c = c.add_source(config::File::with_name(&path));
        }
        c.build()
            .and_then(|built| built.try_deserialize())
            .map_err(|e| DomainError::Config(e.to_string()))
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(8080)
    }

    /// Base URL without a trailing slash. Defaults to the loopback address
    /// on the configured port, which suppresses the `Stream URL` button.
    pub fn base_url_or_default(&self) -> String {
        let raw = self
            .base_url
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", self.port_or_default()));
        raw.trim_end_matches('/').to_string()
    }

    pub fn hash_length_or_default(&self) -> usize {
        self.hash_length
            .unwrap_or(crate::domain::DEFAULT_HASH_LENGTH)
    }

    pub fn cache_root_or_default(&self) -> String {
        self.cache_root
            .clone()
            .unwrap_or_else(|| "./cache".to_string())
    }

    pub fn cache_max_bytes_or_default(&self) -> u64 {
        self.cache_max_bytes.unwrap_or(DEFAULT_CACHE_MAX_BYTES)
    }

    pub fn idle_timeout_or_default(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_timeout_secs.unwrap_or(300))
    }

    pub fn cleanup_interval_or_default(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleanup_interval_secs.unwrap_or(60))
    }
}
