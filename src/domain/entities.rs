//! Domain entities. Pure data structures for the core business.
//!
//! No Telegram/IO types here — these are mapped from adapters.

use serde::{Deserialize, Serialize};

/// Fixed block size for caching and ranged downloads: 1 MiB, aligned to
/// Telegram's chunk size. Every block except possibly the last one has
/// exactly this many bytes.
pub const BLOCK_SIZE: u64 = 1024 * 1024;

/// Opaque Telegram file location. The adapter knows how to turn it back
/// into an input location for ranged downloads; the core only requires
/// that it round-trips through bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationHandle(pub Vec<u8>);

/// Everything the bridge needs to stream one media file. Immutable once
/// extracted from a Telegram message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub id: i64,
    /// Chat the message carrying this media lives in; pairs stream
    /// connections with the player session they serve.
    pub chat_id: i64,
    pub location: LocationHandle,
    pub size: i64,
    pub name: String,
    pub mime: String,
    pub width: i32,
    pub height: i32,
    pub duration: f64,
    pub title: String,
    pub performer: String,
    pub is_voice: bool,
    pub is_animation: bool,
    /// Set when the descriptor points at a non-Telegram URL extracted from
    /// message entities; streamed through the pass-through proxy instead of
    /// the block cache.
    pub external_url: Option<String>,
}

impl FileDescriptor {
    pub fn is_external(&self) -> bool {
        self.external_url.is_some()
    }
}

/// Cache key of one fixed-size block: `index = offset / BLOCK_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub file_id: i64,
    pub index: u64,
}

impl BlockKey {
    /// Absolute offset of the first byte of this block.
    pub fn offset(&self) -> u64 {
        self.index * BLOCK_SIZE
    }
}

/// "Play this now" push sent to the browser. All fields travel as strings,
/// matching what the player page expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaEvent {
    pub url: String,
    pub file_name: String,
    pub file_id: String,
    pub mime_type: String,
    pub duration: String,
    pub width: String,
    pub height: String,
    pub title: String,
    pub performer: String,
    pub is_voice: String,
    pub is_animation: String,
}

impl MediaEvent {
    /// Build the wire event for a descriptor served at `url`.
    pub fn new(url: String, fd: &FileDescriptor) -> Self {
        Self {
            url,
            file_name: fd.name.clone(),
            file_id: fd.id.to_string(),
            mime_type: fd.mime.clone(),
            duration: fd.duration.to_string(),
            width: fd.width.to_string(),
            height: fd.height.to_string(),
            title: fd.title.clone(),
            performer: fd.performer.clone(),
            is_voice: fd.is_voice.to_string(),
            is_animation: fd.is_animation.to_string(),
        }
    }
}

/// Playback command pushed to the browser, either from an inline button or
/// relayed between sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    TogglePlayPause,
    Restart,
    /// Relative seek in seconds; negative rewinds.
    Seek(i64),
    ToggleFullscreen,
}

impl PlayerCommand {
    /// Wire name of the command (`ControlCommand.command`).
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::TogglePlayPause => "togglePlayPause",
            Self::Restart => "restart",
            Self::Seek(_) => "seek",
            Self::ToggleFullscreen => "toggleFullscreen",
        }
    }

    /// Wire value: seek offset in seconds, null for everything else.
    pub fn wire_value(&self) -> Option<i64> {
        match self {
            Self::Seek(secs) => Some(*secs),
            _ => None,
        }
    }

    /// Short user-facing confirmation shown as the callback answer.
    pub fn ack_text(&self) -> String {
        match self {
            Self::TogglePlayPause => "Playback toggled".into(),
            Self::Restart => "Playback restarted".into(),
            Self::Seek(s) if *s >= 0 => format!("Forwarded {} seconds", s),
            Self::Seek(s) => format!("Rewound {} seconds", -s),
            Self::ToggleFullscreen => "Fullscreen toggled".into(),
        }
    }
}

/// One inline button on the bot's reply: label plus callback payload, or a
/// plain URL button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlButton {
    Callback { label: String, data: String },
    Url { label: String, url: String },
}

/// Aggregated live-streaming stats for one chat, exposed over the API.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub active_connections: usize,
    pub bytes_served: u64,
    /// Unix seconds of the oldest still-open connection, if any.
    pub oldest_started_at: Option<u64>,
}
