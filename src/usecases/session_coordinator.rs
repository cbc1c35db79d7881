//! Glue between bot media events, URL signing and the web player.
//!
//! On each media message: resolve the descriptor, sign the stream URL
//! (wrapping external URLs in the pass-through proxy), push the media
//! event to the chat's socket and hand the bot adapter the inline buttons
//! for its reply. Button presses come back through `control`.

use std::sync::Arc;

use tracing::info;

use crate::domain::{
    descriptor_hash, ControlButton, DomainError, FileDescriptor, MediaEvent, PlayerCommand,
};
use crate::usecases::metadata::MetadataCache;
use crate::usecases::player_registry::PlayerRegistry;

/// Status answered when a button is pressed with no live browser.
pub const NOT_CONNECTED: &str = "Web player not connected";

/// Everything the bot adapter needs to reply to a media message.
#[derive(Debug, Clone)]
pub struct MediaAnnouncement {
    /// URL the browser loads; already proxy-wrapped for external media.
    pub url: String,
    pub descriptor: FileDescriptor,
    /// Whether a live socket received the push.
    pub pushed: bool,
    /// Inline button rows for the reply.
    pub buttons: Vec<Vec<ControlButton>>,
}

/// Parsed payload of an inline button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Resend(i32),
    Command(PlayerCommand),
}

pub struct SessionCoordinator {
    metadata: Arc<MetadataCache>,
    registry: Arc<PlayerRegistry>,
    base_url: String,
    hash_length: usize,
}

impl SessionCoordinator {
    pub fn new(
        metadata: Arc<MetadataCache>,
        registry: Arc<PlayerRegistry>,
        base_url: String,
        hash_length: usize,
    ) -> Self {
        Self {
            metadata,
            registry,
            base_url: base_url.trim_end_matches('/').to_string(),
            hash_length,
        }
    }

    /// Handle one media message: sign, push, build the reply buttons.
    pub async fn announce_media(
        &self,
        chat_id: i64,
        message_id: i32,
    ) -> Result<MediaAnnouncement, DomainError> {
        let descriptor = self.metadata.descriptor(message_id).await?;
        let url = self.stream_url(message_id, &descriptor);
        let event = MediaEvent::new(url.clone(), &descriptor);
        let pushed = self.registry.publish_media(chat_id, &event).await?;
        info!(
            chat_id,
            message_id,
            file = %descriptor.name,
            pushed,
            "announced media to player"
        );
        Ok(MediaAnnouncement {
            buttons: self.control_buttons(message_id, &url),
            url,
            descriptor,
            pushed,
        })
    }

    /// Re-push the media event for an already-announced message.
    pub async fn resend(&self, chat_id: i64, message_id: i32) -> Result<String, DomainError> {
        let descriptor = self.metadata.descriptor(message_id).await?;
        let url = self.stream_url(message_id, &descriptor);
        let event = MediaEvent::new(url, &descriptor);
        if self.registry.publish_media(chat_id, &event).await? {
            Ok("Sent to player".to_string())
        } else {
            Ok(NOT_CONNECTED.to_string())
        }
    }

    /// Publish a playback command; the returned text is the callback
    /// answer shown to the user.
    pub async fn control(
        &self,
        chat_id: i64,
        command: PlayerCommand,
    ) -> Result<String, DomainError> {
        if self.registry.publish_control(chat_id, command).await? {
            Ok(command.ack_text())
        } else {
            Ok(NOT_CONNECTED.to_string())
        }
    }

    /// Player page URL for a chat, handed out on /start.
    pub fn player_url(&self, chat_id: i64) -> String {
        format!("{}/{}", self.base_url, chat_id)
    }

    fn stream_url(&self, message_id: i32, descriptor: &FileDescriptor) -> String {
        match &descriptor.external_url {
            Some(target) => {
                let escaped: String =
                    url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
                format!("{}/proxy?url={}", self.base_url, escaped)
            }
            None => format!(
                "{}/{}/{}",
                self.base_url,
                message_id,
                descriptor_hash(descriptor, self.hash_length)
            ),
        }
    }

    /// The base URL only resolves on this machine; a `Stream URL` button
    /// would be useless on the user's phone.
    fn is_loopback_base(&self) -> bool {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .is_some_and(|host| {
                host == "localhost" || host == "127.0.0.1" || host == "::1" || host == "[::1]"
            })
    }

    fn control_buttons(&self, message_id: i32, stream_url: &str) -> Vec<Vec<ControlButton>> {
        let mut rows = vec![vec![ControlButton::Callback {
            label: "Resend to Player".into(),
            data: format!("resend:{}", message_id),
        }]];
        if !self.is_loopback_base() {
            rows.push(vec![ControlButton::Url {
                label: "Stream URL".into(),
                url: stream_url.to_string(),
            }]);
        }
        rows.push(vec![ControlButton::Callback {
            label: "Toggle Fullscreen".into(),
            data: "fullscreen".into(),
        }]);
        rows.push(vec![
            ControlButton::Callback {
                label: "▶️/⏸️".into(),
                data: "playpause".into(),
            },
            ControlButton::Callback {
                label: "🔄".into(),
                data: "restart".into(),
            },
        ]);
        rows.push(vec![
            ControlButton::Callback {
                label: "⏪ 10s".into(),
                data: "seek:-10".into(),
            },
            ControlButton::Callback {
                label: "⏩ 10s".into(),
                data: "seek:10".into(),
            },
        ]);
        rows
    }
}

/// Parse an inline button payload back into an action.
pub fn parse_callback(data: &str) -> Option<CallbackAction> {
    if let Some(id) = data.strip_prefix("resend:") {
        return id.parse().ok().map(CallbackAction::Resend);
    }
    match data {
        "playpause" => Some(CallbackAction::Command(PlayerCommand::TogglePlayPause)),
        "restart" => Some(CallbackAction::Command(PlayerCommand::Restart)),
        "fullscreen" => Some(CallbackAction::Command(PlayerCommand::ToggleFullscreen)),
        _ => data
            .strip_prefix("seek:")
            .and_then(|secs| secs.parse().ok())
            .map(|secs| CallbackAction::Command(PlayerCommand::Seek(secs))),
    }
}
