//! Per-chat registry of live web-player sockets.
//!
//! At most one socket per chat: a second upgrade displaces the first. The
//! registry never touches the network itself; each session is represented
//! by the sending half of a bounded queue drained by a single writer task
//! (one writer per socket keeps frame order and rules out interleaved
//! writes). Publishing is FIFO per chat, so a media event followed by a
//! control command arrives in that order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::domain::{DomainError, MediaEvent, PlayerCommand};

/// Outbound queue depth per socket. Slow browsers exert backpressure on
/// publishers instead of buffering unbounded frames.
pub const OUTBOUND_QUEUE: usize = 32;

/// Frame handed to the per-socket writer task. The registry publishes
/// text; binary only occurs when the socket echoes a client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

#[derive(Serialize)]
struct ControlFrame<'a> {
    command: &'a str,
    value: Option<i64>,
}

struct Session {
    id: u64,
    tx: mpsc::Sender<OutboundFrame>,
}

#[derive(Default)]
pub struct PlayerRegistry {
    sessions: Mutex<HashMap<i64, Session>>,
    next_id: AtomicU64,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new socket for the chat, displacing any previous one, and
    /// queue the in-band connected marker. Returns the session id the
    /// socket's teardown must present to `deregister`.
    pub async fn register(&self, chat_id: i64, tx: mpsc::Sender<OutboundFrame>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = tx
            .send(OutboundFrame::Text(r#"{"type":"connected"}"#.to_string()))
            .await;

        let displaced = {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(chat_id, Session { id, tx })
        };
        if let Some(old) = displaced {
            // Best effort: close the displaced socket; dropping the sender
            // ends its writer task either way.
            let _ = old.tx.try_send(OutboundFrame::Close);
            info!(chat_id, old_session = old.id, new_session = id, "player displaced");
        } else {
            info!(chat_id, session = id, "player connected");
        }
        id
    }

    /// Remove the session, but only while it still owns the chat's slot —
    /// a displaced socket's teardown must not evict its successor.
    pub async fn deregister(&self, chat_id: i64, session_id: u64) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(&chat_id) {
            Some(current) if current.id == session_id => {
                sessions.remove(&chat_id);
                info!(chat_id, session = session_id, "player disconnected");
                true
            }
            _ => false,
        }
    }

    pub async fn has_client(&self, chat_id: i64) -> bool {
        self.sessions.lock().await.contains_key(&chat_id)
    }

    /// Push a media event to the chat's socket. Returns whether a live
    /// socket received it.
    pub async fn publish_media(
        &self,
        chat_id: i64,
        event: &MediaEvent,
    ) -> Result<bool, DomainError> {
        let frame = serde_json::to_string(event)
            .map_err(|e| DomainError::Socket(format!("encode media event: {}", e)))?;
        Ok(self.send(chat_id, OutboundFrame::Text(frame)).await)
    }

    /// Push a playback command to the chat's socket.
    pub async fn publish_control(
        &self,
        chat_id: i64,
        command: PlayerCommand,
    ) -> Result<bool, DomainError> {
        let frame = serde_json::to_string(&ControlFrame {
            command: command.wire_name(),
            value: command.wire_value(),
        })
        .map_err(|e| DomainError::Socket(format!("encode control command: {}", e)))?;
        Ok(self.send(chat_id, OutboundFrame::Text(frame)).await)
    }

    async fn send(&self, chat_id: i64, frame: OutboundFrame) -> bool {
        let (session_id, tx) = {
            let sessions = self.sessions.lock().await;
            match sessions.get(&chat_id) {
                Some(session) => (session.id, session.tx.clone()),
                None => return false,
            }
        };

        if tx.send(frame).await.is_err() {
            // Writer task is gone; drop the dead session.
            debug!(chat_id, session = session_id, "write failed, dropping socket");
            self.deregister(chat_id, session_id).await;
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FileDescriptor;
    use crate::domain::LocationHandle;

    fn event() -> MediaEvent {
        let fd = FileDescriptor {
            id: 4,
            chat_id: 42,
            location: LocationHandle(vec![]),
            size: 9,
            name: "song.mp3".into(),
            mime: "audio/mpeg".into(),
            width: 0,
            height: 0,
            duration: 3.5,
            title: "Song".into(),
            performer: "Band".into(),
            is_voice: false,
            is_animation: false,
            external_url: None,
        };
        MediaEvent::new("http://localhost/4/abc".into(), &fd)
    }

    #[tokio::test]
    async fn second_register_displaces_first() {
        let registry = PlayerRegistry::new();
        let (tx1, mut rx1) = mpsc::channel(OUTBOUND_QUEUE);
        let (tx2, mut rx2) = mpsc::channel(OUTBOUND_QUEUE);

        let s1 = registry.register(42, tx1).await;
        assert!(matches!(
            rx1.recv().await,
            Some(OutboundFrame::Text(t)) if t.contains("connected")
        ));

        let s2 = registry.register(42, tx2).await;
        assert_ne!(s1, s2);
        assert!(registry.has_client(42).await);
        assert_eq!(rx1.recv().await, Some(OutboundFrame::Close));

        // Publishes reach only the new socket.
        rx2.recv().await.unwrap(); // connected marker
        assert!(registry.publish_media(42, &event()).await.unwrap());
        assert!(matches!(
            rx2.recv().await,
            Some(OutboundFrame::Text(t)) if t.contains("song.mp3")
        ));
        assert!(rx1.try_recv().is_err());

        // The displaced socket's teardown must not evict its successor.
        assert!(!registry.deregister(42, s1).await);
        assert!(registry.has_client(42).await);
        assert!(registry.deregister(42, s2).await);
        assert!(!registry.has_client(42).await);
    }

    #[tokio::test]
    async fn media_then_control_keeps_order() {
        let registry = PlayerRegistry::new();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE);
        registry.register(7, tx).await;
        rx.recv().await.unwrap(); // connected marker

        registry.publish_media(7, &event()).await.unwrap();
        registry
            .publish_control(7, PlayerCommand::Seek(10))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, OutboundFrame::Text(t) if t.contains("fileName")));
        match second {
            OutboundFrame::Text(t) => {
                let v: serde_json::Value = serde_json::from_str(&t).unwrap();
                assert_eq!(v["command"], "seek");
                assert_eq!(v["value"], 10);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn control_value_is_null_except_for_seek() {
        let registry = PlayerRegistry::new();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE);
        registry.register(7, tx).await;
        rx.recv().await.unwrap();

        registry
            .publish_control(7, PlayerCommand::TogglePlayPause)
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            OutboundFrame::Text(t) => {
                let v: serde_json::Value = serde_json::from_str(&t).unwrap();
                assert_eq!(v["command"], "togglePlayPause");
                assert!(v["value"].is_null());
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_client_is_a_noop() {
        let registry = PlayerRegistry::new();
        assert!(!registry.publish_media(1, &event()).await.unwrap());
        assert!(!registry
            .publish_control(1, PlayerCommand::Restart)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn dead_writer_drops_the_session() {
        let registry = PlayerRegistry::new();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        registry.register(9, tx).await;
        drop(rx);

        assert!(!registry.publish_media(9, &event()).await.unwrap());
        assert!(!registry.has_client(9).await);
    }
}
