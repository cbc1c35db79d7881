//! Bot update dispatcher. Inbound adapter over the grammers update stream.
//!
//! Media messages are announced through the session coordinator and get a
//! reply with the player's inline controls; callback queries are mapped to
//! playback commands and always answered, even on failure. Every update
//! also feeds the gateway's peer cache.

use std::collections::HashMap;
use std::sync::Arc;

use grammers_client::client::UpdatesConfiguration;
use grammers_client::message::{Button, InputMessage, ReplyMarkup};
use grammers_client::update::{CallbackQuery, Update};
use grammers_client::Client;
use grammers_session::types::PeerRef;
use grammers_session::updates::UpdatesLike;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::adapters::telegram::client::GrammersMediaGateway;
use crate::domain::ControlButton;
use crate::ports::UserStore;
use crate::usecases::session_coordinator::{parse_callback, CallbackAction, SessionCoordinator};

pub struct BotRunner {
    client: Client,
    gateway: Arc<GrammersMediaGateway>,
    coordinator: Arc<SessionCoordinator>,
    users: Arc<dyn UserStore>,
    admin_chat_id: Option<i64>,
    /// PeerRef per chat, so the runner can message chats outside the
    /// update that introduced them (admin notices).
    peers: Mutex<HashMap<i64, PeerRef>>,
}

impl BotRunner {
    pub fn new(
        client: Client,
        gateway: Arc<GrammersMediaGateway>,
        coordinator: Arc<SessionCoordinator>,
        users: Arc<dyn UserStore>,
        admin_chat_id: Option<i64>,
    ) -> Self {
        Self {
            client,
            gateway,
            coordinator,
            users,
            admin_chat_id,
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Consume the update stream until it fails. Each update is handled in
    /// its own task so a slow media announce never blocks the stream.
    pub async fn run(
        self: Arc<Self>,
        updates: mpsc::UnboundedReceiver<UpdatesLike>,
    ) -> anyhow::Result<()> {
        let mut stream = self.client.stream_updates(
            updates,
            UpdatesConfiguration {
                catch_up: false,
                ..Default::default()
            },
        );
        info!("bot update loop started");
        loop {
            let update = stream.next().await?;
            let runner = Arc::clone(&self);
            tokio::spawn(async move {
                runner.handle_update(update).await;
            });
        }
    }

    async fn handle_update(&self, update: Update) {
        match update {
            Update::NewMessage(message) if !message.outgoing() => {
                if let Err(e) = self.handle_message(&message).await {
                    warn!(error = %e, "failed to handle message");
                }
            }
            Update::CallbackQuery(query) => self.handle_callback(&query).await,
            _ => {}
        }
    }

    async fn handle_message(
        &self,
        message: &grammers_client::update::Message,
    ) -> anyhow::Result<()> {
        let chat_id = message.peer_id().bot_api_dialog_id();
        let Some(peer) = message.peer() else {
            return Ok(());
        };
        let Some(peer_ref) = peer.to_ref().await else {
            return Ok(());
        };
        self.peers.lock().await.insert(chat_id, peer_ref);
        self.gateway.remember_peer(chat_id, peer_ref.into()).await;

        let text = message.text().trim().to_string();
        if let Some(command) = text.strip_prefix('/') {
            return self.handle_command(chat_id, command, peer_ref).await;
        }

        if message.media().is_some() {
            if !self.users.is_authorized(chat_id).await? {
                self.client
                    .send_message(
                        peer_ref,
                        InputMessage::new().text(
                            "You are not authorized to use the web player yet. \
                             The administrator has been notified.",
                        ),
                    )
                    .await?;
                self.notify_admin(&format!("Access request from chat {}", chat_id))
                    .await;
                return Ok(());
            }

            let announcement = self.coordinator.announce_media(chat_id, message.id()).await?;
            let caption = if announcement.pushed {
                "Now playing on your web player.".to_string()
            } else {
                format!(
                    "Web player not connected. Open {} first.",
                    self.coordinator.player_url(chat_id)
                )
            };
            let markup = reply_markup_for(&announcement.buttons);
            self.client
                .send_message(
                    peer_ref,
                    InputMessage::new()
                        .text(caption)
                        .reply_to(Some(message.id()))
                        .reply_markup(markup),
                )
                .await?;
        }
        Ok(())
    }

    async fn handle_command(
        &self,
        chat_id: i64,
        command: &str,
        peer_ref: PeerRef,
    ) -> anyhow::Result<()> {
        let is_admin = self.admin_chat_id == Some(chat_id);
        let reply = match command.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["start"] => {
                if self.users.is_authorized(chat_id).await? {
                    format!(
                        "Your web player: {}\nSend or forward any media to play it there.",
                        self.coordinator.player_url(chat_id)
                    )
                } else {
                    self.notify_admin(&format!(
                        "Chat {} requested access (/authorize {})",
                        chat_id, chat_id
                    ))
                    .await;
                    "Awaiting authorization from the administrator.".to_string()
                }
            }
            ["authorize", id] if is_admin => match id.parse::<i64>() {
                Ok(id) => {
                    self.users.authorize(id).await?;
                    format!("Authorized chat {}", id)
                }
                Err(_) => "Usage: /authorize <chat id>".to_string(),
            },
            ["revoke", id] if is_admin => match id.parse::<i64>() {
                Ok(id) => {
                    self.users.revoke(id).await?;
                    format!("Revoked chat {}", id)
                }
                Err(_) => "Usage: /revoke <chat id>".to_string(),
            },
            ["users"] if is_admin => {
                let users = self.users.list().await?;
                if users.is_empty() {
                    "No authorized chats.".to_string()
                } else {
                    let ids: Vec<String> = users.iter().map(i64::to_string).collect();
                    format!("Authorized chats: {}", ids.join(", "))
                }
            }
            _ => "Commands: /start — link your web player.".to_string(),
        };

        self.client
            .send_message(peer_ref, InputMessage::new().text(reply))
            .await?;
        Ok(())
    }

    async fn handle_callback(&self, query: &CallbackQuery) {
        let chat_id = query.peer_id().bot_api_dialog_id();
        let action = std::str::from_utf8(query.data())
            .ok()
            .and_then(parse_callback);

        let status = match action {
            None => "Unknown control".to_string(),
            Some(CallbackAction::Resend(message_id)) => self
                .coordinator
                .resend(chat_id, message_id)
                .await
                .unwrap_or_else(|e| {
                    warn!(chat_id, message_id, error = %e, "resend failed");
                    "Something went wrong".to_string()
                }),
            Some(CallbackAction::Command(command)) => self
                .coordinator
                .control(chat_id, command)
                .await
                .unwrap_or_else(|e| {
                    warn!(chat_id, error = %e, "control publish failed");
                    "Something went wrong".to_string()
                }),
        };

        // The button spinner times out unless the query is answered.
        if let Err(e) = query.answer().text(status).send().await {
            warn!(chat_id, error = %e, "failed to answer callback query");
        }
    }

    async fn notify_admin(&self, text: &str) {
        let Some(admin) = self.admin_chat_id else {
            return;
        };
        let peer_ref = { self.peers.lock().await.get(&admin).copied() };
        let Some(peer_ref) = peer_ref else {
            warn!(admin, "admin peer not seen yet, dropping notice");
            return;
        };
        if let Err(e) = self
            .client
            .send_message(peer_ref, InputMessage::new().text(text))
            .await
        {
            warn!(admin, error = %e, "failed to notify admin");
        }
    }
}

/// Lower the coordinator's button rows into a grammers inline markup.
fn reply_markup_for(rows: &[Vec<ControlButton>]) -> ReplyMarkup {
    let buttons: Vec<Vec<Button>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| match button {
                    ControlButton::Callback { label, data } => {
                        Button::data(label.clone(), data.clone().into_bytes())
                    }
                    ControlButton::Url { label, url } => Button::url(label.clone(), url.clone()),
                })
                .collect()
        })
        .collect();
    ReplyMarkup::from_buttons(&buttons)
}
