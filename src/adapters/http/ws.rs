//! WebSocket endpoint pairing a chat with its web player.
//!
//! The socket is split on upgrade: a single writer task drains the
//! session's outbound queue (the registry's ordering and serialization
//! contract), while the read loop echoes inbound frames back through the
//! same queue and tears the session down on error.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::adapters::http::server::AppState;
use crate::usecases::player_registry::{OutboundFrame, OUTBOUND_QUEUE};

pub async fn upgrade(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let Ok(chat_id) = chat_id.parse::<i64>() else {
        return (StatusCode::BAD_REQUEST, "bad chat id").into_response();
    };
    match state.users.is_authorized(chat_id).await {
        Ok(true) => {}
        Ok(false) => return (StatusCode::UNAUTHORIZED, "chat not authorized").into_response(),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }

    ws.on_upgrade(move |socket| handle_socket(state, chat_id, socket))
}

async fn handle_socket(state: AppState, chat_id: i64, socket: WebSocket) {
    let (mut sink, mut reader) = socket.split();
    let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE);
    let session_id = state.registry.register(chat_id, tx.clone()).await;

    // Sole writer on the sink; ends when every sender is gone or a close
    // frame goes out (displacement).
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let result = match frame {
                OutboundFrame::Text(text) => sink.send(Message::Text(text)).await,
                OutboundFrame::Binary(bytes) => sink.send(Message::Binary(bytes)).await,
                OutboundFrame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Inbound frames are keepalives: echo and otherwise ignore. Ping and
    // pong stay with the protocol layer.
    while let Some(Ok(message)) = reader.next().await {
        let echo = match message {
            Message::Text(text) => OutboundFrame::Text(text),
            Message::Binary(bytes) => OutboundFrame::Binary(bytes),
            Message::Close(_) => break,
            _ => continue,
        };
        if tx.send(echo).await.is_err() {
            break;
        }
    }

    state.registry.deregister(chat_id, session_id).await;
    drop(tx);
    let _ = writer.await;
    debug!(chat_id, session = session_id, "websocket closed");
}
