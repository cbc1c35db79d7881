//! Player page, avatar and small JSON endpoints.

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use serde_json::json;
use tracing::{debug, warn};

use crate::adapters::http::server::AppState;

/// Fallback page served when no template file is configured. The real
/// player page is an external collaborator; this keeps a bare deployment
/// usable.
const BUILTIN_PLAYER: &str = r#"<!doctype html>
<html><head><meta charset="utf-8"><title>tg-bridge player</title></head>
<body>
<video id="player" controls autoplay style="width:100%"></video>
<script>
const ws = new WebSocket("{{wsUrl}}");
const player = document.getElementById("player");
ws.onmessage = (raw) => {
  const msg = JSON.parse(raw.data);
  if (msg.url) { player.src = msg.url; player.play(); }
  else if (msg.command === "togglePlayPause") { player.paused ? player.play() : player.pause(); }
  else if (msg.command === "restart") { player.currentTime = 0; player.play(); }
  else if (msg.command === "seek") { player.currentTime += msg.value; }
  else if (msg.command === "toggleFullscreen") {
    document.fullscreenElement ? document.exitFullscreen() : player.requestFullscreen();
  }
};
setInterval(() => ws.readyState === 1 && ws.send("ping"), 30000);
</script>
</body></html>
"#;

async fn authorized_chat(state: &AppState, chat_id: &str) -> Result<i64, Response> {
    let chat_id: i64 = chat_id
        .parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, "bad chat id").into_response())?;
    match state.users.is_authorized(chat_id).await {
        Ok(true) => Ok(chat_id),
        Ok(false) => Err((StatusCode::UNAUTHORIZED, "chat not authorized").into_response()),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()),
    }
}

/// `GET /{chat_id}` — the player page with chat id and WS URL substituted.
pub async fn player_page(State(state): State<AppState>, Path(chat_id): Path<String>) -> Response {
    let chat_id = match authorized_chat(&state, &chat_id).await {
        Ok(chat_id) => chat_id,
        Err(response) => return response,
    };

    let template = match &state.player_template_path {
        Some(path) => match tokio::fs::read_to_string(path).await {
            Ok(template) => template,
            Err(e) => {
                warn!(path = %path, error = %e, "player template unreadable, using builtin");
                BUILTIN_PLAYER.to_string()
            }
        },
        None => BUILTIN_PLAYER.to_string(),
    };

    let ws_base = state
        .base_url
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    let page = template
        .replace("{{chatId}}", &chat_id.to_string())
        .replace("{{wsUrl}}", &format!("{}/ws/{}", ws_base, chat_id));
    Html(page).into_response()
}

/// `GET /api/validate-user/{chat_id}` — `{"authorized": bool}`.
pub async fn validate_user(State(state): State<AppState>, Path(chat_id): Path<String>) -> Response {
    let Ok(chat_id) = chat_id.parse::<i64>() else {
        return (StatusCode::BAD_REQUEST, "bad chat id").into_response();
    };
    match state.users.is_authorized(chat_id).await {
        Ok(authorized) => Json(json!({ "authorized": authorized })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// `GET /api/connection-stats/{chat_id}` — live streaming stats.
pub async fn connection_stats(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Response {
    let chat_id = match authorized_chat(&state, &chat_id).await {
        Ok(chat_id) => chat_id,
        Err(response) => return response,
    };
    Json(state.tracker.stats(chat_id)).into_response()
}

/// `GET /avatar/{chat_id}` — profile photo, cached on disk next to the
/// block store.
pub async fn avatar(State(state): State<AppState>, Path(chat_id): Path<String>) -> Response {
    let chat_id = match authorized_chat(&state, &chat_id).await {
        Ok(chat_id) => chat_id,
        Err(response) => return response,
    };

    let cache_path = std::path::Path::new(&state.cache_root)
        .join("avatars")
        .join(format!("{}.jpg", chat_id));
    let bytes = match tokio::fs::read(&cache_path).await {
        Ok(bytes) => bytes,
        Err(_) => match state.gateway.download_avatar(chat_id).await {
            Ok(Some(bytes)) => {
                if let Some(parent) = cache_path.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                if let Err(e) = tokio::fs::write(&cache_path, &bytes).await {
                    debug!(chat_id, error = %e, "avatar cache write failed");
                }
                bytes.to_vec()
            }
            Ok(None) => return (StatusCode::NOT_FOUND, "no avatar").into_response(),
            Err(e) => {
                warn!(chat_id, error = %e, "avatar download failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, "upstream failure").into_response();
            }
        },
    };

    (
        [(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"))],
        bytes,
    )
        .into_response()
}
