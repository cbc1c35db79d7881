//! Bot session bootstrap. One shared, reconnecting MTProto session owned
//! by the process: SQLite-backed storage so the bot authorization and the
//! peer cache survive restarts, a sender pool runner spawned in the
//! background, and sign-in on first run.

use std::path::Path;
use std::sync::Arc;

use grammers_client::{Client, SenderPool};
use grammers_session::storages::SqliteSession;
use grammers_session::updates::UpdatesLike;
use tokio::sync::mpsc;
use tracing::info;

/// A signed-in bot client plus the raw update feed for the dispatcher.
pub struct BotConnection {
    pub client: Client,
    pub updates: mpsc::UnboundedReceiver<UpdatesLike>,
}

/// Bring up the shared Telegram session: open (or create) the session
/// file, start the sender pool, and sign the bot in unless the stored
/// authorization is still valid.
pub async fn connect_bot(
    api_id: i32,
    api_hash: &str,
    bot_token: &str,
    session_path: &Path,
) -> anyhow::Result<BotConnection> {
    if let Some(parent) = session_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| anyhow::anyhow!("create session directory: {}", e))?;
    }
    let session = Arc::new(
        SqliteSession::open(session_path)
            .await
            .map_err(|e| anyhow::anyhow!("open session file: {}", e))?,
    );

    let SenderPool {
        runner,
        updates,
        handle,
    } = SenderPool::new(session, api_id);
    let client = Client::new(handle);
    tokio::spawn(runner.run());

    if !client.is_authorized().await? {
        info!("bot session not authorized, signing in");
        client.bot_sign_in(bot_token, api_hash).await?;
        info!("bot signed in");
    }

    Ok(BotConnection { client, updates })
}
