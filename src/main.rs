//! Wiring & DI. Entry point: bootstrap adapters, inject into services,
//! run the HTTP server and the bot update loop.
//! No business logic here.

use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tg_bridge::adapters::http::{serve, AppState};
use tg_bridge::adapters::persistence::UsersJson;
use tg_bridge::adapters::telegram::{connect_bot, BotConnection, BotRunner, GrammersMediaGateway};
use tg_bridge::ports::{TelegramGateway, UserStore};
use tg_bridge::shared::config::AppConfig;
use tg_bridge::usecases::{
    BlockCache, ConnectionTracker, MetadataCache, PlayerRegistry, SessionCoordinator,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let env_loaded = dotenv();
    let default_filter = if std::env::var("TG_BRIDGE_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &env_loaded {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(_) => info!(cwd = %cwd.display(), "no .env found (check CWD)"),
    }

    let cfg = AppConfig::load().map_err(|e| anyhow::anyhow!("{}", e))?;
    let api_id = cfg.api_id.unwrap_or(0);
    if api_id == 0 {
        anyhow::bail!("Set TG_BRIDGE_API_ID (env or .env). Get from https://my.telegram.org");
    }
    let api_hash = cfg.api_hash.clone().unwrap_or_default();
    if api_hash.is_empty() {
        anyhow::bail!("Set TG_BRIDGE_API_HASH (env or .env). Get from https://my.telegram.org");
    }
    let bot_token = cfg.bot_token.clone().unwrap_or_default();
    if bot_token.is_empty() {
        anyhow::bail!("Set TG_BRIDGE_BOT_TOKEN (env or .env). Get from @BotFather");
    }
    // Bot tokens are "<bot id>:<secret>"; the id keys the metadata cache.
    let bot_id: i64 = bot_token
        .split(':')
        .next()
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("TG_BRIDGE_BOT_TOKEN does not look like a bot token"))?;

    let base_url = cfg.base_url_or_default();
    let port = cfg.port_or_default();
    info!(%base_url, port, bot_id, "starting bridge");

    // --- Telegram client: one shared reconnecting session ---
    let session_path = cfg
        .session_path
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./session.db"));
    let BotConnection { client, updates } =
        connect_bot(api_id, &api_hash, &bot_token, &session_path).await?;

    // --- Shared state: block cache, metadata, sockets, connections ---
    let cache_root = cfg.cache_root_or_default();
    let cache = Arc::new(
        BlockCache::open(&cache_root, cfg.cache_max_bytes_or_default())
            .await
            .map_err(|e| anyhow::anyhow!("open block cache: {}", e))?,
    );
    info!(
        cache_root = %cache_root,
        cache_max_bytes = cfg.cache_max_bytes_or_default(),
        "block cache ready"
    );

    let gateway = Arc::new(GrammersMediaGateway::new(client.clone()));
    let gateway_port: Arc<dyn TelegramGateway> = gateway.clone();
    let metadata = Arc::new(MetadataCache::new(Arc::clone(&gateway_port), bot_id));
    let registry = Arc::new(PlayerRegistry::new());
    let tracker = Arc::new(ConnectionTracker::new(cfg.idle_timeout_or_default()));
    Arc::clone(&tracker).spawn_cleanup(cfg.cleanup_interval_or_default());

    let users_path = cfg
        .users_path
        .clone()
        .unwrap_or_else(|| "./users.json".to_string());
    let users = Arc::new(UsersJson::new(&users_path, cfg.admin_chat_id));
    users
        .load()
        .await
        .map_err(|e| anyhow::anyhow!("load user store: {}", e))?;
    let users_port: Arc<dyn UserStore> = users;

    let coordinator = Arc::new(SessionCoordinator::new(
        Arc::clone(&metadata),
        Arc::clone(&registry),
        base_url.clone(),
        cfg.hash_length_or_default(),
    ));

    if let Some(log_channel) = cfg.log_channel_id {
        // Forwarding into the channel is handled outside the bridge; the
        // id is surfaced so operators can see the wiring took effect.
        info!(log_channel, "log channel configured");
    }

    // --- HTTP server ---
    let state = AppState {
        gateway: Arc::clone(&gateway_port),
        cache,
        metadata,
        registry,
        tracker,
        users: Arc::clone(&users_port),
        http: reqwest::Client::new(),
        base_url,
        hash_length: cfg.hash_length_or_default(),
        cache_root,
        player_template_path: cfg.player_template_path.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = serve(state, port).await {
            error!(error = %e, "HTTP server exited");
        }
    });

    // --- Bot update loop (runs until the connection dies) ---
    let bot = Arc::new(BotRunner::new(
        client,
        gateway,
        coordinator,
        users_port,
        cfg.admin_chat_id,
    ));
    bot.run(updates).await
}
