//! HTTP surface wiring: shared state, router, listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::adapters::http::{api, proxy, stream, ws};
use crate::ports::{TelegramGateway, UserStore};
use crate::usecases::{BlockCache, ConnectionTracker, MetadataCache, PlayerRegistry};

/// Process-wide handles shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn TelegramGateway>,
    pub cache: Arc<BlockCache>,
    pub metadata: Arc<MetadataCache>,
    pub registry: Arc<PlayerRegistry>,
    pub tracker: Arc<ConnectionTracker>,
    pub users: Arc<dyn UserStore>,
    pub http: reqwest::Client,
    pub base_url: String,
    pub hash_length: usize,
    pub cache_root: String,
    pub player_template_path: Option<String>,
}

pub fn router(state: AppState) -> Router {
    // The player page runs on the bridge's origin but media may come from
    // anywhere; keep the surface permissive like the proxy it fronts.
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/proxy", get(proxy::proxy))
        .route("/ws/:chat_id", get(ws::upgrade))
        .route("/avatar/:chat_id", get(api::avatar))
        .route("/api/validate-user/:chat_id", get(api::validate_user))
        .route("/api/connection-stats/:chat_id", get(api::connection_stats))
        // One shared param name: matchit rejects differently-named
        // parameters at the same position.
        .route("/:id", get(api::player_page))
        .route("/:id/:hash", get(stream::stream_media))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::UsersJson;
    use crate::domain::{short_hash, DomainError, FileDescriptor, LocationHandle, BLOCK_SIZE};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{header, Request, StatusCode};
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    const SIZE: usize = 2_500_000;
    const FILE_ID: i64 = 900;
    const CHAT_ID: i64 = 42;

    struct MockGateway {
        data: Bytes,
        fetches: AtomicUsize,
    }

    impl MockGateway {
        fn new() -> Self {
            let data: Vec<u8> = (0..SIZE).map(|i| ((i * 31 + 7) % 256) as u8).collect();
            Self {
                data: Bytes::from(data),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TelegramGateway for MockGateway {
        async fn resolve_media(&self, message_id: i32) -> Result<FileDescriptor, DomainError> {
            if message_id != 5 {
                return Err(DomainError::Input("message not found".into()));
            }
            Ok(FileDescriptor {
                id: FILE_ID,
                chat_id: CHAT_ID,
                location: LocationHandle(vec![9]),
                size: SIZE as i64,
                name: "clip.mp4".into(),
                mime: "video/mp4".into(),
                width: 640,
                height: 480,
                duration: 12.0,
                title: String::new(),
                performer: String::new(),
                is_voice: false,
                is_animation: false,
                external_url: None,
            })
        }

        async fn download_block(
            &self,
            _location: &LocationHandle,
            offset: u64,
            len: u64,
        ) -> Result<Bytes, DomainError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            // Slow enough that concurrent requests overlap on the block.
            tokio::time::sleep(Duration::from_millis(10)).await;
            let start = offset as usize;
            let end = (offset + len).min(self.data.len() as u64) as usize;
            Ok(self.data.slice(start..end))
        }

        async fn download_avatar(&self, _chat_id: i64) -> Result<Option<Bytes>, DomainError> {
            Ok(None)
        }
    }

    async fn test_state(dir: &std::path::Path) -> (AppState, Arc<MockGateway>) {
        let gateway = Arc::new(MockGateway::new());
        let cache = Arc::new(BlockCache::open(dir.join("blocks"), u64::MAX).await.unwrap());
        let users = Arc::new(UsersJson::new(dir.join("users.json"), None));
        users.load().await.unwrap();
        crate::ports::UserStore::authorize(users.as_ref(), CHAT_ID)
            .await
            .unwrap();
        let state = AppState {
            gateway: gateway.clone(),
            cache,
            metadata: Arc::new(MetadataCache::new(gateway.clone(), 1)),
            registry: Arc::new(PlayerRegistry::new()),
            tracker: Arc::new(ConnectionTracker::new(Duration::from_secs(300))),
            users,
            http: reqwest::Client::new(),
            base_url: "http://bridge.test".into(),
            hash_length: 8,
            cache_root: dir.join("blocks").to_string_lossy().into_owned(),
            player_template_path: None,
        };
        (state, gateway)
    }

    fn app(state: AppState) -> Router {
        router(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
    }

    fn good_hash() -> String {
        short_hash("clip.mp4", SIZE as i64, "video/mp4", FILE_ID, 8)
    }

    fn get(path: &str, range: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn full_download_streams_every_byte() {
        let dir = tempfile::tempdir().unwrap();
        let (state, gateway) = test_state(dir.path()).await;
        let app = app(state);

        let response = app
            .oneshot(get(&format!("/5/{}", good_hash()), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            SIZE.to_string().as_str()
        );
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("clip.mp4"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.len(), SIZE);
        assert_eq!(&body[..], &gateway.data[..]);
        // Blocks 0..=2 fetched upstream exactly once each.
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn suffix_range_hits_only_the_tail_block() {
        let dir = tempfile::tempdir().unwrap();
        let (state, gateway) = test_state(dir.path()).await;
        let app = app(state);

        let response = app
            .oneshot(get(&format!("/5/{}", good_hash()), Some("bytes=-500")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[header::CONTENT_RANGE],
            "bytes 2499500-2499999/2500000"
        );
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "500");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], &gateway.data[SIZE - 500..]);
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_range_requests_share_one_upstream_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let (state, gateway) = test_state(dir.path()).await;
        let app = app(state);

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let app = app.clone();
            let path = format!("/5/{}", good_hash());
            tasks.push(tokio::spawn(async move {
                let response = app
                    .oneshot(get(&path, Some("bytes=0-1048575")))
                    .await
                    .unwrap();
                assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
                response.into_body().collect().await.unwrap().to_bytes()
            }));
        }

        let mut bodies = Vec::new();
        for task in tasks {
            bodies.push(task.await.unwrap());
        }
        let first = &bodies[0];
        assert_eq!(first.len(), BLOCK_SIZE as usize);
        assert!(bodies.iter().all(|b| b == first));
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bad_hash_is_rejected_before_any_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let (state, gateway) = test_state(dir.path()).await;
        let app = app(state);

        let mut hash = good_hash().into_bytes();
        hash[0] = if hash[0] == b'0' { b'1' } else { b'0' };
        let hash = String::from_utf8(hash).unwrap();

        let response = app.oneshot(get(&format!("/5/{}", hash), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_message_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = test_state(dir.path()).await;
        let app = app(state);

        let response = app
            .oneshot(get(&format!("/6/{}", good_hash()), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn out_of_bounds_range_is_416_with_total_size() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = test_state(dir.path()).await;
        let app = app(state);

        let response = app
            .oneshot(get(
                &format!("/5/{}", good_hash()),
                Some("bytes=9999999-"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers()[header::CONTENT_RANGE],
            "bytes */2500000"
        );
    }

    #[tokio::test]
    async fn malformed_range_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = test_state(dir.path()).await;
        let app = app(state);

        let response = app
            .oneshot(get(&format!("/5/{}", good_hash()), Some("bytes=a-b")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unauthorized_chat_is_rejected_on_page_and_api() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = test_state(dir.path()).await;
        let app = app(state);

        let response = app.clone().oneshot(get("/999", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(get("/api/connection-stats/999", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // validate-user reports instead of rejecting.
        let response = app
            .oneshot(get("/api/validate-user/999", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["authorized"], false);
    }

    #[tokio::test]
    async fn player_page_substitutes_chat_and_ws_url() {
        let dir = tempfile::tempdir().unwrap();
        let (state, _) = test_state(dir.path()).await;
        let app = app(state);

        let response = app.oneshot(get("/42", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let page = String::from_utf8_lossy(&body);
        assert!(page.contains("ws://bridge.test/ws/42"));
    }
}
