//! Range-streaming media endpoint: `GET /<message_id>/<hash>`.
//!
//! The hash is the capability: it is recomputed from the descriptor and
//! compared in constant time before a reader is ever constructed. Once
//! headers are out, failures can only close the connection.

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::adapters::http::range::{resolve_range, RangeError};
use crate::adapters::http::server::AppState;
use crate::domain::{descriptor_hash, verify_hash, DomainError};
use crate::usecases::stream_reader::TelegramReader;

pub async fn stream_media(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Path((message_id, hash)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let Ok(message_id) = message_id.parse::<i32>() else {
        return (StatusCode::BAD_REQUEST, "bad message id").into_response();
    };

    let descriptor = match state.metadata.descriptor(message_id).await {
        Ok(descriptor) => descriptor,
        Err(e @ (DomainError::Input(_) | DomainError::UnsupportedMedia(_))) => {
            debug!(message_id, error = %e, "stream request for unusable message");
            return (StatusCode::BAD_REQUEST, "unknown media").into_response();
        }
        Err(e) => {
            warn!(message_id, error = %e, "descriptor resolution failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "upstream failure").into_response();
        }
    };

    // External media goes through /proxy, never through this endpoint.
    if descriptor.is_external() {
        return (StatusCode::BAD_REQUEST, "not a Telegram file").into_response();
    }

    let expected = descriptor_hash(&descriptor, state.hash_length);
    if !verify_hash(&hash, &expected) {
        debug!(message_id, "stream hash mismatch");
        return (StatusCode::BAD_REQUEST, "bad hash").into_response();
    }

    let size = descriptor.size.max(0) as u64;
    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    let range = match resolve_range(range_header, size) {
        Ok(range) => range,
        Err(RangeError::Malformed) => {
            return (StatusCode::BAD_REQUEST, "malformed range").into_response();
        }
        Err(RangeError::Unsatisfiable) => {
            let mut response =
                (StatusCode::RANGE_NOT_SATISFIABLE, "unsatisfiable range").into_response();
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            return response;
        }
    };

    let (status, start, end) = match range {
        Some(range) => (StatusCode::PARTIAL_CONTENT, range.start, range.end),
        None => (StatusCode::OK, 0, size.saturating_sub(1)),
    };
    let body_len = if size == 0 { 0 } else { end - start + 1 };

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body_len));
    if let Ok(value) = HeaderValue::from_str(&descriptor.mime) {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    if status == StatusCode::PARTIAL_CONTENT {
        if let Ok(value) = HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end, size)) {
            response_headers.insert(header::CONTENT_RANGE, value);
        }
    } else if let Ok(value) = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        descriptor.name.replace('"', "")
    )) {
        response_headers.insert(header::CONTENT_DISPOSITION, value);
    }

    if body_len == 0 {
        return (status, response_headers, Body::empty()).into_response();
    }

    // Wire the reader to the connection tracker: the record follows every
    // chunk and the tracker's idle sweep can cancel the token.
    let chat_id = descriptor.chat_id;
    let cancel = state.tracker.register(chat_id, remote);
    let reader = TelegramReader::new(
        state.gateway.clone(),
        state.cache.clone(),
        &descriptor,
    );
    let inner = reader.into_stream(start, end, cancel);
    let tracker = state.tracker.clone();

    let tracked = async_stream::stream! {
        let _guard = DeregisterGuard { tracker: tracker.clone(), chat_id, remote };
        let mut inner = std::pin::pin!(inner);
        while let Some(item) = inner.next().await {
            match item {
                Ok(chunk) => {
                    tracker.record_bytes(chat_id, remote, chunk.len() as u64);
                    yield Ok::<_, DomainError>(chunk);
                }
                Err(e) => {
                    // Headers are long gone; log and drop the connection.
                    warn!(chat_id, error = %e, "stream aborted mid-body");
                    yield Err(e);
                    break;
                }
            }
        }
    };

    (status, response_headers, Body::from_stream(tracked)).into_response()
}

struct DeregisterGuard {
    tracker: std::sync::Arc<crate::usecases::connection_tracker::ConnectionTracker>,
    chat_id: i64,
    remote: SocketAddr,
}

impl Drop for DeregisterGuard {
    fn drop(&mut self) {
        self.tracker.deregister(self.chat_id, self.remote);
    }
}
