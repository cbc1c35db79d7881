//! Pass-through proxy for non-Telegram media URLs.
//!
//! Lets the player fetch external audio/video through the bridge's origin.
//! Forwards `Range`, propagates the framing headers back, refuses
//! non-HTTP(S) schemes and anything that would loop back into the bridge.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::adapters::http::server::AppState;
use crate::domain::DomainError;

#[derive(Deserialize)]
pub struct ProxyParams {
    url: String,
}

/// Validate a proxy target: http(s) only, never our own origin.
fn validate_target(raw: &str, base_url: &str) -> Result<url::Url, DomainError> {
    let target =
        url::Url::parse(raw.trim()).map_err(|e| DomainError::Proxy(format!("bad url: {}", e)))?;
    if !matches!(target.scheme(), "http" | "https") {
        return Err(DomainError::Proxy(format!(
            "unsupported scheme {}",
            target.scheme()
        )));
    }
    // Loop prevention compares parsed origins, not URL text: the parser
    // already lowercases scheme and host, explicit default ports resolve
    // via port_or_known_default, and a trailing-dot FQDN is the same host.
    if let Ok(base) = url::Url::parse(base_url) {
        if host_of(&target) == host_of(&base)
            && target.port_or_known_default() == base.port_or_known_default()
        {
            return Err(DomainError::Proxy("refusing to proxy own origin".into()));
        }
    }
    Ok(target)
}

fn host_of(url: &url::Url) -> Option<String> {
    url.host_str()
        .map(|host| host.trim_end_matches('.').to_ascii_lowercase())
}

pub async fn proxy(
    State(state): State<AppState>,
    Query(params): Query<ProxyParams>,
    headers: HeaderMap,
) -> Response {
    let target = match validate_target(&params.url, &state.base_url) {
        Ok(target) => target,
        Err(e) => {
            debug!(url = %params.url, error = %e, "proxy request refused");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let mut request = state.http.get(target.clone());
    if let Some(range) = headers.get(header::RANGE) {
        request = request.header(header::RANGE.as_str(), range.as_bytes());
    }

    let upstream = match request.send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(url = %target, error = %e, "proxy upstream request failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "upstream failure").into_response();
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    debug!(url = %target, status = %status, "proxying external media");

    let mut response_headers = HeaderMap::new();
    for name in [
        header::CONTENT_TYPE,
        header::CONTENT_LENGTH,
        header::CONTENT_RANGE,
        header::ACCEPT_RANGES,
    ] {
        if let Some(value) = upstream.headers().get(name.as_str()) {
            if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
                response_headers.insert(name, value);
            }
        }
    }

    let body = Body::from_stream(upstream.bytes_stream());
    (status, response_headers, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://bridge.example.org";

    #[test]
    fn accepts_plain_http_targets() {
        assert!(validate_target("https://cdn.example.org/a.mp3", BASE).is_ok());
        assert!(validate_target("http://cdn.example.org/a.mp3", BASE).is_ok());
    }

    #[test]
    fn refuses_other_schemes() {
        for raw in ["ftp://cdn.example.org/a", "file:///etc/passwd", "data:,x"] {
            assert!(
                matches!(validate_target(raw, BASE), Err(DomainError::Proxy(_))),
                "{raw}"
            );
        }
    }

    #[test]
    fn refuses_looping_back_into_the_bridge() {
        for raw in [
            format!("{}/proxy?url=https%3A%2F%2Fx", BASE),
            // Same origin spelled differently: case, explicit default
            // port, trailing-dot FQDN.
            "HTTPS://BRIDGE.EXAMPLE.ORG/proxy?url=x".to_string(),
            "https://bridge.example.org:443/5/abcd1234".to_string(),
            "https://bridge.example.org./5/abcd1234".to_string(),
        ] {
            assert!(
                matches!(validate_target(&raw, BASE), Err(DomainError::Proxy(_))),
                "{raw}"
            );
        }

        // Same host on another port is a different origin.
        assert!(validate_target("https://bridge.example.org:8443/a", BASE).is_ok());
    }

    #[test]
    fn refuses_garbage() {
        assert!(validate_target("not a url", BASE).is_err());
    }
}
