//! Reverse proxy to the protected upstream application.

use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, instrument, warn};
use url::Url;

/// Errors raised while forwarding a request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Failed to read request body: {0}")]
    RequestBody(String),

    #[error("Upstream request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upstream request failed: {0}")]
    Upstream(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::RequestBody(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        warn!(error = %self, status = status.as_u16(), "Proxy request failed");
        status.into_response()
    }
}

/// Shared state of the proxy handler.
#[derive(Debug, Clone)]
pub struct ProxyState {
    client: reqwest::Client,
    upstream: Url,
    timeout: Duration,
    body_limit: usize,
}

impl ProxyState {
    /// Creates proxy state. Redirects from the upstream are passed through
    /// to the browser, never followed.
    pub fn new(upstream: Url, timeout: Duration, body_limit: usize) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Upstream(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            upstream,
            timeout,
            body_limit,
        })
    }

    fn target_url(&self, path_and_query: &str) -> String {
        format!(
            "{}{}",
            self.upstream.as_str().trim_end_matches('/'),
            path_and_query
        )
    }
}

/// Forwards the request to the upstream and relays its response.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn forward(
    State(state): State<ProxyState>,
    request: Request<Body>,
) -> Result<Response, ProxyError> {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str())
        .to_string();
    let target = state.target_url(&path_and_query);
    let method = request.method().clone();
    let headers = forwarded_headers(request.headers());

    let body = axum::body::to_bytes(request.into_body(), state.body_limit)
        .await
        .map_err(|e| ProxyError::RequestBody(e.to_string()))?;

    let upstream_response = state
        .client
        .request(method, &target)
        .headers(headers)
        .body(body)
        .timeout(state.timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ProxyError::Timeout(state.timeout)
            } else {
                ProxyError::Upstream(e.to_string())
            }
        })?;

    let status = upstream_response.status();
    debug!(target = %target, status = status.as_u16(), "Upstream responded");

    let mut response = Response::builder().status(status);
    for (name, value) in upstream_response.headers() {
        if !is_hop_by_hop_header(name.as_str()) {
            response = response.header(name, value);
        }
    }
    let bytes = upstream_response
        .bytes()
        .await
        .map_err(|e| ProxyError::Upstream(format!("failed to read response body: {e}")))?;

    response
        .body(Body::from(bytes))
        .map_err(|e| ProxyError::Upstream(format!("failed to build response: {e}")))
}

fn forwarded_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in incoming {
        if is_hop_by_hop_header(name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Hop-by-hop headers (RFC 7230 section 6.1) plus `Host`, which is set for
/// the upstream.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}
