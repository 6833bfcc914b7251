use std::net::IpAddr;

use axum::http::{HeaderMap, Method, Uri};

use crate::http;

/// The parts of an inbound request the flow controller looks at.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub client_addr: IpAddr,
}

impl GatewayRequest {
    #[must_use]
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, client_addr: IpAddr) -> Self {
        Self {
            method,
            uri,
            headers,
            client_addr,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Path and query as requested, used as the post-login destination.
    #[must_use]
    pub fn original_url(&self) -> String {
        self.uri
            .path_and_query()
            .map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string())
    }

    /// Decoded value of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query().and_then(|query| http::query_param(query, name))
    }

    /// Value of an inbound cookie. Empty values count as absent.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        http::cookie_value(&self.headers, name)
    }

    /// Removes a cookie from the inbound request.
    pub fn remove_cookie(&mut self, name: &str) {
        http::remove_cookie(&mut self.headers, name);
    }

    /// Returns the (possibly modified) headers.
    #[must_use]
    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }
}
