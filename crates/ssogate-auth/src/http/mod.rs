//! Minimal HTTP/1.0 client over the secure transport.
//!
//! The identity provider is spoken to with one request per connection:
//! `Connection: close`, no keep-alive, no chunked bodies. This module also
//! carries the URL and cookie helpers the flow controller uses on inbound
//! requests.

mod cookies;
mod exchange;
mod url;

use std::borrow::Cow;

use axum::http::{HeaderMap, StatusCode};

use crate::transport::TransportError;

pub use cookies::{cookie_value, remove_cookie};
pub use exchange::HttpExchange;
pub use url::{query_param, url_decode, url_encode};

/// Errors raised while exchanging an HTTP request.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The target URL cannot be reached with this client.
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// The first response line is not `HTTP/1.x <status> <reason>`.
    #[error("Malformed status line: {0}")]
    MalformedStatusLine(String),

    /// A response header could not be parsed.
    #[error("Malformed response header: {0}")]
    MalformedHeader(String),

    /// The peer closed the connection before a complete response arrived.
    #[error("Connection closed before the response was complete")]
    PrematureClose,

    /// The response uses a transfer encoding this client does not speak.
    #[error("Unsupported transfer encoding: {0}")]
    UnsupportedTransferEncoding(String),

    /// The response exceeded the configured size cap.
    #[error("Response exceeds {limit} bytes")]
    ResponseTooLarge {
        /// Configured cap in bytes.
        limit: usize,
    },

    /// The `Content-Length` header is not a valid length.
    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),
}

/// A complete HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns the body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Host and port of a TLS server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Extracts the server address from an `https` URL.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::InvalidUrl`] for other schemes or host-less URLs.
    pub fn from_url(url: &::url::Url) -> Result<Self, HttpError> {
        if url.scheme() != "https" {
            return Err(HttpError::InvalidUrl(format!(
                "{url}: only https is supported"
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| HttpError::InvalidUrl(format!("{url}: missing host")))?;
        let port = url.port_or_known_default().unwrap_or(443);
        Ok(Self::new(host, port))
    }

    /// Value for the `Host` request header.
    #[must_use]
    pub fn host_header(&self) -> String {
        if self.port == 443 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
