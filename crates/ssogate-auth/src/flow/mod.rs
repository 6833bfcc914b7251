//! Authentication flow controller.
//!
//! Every request to a protected location is classified into one of four
//! outcomes ([`Decision`]): pass through untouched, allow with an identity,
//! redirect (to the identity provider, or back to the original URL after a
//! callback), or deny with a status.
//!
//! # Flow
//!
//! 1. A request without a valid session is redirected to the provider's
//!    authorization endpoint with a fresh `state` token; the nonce half of
//!    the token is also set in a cookie.
//! 2. The provider sends the browser back to the location's redirect URL
//!    with `code` and `state`. The controller checks `state` against the
//!    cookie, redeems `code` and creates a session.
//! 3. Later requests carry the session cookie and are allowed while the
//!    session passes its timeout, group and address checks.

mod controller;
mod cookies;
mod fingerprint;
mod request;
mod state;

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use cookie::Cookie;
use tracing::debug;

use crate::session::{SessionRecord, UID_ATTRIBUTE};

pub use controller::AuthController;
pub use fingerprint::client_fingerprint;
pub use request::GatewayRequest;
pub use state::StateToken;

/// Header carrying the authenticated user to the protected application.
pub const REMOTE_USER_HEADER: &str = "x-remote-user";

/// Prefix of headers carrying profile attributes.
pub const PROFILE_HEADER_PREFIX: &str = "x-profile-";

/// Outcome of running a request through the controller.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Not handled here; continue with normal processing.
    Continue,
    /// Authenticated; serve the request as this identity.
    Allow(Identity),
    /// Send the browser elsewhere.
    Redirect(Redirect),
    /// Refuse the request.
    Deny(StatusCode),
}

impl Decision {
    #[must_use]
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// A redirect together with the cookies to set on it.
#[derive(Debug, Clone)]
pub struct Redirect {
    pub location: String,
    pub cookies: Vec<Cookie<'static>>,
}

impl Redirect {
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            cookies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: Cookie<'static>) -> Self {
        self.cookies.push(cookie);
        self
    }
}

/// Identity exposed to the protected application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    /// Allow-listed profile attributes, plus `uid`.
    pub attributes: BTreeMap<String, String>,
    /// `true` for the configured anonymous user.
    pub anonymous: bool,
}

impl Identity {
    /// Builds the identity for a validated session, keeping only the
    /// allow-listed profile attributes.
    #[must_use]
    pub fn from_session(user: &str, record: &SessionRecord, allowed: &[String]) -> Self {
        let attributes = record
            .profile
            .iter()
            .filter(|(name, _)| *name == UID_ATTRIBUTE || allowed.iter().any(|a| a == *name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self {
            user: user.to_string(),
            attributes,
            anonymous: false,
        }
    }

    #[must_use]
    pub fn anonymous(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            attributes: BTreeMap::new(),
            anonymous: true,
        }
    }

    /// Replaces any client-supplied identity headers with this identity.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        strip_identity_headers(headers);
        match HeaderValue::from_str(&self.user) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(REMOTE_USER_HEADER), value);
            }
            Err(_) => debug!("User id is not a valid header value"),
        }
        for (name, value) in &self.attributes {
            let header = HeaderName::from_bytes(
                format!("{PROFILE_HEADER_PREFIX}{}", name.to_ascii_lowercase()).as_bytes(),
            );
            match (header, HeaderValue::from_str(value)) {
                (Ok(header), Ok(value)) => {
                    headers.insert(header, value);
                }
                _ => debug!(attribute = %name, "Profile attribute not representable as a header"),
            }
        }
    }
}

/// Removes identity headers a client may have sent itself.
pub fn strip_identity_headers(headers: &mut HeaderMap) {
    let spoofed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| {
            let name = name.as_str();
            name == REMOTE_USER_HEADER || name.starts_with(PROFILE_HEADER_PREFIX)
        })
        .cloned()
        .collect();
    for name in spoofed {
        headers.remove(name);
    }
}
