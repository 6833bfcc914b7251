//! The `state` parameter carried through the identity provider.
//!
//! A token is `<nonce>.<base64url(original_url)>`. The nonce is also set in
//! the `<group>_state_<nonce>` cookie, binding the callback to the browser
//! that started the login.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;

use crate::error::GatewayError;

const NONCE_BYTES: usize = 16;

/// Anti-CSRF token binding a login attempt to its original destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateToken {
    nonce: String,
    original_url: String,
}

impl StateToken {
    /// Mints a token with a fresh random nonce.
    #[must_use]
    pub fn new(original_url: impl Into<String>) -> Self {
        let mut bytes = [0u8; NONCE_BYTES];
        rand::thread_rng().fill(&mut bytes);
        Self {
            nonce: URL_SAFE_NO_PAD.encode(bytes),
            original_url: original_url.into(),
        }
    }

    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    #[must_use]
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{}.{}",
            self.nonce,
            URL_SAFE_NO_PAD.encode(self.original_url.as_bytes())
        )
    }

    /// Parses a token received on the callback.
    ///
    /// # Errors
    ///
    /// Returns a protocol error unless the token has both halves and the
    /// URL is origin-relative.
    pub fn decode(token: &str) -> Result<Self, GatewayError> {
        let (nonce, encoded) = token
            .split_once('.')
            .ok_or_else(|| GatewayError::protocol("state has no URL part"))?;
        if nonce.is_empty()
            || !nonce
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(GatewayError::protocol("state nonce is malformed"));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| GatewayError::protocol("state URL is not base64url"))?;
        let original_url = String::from_utf8(bytes)
            .map_err(|_| GatewayError::protocol("state URL is not UTF-8"))?;
        if !is_origin_relative(&original_url) {
            return Err(GatewayError::protocol("state URL is not origin-relative"));
        }
        Ok(Self {
            nonce: nonce.to_string(),
            original_url,
        })
    }
}

/// `/path?query` on this origin. Rejects `//host` and `/\host` forms that
/// browsers treat as another origin.
fn is_origin_relative(url: &str) -> bool {
    url.starts_with('/')
        && !url.starts_with("//")
        && !url.contains('\\')
        && !url.chars().any(char::is_control)
}

/// Compares two strings without short-circuiting on the first difference.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}
