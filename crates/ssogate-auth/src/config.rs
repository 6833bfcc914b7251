//! Gateway configuration.
//!
//! Configuration is resolved once at startup into immutable structs and
//! passed by reference into every controller call. Server-wide settings
//! (identity provider endpoints, session store location, transport limits)
//! live in [`GatewayConfig`]; per-location behaviour lives in
//! [`LocationPolicy`].
//!
//! # Example (TOML)
//!
//! ```toml
//! session_store_path = "/var/lib/ssogate/sessions"
//!
//! [provider]
//! auth_server = "https://urs.example.com"
//!
//! [[locations]]
//! path = "/data"
//! authorization_group = "data_session"
//! client_id = "abc123"
//! redirect_url = "https://app.example.com/oauth/callback"
//! idle_timeout = "1h"
//! active_timeout = "12h"
//! check_ip_octets = 2
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Server-wide gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Directory holding one file per session.
    #[serde(default = "default_session_store_path")]
    pub session_store_path: PathBuf,

    /// Identity provider endpoints.
    pub provider: ProviderConfig,

    /// TLS transport limits.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Cookie attributes.
    #[serde(default)]
    pub cookie: CookieConfig,

    /// Interval between sweeps of expired sessions. Zero disables the sweep.
    #[serde(default = "default_purge_interval", with = "humantime_serde")]
    pub purge_interval: Duration,

    /// Protected locations. Longest matching path wins.
    #[serde(default)]
    pub locations: Vec<LocationPolicy>,
}

fn default_session_store_path() -> PathBuf {
    PathBuf::from("/var/lib/ssogate/sessions")
}

fn default_purge_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

/// Identity provider endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Base URL of the authentication server. Must be `https`.
    pub auth_server: Url,

    /// Path of the authorization endpoint the browser is sent to.
    #[serde(default = "default_auth_path")]
    pub auth_path: String,

    /// Path of the token endpoint the gateway posts codes to.
    #[serde(default = "default_token_path")]
    pub token_path: String,
}

fn default_auth_path() -> String {
    "/oauth/authorize".to_string()
}

fn default_token_path() -> String {
    "/oauth/token".to_string()
}

impl ProviderConfig {
    /// Creates a provider configuration with the default endpoint paths.
    #[must_use]
    pub fn new(auth_server: Url) -> Self {
        Self {
            auth_server,
            auth_path: default_auth_path(),
            token_path: default_token_path(),
        }
    }

    /// Returns `{auth_server}{path}` without doubling the slash.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.auth_server.as_str().trim_end_matches('/'), path)
    }
}

/// Limits for connections to the identity provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Deadline for the TCP connect and for the TLS handshake.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Deadline for each read or write.
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,

    /// PEM file with roots trusted in addition to the webpki set.
    pub extra_root_certificates: Option<PathBuf>,

    /// Largest response (head and body) accepted from the provider.
    pub max_response_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(30),
            extra_root_certificates: None,
            max_response_bytes: 64 * 1024,
        }
    }
}

/// Attributes applied to the cookies the gateway sets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Mark cookies `Secure`. Only disable for plain-HTTP development.
    pub secure: bool,

    /// Lifetime of the state cookie bound to a pending login.
    #[serde(with = "humantime_serde")]
    pub state_ttl: Duration,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secure: true,
            state_ttl: Duration::from_secs(600),
        }
    }
}

/// Per-location authentication policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocationPolicy {
    /// Path prefix this policy protects.
    #[serde(default = "default_location_path")]
    pub path: String,

    /// Session cookie name. Locations sharing a group share sessions.
    pub authorization_group: String,

    /// Client identifier registered with the identity provider.
    pub client_id: String,

    /// Pre-encoded `client_id:password` sent as HTTP Basic credentials to
    /// the token endpoint.
    #[serde(default)]
    pub client_credentials: Option<String>,

    /// Callback URL registered with the identity provider.
    pub redirect_url: Url,

    /// Visiting this path destroys the current session.
    #[serde(default)]
    pub logout_path: Option<String>,

    /// Identity granted instead of redirecting when no session exists.
    #[serde(default)]
    pub anonymous_user: Option<String>,

    /// Destroy sessions unused for this long. Zero disables.
    #[serde(default, with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Destroy sessions older than this. Zero disables.
    #[serde(default, with = "humantime_serde")]
    pub active_timeout: Duration,

    /// Number of leading address octets that must match the address the
    /// session was created from. Zero disables.
    #[serde(default)]
    pub check_ip_octets: u8,

    /// Ask the provider to skip its splash page.
    #[serde(default)]
    pub splash_disable: bool,

    /// Profile attributes passed on to the protected application.
    #[serde(default)]
    pub profile_attributes: Vec<String>,

    /// Where to send the browser when the login exchange fails.
    #[serde(default)]
    pub access_error_url: Option<String>,
}

fn default_location_path() -> String {
    "/".to_string()
}

impl LocationPolicy {
    /// Creates a policy with every optional behaviour disabled.
    #[must_use]
    pub fn new(
        path: impl Into<String>,
        authorization_group: impl Into<String>,
        client_id: impl Into<String>,
        redirect_url: Url,
    ) -> Self {
        Self {
            path: path.into(),
            authorization_group: authorization_group.into(),
            client_id: client_id.into(),
            client_credentials: None,
            redirect_url,
            logout_path: None,
            anonymous_user: None,
            idle_timeout: Duration::ZERO,
            active_timeout: Duration::ZERO,
            check_ip_octets: 0,
            splash_disable: false,
            profile_attributes: Vec::new(),
            access_error_url: None,
        }
    }

    /// Name of the cookie binding the pending login with `nonce` to the
    /// browser. One cookie per attempt, so logins started in parallel tabs
    /// do not overwrite each other.
    #[must_use]
    pub fn state_cookie_name(&self, nonce: &str) -> String {
        format!("{}_state_{nonce}", self.authorization_group)
    }

    /// Returns `true` if `path` falls under this location.
    #[must_use]
    pub fn covers(&self, path: &str) -> bool {
        let prefix = self.path.trim_end_matches('/');
        if prefix.is_empty() {
            return path.starts_with('/');
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

impl GatewayConfig {
    /// Creates a configuration with defaults and no locations.
    #[must_use]
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            session_store_path: default_session_store_path(),
            provider,
            transport: TransportConfig::default(),
            cookie: CookieConfig::default(),
            purge_interval: default_purge_interval(),
            locations: Vec::new(),
        }
    }

    /// Returns the location with the longest path prefix covering `path`.
    #[must_use]
    pub fn location_for_path(&self, path: &str) -> Option<&LocationPolicy> {
        self.locations
            .iter()
            .filter(|loc| loc.covers(path))
            .max_by_key(|loc| loc.path.trim_end_matches('/').len())
    }

    /// Returns the location whose redirect URL path is exactly `path`.
    #[must_use]
    pub fn location_for_redirect(&self, path: &str) -> Option<&LocationPolicy> {
        self.locations
            .iter()
            .find(|loc| loc.redirect_url.path() == path)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The authentication server is not an `https` URL with a host
    /// - An endpoint path does not start with `/`
    /// - No locations are configured
    /// - A location has an empty group or client id, a malformed group name,
    ///   an out-of-range `check_ip_octets`, or a logout path equal to its
    ///   redirect path
    /// - Two locations with different groups share a redirect path
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.auth_server.scheme() != "https" {
            return Err(ConfigError::InvalidValue(format!(
                "provider.auth_server must use https, got '{}'",
                self.provider.auth_server.scheme()
            )));
        }
        if self.provider.auth_server.host_str().is_none() {
            return Err(ConfigError::InvalidValue(
                "provider.auth_server must include a host".to_string(),
            ));
        }
        for (name, path) in [
            ("provider.auth_path", &self.provider.auth_path),
            ("provider.token_path", &self.provider.token_path),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must start with '/'"
                )));
            }
        }
        if self.transport.max_response_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "transport.max_response_bytes must be > 0".to_string(),
            ));
        }
        if self.locations.is_empty() {
            return Err(ConfigError::Missing("locations".to_string()));
        }

        for loc in &self.locations {
            if loc.authorization_group.is_empty() {
                return Err(ConfigError::Missing(format!(
                    "authorization_group for location '{}'",
                    loc.path
                )));
            }
            if !loc
                .authorization_group
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(ConfigError::InvalidValue(format!(
                    "authorization_group '{}' may only contain [A-Za-z0-9_-]",
                    loc.authorization_group
                )));
            }
            if loc.client_id.is_empty() {
                return Err(ConfigError::Missing(format!(
                    "client_id for location '{}'",
                    loc.path
                )));
            }
            if loc.check_ip_octets > 8 {
                return Err(ConfigError::InvalidValue(format!(
                    "check_ip_octets must be <= 8, got {}",
                    loc.check_ip_octets
                )));
            }
            if loc.logout_path.as_deref() == Some(loc.redirect_url.path()) {
                return Err(ConfigError::InvalidValue(format!(
                    "logout_path for location '{}' must differ from the redirect path",
                    loc.path
                )));
            }
        }

        for (i, a) in self.locations.iter().enumerate() {
            for b in &self.locations[i + 1..] {
                if a.redirect_url.path() == b.redirect_url.path()
                    && a.authorization_group != b.authorization_group
                {
                    return Err(ConfigError::InvalidValue(format!(
                        "redirect path '{}' is shared by groups '{}' and '{}'",
                        a.redirect_url.path(),
                        a.authorization_group,
                        b.authorization_group
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}
