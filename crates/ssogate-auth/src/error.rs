//! Gateway error types.
//!
//! Every failure that can end an authentication attempt is funnelled into
//! [`GatewayError`]. The variants follow the taxonomy the flow controller
//! reasons about: protocol violations are hard denials, provider and
//! transport failures collapse into a generic access error, storage
//! failures make the request fail closed.

use std::fmt;

use axum::http::StatusCode;

use crate::http::HttpError;
use crate::json::JsonError;
use crate::session::StoreError;
use crate::transport::TransportError;

/// Errors raised while authenticating a request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The callback request is malformed or failed the anti-CSRF check.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// The callback `state` is missing or not bound to this browser.
    #[error("State mismatch: {message}")]
    StateMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// The identity provider answered, but not with a usable identity.
    #[error("Identity provider error: {message}")]
    Provider {
        /// Description of the provider failure.
        message: String,
    },

    /// The identity provider could not be reached over TLS.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The session store is unavailable.
    #[error("Session storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// The gateway configuration is unusable.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl GatewayError {
    /// Creates a new `Protocol` error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a new `StateMismatch` error.
    #[must_use]
    pub fn state_mismatch(message: impl Into<String>) -> Self {
        Self::StateMismatch {
            message: message.into(),
        }
    }

    /// Creates a new `Provider` error.
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Protocol { .. } | Self::StateMismatch { .. } => ErrorCategory::Protocol,
            Self::Provider { .. } => ErrorCategory::Provider,
            Self::Transport(_) => ErrorCategory::Transport,
            Self::Storage { .. } => ErrorCategory::Storage,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// Returns the status presented to the end user.
    ///
    /// Only protocol errors are attributed to the client; everything else is
    /// reported as a generic server-side access error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Protocol { .. } => StatusCode::BAD_REQUEST,
            Self::StateMismatch { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` if the identity provider is to blame, either because it
    /// answered badly or because it could not be reached.
    #[must_use]
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, Self::Provider { .. } | Self::Transport(_))
    }
}

impl From<HttpError> for GatewayError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Transport(inner) => Self::Transport(inner),
            other => Self::provider(other.to_string()),
        }
    }
}

impl From<JsonError> for GatewayError {
    fn from(err: JsonError) -> Self {
        Self::provider(format!("malformed JSON from identity provider: {err}"))
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        Self::storage(err.to_string())
    }
}

/// Categories of gateway errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed callback or state mismatch.
    Protocol,
    /// Bad or unusable response from the identity provider.
    Provider,
    /// TLS / socket level failure.
    Transport,
    /// Session store unavailable.
    Storage,
    /// Invalid configuration.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol => write!(f, "protocol"),
            Self::Provider => write!(f, "provider"),
            Self::Transport => write!(f, "transport"),
            Self::Storage => write!(f, "storage"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
