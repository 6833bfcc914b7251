//! Single-sign-on gateway core.
//!
//! This crate provides the pieces an HTTP front end needs to protect
//! resources behind an OAuth2-style identity provider:
//!
//! - **Flow**: classifies requests and drives the login redirect, callback
//!   and session checks
//! - **Sessions**: file-backed and in-memory session stores
//! - **Provider**: authorization code exchange over TLS
//! - **Transport / HTTP**: a TLS client and a minimal HTTP/1.0 exchange
//! - **JSON**: read-only member lookup on provider responses
//!
//! # Modules
//!
//! - [`config`] - Gateway and per-location configuration
//! - [`error`] - Error taxonomy
//! - [`flow`] - Authentication flow controller
//! - [`http`] - HTTP exchange and URL/cookie helpers
//! - [`json`] - JSON reader
//! - [`middleware`] - Axum middleware
//! - [`provider`] - Identity provider client
//! - [`session`] - Session records and stores
//! - [`transport`] - TLS transport

pub mod config;
pub mod error;
pub mod flow;
pub mod http;
pub mod json;
pub mod middleware;
pub mod provider;
pub mod session;
pub mod transport;

pub use config::{ConfigError, GatewayConfig, LocationPolicy, ProviderConfig};
pub use error::{ErrorCategory, GatewayError};
pub use flow::{AuthController, Decision, GatewayRequest, Identity};
pub use provider::{IdentityAssertion, IdentityProvider, OAuthProvider};
pub use session::{FileSessionStore, MemorySessionStore, SessionRecord, SessionStore, StoreError};
