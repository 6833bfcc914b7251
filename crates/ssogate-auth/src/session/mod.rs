//! Session storage.
//!
//! A session is created once the identity provider has vouched for a user
//! and is then looked up by the opaque id carried in the authorization
//! group cookie. The [`SessionStore`] trait is independent of the storage
//! medium; [`FileSessionStore`] keeps one JSON file per session and
//! [`MemorySessionStore`] keeps everything in a concurrent map.

mod file;
mod memory;
mod record;

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;
pub use record::{SessionRecord, UID_ATTRIBUTE};

/// Number of random bytes in a session id.
const SESSION_ID_BYTES: usize = 32;

/// Length of an encoded session id (32 bytes, base64url without padding).
const SESSION_ID_LEN: usize = 43;

/// Storage trait for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new record under a freshly generated id and return the id.
    ///
    /// Never overwrites an existing record.
    async fn create(&self, record: &SessionRecord) -> Result<String, StoreError>;

    /// Load the record for `session_id`.
    ///
    /// Missing, unparsable and malformed ids all report
    /// [`StoreError::NotFound`].
    async fn read(&self, session_id: &str) -> Result<SessionRecord, StoreError>;

    /// Replace the record for an existing `session_id`.
    async fn write(&self, session_id: &str, record: &SessionRecord) -> Result<(), StoreError>;

    /// Remove the record for `session_id`. Removing a missing record is not
    /// an error.
    async fn destroy(&self, session_id: &str) -> Result<(), StoreError>;

    /// Remove every record past the given idle or absolute timeout.
    ///
    /// A zero timeout disables that check. Returns the number of records
    /// removed.
    async fn purge_expired(&self, idle: Duration, active: Duration) -> Result<usize, StoreError>;
}

/// Error type for session storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No usable record exists for the id.
    #[error("Session not found")]
    NotFound,

    /// The backing medium failed.
    #[error("Session store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Generates a 256-bit random session id, base64url encoded.
#[must_use]
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Returns `true` if `id` has the shape of a generated session id.
///
/// Anything else is rejected before it can reach a storage medium.
#[must_use]
pub fn is_well_formed_session_id(id: &str) -> bool {
    id.len() == SESSION_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
