use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Profile attribute holding the user identifier.
pub const UID_ATTRIBUTE: &str = "uid";

/// Persisted state of one authenticated browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// When the identity provider vouched for the user.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Last request that validated this session.
    #[serde(with = "time::serde::rfc3339")]
    pub last_used_at: OffsetDateTime,

    /// Address prefix the session was created from.
    pub client_ip_fingerprint: String,

    /// Authorization group (cookie name) that owns the session.
    pub authorization_group: String,

    /// Profile attributes returned by the identity provider, including `uid`.
    #[serde(default)]
    pub profile: BTreeMap<String, String>,
}

impl SessionRecord {
    /// Creates a record for a freshly authenticated user.
    #[must_use]
    pub fn new(
        authorization_group: impl Into<String>,
        client_ip_fingerprint: impl Into<String>,
        uid: impl Into<String>,
        mut profile: BTreeMap<String, String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        profile.insert(UID_ATTRIBUTE.to_string(), uid.into());
        Self {
            created_at: now,
            last_used_at: now,
            client_ip_fingerprint: client_ip_fingerprint.into(),
            authorization_group: authorization_group.into(),
            profile,
        }
    }

    /// Returns the user identifier, if the record carries a non-empty one.
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.profile
            .get(UID_ATTRIBUTE)
            .map(String::as_str)
            .filter(|uid| !uid.is_empty())
    }

    /// Returns `true` if the session has been unused for longer than `idle`.
    /// A zero timeout never expires.
    #[must_use]
    pub fn is_idle_expired(&self, idle: Duration, now: OffsetDateTime) -> bool {
        !idle.is_zero() && now - self.last_used_at > idle
    }

    /// Returns `true` if the session is older than `active`. A zero timeout
    /// never expires.
    #[must_use]
    pub fn is_absolute_expired(&self, active: Duration, now: OffsetDateTime) -> bool {
        !active.is_zero() && now - self.created_at > active
    }

    /// Marks the session as used at `now`.
    pub fn touch(&mut self, now: OffsetDateTime) {
        self.last_used_at = now;
    }
}
