use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;

use super::{
    SessionRecord, SessionStore, StoreError, generate_session_id, is_well_formed_session_id,
};

/// In-memory session store.
///
/// Sessions do not survive a restart. Used for single-instance deployments
/// and tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, record: &SessionRecord) -> Result<String, StoreError> {
        loop {
            let session_id = generate_session_id();
            if let Entry::Vacant(entry) = self.sessions.entry(session_id.clone()) {
                entry.insert(record.clone());
                return Ok(session_id);
            }
        }
    }

    async fn read(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        if !is_well_formed_session_id(session_id) {
            return Err(StoreError::NotFound);
        }
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn write(&self, session_id: &str, record: &SessionRecord) -> Result<(), StoreError> {
        match self.sessions.get_mut(session_id) {
            Some(mut entry) => {
                *entry = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn destroy(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.remove(session_id);
        Ok(())
    }

    async fn purge_expired(&self, idle: Duration, active: Duration) -> Result<usize, StoreError> {
        let now = OffsetDateTime::now_utc();
        let before = self.sessions.len();
        self.sessions.retain(|_, record| {
            !(record.is_idle_expired(idle, now) || record.is_absolute_expired(active, now))
        });
        Ok(before.saturating_sub(self.sessions.len()))
    }
}
