use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::fs;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    SessionRecord, SessionStore, StoreError, generate_session_id, is_well_formed_session_id,
};

const SESSION_EXTENSION: &str = "session";
const TEMP_EXTENSION: &str = "tmp";
const CREATE_ATTEMPTS: usize = 3;
/// Temporary files older than this are left over from a crashed write.
const STALE_TEMP_AGE: Duration = Duration::from_secs(300);

/// Session store keeping one JSON file per session in a directory.
///
/// Records are written to a temporary file in the same directory and then
/// moved into place, so a reader sees either the old or the new record.
///
/// `write`, `destroy` and the purge sweep serialize per session id, so an
/// update never brings back a destroyed record. The lock is held in
/// process: one gateway process owns a store directory.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl FileSessionStore {
    /// Opens the store, creating the directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| unavailable(&dir, &e))?;
        debug!(path = %dir.display(), "Opened file session store");
        Ok(Self {
            dir,
            locks: Arc::new(DashMap::new()),
        })
    }

    /// Directory holding the session files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.{SESSION_EXTENSION}"))
    }

    fn temp_path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!(".{session_id}.{}.{TEMP_EXTENSION}", Uuid::new_v4()))
    }

    async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_default()
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Removes the record file. The caller holds the id's lock.
    async fn remove_locked(&self, session_id: &str) -> Result<bool, StoreError> {
        let path = self.record_path(session_id);
        let removed = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(unavailable(&path, &e)),
        };
        // Only safe once the file is gone: holders of the old mutex and of a
        // fresh one both find no record.
        self.locks.remove(session_id);
        Ok(removed)
    }

    async fn purge_session(
        &self,
        session_id: &str,
        idle: Duration,
        active: Duration,
        now: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let _guard = self.lock(session_id).await;
        let expired = match self.read(session_id).await {
            Ok(record) => {
                record.is_idle_expired(idle, now) || record.is_absolute_expired(active, now)
            }
            // Unparsable records can never be used again.
            Err(StoreError::NotFound) => true,
            Err(e) => return Err(e),
        };
        if expired {
            self.remove_locked(session_id).await
        } else {
            Ok(false)
        }
    }

    async fn write_temp(&self, session_id: &str, record: &SessionRecord) -> Result<PathBuf, StoreError> {
        let data = serde_json::to_vec(record)
            .map_err(|e| StoreError::unavailable(format!("failed to serialize session: {e}")))?;
        let temp = self.temp_path(session_id);
        fs::write(&temp, data)
            .await
            .map_err(|e| unavailable(&temp, &e))?;
        Ok(temp)
    }
}

fn unavailable(path: &Path, err: &io::Error) -> StoreError {
    StoreError::unavailable(format!("{}: {err}", path.display()))
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove temporary session file");
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create(&self, record: &SessionRecord) -> Result<String, StoreError> {
        for _ in 0..CREATE_ATTEMPTS {
            let session_id = generate_session_id();
            let temp = self.write_temp(&session_id, record).await?;
            // hard_link fails if the target exists, unlike rename
            let linked = fs::hard_link(&temp, self.record_path(&session_id)).await;
            discard(&temp).await;
            match linked {
                Ok(()) => return Ok(session_id),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    warn!("Session id collision, retrying");
                }
                Err(e) => return Err(unavailable(&self.record_path(&session_id), &e)),
            }
        }
        Err(StoreError::unavailable(
            "could not allocate a unique session id",
        ))
    }

    async fn read(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        if !is_well_formed_session_id(session_id) {
            return Err(StoreError::NotFound);
        }
        let path = self.record_path(session_id);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(unavailable(&path, &e)),
        };
        serde_json::from_slice(&data).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Unparsable session record");
            StoreError::NotFound
        })
    }

    async fn write(&self, session_id: &str, record: &SessionRecord) -> Result<(), StoreError> {
        if !is_well_formed_session_id(session_id) {
            return Err(StoreError::NotFound);
        }
        let path = self.record_path(session_id);
        let _guard = self.lock(session_id).await;
        match fs::metadata(&path).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.locks.remove(session_id);
                return Err(StoreError::NotFound);
            }
            Err(e) => return Err(unavailable(&path, &e)),
        }
        let temp = self.write_temp(session_id, record).await?;
        if let Err(e) = fs::rename(&temp, &path).await {
            discard(&temp).await;
            return Err(unavailable(&path, &e));
        }
        Ok(())
    }

    async fn destroy(&self, session_id: &str) -> Result<(), StoreError> {
        if !is_well_formed_session_id(session_id) {
            return Ok(());
        }
        let _guard = self.lock(session_id).await;
        self.remove_locked(session_id).await.map(|_| ())
    }

    async fn purge_expired(&self, idle: Duration, active: Duration) -> Result<usize, StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| unavailable(&self.dir, &e))?;
        let mut removed = 0;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable(&self.dir, &e))?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };

            if name.starts_with('.') && name.ends_with(&format!(".{TEMP_EXTENSION}")) {
                remove_stale_temp(&path).await;
                continue;
            }

            let Some(session_id) = name.strip_suffix(&format!(".{SESSION_EXTENSION}")) else {
                continue;
            };
            if !is_well_formed_session_id(session_id) {
                continue;
            }
            if self.purge_session(session_id, idle, active, now).await? {
                removed += 1;
            }
        }

        Ok(removed)
    }
}

async fn remove_stale_temp(path: &Path) {
    let modified = match fs::metadata(path).await.and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(_) => return,
    };
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default();
    if age >= STALE_TEMP_AGE {
        debug!(path = %path.display(), "Removing stale temporary session file");
        discard(path).await;
    }
}
