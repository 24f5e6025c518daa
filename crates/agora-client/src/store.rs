//! Session persistence.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::session::Session;

/// Where the signed-in session survives restarts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the stored session, if any.
    async fn load(&self) -> ClientResult<Option<Session>>;

    /// Replace the stored session.
    async fn save(&self, session: &Session) -> ClientResult<()>;

    /// Forget the stored session.
    async fn clear(&self) -> ClientResult<()>;
}

/// Process-local store; nothing outlives the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    /// Store pre-seeded with `session`.
    #[must_use]
    pub fn with_session(session: Session) -> Self {
        Self {
            slot: Mutex::new(Some(session)),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> ClientResult<Option<Session>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn save(&self, session: &Session) -> ClientResult<()> {
        *self.slot.lock().await = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> ClientResult<()> {
        self.slot.lock().await.take();
        Ok(())
    }
}

/// JSON file store. Writes land in a sibling temp file first and are renamed
/// into place so a crash never leaves a half-written session.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Store backed by `path`; parent directories are created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the session file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn storage_error(&self, operation: &'static str, source: std::io::Error) -> ClientError {
        ClientError::Storage {
            operation,
            path: Some(self.path.clone()),
            source,
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> ClientResult<Option<Session>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.storage_error("session_store.load", err)),
        };
        let session = serde_json::from_slice(&bytes).map_err(|source| ClientError::StorageFormat {
            operation: "session_store.load",
            source,
        })?;
        Ok(Some(session))
    }

    async fn save(&self, session: &Session) -> ClientResult<()> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| self.storage_error("session_store.save", err))?;
        }
        let json = serde_json::to_vec_pretty(session).map_err(|source| {
            ClientError::StorageFormat {
                operation: "session_store.save",
                source,
            }
        })?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, json)
            .await
            .map_err(|err| self.storage_error("session_store.save", err))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|err| self.storage_error("session_store.save", err))?;
        debug!(path = %self.path.display(), "session persisted");
        Ok(())
    }

    async fn clear(&self) -> ClientResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.storage_error("session_store.clear", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn session() -> Session {
        Session {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).single().unwrap_or_default(),
            user_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn file_store_round_trips_and_clears() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileSessionStore::new(dir.path().join("nested").join("session.json"));
        assert_eq!(store.load().await?, None);

        let session = session();
        store.save(&session).await?;
        assert_eq!(store.load().await?, Some(session));
        assert!(!store.temp_path().exists());

        store.clear().await?;
        assert_eq!(store.load().await?, None);
        store.clear().await?;
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_file_reports_storage_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not json")?;
        let err = FileSessionStore::new(&path)
            .load()
            .await
            .expect_err("corrupt file must not load");
        assert_eq!(err.kind(), ErrorKind::Storage);
        Ok(())
    }

    #[tokio::test]
    async fn memory_store_holds_one_session() -> anyhow::Result<()> {
        let store = MemorySessionStore::default();
        assert!(store.load().await?.is_none());
        store.save(&session()).await?;
        assert!(store.load().await?.is_some());
        store.clear().await?;
        assert!(store.load().await?.is_none());
        Ok(())
    }
}
