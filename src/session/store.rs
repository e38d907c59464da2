//! Credential Store.
//!
//! Durable, best-effort persistence of the bearer credential and the cached
//! identity snapshot. Both records live in one document so they are always
//! written and invalidated together. Storage failures never reach callers:
//! the store logs them and keeps working from its in-memory copy for the rest
//! of the process lifetime.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use super::Identity;

/// Backing medium for the stored session document.
pub trait Storage: Send + Sync {
    fn read(&self) -> io::Result<Option<String>>;
    fn write(&self, contents: &str) -> io::Result<()>;
    fn remove(&self) -> io::Result<()>;
}

/// JSON file on disk.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn read(&self) -> io::Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, contents: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, contents)?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)
    }

    fn remove(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Process-local storage; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    contents: Mutex<Option<String>>,
}

impl Storage for MemoryStorage {
    fn read(&self) -> io::Result<Option<String>> {
        Ok(self.contents.lock().clone())
    }

    fn write(&self, contents: &str) -> io::Result<()> {
        *self.contents.lock() = Some(contents.to_string());
        Ok(())
    }

    fn remove(&self) -> io::Result<()> {
        *self.contents.lock() = None;
        Ok(())
    }
}

/// The persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub token: String,
    #[serde(default)]
    pub identity: Option<Identity>,
}

pub struct CredentialStore {
    storage: Box<dyn Storage>,
    cache: Mutex<Option<StoredSession>>,
    degraded: Mutex<bool>,
}

impl CredentialStore {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Self {
            storage,
            cache: Mutex::new(None),
            degraded: Mutex::new(false),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStorage::default()))
    }

    /// Whether a storage failure has switched this store to memory only.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.lock()
    }

    /// Persist a credential. Any cached identity is dropped because it may
    /// belong to a different account.
    pub fn save(&self, token: &str) {
        self.put(StoredSession {
            token: token.to_string(),
            identity: None,
        });
    }

    /// Persist the identity snapshot alongside the current credential.
    /// Ignored when no credential is stored.
    pub fn save_identity(&self, identity: &Identity) {
        let current = self.load_session();
        if let Some(mut session) = current {
            session.identity = Some(identity.clone());
            self.put(session);
        }
    }

    pub fn load(&self) -> Option<String> {
        self.load_session().map(|s| s.token)
    }

    pub fn load_session(&self) -> Option<StoredSession> {
        if self.is_degraded() {
            return self.cache.lock().clone();
        }

        let raw = match self.storage.read() {
            Ok(raw) => raw,
            Err(e) => {
                self.degrade("read", &e);
                return self.cache.lock().clone();
            }
        };

        let session = raw.and_then(|raw| match serde_json::from_str::<StoredSession>(&raw) {
            Ok(s) if !s.token.trim().is_empty() => Some(s),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable stored session");
                None
            }
        });
        *self.cache.lock() = session.clone();
        session
    }

    pub fn clear(&self) {
        *self.cache.lock() = None;
        if self.is_degraded() {
            return;
        }
        if let Err(e) = self.storage.remove() {
            self.degrade("remove", &e);
        }
    }

    fn put(&self, session: StoredSession) {
        *self.cache.lock() = Some(session.clone());
        if self.is_degraded() {
            return;
        }

        let encoded = match serde_json::to_string(&session) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode session for storage");
                return;
            }
        };
        if let Err(e) = self.storage.write(&encoded) {
            self.degrade("write", &e);
        }
    }

    fn degrade(&self, op: &str, err: &io::Error) {
        let mut degraded = self.degraded.lock();
        if !*degraded {
            tracing::warn!(
                op,
                error = %err,
                "Session storage unavailable, keeping the session in memory only"
            );
        }
        *degraded = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use crate::testing::FlakyStorage;

    fn identity() -> Identity {
        Identity {
            id: 9,
            email: "nine@example.com".to_string(),
            role: Role::Customer,
            name: None,
        }
    }

    #[test]
    fn test_save_load_clear() {
        let store = CredentialStore::in_memory();
        assert_eq!(store.load(), None);

        store.save("tok-1");
        assert_eq!(store.load().as_deref(), Some("tok-1"));

        store.save_identity(&identity());
        assert_eq!(store.load_session().unwrap().identity, Some(identity()));

        store.clear();
        assert_eq!(store.load(), None);
        assert_eq!(store.load_session(), None);
    }

    #[test]
    fn test_new_credential_drops_cached_identity() {
        let store = CredentialStore::in_memory();
        store.save("tok-1");
        store.save_identity(&identity());
        store.save("tok-2");
        assert_eq!(store.load_session().unwrap().identity, None);
    }

    #[test]
    fn test_identity_without_credential_is_ignored() {
        let store = CredentialStore::in_memory();
        store.save_identity(&identity());
        assert_eq!(store.load_session(), None);
    }

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let store = CredentialStore::new(Box::new(FileStorage::new(&path)));
        store.save("tok-file");
        store.save_identity(&identity());

        let reopened = CredentialStore::new(Box::new(FileStorage::new(&path)));
        let session = reopened.load_session().unwrap();
        assert_eq!(session.token, "tok-file");
        assert_eq!(session.identity, Some(identity()));

        reopened.clear();
        assert!(!path.exists());
        reopened.clear();
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = CredentialStore::new(Box::new(FileStorage::new(&path)));
        assert_eq!(store.load(), None);
        assert!(!store.is_degraded());
    }

    #[test]
    fn test_storage_failure_degrades_to_memory() {
        let storage = FlakyStorage::failing();
        let store = CredentialStore::new(Box::new(storage));

        store.save("tok-mem");
        assert!(store.is_degraded());
        assert_eq!(store.load().as_deref(), Some("tok-mem"));

        store.clear();
        assert_eq!(store.load(), None);
    }
}
