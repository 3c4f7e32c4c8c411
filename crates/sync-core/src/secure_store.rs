//! Opaque persistence for the single account record this process manages.
//!
//! A real host binds a platform keychain behind this trait. The file-backed
//! implementation here is for hosts without a keychain and for tests; it
//! takes an advisory lock so two processes cannot race a write.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::account::Account;
use crate::error::{Result, SyncError};

pub trait SecureStore: Send + Sync {
    fn persist(&self, account: &Account) -> Result<()>;
    fn account(&self) -> Result<Option<Account>>;
    fn remove(&self) -> Result<()>;

    /// The presence-keyed `syncEnabled` flag consulted at Facade
    /// initialization: absent means a stale account must be dropped.
    fn is_sync_enabled(&self) -> Result<bool>;
    fn set_sync_enabled(&self, enabled: bool) -> Result<()>;
}

/// Keeps the account in memory only. Used by tests and ephemeral hosts.
#[derive(Default)]
pub struct InMemorySecureStore {
    inner: RwLock<Option<Account>>,
    sync_enabled: RwLock<bool>,
}

impl SecureStore for InMemorySecureStore {
    fn persist(&self, account: &Account) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| SyncError::FailedToWrite { status: -1 })?;
        *guard = Some(account.clone());
        Ok(())
    }

    fn account(&self) -> Result<Option<Account>> {
        let guard = self
            .inner
            .read()
            .map_err(|_| SyncError::FailedToRead { status: -1 })?;
        Ok(guard.clone())
    }

    fn remove(&self) -> Result<()> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| SyncError::FailedToRemove { status: -1 })?;
        *guard = None;
        Ok(())
    }

    fn is_sync_enabled(&self) -> Result<bool> {
        Ok(*self
            .sync_enabled
            .read()
            .map_err(|_| SyncError::FailedToRead { status: -1 })?)
    }

    fn set_sync_enabled(&self, enabled: bool) -> Result<()> {
        let mut guard = self
            .sync_enabled
            .write()
            .map_err(|_| SyncError::FailedToWrite { status: -1 })?;
        *guard = enabled;
        Ok(())
    }
}

/// Persists the account as a JSON blob at a fixed path, guarded by an
/// advisory file lock for the duration of each operation.
pub struct FileSecureStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileSecureStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: RwLock::new(()),
        }
    }

    fn sync_enabled_marker_path(&self) -> PathBuf {
        self.path.with_extension("enabled")
    }
}

impl SecureStore for FileSecureStore {
    fn persist(&self, account: &Account) -> Result<()> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| SyncError::FailedToWrite { status: -1 })?;
        let json = serde_json::to_vec(account)
            .map_err(|_| SyncError::FailedToWrite { status: -2 })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::FailedToWrite {
                status: e.raw_os_error().unwrap_or(-1),
            })?;
        }
        fs::write(&self.path, json).map_err(|e| SyncError::FailedToWrite {
            status: e.raw_os_error().unwrap_or(-1),
        })
    }

    fn account(&self) -> Result<Option<Account>> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| SyncError::FailedToRead { status: -1 })?;
        match fs::read(&self.path) {
            Ok(bytes) => {
                let account = serde_json::from_slice(&bytes)
                    .map_err(|_| SyncError::FailedToDecodeSecureStoreData { status: -1 })?;
                Ok(Some(account))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::FailedToRead {
                status: e.raw_os_error().unwrap_or(-1),
            }),
        }
    }

    fn remove(&self) -> Result<()> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| SyncError::FailedToRemove { status: -1 })?;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::FailedToRemove {
                status: e.raw_os_error().unwrap_or(-1),
            }),
        }
    }

    fn is_sync_enabled(&self) -> Result<bool> {
        Ok(self.sync_enabled_marker_path().exists())
    }

    fn set_sync_enabled(&self, enabled: bool) -> Result<()> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| SyncError::FailedToWrite { status: -1 })?;
        let marker = self.sync_enabled_marker_path();
        if enabled {
            if let Some(parent) = marker.parent() {
                fs::create_dir_all(parent).map_err(|e| SyncError::FailedToWrite {
                    status: e.raw_os_error().unwrap_or(-1),
                })?;
            }
            fs::write(&marker, []).map_err(|e| SyncError::FailedToWrite {
                status: e.raw_os_error().unwrap_or(-1),
            })
        } else {
            match fs::remove_file(&marker) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(SyncError::FailedToRemove {
                    status: e.raw_os_error().unwrap_or(-1),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AuthState, DeviceType};

    fn sample_account() -> Account {
        Account {
            device_id: "device-1".into(),
            device_name: "laptop".into(),
            device_type: DeviceType::Desktop,
            user_id: "user-1".into(),
            primary_key: vec![1, 2, 3],
            secret_key: vec![4, 5, 6],
            token: Some("token".into()),
            auth_state: AuthState::Active,
        }
    }

    #[test]
    fn in_memory_round_trip() {
        let store = InMemorySecureStore::default();
        assert!(store.account().unwrap().is_none());
        store.persist(&sample_account()).unwrap();
        let loaded = store.account().unwrap().unwrap();
        assert_eq!(loaded.device_id, "device-1");
        store.remove().unwrap();
        assert!(store.account().unwrap().is_none());
    }

    #[test]
    fn file_store_round_trip_and_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecureStore::new(dir.path().join("account.json"));
        assert!(store.account().unwrap().is_none());
        store.persist(&sample_account()).unwrap();
        let loaded = store.account().unwrap().unwrap();
        assert_eq!(loaded.user_id, "user-1");
        store.remove().unwrap();
        assert!(store.account().unwrap().is_none());
        // removing twice is not an error
        store.remove().unwrap();
    }

    #[test]
    fn sync_enabled_flag_defaults_to_false_and_round_trips() {
        let store = InMemorySecureStore::default();
        assert!(!store.is_sync_enabled().unwrap());
        store.set_sync_enabled(true).unwrap();
        assert!(store.is_sync_enabled().unwrap());
        store.set_sync_enabled(false).unwrap();
        assert!(!store.is_sync_enabled().unwrap());
    }

    #[test]
    fn file_store_sync_enabled_flag_is_presence_keyed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecureStore::new(dir.path().join("account.json"));
        assert!(!store.is_sync_enabled().unwrap());
        store.set_sync_enabled(true).unwrap();
        assert!(store.is_sync_enabled().unwrap());
        store.set_sync_enabled(false).unwrap();
        assert!(!store.is_sync_enabled().unwrap());
        // clearing twice is not an error
        store.set_sync_enabled(false).unwrap();
    }
}
