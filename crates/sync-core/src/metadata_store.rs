//! Per-feature sync setup state and timestamps.
//!
//! All reads and writes serialize through a single background worker
//! thread that owns the SQLite connection, so callers always observe a
//! committed view and two features never race each other's metadata row.

use std::sync::mpsc;
use std::thread;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetupState {
    NeedsRemoteDataFetch,
    ReadyToSync,
}

impl SetupState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::NeedsRemoteDataFetch => "needs_remote_data_fetch",
            Self::ReadyToSync => "ready_to_sync",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "ready_to_sync" => Self::ReadyToSync,
            _ => Self::NeedsRemoteDataFetch,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureMetadata {
    pub feature: String,
    pub setup_state: SetupState,
    pub last_server_timestamp: Option<String>,
    pub last_local_timestamp: Option<String>,
}

type Job = Box<dyn FnOnce(&Connection) -> Result<()> + Send>;

/// A write-serializing handle around a SQLite connection, following the
/// single-writer-actor shape used for the app sync outbox: every mutation
/// goes through one channel into one thread that owns the connection.
struct Writer {
    tx: mpsc::Sender<Job>,
    _handle: thread::JoinHandle<()>,
}

impl Writer {
    fn spawn(conn: Connection) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = thread::spawn(move || {
            while let Ok(job) = rx.recv() {
                let _ = job(&conn);
            }
        });
        Self {
            tx,
            _handle: handle,
        }
    }

    fn exec<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Connection) -> Result<()> + Send + 'static,
    {
        let (done_tx, done_rx) = mpsc::channel();
        let job: Job = Box::new(move |conn| {
            let result = f(conn);
            let _ = done_tx.send(result);
            Ok(())
        });
        self.tx
            .send(job)
            .map_err(|_| SyncError::FailedToWrite { status: -1 })?;
        done_rx
            .recv()
            .map_err(|_| SyncError::FailedToRead { status: -1 })?
    }
}

pub struct MetadataStore {
    writer: Writer,
}

impl MetadataStore {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|_| SyncError::FailedToWrite { status: -1 })?;
        Self::from_connection(conn)
    }

    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|_| SyncError::FailedToWrite { status: -1 })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS feature_metadata (
                feature TEXT PRIMARY KEY,
                setup_state TEXT NOT NULL,
                last_server_timestamp TEXT,
                last_local_timestamp TEXT
            )",
        )
        .map_err(|_| SyncError::FailedToWrite { status: -2 })?;
        Ok(Self {
            writer: Writer::spawn(conn),
        })
    }

    /// Idempotent. A feature with no prior timestamp starts out needing a
    /// remote data fetch; a feature that already has one is ready to sync.
    pub fn register(&self, feature: &str) -> Result<()> {
        let feature = feature.to_string();
        self.writer.exec(move |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT last_server_timestamp FROM feature_metadata WHERE feature = ?1",
                    [&feature],
                    |row| row.get(0),
                )
                .ok()
                .flatten();
            let state = if existing.is_some() {
                SetupState::ReadyToSync
            } else {
                SetupState::NeedsRemoteDataFetch
            };
            conn.execute(
                "INSERT INTO feature_metadata (feature, setup_state, last_server_timestamp, last_local_timestamp)
                 VALUES (?1, ?2, NULL, NULL)
                 ON CONFLICT(feature) DO NOTHING",
                rusqlite::params![feature, state.as_str()],
            )
            .map_err(|_| SyncError::FailedToWrite { status: -3 })?;
            Ok(())
        })
    }

    pub fn deregister(&self, feature: &str) -> Result<()> {
        let feature = feature.to_string();
        self.writer.exec(move |conn| {
            conn.execute(
                "DELETE FROM feature_metadata WHERE feature = ?1",
                [&feature],
            )
            .map_err(|_| SyncError::FailedToRemove { status: -1 })?;
            Ok(())
        })
    }

    /// Atomically advances a feature's state and timestamps at the end of
    /// a sync operation for that feature.
    pub fn update(
        &self,
        feature: &str,
        server_timestamp: Option<String>,
        local_timestamp: Option<String>,
        state: SetupState,
    ) -> Result<()> {
        let feature = feature.to_string();
        self.writer.exec(move |conn| {
            conn.execute(
                "UPDATE feature_metadata
                 SET setup_state = ?2, last_server_timestamp = ?3, last_local_timestamp = ?4
                 WHERE feature = ?1",
                rusqlite::params![feature, state.as_str(), server_timestamp, local_timestamp],
            )
            .map_err(|_| SyncError::FailedToWrite { status: -4 })?;
            Ok(())
        })
    }

    pub fn get(&self, feature: &str) -> Result<Option<FeatureMetadata>> {
        let feature_owned = feature.to_string();
        let (tx, rx) = mpsc::channel();
        self.writer.exec(move |conn| {
            let row = conn
                .query_row(
                    "SELECT setup_state, last_server_timestamp, last_local_timestamp
                     FROM feature_metadata WHERE feature = ?1",
                    [&feature_owned],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    },
                )
                .ok();
            let _ = tx.send((feature_owned.clone(), row));
            Ok(())
        })?;
        let (feature, row) = rx.recv().map_err(|_| SyncError::FailedToRead { status: -1 })?;
        Ok(row.map(|(state, server_ts, local_ts)| FeatureMetadata {
            feature,
            setup_state: SetupState::from_str(&state),
            last_server_timestamp: server_ts,
            last_local_timestamp: local_ts,
        }))
    }

    pub fn is_registered(&self, feature: &str) -> Result<bool> {
        Ok(self.get(feature)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_without_timestamp_needs_remote_fetch() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.register("bookmarks").unwrap();
        let meta = store.get("bookmarks").unwrap().unwrap();
        assert_eq!(meta.setup_state, SetupState::NeedsRemoteDataFetch);
    }

    #[test]
    fn update_advances_state_and_timestamps() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.register("credentials").unwrap();
        store
            .update(
                "credentials",
                Some("1700000000".into()),
                Some("1700000001".into()),
                SetupState::ReadyToSync,
            )
            .unwrap();
        let meta = store.get("credentials").unwrap().unwrap();
        assert_eq!(meta.setup_state, SetupState::ReadyToSync);
        assert_eq!(meta.last_server_timestamp.as_deref(), Some("1700000000"));
    }

    #[test]
    fn register_is_idempotent_and_preserves_existing_state() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.register("settings").unwrap();
        store
            .update("settings", Some("5".into()), Some("5".into()), SetupState::ReadyToSync)
            .unwrap();
        store.register("settings").unwrap();
        let meta = store.get("settings").unwrap().unwrap();
        assert_eq!(meta.setup_state, SetupState::ReadyToSync);
    }

    #[test]
    fn deregister_removes_the_record() {
        let store = MetadataStore::open_in_memory().unwrap();
        store.register("settings").unwrap();
        store.deregister("settings").unwrap();
        assert!(store.get("settings").unwrap().is_none());
    }
}
