//! The seam between the sync engine and a host feature's own data store.
//!
//! Every feature the engine carries (bookmarks, credentials, settings, ...)
//! is exposed to the queue as one `DataProvider`. The engine never inspects
//! feature payloads; it only routes them.

use crate::crypter;
use crate::error::Result;
use crate::metadata_store::SetupState;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Feature(pub String);

impl Feature {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// One opaque record a feature wants to send or has received. The payload
/// is whatever the feature already encrypted; the engine only forwards it.
#[derive(Debug, Clone)]
pub struct Syncable {
    pub id: String,
    pub payload: serde_json::Value,
    pub is_deleted: bool,
}

/// Per-feature outcome of a sync operation.
#[derive(Debug, Clone)]
pub enum SyncResult {
    NoData,
    SomeNewData,
    NewData {
        modified_ids: Vec<String>,
        deleted_ids: Vec<String>,
    },
}

impl SyncResult {
    pub fn is_empty(&self) -> bool {
        matches!(self, SyncResult::NoData)
    }
}

/// A failure for one or more features within an otherwise-successful cycle.
#[derive(Debug, Default)]
pub struct SyncOperationError {
    pub overall: Option<crate::error::SyncError>,
    pub per_feature_errors: std::collections::HashMap<String, crate::error::SyncError>,
}

impl SyncOperationError {
    pub fn is_empty(&self) -> bool {
        self.overall.is_none() && self.per_feature_errors.is_empty()
    }
}

/// Implemented once per host feature. The engine drives every method
/// sequentially for a given feature within one operation cycle; see the
/// queue's single-writer-per-feature invariant.
pub trait DataProvider: Send + Sync {
    fn feature(&self) -> Feature;

    fn feature_setup_state(&self) -> Option<SetupState>;
    fn is_feature_registered(&self) -> bool {
        self.feature_setup_state().is_some()
    }

    fn register(&self, setup_state: SetupState) -> Result<()>;
    fn deregister(&self) -> Result<()>;

    fn last_server_timestamp(&self) -> Option<String>;
    fn last_local_timestamp(&self) -> Option<String>;
    fn update_sync_timestamps(&self, server: Option<String>, local: Option<String>) -> Result<()>;

    fn prepare_for_first_sync(&self) -> Result<()>;

    /// Objects modified since `last_local_timestamp`, or all objects when
    /// no local timestamp has been recorded yet.
    fn fetch_changed_objects(&self) -> Result<Vec<Syncable>>;

    /// Merge server state with local state during initial sync, de-duplicating
    /// any object the server and the local store both hold.
    fn handle_initial_sync_response(
        &self,
        received: Vec<Syncable>,
        client_timestamp: &str,
        server_timestamp: &str,
    ) -> Result<SyncResult>;

    /// Apply server state for a regular sync cycle, assuming every object
    /// in `sent` was accepted by the server.
    fn handle_sync_response(
        &self,
        sent: &[Syncable],
        received: Vec<Syncable>,
        client_timestamp: &str,
        server_timestamp: &str,
    ) -> Result<SyncResult>;

    /// Diagnostics requested after the server reported a 400 for this feature.
    fn fetch_descriptions_for_objects_that_failed_validation(&self) -> Vec<String> {
        Vec::new()
    }

    /// A non-fatal error surfaced for this feature; never aborts siblings.
    fn handle_sync_error(&self, _error: &crate::error::SyncError) {}
}

/// Helper a `DataProvider` implementation can use to encrypt an individual
/// field before placing it into a `Syncable` payload.
pub fn encrypt_field(secret_key: &crypter::SymmetricKey, value: &str) -> Result<String> {
    crypter::encrypt_and_base64_encode(secret_key, value)
}

pub fn decrypt_field(secret_key: &crypter::SymmetricKey, value: &str) -> Result<String> {
    crypter::base64_decode_and_decrypt(secret_key, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeProvider {
        feature: Feature,
        state: Mutex<Option<SetupState>>,
        server_ts: Mutex<Option<String>>,
        local_ts: Mutex<Option<String>>,
    }

    impl DataProvider for FakeProvider {
        fn feature(&self) -> Feature {
            self.feature.clone()
        }

        fn feature_setup_state(&self) -> Option<SetupState> {
            *self.state.lock().unwrap()
        }

        fn register(&self, setup_state: SetupState) -> Result<()> {
            *self.state.lock().unwrap() = Some(setup_state);
            Ok(())
        }

        fn deregister(&self) -> Result<()> {
            *self.state.lock().unwrap() = None;
            Ok(())
        }

        fn last_server_timestamp(&self) -> Option<String> {
            self.server_ts.lock().unwrap().clone()
        }

        fn last_local_timestamp(&self) -> Option<String> {
            self.local_ts.lock().unwrap().clone()
        }

        fn update_sync_timestamps(&self, server: Option<String>, local: Option<String>) -> Result<()> {
            *self.server_ts.lock().unwrap() = server;
            *self.local_ts.lock().unwrap() = local;
            Ok(())
        }

        fn prepare_for_first_sync(&self) -> Result<()> {
            Ok(())
        }

        fn fetch_changed_objects(&self) -> Result<Vec<Syncable>> {
            Ok(Vec::new())
        }

        fn handle_initial_sync_response(
            &self,
            received: Vec<Syncable>,
            _client_timestamp: &str,
            _server_timestamp: &str,
        ) -> Result<SyncResult> {
            if received.is_empty() {
                Ok(SyncResult::NoData)
            } else {
                Ok(SyncResult::SomeNewData)
            }
        }

        fn handle_sync_response(
            &self,
            _sent: &[Syncable],
            received: Vec<Syncable>,
            _client_timestamp: &str,
            _server_timestamp: &str,
        ) -> Result<SyncResult> {
            if received.is_empty() {
                Ok(SyncResult::NoData)
            } else {
                Ok(SyncResult::SomeNewData)
            }
        }
    }

    #[test]
    fn registration_round_trips_through_the_provider() {
        let provider = FakeProvider {
            feature: Feature::new("bookmarks"),
            state: Mutex::new(None),
            server_ts: Mutex::new(None),
            local_ts: Mutex::new(None),
        };
        assert!(!provider.is_feature_registered());
        provider.register(SetupState::NeedsRemoteDataFetch).unwrap();
        assert!(provider.is_feature_registered());
        provider.deregister().unwrap();
        assert!(!provider.is_feature_registered());
    }

    #[test]
    fn no_received_objects_is_reported_as_no_data() {
        let provider = FakeProvider {
            feature: Feature::new("settings"),
            state: Mutex::new(Some(SetupState::ReadyToSync)),
            server_ts: Mutex::new(None),
            local_ts: Mutex::new(None),
        };
        let result = provider
            .handle_sync_response(&[], Vec::new(), "2024-01-01T00:00:00Z", "100")
            .unwrap();
        assert!(result.is_empty());
    }
}
