//! The single-writer operation executor. One cycle at a time; a trigger
//! arriving mid-cycle is coalesced rather than queued twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{debug, warn};

use crate::daily_stats::DailyStats;
use crate::data_provider::{DataProvider, Feature, SyncOperationError, SyncResult, Syncable};
use crate::error::{Result, RetryClass, SyncError};
use crate::metadata_store::{MetadataStore, SetupState};
use crate::transport::{FeatureResponseEnvelope, FeatureUpdatePayload, SyncTransport};

/// A 401 (or anything else the error taxonomy classifies as requiring
/// reauth) aborts the cycle exactly like the dedicated variant, and is
/// normalized to it so every caller checks one thing.
fn is_reauth_required(err: &SyncError) -> bool {
    matches!(err, SyncError::UnauthenticatedWhileLoggedIn) || err.retry_class() == RetryClass::ReauthRequired
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Idle,
    Running,
    Suspended,
}

#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub results: HashMap<String, SyncResult>,
    pub error: SyncOperationError,
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

pub struct SyncQueue {
    metadata: Arc<MetadataStore>,
    transport: Arc<dyn SyncTransport>,
    providers: Mutex<Vec<Arc<dyn DataProvider>>>,
    state: Mutex<QueueState>,
    daily_stats: Arc<DailyStats>,
}

impl SyncQueue {
    pub fn new(metadata: Arc<MetadataStore>, transport: Arc<dyn SyncTransport>) -> Self {
        Self {
            metadata,
            transport,
            providers: Mutex::new(Vec::new()),
            state: Mutex::new(QueueState::Idle),
            daily_stats: Arc::new(DailyStats::new(Utc::now().date_naive())),
        }
    }

    pub fn register_provider(&self, provider: Arc<dyn DataProvider>) {
        self.providers.lock().unwrap().push(provider);
    }

    /// Per-feature daily error counters and total attempt counts, surfaced
    /// by the Facade to whatever publishes `DailyStats`.
    pub fn daily_stats(&self) -> Arc<DailyStats> {
        self.daily_stats.clone()
    }

    /// Registers every provider's feature in the metadata store. When
    /// `needs_remote_data_fetch` is true (a brand new account, or a login
    /// on a new device), every feature is forced back to initial-sync
    /// state even if it already had a timestamp.
    pub fn prepare_data_models_for_sync(&self, needs_remote_data_fetch: bool) -> Result<()> {
        let providers = self.providers.lock().unwrap().clone();
        for provider in providers {
            let feature = provider.feature();
            self.metadata.register(feature.name())?;
            provider.register(SetupState::NeedsRemoteDataFetch)?;
            if needs_remote_data_fetch {
                self.metadata.update(feature.name(), None, None, SetupState::NeedsRemoteDataFetch)?;
            }
        }
        Ok(())
    }

    pub fn cancel_ongoing_and_suspend(&self) {
        let mut state = self.state.lock().unwrap();
        *state = QueueState::Suspended;
    }

    pub fn resume(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == QueueState::Suspended {
            *state = QueueState::Idle;
        }
    }

    pub fn is_sync_in_progress(&self) -> bool {
        *self.state.lock().unwrap() == QueueState::Running
    }

    /// Runs one sync cycle. Returns `Ok(None)` when a cycle was already in
    /// progress (the trigger is coalesced into the running cycle) or the
    /// queue is suspended.
    pub async fn start_sync(&self, token: &str, client_timestamp: &str) -> Result<Option<CycleOutcome>> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                QueueState::Running => {
                    debug!("sync cycle already running, coalescing trigger");
                    return Ok(None);
                }
                QueueState::Suspended => {
                    debug!("sync queue suspended, dropping trigger");
                    return Ok(None);
                }
                QueueState::Idle => *state = QueueState::Running,
            }
        }

        debug!("starting sync cycle at {}", client_timestamp);
        let outcome = self.run_cycle(token, client_timestamp).await;

        {
            let mut state = self.state.lock().unwrap();
            if *state == QueueState::Running {
                *state = QueueState::Idle;
            }
        }

        match &outcome {
            Ok(outcome) if !outcome.is_success() => {
                warn!("sync cycle finished with {} feature error(s)", outcome.error.per_feature_errors.len())
            }
            Ok(_) => debug!("sync cycle finished cleanly"),
            Err(err) => warn!("sync cycle failed outright: {}", err),
        }

        outcome.map(Some)
    }

    async fn run_cycle(&self, token: &str, client_timestamp: &str) -> Result<CycleOutcome> {
        let providers = self.providers.lock().unwrap().clone();
        let mut outcome = CycleOutcome::default();
        let today = Utc::now().date_naive();
        self.daily_stats.record_attempt(today);

        let (initial, regular): (Vec<_>, Vec<_>) = providers
            .into_iter()
            .partition(|p| p.feature_setup_state() == Some(SetupState::NeedsRemoteDataFetch));

        for provider in &initial {
            if self.is_suspended() {
                break;
            }
            match self.run_initial_sync(provider.as_ref(), token, client_timestamp).await {
                Ok(result) => {
                    outcome.results.insert(provider.feature().name().to_string(), result);
                }
                Err(err) => {
                    if is_reauth_required(&err) {
                        outcome.error.overall = Some(SyncError::UnauthenticatedWhileLoggedIn);
                        return Ok(outcome);
                    }
                    self.daily_stats.record_feature_error(today, provider.feature().name(), &err);
                    provider.handle_sync_error(&err);
                    outcome
                        .error
                        .per_feature_errors
                        .insert(provider.feature().name().to_string(), err);
                }
            }
        }

        for provider in &regular {
            if self.is_suspended() {
                break;
            }
            match self.run_regular_sync(provider.as_ref(), token, client_timestamp).await {
                Ok(result) => {
                    outcome.results.insert(provider.feature().name().to_string(), result);
                }
                Err(err) => {
                    if is_reauth_required(&err) {
                        outcome.error.overall = Some(SyncError::UnauthenticatedWhileLoggedIn);
                        return Ok(outcome);
                    }
                    self.daily_stats.record_feature_error(today, provider.feature().name(), &err);
                    provider.handle_sync_error(&err);
                    outcome
                        .error
                        .per_feature_errors
                        .insert(provider.feature().name().to_string(), err);
                }
            }
        }

        Ok(outcome)
    }

    fn is_suspended(&self) -> bool {
        *self.state.lock().unwrap() == QueueState::Suspended
    }

    async fn run_initial_sync(
        &self,
        provider: &dyn DataProvider,
        token: &str,
        client_timestamp: &str,
    ) -> Result<SyncResult> {
        let feature = provider.feature();
        provider.prepare_for_first_sync()?;
        let since = provider.last_server_timestamp().unwrap_or_else(|| "0".into());
        let response = self
            .transport
            .get(token, &[(feature.name().to_string(), since)])
            .await?;
        let envelope = response
            .get(feature.name())
            .cloned()
            .unwrap_or(FeatureResponseEnvelope {
                entries: Vec::new(),
                last_modified: "0".into(),
            });
        let received = decode_entries(&envelope.entries);
        let server_timestamp = envelope.last_modified.clone();
        let result =
            provider.handle_initial_sync_response(received, client_timestamp, &server_timestamp)?;
        provider.update_sync_timestamps(Some(server_timestamp.clone()), Some(client_timestamp.to_string()))?;
        self.metadata.update(
            feature.name(),
            Some(server_timestamp),
            Some(client_timestamp.to_string()),
            SetupState::ReadyToSync,
        )?;
        provider.register(SetupState::ReadyToSync)?;
        Ok(result)
    }

    async fn run_regular_sync(
        &self,
        provider: &dyn DataProvider,
        token: &str,
        client_timestamp: &str,
    ) -> Result<SyncResult> {
        let feature = provider.feature();
        let changed = provider.fetch_changed_objects()?;
        let since = provider.last_server_timestamp().unwrap_or_else(|| "0".into());

        let response = if changed.is_empty() {
            self.transport
                .get(token, &[(feature.name().to_string(), since)])
                .await?
        } else {
            let mut updates = HashMap::new();
            updates.insert(
                feature.name().to_string(),
                FeatureUpdatePayload {
                    updates: changed.iter().map(encode_syncable).collect(),
                    modified_since: since,
                },
            );
            self.transport.patch(token, updates, client_timestamp).await?
        };

        let envelope = response
            .get(feature.name())
            .cloned()
            .unwrap_or(FeatureResponseEnvelope {
                entries: Vec::new(),
                last_modified: provider.last_server_timestamp().unwrap_or_else(|| "0".into()),
            });
        let received = decode_entries(&envelope.entries);
        let server_timestamp = envelope.last_modified.clone();
        let result = provider.handle_sync_response(
            &changed,
            received,
            client_timestamp,
            &server_timestamp,
        )?;
        provider.update_sync_timestamps(Some(server_timestamp.clone()), Some(client_timestamp.to_string()))?;
        self.metadata.update(
            feature.name(),
            Some(server_timestamp),
            Some(client_timestamp.to_string()),
            SetupState::ReadyToSync,
        )?;
        Ok(result)
    }
}

fn encode_syncable(syncable: &Syncable) -> serde_json::Value {
    serde_json::json!({
        "id": syncable.id,
        "deleted": syncable.is_deleted,
        "payload": syncable.payload,
    })
}

fn decode_entries(entries: &[serde_json::Value]) -> Vec<Syncable> {
    entries
        .iter()
        .filter_map(|entry| {
            let id = entry.get("id")?.as_str()?.to_string();
            let is_deleted = entry.get("deleted").and_then(|v| v.as_bool()).unwrap_or(false);
            let payload = entry.get("payload").cloned().unwrap_or(serde_json::Value::Null);
            Some(Syncable {
                id,
                payload,
                is_deleted,
            })
        })
        .collect()
}

#[allow(dead_code)]
fn feature_list(providers: &[Arc<dyn DataProvider>]) -> Vec<Feature> {
    providers.iter().map(|p| p.feature()).collect()
}
