//! The top-level object a host embeds: owns the account's lifecycle and
//! tears the account down whenever the server reports the token is no
//! longer valid.

use std::sync::{Arc, Mutex};

use sync_core::account::{Account, AuthState, ConnectCode, DeviceType, RecoveryKey};
use sync_core::crypter::ConnectInfo;
use sync_core::daily_stats::DailyStats;
use sync_core::error::{Result, RetryClass, SyncError};
use sync_core::secure_store::SecureStore;
use sync_core::sync_queue::{CycleOutcome, SyncQueue};

use crate::account_manager::AccountManager;
use crate::connect::ConnectBroker;
use crate::types::RegisteredDevice;

struct PendingConnect {
    device_id: String,
    device_name: String,
    device_type: DeviceType,
    connect_info: ConnectInfo,
}

pub struct Facade {
    secure_store: Arc<dyn SecureStore>,
    account_manager: AccountManager,
    connect_broker: Arc<ConnectBroker>,
    queue: Arc<SyncQueue>,
    account: Mutex<Option<Account>>,
    pending_connect: Mutex<Option<PendingConnect>>,
}

impl Facade {
    /// Reads the persisted `syncEnabled` flag before trusting whatever the
    /// secure store otherwise holds. Its absence means sync was never
    /// (or is no longer) turned on for this install, so any account
    /// found alongside it is stale and is dropped rather than loaded.
    pub fn new(
        secure_store: Arc<dyn SecureStore>,
        account_manager: AccountManager,
        connect_broker: Arc<ConnectBroker>,
        queue: Arc<SyncQueue>,
    ) -> Result<Self> {
        let account = if secure_store.is_sync_enabled()? {
            secure_store.account()?
        } else {
            secure_store.remove()?;
            None
        };
        Ok(Self {
            secure_store,
            account_manager,
            connect_broker,
            queue,
            account: Mutex::new(account),
            pending_connect: Mutex::new(None),
        })
    }

    pub fn auth_state(&self) -> AuthState {
        self.account
            .lock()
            .unwrap()
            .as_ref()
            .map(|a| a.auth_state)
            .unwrap_or(AuthState::Inactive)
    }

    pub fn account_snapshot(&self) -> Option<Account> {
        self.account.lock().unwrap().clone()
    }

    pub fn daily_stats(&self) -> Arc<DailyStats> {
        self.queue.daily_stats()
    }

    /// Converts a reauth-required error into the canonical variant and
    /// tears the account down; any other error passes through unchanged.
    fn teardown_on_reauth(&self, err: SyncError) -> SyncError {
        let reauth_required =
            matches!(err, SyncError::UnauthenticatedWhileLoggedIn) || err.retry_class() == RetryClass::ReauthRequired;
        if !reauth_required {
            return err;
        }
        self.queue.cancel_ongoing_and_suspend();
        let _ = self.secure_store.set_sync_enabled(false);
        let _ = self.secure_store.remove();
        *self.account.lock().unwrap() = None;
        SyncError::UnauthenticatedWhileLoggedIn
    }

    pub async fn create_account(&self, device_id: String, device_name: String, device_type: DeviceType) -> Result<()> {
        let account = self
            .account_manager
            .create_account(device_id, device_name, device_type)
            .await
            .map_err(|e| self.teardown_on_reauth(e))?;
        self.secure_store.persist(&account)?;
        self.secure_store.set_sync_enabled(true)?;
        *self.account.lock().unwrap() = Some(account);
        self.queue.prepare_data_models_for_sync(false)?;
        Ok(())
    }

    pub async fn login(
        &self,
        recovery_key: RecoveryKey,
        device_id: String,
        device_name: String,
        device_type: DeviceType,
    ) -> Result<()> {
        let (account, _devices) = self
            .account_manager
            .login(&recovery_key, device_id, device_name, device_type)
            .await
            .map_err(|e| self.teardown_on_reauth(e))?;
        self.secure_store.persist(&account)?;
        self.secure_store.set_sync_enabled(true)?;
        *self.account.lock().unwrap() = Some(account);
        // A login always needs a full remote fetch for every feature.
        self.queue.prepare_data_models_for_sync(true)?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        let account = self.account.lock().unwrap().clone();
        if let Some(account) = account {
            if let Some(token) = &account.token {
                let _ = self.account_manager.logout(token, &account.device_id).await;
            }
        }
        self.queue.cancel_ongoing_and_suspend();
        self.secure_store.set_sync_enabled(false)?;
        self.secure_store.remove()?;
        *self.account.lock().unwrap() = None;
        Ok(())
    }

    /// Logs a single device out of the account. Disconnecting the calling
    /// device itself is equivalent to `disconnect`; disconnecting any
    /// other device leaves this device's own session untouched.
    pub async fn disconnect_device(&self, device_id: &str) -> Result<()> {
        let own_device_id = self.account.lock().unwrap().as_ref().map(|a| a.device_id.clone());
        if own_device_id.as_deref() == Some(device_id) {
            return self.disconnect().await;
        }
        let token = {
            let account = self.account.lock().unwrap();
            account.as_ref().and_then(|a| a.token.clone()).ok_or(SyncError::NoToken)?
        };
        self.account_manager
            .logout(&token, device_id)
            .await
            .map_err(|e| self.teardown_on_reauth(e))
    }

    pub async fn delete_account(&self, known_device_ids: &[String]) -> Result<()> {
        let account = self.account.lock().unwrap().clone();
        if let Some(account) = account {
            if let Some(token) = &account.token {
                self.account_manager
                    .delete_account(token, known_device_ids)
                    .await
                    .map_err(|e| self.teardown_on_reauth(e))?;
            }
        }
        self.queue.cancel_ongoing_and_suspend();
        self.secure_store.set_sync_enabled(false)?;
        self.secure_store.remove()?;
        *self.account.lock().unwrap() = None;
        Ok(())
    }

    pub async fn fetch_devices(&self) -> Result<Vec<RegisteredDevice>> {
        let token = {
            let account = self.account.lock().unwrap();
            account.as_ref().and_then(|a| a.token.clone()).ok_or(SyncError::NoToken)?
        };
        self.account_manager
            .fetch_devices(&token)
            .await
            .map_err(|e| self.teardown_on_reauth(e))
    }

    pub async fn update_device_name(&self, device_name: String) -> Result<()> {
        let current = self.account.lock().unwrap().clone().ok_or(SyncError::NoToken)?;
        let updated = self
            .account_manager
            .refresh_token(&current, device_name)
            .await
            .map_err(|e| self.teardown_on_reauth(e))?;
        self.secure_store.persist(&updated)?;
        *self.account.lock().unwrap() = Some(updated);
        Ok(())
    }

    /// A change of server environment invalidates every key and token
    /// derived against the old one, so the local account is purged
    /// unconditionally; the host must reconstruct the Facade against a
    /// client pointed at the new environment before calling anything else.
    pub fn update_server_environment(&self) -> Result<()> {
        self.queue.cancel_ongoing_and_suspend();
        self.secure_store.set_sync_enabled(false)?;
        self.secure_store.remove()?;
        *self.account.lock().unwrap() = None;
        Ok(())
    }

    /// Phase one of connecting a new device: generates the code the new
    /// device shows (or scans) and starts the poll state, without
    /// blocking on the handshake completing.
    pub async fn remote_connect(
        &self,
        device_id: String,
        device_name: String,
        device_type: DeviceType,
    ) -> Result<ConnectCode> {
        let (code, connect_info) = self.connect_broker.prepare_for_connect(device_id.clone()).await?;
        *self.pending_connect.lock().unwrap() = Some(PendingConnect {
            device_id,
            device_name,
            device_type,
            connect_info,
        });
        Ok(code)
    }

    /// Phase two: blocks until the existing device transmits the sealed
    /// recovery key, then logs in with it exactly as `login` would.
    pub async fn await_remote_connect(&self) -> Result<()> {
        let pending = self.pending_connect.lock().unwrap().take().ok_or(SyncError::FailedToPrepareForConnect)?;
        let recovery_key = self
            .connect_broker
            .poll_for_recovery_key(&pending.device_id, pending.connect_info)
            .await?;
        self.login(recovery_key, pending.device_id, pending.device_name, pending.device_type)
            .await
    }

    pub fn cancel_remote_connect(&self) {
        self.connect_broker.stop_polling();
        *self.pending_connect.lock().unwrap() = None;
    }

    /// Called on the already-logged-in device once it scans a peer's
    /// `ConnectCode`: seals this account's recovery key to the peer and
    /// transmits it so the peer can complete `await_remote_connect`.
    pub async fn transmit_recovery_key(&self, code: ConnectCode) -> Result<()> {
        let account = self.account.lock().unwrap().clone().ok_or(SyncError::NoToken)?;
        let recovery_key = RecoveryKey {
            user_id: account.user_id,
            primary_key: account.primary_key,
        };
        self.connect_broker.transmit_recovery_key(&code, &recovery_key).await
    }

    /// Runs one sync cycle for the current account. A 401 from any feature
    /// tears the account down entirely and is re-raised as
    /// `UnauthenticatedWhileLoggedIn`, per the 401-teardown invariant.
    pub async fn run_sync(&self, client_timestamp: &str) -> Result<Option<CycleOutcome>> {
        let token = {
            let account = self.account.lock().unwrap();
            match account.as_ref().and_then(|a| a.token.clone()) {
                Some(token) => token,
                None => return Err(SyncError::NoToken),
            }
        };

        let outcome = self.queue.start_sync(&token, client_timestamp).await?;
        if let Some(outcome) = &outcome {
            if matches!(outcome.error.overall, Some(SyncError::UnauthenticatedWhileLoggedIn)) {
                self.queue.cancel_ongoing_and_suspend();
                let _ = self.secure_store.set_sync_enabled(false);
                self.secure_store.remove()?;
                *self.account.lock().unwrap() = None;
                return Err(SyncError::UnauthenticatedWhileLoggedIn);
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SyncClient;
    use sync_core::metadata_store::MetadataStore;
    use sync_core::secure_store::InMemorySecureStore;

    fn facade() -> Facade {
        let secure_store = Arc::new(InMemorySecureStore::default());
        let client = Arc::new(SyncClient::new("http://127.0.0.1:1", 32 * 1024));
        let account_manager = AccountManager::new(client.clone());
        let connect_broker = Arc::new(ConnectBroker::new(client.clone()));
        let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());
        let queue = Arc::new(SyncQueue::new(metadata, client));
        Facade::new(secure_store, account_manager, connect_broker, queue).unwrap()
    }

    #[test]
    fn fresh_facade_with_no_stored_account_is_inactive() {
        let facade = facade();
        assert_eq!(facade.auth_state(), AuthState::Inactive);
    }

    #[test]
    fn a_stored_account_without_sync_enabled_is_dropped_at_init() {
        let secure_store = Arc::new(InMemorySecureStore::default());
        secure_store
            .persist(&Account {
                device_id: "device-1".into(),
                device_name: "laptop".into(),
                device_type: DeviceType::Desktop,
                user_id: "user-1".into(),
                primary_key: vec![1, 2, 3],
                secret_key: vec![4, 5, 6],
                token: Some("token".into()),
                auth_state: AuthState::Active,
            })
            .unwrap();
        let client = Arc::new(SyncClient::new("http://127.0.0.1:1", 32 * 1024));
        let account_manager = AccountManager::new(client.clone());
        let connect_broker = Arc::new(ConnectBroker::new(client.clone()));
        let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());
        let queue = Arc::new(SyncQueue::new(metadata, client));
        let facade = Facade::new(secure_store.clone(), account_manager, connect_broker, queue).unwrap();
        assert_eq!(facade.auth_state(), AuthState::Inactive);
        assert!(secure_store.account().unwrap().is_none());
    }

    #[tokio::test]
    async fn run_sync_without_an_account_fails_with_no_token() {
        let facade = facade();
        let result = facade.run_sync("2024-01-01T00:00:00Z").await;
        assert!(matches!(result, Err(SyncError::NoToken)));
    }

    #[tokio::test]
    async fn update_server_environment_purges_the_local_account() {
        let secure_store = Arc::new(InMemorySecureStore::default());
        secure_store.set_sync_enabled(true).unwrap();
        secure_store
            .persist(&Account {
                device_id: "device-1".into(),
                device_name: "laptop".into(),
                device_type: DeviceType::Desktop,
                user_id: "user-1".into(),
                primary_key: vec![1, 2, 3],
                secret_key: vec![4, 5, 6],
                token: Some("token".into()),
                auth_state: AuthState::Active,
            })
            .unwrap();
        let client = Arc::new(SyncClient::new("http://127.0.0.1:1", 32 * 1024));
        let account_manager = AccountManager::new(client.clone());
        let connect_broker = Arc::new(ConnectBroker::new(client.clone()));
        let metadata = Arc::new(MetadataStore::open_in_memory().unwrap());
        let queue = Arc::new(SyncQueue::new(metadata, client));
        let facade = Facade::new(secure_store.clone(), account_manager, connect_broker, queue).unwrap();
        assert_eq!(facade.auth_state(), AuthState::Active);

        facade.update_server_environment().unwrap();
        assert_eq!(facade.auth_state(), AuthState::Inactive);
        assert!(secure_store.account().unwrap().is_none());
        assert!(!secure_store.is_sync_enabled().unwrap());
    }
}
