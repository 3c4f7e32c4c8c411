//! Signup, login, token refresh, and device removal.

use std::sync::Arc;

use rand::RngCore;
use sync_core::account::{Account, AuthState, DeviceType, RecoveryKey};
use sync_core::crypter::{self, SymmetricKey, KEY_LEN};
use sync_core::error::{Result, SyncError};

use crate::client::SyncClient;
use crate::types::RegisteredDevice;

pub struct AccountManager {
    client: Arc<SyncClient>,
}

fn device_type_str(device_type: DeviceType) -> &'static str {
    match device_type {
        DeviceType::Desktop => "desktop",
        DeviceType::Mobile => "mobile",
        DeviceType::Server => "server",
    }
}

fn b64(bytes: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

fn b64_decode(value: &str) -> Result<Vec<u8>> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, value)
        .map_err(|_| SyncError::InvalidDataInResponse)
}

fn random_password() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    b64(&bytes)
}

impl AccountManager {
    pub fn new(client: Arc<SyncClient>) -> Self {
        Self { client }
    }

    pub async fn create_account(
        &self,
        device_id: String,
        device_name: String,
        device_type: DeviceType,
    ) -> Result<Account> {
        let user_id = uuid::Uuid::new_v4().to_string();
        let password = random_password();
        let keys = crypter::create_account_keys(&user_id, &password)?;
        let token = self
            .client
            .signup(
                &user_id,
                &b64(keys.password_hash.as_bytes()),
                &b64(&keys.protected_secret_key),
                &device_id,
                &device_name,
                device_type_str(device_type),
            )
            .await?;
        Ok(Account {
            device_id,
            device_name,
            device_type,
            user_id,
            primary_key: keys.primary_key.as_bytes().to_vec(),
            secret_key: keys.secret_key.as_bytes().to_vec(),
            token: Some(token),
            auth_state: AuthState::Active,
        })
    }

    /// Logging in on a new device always lands in `AddingNewDevice` so the
    /// next sync cycle performs an initial sync for every feature.
    pub async fn login(
        &self,
        recovery_key: &RecoveryKey,
        device_id: String,
        device_name: String,
        device_type: DeviceType,
    ) -> Result<(Account, Vec<RegisteredDevice>)> {
        if recovery_key.primary_key.len() != KEY_LEN {
            return Err(SyncError::InvalidRecoveryKey);
        }
        let mut primary_key_bytes = [0u8; KEY_LEN];
        primary_key_bytes.copy_from_slice(&recovery_key.primary_key);
        let primary_key = SymmetricKey(primary_key_bytes);

        let login_info = crypter::extract_login_info(&primary_key)?;
        let (token, protected_secret_key_b64, devices) = self
            .client
            .login(
                &recovery_key.user_id,
                &b64(login_info.password_hash.as_bytes()),
                &device_id,
                &device_name,
                device_type_str(device_type),
            )
            .await?;
        let protected_secret_key = b64_decode(&protected_secret_key_b64)?;
        let secret_key = crypter::extract_secret_key(&protected_secret_key, &login_info.stretched_primary_key)?;

        let account = Account {
            device_id,
            device_name,
            device_type,
            user_id: recovery_key.user_id.clone(),
            primary_key: primary_key.as_bytes().to_vec(),
            secret_key: secret_key.as_bytes().to_vec(),
            token: Some(token),
            auth_state: AuthState::AddingNewDevice,
        };
        Ok((account, devices))
    }

    pub async fn logout(&self, token: &str, device_id: &str) -> Result<()> {
        self.client.logout_device(token, device_id).await
    }

    /// Returns every device currently registered to the account's token.
    pub async fn fetch_devices(&self, token: &str) -> Result<Vec<RegisteredDevice>> {
        self.client.list_devices(token).await
    }

    /// Re-authenticates under a new device name, replacing the stored
    /// device name on the account without touching its keys or token.
    pub async fn refresh_token(&self, account: &Account, device_name: String) -> Result<Account> {
        self.client
            .update_device_name(
                account.token.as_deref().ok_or(SyncError::NoToken)?,
                &account.device_id,
                &device_name,
            )
            .await?;
        Ok(Account {
            device_name,
            ..account.clone()
        })
    }

    /// The wire contract has no dedicated "delete account" endpoint; an
    /// account is fully deleted by logging out every device the caller
    /// still knows about (typically the list returned at login).
    pub async fn delete_account(&self, token: &str, known_device_ids: &[String]) -> Result<()> {
        for device_id in known_device_ids {
            self.client.logout_device(token, device_id).await?;
        }
        Ok(())
    }
}
