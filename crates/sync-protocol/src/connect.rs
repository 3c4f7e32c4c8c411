//! The connect handshake: one device shows a code, the other polls until
//! the existing device delivers its sealed recovery key.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sync_core::account::{ConnectCode, RecoveryKey};
use sync_core::crypter;
use sync_core::error::{Result, SyncError};

use crate::client::SyncClient;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_POLL_BUDGET: u32 = 150; // ~5 minutes at the default interval

pub struct ConnectBroker {
    client: Arc<SyncClient>,
    cancelled: Arc<AtomicBool>,
}

impl ConnectBroker {
    pub fn new(client: Arc<SyncClient>) -> Self {
        Self {
            client,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_polling(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Generates an ephemeral keypair, registers it with the server, and
    /// returns the code to display (QR/text) alongside the state needed to
    /// complete the handshake.
    pub async fn prepare_for_connect(&self, device_id: String) -> Result<(ConnectCode, crypter::ConnectInfo)> {
        self.cancelled.store(false, Ordering::SeqCst);
        let connect_info = crypter::prepare_for_connect(device_id.clone())?;
        self.client.create_connect(&device_id).await?;
        let code = ConnectCode {
            device_id,
            public_key: connect_info.public_key.to_vec(),
        };
        Ok((code, connect_info))
    }

    /// Polls until the existing device transmits a sealed recovery key, the
    /// caller cancels via `stop_polling`, or the poll budget is exhausted.
    pub async fn poll_for_recovery_key(
        &self,
        device_id: &str,
        mut connect_info: crypter::ConnectInfo,
    ) -> Result<RecoveryKey> {
        self.poll_with(device_id, &mut connect_info, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_BUDGET)
            .await
    }

    async fn poll_with(
        &self,
        device_id: &str,
        connect_info: &mut crypter::ConnectInfo,
        interval: Duration,
        budget: u32,
    ) -> Result<RecoveryKey> {
        for _ in 0..budget {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(SyncError::FailedToPrepareForConnect);
            }
            if let Some(sealed_b64) = self.client.poll_connect(device_id).await? {
                let sealed = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &sealed_b64)
                    .map_err(|_| SyncError::FailedToOpenSealedBox)?;
                let plaintext = connect_info.unseal_recovery_key(&sealed)?;
                let recovery_key: RecoveryKey =
                    serde_json::from_slice(&plaintext).map_err(|_| SyncError::InvalidRecoveryKey)?;
                return Ok(recovery_key);
            }
            tokio::time::sleep(interval).await;
        }
        Err(SyncError::FailedToPrepareForConnect)
    }

    /// Called on the already-logged-in device once it scans a peer's
    /// `ConnectCode`: seals this account's recovery key to the code's
    /// public key and transmits it.
    pub async fn transmit_recovery_key(&self, code: &ConnectCode, recovery_key: &RecoveryKey) -> Result<()> {
        let mut public_key = [0u8; 32];
        if code.public_key.len() != 32 {
            return Err(SyncError::FailedToSealData);
        }
        public_key.copy_from_slice(&code.public_key);
        let plaintext =
            serde_json::to_vec(recovery_key).map_err(|e| SyncError::UnableToEncodeRequestBody(e.to_string()))?;
        let sealed = crypter::seal_to_public_key(&public_key, &plaintext)?;
        let sealed_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, sealed);
        self.client.transmit_recovery_key(&code.device_id, &sealed_b64).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poll_budget_exhausted_returns_an_error() {
        let client = Arc::new(SyncClient::new("http://127.0.0.1:1", 32 * 1024));
        let broker = ConnectBroker::new(client);
        let connect_info = crypter::prepare_for_connect("device-a".into()).unwrap();
        // budget of 0 iterations: returns immediately without making a network call.
        let result = broker
            .poll_with("device-a", &mut { connect_info }, Duration::from_millis(1), 0)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stop_polling_aborts_before_any_network_call() {
        let client = Arc::new(SyncClient::new("http://127.0.0.1:1", 32 * 1024));
        let broker = ConnectBroker::new(client);
        broker.stop_polling();
        let connect_info = crypter::prepare_for_connect("device-a".into()).unwrap();
        let result = broker
            .poll_with("device-a", &mut { connect_info }, Duration::from_millis(1), 10)
            .await;
        assert!(result.is_err());
    }
}
