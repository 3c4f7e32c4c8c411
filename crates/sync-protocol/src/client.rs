//! Authenticated HTTP client for the sync endpoints, and the
//! request/response codec that turns `SyncQueue` calls into wire bodies.

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::json;
use sync_core::config::SyncConfig;
use sync_core::error::{Result, SyncError};
use sync_core::transport::{FeatureResponseEnvelope, FeatureUpdatePayload, SyncTransport};

use crate::types::{
    ApiErrorResponse, ConnectPollResponse, ConnectRequest, DevicesResponse, LoginRequest,
    LoginResponse, LogoutDeviceRequest, RegisteredDevice, SignupRequest, SignupResponse,
    UpdateDeviceRequest,
};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub struct SyncClient {
    client: reqwest::Client,
    base_url: String,
    gzip_threshold_bytes: usize,
}

impl SyncClient {
    pub fn new(base_url: impl Into<String>, gzip_threshold_bytes: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            base_url: base_url.into(),
            gzip_threshold_bytes,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            base_url: config.base_url.clone(),
            gzip_threshold_bytes: config.gzip_threshold_bytes,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn auth_headers(&self, token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| SyncError::InvalidRecoveryKey)?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await.map_err(|_| SyncError::NoResponseBody)?;
        if !status.is_success() {
            return Err(status_to_error(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| {
            log::debug!(
                "response body decode failed, first {} chars: {}",
                MAX_LOG_BODY_CHARS,
                truncate(&body)
            );
            SyncError::UnableToDecodeResponse(e.to_string())
        })
    }

    pub async fn list_devices(&self, token: &str) -> Result<Vec<RegisteredDevice>> {
        let headers = self.auth_headers(token)?;
        let response = self
            .client
            .get(self.url("sync/devices"))
            .headers(headers)
            .send()
            .await
            .map_err(|_| SyncError::UnexpectedResponseBody)?;
        let parsed: DevicesResponse = Self::parse_response(response).await?;
        Ok(parsed.devices)
    }

    pub async fn update_device_name(&self, token: &str, device_id: &str, device_name: &str) -> Result<()> {
        let headers = self.auth_headers(token)?;
        let response = self
            .client
            .patch(self.url(&format!("sync/devices/{device_id}")))
            .headers(headers)
            .json(&UpdateDeviceRequest {
                device_name: device_name.to_string(),
            })
            .send()
            .await
            .map_err(|_| SyncError::UnexpectedResponseBody)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_to_error(status, &body))
        }
    }

    pub async fn signup(
        &self,
        user_id: &str,
        hashed_password: &str,
        protected_encryption_key: &str,
        device_id: &str,
        device_name: &str,
        device_type: &str,
    ) -> Result<String> {
        let body = SignupRequest {
            user_id: user_id.to_string(),
            hashed_password: hashed_password.to_string(),
            protected_encryption_key: protected_encryption_key.to_string(),
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            device_type: device_type.to_string(),
        };
        let response = self
            .client
            .post(self.url("sync/signup"))
            .json(&body)
            .send()
            .await
            .map_err(|_| SyncError::UnexpectedResponseBody)?;
        let parsed: SignupResponse = Self::parse_response(response).await?;
        Ok(parsed.token)
    }

    pub async fn login(
        &self,
        user_id: &str,
        hashed_password: &str,
        device_id: &str,
        device_name: &str,
        device_type: &str,
    ) -> Result<(String, String, Vec<RegisteredDevice>)> {
        let body = LoginRequest {
            user_id: user_id.to_string(),
            hashed_password: hashed_password.to_string(),
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            device_type: device_type.to_string(),
        };
        let response = self
            .client
            .post(self.url("sync/login"))
            .json(&body)
            .send()
            .await
            .map_err(|_| SyncError::UnexpectedResponseBody)?;
        let parsed: LoginResponse = Self::parse_response(response).await?;
        Ok((parsed.token, parsed.protected_encryption_key, parsed.devices))
    }

    pub async fn logout_device(&self, token: &str, device_id: &str) -> Result<()> {
        let headers = self.auth_headers(token)?;
        let response = self
            .client
            .post(self.url("sync/logout-device"))
            .headers(headers)
            .json(&LogoutDeviceRequest {
                device_id: device_id.to_string(),
            })
            .send()
            .await
            .map_err(|_| SyncError::UnexpectedResponseBody)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_to_error(status, &body))
        }
    }

    pub async fn create_connect(&self, device_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("sync/connect"))
            .json(&json!({ "device_id": device_id }))
            .send()
            .await
            .map_err(|_| SyncError::UnexpectedResponseBody)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_to_error(status, &body))
        }
    }

    pub async fn poll_connect(&self, device_id: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.url(&format!("sync/connect/{device_id}")))
            .send()
            .await
            .map_err(|_| SyncError::UnexpectedResponseBody)?;
        let parsed: ConnectPollResponse = Self::parse_response(response).await?;
        Ok(parsed.sealed_recovery_key)
    }

    pub async fn transmit_recovery_key(&self, device_id: &str, sealed_recovery_key: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("sync/connect"))
            .json(&ConnectRequest {
                device_id: device_id.to_string(),
                sealed_recovery_key: sealed_recovery_key.to_string(),
            })
            .send()
            .await
            .map_err(|_| SyncError::UnexpectedResponseBody)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_to_error(status, &body))
        }
    }

    fn maybe_gzip(&self, body: &[u8]) -> Result<(Vec<u8>, bool)> {
        if body.len() <= self.gzip_threshold_bytes {
            return Ok((body.to_vec(), false));
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(body)
            .map_err(|e| SyncError::PatchPayloadCompressionFailed(e.raw_os_error().unwrap_or(-1)))?;
        let compressed = encoder
            .finish()
            .map_err(|e| SyncError::PatchPayloadCompressionFailed(e.raw_os_error().unwrap_or(-1)))?;
        Ok((compressed, true))
    }
}

#[async_trait]
impl SyncTransport for SyncClient {
    async fn get(
        &self,
        token: &str,
        features_since: &[(String, String)],
    ) -> Result<HashMap<String, FeatureResponseEnvelope>> {
        if features_since.is_empty() {
            return Err(SyncError::NoFeaturesSpecified);
        }
        let csv = features_since
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let since = features_since
            .iter()
            .map(|(_, ts)| ts.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let headers = self.auth_headers(token)?;
        let response = self
            .client
            .get(self.url(&csv))
            .headers(headers)
            .query(&[("since", since)])
            .send()
            .await
            .map_err(|_| SyncError::UnexpectedResponseBody)?;
        Self::parse_response(response).await
    }

    async fn patch(
        &self,
        token: &str,
        updates: HashMap<String, FeatureUpdatePayload>,
        client_timestamp: &str,
    ) -> Result<HashMap<String, FeatureResponseEnvelope>> {
        if updates.is_empty() {
            return Err(SyncError::NoFeaturesSpecified);
        }
        let mut body = serde_json::Map::new();
        for (feature, payload) in &updates {
            body.insert(
                feature.clone(),
                serde_json::to_value(payload)
                    .map_err(|e| SyncError::UnableToEncodeRequestBody(e.to_string()))?,
            );
        }
        body.insert("client_timestamp".into(), json!(client_timestamp));
        let raw = serde_json::to_vec(&serde_json::Value::Object(body))
            .map_err(|e| SyncError::UnableToEncodeRequestBody(e.to_string()))?;

        let mut headers = self.auth_headers(token)?;
        let (payload, compressed) = self.maybe_gzip(&raw)?;
        if compressed {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }

        let response = self
            .client
            .patch(self.url("sync/data"))
            .headers(headers)
            .body(payload)
            .send()
            .await
            .map_err(|_| SyncError::UnexpectedResponseBody)?;
        Self::parse_response(response).await
    }
}

fn status_to_error(status: StatusCode, body: &str) -> SyncError {
    let message = serde_json::from_str::<ApiErrorResponse>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| truncate(body));
    log::warn!("sync request failed with status {}: {}", status.as_u16(), message);
    SyncError::UnexpectedStatusCode(status.as_u16())
}

/// Truncates by character count, not byte offset, so a multibyte character
/// straddling the cutoff can't produce an invalid slice.
fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_LOG_BODY_CHARS {
        return body.to_string();
    }
    let mut truncated: String = body.chars().take(MAX_LOG_BODY_CHARS).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use std::net::TcpListener;

    fn start_mock_server(status: u16, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                    body.len()
                );
                use std::io::Write as _;
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn signup_parses_token_from_success_response() {
        let base_url = start_mock_server(200, r#"{"token":"abc123"}"#);
        let client = SyncClient::new(base_url, 32 * 1024);
        let token = client
            .signup("user-1", "hash", "protected", "device-1", "laptop", "desktop")
            .await
            .unwrap();
        assert_eq!(token, "abc123");
    }

    #[tokio::test]
    async fn error_status_becomes_unexpected_status_code() {
        let base_url = start_mock_server(401, r#"{"message":"nope"}"#);
        let client = SyncClient::new(base_url, 32 * 1024);
        let err = client
            .signup("user-1", "hash", "protected", "device-1", "laptop", "desktop")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnexpectedStatusCode(401)));
    }

    #[test]
    fn small_payload_is_not_compressed() {
        let client = SyncClient::new("http://example.com", 32 * 1024);
        let (payload, compressed) = client.maybe_gzip(b"small").unwrap();
        assert!(!compressed);
        assert_eq!(payload, b"small");
    }

    #[test]
    fn large_payload_is_gzip_compressed() {
        let client = SyncClient::new("http://example.com", 8);
        let (payload, compressed) = client.maybe_gzip(&vec![b'a'; 64]).unwrap();
        assert!(compressed);
        assert_ne!(payload, vec![b'a'; 64]);
    }
}
