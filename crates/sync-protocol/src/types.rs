//! Wire DTOs for the sync server's account and device endpoints.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SignupRequest {
    pub user_id: String,
    pub hashed_password: String,
    pub protected_encryption_key: String,
    pub device_id: String,
    pub device_name: String,
    pub device_type: String,
}

#[derive(Debug, Deserialize)]
pub struct SignupResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub user_id: String,
    pub hashed_password: String,
    pub device_id: String,
    pub device_name: String,
    pub device_type: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub protected_encryption_key: String,
    #[serde(default)]
    pub devices: Vec<RegisteredDevice>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisteredDevice {
    pub device_id: String,
    pub device_name: String,
    pub device_type: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutDeviceRequest {
    pub device_id: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectRequest {
    pub device_id: String,
    pub sealed_recovery_key: String,
}

#[derive(Debug, Deserialize)]
pub struct ConnectPollResponse {
    pub sealed_recovery_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DevicesResponse {
    #[serde(default)]
    pub devices: Vec<RegisteredDevice>,
}

#[derive(Debug, Serialize)]
pub struct UpdateDeviceRequest {
    pub device_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorResponse {
    #[serde(default)]
    pub message: String,
}
