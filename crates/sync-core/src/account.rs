//! The account record and the small value types derived from it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Desktop,
    Mobile,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthState {
    Initializing,
    Inactive,
    Active,
    AddingNewDevice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub device_id: String,
    pub device_name: String,
    pub device_type: DeviceType,
    pub user_id: String,
    pub primary_key: Vec<u8>,
    pub secret_key: Vec<u8>,
    pub token: Option<String>,
    pub auth_state: AuthState,
}

impl Account {
    pub fn is_active(&self) -> bool {
        matches!(self.auth_state, AuthState::Active | AuthState::AddingNewDevice) && self.token.is_some()
    }
}

/// The portable recovery code payload: `base64(json)` with a `recovery` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryKey {
    pub user_id: String,
    pub primary_key: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecoveryEnvelope {
    recovery: RecoveryPayload,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecoveryPayload {
    user_id: String,
    primary_key: String,
}

impl RecoveryKey {
    pub fn encode(&self) -> String {
        let envelope = RecoveryEnvelope {
            recovery: RecoveryPayload {
                user_id: self.user_id.clone(),
                primary_key: base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    &self.primary_key,
                ),
            },
        };
        let json = serde_json::to_vec(&envelope).expect("recovery envelope always serializes");
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, json)
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        let json = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).ok()?;
        let envelope: RecoveryEnvelope = serde_json::from_slice(&json).ok()?;
        let primary_key = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            &envelope.recovery.primary_key,
        )
        .ok()?;
        Some(Self {
            user_id: envelope.recovery.user_id,
            primary_key,
        })
    }
}

/// The ephemeral code an existing device's screen shows to a new device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectCode {
    pub device_id: String,
    pub public_key: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConnectEnvelope {
    connect: ConnectPayload,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConnectPayload {
    device_id: String,
    secret_key: String,
}

impl ConnectCode {
    pub fn encode(&self) -> String {
        let envelope = ConnectEnvelope {
            connect: ConnectPayload {
                device_id: self.device_id.clone(),
                secret_key: base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    &self.public_key,
                ),
            },
        };
        let json = serde_json::to_vec(&envelope).expect("connect envelope always serializes");
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, json)
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        let json = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).ok()?;
        let envelope: ConnectEnvelope = serde_json::from_slice(&json).ok()?;
        let public_key = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            &envelope.connect.secret_key,
        )
        .ok()?;
        Some(Self {
            device_id: envelope.connect.device_id,
            public_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_key_round_trips_through_its_wire_format() {
        let key = RecoveryKey {
            user_id: "user-1".into(),
            primary_key: vec![9, 9, 9, 9],
        };
        let encoded = key.encode();
        let decoded = RecoveryKey::decode(&encoded).unwrap();
        assert_eq!(decoded.user_id, key.user_id);
        assert_eq!(decoded.primary_key, key.primary_key);
    }

    #[test]
    fn connect_code_round_trips_through_its_wire_format() {
        let code = ConnectCode {
            device_id: "device-9".into(),
            public_key: vec![1, 2, 3, 4, 5],
        };
        let encoded = code.encode();
        let decoded = ConnectCode::decode(&encoded).unwrap();
        assert_eq!(decoded.device_id, code.device_id);
        assert_eq!(decoded.public_key, code.public_key);
    }

    #[test]
    fn garbage_input_does_not_decode() {
        assert!(RecoveryKey::decode("not-base64-json").is_none());
    }
}
