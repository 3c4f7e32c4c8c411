//! Error taxonomy shared by every sync component.
//!
//! Codes are part of the wire contract toward telemetry and must never be
//! renumbered once shipped; only append new variants at the end of a
//! category's range.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Retry policy class derived from an error, consulted by the sync queue
/// and the scheduler's next-trigger-retries policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

#[derive(Debug, Error)]
pub enum SyncError {
    // --- Account / setup (1000..) ---
    #[error("no auth token present")]
    NoToken,
    #[error("failed to migrate stored account: {0}")]
    FailedToMigrate(String),
    #[error("failed to load account from secure store")]
    FailedToLoadAccount,
    #[error("failed to set up sync engine: {0}")]
    FailedToSetupEngine(String),
    #[error("failed to remove account")]
    FailedToRemoveAccount,
    #[error("failed to create account keys")]
    FailedToCreateAccountKeys,
    #[error("account not found")]
    AccountNotFound,
    #[error("account already exists")]
    AccountAlreadyExists,
    #[error("invalid recovery key")]
    InvalidRecoveryKey,
    #[error("account removed: {reason}")]
    AccountRemoved { reason: String },

    // --- Protocol (2000..) ---
    #[error("no features specified for sync request")]
    NoFeaturesSpecified,
    #[error("server returned no response body")]
    NoResponseBody,
    #[error("unexpected status code: {0}")]
    UnexpectedStatusCode(u16),
    #[error("unexpected response body shape")]
    UnexpectedResponseBody,
    #[error("unable to encode request body: {0}")]
    UnableToEncodeRequestBody(String),
    #[error("unable to decode response: {0}")]
    UnableToDecodeResponse(String),
    #[error("invalid data in response")]
    InvalidDataInResponse,

    // --- Crypto (3000..) ---
    #[error("failed to encrypt value")]
    FailedToEncryptValue,
    #[error("failed to decrypt value")]
    FailedToDecryptValue,
    #[error("failed to prepare for connect")]
    FailedToPrepareForConnect,
    #[error("failed to open sealed box")]
    FailedToOpenSealedBox,
    #[error("failed to seal data")]
    FailedToSealData,

    // --- Secure store (4000..) ---
    #[error("failed to write to secure store (status {status})")]
    FailedToWrite { status: i32 },
    #[error("failed to read from secure store (status {status})")]
    FailedToRead { status: i32 },
    #[error("failed to remove from secure store (status {status})")]
    FailedToRemove { status: i32 },
    #[error("failed to decode secure store data (status {status})")]
    FailedToDecodeSecureStoreData { status: i32 },

    // --- Feature-specific (5000..) ---
    #[error("credentials metadata missing before first sync")]
    CredentialsMetadataMissingBeforeFirstSync,
    #[error("received credentials without uuid")]
    ReceivedCredentialsWithoutUuid,
    #[error("email protection username present but token missing")]
    EmailProtectionUsernamePresentButTokenMissing,
    #[error("settings metadata not present")]
    SettingsMetadataNotPresent,

    // --- Runtime (6000..) ---
    #[error("unauthenticated while logged in")]
    UnauthenticatedWhileLoggedIn,
    #[error("patch payload compression failed (code {0})")]
    PatchPayloadCompressionFailed(i32),
    #[error("failed to read user defaults")]
    FailedToReadUserDefaults,
}

impl SyncError {
    /// Stable integer code for telemetry. Never renumber an existing arm.
    pub fn code(&self) -> u32 {
        match self {
            Self::NoToken => 1000,
            Self::FailedToMigrate(_) => 1001,
            Self::FailedToLoadAccount => 1002,
            Self::FailedToSetupEngine(_) => 1003,
            Self::FailedToRemoveAccount => 1004,
            Self::FailedToCreateAccountKeys => 1005,
            Self::AccountNotFound => 1006,
            Self::AccountAlreadyExists => 1007,
            Self::InvalidRecoveryKey => 1008,
            Self::AccountRemoved { .. } => 1009,

            Self::NoFeaturesSpecified => 2000,
            Self::NoResponseBody => 2001,
            Self::UnexpectedStatusCode(_) => 2002,
            Self::UnexpectedResponseBody => 2003,
            Self::UnableToEncodeRequestBody(_) => 2004,
            Self::UnableToDecodeResponse(_) => 2005,
            Self::InvalidDataInResponse => 2006,

            Self::FailedToEncryptValue => 3000,
            Self::FailedToDecryptValue => 3001,
            Self::FailedToPrepareForConnect => 3002,
            Self::FailedToOpenSealedBox => 3003,
            Self::FailedToSealData => 3004,

            Self::FailedToWrite { .. } => 4000,
            Self::FailedToRead { .. } => 4001,
            Self::FailedToRemove { .. } => 4002,
            Self::FailedToDecodeSecureStoreData { .. } => 4003,

            Self::CredentialsMetadataMissingBeforeFirstSync => 5000,
            Self::ReceivedCredentialsWithoutUuid => 5001,
            Self::EmailProtectionUsernamePresentButTokenMissing => 5002,
            Self::SettingsMetadataNotPresent => 5003,

            Self::UnauthenticatedWhileLoggedIn => 6000,
            Self::PatchPayloadCompressionFailed(_) => 6001,
            Self::FailedToReadUserDefaults => 6002,
        }
    }

    /// HTTP status if this error carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatusCode(status) => Some(*status),
            _ => None,
        }
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::UnexpectedStatusCode(status) => match *status {
                401 | 403 => RetryClass::ReauthRequired,
                408 | 409 | 418 | 423 | 425 | 429 => RetryClass::Retryable,
                500..=599 => RetryClass::Retryable,
                _ => RetryClass::Permanent,
            },
            Self::UnauthenticatedWhileLoggedIn => RetryClass::ReauthRequired,
            Self::NoResponseBody | Self::UnableToDecodeResponse(_) => RetryClass::Retryable,
            _ => RetryClass::Permanent,
        }
    }

    /// True when the server rejected a PATCH as too large.
    pub fn is_request_size_limit_exceeded(&self) -> bool {
        matches!(self, Self::UnexpectedStatusCode(413))
    }

    /// True when the server reports the per-feature object limit was hit.
    pub fn is_object_limit_exceeded(&self) -> bool {
        matches!(self, Self::UnexpectedStatusCode(409))
    }

    /// True when the server rate-limited the request.
    pub fn is_too_many_requests(&self) -> bool {
        matches!(self, Self::UnexpectedStatusCode(418) | Self::UnexpectedStatusCode(429))
    }

    /// True when the server rejected the payload as invalid.
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::UnexpectedStatusCode(400))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_across_categories() {
        assert_eq!(SyncError::NoToken.code(), 1000);
        assert_eq!(SyncError::NoFeaturesSpecified.code(), 2000);
        assert_eq!(SyncError::FailedToEncryptValue.code(), 3000);
        assert_eq!(SyncError::FailedToWrite { status: 1 }.code(), 4000);
        assert_eq!(SyncError::SettingsMetadataNotPresent.code(), 5003);
        assert_eq!(SyncError::UnauthenticatedWhileLoggedIn.code(), 6000);
    }

    #[test]
    fn unauthenticated_status_is_reauth_required() {
        let err = SyncError::UnexpectedStatusCode(401);
        assert_eq!(err.retry_class(), RetryClass::ReauthRequired);
    }

    #[test]
    fn server_error_is_retryable() {
        let err = SyncError::UnexpectedStatusCode(503);
        assert_eq!(err.retry_class(), RetryClass::Retryable);
    }

    #[test]
    fn request_size_limit_is_classified() {
        let err = SyncError::UnexpectedStatusCode(413);
        assert!(err.is_request_size_limit_exceeded());
        assert!(!err.is_object_limit_exceeded());
    }
}
