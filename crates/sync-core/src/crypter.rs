//! Password-based key derivation, symmetric seal/unseal, and the sealed-box
//! primitive used by the connect handshake.
//!
//! Primary key derivation is memory-hard (Argon2id) so an attacker who
//! steals a protected secret key cannot brute-force the password offline at
//! commodity cost. Subkeys are separated with HKDF using fixed 8-byte
//! contexts so the password hash sent to the server can never be replayed
//! as the key that unwraps the secret key.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::error::{Result, SyncError};

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

const CONTEXT_PASSWORD: &[u8; 8] = b"Password";
const CONTEXT_STRETCHY: &[u8; 8] = b"Stretchy";

/// Opaque 32-byte symmetric key, never logged or displayed.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey(pub [u8; KEY_LEN]);

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SymmetricKey").field(&"<redacted>").finish()
    }
}

impl SymmetricKey {
    pub fn random() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Keys produced when an account is first created.
pub struct AccountKeys {
    pub primary_key: SymmetricKey,
    pub secret_key: SymmetricKey,
    pub protected_secret_key: Vec<u8>,
    pub password_hash: SymmetricKey,
}

/// Keys reconstructed from a recovery key (no password step).
pub struct LoginInfo {
    pub password_hash: SymmetricKey,
    pub stretched_primary_key: SymmetricKey,
}

/// Ephemeral keypair generated for the connect handshake.
pub struct ConnectInfo {
    pub device_id: String,
    pub public_key: [u8; 32],
    secret: EphemeralConnectSecret,
}

/// Wraps the ephemeral X25519 secret so it can be used exactly once to
/// unseal the inbound recovery payload.
enum EphemeralConnectSecret {
    Pending(StaticSecret),
    Consumed,
}

fn derive_primary_key(user_id: &str, password: &str) -> Result<SymmetricKey> {
    let params = Params::new(19_456, 2, 1, Some(KEY_LEN))
        .map_err(|_| SyncError::FailedToCreateAccountKeys)?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password.as_bytes(), user_id.as_bytes(), &mut out)
        .map_err(|_| SyncError::FailedToCreateAccountKeys)?;
    Ok(SymmetricKey(out))
}

fn derive_subkey(primary_key: &SymmetricKey, context: &[u8; 8], id: u64) -> Result<SymmetricKey> {
    let hk = Hkdf::<Sha256>::new(None, &primary_key.0);
    let mut info = Vec::with_capacity(16);
    info.extend_from_slice(context);
    info.extend_from_slice(&id.to_le_bytes());
    let mut out = [0u8; KEY_LEN];
    hk.expand(&info, &mut out)
        .map_err(|_| SyncError::FailedToCreateAccountKeys)?;
    Ok(SymmetricKey(out))
}

/// Authenticated symmetric seal (ChaCha20-Poly1305, random 12-byte nonce
/// prepended to the ciphertext).
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.0));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: &[] })
        .map_err(|_| SyncError::FailedToSealData)?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn unseal(key: &SymmetricKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(SyncError::FailedToOpenSealedBox);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.0));
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad: &[] })
        .map_err(|_| SyncError::FailedToOpenSealedBox)
}

/// Derives the full key hierarchy for a brand new account.
pub fn create_account_keys(user_id: &str, password: &str) -> Result<AccountKeys> {
    let primary_key = derive_primary_key(user_id, password)?;
    let password_hash = derive_subkey(&primary_key, CONTEXT_PASSWORD, 1)?;
    let stretched_primary_key = derive_subkey(&primary_key, CONTEXT_STRETCHY, 2)?;
    let secret_key = SymmetricKey::random();
    let protected_secret_key = seal(&stretched_primary_key, &secret_key.0)?;
    Ok(AccountKeys {
        primary_key,
        secret_key,
        protected_secret_key,
        password_hash,
    })
}

/// Reconstructs login credentials from a recovery key's primary key,
/// skipping the password-derivation step.
pub fn extract_login_info(primary_key: &SymmetricKey) -> Result<LoginInfo> {
    let password_hash = derive_subkey(primary_key, CONTEXT_PASSWORD, 1)?;
    let stretched_primary_key = derive_subkey(primary_key, CONTEXT_STRETCHY, 2)?;
    Ok(LoginInfo {
        password_hash,
        stretched_primary_key,
    })
}

pub fn extract_secret_key(
    protected_secret_key: &[u8],
    stretched_primary_key: &SymmetricKey,
) -> Result<SymmetricKey> {
    let bytes = unseal(stretched_primary_key, protected_secret_key)?;
    if bytes.len() != KEY_LEN {
        return Err(SyncError::FailedToOpenSealedBox);
    }
    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&bytes);
    Ok(SymmetricKey(out))
}

pub fn encrypt_and_base64_encode(secret_key: &SymmetricKey, value: &str) -> Result<String> {
    let sealed = seal(secret_key, value.as_bytes())?;
    Ok(base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        sealed,
    ))
}

pub fn base64_decode_and_decrypt(secret_key: &SymmetricKey, value: &str) -> Result<String> {
    let sealed = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, value)
        .map_err(|_| SyncError::FailedToDecryptValue)?;
    let plaintext = unseal(secret_key, &sealed)?;
    String::from_utf8(plaintext).map_err(|_| SyncError::FailedToDecryptValue)
}

/// Derives a symmetric key shared between two X25519 parties via ECDH +
/// HKDF-SHA256, the same construction used to hybrid-encrypt payloads at
/// the connect handshake boundary.
fn ecdh_shared_key(our_secret: &StaticSecret, their_public: &PublicKey) -> SymmetricKey {
    let shared = our_secret.diffie_hellman(their_public);
    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut out = [0u8; KEY_LEN];
    hk.expand(b"sync-connect-handshake", &mut out)
        .expect("hkdf output length is valid for sha256");
    SymmetricKey(out)
}

/// Generates a fresh keypair for the connect handshake. The returned
/// `ConnectInfo` keeps the private half in memory only; it is never
/// persisted, and `unseal_recovery_key` consumes it exactly once.
pub fn prepare_for_connect(device_id: String) -> Result<ConnectInfo> {
    let secret = StaticSecret::random_from_rng(rand::thread_rng());
    let public_key = PublicKey::from(&secret);
    Ok(ConnectInfo {
        device_id,
        public_key: public_key.to_bytes(),
        secret: EphemeralConnectSecret::Pending(secret),
    })
}

/// Seals `plaintext` to `recipient_public_key` for the connect handshake
/// (used by the existing device when it transmits its recovery key).
pub fn seal_to_public_key(recipient_public_key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(rand::thread_rng());
    let ephemeral_public = PublicKey::from(&ephemeral);
    let recipient = PublicKey::from(*recipient_public_key);
    let shared = ephemeral.diffie_hellman(&recipient);
    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key_bytes = [0u8; KEY_LEN];
    hk.expand(b"sync-connect-handshake", &mut key_bytes)
        .map_err(|_| SyncError::FailedToSealData)?;
    let sealed = seal(&SymmetricKey(key_bytes), plaintext)?;
    let mut out = Vec::with_capacity(32 + sealed.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

impl ConnectInfo {
    /// Unseals a payload sent to this device's public key. May be called
    /// only once; a second call returns `FailedToOpenSealedBox`.
    pub fn unseal_recovery_key(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < 32 {
            return Err(SyncError::FailedToOpenSealedBox);
        }
        let secret = match std::mem::replace(&mut self.secret, EphemeralConnectSecret::Consumed) {
            EphemeralConnectSecret::Pending(secret) => secret,
            EphemeralConnectSecret::Consumed => return Err(SyncError::FailedToOpenSealedBox),
        };
        let (sender_public_bytes, sealed) = ciphertext.split_at(32);
        let mut sender_public_arr = [0u8; 32];
        sender_public_arr.copy_from_slice(sender_public_bytes);
        let sender_public = PublicKey::from(sender_public_arr);
        let key = ecdh_shared_key(&secret, &sender_public);
        unseal(&key, sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_key_round_trip_via_recovery_key() {
        let keys = create_account_keys("user-1", "correct horse battery staple").unwrap();
        let login = extract_login_info(&keys.primary_key).unwrap();
        assert_eq!(login.password_hash.0, keys.password_hash.0);
        let recovered_secret_key =
            extract_secret_key(&keys.protected_secret_key, &login.stretched_primary_key).unwrap();
        assert_eq!(recovered_secret_key.0, keys.secret_key.0);
    }

    #[test]
    fn seal_unseal_round_trip() {
        let key = SymmetricKey::random();
        let sealed = seal(&key, b"hello world").unwrap();
        let opened = unseal(&key, &sealed).unwrap();
        assert_eq!(opened, b"hello world");
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let key = SymmetricKey::random();
        let mut sealed = seal(&key, b"hello world").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(unseal(&key, &sealed).is_err());
    }

    #[test]
    fn connect_handshake_round_trip() {
        let mut connect_info = prepare_for_connect("device-a".into()).unwrap();
        let sealed = seal_to_public_key(&connect_info.public_key, b"recovery-payload").unwrap();
        let opened = connect_info.unseal_recovery_key(&sealed).unwrap();
        assert_eq!(opened, b"recovery-payload");
    }

    #[test]
    fn connect_secret_cannot_be_reused() {
        let mut connect_info = prepare_for_connect("device-a".into()).unwrap();
        let sealed = seal_to_public_key(&connect_info.public_key, b"payload").unwrap();
        connect_info.unseal_recovery_key(&sealed).unwrap();
        assert!(connect_info.unseal_recovery_key(&sealed).is_err());
    }

    #[test]
    fn encrypt_and_base64_round_trip() {
        let key = SymmetricKey::random();
        let encoded = encrypt_and_base64_encode(&key, "secret value").unwrap();
        let decoded = base64_decode_and_decrypt(&key, &encoded).unwrap();
        assert_eq!(decoded, "secret value");
    }
}
