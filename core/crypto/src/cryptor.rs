//! The cryptor seam between a vault and its key material.
//!
//! A `Cryptor` is scoped to one vault. `decrypt_master_key` verifies a secret
//! against the envelope and, on success, keeps the unwrapped master key as the
//! active session until `destroy` is called.

use std::io::Read;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::aead;
use crate::envelope::{KeyEnvelope, ENVELOPE_VERSION, SUPPORTED_KEY_BITS};
use crate::kdf::derive_key;
use crate::keys::{MasterKey, KEY_LENGTH};

/// Nonce, wrapped master key and tag.
const WRAPPED_KEY_LENGTH: usize = aead::NONCE_SIZE + KEY_LENGTH + aead::TAG_SIZE;

/// Direction of an envelope version mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionMismatch {
    /// The vault was created by an older release than this software supports.
    VaultOlderThanSoftware,
    /// The vault was created by a newer release than this software.
    SoftwareOlderThanVault,
}

/// Why the master key could not be decrypted.
#[derive(Debug, Error)]
pub enum DecryptError {
    /// The secret does not match the envelope.
    #[error("wrong password")]
    WrongPassword,

    /// The envelope wraps a key size this build cannot handle.
    #[error("unsupported key length: {bits} bits")]
    UnsupportedKeyLength { bits: u32 },

    /// The envelope format version is not supported.
    #[error("unsupported vault version {found} (supported: {supported})")]
    UnsupportedVaultVersion {
        direction: VersionMismatch,
        found: u32,
        supported: u32,
    },

    /// The envelope could not be read or is malformed.
    #[error("envelope I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Secure teardown of the in-memory key failed.
#[derive(Debug, Error)]
#[error("failed to destroy key material: {0}")]
pub struct DestroyError(pub String);

/// Verifies secrets against a key envelope and holds the resulting session.
pub trait Cryptor: Send + Sync {
    /// Decrypt the master key read from `envelope` using `secret`.
    ///
    /// On success the cryptor holds an active session.
    fn decrypt_master_key(&self, envelope: &mut dyn Read, secret: &[u8])
        -> Result<(), DecryptError>;

    /// Securely discard the session's key material.
    fn destroy(&self) -> Result<(), DestroyError>;

    /// Whether key material is currently held.
    fn has_session(&self) -> bool;
}

/// Cryptor for the JSON envelope format of [`KeyEnvelope`].
#[derive(Default)]
pub struct EnvelopeCryptor {
    master_key: Mutex<Option<MasterKey>>,
}

impl EnvelopeCryptor {
    /// Create a cryptor without an active session.
    pub fn new() -> Self {
        Self::default()
    }

    fn check_format(envelope: &KeyEnvelope) -> Result<(), DecryptError> {
        if envelope.version != ENVELOPE_VERSION {
            let direction = if envelope.version < ENVELOPE_VERSION {
                VersionMismatch::VaultOlderThanSoftware
            } else {
                VersionMismatch::SoftwareOlderThanVault
            };
            return Err(DecryptError::UnsupportedVaultVersion {
                direction,
                found: envelope.version,
                supported: ENVELOPE_VERSION,
            });
        }
        if envelope.key_bits != SUPPORTED_KEY_BITS {
            return Err(DecryptError::UnsupportedKeyLength {
                bits: envelope.key_bits,
            });
        }
        if !envelope.kdf.within_limits() {
            return Err(invalid_data("KDF parameters exceed the accepted limits").into());
        }
        Ok(())
    }
}

impl Cryptor for EnvelopeCryptor {
    fn decrypt_master_key(
        &self,
        envelope: &mut dyn Read,
        secret: &[u8],
    ) -> Result<(), DecryptError> {
        let envelope = KeyEnvelope::from_reader(envelope)?;
        Self::check_format(&envelope)?;

        if secret.is_empty() {
            return Err(DecryptError::WrongPassword);
        }

        let salt = envelope.decode_salt()?;
        let wrapped = envelope.decode_wrapped_key()?;
        if wrapped.len() != WRAPPED_KEY_LENGTH {
            return Err(invalid_data("wrapped key has wrong length").into());
        }
        let kek = derive_key(secret, &salt, &envelope.kdf)
            .map_err(|e| invalid_data(e.to_string()))?;

        let unwrapped = Zeroizing::new(
            aead::decrypt(kek.as_bytes(), &wrapped).map_err(|_| DecryptError::WrongPassword)?,
        );
        let master_key = MasterKey::from_slice(&unwrapped)
            .ok_or_else(|| invalid_data("unwrapped key has wrong length"))?;

        let mut slot = self
            .master_key
            .lock()
            .map_err(|_| std::io::Error::other("cryptor state poisoned"))?;
        *slot = Some(master_key);
        debug!("Master key decrypted");
        Ok(())
    }

    fn destroy(&self) -> Result<(), DestroyError> {
        let mut slot = self
            .master_key
            .lock()
            .map_err(|e| DestroyError(e.to_string()))?;
        // MasterKey zeroizes on drop
        slot.take();
        Ok(())
    }

    fn has_session(&self) -> bool {
        self.master_key
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

fn invalid_data<E>(e: E) -> std::io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    std::io::Error::new(std::io::ErrorKind::InvalidData, e)
}
