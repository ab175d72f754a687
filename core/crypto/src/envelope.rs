//! On-disk key envelope format.
//!
//! The envelope is a small JSON document holding the master key wrapped with
//! a password-derived key:
//!
//! ```json
//! {
//!   "version": 3,
//!   "key_bits": 256,
//!   "kdf": { "memory_cost": 65536, "time_cost": 3, "parallelism": 4 },
//!   "salt": "<base64>",
//!   "wrapped_key": "<base64 nonce || ciphertext || tag>"
//! }
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::io::Read;

use crate::aead;
use crate::kdf::{derive_key, KdfParams};
use crate::keys::{MasterKey, Salt};
use vaultgate_common::Result;

/// Envelope format version written and understood by this software.
pub const ENVELOPE_VERSION: u32 = 3;

/// Master key size the envelope format supports.
pub const SUPPORTED_KEY_BITS: u32 = 256;

/// Serialized form of the wrapped master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEnvelope {
    /// Envelope format version.
    pub version: u32,
    /// Size of the wrapped master key in bits.
    pub key_bits: u32,
    /// KDF parameters for the key-encryption key.
    pub kdf: KdfParams,
    /// Base64 salt for the key-encryption key.
    pub salt: String,
    /// Base64 wrapped master key.
    pub wrapped_key: String,
}

impl KeyEnvelope {
    /// Wrap `master_key` with a key derived from `password`.
    ///
    /// # Errors
    /// - Password empty
    /// - KDF or encryption failure
    pub fn seal(master_key: &MasterKey, password: &[u8], kdf: KdfParams) -> Result<Self> {
        let salt = Salt::generate();
        let kek = derive_key(password, &salt, &kdf)?;
        let wrapped = aead::encrypt(kek.as_bytes(), master_key.as_bytes())?;

        Ok(Self {
            version: ENVELOPE_VERSION,
            key_bits: SUPPORTED_KEY_BITS,
            kdf,
            salt: STANDARD.encode(salt.as_bytes()),
            wrapped_key: STANDARD.encode(wrapped),
        })
    }

    /// Parse an envelope from a byte stream.
    pub fn from_reader(reader: &mut dyn Read) -> std::io::Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Serialize to pretty JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode the salt field.
    pub fn decode_salt(&self) -> std::io::Result<Salt> {
        let bytes = STANDARD.decode(&self.salt).map_err(invalid_data)?;
        Salt::from_slice(&bytes).ok_or_else(|| invalid_data("salt has wrong length"))
    }

    /// Decode the wrapped key field.
    pub fn decode_wrapped_key(&self) -> std::io::Result<Vec<u8>> {
        STANDARD.decode(&self.wrapped_key).map_err(invalid_data)
    }
}

fn invalid_data<E>(e: E) -> std::io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    std::io::Error::new(std::io::ErrorKind::InvalidData, e)
}
