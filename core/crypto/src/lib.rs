//! Cryptographic primitives and the envelope cryptor for vaultgate.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Master key wrapping using XChaCha20-Poly1305
//! - The on-disk key envelope format
//! - The `Cryptor` seam the unlock orchestrator talks to
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No secret or key material is ever logged

pub mod aead;
pub mod cryptor;
pub mod envelope;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, encrypt};
pub use cryptor::{Cryptor, DecryptError, DestroyError, EnvelopeCryptor, VersionMismatch};
pub use envelope::{KeyEnvelope, ENVELOPE_VERSION, SUPPORTED_KEY_BITS};
pub use kdf::{derive_key, KdfParams};
pub use keys::{MasterKey, Salt};
