//! Common utilities and types shared across vaultgate crates.
//!
//! This module provides foundational types that are used throughout the codebase:
//! identifiers, the sanitized mount name and the wipeable secret buffer.

pub mod error;
pub mod secret;
pub mod types;

pub use error::{Error, Result};
pub use secret::SecretBuffer;
pub use types::{MountName, VaultId};
