//! Common types used throughout vaultgate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Unique identifier for a vault.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultId(String);

impl VaultId {
    /// Create a new VaultId from a string.
    ///
    /// # Preconditions
    /// - `id` must be non-empty
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "VaultId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Derive an identifier from a vault root directory.
    pub fn from_root(root: &Path) -> crate::Result<Self> {
        Self::new(root.to_string_lossy().into_owned())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display name under which a vault is mounted.
///
/// Only ASCII alphanumeric characters are allowed and the name is never empty,
/// so it can be passed to mount commands and used as a path component as is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MountName(String);

impl MountName {
    /// Name used when nothing usable can be derived.
    pub const FALLBACK: &'static str = "vault";

    /// Whether `c` may appear in a mount name.
    pub fn is_allowed_char(c: char) -> bool {
        c.is_ascii_alphanumeric()
    }

    /// Create a mount name, rejecting empty input and disallowed characters.
    ///
    /// # Errors
    /// - Name is empty
    /// - Name contains a character other than `[A-Za-z0-9]`
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Mount name cannot be empty".to_string(),
            ));
        }
        if let Some(c) = name.chars().find(|c| !Self::is_allowed_char(*c)) {
            return Err(crate::Error::InvalidInput(format!(
                "Mount name contains invalid character {:?}",
                c
            )));
        }
        Ok(Self(name))
    }

    /// Keep only the allowed characters of `raw`.
    ///
    /// Returns `None` if nothing is left.
    pub fn sanitize(raw: &str) -> Option<Self> {
        let name: String = raw.chars().filter(|c| Self::is_allowed_char(*c)).collect();
        if name.is_empty() {
            None
        } else {
            Some(Self(name))
        }
    }

    /// Derive a default mount name from the vault's root directory name.
    pub fn from_root(root: &Path) -> Self {
        root.file_name()
            .and_then(|n| n.to_str())
            .and_then(Self::sanitize)
            .unwrap_or_else(|| Self(Self::FALLBACK.to_string()))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MountName {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<MountName> for String {
    fn from(name: MountName) -> Self {
        name.0
    }
}

impl fmt::Display for MountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
