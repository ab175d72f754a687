//! Vault layout constants and orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Primary key envelope file name in the vault root.
pub const MASTERKEY_FILENAME: &str = "masterkey.vault";

/// Backup copy of the key envelope in the vault root.
pub const MASTERKEY_BACKUP_FILENAME: &str = "masterkey.vault.bak";

/// Where users can get a release that matches their vault's format.
pub const DOWNLOADS_URL: &str = "https://github.com/vaultgate/vaultgate/releases";

/// Path of the primary key envelope of the vault at `root`.
pub fn envelope_path(root: &Path) -> PathBuf {
    root.join(MASTERKEY_FILENAME)
}

/// Path of the key envelope backup of the vault at `root`.
pub fn backup_path(root: &Path) -> PathBuf {
    root.join(MASTERKEY_BACKUP_FILENAME)
}

/// Tuning for the unlock orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Capacity of the mailbox carrying mount completions back to the
    /// control context.
    pub mailbox_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 16,
        }
    }
}
