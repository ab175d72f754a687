//! Access to the persisted key envelope and its backup.

use async_trait::async_trait;
use std::io::{Cursor, Read};
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{backup_path, envelope_path, MASTERKEY_BACKUP_FILENAME};

/// Byte stream over the primary key envelope.
pub type EnvelopeStream = Box<dyn Read + Send>;

/// Reads the key envelope and maintains its backup copy.
#[async_trait]
pub trait KeyEnvelopeStore: Send + Sync {
    /// Open the primary envelope of the vault at `vault_root` for reading.
    ///
    /// # Errors
    /// - Envelope missing or unreadable
    async fn open_for_read(&self, vault_root: &Path) -> std::io::Result<EnvelopeStream>;

    /// Copy the primary envelope over the backup copy.
    ///
    /// # Preconditions
    /// - The envelope was just decrypted successfully
    ///
    /// # Postconditions
    /// - The backup equals the primary, or the previous backup is untouched
    /// - The primary is never modified
    async fn backup(&self, vault_root: &Path) -> std::io::Result<()>;
}

/// Envelope store on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsEnvelopeStore;

impl FsEnvelopeStore {
    /// Create a store.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl KeyEnvelopeStore for FsEnvelopeStore {
    async fn open_for_read(&self, vault_root: &Path) -> std::io::Result<EnvelopeStream> {
        let bytes = fs::read(envelope_path(vault_root)).await?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    async fn backup(&self, vault_root: &Path) -> std::io::Result<()> {
        let primary = envelope_path(vault_root);
        let target = backup_path(vault_root);
        let temp = vault_root.join(format!(
            ".{}.{}.tmp",
            MASTERKEY_BACKUP_FILENAME,
            Uuid::new_v4()
        ));

        let staged = async {
            fs::copy(&primary, &temp).await?;
            fs::File::open(&temp).await?.sync_all().await?;
            // Rename replaces an existing backup atomically
            fs::rename(&temp, &target).await
        }
        .await;

        if let Err(e) = staged {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove staged backup {:?}: {}", temp, cleanup);
                }
            }
            return Err(e);
        }

        debug!("Key envelope backed up to {:?}", target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_for_read() {
        let temp = TempDir::new().unwrap();
        std::fs::write(envelope_path(temp.path()), b"envelope").unwrap();

        let mut stream = FsEnvelopeStore::new().open_for_read(temp.path()).await.unwrap();
        let mut content = Vec::new();
        stream.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"envelope");
    }

    #[tokio::test]
    async fn test_open_missing_envelope_fails() {
        let temp = TempDir::new().unwrap();
        let err = FsEnvelopeStore::new()
            .open_for_read(temp.path())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_backup_overwrites_existing() {
        let temp = TempDir::new().unwrap();
        std::fs::write(envelope_path(temp.path()), b"current").unwrap();
        std::fs::write(backup_path(temp.path()), b"stale").unwrap();

        FsEnvelopeStore::new().backup(temp.path()).await.unwrap();

        assert_eq!(std::fs::read(backup_path(temp.path())).unwrap(), b"current");
        assert_eq!(std::fs::read(envelope_path(temp.path())).unwrap(), b"current");
    }

    #[tokio::test]
    async fn test_backup_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(envelope_path(temp.path()), b"current").unwrap();

        FsEnvelopeStore::new().backup(temp.path()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.ends_with(".tmp")));
    }

    #[tokio::test]
    async fn test_backup_failure_keeps_previous_backup() {
        let temp = TempDir::new().unwrap();
        std::fs::write(backup_path(temp.path()), b"previous").unwrap();

        // No primary envelope to copy
        assert!(FsEnvelopeStore::new().backup(temp.path()).await.is_err());
        assert_eq!(std::fs::read(backup_path(temp.path())).unwrap(), b"previous");
    }
}
