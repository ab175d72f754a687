//! The managed vault and the collaborators it delegates to.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

use vaultgate_common::{MountName, Result, VaultId};
use vaultgate_crypto::Cryptor;

/// Exposes a vault's decrypted contents as a browsable filesystem.
///
/// All methods may block on external processes or I/O.
pub trait MountService: Send + Sync {
    /// Start the server that will back the mount.
    ///
    /// Returns `false` if the server could not be started.
    fn start_server(&self) -> bool;

    /// Stop the server. Stopping a server that is not running is a no-op.
    fn stop_server(&self);

    /// Mount the vault at `root` under `name`. Returns `true` when mounted.
    fn mount(&self, root: &Path, name: &MountName) -> bool;

    /// Unmount the vault mounted under `name`. Returns `true` when unmounted.
    fn unmount(&self, name: &MountName) -> bool;
}

/// Opening a view onto a mounted vault failed.
#[derive(Debug, Error)]
#[error("reveal failed: {0}")]
pub struct RevealError(pub String);

/// Opens a view (such as a file browser) onto a mounted vault.
pub trait Revealer: Send + Sync {
    /// Reveal the vault at `root`, mounted under `name`.
    fn reveal(&self, root: &Path, name: &MountName) -> std::result::Result<(), RevealError>;
}

/// One encrypted vault known to the application.
///
/// The `unlocked` flag is only changed by the unlock orchestrator.
pub struct Vault {
    id: VaultId,
    root: PathBuf,
    mount_name: RwLock<MountName>,
    mounted_as: RwLock<Option<MountName>>,
    unlocked: AtomicBool,
    cryptor: Arc<dyn Cryptor>,
    mount_service: Arc<dyn MountService>,
    revealer: Arc<dyn Revealer>,
}

impl Vault {
    /// Create a locked vault rooted at `root`.
    ///
    /// The identifier and the initial mount name are derived from the root.
    ///
    /// # Errors
    /// - Root path is empty
    pub fn new(
        root: impl Into<PathBuf>,
        cryptor: Arc<dyn Cryptor>,
        mount_service: Arc<dyn MountService>,
        revealer: Arc<dyn Revealer>,
    ) -> Result<Self> {
        let root = root.into();
        let id = VaultId::from_root(&root)?;
        let mount_name = MountName::from_root(&root);

        Ok(Self {
            id,
            root,
            mount_name: RwLock::new(mount_name),
            mounted_as: RwLock::new(None),
            unlocked: AtomicBool::new(false),
            cryptor,
            mount_service,
            revealer,
        })
    }

    /// Get the vault ID.
    pub fn id(&self) -> &VaultId {
        &self.id
    }

    /// Get the vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Last committed mount name.
    pub fn mount_name(&self) -> MountName {
        self.mount_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_mount_name(&self, name: MountName) {
        *self
            .mount_name
            .write()
            .unwrap_or_else(PoisonError::into_inner) = name;
    }

    /// Whether the vault is unlocked.
    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }

    pub(crate) fn set_unlocked(&self, unlocked: bool) {
        self.unlocked.store(unlocked, Ordering::SeqCst);
    }

    /// Cryptor scoped to this vault.
    pub fn cryptor(&self) -> &Arc<dyn Cryptor> {
        &self.cryptor
    }

    pub(crate) fn start_server(&self) -> bool {
        self.mount_service.start_server()
    }

    pub(crate) fn stop_server(&self) {
        self.mount_service.stop_server()
    }

    /// Name the vault is currently mounted under, if mounted.
    ///
    /// This can differ from [`Vault::mount_name`] when the name was edited
    /// after mounting; the new name applies to the next mount.
    pub fn mounted_name(&self) -> Option<MountName> {
        self.mounted_as
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn mount(&self, name: &MountName) -> bool {
        let mounted = self.mount_service.mount(&self.root, name);
        if mounted {
            *self
                .mounted_as
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(name.clone());
        }
        mounted
    }

    pub(crate) fn unmount(&self) -> bool {
        let name = self
            .mounted_as
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| self.mount_name());
        self.mount_service.unmount(&name)
    }

    pub(crate) fn reveal(&self, name: &MountName) -> std::result::Result<(), RevealError> {
        self.revealer.reveal(&self.root, name)
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("id", &self.id)
            .field("mount_name", &self.mount_name())
            .field("unlocked", &self.is_unlocked())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultgate_crypto::EnvelopeCryptor;

    struct NoMount;

    impl MountService for NoMount {
        fn start_server(&self) -> bool {
            true
        }
        fn stop_server(&self) {}
        fn mount(&self, _root: &Path, _name: &MountName) -> bool {
            false
        }
        fn unmount(&self, _name: &MountName) -> bool {
            true
        }
    }

    impl Revealer for NoMount {
        fn reveal(
            &self,
            _root: &Path,
            _name: &MountName,
        ) -> std::result::Result<(), RevealError> {
            Ok(())
        }
    }

    fn vault(root: &str) -> Vault {
        Vault::new(
            root,
            Arc::new(EnvelopeCryptor::new()),
            Arc::new(NoMount),
            Arc::new(NoMount),
        )
        .unwrap()
    }

    #[test]
    fn test_new_vault_is_locked() {
        let vault = vault("/vaults/Tax Records");
        assert!(!vault.is_unlocked());
        assert_eq!(vault.id().as_str(), "/vaults/Tax Records");
        assert_eq!(vault.mount_name().as_str(), "TaxRecords");
    }

    #[test]
    fn test_empty_root_fails() {
        let result = Vault::new(
            "",
            Arc::new(EnvelopeCryptor::new()),
            Arc::new(NoMount),
            Arc::new(NoMount),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_set_mount_name() {
        let vault = vault("/vaults/docs");
        vault.set_mount_name(MountName::new("work").unwrap());
        assert_eq!(vault.mount_name().as_str(), "work");
    }

    #[test]
    fn test_failed_mount_records_no_name() {
        let vault = vault("/vaults/docs");
        assert!(!vault.mount(&vault.mount_name()));
        assert!(vault.mounted_name().is_none());
    }

    #[test]
    fn test_debug_output() {
        let debug = format!("{:?}", vault("/vaults/docs"));
        assert!(debug.contains("unlocked: false"));
    }
}
