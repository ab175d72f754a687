//! Failure taxonomy of an unlock attempt.

use thiserror::Error;

use vaultgate_common::VaultId;
use vaultgate_crypto::{DecryptError, DestroyError, VersionMismatch};

use crate::config::DOWNLOADS_URL;

/// Why an unlock attempt did not end with a mounted vault.
#[derive(Debug, Error)]
pub enum UnlockError {
    /// The secret does not match the key envelope.
    #[error("wrong password")]
    WrongPassword,

    /// The envelope needs a key size this build does not support.
    #[error("unsupported key length: {bits} bits")]
    UnsupportedKeyLength { bits: u32 },

    /// The envelope format is older or newer than this software.
    #[error("vault version {found} is not supported (supported: {supported})")]
    VaultVersionMismatch {
        direction: VersionMismatch,
        found: u32,
        supported: u32,
    },

    /// Reading the envelope or writing its backup failed.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The server backing the mount could not be started.
    #[error("server could not be started")]
    ServerStartFailed,

    /// The decrypted key material could not be destroyed.
    #[error(transparent)]
    DestroyFailed(#[from] DestroyError),

    /// The mount service reported failure.
    #[error("mount failed")]
    MountFailed,

    /// Another attempt for the same vault is still running.
    #[error("an unlock attempt for {0} is already in progress")]
    AttemptInFlight(VaultId),
}

/// How an error should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The user can fix it by entering a different secret.
    Credential,
    /// The runtime environment lacks a capability.
    Environment,
    /// Vault and software versions do not match.
    VersionMismatch,
    /// Technical failure; details go to the log only.
    Technical,
    /// The filesystem could not be mounted.
    Mount,
    /// The vault is busy with another attempt.
    Busy,
}

impl From<DecryptError> for UnlockError {
    fn from(e: DecryptError) -> Self {
        match e {
            DecryptError::WrongPassword => UnlockError::WrongPassword,
            DecryptError::UnsupportedKeyLength { bits } => UnlockError::UnsupportedKeyLength { bits },
            DecryptError::UnsupportedVaultVersion {
                direction,
                found,
                supported,
            } => UnlockError::VaultVersionMismatch {
                direction,
                found,
                supported,
            },
            DecryptError::Io(e) => UnlockError::Io(e),
        }
    }
}

impl UnlockError {
    /// Presentation category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            UnlockError::WrongPassword => ErrorCategory::Credential,
            UnlockError::UnsupportedKeyLength { .. } => ErrorCategory::Environment,
            UnlockError::VaultVersionMismatch { .. } => ErrorCategory::VersionMismatch,
            UnlockError::Io(_) | UnlockError::ServerStartFailed | UnlockError::DestroyFailed(_) => {
                ErrorCategory::Technical
            }
            UnlockError::MountFailed => ErrorCategory::Mount,
            UnlockError::AttemptInFlight(_) => ErrorCategory::Busy,
        }
    }

    /// Message for the user. Never contains raw error details.
    pub fn user_message(&self) -> &'static str {
        match self {
            UnlockError::WrongPassword => "Wrong password.",
            UnlockError::UnsupportedKeyLength { .. } => {
                "This vault uses a key length your system's cryptography provider does not support."
            }
            UnlockError::VaultVersionMismatch {
                direction: VersionMismatch::VaultOlderThanSoftware,
                ..
            } => "This vault was created by an older release and is not supported by this version.",
            UnlockError::VaultVersionMismatch {
                direction: VersionMismatch::SoftwareOlderThanVault,
                ..
            } => "This vault was created by a newer release. Please update this software.",
            UnlockError::Io(_) | UnlockError::DestroyFailed(_) => {
                "Decryption failed for technical reasons."
            }
            UnlockError::ServerStartFailed => "Failed to start the server for this vault.",
            UnlockError::MountFailed => "Failed to mount the vault.",
            UnlockError::AttemptInFlight(_) => "This vault is already being unlocked.",
        }
    }

    /// Whether the secret input should regain focus.
    pub fn should_refocus_secret(&self) -> bool {
        matches!(self, UnlockError::WrongPassword)
    }

    /// Where to get matching software, for version mismatches.
    pub fn download_url(&self) -> Option<&'static str> {
        match self {
            UnlockError::VaultVersionMismatch { .. } => Some(DOWNLOADS_URL),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mismatch(direction: VersionMismatch) -> UnlockError {
        UnlockError::VaultVersionMismatch {
            direction,
            found: 1,
            supported: 3,
        }
    }

    #[test]
    fn test_decrypt_error_mapping() {
        assert!(matches!(
            UnlockError::from(DecryptError::WrongPassword),
            UnlockError::WrongPassword
        ));
        assert!(matches!(
            UnlockError::from(DecryptError::UnsupportedKeyLength { bits: 512 }),
            UnlockError::UnsupportedKeyLength { bits: 512 }
        ));
        assert!(matches!(
            UnlockError::from(DecryptError::Io(std::io::Error::other("disk"))),
            UnlockError::Io(_)
        ));
    }

    #[test]
    fn test_version_directions_are_distinguishable() {
        let older = mismatch(VersionMismatch::VaultOlderThanSoftware);
        let newer = mismatch(VersionMismatch::SoftwareOlderThanVault);
        assert_ne!(older.user_message(), newer.user_message());
        assert_eq!(older.download_url(), Some(DOWNLOADS_URL));
        assert_eq!(newer.download_url(), Some(DOWNLOADS_URL));
        assert_eq!(older.category(), ErrorCategory::VersionMismatch);
    }

    #[test]
    fn test_only_wrong_password_refocuses() {
        assert!(UnlockError::WrongPassword.should_refocus_secret());
        assert!(!UnlockError::UnsupportedKeyLength { bits: 512 }.should_refocus_secret());
        assert!(!mismatch(VersionMismatch::VaultOlderThanSoftware).should_refocus_secret());
        assert!(!UnlockError::MountFailed.should_refocus_secret());
    }

    #[test]
    fn test_technical_messages_hide_details() {
        let err = UnlockError::Io(std::io::Error::other("/secret/path unreadable"));
        assert_eq!(err.category(), ErrorCategory::Technical);
        assert!(!err.user_message().contains("/secret/path"));
        assert!(err.download_url().is_none());

        let err = UnlockError::DestroyFailed(DestroyError("lock poisoned".to_string()));
        assert_eq!(err.category(), ErrorCategory::Technical);
        assert!(!err.user_message().contains("poisoned"));
    }

    #[test]
    fn test_credential_never_conflated_with_version() {
        assert_ne!(
            UnlockError::WrongPassword.category(),
            mismatch(VersionMismatch::SoftwareOlderThanVault).category()
        );
    }
}
