//! Vault unlocking for vaultgate.
//!
//! This module provides:
//! - The `Vault` model and the mount/reveal collaborators it delegates to
//! - Access to the key envelope and its backup
//! - The unlock orchestrator with rollback on failed mounts
//! - Mount name editing rules
//!
//! # Architecture
//! The orchestrator sits between the presentation layer, which collects the
//! secret, and the cryptor and mount service, which do the actual work.

pub mod config;
pub mod error;
pub mod mount_name;
pub mod store;
pub mod unlock;
pub mod vault;

pub use config::{OrchestratorConfig, MASTERKEY_BACKUP_FILENAME, MASTERKEY_FILENAME};
pub use error::{ErrorCategory, UnlockError};
pub use mount_name::{MountNameField, MountNameListener};
pub use store::{EnvelopeStream, FsEnvelopeStore, KeyEnvelopeStore};
pub use unlock::{
    AttemptId, AttemptStatus, NoopListener, UnlockListener, UnlockOrchestrator, UnlockReport,
    UnlockStage, Unlocked,
};
pub use vault::{MountService, RevealError, Revealer, Vault};
