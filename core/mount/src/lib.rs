//! Mount and reveal collaborators for vaultgate.
//!
//! The unlock orchestrator only needs a `MountService` and a `Revealer`.
//! This crate provides implementations driven by external commands, so any
//! mount mechanism available on the host (WebDAV, FUSE helpers, bind mounts)
//! can be plugged in through configuration.

pub mod command;
pub mod reveal;
pub mod settings;

pub use command::CommandMountService;
pub use reveal::OpenRevealer;
pub use settings::MountSettings;
