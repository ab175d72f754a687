//! Reveal a mounted vault with the platform opener.

use std::path::Path;
use tracing::{debug, info};

use crate::settings::{render, MountSettings};
use vaultgate_common::MountName;
use vaultgate_vault::{RevealError, Revealer};

/// Opens the rendered reveal target in the desktop's default handler.
#[derive(Debug, Clone)]
pub struct OpenRevealer {
    target: Option<String>,
}

impl OpenRevealer {
    /// Reveal `target` after mounting. `{name}` and `{root}` are substituted.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
        }
    }

    /// Revealer that never opens anything.
    pub fn disabled() -> Self {
        Self { target: None }
    }

    /// Build from settings, honouring the `reveal` toggle.
    pub fn from_settings(settings: &MountSettings) -> Self {
        if settings.reveal {
            Self::new(settings.reveal_target.clone())
        } else {
            Self::disabled()
        }
    }

    /// What would be opened for the vault at `root` mounted as `name`.
    pub fn target_for(&self, root: &Path, name: &MountName) -> Option<String> {
        self.target
            .as_deref()
            .map(|template| render(template, Some(root), name))
    }
}

impl Revealer for OpenRevealer {
    fn reveal(&self, root: &Path, name: &MountName) -> Result<(), RevealError> {
        let Some(target) = self.target_for(root, name) else {
            debug!("Reveal disabled for {}", name);
            return Ok(());
        };

        info!("Revealing {} at {}", name, target);
        open::that(&target).map_err(|e| RevealError(format!("{}: {}", target, e)))
    }
}
