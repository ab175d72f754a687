//! Editing a vault's mount name.
//!
//! Characters other than ASCII alphanumerics are rejected as they are typed,
//! and clearing the field restores the last committed name instead of
//! committing an empty one.

use std::sync::Arc;

use vaultgate_common::{MountName, VaultId};

use crate::vault::Vault;

/// Notified whenever a mount name is committed or restored.
pub trait MountNameListener: Send + Sync {
    /// `name` is what the field now shows and the vault now uses.
    fn mount_name_changed(&self, vault: &VaultId, name: &MountName);
}

/// Input field bound to a vault's mount name.
///
/// Edits commit immediately. An unlock attempt that is already mounting keeps
/// the name it started with, so edits made meanwhile apply to the next mount.
pub struct MountNameField {
    vault: Arc<Vault>,
    text: String,
    replace_on_type: bool,
    listener: Option<Arc<dyn MountNameListener>>,
}

impl MountNameField {
    /// Bind a field to `vault`, showing its current mount name.
    pub fn new(vault: Arc<Vault>) -> Self {
        let text = vault.mount_name().to_string();
        Self {
            vault,
            text,
            replace_on_type: false,
            listener: None,
        }
    }

    /// Register the change listener.
    pub fn with_listener(mut self, listener: Arc<dyn MountNameListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Text currently shown.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Select the whole text; the next accepted character replaces it.
    pub fn select_all(&mut self) {
        self.replace_on_type = true;
    }

    /// Handle one typed character.
    ///
    /// Returns `false` if the character was rejected; nothing changes then.
    pub fn type_char(&mut self, c: char) -> bool {
        if !MountName::is_allowed_char(c) {
            return false;
        }
        let mut proposed = if std::mem::take(&mut self.replace_on_type) {
            String::new()
        } else {
            self.text.clone()
        };
        proposed.push(c);
        self.set_text(&proposed);
        true
    }

    /// Remove the last character.
    pub fn backspace(&mut self) {
        self.replace_on_type = false;
        let mut proposed = self.text.clone();
        proposed.pop();
        self.set_text(&proposed);
    }

    /// Replace the text, as on paste.
    ///
    /// Disallowed characters are dropped. If nothing is left, the vault's last
    /// committed name is shown again.
    pub fn set_text(&mut self, proposed: &str) {
        let name = match MountName::sanitize(proposed) {
            Some(name) => {
                self.vault.set_mount_name(name.clone());
                name
            }
            None => self.vault.mount_name(),
        };
        self.text = name.to_string();
        if let Some(listener) = &self.listener {
            listener.mount_name_changed(self.vault.id(), &name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;
    use vaultgate_crypto::EnvelopeCryptor;

    use crate::vault::{MountService, RevealError, Revealer};

    struct Inert;

    impl MountService for Inert {
        fn start_server(&self) -> bool {
            true
        }
        fn stop_server(&self) {}
        fn mount(&self, _root: &Path, _name: &MountName) -> bool {
            true
        }
        fn unmount(&self, _name: &MountName) -> bool {
            true
        }
    }

    impl Revealer for Inert {
        fn reveal(&self, _root: &Path, _name: &MountName) -> Result<(), RevealError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl MountNameListener for Recorder {
        fn mount_name_changed(&self, _vault: &VaultId, name: &MountName) {
            self.0.lock().unwrap().push(name.to_string());
        }
    }

    fn field(root: &str) -> (Arc<Vault>, MountNameField, Arc<Recorder>) {
        let vault = Arc::new(
            Vault::new(
                root,
                Arc::new(EnvelopeCryptor::new()),
                Arc::new(Inert),
                Arc::new(Inert),
            )
            .unwrap(),
        );
        let recorder = Arc::new(Recorder::default());
        let field = MountNameField::new(Arc::clone(&vault)).with_listener(recorder.clone());
        (vault, field, recorder)
    }

    #[test]
    fn test_typing_filters_disallowed_characters() {
        let (vault, mut field, _) = field("/vaults/old");
        field.select_all();
        for c in "ab#12$".chars() {
            field.type_char(c);
        }
        assert_eq!(field.text(), "ab12");
        assert_eq!(vault.mount_name().as_str(), "ab12");
    }

    #[test]
    fn test_rejected_characters_are_reported() {
        let (_, mut field, recorder) = field("/vaults/docs");
        assert!(!field.type_char('#'));
        assert!(!field.type_char(' '));
        assert!(recorder.0.lock().unwrap().is_empty());
        assert!(field.type_char('x'));
        assert_eq!(field.text(), "docsx");
    }

    #[test]
    fn test_empty_restores_last_committed() {
        let (vault, mut field, recorder) = field("/vaults/docs");
        assert_eq!(vault.mount_name().as_str(), "docs");

        field.set_text("");
        assert_eq!(field.text(), "docs");
        assert_eq!(vault.mount_name().as_str(), "docs");
        assert_eq!(recorder.0.lock().unwrap().last().unwrap(), "docs");
    }

    #[test]
    fn test_backspace_to_empty_restores() {
        let (vault, mut field, _) = field("/vaults/ab");
        field.backspace();
        assert_eq!(field.text(), "a");
        field.backspace();
        assert_eq!(field.text(), "a");
        assert_eq!(vault.mount_name().as_str(), "a");
    }

    #[test]
    fn test_paste_drops_invalid_characters() {
        let (vault, mut field, recorder) = field("/vaults/docs");
        field.set_text("my work/2024");
        assert_eq!(field.text(), "mywork2024");
        assert_eq!(vault.mount_name().as_str(), "mywork2024");
        assert_eq!(recorder.0.lock().unwrap().as_slice(), ["mywork2024"]);
    }

    proptest::proptest! {
        #[test]
        fn prop_field_never_commits_invalid(input in ".{0,24}") {
            let (vault, mut field, _) = field("/vaults/docs");
            field.select_all();
            for c in input.chars() {
                field.type_char(c);
            }
            let committed = vault.mount_name();
            proptest::prop_assert!(MountName::new(committed.as_str()).is_ok());
            proptest::prop_assert_eq!(field.text(), committed.as_str());
        }
    }
}
