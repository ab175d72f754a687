//! Configuration of the command-driven mount service.

use serde::{Deserialize, Serialize};
use std::path::Path;

use vaultgate_common::{MountName, Result};

/// Placeholder replaced by the vault's mount name.
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Placeholder replaced by the vault's root directory.
pub const ROOT_PLACEHOLDER: &str = "{root}";

/// How vaults are served, mounted and revealed.
///
/// Commands are argument vectors, the first element being the program. They
/// are run without a shell.
///
/// ```json
/// {
///   "server_command": ["vault-webdav", "--port", "42427"],
///   "mount_command": ["gio", "mount", "dav://localhost:42427/{name}"],
///   "unmount_command": ["gio", "mount", "-u", "dav://localhost:42427/{name}"],
///   "reveal_target": "dav://localhost:42427/{name}",
///   "reveal": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountSettings {
    /// Long-running server started before the mount, if any.
    pub server_command: Option<Vec<String>>,
    /// Command mounting a vault. Supports `{name}` and `{root}`.
    pub mount_command: Vec<String>,
    /// Command unmounting a vault. Supports `{name}` and `{root}`.
    pub unmount_command: Vec<String>,
    /// What to open after mounting. Supports `{name}` and `{root}`.
    pub reveal_target: String,
    /// Whether to open the mounted vault after unlocking.
    pub reveal: bool,
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            server_command: None,
            mount_command: Vec::new(),
            unmount_command: Vec::new(),
            reveal_target: ROOT_PLACEHOLDER.to_string(),
            reveal: true,
        }
    }
}

impl MountSettings {
    /// Load settings from a JSON file.
    ///
    /// # Errors
    /// - File unreadable
    /// - Invalid JSON
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Substitute placeholders in one template string.
pub fn render(template: &str, root: Option<&Path>, name: &MountName) -> String {
    let rendered = template.replace(NAME_PLACEHOLDER, name.as_str());
    match root {
        Some(root) => rendered.replace(ROOT_PLACEHOLDER, &root.to_string_lossy()),
        None => rendered,
    }
}

/// Substitute placeholders in every argument of a command.
pub fn render_command(command: &[String], root: Option<&Path>, name: &MountName) -> Vec<String> {
    command.iter().map(|arg| render(arg, root, name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_render_placeholders() {
        let name = MountName::new("docs").unwrap();
        let root = PathBuf::from("/vaults/docs");
        let command = vec![
            "mount-helper".to_string(),
            "{root}".to_string(),
            "/mnt/{name}".to_string(),
        ];

        assert_eq!(
            render_command(&command, Some(&root), &name),
            ["mount-helper", "/vaults/docs", "/mnt/docs"]
        );
    }

    #[test]
    fn test_default_reveal_target_renders_root() {
        let name = MountName::new("docs").unwrap();
        let root = PathBuf::from("/vaults/docs");
        let settings = MountSettings::default();
        assert_eq!(
            render(&settings.reveal_target, Some(&root), &name),
            "/vaults/docs"
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings = MountSettings::from_json(r#"{ "mount_command": ["true"] }"#).unwrap();
        assert_eq!(settings.mount_command, ["true"]);
        assert!(settings.server_command.is_none());
        assert!(settings.reveal);
        assert_eq!(settings.reveal_target, ROOT_PLACEHOLDER);
    }

    #[test]
    fn test_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mount.json");
        let settings = MountSettings {
            server_command: Some(vec!["server".to_string()]),
            reveal: false,
            ..MountSettings::default()
        };
        std::fs::write(&path, settings.to_json().unwrap()).unwrap();

        assert_eq!(MountSettings::from_file(&path).unwrap(), settings);
    }

    #[test]
    fn test_invalid_json_fails() {
        assert!(MountSettings::from_json("{ not json").is_err());
    }
}
