//! Mount service running external commands.

use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, warn};

use crate::settings::{render_command, MountSettings};
use vaultgate_common::{Error, MountName, Result};
use vaultgate_vault::MountService;

/// Mount service configured with [`MountSettings`].
///
/// The optional server runs as a child process between `start_server` and
/// `stop_server`. Mounting and unmounting run one command each and succeed
/// when the command exits successfully.
pub struct CommandMountService {
    settings: MountSettings,
    server: Mutex<Option<Child>>,
    mounted_root: Mutex<Option<PathBuf>>,
}

impl CommandMountService {
    /// Create a service from settings.
    pub fn new(settings: MountSettings) -> Self {
        Self {
            settings,
            server: Mutex::new(None),
            mounted_root: Mutex::new(None),
        }
    }

    /// Whether the server child process is running.
    pub fn is_server_running(&self) -> bool {
        let mut server = self.server.lock().unwrap_or_else(PoisonError::into_inner);
        match server.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn spawn_server(&self, argv: &[String]) -> Result<Child> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Mount("server command is empty".to_string()))?;
        Ok(Command::new(program).args(args).spawn()?)
    }
}

/// Run `argv` to completion.
///
/// # Errors
/// - Empty command
/// - Program could not be started
/// - Non-zero exit status
pub fn run_command(argv: &[String]) -> Result<()> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::Mount("no command configured".to_string()))?;

    debug!("Running {:?}", argv);
    let output = Command::new(program).args(args).output()?;
    if !output.status.success() {
        return Err(Error::Mount(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

impl MountService for CommandMountService {
    fn start_server(&self) -> bool {
        let Some(argv) = &self.settings.server_command else {
            return true;
        };
        if self.is_server_running() {
            debug!("Server already running");
            return true;
        }

        match self.spawn_server(argv) {
            Ok(child) => {
                info!("Started server (pid {})", child.id());
                *self.server.lock().unwrap_or_else(PoisonError::into_inner) = Some(child);
                true
            }
            Err(e) => {
                error!("Failed to start server: {}", e);
                false
            }
        }
    }

    fn stop_server(&self) {
        let child = self
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut child) = child else {
            return;
        };

        if let Err(e) = child.kill() {
            // Already exited
            debug!("Server kill: {}", e);
        }
        match child.wait() {
            Ok(status) => info!("Server stopped ({})", status),
            Err(e) => warn!("Failed to reap server process: {}", e),
        }
    }

    fn mount(&self, root: &Path, name: &MountName) -> bool {
        let argv = render_command(&self.settings.mount_command, Some(root), name);
        match run_command(&argv) {
            Ok(()) => {
                *self
                    .mounted_root
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(root.to_path_buf());
                info!("Mounted {:?} as {}", root, name);
                true
            }
            Err(e) => {
                error!("Mounting {:?} as {} failed: {}", root, name, e);
                false
            }
        }
    }

    fn unmount(&self, name: &MountName) -> bool {
        let root = self
            .mounted_root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let argv = render_command(&self.settings.unmount_command, root.as_deref(), name);
        match run_command(&argv) {
            Ok(()) => {
                info!("Unmounted {}", name);
                true
            }
            Err(e) => {
                error!("Unmounting {} failed: {}", name, e);
                false
            }
        }
    }
}

impl Drop for CommandMountService {
    fn drop(&mut self) {
        self.stop_server();
    }
}
