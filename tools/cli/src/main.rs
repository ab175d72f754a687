//! vaultgate CLI - unlock and mount encrypted vaults from the terminal.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use vaultgate_common::{SecretBuffer, VaultId};
use vaultgate_crypto::{EnvelopeCryptor, KdfParams, KeyEnvelope, MasterKey};
use vaultgate_mount::{CommandMountService, MountSettings, OpenRevealer};
use vaultgate_vault::config::{backup_path, envelope_path, DOWNLOADS_URL};
use vaultgate_vault::{
    AttemptStatus, FsEnvelopeStore, OrchestratorConfig, UnlockError, UnlockListener,
    UnlockOrchestrator, UnlockReport, Vault,
};

/// Password prompts before giving up on a wrong password.
const MAX_PASSWORD_ATTEMPTS: usize = 3;

#[derive(Parser)]
#[command(name = "vaultgate")]
#[command(about = "vaultgate - Unlock and mount encrypted vaults")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a key envelope for a new vault.
    Init {
        /// Vault root directory.
        #[arg(short, long)]
        path: PathBuf,

        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long, default_value = "moderate")]
        strength: String,
    },

    /// Unlock and mount a vault until interrupted.
    Unlock {
        /// Vault root directory.
        #[arg(short, long)]
        path: PathBuf,

        /// Mount name to use instead of the vault's current one.
        #[arg(short, long)]
        mount_name: Option<String>,

        /// Mount settings file (JSON).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show key envelope information.
    Info {
        /// Vault root directory.
        #[arg(short, long)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path, strength } => cmd_init(&path, &strength).await,

        Commands::Unlock {
            path,
            mount_name,
            config,
        } => cmd_unlock(&path, mount_name.as_deref(), config.as_deref()).await,

        Commands::Info { path } => cmd_info(&path).await,
    }
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<SecretBuffer> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(SecretBuffer::from_string(password))
}

/// Prints the outcome of each attempt.
struct ConsoleListener;

impl UnlockListener for ConsoleListener {
    fn unlock_finished(&self, report: &UnlockReport) {
        match &report.result {
            Ok(unlocked) => {
                println!("Vault unlocked and mounted as '{}'.", unlocked.mount_name);
                if !unlocked.revealed {
                    println!("  The mounted vault could not be opened automatically.");
                }
            }
            Err(e) => {
                println!("{}", e.user_message());
                if let Some(url) = e.download_url() {
                    println!("  Download a matching release: {}", url);
                }
            }
        }
    }
}

/// Create a key envelope in an existing directory.
async fn cmd_init(path: &Path, strength: &str) -> Result<()> {
    let kdf = KdfParams::from_strength(strength)
        .context("Invalid strength. Use: interactive, moderate, or sensitive")?;

    let target = envelope_path(path);
    if tokio::fs::try_exists(&target).await.unwrap_or(false) {
        anyhow::bail!("A key envelope already exists at {}", target.display());
    }

    let mut password = prompt_password("Enter password: ")?;
    let mut confirm = prompt_password("Confirm password: ")?;
    let matches = password.view() == confirm.view();
    confirm.wipe();
    if !matches {
        password.wipe();
        anyhow::bail!("Passwords do not match");
    }
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    info!("Creating key envelope at {}", target.display());
    let master_key = MasterKey::generate();
    let envelope = KeyEnvelope::seal(&master_key, password.view(), kdf)
        .context("Failed to seal master key")?;
    password.wipe();

    let bytes = Zeroizing::new(envelope.to_bytes().context("Failed to encode envelope")?);
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    tokio::fs::write(&target, bytes.as_slice())
        .await
        .with_context(|| format!("Failed to write {}", target.display()))?;

    println!("Vault key created successfully!");
    println!("  Location: {}", target.display());
    println!("  Format version: {}", envelope.version);

    Ok(())
}

/// Unlock a vault, keep it mounted until Ctrl-C, then lock it.
async fn cmd_unlock(path: &Path, mount_name: Option<&str>, config: Option<&Path>) -> Result<()> {
    let settings = match config {
        Some(file) => MountSettings::from_file(file)
            .with_context(|| format!("Failed to load mount settings from {}", file.display()))?,
        None => MountSettings::default(),
    };

    let revealer = Arc::new(OpenRevealer::from_settings(&settings));
    let mount_service = Arc::new(CommandMountService::new(settings));
    let vault = Arc::new(
        Vault::new(
            path,
            Arc::new(EnvelopeCryptor::new()),
            mount_service,
            revealer,
        )
        .context("Invalid vault path")?,
    );

    let mut orchestrator =
        UnlockOrchestrator::new(Arc::new(FsEnvelopeStore::new()), OrchestratorConfig::default());
    let listener: Arc<dyn UnlockListener> = Arc::new(ConsoleListener);

    let mut report = None;
    for _ in 0..MAX_PASSWORD_ATTEMPTS {
        let mut secret = prompt_password("Enter password: ")?;
        let status = orchestrator
            .attempt_unlock(
                Arc::clone(&vault),
                &mut secret,
                mount_name,
                Arc::clone(&listener),
            )
            .await
            .map_err(|e| failure("unlock", vault.id(), &e))?;

        let finished = match status {
            AttemptStatus::Finished(report) => report,
            AttemptStatus::Mounting(attempt) => {
                info!("Mounting vault (attempt {})", attempt);
                orchestrator
                    .process_next()
                    .await
                    .context("Mount completion was lost")?
            }
        };

        let retry = matches!(&finished.result, Err(e) if e.should_refocus_secret());
        report = Some(finished);
        if !retry {
            break;
        }
    }

    let report = report.context("No unlock attempt was made")?;
    if let Err(e) = &report.result {
        return Err(failure("unlock", &report.vault, e));
    }

    println!("Press Ctrl-C to lock the vault.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;

    info!("Locking vault {}", vault.id());
    orchestrator
        .lock(Arc::clone(&vault))
        .await
        .map_err(|e| failure("lock", vault.id(), &e))?;
    println!("Vault locked.");

    Ok(())
}

/// Log the details of a failed `action`; the returned error only carries the
/// user-facing message.
fn failure(action: &str, vault: &VaultId, e: &UnlockError) -> anyhow::Error {
    error!("Failed to {} {}: {}", action, vault, e);
    anyhow::anyhow!("Failed to {} vault: {}", action, e.user_message())
}

/// Show vault information.
async fn cmd_info(path: &Path) -> Result<()> {
    let target = envelope_path(path);
    let bytes = tokio::fs::read(&target)
        .await
        .with_context(|| format!("Failed to read {}", target.display()))?;
    let envelope =
        KeyEnvelope::from_reader(&mut bytes.as_slice()).context("Malformed key envelope")?;

    let has_backup = tokio::fs::try_exists(backup_path(path))
        .await
        .unwrap_or(false);
    if !has_backup {
        warn!("No key envelope backup yet; one is written on the next unlock");
    }

    println!("Vault Information:");
    println!("  Location: {}", path.display());
    println!("  Format version: {}", envelope.version);
    println!("  Key length: {} bits", envelope.key_bits);
    println!("  Backup present: {}", if has_backup { "yes" } else { "no" });
    println!("  KDF Parameters:");
    println!("    Memory: {} KiB", envelope.kdf.memory_cost);
    println!("    Time: {} iterations", envelope.kdf.time_cost);
    println!("    Parallelism: {}", envelope.kdf.parallelism);
    println!("  Releases: {}", DOWNLOADS_URL);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlock_failure_hides_error_details() {
        let vault = VaultId::new("/vaults/docs").unwrap();
        let cause = std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "/vaults/docs/masterkey.vault: No such file or directory",
        );

        let err = failure("unlock", &vault, &UnlockError::Io(cause));

        let shown = format!("{:?}", err);
        assert!(!shown.contains("No such file"), "{}", shown);
        assert!(shown.contains("Decryption failed for technical reasons."));
        assert!(err.chain().nth(1).is_none());
    }
}
