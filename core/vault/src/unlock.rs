//! Unlock orchestration.
//!
//! An unlock attempt verifies the secret against the key envelope, starts the
//! vault's server, backs up the envelope, marks the vault unlocked and hands
//! the mount to a blocking worker. The mount result comes back through the
//! orchestrator's mailbox and is finalized by [`UnlockOrchestrator::process_next`]
//! in the same control context that started the attempt, so no two
//! transitions for one vault ever run concurrently.
//!
//! ```text
//! Idle -> Verifying -> StartingServer -> BackingUp -> MarkedUnlocked -> Mounting
//!                                                                        |-> Revealed
//!                                                                        '-> RolledBack
//! ```
//!
//! Failures before `MarkedUnlocked` abort without touching the vault's
//! `unlocked` flag or mount name. A failed mount rolls back the flag and the
//! server. Dropping an `attempt_unlock` future before it returns tears down
//! whatever the attempt had set up and frees the vault for a new attempt.
//!
//! Key derivation runs on a blocking worker, never on the async runtime.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use vaultgate_common::{MountName, SecretBuffer, VaultId};

use crate::config::OrchestratorConfig;
use crate::error::UnlockError;
use crate::store::{EnvelopeStream, KeyEnvelopeStore};
use crate::vault::Vault;

/// Identifier of one unlock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(Uuid);

impl AttemptId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stage of an unlock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockStage {
    /// No attempt running.
    Idle,
    /// Checking the secret against the envelope.
    Verifying,
    /// Starting the server backing the mount.
    StartingServer,
    /// Copying the envelope to its backup.
    BackingUp,
    /// The vault's `unlocked` flag has been set.
    MarkedUnlocked,
    /// Waiting for the mount worker.
    Mounting,
    /// Mounted and revealed (terminal).
    Revealed,
    /// Mount failed and state was rolled back (terminal).
    RolledBack,
    /// Aborted before the vault was marked unlocked (terminal).
    Aborted,
}

/// Result of a successful attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unlocked {
    /// Name the vault was mounted under.
    pub mount_name: MountName,
    /// Whether the reveal collaborator succeeded.
    pub revealed: bool,
}

/// Final report of one attempt, delivered exactly once.
#[derive(Debug)]
pub struct UnlockReport {
    /// Vault the attempt was for.
    pub vault: VaultId,
    /// The attempt.
    pub attempt: AttemptId,
    /// Terminal stage reached.
    pub stage: UnlockStage,
    /// Overall outcome.
    pub result: Result<Unlocked, UnlockError>,
}

impl UnlockReport {
    /// Whether the vault ended up unlocked and mounted.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Receives the final report of each attempt it was registered for.
pub trait UnlockListener: Send + Sync {
    /// Called once when the attempt reaches a terminal stage.
    fn unlock_finished(&self, report: &UnlockReport);
}

/// Listener that ignores reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl UnlockListener for NoopListener {
    fn unlock_finished(&self, _report: &UnlockReport) {}
}

/// What `attempt_unlock` left behind.
#[derive(Debug)]
pub enum AttemptStatus {
    /// Verification and backup passed; the mount is running.
    Mounting(AttemptId),
    /// The attempt aborted synchronously. The listener has already been notified.
    Finished(UnlockReport),
}

struct InFlight {
    attempt: AttemptId,
    stage: UnlockStage,
    vault: Arc<Vault>,
    listener: Arc<dyn UnlockListener>,
}

#[derive(Debug)]
struct MountFinished {
    vault: VaultId,
    attempt: AttemptId,
    name: MountName,
    mounted: bool,
}

/// Wipes the borrowed secret when dropped, including during unwinding.
struct WipeOnDrop<'a>(&'a mut SecretBuffer);

impl Deref for WipeOnDrop<'_> {
    type Target = SecretBuffer;

    fn deref(&self) -> &SecretBuffer {
        self.0
    }
}

impl DerefMut for WipeOnDrop<'_> {
    fn deref_mut(&mut self) -> &mut SecretBuffer {
        self.0
    }
}

impl Drop for WipeOnDrop<'_> {
    fn drop(&mut self) {
        self.0.wipe();
    }
}

/// Drives unlock attempts for any number of vaults.
///
/// The orchestrator is owned by a single control context; every state
/// transition happens through `&mut self`. At most one attempt per vault is in
/// flight.
pub struct UnlockOrchestrator {
    store: Arc<dyn KeyEnvelopeStore>,
    in_flight: HashMap<VaultId, InFlight>,
    mailbox_tx: mpsc::Sender<MountFinished>,
    mailbox_rx: mpsc::Receiver<MountFinished>,
}

impl UnlockOrchestrator {
    /// Create an orchestrator using `store` for envelope access.
    pub fn new(store: Arc<dyn KeyEnvelopeStore>, config: OrchestratorConfig) -> Self {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity.max(1));
        Self {
            store,
            in_flight: HashMap::new(),
            mailbox_tx,
            mailbox_rx,
        }
    }

    /// Whether an attempt is in flight for `vault`.
    pub fn is_busy(&self, vault: &VaultId) -> bool {
        self.in_flight.contains_key(vault)
    }

    /// Current stage of the attempt for `vault`, `Idle` if none.
    pub fn stage(&self, vault: &VaultId) -> UnlockStage {
        self.in_flight
            .get(vault)
            .map(|f| f.stage)
            .unwrap_or(UnlockStage::Idle)
    }

    /// Start an unlock attempt.
    ///
    /// Runs verification, server start and backup before returning, then
    /// hands the mount to a blocking worker. `secret` is wiped before this
    /// returns, whatever the outcome.
    ///
    /// A non-empty, valid `mount_name_hint` becomes the vault's mount name
    /// once the attempt reaches mounting. Aborted attempts leave the name as
    /// it was.
    ///
    /// Dropping the returned future before it completes abandons the attempt:
    /// the server is stopped, the cryptor session destroyed and the vault
    /// accepts a new attempt. No report is delivered for it.
    ///
    /// # Errors
    /// - `UnlockError::AttemptInFlight` if the vault is busy. The running
    ///   attempt is not affected and `listener` is not called.
    pub async fn attempt_unlock(
        &mut self,
        vault: Arc<Vault>,
        secret: &mut SecretBuffer,
        mount_name_hint: Option<&str>,
        listener: Arc<dyn UnlockListener>,
    ) -> Result<AttemptStatus, UnlockError> {
        let mut secret = WipeOnDrop(secret);
        let vault_id = vault.id().clone();

        if self.is_busy(&vault_id) {
            warn!("Ignoring unlock request for {}: attempt in progress", vault_id);
            return Err(UnlockError::AttemptInFlight(vault_id));
        }

        let mount_name = match mount_name_hint.filter(|h| !h.is_empty()) {
            Some(hint) => MountName::new(hint)
                .map_err(|e| debug!("Ignoring mount name hint for {}: {}", vault_id, e))
                .ok(),
            None => None,
        };

        let attempt = AttemptId::new();
        info!("Unlock attempt {} started for {}", attempt, vault_id);
        self.in_flight.insert(
            vault_id.clone(),
            InFlight {
                attempt,
                stage: UnlockStage::Idle,
                vault: Arc::clone(&vault),
                listener: Arc::clone(&listener),
            },
        );

        let store = Arc::clone(&self.store);
        let mut guard = AttemptGuard {
            in_flight: &mut self.in_flight,
            vault: &*vault,
            abandoned: Arc::new(AtomicBool::new(false)),
            armed: true,
        };
        let prepared = prepare(store.as_ref(), &mut guard, secret.view()).await;
        secret.wipe();
        guard.disarm();

        match prepared {
            Ok(()) => {
                if let Some(name) = mount_name {
                    vault.set_mount_name(name);
                }
                self.spawn_mount(&vault, attempt);
                Ok(AttemptStatus::Mounting(attempt))
            }
            Err(error) => {
                self.in_flight.remove(&vault_id);
                log_abort(&vault_id, &error);
                let report = UnlockReport {
                    vault: vault_id,
                    attempt,
                    stage: UnlockStage::Aborted,
                    result: Err(error),
                };
                listener.unlock_finished(&report);
                Ok(AttemptStatus::Finished(report))
            }
        }
    }

    /// Wait for the next mount to finish and finalize its attempt.
    ///
    /// Returns `None` right away when no mount is pending.
    pub async fn process_next(&mut self) -> Option<UnlockReport> {
        loop {
            let pending = self
                .in_flight
                .values()
                .any(|f| f.stage == UnlockStage::Mounting);
            if !pending {
                return None;
            }

            let event = self.mailbox_rx.recv().await?;
            if let Some(report) = self.finish_mount(event) {
                return Some(report);
            }
        }
    }

    /// Finalize every pending mount.
    pub async fn run_until_idle(&mut self) -> Vec<UnlockReport> {
        let mut reports = Vec::new();
        while let Some(report) = self.process_next().await {
            reports.push(report);
        }
        reports
    }

    /// Lock an unlocked vault: unmount, stop the server, destroy key material.
    ///
    /// # Errors
    /// - `UnlockError::AttemptInFlight` if an attempt is running
    /// - `UnlockError::DestroyFailed` if key material could not be destroyed;
    ///   the vault is still marked locked
    pub async fn lock(&mut self, vault: Arc<Vault>) -> Result<(), UnlockError> {
        if self.is_busy(vault.id()) {
            return Err(UnlockError::AttemptInFlight(vault.id().clone()));
        }
        if !vault.is_unlocked() {
            debug!("Vault {} already locked", vault.id());
            return Ok(());
        }

        let worker_vault = Arc::clone(&vault);
        let unmounted = tokio::task::spawn_blocking(move || worker_vault.unmount())
            .await
            .unwrap_or_else(|e| {
                error!("Unmount task failed: {}", e);
                false
            });
        if !unmounted {
            warn!("Unmounting {} failed; stopping server anyway", vault.id());
        }

        vault.stop_server();
        vault.set_unlocked(false);
        vault.cryptor().destroy().map_err(|e| {
            error!("Destruction of cryptor for {} failed: {}", vault.id(), e);
            UnlockError::DestroyFailed(e)
        })?;

        info!("Vault {} locked", vault.id());
        Ok(())
    }

    fn spawn_mount(&mut self, vault: &Arc<Vault>, attempt: AttemptId) {
        if let Some(flight) = self.in_flight.get_mut(vault.id()) {
            debug!("Unlock {} for {}: {:?} -> Mounting", attempt, vault.id(), flight.stage);
            flight.stage = UnlockStage::Mounting;
        }

        let tx = self.mailbox_tx.clone();
        let worker_vault = Arc::clone(vault);
        let vault_id = vault.id().clone();
        let name = vault.mount_name();
        let worker_name = name.clone();
        tokio::spawn(async move {
            let mounted = match tokio::task::spawn_blocking(move || worker_vault.mount(&worker_name))
                .await
            {
                Ok(mounted) => mounted,
                Err(e) => {
                    error!("Mount task for {} failed: {}", vault_id, e);
                    false
                }
            };
            let event = MountFinished {
                vault: vault_id,
                attempt,
                name,
                mounted,
            };
            if tx.send(event).await.is_err() {
                warn!("Orchestrator gone before mount for attempt {} finished", attempt);
            }
        });
    }

    fn finish_mount(&mut self, event: MountFinished) -> Option<UnlockReport> {
        let current = self.in_flight.get(&event.vault).map(|f| f.attempt);
        if current != Some(event.attempt) {
            warn!("Dropping stale mount result for attempt {}", event.attempt);
            return None;
        }
        let flight = self.in_flight.remove(&event.vault)?;
        let vault = flight.vault;

        let (stage, result) = if event.mounted {
            let revealed = match vault.reveal(&event.name) {
                Ok(()) => true,
                Err(e) => {
                    error!("Failed to reveal mounted vault {}: {}", vault.id(), e);
                    false
                }
            };
            info!("Vault {} unlocked and mounted", vault.id());
            (
                UnlockStage::Revealed,
                Ok(Unlocked {
                    mount_name: event.name,
                    revealed,
                }),
            )
        } else {
            vault.stop_server();
            vault.set_unlocked(false);
            if let Err(e) = vault.cryptor().destroy() {
                error!("Destruction of cryptor for {} failed during rollback: {}", vault.id(), e);
            }
            warn!("Mounting {} failed; unlock rolled back", vault.id());
            (UnlockStage::RolledBack, Err(UnlockError::MountFailed))
        };

        let report = UnlockReport {
            vault: event.vault,
            attempt: event.attempt,
            stage,
            result,
        };
        flight.listener.unlock_finished(&report);
        Some(report)
    }
}

/// Owns the in-flight entry of an attempt while its preparation runs.
///
/// If the attempt future is dropped before [`AttemptGuard::disarm`], the
/// entry is removed and everything set up so far is torn down.
struct AttemptGuard<'a> {
    in_flight: &'a mut HashMap<VaultId, InFlight>,
    vault: &'a Vault,
    abandoned: Arc<AtomicBool>,
    armed: bool,
}

impl AttemptGuard<'_> {
    fn enter(&mut self, stage: UnlockStage) {
        let vault = self.vault.id();
        if let Some(flight) = self.in_flight.get_mut(vault) {
            debug!("Unlock {} for {}: {:?} -> {:?}", flight.attempt, vault, flight.stage, stage);
            flight.stage = stage;
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let vault = self.vault;
        let Some(flight) = self.in_flight.remove(vault.id()) else {
            return;
        };
        self.abandoned.store(true, Ordering::SeqCst);
        warn!(
            "Unlock attempt {} for {} abandoned during {:?}",
            flight.attempt,
            vault.id(),
            flight.stage
        );

        match flight.stage {
            UnlockStage::Idle => return,
            UnlockStage::Verifying => {}
            _ => {
                vault.stop_server();
                vault.set_unlocked(false);
            }
        }
        if let Err(e) = vault.cryptor().destroy() {
            error!("Destruction of cryptor for {} failed after abandon: {}", vault.id(), e);
        }
    }
}

/// Everything up to and including `MarkedUnlocked`.
async fn prepare(
    store: &dyn KeyEnvelopeStore,
    guard: &mut AttemptGuard<'_>,
    secret: &[u8],
) -> Result<(), UnlockError> {
    let vault = guard.vault;

    guard.enter(UnlockStage::Verifying);
    let envelope = store.open_for_read(vault.root()).await?;
    verify(vault, envelope, secret, Arc::clone(&guard.abandoned)).await?;

    guard.enter(UnlockStage::StartingServer);
    if !vault.start_server() {
        return Err(teardown(vault, UnlockError::ServerStartFailed));
    }

    // The envelope is known to be decryptable now, so the backup is worth keeping
    guard.enter(UnlockStage::BackingUp);
    if let Err(e) = store.backup(vault.root()).await {
        vault.stop_server();
        return Err(teardown(vault, UnlockError::Io(e)));
    }

    guard.enter(UnlockStage::MarkedUnlocked);
    vault.set_unlocked(true);
    Ok(())
}

/// Run the cryptor on a blocking worker.
///
/// The worker owns a zeroizing copy of the secret. If the attempt is abandoned
/// while it runs, a session it opens is destroyed before it returns.
async fn verify(
    vault: &Vault,
    mut envelope: EnvelopeStream,
    secret: &[u8],
    abandoned: Arc<AtomicBool>,
) -> Result<(), UnlockError> {
    let cryptor = Arc::clone(vault.cryptor());
    let secret = Zeroizing::new(secret.to_vec());
    let vault_id = vault.id().clone();

    let result = tokio::task::spawn_blocking(move || {
        let result = cryptor.decrypt_master_key(&mut envelope, &secret);
        if result.is_ok() && abandoned.load(Ordering::SeqCst) {
            if let Err(e) = cryptor.destroy() {
                error!("Destruction of cryptor for {} failed after abandon: {}", vault_id, e);
            }
        }
        result
    })
    .await
    .map_err(|e| UnlockError::Io(std::io::Error::other(e.to_string())))?;

    Ok(result?)
}

/// Destroy the session opened by a successful decryption while aborting.
///
/// A destroy failure takes precedence over `cause`.
fn teardown(vault: &Vault, cause: UnlockError) -> UnlockError {
    match vault.cryptor().destroy() {
        Ok(()) => cause,
        Err(e) => {
            error!("Destruction of cryptor for {} failed after {}: {}", vault.id(), cause, e);
            UnlockError::DestroyFailed(e)
        }
    }
}

fn log_abort(vault: &VaultId, error: &UnlockError) {
    match error {
        UnlockError::WrongPassword => info!("Unlock of {} rejected: wrong password", vault),
        UnlockError::UnsupportedKeyLength { bits } => {
            warn!("Unlock of {} failed: unsupported key length {} bits", vault, bits)
        }
        UnlockError::VaultVersionMismatch { .. } => {
            warn!("Unlock of {} failed: {}", vault, error)
        }
        UnlockError::Io(e) => error!("Decryption of {} failed for technical reasons: {}", vault, e),
        UnlockError::ServerStartFailed => error!("Server for {} could not be started", vault),
        UnlockError::DestroyFailed(e) => error!("Unlock of {} aborted: {}", vault, e),
        UnlockError::MountFailed | UnlockError::AttemptInFlight(_) => {
            warn!("Unlock of {} failed: {}", vault, error)
        }
    }
}
