use crate::checksum::{digests_match, file_digest};
use crate::config::UpdaterConfig;
use crate::diagnostics::DiagnosticLog;
use crate::error::{ErrorKind, Result, UpdaterError};
use crate::host::{
    DetachedHost, HostShell, InstallerLauncher, LogNotifier, ProcessLauncher, ServiceControl,
    UpdateNotifier,
};
use crate::manifest::{FileEntry, ManifestFetcher};
use crate::planner::UpdatePlanner;
use crate::signature::SignatureVerifier;
use crate::transport::{ArtifactTransport, HttpTransport};
use reqwest::Url;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::{self, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where a cycle currently is. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Verifying,
    Planning,
    Applying,
    Done(CycleSummary),
    Failed(Failure),
}

impl CyclePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CyclePhase::Done(_) | CyclePhase::Failed(_))
    }
}

/// Cloneable description of an [`UpdaterError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&UpdaterError> for Failure {
    fn from(err: &UpdaterError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Installer replacing the whole application.
    Full,
    /// Single file patched in the application directory.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactStatus {
    /// The destination already had the expected digest; nothing was fetched.
    AlreadyCurrent,
    /// Downloaded, verified and moved into place.
    Applied,
    Failed(Failure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReport {
    pub key: String,
    pub kind: ArtifactKind,
    pub path: Option<PathBuf>,
    pub status: ArtifactStatus,
    /// The owning service was stopped and started again.
    pub restarted: bool,
}

/// Result of a cycle that got past verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub remote_version: String,
    pub needs_full_update: bool,
    /// A full update was needed but the manifest has no installer for this platform.
    pub full_update_unavailable: bool,
    pub staged_installer: Option<PathBuf>,
    pub artifacts: Vec<ArtifactReport>,
}

impl CycleSummary {
    /// Number of artefacts fetched over the network in this cycle.
    pub fn downloads(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|artifact| artifact.status == ArtifactStatus::Applied)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ArtifactReport> {
        self.artifacts
            .iter()
            .filter(|artifact| matches!(artifact.status, ArtifactStatus::Failed(_)))
    }
}

/// A downloaded installer whose digest matched the signed manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInstaller {
    pub path: PathBuf,
}

/// How a [`UpdateCoordinator::check_for_updates`] request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A new cycle was started for this request.
    Started,
    /// Another request was already waiting to start a cycle; this one is
    /// served by that cycle.
    Joined,
}

/// Builder for [`UpdateCoordinator`].
pub struct UpdateCoordinatorBuilder {
    config: UpdaterConfig,
    verifier: Option<SignatureVerifier>,
    transport: Option<Arc<dyn ArtifactTransport>>,
    notifier: Arc<dyn UpdateNotifier>,
    launcher: Arc<dyn InstallerLauncher>,
    host: Arc<dyn HostShell>,
    services: HashMap<String, Arc<dyn ServiceControl>>,
}

impl UpdateCoordinatorBuilder {
    /// Trust anchor; defaults to the key in the configuration.
    pub fn verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Transport; defaults to [`HttpTransport`] with the configured timeouts.
    pub fn transport(mut self, transport: Arc<dyn ArtifactTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn UpdateNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn InstallerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn host(mut self, host: Arc<dyn HostShell>) -> Self {
        self.host = host;
        self
    }

    /// Restart `service` whenever the component `key` is replaced.
    pub fn restart_on_update(
        mut self,
        key: impl Into<String>,
        service: Arc<dyn ServiceControl>,
    ) -> Self {
        self.services.insert(key.into(), service);
        self
    }

    pub fn build(self) -> Result<UpdateCoordinator> {
        let verifier = match self.verifier {
            Some(verifier) => verifier,
            None => self.config.verifier()?,
        };
        let transport: Arc<dyn ArtifactTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HttpTransport::builder()
                    .connect_timeout(self.config.connect_timeout())
                    .request_timeout(self.config.request_timeout())
                    .download_timeout(self.config.download_timeout())
                    .user_agent(self.config.user_agent.clone())
                    .build()?,
            ),
        };
        let planner = UpdatePlanner::new(
            self.config.platform_key.clone(),
            self.config.partial_keys.iter().cloned(),
        );
        let (phase_tx, phase_rx) = watch::channel(CyclePhase::Idle);
        let diagnostics = DiagnosticLog::new(self.config.diagnostics_dir.clone())?;

        let shared = Shared {
            update_url: RwLock::new(self.config.update_url.clone()),
            force_full_update: AtomicBool::new(false),
            staged: RwLock::new(None),
            notified: Mutex::new(None),
            fetcher: ManifestFetcher::new(transport.clone()),
            transport,
            verifier,
            planner,
            diagnostics,
            notifier: self.notifier,
            launcher: self.launcher,
            host: self.host,
            services: self.services,
            phase_tx,
            cancel: Mutex::new(CancellationToken::new()),
            config: self.config,
        };

        Ok(UpdateCoordinator {
            shared: Arc::new(shared),
            slot: tokio::sync::Mutex::new(None),
            pending: AtomicBool::new(false),
            phase_rx,
        })
    }
}

/// Runs update cycles on a background task, one at a time.
///
/// Calling [`check_for_updates`](Self::check_for_updates) while a cycle runs
/// waits for it to finish and then starts a new one. At most one further
/// request waits at any time; later requests join it.
pub struct UpdateCoordinator {
    shared: Arc<Shared>,
    slot: tokio::sync::Mutex<Option<JoinHandle<CyclePhase>>>,
    pending: AtomicBool,
    phase_rx: watch::Receiver<CyclePhase>,
}

impl UpdateCoordinator {
    pub fn builder(config: UpdaterConfig) -> UpdateCoordinatorBuilder {
        UpdateCoordinatorBuilder {
            config,
            verifier: None,
            transport: None,
            notifier: Arc::new(LogNotifier),
            launcher: Arc::new(ProcessLauncher),
            host: Arc::new(DetachedHost),
            services: HashMap::new(),
        }
    }

    /// Start a cycle in the background, after any running one has finished.
    ///
    /// Dropping the returned future while it waits leaves the running cycle
    /// in place and lets the next call take over the waiting position.
    pub async fn check_for_updates(&self) -> Submission {
        if self.pending.swap(true, Ordering::SeqCst) {
            debug!(target: "updater", "update check already pending; joining it");
            return Submission::Joined;
        }
        let pending = PendingGuard(&self.pending);

        let mut slot = self.slot.lock().await;
        if let Some(Err(err)) = settle(&mut slot).await {
            warn!(target: "updater", error = %err, "previous update cycle did not finish cleanly");
        }
        drop(pending);

        let cancel = CancellationToken::new();
        *lock(&self.shared.cancel) = cancel.clone();
        let shared = self.shared.clone();
        *slot = Some(tokio::spawn(async move { shared.run_cycle(cancel).await }));
        Submission::Started
    }

    /// Wait for the most recent cycle to finish and return its terminal phase.
    /// Returns `None` if no cycle was ever started.
    pub async fn wait_for_cycle(&self) -> Option<CyclePhase> {
        let mut slot = self.slot.lock().await;
        match settle(&mut slot).await {
            Some(Ok(phase)) => Some(phase),
            Some(Err(err)) => {
                let err = UpdaterError::from(err);
                error!(target: "updater", error = %err, "update worker failed");
                Some(CyclePhase::Failed(Failure::from(&err)))
            }
            None => {
                let phase = self.phase();
                phase.is_terminal().then_some(phase)
            }
        }
    }

    /// Start a cycle and wait for its outcome.
    pub async fn check_now(&self) -> Option<CyclePhase> {
        self.check_for_updates().await;
        self.wait_for_cycle().await
    }

    /// Ask the running cycle to stop before its next artefact.
    pub fn cancel_current(&self) {
        lock(&self.shared.cancel).cancel();
    }

    /// Cancel and wait for the running cycle.
    pub async fn shutdown(self) {
        self.cancel_current();
        let mut slot = self.slot.lock().await;
        let _ = settle(&mut slot).await;
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CyclePhase> {
        self.phase_rx.clone()
    }

    pub fn set_update_url(&self, url: impl Into<String>) {
        *write(&self.shared.update_url) = url.into();
    }

    pub fn update_url(&self) -> String {
        read(&self.shared.update_url).clone()
    }

    /// Force the next cycles to reinstall even when the versions match.
    pub fn set_force_full_update(&self, force: bool) {
        self.shared.force_full_update.store(force, Ordering::SeqCst);
    }

    pub fn staged_installer(&self) -> Option<StagedInstaller> {
        read(&self.shared.staged).clone()
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.shared.diagnostics
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.shared.config
    }

    /// Launch the staged installer unattended and ask the host to close.
    ///
    /// Does not wait for the installer. Fails with
    /// [`UpdaterError::NoStagedInstaller`] when nothing is staged, in which
    /// case nothing is launched and the host keeps running.
    pub fn run_installer_and_exit(&self) -> Result<PathBuf> {
        let shared = &self.shared;
        let Some(staged) = write(&shared.staged).take() else {
            error!(target: "updater", "installer path not set");
            shared.diagnostics.record(
                ErrorKind::Caller,
                "attempted to run installer, but no installer is staged",
            );
            return Err(UpdaterError::NoStagedInstaller);
        };

        if let Err(err) = shared
            .launcher
            .launch(&staged.path, &shared.config.installer_args)
        {
            let err = UpdaterError::Io(err);
            error!(target: "updater", path = ?staged.path, error = %err, "failed to launch installer");
            shared.diagnostics.record_error("failed to launch installer", &err);
            let mut slot = write(&shared.staged);
            if slot.is_none() {
                *slot = Some(staged);
            }
            return Err(err);
        }

        info!(target: "updater", path = ?staged.path, "installer launched; closing host");
        shared.host.request_close();
        Ok(staged.path)
    }
}

struct Shared {
    config: UpdaterConfig,
    update_url: RwLock<String>,
    force_full_update: AtomicBool,
    staged: RwLock<Option<StagedInstaller>>,
    notified: Mutex<Option<PathBuf>>,
    fetcher: ManifestFetcher,
    transport: Arc<dyn ArtifactTransport>,
    verifier: SignatureVerifier,
    planner: UpdatePlanner,
    diagnostics: DiagnosticLog,
    notifier: Arc<dyn UpdateNotifier>,
    launcher: Arc<dyn InstallerLauncher>,
    host: Arc<dyn HostShell>,
    services: HashMap<String, Arc<dyn ServiceControl>>,
    phase_tx: watch::Sender<CyclePhase>,
    cancel: Mutex<CancellationToken>,
}

impl Shared {
    async fn run_cycle(self: Arc<Self>, cancel: CancellationToken) -> CyclePhase {
        info!(target: "updater", "checking for updates");
        self.publish(CyclePhase::Idle);

        let phase = match self.cycle(&cancel).await {
            Ok(summary) => CyclePhase::Done(summary),
            Err(err) => {
                warn!(target: "updater", kind = %err.kind(), error = %err, "update cycle aborted");
                CyclePhase::Failed(Failure::from(&err))
            }
        };

        self.publish(phase.clone());
        info!(target: "updater", "update check finished");
        phase
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<CycleSummary> {
        checkpoint(cancel)?;

        self.publish(CyclePhase::Fetching);
        let url = read(&self.update_url).clone();
        let signed = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|err| self.abort("failed to fetch version manifest", err))?;

        self.publish(CyclePhase::Verifying);
        let description = signed
            .verify(&self.verifier)
            .map_err(|err| self.abort("rejected version description", err))?;

        self.publish(CyclePhase::Planning);
        let force = self.force_full_update.load(Ordering::SeqCst);
        let plan = self
            .planner
            .plan(&description, &self.config.running_version, force);
        info!(
            target: "updater",
            remote = %description.shell_version,
            running = %self.config.running_version,
            full = plan.needs_full_update,
            partial = plan.partial_artifacts.len(),
            "update plan ready"
        );

        self.publish(CyclePhase::Applying);
        let mut summary = CycleSummary {
            remote_version: description.shell_version.clone(),
            needs_full_update: plan.needs_full_update,
            full_update_unavailable: false,
            staged_installer: None,
            artifacts: Vec::new(),
        };

        if plan.needs_full_update {
            match plan.full_artifact {
                Some(entry) => {
                    checkpoint(cancel)?;
                    let report = self.apply_full(&entry).await;
                    if matches!(report.status, ArtifactStatus::Failed(_)) {
                        warn!(target: "updater", "installer download failed; skipping update prompt");
                    } else {
                        summary.staged_installer = report.path.clone();
                    }
                    summary.artifacts.push(report);
                }
                None => {
                    warn!(
                        target: "updater",
                        platform = %self.planner.platform_key(),
                        "no installer published for this platform"
                    );
                    summary.full_update_unavailable = true;
                }
            }
        } else {
            for (key, entry) in &plan.partial_artifacts {
                checkpoint(cancel)?;
                let report = self.apply_partial(key, entry).await;
                summary.artifacts.push(report);
            }
        }

        Ok(summary)
    }

    async fn apply_full(&self, entry: &FileEntry) -> ArtifactReport {
        let key = self.planner.platform_key().to_string();
        let mut report = ArtifactReport {
            key: key.clone(),
            kind: ArtifactKind::Full,
            path: None,
            status: ArtifactStatus::Applied,
            restarted: false,
        };

        let result: Result<(PathBuf, ArtifactStatus)> = async {
            let file_name = installer_file_name(&entry.url)?;
            tokio::fs::create_dir_all(&self.config.scratch_dir).await?;
            let dest = self.config.scratch_dir.join(file_name);
            let status = self.apply_artifact(&key, entry, &dest).await?;
            Ok((dest, status))
        }
        .await;

        match result {
            Ok((dest, status)) => {
                self.stage(dest.clone());
                report.path = Some(dest);
                report.status = status;
            }
            Err(err) => {
                self.diagnostics
                    .record_error("installer download or checksum verification failed", &err);
                report.status = ArtifactStatus::Failed(Failure::from(&err));
            }
        }
        report
    }

    async fn apply_partial(&self, key: &str, entry: &FileEntry) -> ArtifactReport {
        let mut report = ArtifactReport {
            key: key.to_string(),
            kind: ArtifactKind::Partial,
            path: None,
            status: ArtifactStatus::Applied,
            restarted: false,
        };

        let result = match plain_file_name(key) {
            Ok(name) => {
                let dest = self.config.app_dir.join(name);
                report.path = Some(dest.clone());
                self.apply_artifact(key, entry, &dest).await
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(ArtifactStatus::Applied) => {
                info!(target: "updater", key, "partial update applied");
                report.restarted = self.restart_service(key).await;
            }
            Ok(status) => {
                debug!(target: "updater", key, "component already up to date");
                report.status = status;
            }
            Err(err) => {
                self.diagnostics
                    .record_error(&format!("partial update failed for {key}"), &err);
                report.status = ArtifactStatus::Failed(Failure::from(&err));
            }
        }
        report
    }

    /// Bring `dest` to the content described by `entry`. The destination is
    /// only replaced once the downloaded bytes have the expected digest.
    async fn apply_artifact(
        &self,
        key: &str,
        entry: &FileEntry,
        dest: &Path,
    ) -> Result<ArtifactStatus> {
        match digest(dest).await {
            Ok(actual) if digests_match(&actual, &entry.checksum) => {
                return Ok(ArtifactStatus::AlreadyCurrent);
            }
            Ok(_) => {}
            Err(UpdaterError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        let parent = dest
            .parent()
            .ok_or_else(|| UpdaterError::validation(format!("{key} has no parent directory")))?;
        tokio::fs::create_dir_all(parent).await?;
        let partial = tempfile::Builder::new()
            .prefix(".")
            .suffix(".download")
            .tempfile_in(parent)?
            .into_temp_path();

        info!(target: "updater", key, url = %entry.url, "downloading artefact");
        self.transport.fetch_to_file(&entry.url, &partial).await?;

        let actual = digest(&partial).await?;
        if !digests_match(&actual, &entry.checksum) {
            return Err(UpdaterError::IntegrityMismatch {
                key: key.to_string(),
                expected: entry.checksum.to_ascii_lowercase(),
                actual,
            });
        }

        partial.persist(dest).map_err(|err| UpdaterError::Io(err.error))?;
        Ok(ArtifactStatus::Applied)
    }

    async fn restart_service(&self, key: &str) -> bool {
        let Some(service) = self.services.get(key) else {
            return false;
        };

        let result: Result<()> = async {
            service.stop().await?;
            service.start().await
        }
        .await;

        match result {
            Ok(()) => {
                info!(target: "updater", key, "service restarted with updated component");
                true
            }
            Err(err) => {
                error!(target: "updater", key, error = %err, "service restart failed");
                self.diagnostics
                    .record_error(&format!("restart after updating {key} failed"), &err);
                false
            }
        }
    }

    fn stage(&self, path: PathBuf) {
        *write(&self.staged) = Some(StagedInstaller { path: path.clone() });

        let mut notified = lock(&self.notified);
        if notified.as_ref() != Some(&path) {
            info!(target: "updater", path = ?path, "full update is ready; notifying host");
            self.notifier.update_available();
            *notified = Some(path);
        }
    }

    fn abort(&self, context: &str, err: UpdaterError) -> UpdaterError {
        self.diagnostics.record_error(context, &err);
        err
    }

    fn publish(&self, phase: CyclePhase) {
        self.phase_tx.send_replace(phase);
    }
}

/// Cancellation is honoured between artefacts, never in the middle of one.
fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(UpdaterError::Cancelled);
    }
    Ok(())
}

/// Clears the waiting position even when the waiting caller is dropped.
struct PendingGuard<'a>(&'a AtomicBool);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Wait for the cycle in `slot`. The handle stays in the slot until the
/// cycle has finished, so an abandoned wait never detaches a running cycle.
async fn settle(
    slot: &mut Option<JoinHandle<CyclePhase>>,
) -> Option<std::result::Result<CyclePhase, JoinError>> {
    let handle = slot.as_mut()?;
    let outcome = handle.await;
    *slot = None;
    Some(outcome)
}

async fn digest(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    Ok(task::spawn_blocking(move || file_digest(&path)).await??)
}

/// Last path segment of the artefact URL, usable as a local file name.
fn installer_file_name(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|err| UpdaterError::validation(format!("invalid artefact url {url}: {err}")))?;
    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    plain_file_name(segment).map(str::to_string)
}

fn plain_file_name(name: &str) -> Result<&str> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', ':', '\0']);
    if invalid {
        return Err(UpdaterError::validation(format!(
            "{name:?} is not a plain file name"
        )));
    }
    Ok(name)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
