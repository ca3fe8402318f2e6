//! Seams towards the host application.
//!
//! The update pipeline never touches UI or process management directly; it
//! talks to the host through these traits.

use crate::error::Result;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tokio::sync::Mutex;

/// Receives the "update ready" signal. Fire-and-forget.
pub trait UpdateNotifier: Send + Sync {
    fn update_available(&self);
}

/// Stop/start control over a subprocess whose files can be patched in place.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn stop(&self) -> Result<()>;
    async fn start(&self) -> Result<()>;
}

/// Launches a staged installer without waiting for it.
pub trait InstallerLauncher: Send + Sync {
    fn launch(&self, installer: &Path, args: &[String]) -> io::Result<()>;
}

/// Host window / process lifecycle.
pub trait HostShell: Send + Sync {
    /// Ask the host to close through its normal termination path.
    fn request_close(&self);
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl UpdateNotifier for LogNotifier {
    fn update_available(&self) {
        tracing::info!(target: "updater", "update available; installer is staged");
    }
}

/// Host that has nothing to close.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedHost;

impl HostShell for DetachedHost {
    fn request_close(&self) {
        tracing::info!(target: "updater", "host close requested");
    }
}

/// Spawns the installer as a detached child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl InstallerLauncher for ProcessLauncher {
    fn launch(&self, installer: &Path, args: &[String]) -> io::Result<()> {
        let child = Command::new(installer)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        tracing::info!(
            target: "updater",
            installer = ?installer,
            pid = child.id(),
            "installer launched"
        );
        Ok(())
    }
}

/// A subprocess started from a fixed command line.
#[derive(Debug)]
pub struct ProcessService {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    child: Mutex<Option<tokio::process::Child>>,
}

impl ProcessService {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            child: Mutex::new(None),
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Whether a child spawned by this service is still alive.
    pub async fn is_running(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

#[async_trait]
impl ServiceControl for ProcessService {
    async fn stop(&self) -> Result<()> {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            if child.try_wait()?.is_none() {
                child.kill().await?;
            }
            tracing::info!(target: "updater", program = ?self.program, "service stopped");
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if child.try_wait()?.is_none() {
                return Ok(());
            }
        }

        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        let child = command.spawn()?;
        tracing::info!(
            target: "updater",
            program = ?self.program,
            pid = child.id(),
            "service started"
        );
        *guard = Some(child);
        Ok(())
    }
}
