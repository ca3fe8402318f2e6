//! Signed update pipeline for the desktop shell.
//!
//! The updater periodically fetches a two-stage manifest: a pointer document
//! naming the version description and carrying its signature, and the
//! description itself. The description is only decoded after its raw bytes
//! verified against the trusted Ed25519 key. Depending on the advertised shell
//! version the coordinator then either stages a full installer (handed off
//! later through [`UpdateCoordinator::run_installer_and_exit`]) or patches
//! individual components in place and restarts the services that own them.
//! Every artefact is SHA-256 checked before it is used.
//!
//! ```ignore
//! use std::sync::Arc;
//! use updater::{CyclePhase, ProcessService, UpdateCoordinator, UpdaterConfig};
//!
//! # async fn demo() -> updater::Result<()> {
//! let config = UpdaterConfig::new("/opt/shell").running_version("5.0.19");
//! let server = Arc::new(ProcessService::new("node", vec!["server.js".into()]));
//! let coordinator = UpdateCoordinator::builder(config)
//!     .restart_on_update("server.js", server)
//!     .build()?;
//!
//! if let Some(CyclePhase::Done(summary)) = coordinator.check_now().await {
//!     if summary.staged_installer.is_some() {
//!         coordinator.run_installer_and_exit()?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod checksum;
mod config;
mod coordinator;
pub mod diagnostics;
mod error;
pub mod host;
mod manifest;
mod planner;
mod signature;
mod transport;

pub use config::{UpdaterConfig, EMBEDDED_PUBLIC_KEY};
pub use coordinator::{
    ArtifactKind, ArtifactReport, ArtifactStatus, CyclePhase, CycleSummary, Failure,
    StagedInstaller, Submission, UpdateCoordinator, UpdateCoordinatorBuilder,
};
pub use diagnostics::DiagnosticLog;
pub use error::{ErrorKind, Result, UpdaterError};
pub use host::{
    DetachedHost, HostShell, InstallerLauncher, LogNotifier, ProcessLauncher, ProcessService,
    ServiceControl, UpdateNotifier,
};
pub use manifest::{
    FileEntry, ManifestFetcher, SignedDescription, VersionDescription, VersionPointer,
    MAX_MANIFEST_BYTES,
};
pub use planner::{default_platform_key, UpdatePlan, UpdatePlanner};
pub use signature::SignatureVerifier;
pub use transport::{ArtifactTransport, HttpTransport, HttpTransportBuilder};
