use crate::error::{Result, UpdaterError};
use crate::planner::default_platform_key;
use crate::signature::SignatureVerifier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_UPDATE_URL: &str = "https://updates.example.org/shell/version.json";

/// Public key compiled into the binary, base64 encoded.
pub const EMBEDDED_PUBLIC_KEY: Option<&str> = option_env!("UPDATER_PUBLIC_KEY");

/// Settings of the update pipeline. Every field has a default, so partial
/// JSON files are accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Pointer document location.
    pub update_url: String,
    /// Version string of the running host application.
    pub running_version: String,
    /// Manifest key of this platform's installer.
    pub platform_key: String,
    /// Components that may be replaced in place.
    pub partial_keys: BTreeSet<String>,
    /// Components whose service has to be restarted after replacement.
    pub restart_keys: BTreeSet<String>,
    /// Directory of the running application; partial artefacts land here.
    pub app_dir: PathBuf,
    /// Where the full-update installer is staged.
    pub scratch_dir: PathBuf,
    /// Where the durable diagnostic log is written.
    pub diagnostics_dir: PathBuf,
    /// Base64 Ed25519 public key trusted for version descriptions.
    pub public_key: Option<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub user_agent: String,
    /// Arguments passed to the installer for an unattended run.
    pub installer_args: Vec<String>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        let app_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            update_url: DEFAULT_UPDATE_URL.to_string(),
            running_version: env!("CARGO_PKG_VERSION").to_string(),
            platform_key: default_platform_key().to_string(),
            partial_keys: BTreeSet::from(["server.js".to_string()]),
            restart_keys: BTreeSet::from(["server.js".to_string()]),
            diagnostics_dir: app_dir.join("portable_config"),
            app_dir,
            scratch_dir: std::env::temp_dir().join("shell-updater"),
            public_key: EMBEDDED_PUBLIC_KEY.map(str::to_string),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            download_timeout_secs: 300,
            user_agent: concat!("shell-updater/", env!("CARGO_PKG_VERSION")).to_string(),
            installer_args: vec!["/S".to_string()],
        }
    }
}

impl UpdaterConfig {
    /// Config rooted at `app_dir`, with the diagnostic log beneath it.
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        let app_dir = app_dir.into();
        Self {
            diagnostics_dir: app_dir.join("portable_config"),
            app_dir,
            ..Self::default()
        }
    }

    /// Read a JSON config file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn update_url(mut self, url: impl Into<String>) -> Self {
        self.update_url = url.into();
        self
    }

    pub fn running_version(mut self, version: impl Into<String>) -> Self {
        self.running_version = version.into();
        self
    }

    pub fn platform_key(mut self, key: impl Into<String>) -> Self {
        self.platform_key = key.into();
        self
    }

    pub fn partial_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partial_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn restart_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.restart_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn diagnostics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diagnostics_dir = dir.into();
        self
    }

    pub fn public_key(mut self, key: impl Into<String>) -> Self {
        self.public_key = Some(key.into());
        self
    }

    pub fn installer_args(mut self, args: Vec<String>) -> Self {
        self.installer_args = args;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Verifier for the configured trust anchor.
    pub fn verifier(&self) -> Result<SignatureVerifier> {
        let key = self
            .public_key
            .as_deref()
            .ok_or_else(|| UpdaterError::validation("no public key configured"))?;
        SignatureVerifier::from_base64(key)
    }

    /// Create the scratch and diagnostics directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        std::fs::create_dir_all(&self.diagnostics_dir)?;
        Ok(())
    }
}
