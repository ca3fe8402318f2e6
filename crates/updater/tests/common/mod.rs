//! Shared fixtures for the updater integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use updater::{
    ArtifactTransport, HostShell, InstallerLauncher, Result, ServiceControl, SignatureVerifier,
    UpdateNotifier, UpdaterConfig, UpdaterError,
};

pub const POINTER_URL: &str = "https://updates.test/version.json";
pub const DESCRIPTION_URL: &str = "https://updates.test/version-desc.json";
pub const PLATFORM_KEY: &str = "windows-x64";
pub const INSTALLER_URL: &str = "https://updates.test/releases/Shell-Setup-5.0.20.exe";
pub const SERVER_URL: &str = "https://updates.test/releases/server.js";

pub fn release_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

pub fn rogue_key() -> SigningKey {
    SigningKey::from_bytes(&[13u8; 32])
}

pub fn verifier() -> SignatureVerifier {
    SignatureVerifier::new(release_key().verifying_key())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Description JSON listing `(key, url, checksum)` entries.
pub fn description_json(shell_version: &str, files: &[(&str, &str, &str)]) -> String {
    let files: serde_json::Map<String, serde_json::Value> = files
        .iter()
        .map(|(key, url, checksum)| {
            (
                key.to_string(),
                serde_json::json!({ "url": url, "checksum": checksum }),
            )
        })
        .collect();
    serde_json::to_string_pretty(&serde_json::json!({
        "shellVersion": shell_version,
        "files": files,
    }))
    .expect("description serialises")
}

/// Pointer JSON for `description` signed with `key`.
pub fn pointer_json(description: &str, key: &SigningKey) -> String {
    let signature = general_purpose::STANDARD.encode(key.sign(description.as_bytes()).to_bytes());
    serde_json::json!({ "versionDesc": DESCRIPTION_URL, "signature": signature }).to_string()
}

/// In-memory transport counting every request.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, Vec<u8>>>,
    fetches: Mutex<Vec<String>>,
    downloads: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), body.into());
    }

    /// Serve a manifest pair for `description`, signed with `key`.
    pub fn publish(&self, description: &str, key: &SigningKey) {
        self.serve(POINTER_URL, pointer_json(description, key));
        self.serve(DESCRIPTION_URL, description.to_string());
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    fn body(&self, url: &str) -> Result<Vec<u8>> {
        self.routes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| UpdaterError::transport(url, "404 Not Found"))
    }
}

#[async_trait]
impl ArtifactTransport for MockTransport {
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes> {
        self.fetches.lock().unwrap().push(url.to_string());
        self.body(url).map(Bytes::from)
    }

    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        self.downloads.lock().unwrap().push(url.to_string());
        let body = self.body(url)?;
        tokio::fs::write(dest, &body).await?;
        Ok(body.len() as u64)
    }
}

/// Transport that holds every request until released.
pub struct GatedTransport {
    pub inner: Arc<MockTransport>,
    pub gate: tokio::sync::Semaphore,
}

#[async_trait]
impl ArtifactTransport for GatedTransport {
    async fn fetch_bytes(&self, url: &str) -> Result<Bytes> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| UpdaterError::transport(url, "gate closed"))?;
        self.inner.fetch_bytes(url).await
    }

    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        self.inner.fetch_to_file(url, dest).await
    }
}

#[derive(Default)]
pub struct CountingNotifier {
    pub count: AtomicUsize,
}

impl UpdateNotifier for CountingNotifier {
    fn update_available(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingLauncher {
    pub launches: Mutex<Vec<(PathBuf, Vec<String>)>>,
    pub fail: AtomicBool,
}

impl InstallerLauncher for RecordingLauncher {
    fn launch(&self, installer: &Path, args: &[String]) -> std::io::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "launch refused",
            ));
        }
        self.launches
            .lock()
            .unwrap()
            .push((installer.to_path_buf(), args.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingHost {
    pub close_requests: AtomicUsize,
}

impl HostShell for RecordingHost {
    fn request_close(&self) {
        self.close_requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records stop/start calls together with the component content seen at
/// stop time.
pub struct RecordingService {
    pub events: Mutex<Vec<String>>,
    watched: PathBuf,
}

impl RecordingService {
    pub fn new(watched: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            watched,
        })
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceControl for RecordingService {
    async fn stop(&self) -> Result<()> {
        let content = std::fs::read_to_string(&self.watched).unwrap_or_default();
        self.events.lock().unwrap().push(format!("stop:{content}"));
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.events.lock().unwrap().push("start".to_string());
        Ok(())
    }
}

/// Config rooted in `root` with separate app, scratch and log directories.
pub fn test_config(root: &Path, running_version: &str) -> UpdaterConfig {
    let app_dir = root.join("app");
    std::fs::create_dir_all(&app_dir).unwrap();
    let mut config = UpdaterConfig::new(&app_dir)
        .update_url(POINTER_URL)
        .running_version(running_version)
        .platform_key(PLATFORM_KEY)
        .partial_keys(["server.js"])
        .restart_keys(["server.js"])
        .scratch_dir(root.join("scratch"))
        .diagnostics_dir(root.join("logs"));
    config.public_key = None;
    config
}

/// Concatenated content of every diagnostic log file.
pub fn diagnostic_log(root: &Path) -> String {
    let dir = root.join("logs");
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return String::new();
    };
    let mut content = String::new();
    for entry in entries.flatten() {
        content.push_str(&std::fs::read_to_string(entry.path()).unwrap_or_default());
    }
    content
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
