use crate::checksum::is_sha256_hex;
use crate::error::{Result, UpdaterError};
use crate::signature::SignatureVerifier;
use crate::transport::ArtifactTransport;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Upper bound for either manifest document.
pub const MAX_MANIFEST_BYTES: usize = 1024 * 1024;

/// First-stage document: where the description lives and its signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionPointer {
    /// URL of the version description document.
    #[serde(rename = "versionDesc")]
    pub version_desc: String,
    /// Base64 encoded signature over the raw description bytes.
    pub signature: String,
}

/// One downloadable artefact of a release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub url: String,
    /// Expected SHA-256 digest (hex).
    pub checksum: String,
}

/// Signed second-stage document describing a release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionDescription {
    /// Version of the host application this release ships.
    #[serde(rename = "shellVersion")]
    pub shell_version: String,
    /// Artefacts keyed by component key.
    pub files: BTreeMap<String, FileEntry>,
}

impl VersionDescription {
    fn validate(&self) -> Result<()> {
        for (key, entry) in &self.files {
            if entry.url.trim().is_empty() {
                return Err(UpdaterError::validation(format!("empty url for {key}")));
            }
            if !is_sha256_hex(&entry.checksum) {
                return Err(UpdaterError::validation(format!(
                    "checksum for {key} is not a SHA-256 hex digest"
                )));
            }
        }
        Ok(())
    }
}

/// Raw description bytes as received, paired with the claimed signature.
///
/// The only way to get at the [`VersionDescription`] is [`SignedDescription::verify`],
/// which checks the signature over exactly these bytes before decoding them.
#[derive(Debug, Clone)]
pub struct SignedDescription {
    raw: Bytes,
    signature: String,
}

impl SignedDescription {
    pub fn new(raw: impl Into<Bytes>, signature: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            signature: signature.into(),
        }
    }

    /// Bytes the signature is checked against.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Verify, then decode and validate.
    pub fn verify(&self, verifier: &SignatureVerifier) -> Result<VersionDescription> {
        if !verifier.verify(&self.raw, &self.signature) {
            return Err(UpdaterError::SignatureInvalid);
        }
        let description: VersionDescription = serde_json::from_slice(&self.raw)?;
        description.validate()?;
        Ok(description)
    }
}

/// Retrieves the two-stage manifest. Performs no retries.
#[derive(Clone)]
pub struct ManifestFetcher {
    transport: Arc<dyn ArtifactTransport>,
}

impl ManifestFetcher {
    pub fn new(transport: Arc<dyn ArtifactTransport>) -> Self {
        Self { transport }
    }

    /// Fetch the pointer at `pointer_url`, then the description it names.
    pub async fn fetch(&self, pointer_url: &str) -> Result<SignedDescription> {
        let pointer_bytes = self.fetch_document(pointer_url).await?;
        let pointer: VersionPointer = serde_json::from_slice(&pointer_bytes)?;
        if pointer.version_desc.trim().is_empty() {
            return Err(UpdaterError::validation("pointer has an empty versionDesc"));
        }

        tracing::debug!(
            target: "updater",
            url = %pointer.version_desc,
            "fetching version description"
        );
        let raw = self.fetch_document(&pointer.version_desc).await?;
        Ok(SignedDescription::new(raw, pointer.signature))
    }

    async fn fetch_document(&self, url: &str) -> Result<Bytes> {
        let bytes = self.transport.fetch_bytes(url).await?;
        if bytes.len() > MAX_MANIFEST_BYTES {
            return Err(UpdaterError::validation(format!(
                "document at {url} exceeds {MAX_MANIFEST_BYTES} bytes"
            )));
        }
        Ok(bytes)
    }
}
