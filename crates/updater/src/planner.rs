use crate::manifest::{FileEntry, VersionDescription};
use std::collections::BTreeSet;

/// What a cycle has to apply, derived from a verified description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    pub needs_full_update: bool,
    /// Installer for this platform, when a full update is needed and published.
    pub full_artifact: Option<FileEntry>,
    /// In-place replacements, only populated when no full update is needed.
    pub partial_artifacts: Vec<(String, FileEntry)>,
}

impl UpdatePlan {
    /// Nothing to download or apply.
    pub fn is_empty(&self) -> bool {
        self.full_artifact.is_none() && self.partial_artifacts.is_empty()
    }
}

/// Decides between a full reinstall and per-component patches.
#[derive(Debug, Clone)]
pub struct UpdatePlanner {
    platform_key: String,
    partial_keys: BTreeSet<String>,
}

impl UpdatePlanner {
    pub fn new(
        platform_key: impl Into<String>,
        partial_keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            platform_key: platform_key.into(),
            partial_keys: partial_keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn platform_key(&self) -> &str {
        &self.platform_key
    }

    /// Versions are compared as opaque strings; any difference means the
    /// running shell is stale and must be reinstalled.
    pub fn plan(
        &self,
        description: &VersionDescription,
        running_version: &str,
        force_full_update: bool,
    ) -> UpdatePlan {
        let needs_full_update = force_full_update || description.shell_version != running_version;

        if needs_full_update {
            return UpdatePlan {
                needs_full_update,
                full_artifact: description.files.get(&self.platform_key).cloned(),
                partial_artifacts: Vec::new(),
            };
        }

        let partial_artifacts = self
            .partial_keys
            .iter()
            .filter_map(|key| {
                description
                    .files
                    .get(key)
                    .map(|entry| (key.clone(), entry.clone()))
            })
            .collect();

        UpdatePlan {
            needs_full_update,
            full_artifact: None,
            partial_artifacts,
        }
    }
}

/// Manifest key of the installer for the platform this binary was built for.
pub fn default_platform_key() -> &'static str {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("windows", "x86") => "windows-x86",
        ("windows", "aarch64") => "windows-arm64",
        ("windows", _) => "windows-x64",
        ("macos", "aarch64") => "macos-arm64",
        ("macos", _) => "macos-x64",
        ("linux", "aarch64") => "linux-arm64",
        _ => "linux-x64",
    }
}
