use std::fmt;

/// Convenient result alias for updater operations.
pub type Result<T> = std::result::Result<T, UpdaterError>;

/// Errors that can occur while checking for or applying an update.
#[derive(thiserror::Error, Debug)]
pub enum UpdaterError {
    /// HTTP request failed (unreachable host, timeout, non-success status).
    #[error("network request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Transport failure reported by a non-reqwest transport.
    #[error("fetching {url} failed: {reason}")]
    Transport {
        /// URL that was being fetched.
        url: String,
        /// Human readable cause.
        reason: String,
    },
    /// A manifest document could not be decoded from JSON.
    #[error("manifest decoding failed: {0}")]
    ManifestDecode(#[from] serde_json::Error),
    /// A manifest document decoded but its content is unusable.
    #[error("malformed manifest: {0}")]
    Malformed(String),
    /// The version description signature did not verify.
    #[error("version description signature invalid")]
    SignatureInvalid,
    /// The downloaded artefact hash did not match the manifest.
    #[error("integrity check failed for {key} (expected {expected}, got {actual})")]
    IntegrityMismatch {
        /// Component key of the artefact.
        key: String,
        /// Expected SHA-256 digest.
        expected: String,
        /// Actual SHA-256 digest.
        actual: String,
    },
    /// Failed to perform an I/O operation.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
    /// Installer handoff was requested but nothing is staged.
    #[error("no validated installer is staged")]
    NoStagedInstaller,
    /// The cycle was cancelled before the step started.
    #[error("update cycle cancelled")]
    Cancelled,
    /// Background worker failed to complete.
    #[error("update worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl UpdaterError {
    /// Helper for wrapping validation failures of manifest content.
    pub fn validation(msg: impl Into<String>) -> Self {
        UpdaterError::Malformed(msg.into())
    }

    /// Helper for transports that do not produce a [`reqwest::Error`].
    pub fn transport(url: impl Into<String>, reason: impl Into<String>) -> Self {
        UpdaterError::Transport {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Category of the failure, used for propagation decisions and logging.
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdaterError::Network(_) | UpdaterError::Transport { .. } => ErrorKind::Network,
            UpdaterError::ManifestDecode(_) | UpdaterError::Malformed(_) => {
                ErrorKind::MalformedData
            }
            UpdaterError::SignatureInvalid => ErrorKind::Authenticity,
            UpdaterError::IntegrityMismatch { .. } => ErrorKind::Integrity,
            UpdaterError::Io(_) => ErrorKind::Filesystem,
            UpdaterError::NoStagedInstaller => ErrorKind::Caller,
            UpdaterError::Cancelled => ErrorKind::Cancelled,
            UpdaterError::Worker(_) => ErrorKind::Internal,
        }
    }
}

/// Failure categories of the update pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    MalformedData,
    Authenticity,
    Integrity,
    Filesystem,
    Caller,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "NetworkError",
            ErrorKind::MalformedData => "MalformedDataError",
            ErrorKind::Authenticity => "AuthenticityError",
            ErrorKind::Integrity => "IntegrityError",
            ErrorKind::Filesystem => "FilesystemError",
            ErrorKind::Caller => "CallerError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "InternalError",
        };
        f.write_str(name)
    }
}
