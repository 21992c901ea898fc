use std::path::PathBuf;

/// Errors surfaced by the setup pipeline and the process supervisor.
///
/// Network and filesystem failures are translated into these variants at
/// component boundaries; callers never see a raw `reqwest` error.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Upstream metadata service unavailable ({url}): {reason}")]
    UpstreamUnavailable { url: String, reason: String },

    #[error("Version not found: {0}")]
    VersionNotFound(String),

    #[error("Path escapes the target directory: {0}")]
    PathTraversal(String),

    #[error("Integrity check failed for {path:?}: expected {expected}, got {actual}")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Loader installation failed: {0}")]
    LoaderInstall(String),

    #[error("Download of {url} failed after {attempts} attempt(s): {cause}")]
    DownloadFailed {
        url: String,
        attempts: u32,
        cause: String,
    },

    #[error("A server is already running in {0:?}")]
    AlreadyRunning(PathBuf),

    #[error("Server is not running")]
    NotRunning,

    #[error("Refusing to use {path:?}: {reason}")]
    UnsafeDirectory { path: PathBuf, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error(transparent)]
    Other(anyhow::Error),
}

pub type Result<T, E = SetupError> = std::result::Result<T, E>;

impl SetupError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SetupError::UpstreamUnavailable { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SetupError::Cancelled)
    }

    pub(crate) fn loader(message: impl Into<String>) -> Self {
        SetupError::LoaderInstall(message.into())
    }
}

// Helpers use anyhow for context chaining; a typed error that went through
// anyhow is recovered here so `Cancelled` and friends keep their identity.
impl From<anyhow::Error> for SetupError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<SetupError>() {
            Ok(typed) => typed,
            Err(other) => SetupError::Other(other),
        }
    }
}

impl From<tokio::task::JoinError> for SetupError {
    fn from(err: tokio::task::JoinError) -> Self {
        SetupError::Other(anyhow::anyhow!("Background task failed: {}", err))
    }
}
