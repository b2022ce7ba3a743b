//! Error types for the updater

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for update operations
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Invalid version format: {0:?}")]
    InvalidVersionFormat(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Download error: {0}")]
    Download(String),

    /// Soft sub-case of a download failure, only raised under strict size checking
    #[error("Downloaded size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("No update has been downloaded")]
    NoArtifact,

    #[error("Update file does not exist: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Administrator rights were not granted; accept the elevation prompt to install the update")]
    ElevationDenied,

    #[error("Failed to launch installer: {0}")]
    Launch(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpdateError::Network(_)
                | UpdateError::Download(_)
                | UpdateError::Cancelled
                | UpdateError::Io(_)
        )
    }

    /// Wrap a transport/filesystem failure that happened during a download
    pub(crate) fn download(context: &str, err: impl std::fmt::Display) -> Self {
        UpdateError::Download(format!("{}: {}", context, err))
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            UpdateError::Parse(err.to_string())
        } else {
            UpdateError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for UpdateError {
    fn from(err: serde_json::Error) -> Self {
        UpdateError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(UpdateError::Network("timeout".into()).is_transient());
        assert!(UpdateError::Cancelled.is_transient());
        assert!(!UpdateError::NoArtifact.is_transient());
        assert!(!UpdateError::ElevationDenied.is_transient());
        assert!(!UpdateError::InvalidVersionFormat("x".into()).is_transient());
    }

    #[test]
    fn test_messages_are_human_readable() {
        let err = UpdateError::ArtifactMissing(PathBuf::from("OPP_Setup_2.0.0.exe"));
        assert_eq!(err.to_string(), "Update file does not exist: OPP_Setup_2.0.0.exe");

        let err = UpdateError::InvalidState { action: "install", state: "Idle".into() };
        assert_eq!(err.to_string(), "Cannot install while Idle");

        let err = UpdateError::SizeMismatch { expected: 10, actual: 9 };
        assert!(err.to_string().contains("expected 10 bytes"));
    }

    #[test]
    fn test_json_error_is_parse() {
        let err: UpdateError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, UpdateError::Parse(_)));
    }
}
