//! Exit status codes for the CLI
//!
//! The updater follows standard Unix exit code conventions:
//! - 0: Success (including "already up to date" and a declined install)
//! - 1: Any error (network, parse, download, launch, etc.)
//! - 130: User interrupted (Ctrl+C, standard SIGINT exit code)

use std::process::{ExitCode, Termination};

use crate::errors::UpdateError;

/// Exit status codes following standard Unix conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    /// Successful execution
    Success = 0,
    /// Any error
    Error = 1,
    /// User interrupted (Ctrl+C) - standard SIGINT code
    Interrupted = 130,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status as u8)
    }
}

impl Termination for ExitStatus {
    fn report(self) -> ExitCode {
        ExitCode::from(self as u8)
    }
}

impl ExitStatus {
    /// Exit status for a failed operation
    pub fn from_error(error: &UpdateError) -> Self {
        match error {
            UpdateError::Cancelled => ExitStatus::Interrupted,
            _ => ExitStatus::Error,
        }
    }
}
