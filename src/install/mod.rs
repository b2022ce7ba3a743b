//! Installer hand-off
//!
//! Runs the downloaded installer silently with elevation and, once it has
//! started, terminates the current process: a running binary cannot be
//! replaced on Windows, so the updater must vacate. That exit is the
//! documented terminal action of [`InstallLauncher::install`] and goes
//! through the [`ProcessExit`] seam so tests can observe it.

pub mod process;

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub use process::{reset_attributes, ProcessExit, ProcessLauncher, SystemExit, SystemLauncher};

use crate::errors::{Result, UpdateError};

/// Inno Setup flags: no UI, no reboot, close the running application
pub const DEFAULT_INSTALLER_ARGS: [&str; 3] = ["/VERYSILENT", "/NORESTART", "/CLOSEAPPLICATIONS"];

#[derive(Clone)]
pub struct InstallLauncher {
    launcher: Arc<dyn ProcessLauncher>,
    exit: Arc<dyn ProcessExit>,
    args: Vec<String>,
}

impl InstallLauncher {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, exit: Arc<dyn ProcessExit>) -> Self {
        Self {
            launcher,
            exit,
            args: DEFAULT_INSTALLER_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Launcher and exit backed by the real OS
    pub fn system() -> Self {
        Self::new(Arc::new(SystemLauncher), Arc::new(SystemExit))
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Launch the installer at `artifact`.
    ///
    /// Preconditions are checked before anything else: a path must be known
    /// (`NoArtifact`) and the file must exist (`ArtifactMissing`). `confirm`
    /// is then asked; declining returns `Ok(false)` with no side effects.
    /// On a successful launch the process exits with code 0.
    pub fn install(&self, artifact: Option<&Path>, confirm: &mut dyn FnMut() -> bool) -> Result<bool> {
        let path = match artifact {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => return Err(UpdateError::NoArtifact),
        };

        if !path.is_file() {
            return Err(UpdateError::ArtifactMissing(path.to_path_buf()));
        }

        if !confirm() {
            info!("Installation declined");
            return Ok(false);
        }

        reset_attributes(path);

        info!(path = %path.display(), args = ?self.args, "Launching installer");
        if let Err(e) = self.launcher.launch_elevated(path, &self.args) {
            warn!(error = %e, "Installer launch failed");
            return Err(e);
        }

        self.exit.exit(0);
        Ok(true)
    }
}

impl std::fmt::Debug for InstallLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallLauncher").field("args", &self.args).finish_non_exhaustive()
    }
}
