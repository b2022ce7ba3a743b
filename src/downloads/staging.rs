//! On-disk placement of the downloaded installer
//!
//! The transfer is written to `<target>.tmp` and only promoted to the final
//! name after validation. The staging file is owned by a guard that removes
//! it on every path except a successful promotion.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const STAGING_SUFFIX: &str = "tmp";

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Real write check: create and delete a marker file in `dir`
pub fn is_writable(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }

    let marker = dir.join(format!(".write_check_{}", short_id()));
    match OpenOptions::new().write(true).create_new(true).open(&marker) {
        Ok(file) => {
            drop(file);
            if let Err(e) = fs::remove_file(&marker) {
                warn!(path = %marker.display(), error = %e, "Failed to remove write marker");
            }
            true
        }
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Directory is not writable");
            false
        }
    }
}

/// Pick the directory the installer goes to: `preferred` when writable,
/// otherwise a per-product folder under the system temp directory.
pub fn resolve_download_dir(preferred: &Path, product: &str) -> io::Result<PathBuf> {
    if is_writable(preferred) {
        return Ok(preferred.to_path_buf());
    }

    let fallback = std::env::temp_dir().join(format!("{}_Updates", product));
    warn!(
        preferred = %preferred.display(),
        fallback = %fallback.display(),
        "Updates directory is not writable, using temp directory"
    );

    if is_writable(&fallback) {
        Ok(fallback)
    } else {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("Neither {} nor {} is writable", preferred.display(), fallback.display()),
        ))
    }
}

/// Final artifact path for `file_name` in `dir`.
///
/// A leftover artifact from an earlier run is deleted; if it cannot be
/// (e.g. still locked by a running installer) a uniquely suffixed name is used.
pub fn prepare_target(dir: &Path, file_name: &str) -> PathBuf {
    let target = dir.join(file_name);
    if !target.exists() {
        return target;
    }

    match fs::remove_file(&target) {
        Ok(()) => {
            debug!(path = %target.display(), "Removed previous download");
            target
        }
        Err(e) => {
            let unique = with_suffix(&target, &short_id());
            warn!(
                path = %target.display(),
                error = %e,
                new_path = %unique.display(),
                "Could not remove previous download, using a unique name"
            );
            unique
        }
    }
}

/// `OPP_Setup_1.0.exe` + `ab12cd34` -> `OPP_Setup_1.0_ab12cd34.exe`
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("download");
    let name = match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, suffix, ext),
        None => format!("{}_{}", stem, suffix),
    };
    path.with_file_name(name)
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(ext);
    path.with_file_name(name)
}

/// Temporary file a transfer is written to. Removed on drop unless promoted.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
    promoted: bool,
}

impl StagingFile {
    /// Reserve `<target>.tmp`, clearing a stale one first
    pub fn for_target(target: &Path) -> Self {
        let path = append_extension(target, STAGING_SUFFIX);

        let path = if path.exists() {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed stale staging file");
                    path
                }
                Err(e) => {
                    let unique = append_extension(
                        &append_extension(target, &short_id()),
                        STAGING_SUFFIX,
                    );
                    warn!(
                        path = %path.display(),
                        error = %e,
                        new_path = %unique.display(),
                        "Could not remove stale staging file"
                    );
                    unique
                }
            }
        } else {
            path
        };

        Self { path, promoted: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the staged file onto `target`, replacing it if present.
    ///
    /// Falls back to copy + delete when the two paths are on different
    /// filesystems.
    pub async fn promote(mut self, target: &Path) -> io::Result<()> {
        match tokio::fs::rename(&self.path, target).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                debug!(from = %self.path.display(), to = %target.display(), "Cross-device move, copying");
                copy_then_remove(&self.path, target).await?;
            }
            Err(e) => return Err(e),
        }
        self.promoted = true;
        Ok(())
    }
}

/// Move for paths on different filesystems: copy over `to`, then delete `from`.
/// A leftover source only warns; the copy is already complete.
async fn copy_then_remove(from: &Path, to: &Path) -> io::Result<()> {
    tokio::fs::copy(from, to).await?;
    if let Err(e) = tokio::fs::remove_file(from).await {
        warn!(path = %from.display(), error = %e, "Failed to remove staging file after copy");
    }
    Ok(())
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.promoted {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed staging file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove staging file"),
        }
    }
}
