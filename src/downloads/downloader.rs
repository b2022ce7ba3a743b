//! Installer download with progress, staging and integrity checks

use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::progress::{ProgressThrottle, DEFAULT_PROGRESS_INTERVAL};
use super::staging::{prepare_target, resolve_download_dir, StagingFile};
use crate::client;
use crate::errors::{Result, UpdateError};
use crate::fs::installer_file_name;
use crate::models::ReleaseDescriptor;

/// Write granularity, also the progress granularity
pub const CHUNK_SIZE: usize = 8 * 1024;

pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Knobs for the download engine
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Prefix of the artifact filename (`<product>_Setup_<version>.exe`)
    pub product_name: String,
    /// Minimum spacing between progress reports
    pub progress_interval: Duration,
    /// Fail instead of warn when the size disagrees with the descriptor
    pub strict_size: bool,
    /// Longest wait for the response headers or for the next body chunk.
    /// A slow transfer that keeps delivering data never hits it.
    pub stall_timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            product_name: "OPP".to_string(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            strict_size: false,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        }
    }
}

/// A downloaded installer sitting at its final path
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedArtifact {
    pub path: PathBuf,
    pub bytes: u64,
    /// `(expected, actual)` when the descriptor's `FileSize` was off
    pub size_mismatch: Option<(u64, u64)>,
}

/// Streams an installer to disk
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    options: DownloadOptions,
}

impl Downloader {
    pub fn new(client: Client, options: DownloadOptions) -> Self {
        Self { client, options }
    }

    /// Download the installer described by `descriptor` into `destination_dir`.
    ///
    /// `on_progress` receives non-decreasing percentages while the total size
    /// is known, and `100` exactly once after the file is in place. Nothing is
    /// left at the final path when this fails, and the staging file is removed.
    /// No retries happen here.
    pub async fn download(
        &self,
        descriptor: &ReleaseDescriptor,
        destination_dir: &Path,
        on_progress: &mut (dyn FnMut(u8) + Send),
        cancel: &CancellationToken,
    ) -> Result<DownloadedArtifact> {
        let url = descriptor
            .download_url()
            .ok_or_else(|| UpdateError::Download("Descriptor has no DownloadUrl".to_string()))?;

        let dir = resolve_download_dir(destination_dir, &self.options.product_name)
            .map_err(|e| UpdateError::download("No writable updates directory", e))?;
        let file_name = installer_file_name(&self.options.product_name, &descriptor.version);
        let target = prepare_target(&dir, &file_name);
        let staging = StagingFile::for_target(&target);

        info!(url = %url, path = %target.display(), "Downloading update");

        let stall = self.options.stall_timeout;
        let mut response = tokio::time::timeout(stall, client::get(&self.client, url, true, None, cancel))
            .await
            .map_err(|_| UpdateError::Download(format!("No response from {} within {:?}", url, stall)))?
            .map_err(|e| match e {
                UpdateError::Cancelled => UpdateError::Cancelled,
                other => UpdateError::Download(other.to_string()),
            })?;

        let content_length = response.content_length().filter(|&len| len > 0);
        let total = content_length.or_else(|| descriptor.expected_size());
        debug!(content_length = ?content_length, total = ?total, "Response headers received");

        let file = tokio::fs::File::create(staging.path())
            .await
            .map_err(|e| UpdateError::download("Failed to create staging file", e))?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);

        let mut throttle = ProgressThrottle::new(self.options.progress_interval);
        let mut hasher = descriptor.expected_sha256().map(|_| Sha256::new());
        let mut bytes_written = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(bytes = bytes_written, "Download cancelled");
                    return Err(UpdateError::Cancelled);
                }
                result = tokio::time::timeout(stall, response.chunk()) => match result {
                    Ok(chunk) => chunk.map_err(|e| UpdateError::download("Transfer interrupted", e))?,
                    Err(_) => {
                        return Err(UpdateError::Download(format!(
                            "Transfer stalled: no data received for {:?}",
                            stall
                        )));
                    }
                }
            };

            let Some(chunk) = next else {
                break;
            };

            for piece in chunk.chunks(CHUNK_SIZE) {
                writer
                    .write_all(piece)
                    .await
                    .map_err(|e| UpdateError::download("Failed to write update file", e))?;
                if let Some(ref mut h) = hasher {
                    h.update(piece);
                }
                bytes_written += piece.len() as u64;

                if let Some(total) = total {
                    if let Some(pct) = throttle.observe(bytes_written, total) {
                        on_progress(pct);
                    }
                }
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| UpdateError::download("Failed to flush update file", e))?;
        let file = writer.into_inner();
        file.sync_all()
            .await
            .map_err(|e| UpdateError::download("Failed to sync update file", e))?;
        drop(file);

        if bytes_written == 0 {
            return Err(UpdateError::Download("Downloaded file is empty".to_string()));
        }

        if let Some(expected) = content_length {
            if expected != bytes_written {
                return Err(UpdateError::Download(format!(
                    "Transfer incomplete: server announced {} bytes, received {}",
                    expected, bytes_written
                )));
            }
        }

        let size_mismatch = self.check_expected_size(descriptor, bytes_written)?;

        if let (Some(expected), Some(hasher)) = (descriptor.expected_sha256(), hasher) {
            let actual = hex::encode(hasher.finalize());
            if actual != expected {
                return Err(UpdateError::ChecksumMismatch { expected, actual });
            }
            debug!("Checksum verified");
        }

        let is_exe = target
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("exe"));
        if !is_exe {
            warn!(path = %target.display(), "Downloaded file has an unexpected extension");
        }

        staging
            .promote(&target)
            .await
            .map_err(|e| UpdateError::download("Failed to move update into place", e))?;

        if total.is_some() {
            if let Some(pct) = throttle.complete() {
                on_progress(pct);
            }
        }

        info!(path = %target.display(), bytes = bytes_written, "Update downloaded");

        Ok(DownloadedArtifact {
            path: target,
            bytes: bytes_written,
            size_mismatch,
        })
    }

    /// Compare against the descriptor's `FileSize`: a warning by default,
    /// an error with `strict_size`.
    fn check_expected_size(
        &self,
        descriptor: &ReleaseDescriptor,
        actual: u64,
    ) -> Result<Option<(u64, u64)>> {
        let Some(expected) = descriptor.expected_size() else {
            return Ok(None);
        };
        if expected == actual {
            return Ok(None);
        }

        if self.options.strict_size {
            return Err(UpdateError::SizeMismatch { expected, actual });
        }

        warn!(expected, actual, "Downloaded size differs from descriptor FileSize");
        Ok(Some((expected, actual)))
    }
}
