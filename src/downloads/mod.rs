//! Installer download: streaming, progress and on-disk staging

pub mod downloader;
pub mod progress;
pub mod staging;

pub use downloader::{DownloadOptions, DownloadedArtifact, Downloader, CHUNK_SIZE};
pub use progress::ProgressThrottle;
