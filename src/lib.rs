//! OPP updater library interface
//!
//! Checks a remote release descriptor, downloads the newer installer with
//! progress reporting, and hands off to it with elevation.
//!
//! # Module Organization
//!
//! - [`manager`] - The update state machine (UpdateManager, UpdateEvent)
//! - [`version`] - Dotted version comparison
//! - [`fetcher`] - Release descriptor and changelog retrieval
//! - [`downloads`] - Installer download, progress and staging
//! - [`install`] - Elevated installer launch
//! - [`errors`] - Error types (UpdateError, Result)

pub mod cli;
pub mod client;
pub mod config;
pub mod core;
pub mod downloads;
pub mod errors;
pub mod fetcher;
pub mod fs;
pub mod install;
pub mod manager;
pub mod models;
pub mod signals;
pub mod status;
pub mod version;

pub use config::Config;
pub use errors::{Result, UpdateError};
pub use manager::{CheckOutcome, UpdateEvent, UpdateManager, UpdateSession, UpdateState};
pub use models::ReleaseDescriptor;
