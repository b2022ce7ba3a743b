//! Updater configuration

#[allow(clippy::module_inception)]
mod config;

pub use config::{Config, DEFAULT_CHECK_URL, DEFAULT_PRODUCT_NAME};
