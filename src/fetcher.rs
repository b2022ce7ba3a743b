//! Release descriptor and changelog retrieval
//!
//! Each call is one fresh GET: nothing is cached or retried here.

use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client;
use crate::client::http::network_error;
use crate::errors::{Result, UpdateError};
use crate::models::ReleaseDescriptor;

#[derive(Debug, Clone)]
pub struct MetadataFetcher {
    client: Client,
    /// Deadline for one whole request, body included
    timeout: Duration,
}

impl MetadataFetcher {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Fetch and validate the descriptor published at `url`
    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<ReleaseDescriptor> {
        info!(url = %url, "Fetching release descriptor");
        let body = self.fetch_text(url, cancel).await?;
        debug!(len = body.len(), "Descriptor body received");

        let descriptor = ReleaseDescriptor::from_json(&body)?;
        info!(version = %descriptor.version, mandatory = descriptor.mandatory, "Descriptor parsed");
        Ok(descriptor)
    }

    /// Fetch a plain-text/markdown changelog
    pub async fn fetch_changelog(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        debug!(url = %url, "Fetching changelog");
        self.fetch_text(url, cancel).await
    }

    async fn fetch_text(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        let response = client::get(&self.client, url, false, Some(self.timeout), cancel).await?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UpdateError::Cancelled),
            body = response.text() => body.map_err(|e| network_error(url, e)),
        }
    }
}
