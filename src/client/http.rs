//! HTTP request building and sending
//!
//! All network traffic of the updater goes through a single reqwest client
//! with an explicit connect timeout, and every request races the caller's
//! cancellation token. Overall deadlines are per request: small documents
//! get a total timeout, streamed downloads a stall timeout instead.

use reqwest::header::{HeaderValue, ACCEPT_ENCODING};
use reqwest::{Client, Response};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{Result, UpdateError};

pub const USER_AGENT_STRING: &str = concat!("OPP-Updater/", env!("CARGO_PKG_VERSION"));

/// Build the shared HTTP client
///
/// No total timeout is set here: it would also bound the time spent
/// streaming a large installer body.
pub fn build_client(connect_timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT_STRING)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| UpdateError::Network(format!("Failed to build HTTP client: {}", e)))
}

/// Issue a GET and fail on anything but a 2xx status.
///
/// `identity` asks the server for an uncompressed body so that
/// Content-Length matches the bytes we will write to disk. `total_timeout`
/// bounds the whole exchange, body included.
pub async fn get(
    client: &Client,
    url: &str,
    identity: bool,
    total_timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<Response> {
    let parsed = url::Url::parse(url)
        .map_err(|e| UpdateError::Network(format!("Invalid URL {:?}: {}", url, e)))?;

    let mut request = client.get(parsed);
    if identity {
        request = request.header(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }
    if let Some(timeout) = total_timeout {
        request = request.timeout(timeout);
    }

    debug!(url = %url, "Sending GET");

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
        result = request.send() => result.map_err(|e| network_error(url, e))?,
    };

    check_status(url, response)
}

fn check_status(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(UpdateError::Network(format!("GET {} returned HTTP {}", url, status)))
    }
}

pub(crate) fn network_error(url: &str, err: reqwest::Error) -> UpdateError {
    if err.is_timeout() {
        UpdateError::Network(format!("Request to {} timed out", url))
    } else if err.is_connect() {
        UpdateError::Network(format!("Could not connect to {}: {}", url, err))
    } else {
        UpdateError::Network(format!("Request to {} failed: {}", url, err))
    }
}
