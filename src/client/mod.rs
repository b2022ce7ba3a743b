//! HTTP client functionality

pub mod http;

// Re-exports
pub use http::{build_client, get, USER_AGENT_STRING};
