//! Interrupt/signal handling for graceful shutdown
//!
//! Provides a process-wide cancellation token tripped by Ctrl+C, so a stuck
//! download never blocks shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

/// Global flag for Ctrl+C interrupt handling
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

static SHUTDOWN: OnceLock<CancellationToken> = OnceLock::new();

/// Token cancelled on the first interrupt
pub fn shutdown_token() -> CancellationToken {
    SHUTDOWN.get_or_init(CancellationToken::new).clone()
}

/// Check if the application was interrupted (Ctrl+C pressed)
#[inline]
pub fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Set the interrupted flag and cancel in-flight work (called from signal handler)
pub fn set_interrupted() {
    INTERRUPTED.store(true, Ordering::SeqCst);
    shutdown_token().cancel();
}
