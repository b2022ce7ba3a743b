// Allow dead code for library items only exercised through lib.rs
#![allow(dead_code)]

mod cli;
mod client;
mod config;
mod core;
mod downloads;
mod errors;
mod fetcher;
mod fs;
mod install;
mod manager;
mod models;
mod signals;
mod status;
mod version;

use status::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};

/// Entry point - catches Ctrl+C and calls core::run()
///
/// Returns ExitStatus directly, which implements std::process::Termination.
fn main() -> ExitStatus {
    // Cancel in-flight requests instead of calling exit(), so the staging
    // file of an interrupted download is cleaned up
    ctrlc::set_handler(move || {
        signals::set_interrupted();

        eprintln!("\nInterrupted");

        // On second Ctrl+C, force exit (user really wants out)
        static SECOND_CTRL_C: AtomicBool = AtomicBool::new(false);
        if SECOND_CTRL_C.swap(true, Ordering::SeqCst) {
            std::process::exit(ExitStatus::Interrupted as i32);
        }
    })
    .ok();

    let args: Vec<String> = std::env::args().collect();
    let status = core::run(args);

    if signals::was_interrupted() {
        return ExitStatus::Interrupted;
    }

    status
}
