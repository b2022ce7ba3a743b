//! Command dispatch for the `opp-updater` binary
//!
//! The binary is a thin caller of [`UpdateManager`]: it renders the manager's
//! events on the terminal and answers its confirmation prompts.

use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Command, LogFormat};
use crate::config::Config;
use crate::errors::{Result, UpdateError};
use crate::install::InstallLauncher;
use crate::manager::{CheckOutcome, UpdateEvent, UpdateManager, UpdateState};
use crate::models::ReleaseDescriptor;
use crate::signals;
use crate::status::ExitStatus;

const LOG_ENV: &str = "OPP_UPDATER_LOG";

/// Main entry point for the CLI.
///
/// Handles argument parsing, configuration loading, and dispatches
/// to the requested subcommand.
pub fn run(args: Vec<String>) -> ExitStatus {
    let parsed = match Args::try_parse_from(&args) {
        Ok(args) => args,
        Err(e) => {
            e.print().ok();
            return if e.kind() == clap::error::ErrorKind::DisplayHelp
                || e.kind() == clap::error::ErrorKind::DisplayVersion {
                ExitStatus::Success
            } else {
                ExitStatus::Error
            };
        }
    };

    init_logging(parsed.verbose, parsed.log_format.unwrap_or_default());

    let loaded = match &parsed.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}", e);
            Config::default()
        }
    };
    let config = apply_overrides(config, &parsed);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => return handle_error(UpdateError::Io(e)),
    };

    match runtime.block_on(program(parsed, config)) {
        Ok(status) => status,
        Err(e) => handle_error(e),
    }
}

fn init_logging(verbose: u8, format: LogFormat) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    // A subscriber may already be installed when embedded
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}

/// Command-line flags win over the config file
fn apply_overrides(mut config: Config, args: &Args) -> Config {
    if let Some(ref url) = args.check_url {
        config.check_url = url.clone();
    }
    if let Some(ref dir) = args.updates_dir {
        config.updates_dir = dir.clone();
    }
    if let Some(timeout) = args.timeout.filter(|t| t.is_finite() && *t > 0.0) {
        config.timeout = Duration::from_secs_f64(timeout);
    }
    if args.strict_size {
        config.strict_size = true;
    }
    config
}

pub async fn program(args: Args, config: Config) -> Result<ExitStatus> {
    if let Command::Install { ref file } = args.command {
        return tokio::task::block_in_place(|| install_file(file, &config, args.yes));
    }

    let manager = UpdateManager::new(args.current_version.clone(), &config)?
        .with_cancellation(signals::shutdown_token());
    let renderer = tokio::spawn(render_events(manager.subscribe()));

    let result = dispatch(&manager, &args).await;

    // Dropping the manager closes the event channel and ends the renderer
    drop(manager);
    let _ = renderer.await;

    result
}

async fn dispatch(manager: &UpdateManager, args: &Args) -> Result<ExitStatus> {
    let descriptor = match manager.check_for_updates().await {
        CheckOutcome::UpdateAvailable(d) => d,
        CheckOutcome::NoUpdate => {
            println!("{} ({})", style("Already up to date").green(), manager.current_version());
            return Ok(ExitStatus::Success);
        }
        CheckOutcome::Busy => {
            return Err(UpdateError::InvalidState {
                action: "check for updates",
                state: manager.state().to_string(),
            })
        }
        CheckOutcome::Failed(e) => return Err(e),
    };

    print_release(&descriptor, manager.current_version(), &args.locale);

    match args.command {
        Command::Check => Ok(ExitStatus::Success),
        Command::Changelog => {
            println!("{}", manager.download_changelog().await);
            Ok(ExitStatus::Success)
        }
        Command::Download => {
            let path = manager.download_update().await?;
            println!("{}", path.display());
            Ok(ExitStatus::Success)
        }
        Command::Update => {
            println!("\n{}", manager.download_changelog().await);

            let proceed = args.yes
                || descriptor.mandatory
                || confirm_blocking(format!("Download and install version {}?", descriptor.version)).await;
            if !proceed {
                println!("Update skipped");
                return Ok(ExitStatus::Success);
            }

            manager.download_update().await?;

            // The prompt and the installer launch block; keep them off the async workers
            let yes = args.yes;
            let launched =
                tokio::task::block_in_place(|| manager.install_update(&mut || yes || confirm_close()))?;
            if !launched {
                println!("Installation cancelled");
            }
            Ok(ExitStatus::Success)
        }
        Command::Install { .. } => unreachable!("handled before the manager is built"),
    }
}

fn install_file(file: &Path, config: &Config, yes: bool) -> Result<ExitStatus> {
    let installer = InstallLauncher::system().with_args(config.installer_args.clone());
    if !installer.install(Some(file), &mut || yes || confirm_close())? {
        println!("Installation cancelled");
    }
    Ok(ExitStatus::Success)
}

fn print_release(descriptor: &ReleaseDescriptor, current: &str, locale: &str) {
    println!(
        "{} {} (current {})",
        style("Update available:").cyan().bold(),
        style(&descriptor.version).bold(),
        current
    );
    if let Some(date) = descriptor.release_date() {
        println!("Released: {}", date);
    }
    if descriptor.mandatory {
        println!("{}", style("This update is mandatory").yellow());
    }
    if let Some(message) = descriptor.message_for(locale) {
        println!("{}", message);
    }
}

fn confirm(prompt: &str) -> bool {
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(true)
        .interact()
        .unwrap_or(false)
}

/// Ask on a blocking thread so the runtime keeps driving the event renderer
async fn confirm_blocking(prompt: String) -> bool {
    tokio::task::spawn_blocking(move || confirm(&prompt)).await.unwrap_or(false)
}

fn confirm_close() -> bool {
    confirm("The application will be closed to install the update. Continue?")
}

/// Draw download progress and surface failures from the manager
async fn render_events(mut events: UnboundedReceiver<UpdateEvent>) {
    let mut bar: Option<ProgressBar> = None;

    while let Some(event) = events.recv().await {
        match event {
            UpdateEvent::StatusChanged(UpdateState::Downloading) => {
                let pb = ProgressBar::new(100);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}%")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                );
                bar = Some(pb);
            }
            UpdateEvent::Progress(pct) => {
                if let Some(ref pb) = bar {
                    pb.set_position(u64::from(pct));
                }
            }
            UpdateEvent::StatusChanged(UpdateState::Ready) => {
                if let Some(pb) = bar.take() {
                    pb.finish_with_message("Download complete");
                }
            }
            // The error itself is reported by handle_error
            UpdateEvent::StatusChanged(UpdateState::Error(_)) => {
                if let Some(pb) = bar.take() {
                    pb.abandon_with_message("Download failed");
                }
            }
            UpdateEvent::Message(message) => {
                eprintln!("{} {}", style("Warning:").yellow(), message);
            }
            UpdateEvent::StatusChanged(_) | UpdateEvent::CheckingChanged(_) => {}
        }
    }
}

fn handle_error(error: UpdateError) -> ExitStatus {
    eprintln!("{} {}", style("Error:").red().bold(), error);
    ExitStatus::from_error(&error)
}
