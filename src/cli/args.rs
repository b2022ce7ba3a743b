//! CLI argument definitions using clap
//!
//! This module defines all command-line arguments for the updater.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// OPP updater - check for, download and install new releases
#[derive(Parser, Debug, Clone)]
#[command(name = "opp-updater", version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    // =========================================================================
    // SOURCES
    // =========================================================================

    /// Config file (defaults to <config dir>/opp/updater.toml)
    #[arg(long = "config", value_name = "FILE", env = "OPP_UPDATER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Release descriptor URL
    #[arg(long = "check-url", value_name = "URL", env = "OPP_UPDATER_URL", global = true)]
    pub check_url: Option<String>,

    /// Directory the installer is downloaded to
    #[arg(long = "updates-dir", value_name = "DIR", env = "OPP_UPDATER_DIR", global = true)]
    pub updates_dir: Option<PathBuf>,

    /// Version of the installed application
    #[arg(long = "current-version", value_name = "VERSION", default_value = env!("CARGO_PKG_VERSION"), global = true)]
    pub current_version: String,

    // =========================================================================
    // BEHAVIOUR
    // =========================================================================

    /// Timeout in seconds for every HTTP request
    #[arg(long = "timeout", value_name = "SECONDS", global = true)]
    pub timeout: Option<f64>,

    /// Fail when the downloaded size differs from the published size
    #[arg(long = "strict-size", action = ArgAction::SetTrue, global = true)]
    pub strict_size: bool,

    /// Answer yes to every prompt
    #[arg(short = 'y', long = "yes", action = ArgAction::SetTrue, global = true)]
    pub yes: bool,

    /// Locale used for the release notification message
    #[arg(long = "locale", value_name = "CODE", default_value = "en", global = true)]
    pub locale: String,

    // =========================================================================
    // TROUBLESHOOTING
    // =========================================================================

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format for structured logging: json (JSON Lines) or text (default)
    #[arg(long = "log-format", value_name = "FORMAT", value_enum, global = true)]
    pub log_format: Option<LogFormat>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Check whether a newer release is published
    Check,
    /// Print the changelog of the latest release
    Changelog,
    /// Download the latest release if it is newer
    Download,
    /// Run a downloaded installer
    Install {
        /// Installer to run
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Check, download and install in one go
    Update,
}

/// Log format for structured output
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Plain text output (default)
    #[default]
    Text,
    /// JSON Lines format for parsing
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let args = Args::try_parse_from(["opp-updater", "check"]).unwrap();
        assert_eq!(args.command, Command::Check);
        assert_eq!(args.current_version, env!("CARGO_PKG_VERSION"));
        assert!(!args.yes);

        let args = Args::try_parse_from(["opp-updater", "install", "setup.exe", "-y"]).unwrap();
        assert_eq!(args.command, Command::Install { file: PathBuf::from("setup.exe") });
        assert!(args.yes);
    }

    #[test]
    fn test_global_options() {
        let args = Args::try_parse_from([
            "opp-updater",
            "update",
            "--check-url",
            "http://localhost/update_info.json",
            "--current-version",
            "1.0.0",
            "--timeout",
            "5",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.check_url.as_deref(), Some("http://localhost/update_info.json"));
        assert_eq!(args.current_version, "1.0.0");
        assert_eq!(args.timeout, Some(5.0));
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Args::try_parse_from(["opp-updater"]).is_err());
    }
}
