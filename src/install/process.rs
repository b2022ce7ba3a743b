//! OS process primitives used by the installer hand-off

use std::path::Path;
use tracing::{info, warn};

use crate::errors::{Result, UpdateError};

/// Starts the installer as a new, elevated process without waiting for it
pub trait ProcessLauncher: Send + Sync {
    /// `Err(ElevationDenied)` when the user or OS refused elevation,
    /// `Err(Launch)` for any other failure to start.
    fn launch_elevated(&self, program: &Path, args: &[String]) -> Result<()>;
}

/// Terminates the current process once the installer has taken over
pub trait ProcessExit: Send + Sync {
    fn exit(&self, code: i32);
}

/// Launcher backed by the real OS
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    #[cfg(windows)]
    fn launch_elevated(&self, program: &Path, args: &[String]) -> Result<()> {
        use std::ffi::OsStr;
        use windows_sys::Win32::Foundation::{GetLastError, ERROR_CANCELLED};
        use windows_sys::Win32::UI::Shell::ShellExecuteW;
        use windows_sys::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;

        // ShellExecute reports "access denied" when the UAC prompt is dismissed
        const SE_ERR_ACCESSDENIED: isize = 5;

        let verb = wide_null(OsStr::new("runas"));
        let file = wide_null(program.as_os_str());
        let params = wide_null(OsStr::new(&windows_command_line(args)));
        let dir = program.parent().map(|d| wide_null(d.as_os_str()));
        let dir_ptr = dir.as_ref().map_or(std::ptr::null(), |d| d.as_ptr());

        let res = unsafe {
            ShellExecuteW(
                std::ptr::null_mut(),
                verb.as_ptr(),
                file.as_ptr(),
                params.as_ptr(),
                dir_ptr,
                SW_SHOWNORMAL,
            )
        } as isize;

        if res > 32 {
            info!(program = %program.display(), "Installer started with elevation");
            return Ok(());
        }

        let last_error = unsafe { GetLastError() };
        if last_error == ERROR_CANCELLED || res == SE_ERR_ACCESSDENIED {
            warn!(program = %program.display(), "Elevation was refused");
            return Err(UpdateError::ElevationDenied);
        }

        Err(UpdateError::Launch(format!(
            "ShellExecuteW failed with code {} (last error {})",
            res, last_error
        )))
    }

    #[cfg(not(windows))]
    fn launch_elevated(&self, program: &Path, args: &[String]) -> Result<()> {
        warn!("Elevation is only requested on Windows, starting installer directly");
        std::process::Command::new(program)
            .args(args)
            .spawn()
            .map(|child| {
                info!(program = %program.display(), pid = child.id(), "Installer started");
            })
            .map_err(|e| UpdateError::Launch(format!("{}: {}", program.display(), e)))
    }
}

/// Join arguments into one Windows command line, quoting where the
/// `CommandLineToArgvW` rules need it so each argument survives intact.
pub fn windows_command_line(args: &[String]) -> String {
    let mut line = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        push_quoted(&mut line, arg);
    }
    line
}

fn push_quoted(line: &mut String, arg: &str) {
    let needs_quotes = arg.is_empty() || arg.contains([' ', '\t', '\n', '\u{b}', '"']);
    if !needs_quotes {
        line.push_str(arg);
        return;
    }

    line.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // Backslashes before a quote are escaped, then the quote itself
                line.extend(std::iter::repeat_n('\\', backslashes * 2 + 1));
                line.push('"');
                backslashes = 0;
            }
            _ => {
                line.extend(std::iter::repeat_n('\\', backslashes));
                line.push(c);
                backslashes = 0;
            }
        }
    }
    // Trailing backslashes precede the closing quote
    line.extend(std::iter::repeat_n('\\', backslashes * 2));
    line.push('"');
}

#[cfg(windows)]
fn wide_null(s: &std::ffi::OsStr) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    s.encode_wide().chain(std::iter::once(0)).collect()
}

/// Calls `std::process::exit`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExit;

impl ProcessExit for SystemExit {
    fn exit(&self, code: i32) {
        info!(code, "Exiting so the installer can replace the application");
        std::process::exit(code);
    }
}

/// Clear read-only / missing execute bits left by antivirus or a previous copy.
/// Failures are logged only.
pub fn reset_attributes(path: &Path) {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read installer attributes");
            return;
        }
    };

    let mut permissions = metadata.permissions();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(permissions.mode() | 0o755);
    }

    #[cfg(not(unix))]
    {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
    }

    if let Err(e) = std::fs::set_permissions(path, permissions) {
        warn!(path = %path.display(), error = %e, "Failed to reset installer attributes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_reset_attributes_makes_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("OPP_Setup_2.0.0.exe");
        std::fs::write(&path, b"MZ").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o444)).unwrap();

        reset_attributes(&path);

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o755, 0o755);
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_command_line_plain_flags_unquoted() {
        assert_eq!(
            windows_command_line(&args(&["/VERYSILENT", "/NORESTART", "/CLOSEAPPLICATIONS"])),
            "/VERYSILENT /NORESTART /CLOSEAPPLICATIONS"
        );
    }

    #[test]
    fn test_command_line_quotes_spaces() {
        assert_eq!(
            windows_command_line(&args(&["/VERYSILENT", r"/DIR=C:\Program Files\OPP"])),
            r#"/VERYSILENT "/DIR=C:\Program Files\OPP""#
        );
    }

    #[test]
    fn test_command_line_escapes_quotes_and_trailing_backslashes() {
        assert_eq!(windows_command_line(&args(&[r#"say "hi""#])), r#""say \"hi\"""#);
        assert_eq!(windows_command_line(&args(&[r"C:\My Dir\"])), r#""C:\My Dir\\""#);
        assert_eq!(windows_command_line(&args(&[""])), r#""""#);
    }

    #[test]
    fn test_reset_attributes_missing_file_is_ignored() {
        reset_attributes(Path::new("/definitely/not/here.exe"));
    }
}
