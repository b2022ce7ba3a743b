//! Filesystem utilities
//!
//! Functions for artifact filename handling and sanitization.

use sanitize_filename::Options as SanitizeOptions;

/// Sanitize a filename for safe filesystem usage
///
/// Uses the sanitize-filename crate for cross-platform safe filenames.
/// Replaces invalid characters and Windows reserved names.
pub fn sanitize_filename(name: &str) -> String {
    // Use windows mode to also handle reserved names like CON, NUL, etc.
    sanitize_filename::sanitize_with_options(name, SanitizeOptions {
        replacement: "_",
        windows: true,
        truncate: true,
    })
}

/// Installer filename derived from the release version: `<product>_Setup_<version>.exe`
///
/// Both parts come from remote or user data, so they are sanitized; a
/// descriptor cannot steer the download outside the updates directory.
pub fn installer_file_name(product: &str, version: &str) -> String {
    sanitize_filename(&format!("{}_Setup_{}.exe", product.trim(), version.trim()))
}
