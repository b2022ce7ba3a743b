//! Remote release descriptor
//!
//! The descriptor is a small JSON document published next to the releases:
//!
//! ```json
//! {
//!   "Version": "2.0.0",
//!   "ReleaseDate": "2024-05-01",
//!   "Mandatory": false,
//!   "DownloadUrl": "https://example.com/OPP_Setup_2.0.0.exe",
//!   "ChangelogUrl": "https://example.com/CHANGELOG.md",
//!   "MinOSVersion": "10.0",
//!   "FileSize": 1048576,
//!   "UpdateMessages": { "En": "A new version is available", "Ru": "..." }
//! }
//! ```

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::errors::{Result, UpdateError};
use crate::version::Version;

const FALLBACK_LOCALE: &str = "en";

/// Latest release as announced by the descriptor endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReleaseDescriptor {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub changelog_url: Option<String>,
    /// Informational only, never enforced
    #[serde(default, rename = "MinOSVersion")]
    pub min_os_version: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    /// Lowercase hex SHA-256 of the installer, when published
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default, deserialize_with = "deserialize_messages")]
    pub update_messages: HashMap<String, String>,
}

impl ReleaseDescriptor {
    /// Parse and validate a descriptor body.
    ///
    /// A missing or blank `Version` is a parse error, a non-numeric one an
    /// `InvalidVersionFormat`; neither is ever read as "no update".
    pub fn from_json(body: &str) -> Result<Self> {
        let descriptor: ReleaseDescriptor = serde_json::from_str(body)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(UpdateError::Parse(
                "descriptor is missing the required \"Version\" field".to_string(),
            ));
        }
        self.parsed_version()?;
        Ok(())
    }

    pub fn parsed_version(&self) -> Result<Version> {
        Version::parse(&self.version)
    }

    /// Expected installer size; a zero or absent size means unknown
    pub fn expected_size(&self) -> Option<u64> {
        self.file_size.filter(|&size| size > 0)
    }

    pub fn download_url(&self) -> Option<&str> {
        self.download_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    pub fn changelog_url(&self) -> Option<&str> {
        self.changelog_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    pub fn expected_sha256(&self) -> Option<String> {
        self.sha256
            .as_deref()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
    }

    /// Release date from either RFC 3339 or a plain `YYYY-MM-DD`
    pub fn release_date(&self) -> Option<NaiveDate> {
        let raw = self.release_date.as_deref()?.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.date_naive());
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
    }

    /// Localised notification text, matching the locale case-insensitively
    /// and falling back to English.
    pub fn message_for(&self, locale: &str) -> Option<&str> {
        let lookup = |code: &str| {
            self.update_messages
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(code))
                .map(|(_, v)| v.as_str())
        };

        // "ru-RU" should still find "Ru"
        let primary = locale.split(['-', '_']).next().unwrap_or(locale);
        lookup(locale)
            .or_else(|| lookup(primary))
            .or_else(|| lookup(FALLBACK_LOCALE))
    }
}

/// Accept `null` for the whole map as well as for individual entries
fn deserialize_messages<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<HashMap<String, Option<String>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| v.filter(|s| !s.is_empty()).map(|v| (k, v)))
        .collect())
}
