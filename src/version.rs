//! Dotted version strings and their ordering
//!
//! Versions are period-delimited sequences of non-negative integers of any
//! length. Missing trailing segments compare as zero, so `1.2` equals `1.2.0`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::errors::{Result, UpdateError};

#[derive(Debug, Clone)]
pub struct Version {
    segments: Vec<u64>,
}

impl Version {
    /// Parse a version like "1.2.3", "1.2" or "1.2.0.1".
    ///
    /// Strict: no prefix, no surrounding whitespace.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(UpdateError::InvalidVersionFormat(s.to_string()));
        }

        let segments = s
            .split('.')
            .map(|part| {
                // u64::from_str accepts a leading '+', which is not a version digit
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(UpdateError::InvalidVersionFormat(s.to_string()));
                }
                part.parse::<u64>()
                    .map_err(|_| UpdateError::InvalidVersionFormat(s.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[u64] {
        &self.segments
    }
}

impl FromStr for Version {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.segments.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i).copied().unwrap_or(0);
            let b = other.segments.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

/// Compare two version strings.
///
/// An empty (or whitespace-only) side is always the older one, checked left
/// first, so a descriptor with a blank version can never look newer than the
/// running build. Any other malformed input is an `InvalidVersionFormat` error
/// and must be treated as "not comparable".
pub fn compare(a: &str, b: &str) -> Result<Ordering> {
    if a.trim().is_empty() {
        return Ok(Ordering::Less);
    }
    if b.trim().is_empty() {
        return Ok(Ordering::Greater);
    }

    let a = Version::parse(a)?;
    let b = Version::parse(b)?;
    Ok(a.cmp(&b))
}

/// Whether `remote` is strictly newer than `current`
pub fn is_newer(remote: &str, current: &str) -> Result<bool> {
    Ok(compare(remote, current)? == Ordering::Greater)
}
