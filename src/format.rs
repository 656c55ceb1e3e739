//! Format tokens and quality modes.
//!
//! A [`Format`] is an opaque, case-normalised identifier for a document
//! representation (`pdf`, `djvu`, `md`, …). Nothing in the resolver knows
//! what a format *means*; equality on the normalised token is the only
//! operation the graph search relies on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Rejected format token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid format token '{0}'")]
pub struct InvalidFormat(pub String);

/// A normalised document format token.
///
/// Normalisation trims whitespace, strips a leading `.` (so extensions can be
/// passed as-is) and lower-cases the rest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Format(String);

impl Format {
    pub fn new(token: impl AsRef<str>) -> Result<Self, InvalidFormat> {
        let raw = token.as_ref();
        let normalised = raw.trim().trim_start_matches('.').to_ascii_lowercase();
        if normalised.is_empty()
            || !normalised
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+'))
        {
            return Err(InvalidFormat(raw.to_string()));
        }
        Ok(Self(normalised))
    }

    /// Derive a format from a path's extension (`report.PDF` → `pdf`).
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| Self::new(ext).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Format {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Format {
    type Err = InvalidFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Format {
    type Error = InvalidFormat;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Format> for String {
    fn from(value: Format) -> Self {
        value.0
    }
}

/// Speed/quality trade-off tier for a conversion.
///
/// `Normal` is mandatory for every supported pair; `Fast` and `Quality` are
/// optional refinements a converter may advertise on top of it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    #[default]
    Normal,
    Fast,
    Quality,
}

impl QualityMode {
    /// Every mode, in cache-building order.
    pub const ALL: [QualityMode; 3] = [QualityMode::Normal, QualityMode::Fast, QualityMode::Quality];

    pub fn as_str(self) -> &'static str {
        match self {
            QualityMode::Normal => "normal",
            QualityMode::Fast => "fast",
            QualityMode::Quality => "quality",
        }
    }
}

impl fmt::Display for QualityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" | "" => Ok(QualityMode::Normal),
            "fast" => Ok(QualityMode::Fast),
            "quality" | "high" => Ok(QualityMode::Quality),
            other => Err(format!(
                "unknown mode '{other}' (expected normal, fast or quality)"
            )),
        }
    }
}
