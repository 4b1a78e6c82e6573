use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

/// Scientific name of one entity processed by the pipeline, e.g. `Escherichia coli`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenomeName(String);

impl GenomeName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory and file stem used for this entity (`Escherichia_coli`).
    pub fn fs_name(&self) -> String {
        self.0.replace(' ', "_")
    }

    /// Search term form with spaces encoded as `+`.
    pub fn url_term(&self) -> String {
        self.0.replace(' ', "+")
    }
}

impl fmt::Display for GenomeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GenomeName {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
        let is_valid = !normalized.is_empty()
            && !normalized.contains(['/', '\\'])
            && normalized != "."
            && normalized != "..";
        if !is_valid {
            return Err(KiraError::InvalidGenomeName(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// BioSample accession; doubles as the per-sample directory name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BioSampleId(String);

impl BioSampleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BioSampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BioSampleId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && normalized != "."
            && normalized != ".."
            && !normalized
                .chars()
                .any(|ch| ch.is_whitespace() || ch == '/' || ch == '\\');
        if !is_valid {
            return Err(KiraError::InvalidBioSampleId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UrlScheme {
    Ftp,
    Http,
    Https,
}

impl UrlScheme {
    pub fn of(url: &str) -> Option<Self> {
        let (scheme, rest) = url.split_once("://")?;
        if rest.is_empty() {
            return None;
        }
        scheme.parse().ok()
    }
}

impl fmt::Display for UrlScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlScheme::Ftp => write!(f, "ftp"),
            UrlScheme::Http => write!(f, "http"),
            UrlScheme::Https => write!(f, "https"),
        }
    }
}

impl FromStr for UrlScheme {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ftp" => Ok(UrlScheme::Ftp),
            "http" => Ok(UrlScheme::Http),
            "https" => Ok(UrlScheme::Https),
            _ => Err(KiraError::InvalidScheme(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// `wget` when it is on PATH, the built-in HTTP client otherwise.
    Auto,
    Http,
    Wget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadRole {
    Short1,
    Short2,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    ShortOnly,
    LongOnly,
    Hybrid,
    Unknown,
}

impl ManifestStatus {
    pub fn from_buckets(has_short: bool, has_long: bool) -> Self {
        match (has_short, has_long) {
            (true, true) => ManifestStatus::Hybrid,
            (true, false) => ManifestStatus::ShortOnly,
            (false, true) => ManifestStatus::LongOnly,
            (false, false) => ManifestStatus::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ManifestStatus::ShortOnly => "short_only",
            ManifestStatus::LongOnly => "long_only",
            ManifestStatus::Hybrid => "hybrid",
            ManifestStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ManifestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
