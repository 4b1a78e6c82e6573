//! Read-topology manifest: classifies the FASTQ files of each sample
//! directory into paired short reads and long reads by file name alone.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::domain::{ManifestStatus, ReadRole};
use crate::error::KiraError;
use crate::store::write_bytes_atomic;

pub const MANIFEST_HEADER: [&str; 7] = [
    "biosample_path",
    "fastq_count",
    "status",
    "short_read_1",
    "short_read_2",
    "long_read_primary",
    "long_read_extra",
];

static READ_1: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[_.-])[rf]?1[_.-]?\.f(?:ast)?q\.gz$").expect("valid read-1 pattern")
});
static READ_2: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[_.-])[rf]?2[_.-]?\.f(?:ast)?q\.gz$").expect("valid read-2 pattern")
});
// Shell glob `*.f*q.gz`, case-sensitive.
static FASTQ_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^.*\.f.*q\.gz$").expect("valid fastq pattern"));

/// Where files matching neither mate pattern go. Only `Long` exists: an
/// unmatched short-read file is reported as long rather than guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnmatchedPolicy {
    #[default]
    Long,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestRecord {
    #[serde(rename = "biosample_path")]
    pub sample_path: String,
    pub fastq_count: usize,
    pub status: ManifestStatus,
    pub short_read_1: String,
    pub short_read_2: String,
    pub long_read_primary: String,
    pub long_read_extra: String,
}

impl ManifestRecord {
    fn to_row(&self) -> [String; 7] {
        [
            self.sample_path.clone(),
            self.fastq_count.to_string(),
            self.status.to_string(),
            self.short_read_1.clone(),
            self.short_read_2.clone(),
            self.long_read_primary.clone(),
            self.long_read_extra.clone(),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestResult {
    pub output: String,
    pub depth: usize,
    pub records: Vec<ManifestRecord>,
}

pub fn is_fastq_name(name: &str) -> bool {
    FASTQ_NAME.is_match(name)
}

pub fn role_of(name: &str, policy: UnmatchedPolicy) -> ReadRole {
    if READ_1.is_match(name) {
        ReadRole::Short1
    } else if READ_2.is_match(name) {
        ReadRole::Short2
    } else {
        match policy {
            UnmatchedPolicy::Long => ReadRole::Long,
        }
    }
}

/// Classifies the files of one sample directory. Non-FASTQ names are
/// ignored; representatives are the lexicographically first of each role.
pub fn classify(sample_path: &Path, file_names: &[String]) -> ManifestRecord {
    classify_with(sample_path, file_names, UnmatchedPolicy::default())
}

pub fn classify_with(
    sample_path: &Path,
    file_names: &[String],
    policy: UnmatchedPolicy,
) -> ManifestRecord {
    let mut names = file_names
        .iter()
        .filter(|name| is_fastq_name(name))
        .map(String::as_str)
        .collect::<Vec<_>>();
    names.sort_unstable();
    names.dedup();

    let mut short_1 = Vec::new();
    let mut short_2 = Vec::new();
    let mut long = Vec::new();
    for name in &names {
        match role_of(name, policy) {
            ReadRole::Short1 => short_1.push(*name),
            ReadRole::Short2 => short_2.push(*name),
            ReadRole::Long => long.push(*name),
        }
    }

    let has_short = !short_1.is_empty() && !short_2.is_empty();
    let has_long = !long.is_empty();
    let full = |name: &str| sample_path.join(name).display().to_string();

    ManifestRecord {
        sample_path: sample_path.display().to_string(),
        fastq_count: names.len(),
        status: ManifestStatus::from_buckets(has_short, has_long),
        short_read_1: short_1.first().map(|name| full(name)).unwrap_or_default(),
        short_read_2: short_2.first().map(|name| full(name)).unwrap_or_default(),
        long_read_primary: long.first().map(|name| full(name)).unwrap_or_default(),
        long_read_extra: long
            .iter()
            .skip(1)
            .map(|name| full(name))
            .collect::<Vec<_>>()
            .join(";"),
    }
}

/// Directories exactly `depth` levels below `root`, sorted.
pub fn scan(root: &Path, depth: usize) -> Result<Vec<PathBuf>, KiraError> {
    let mut level = vec![root.to_path_buf()];
    for _ in 0..depth {
        let mut next = Vec::new();
        for dir in &level {
            let entries = fs::read_dir(dir)
                .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", dir.display())))?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    next.push(path);
                }
            }
        }
        level = next;
    }
    level.sort();
    Ok(level)
}

fn fastq_names(dir: &Path) -> Result<Vec<String>, KiraError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", dir.display())))?;
    Ok(entries
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_fastq_name(name))
        .collect())
}

pub fn build_manifest(root: &Path, depth: usize) -> Result<Vec<ManifestRecord>, KiraError> {
    scan(root, depth)?
        .into_iter()
        .map(|dir| Ok(classify(&dir, &fastq_names(&dir)?)))
        .collect()
}

pub fn write_manifest(path: &Path, records: &[ManifestRecord]) -> Result<(), KiraError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(Vec::new());
    writer
        .write_record(MANIFEST_HEADER)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    for record in records {
        writer
            .write_record(record.to_row())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    write_bytes_atomic(path, &bytes)?;
    info!(path = %path.display(), samples = records.len(), "read manifest written");
    Ok(())
}

/// Manifest for one species directory inside the pipeline. An empty
/// directory only logs and writes nothing.
pub fn write_species_manifest(
    species_dir: &Path,
    output: &Path,
) -> Result<Vec<ManifestRecord>, KiraError> {
    let records = build_manifest(species_dir, 1)?;
    if records.is_empty() {
        info!(dir = %species_dir.display(), "no BioSample directories; skipping manifest");
        return Ok(records);
    }
    write_manifest(output, &records)?;
    Ok(records)
}

/// Standalone manifest over an arbitrary tree.
pub fn run_manifest(input: &Path, output: &Path, depth: usize) -> Result<ManifestResult, KiraError> {
    if !input.is_dir() {
        return Err(KiraError::Filesystem(format!(
            "input directory does not exist: {}",
            input.display()
        )));
    }
    let records = build_manifest(input, depth)?;
    if records.is_empty() {
        return Err(KiraError::NoSampleDirectories {
            root: input.to_path_buf(),
            depth,
        });
    }
    write_manifest(output, &records)?;
    Ok(ManifestResult {
        output: output.display().to_string(),
        depth,
        records,
    })
}
