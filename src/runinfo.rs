//! RunInfo tables as exported by GSA: one comma-separated row per sequencing run.
//!
//! The export does not quote free-text fields, so embedded commas shift every
//! later column. [`RunInfoTable::truncate_columns`] cuts each line to a fixed
//! width, which keeps the leading columns (including `ScientificName` at index
//! 21) addressable by position. This is plain splitting, not CSV parsing.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::TableSettings;
use crate::domain::BioSampleId;
use crate::error::KiraError;
use crate::store::write_bytes_atomic;

const RUN_COLUMN: &str = "Run";
const BIOSAMPLE_COLUMN: &str = "BioSample";
const DOWNLOAD_PATH_COLUMN: &str = "Download_path";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: String,
    pub biosample_id: String,
    pub download_paths: Vec<String>,
    pub scientific_name: String,
}

#[derive(Debug, Clone)]
pub struct RunInfoTable {
    path: PathBuf,
    settings: TableSettings,
    header: String,
    rows: Vec<String>,
}

impl RunInfoTable {
    pub fn parse(path: &Path) -> Result<Self, KiraError> {
        Self::parse_with(path, TableSettings::default())
    }

    pub fn parse_with(path: &Path, settings: TableSettings) -> Result<Self, KiraError> {
        let bytes = fs::read(path)
            .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", path.display())))?;
        let text = String::from_utf8(bytes).map_err(|err| KiraError::MalformedTable {
            path: path.to_path_buf(),
            reason: format!("not UTF-8: {err}"),
        })?;
        Self::from_text(path, &text, settings)
    }

    /// Builds a table backed by `path` without reading it; later passes persist there.
    pub fn from_text(path: &Path, text: &str, settings: TableSettings) -> Result<Self, KiraError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut lines = text.lines();
        let header = lines
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .ok_or_else(|| KiraError::MalformedTable {
                path: path.to_path_buf(),
                reason: "missing header row".to_string(),
            })?;
        let rows = lines
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.to_string())
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            settings,
            header,
            rows,
        })
    }

    /// Data rows, header excluded.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Keeps the first `ncols` comma-separated fields of every line, header
    /// included, and rewrites the backing file.
    pub fn truncate_columns(&mut self, ncols: usize) -> Result<(), KiraError> {
        self.header = truncate_line(&self.header, ncols);
        for row in &mut self.rows {
            *row = truncate_line(row, ncols);
        }
        self.persist()?;
        info!(path = %self.path.display(), ncols, "truncated RunInfo columns");
        Ok(())
    }

    /// Retains rows whose scientific-name column contains `query`
    /// (case-insensitive), rewrites the backing file and returns the surviving
    /// row count. Rows too short to have the column are dropped.
    pub fn filter_by_scientific_name(&mut self, query: &str) -> Result<usize, KiraError> {
        let column = self.settings.scientific_name_column;
        let needle = query.to_lowercase();
        let before = self.rows.len();
        let mut short_rows = 0usize;

        self.rows.retain(|row| {
            let Some(name) = row.split(',').nth(column) else {
                short_rows += 1;
                return false;
            };
            name.to_lowercase().contains(&needle)
        });

        if short_rows > 0 {
            warn!(
                path = %self.path.display(),
                short_rows,
                required = column + 1,
                "skipped RunInfo rows with too few columns"
            );
        }
        self.persist()?;
        info!(
            path = %self.path.display(),
            query,
            kept = self.rows.len(),
            dropped = before - self.rows.len(),
            "filtered RunInfo by ScientificName"
        );
        Ok(self.rows.len())
    }

    pub fn persist(&self) -> Result<(), KiraError> {
        let mut content = String::with_capacity(
            self.header.len() + self.rows.iter().map(|row| row.len() + 1).sum::<usize>() + 1,
        );
        content.push_str(&self.header);
        content.push('\n');
        for row in &self.rows {
            content.push_str(row);
            content.push('\n');
        }
        write_bytes_atomic(&self.path, content.as_bytes())
    }

    /// Typed view of the rows; `Run`, `BioSample` and `Download_path` are
    /// located through the header by name.
    pub fn records(&self) -> Result<Vec<RunRecord>, KiraError> {
        let columns = self
            .header
            .split(',')
            .map(|name| name.trim())
            .collect::<Vec<_>>();
        let position = |name: &str| {
            columns
                .iter()
                .position(|column| *column == name)
                .ok_or_else(|| KiraError::MalformedTable {
                    path: self.path.clone(),
                    reason: format!("missing required column {name}"),
                })
        };
        let run_idx = position(RUN_COLUMN)?;
        let biosample_idx = position(BIOSAMPLE_COLUMN)?;
        let download_idx = position(DOWNLOAD_PATH_COLUMN)?;
        let name_idx = self.settings.scientific_name_column;

        let records = self
            .rows
            .iter()
            .map(|row| {
                let fields = row.split(',').map(str::trim).collect::<Vec<_>>();
                let field = |idx: usize| fields.get(idx).copied().unwrap_or("").to_string();
                RunRecord {
                    run_id: field(run_idx),
                    biosample_id: field(biosample_idx),
                    download_paths: split_download_paths(&field(download_idx)),
                    scientific_name: field(name_idx),
                }
            })
            .collect();
        Ok(records)
    }

    /// Distinct, sorted BioSample ids referenced by the table.
    pub fn biosample_ids(&self) -> Result<Vec<BioSampleId>, KiraError> {
        let mut ids = BTreeSet::new();
        for record in self.records()? {
            if record.biosample_id.is_empty() {
                debug!(run = %record.run_id, "run without BioSample");
                continue;
            }
            match record.biosample_id.parse::<BioSampleId>() {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(err) => warn!(run = %record.run_id, error = %err, "skipping BioSample"),
            }
        }
        Ok(ids.into_iter().collect())
    }
}

fn truncate_line(line: &str, ncols: usize) -> String {
    line.trim()
        .split(',')
        .take(ncols)
        .collect::<Vec<_>>()
        .join(",")
        .trim()
        .to_string()
}

pub fn split_download_paths(value: &str) -> Vec<String> {
    value
        .split('|')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect()
}
