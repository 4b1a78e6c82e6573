use std::fs;
use std::io::Write;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::GenomeName;
use crate::error::KiraError;

/// On-disk layout of a download root:
///
/// ```text
/// <root>/<Genome_name>/<Genome_name>_RunInfo.csv
/// <root>/<Genome_name>/<Genome_name>_biosample_metadata.tsv
/// <root>/<Genome_name>/<Genome_name>_read_manifest.tsv
/// <root>/<Genome_name>/<BioSample>/<read files>
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: &Path) -> Result<Self, KiraError> {
        let absolute =
            std::path::absolute(root).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(absolute).map_err(|path| {
            KiraError::Filesystem(format!("non-utf8 download root: {}", path.display()))
        })?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn species_dir(&self, genome: &GenomeName) -> Utf8PathBuf {
        self.root.join(genome.fs_name())
    }

    pub fn runinfo_path(&self, genome: &GenomeName) -> Utf8PathBuf {
        self.species_dir(genome)
            .join(format!("{}_RunInfo.csv", genome.fs_name()))
    }

    /// Name the GSA export uses before it is renamed per species.
    pub fn default_runinfo_path(&self, genome: &GenomeName) -> Utf8PathBuf {
        self.species_dir(genome).join("RunInfo.csv")
    }

    pub fn metadata_path(&self, genome: &GenomeName) -> Utf8PathBuf {
        self.species_dir(genome)
            .join(format!("{}_biosample_metadata.tsv", genome.fs_name()))
    }

    pub fn manifest_path(&self, genome: &GenomeName) -> Utf8PathBuf {
        self.species_dir(genome)
            .join(format!("{}_read_manifest.tsv", genome.fs_name()))
    }

    pub fn ensure_root(&self) -> Result<(), KiraError> {
        ensure_dir(self.root.as_std_path())
    }

    pub fn ensure_species_dir(&self, genome: &GenomeName) -> Result<Utf8PathBuf, KiraError> {
        let dir = self.species_dir(genome);
        ensure_dir(dir.as_std_path())?;
        Ok(dir)
    }
}

pub fn ensure_dir(path: &Path) -> Result<(), KiraError> {
    fs::create_dir_all(path)
        .map_err(|err| KiraError::Filesystem(format!("create {}: {err}", path.display())))
}

/// Writes through a temp file in the destination directory, then renames it
/// over `path`, so readers never observe a half-written file.
pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), KiraError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ensure_dir(parent)?;
    let mut temp = Builder::new()
        .prefix(".kira-readsets")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    temp.persist(path)
        .map_err(|err| KiraError::Filesystem(format!("persist {}: {err}", path.display())))?;
    Ok(())
}

/// Moves `from` to `to`, replacing an existing destination.
pub fn replace_file(from: &Path, to: &Path) -> Result<(), KiraError> {
    if from == to {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        ensure_dir(parent)?;
    }
    fs::rename(from, to).map_err(|err| {
        KiraError::Filesystem(format!(
            "move {} -> {}: {err}",
            from.display(),
            to.display()
        ))
    })
}
