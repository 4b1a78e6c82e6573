use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::ResolvedConfig;
use crate::discovery::{DiscoveryGuard, DiscoveryOutcome, DiscoverySession};
use crate::domain::GenomeName;
use crate::download::{DownloadReport, ReadDownloader};
use crate::error::KiraError;
use crate::manifest::write_species_manifest;
use crate::metadata::{MetadataCollector, MetadataSessionFactory, MetadataTable};
use crate::runinfo::RunInfoTable;
use crate::store::{Store, replace_file};
use crate::transport::FileTransport;

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    NoResults,
    NoMatchingRows,
    DryRun,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityOutcome {
    pub entity: String,
    pub status: EntityStatus,
    pub row_count: usize,
    pub succeeded: bool,
    pub metadata_records: usize,
    pub downloads: Option<DownloadReport>,
    pub manifest_rows: usize,
    pub error: Option<String>,
}

impl EntityOutcome {
    fn new(genome: &GenomeName, status: EntityStatus) -> Self {
        Self {
            entity: genome.as_str().to_string(),
            status,
            row_count: 0,
            succeeded: matches!(status, EntityStatus::Completed | EntityStatus::DryRun),
            metadata_records: 0,
            downloads: None,
            manifest_rows: 0,
            error: None,
        }
    }

    fn failed(genome: &GenomeName, err: &KiraError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::new(genome, EntityStatus::Failed)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub started_at: String,
    pub finished_at: String,
    pub download_dir: String,
    pub dry_run: bool,
    pub outcomes: Vec<EntityOutcome>,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == EntityStatus::Failed)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Forwards progress events to the log.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

fn phase(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

/// Reads one scientific name per line; blank lines and `#` comments are skipped.
pub fn read_genome_list(path: &Path) -> Result<Vec<GenomeName>, KiraError> {
    let text =
        fs::read_to_string(path).map_err(|_| KiraError::InputList(path.to_path_buf()))?;
    let mut genomes = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.parse::<GenomeName>() {
            Ok(genome) => genomes.push(genome),
            Err(err) => warn!(error = %err, "skipping genome list entry"),
        }
    }
    Ok(genomes)
}

pub struct App<F: MetadataSessionFactory, T: FileTransport> {
    store: Store,
    metadata: F,
    transport: T,
    config: ResolvedConfig,
}

impl<F: MetadataSessionFactory, T: FileTransport> App<F, T> {
    pub fn new(store: Store, metadata: F, transport: T, config: ResolvedConfig) -> Self {
        Self {
            store,
            metadata,
            transport,
            config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Processes entities one after another. An entity that fails is
    /// recorded and the batch moves on; the discovery session is closed once
    /// at the end whatever happened.
    pub fn run_batch<D: DiscoverySession>(
        &self,
        discovery: D,
        genomes: &[GenomeName],
        options: &FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<BatchResult, KiraError> {
        let started_at = Utc::now();
        let mut discovery = DiscoveryGuard::new(discovery);
        self.store.ensure_root()?;

        let mut outcomes = Vec::with_capacity(genomes.len());
        for (index, genome) in genomes.iter().enumerate() {
            let started = Instant::now();
            phase(
                sink,
                format!("phase=Entity; {} ({}/{})", genome, index + 1, genomes.len()),
            );
            let outcome = match self.process_entity(&mut *discovery, genome, options, sink) {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(genome = %genome, error = %err, "entity failed");
                    EntityOutcome::failed(genome, &err)
                }
            };
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Done; {} status={:?} rows={}",
                    genome, outcome.status, outcome.row_count
                ),
                elapsed: Some(started.elapsed()),
            });
            outcomes.push(outcome);
        }

        if let Err(err) = discovery.close() {
            warn!(error = %err, "discovery session did not close cleanly");
        }

        Ok(BatchResult {
            started_at: started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            finished_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            download_dir: self.store.root().to_string(),
            dry_run: options.dry_run,
            outcomes,
        })
    }

    fn process_entity<D: DiscoverySession>(
        &self,
        discovery: &mut D,
        genome: &GenomeName,
        options: &FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<EntityOutcome, KiraError> {
        let species_dir = self.store.ensure_species_dir(genome)?;

        phase(sink, format!("phase=Discover; {genome}"));
        let discovered = match discovery.discover(genome, species_dir.as_std_path())? {
            DiscoveryOutcome::Found(path) => path,
            DiscoveryOutcome::NoResults => {
                info!(genome = %genome, "no results; skipping");
                return Ok(EntityOutcome::new(genome, EntityStatus::NoResults));
            }
        };
        let runinfo_path = self.settle_runinfo(genome, &discovered)?;

        phase(sink, format!("phase=Filter; {}", runinfo_path.display()));
        let table_settings = self.config.table;
        let mut table = RunInfoTable::parse_with(&runinfo_path, table_settings)?;
        table.truncate_columns(table_settings.truncate_columns)?;
        let row_count = table.filter_by_scientific_name(genome.as_str())?;
        if row_count == 0 {
            info!(genome = %genome, "no matching ScientificName rows; skipping");
            return Ok(EntityOutcome::new(genome, EntityStatus::NoMatchingRows));
        }

        phase(sink, format!("phase=Metadata; {row_count} runs"));
        let records =
            MetadataCollector::new(&self.metadata, self.config.concurrency).collect(&table)?;
        let metadata = MetadataTable::from_records(&records);
        if !metadata.is_empty() {
            metadata.write_tsv(self.store.metadata_path(genome).as_std_path())?;
        }

        let mut outcome = EntityOutcome {
            row_count,
            metadata_records: records.len(),
            ..EntityOutcome::new(genome, EntityStatus::DryRun)
        };
        if options.dry_run {
            info!(genome = %genome, "dry run; skipping downloads and manifest");
            return Ok(outcome);
        }

        phase(sink, format!("phase=Download; {genome}"));
        let report = ReadDownloader::new(&self.transport, self.config.concurrency)
            .allowed_schemes(&self.config.allowed_schemes)
            .verify_gzip(self.config.verify_gzip)
            .download(&table, species_dir.as_std_path())?;

        phase(sink, format!("phase=Manifest; {genome}"));
        let manifest = write_species_manifest(
            species_dir.as_std_path(),
            self.store.manifest_path(genome).as_std_path(),
        )?;

        outcome.status = EntityStatus::Completed;
        outcome.downloads = Some(report);
        outcome.manifest_rows = manifest.len();
        Ok(outcome)
    }

    /// Moves a discovered export to `<Genome_name>_RunInfo.csv` and removes a
    /// leftover default `RunInfo.csv`.
    fn settle_runinfo(
        &self,
        genome: &GenomeName,
        discovered: &Path,
    ) -> Result<std::path::PathBuf, KiraError> {
        let target = self.store.runinfo_path(genome).into_std_path_buf();
        if discovered != target {
            replace_file(discovered, &target)?;
        }
        let default = self.store.default_runinfo_path(genome).into_std_path_buf();
        if default != target && default.exists() {
            match fs::remove_file(&default) {
                Ok(()) => info!(path = %default.display(), "removed default RunInfo.csv"),
                Err(err) => warn!(path = %default.display(), error = %err, "could not remove default RunInfo.csv"),
            }
        }
        info!(genome = %genome, path = %target.display(), "RunInfo saved");
        Ok(target)
    }
}
