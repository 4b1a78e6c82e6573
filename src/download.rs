use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::default_allowed_schemes;
use crate::domain::{BioSampleId, UrlScheme};
use crate::error::KiraError;
use crate::fs_util::{is_gzip_name, validate_gzip};
use crate::pool::{catch_panic, run_bounded};
use crate::runinfo::{RunInfoTable, RunRecord};
use crate::store::ensure_dir;
use crate::transport::FileTransport;

/// One URL bound to one destination under `<dest_root>/<BioSample>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DownloadFailure {
    pub url: String,
    pub destination: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DownloadReport {
    pub planned: usize,
    pub skipped: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<DownloadFailure>,
}

/// Derives deduplicated download tasks from run records.
///
/// Runs without a BioSample or without an allowed URL are skipped with a
/// warning. When two URLs map to the same destination the first one wins.
pub fn plan_tasks(
    records: &[RunRecord],
    dest_root: &Path,
    allowed_schemes: &[UrlScheme],
) -> Vec<DownloadTask> {
    let mut by_destination: BTreeMap<PathBuf, DownloadTask> = BTreeMap::new();

    for record in records {
        if record.biosample_id.is_empty() || record.download_paths.is_empty() {
            warn!(run = %record.run_id, "skipping run: missing BioSample or Download_path");
            continue;
        }
        let biosample = match record.biosample_id.parse::<BioSampleId>() {
            Ok(id) => id,
            Err(err) => {
                warn!(run = %record.run_id, error = %err, "skipping run");
                continue;
            }
        };
        let urls = record
            .download_paths
            .iter()
            .filter(|url| {
                UrlScheme::of(url)
                    .map(|scheme| allowed_schemes.contains(&scheme))
                    .unwrap_or(false)
            })
            .collect::<Vec<_>>();
        if urls.is_empty() {
            warn!(run = %record.run_id, "skipping run: no usable URL in Download_path");
            continue;
        }

        let sample_dir = dest_root.join(biosample.as_str());
        for url in urls {
            let Some(name) = url_basename(url) else {
                warn!(run = %record.run_id, url = %url, "skipping URL without a file name");
                continue;
            };
            let destination = sample_dir.join(name);
            match by_destination.get(&destination) {
                Some(existing) if existing.url != *url => {
                    warn!(
                        destination = %destination.display(),
                        kept = %existing.url,
                        ignored = %url,
                        "two URLs map to one destination"
                    );
                }
                Some(_) => {}
                None => {
                    by_destination.insert(
                        destination.clone(),
                        DownloadTask {
                            url: url.clone(),
                            destination,
                        },
                    );
                }
            }
        }
    }

    by_destination.into_values().collect()
}

fn url_basename(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let (_, path) = rest.split_once('/')?;
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}

fn is_present(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

pub struct ReadDownloader<'a, T: FileTransport> {
    transport: &'a T,
    concurrency: usize,
    allowed_schemes: Vec<UrlScheme>,
    verify_gzip: bool,
}

impl<'a, T: FileTransport> ReadDownloader<'a, T> {
    pub fn new(transport: &'a T, concurrency: usize) -> Self {
        Self {
            transport,
            concurrency,
            allowed_schemes: default_allowed_schemes(),
            verify_gzip: false,
        }
    }

    pub fn allowed_schemes(mut self, schemes: &[UrlScheme]) -> Self {
        self.allowed_schemes = schemes.to_vec();
        self
    }

    pub fn verify_gzip(mut self, verify: bool) -> Self {
        self.verify_gzip = verify;
        self
    }

    /// Retrieves every file referenced by `table` into `dest_root`. Existing
    /// non-empty destinations are left alone; failures are reported, not raised.
    pub fn download(&self, table: &RunInfoTable, dest_root: &Path) -> Result<DownloadReport, KiraError> {
        if self.concurrency == 0 {
            return Err(KiraError::InvalidConcurrency(self.concurrency));
        }
        let tasks = plan_tasks(&table.records()?, dest_root, &self.allowed_schemes);
        let mut report = DownloadReport {
            planned: tasks.len(),
            ..DownloadReport::default()
        };

        let (present, pending): (Vec<_>, Vec<_>) =
            tasks.into_iter().partition(|task| is_present(&task.destination));
        for task in &present {
            debug!(destination = %task.destination.display(), "already downloaded");
        }
        report.skipped = present.len();
        report.attempted = pending.len();
        if pending.is_empty() {
            info!(skipped = report.skipped, "nothing to download");
            return Ok(report);
        }

        let workers = self.concurrency.min(pending.len());
        info!(
            files = pending.len(),
            skipped = report.skipped,
            workers,
            "downloading read files"
        );
        let outcomes = run_bounded(pending, vec![(); workers], |_, task: DownloadTask| {
            let outcome = catch_panic(|| self.run_task(&task));
            (task, outcome)
        });

        for (task, outcome) in outcomes {
            match outcome {
                Ok(()) => report.succeeded += 1,
                Err(err) => {
                    error!(url = %task.url, error = %err, "download failed");
                    report.failed += 1;
                    report.failures.push(DownloadFailure {
                        url: task.url,
                        destination: task.destination.display().to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }
        report
            .failures
            .sort_by(|left, right| left.destination.cmp(&right.destination));

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "downloads finished"
        );
        Ok(report)
    }

    fn run_task(&self, task: &DownloadTask) -> Result<(), KiraError> {
        if let Some(parent) = task.destination.parent() {
            ensure_dir(parent)?;
        }
        self.transport.fetch(&task.url, &task.destination)?;
        if self.verify_gzip && is_gzip_name(&task.destination) {
            if let Err(err) = validate_gzip(&task.destination) {
                if let Err(remove) = fs::remove_file(&task.destination) {
                    warn!(
                        path = %task.destination.display(),
                        error = %remove,
                        "could not remove corrupt download"
                    );
                }
                return Err(err);
            }
        }
        Ok(())
    }
}
