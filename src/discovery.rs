//! Discovery sessions deposit a RunInfo export for one entity into its
//! species directory. The export is picked up by polling, so any tool that
//! drops a CSV there can act as the discovery backend.

use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};

use crate::config::DiscoverySettings;
use crate::domain::GenomeName;
use crate::error::KiraError;
use crate::ngdc::gsa_search_url;
use crate::transport::find_in_path;

/// Exit status a discovery command uses to report an empty search.
pub const NO_RESULTS_EXIT_CODE: i32 = 2;
const IN_PROGRESS_SUFFIX: &str = ".crdownload";
const OUTPUT_SUFFIXES: [&str; 2] = ["_biosample_metadata.tsv", "_read_manifest.tsv"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Found(PathBuf),
    NoResults,
}

pub trait DiscoverySession {
    fn discover(&mut self, genome: &GenomeName, dest_dir: &Path)
    -> Result<DiscoveryOutcome, KiraError>;

    fn close(&mut self) -> Result<(), KiraError>;
}

/// Owns a session for the length of a batch and closes it exactly once,
/// on [`DiscoveryGuard::close`] or on drop.
pub struct DiscoveryGuard<D: DiscoverySession> {
    session: D,
    closed: bool,
}

impl<D: DiscoverySession> DiscoveryGuard<D> {
    pub fn new(session: D) -> Self {
        Self {
            session,
            closed: false,
        }
    }

    pub fn close(mut self) -> Result<(), KiraError> {
        self.closed = true;
        self.session.close()
    }
}

impl<D: DiscoverySession> Deref for DiscoveryGuard<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.session
    }
}

impl<D: DiscoverySession> DerefMut for DiscoveryGuard<D> {
    fn deref_mut(&mut self) -> &mut D {
        &mut self.session
    }
}

impl<D: DiscoverySession> Drop for DiscoveryGuard<D> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.session.close() {
            warn!(error = %err, "discovery session did not close cleanly");
        }
    }
}

/// Runs an external discovery command per entity, then polls for its export.
/// Without a command it only picks up exports already present.
#[derive(Debug)]
pub struct ExternalDiscovery {
    command: Option<PathBuf>,
    settings: DiscoverySettings,
}

impl ExternalDiscovery {
    pub fn acquire(settings: &DiscoverySettings) -> Result<Self, KiraError> {
        let command = match &settings.command {
            Some(command) => Some(resolve_command(command)?),
            None => {
                info!("no discovery command configured; expecting RunInfo exports in place");
                None
            }
        };
        Ok(Self {
            command,
            settings: settings.clone(),
        })
    }

    pub fn command_args(&self, genome: &GenomeName, dest_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "--query".to_string(),
            gsa_search_url(genome),
            "--scientific-name".to_string(),
            genome.as_str().to_string(),
            "--download-dir".to_string(),
            dest_dir.display().to_string(),
        ];
        if self.settings.headless {
            args.push("--headless".to_string());
        }
        args
    }
}

impl DiscoverySession for ExternalDiscovery {
    fn discover(
        &mut self,
        genome: &GenomeName,
        dest_dir: &Path,
    ) -> Result<DiscoveryOutcome, KiraError> {
        let Some(command) = &self.command else {
            return Ok(match find_latest_runinfo(dest_dir, None) {
                Some(path) => DiscoveryOutcome::Found(path),
                None => {
                    info!(genome = %genome, dir = %dest_dir.display(), "no RunInfo export present");
                    DiscoveryOutcome::NoResults
                }
            });
        };

        let launched = SystemTime::now();
        debug!(genome = %genome, command = %command.display(), "running discovery command");
        let mut child = Command::new(command)
            .args(self.command_args(genome, dest_dir))
            .spawn()
            .map_err(|err| KiraError::Discovery(format!("{}: {err}", command.display())))?;
        let status = wait_with_timeout(&mut child, command, self.settings.command_timeout)?;
        match status.code() {
            Some(0) => {}
            Some(NO_RESULTS_EXIT_CODE) => {
                info!(genome = %genome, "search returned no items");
                return Ok(DiscoveryOutcome::NoResults);
            }
            _ => {
                return Err(KiraError::Discovery(format!(
                    "{} exited with {status}",
                    command.display()
                )));
            }
        }

        // Allow for coarse filesystem timestamps.
        let since = launched
            .checked_sub(Duration::from_secs(1))
            .unwrap_or(launched);
        match wait_for_runinfo(
            dest_dir,
            Some(since),
            self.settings.poll_interval,
            self.settings.timeout,
        ) {
            Some(path) => {
                info!(genome = %genome, path = %path.display(), "RunInfo export detected");
                Ok(DiscoveryOutcome::Found(path))
            }
            None => {
                warn!(genome = %genome, "no RunInfo export detected before timeout");
                Ok(DiscoveryOutcome::NoResults)
            }
        }
    }

    fn close(&mut self) -> Result<(), KiraError> {
        debug!("discovery session closed");
        Ok(())
    }
}

const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Waits for `child`, killing it once `timeout` has elapsed.
fn wait_with_timeout(
    child: &mut Child,
    command: &Path,
    timeout: Duration,
) -> Result<ExitStatus, KiraError> {
    let deadline = Instant::now() + timeout;
    loop {
        let polled = child
            .try_wait()
            .map_err(|err| KiraError::Discovery(format!("{}: {err}", command.display())))?;
        if let Some(status) = polled {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            warn!(command = %command.display(), ?timeout, "discovery command timed out; killing it");
            if let Err(err) = child.kill() {
                warn!(error = %err, "could not kill discovery command");
            }
            if let Err(err) = child.wait() {
                warn!(error = %err, "could not reap discovery command");
            }
            return Err(KiraError::Discovery(format!(
                "{} timed out after {}s",
                command.display(),
                timeout.as_secs_f64()
            )));
        }
        thread::sleep(COMMAND_POLL_INTERVAL);
    }
}

fn resolve_command(command: &Path) -> Result<PathBuf, KiraError> {
    if command.components().count() > 1 {
        if command.is_file() {
            return Ok(command.to_path_buf());
        }
        return Err(KiraError::DiscoverySetup(format!(
            "discovery command not found: {}",
            command.display()
        )));
    }
    let name = command.to_string_lossy();
    find_in_path(&name).ok_or_else(|| {
        KiraError::DiscoverySetup(format!("discovery command not on PATH: {name}"))
    })
}

fn is_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    if name.starts_with('.') || OUTPUT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "csv" | "txt" | "tsv"))
        .unwrap_or(false)
}

fn in_progress_marker(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(IN_PROGRESS_SUFFIX);
    PathBuf::from(name)
}

/// Newest non-empty `.csv`/`.txt`/`.tsv` file in `dir`, modified no earlier
/// than `since`. Returns `None` while that file still has a
/// `<name>.crdownload` sibling.
pub fn find_latest_runinfo(dir: &Path, since: Option<SystemTime>) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let newest = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if !is_candidate(&path) {
                return None;
            }
            let meta = entry.metadata().ok()?;
            if !meta.is_file() || meta.len() == 0 {
                return None;
            }
            let modified = meta.modified().ok()?;
            if since.is_some_and(|since| modified < since) {
                return None;
            }
            Some((modified, path))
        })
        .max()?;
    let (_, path) = newest;
    if in_progress_marker(&path).exists() {
        debug!(path = %path.display(), "export still in progress");
        return None;
    }
    Some(path)
}

pub fn wait_for_runinfo(
    dir: &Path,
    since: Option<SystemTime>,
    interval: Duration,
    timeout: Duration,
) -> Option<PathBuf> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(path) = find_latest_runinfo(dir, since) {
            return Some(path);
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(interval);
    }
}
