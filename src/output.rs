use std::io::{self, Write};

use serde::Serialize;

use crate::app::{BatchResult, EntityStatus, ProgressEvent, ProgressSink};
use crate::manifest::ManifestResult;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_batch(result: &BatchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_manifest(result: &ManifestResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub fn print_batch_summary(result: &BatchResult) {
    println!("{CYAN}KIRA-READSETS summary{RESET}");
    println!("{CYAN}   download dir: {}{RESET}", result.download_dir);
    println!(
        "{GREEN}Entities succeeded: {}{RESET}  {RED}failed: {}{RESET}",
        result.succeeded(),
        result.failed()
    );

    for outcome in &result.outcomes {
        let color = match outcome.status {
            EntityStatus::Completed | EntityStatus::DryRun => GREEN,
            EntityStatus::NoResults | EntityStatus::NoMatchingRows => YELLOW,
            EntityStatus::Failed => RED,
        };
        println!(
            "{color}- {} ({:?}) rows={} metadata={}{RESET}",
            outcome.entity, outcome.status, outcome.row_count, outcome.metadata_records
        );
        if let Some(report) = &outcome.downloads {
            println!(
                "{color}   files: {} planned, {} skipped, {} downloaded, {} failed{RESET}",
                report.planned, report.skipped, report.succeeded, report.failed
            );
            for failure in &report.failures {
                println!("{RED}   ! {}: {}{RESET}", failure.url, failure.error);
            }
        }
        if outcome.manifest_rows > 0 {
            println!("{color}   manifest rows: {}{RESET}", outcome.manifest_rows);
        }
        if let Some(error) = &outcome.error {
            println!("{RED}   error: {error}{RESET}");
        }
    }
}

pub fn print_manifest_summary(result: &ManifestResult) {
    println!(
        "{GREEN}Read manifest written to {} ({} samples, depth {}){RESET}",
        result.output,
        result.records.len(),
        result.depth
    );
}
