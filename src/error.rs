use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid genome name: {0:?}")]
    InvalidGenomeName(String),

    #[error("invalid BioSample accession: {0:?}")]
    InvalidBioSampleId(String),

    #[error("unsupported URL scheme: {0}")]
    InvalidScheme(String),

    #[error("concurrency must be at least 1 (got {0})")]
    InvalidConcurrency(usize),

    #[error("failed to read genome list at {0}")]
    #[diagnostic(help("pass a text file with one scientific name per line"))]
    InputList(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("cannot start discovery session: {0}")]
    DiscoverySetup(String),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("malformed RunInfo table {path}: {reason}")]
    MalformedTable { path: PathBuf, reason: String },

    #[error("cannot open metadata session: {0}")]
    MetadataSession(String),

    #[error("BioSample request failed: {0}")]
    MetadataHttp(String),

    #[error("BioSample page returned status {status}: {message}")]
    MetadataStatus { status: u16, message: String },

    #[error("transfer request failed: {0}")]
    TransferHttp(String),

    #[error("transfer of {url} returned status {status}")]
    TransferStatus { url: String, status: u16 },

    #[error("transfer of {url} failed after {attempts} attempts: {last}")]
    TransferExhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("transfer tool failed: {0}")]
    TransferTool(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("downloaded file is not a valid gzip stream: {0}")]
    CorruptDownload(PathBuf),

    #[error("no sample directories at depth {depth} under {root}")]
    NoSampleDirectories { root: PathBuf, depth: usize },

    #[error("worker panicked: {0}")]
    WorkerPanic(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
