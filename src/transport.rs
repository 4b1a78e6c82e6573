use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, RANGE, USER_AGENT};
use tracing::{debug, warn};

use crate::config::TransferSettings;
use crate::domain::{TransportKind, UrlScheme};
use crate::error::KiraError;
use crate::store::{ensure_dir, replace_file};

/// Retrieves one URL to one local path. Implementations resume partial
/// content and own their retry budget.
pub trait FileTransport: Send + Sync {
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), KiraError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &TransferSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            delay: settings.retry_delay,
        }
    }
}

#[derive(Debug)]
pub enum AttemptError {
    Retryable(String),
    Fatal(KiraError),
}

/// Runs `attempt` until it succeeds, fails fatally or the budget is spent.
/// The closure receives the 1-based attempt number.
pub fn retry_with<F>(url: &str, policy: &RetryPolicy, mut attempt: F) -> Result<(), KiraError>
where
    F: FnMut(u32) -> Result<(), AttemptError>,
{
    let mut last = String::from("no attempt made");
    for number in 1..=policy.max_attempts {
        match attempt(number) {
            Ok(()) => return Ok(()),
            Err(AttemptError::Fatal(err)) => return Err(err),
            Err(AttemptError::Retryable(message)) => {
                warn!(
                    url,
                    attempt = number,
                    max_attempts = policy.max_attempts,
                    error = %message,
                    "transfer attempt failed"
                );
                last = message;
                if number < policy.max_attempts && !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
            }
        }
    }
    Err(KiraError::TransferExhausted {
        url: url.to_string(),
        attempts: policy.max_attempts,
        last,
    })
}

/// Staging path used while a transfer is in flight: `<name>.part`.
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "download".into());
    name.push(".part");
    destination.with_file_name(name)
}

#[derive(Clone)]
pub struct HttpFileTransport {
    client: Client,
    policy: RetryPolicy,
}

impl HttpFileTransport {
    pub fn new(settings: &TransferSettings) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-readsets/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::TransferHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(settings.read_timeout)
            .timeout(settings.read_timeout)
            .build()
            .map_err(|err| KiraError::TransferHttp(err.to_string()))?;
        Ok(Self::with_client(client, RetryPolicy::from_settings(settings)))
    }

    pub fn with_client(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// reqwest speaks no FTP; GSA serves the same tree over HTTPS.
    pub fn normalize_url(url: &str) -> Result<String, KiraError> {
        match UrlScheme::of(url) {
            Some(UrlScheme::Ftp) => {
                let (_, rest) = url
                    .split_once("://")
                    .ok_or_else(|| KiraError::InvalidScheme(url.to_string()))?;
                Ok(format!("https://{rest}"))
            }
            Some(UrlScheme::Http | UrlScheme::Https) => Ok(url.to_string()),
            None => Err(KiraError::InvalidScheme(url.to_string())),
        }
    }

    fn attempt(&self, url: &str, partial: &Path) -> Result<(), AttemptError> {
        let offset = fs::metadata(partial).map(|meta| meta.len()).unwrap_or(0);
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let mut response = request.send().map_err(request_error)?;

        let status = response.status().as_u16();
        let append = match status {
            206 if offset > 0 => true,
            200..=299 => false,
            416 if offset > 0 => {
                debug!(url, offset, "partial file already complete");
                return Ok(());
            }
            other => return Err(status_error(url, other)),
        };
        if offset > 0 && !append {
            debug!(url, offset, "server ignored range request; restarting");
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(partial)
            .map_err(|err| {
                AttemptError::Fatal(KiraError::Filesystem(format!(
                    "open {}: {err}",
                    partial.display()
                )))
            })?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| AttemptError::Retryable(format!("read body: {err}")))?;
        Ok(())
    }
}

impl FileTransport for HttpFileTransport {
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), KiraError> {
        let source = Self::normalize_url(url)?;
        if let Some(parent) = destination.parent() {
            ensure_dir(parent)?;
        }
        let partial = part_path(destination);
        retry_with(url, &self.policy, |_| self.attempt(&source, &partial))?;
        replace_file(&partial, destination)
    }
}

fn request_error(err: reqwest::Error) -> AttemptError {
    if err.is_builder() {
        AttemptError::Fatal(KiraError::TransferHttp(err.to_string()))
    } else {
        AttemptError::Retryable(err.to_string())
    }
}

fn status_error(url: &str, status: u16) -> AttemptError {
    if is_retryable_status(status) {
        AttemptError::Retryable(format!("status {status}"))
    } else {
        AttemptError::Fatal(KiraError::TransferStatus {
            url: url.to_string(),
            status,
        })
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..=599).contains(&status)
}

/// Delegates to the system `wget`, which handles FTP, resume and retries.
#[derive(Debug, Clone)]
pub struct WgetFileTransport {
    program: PathBuf,
    settings: TransferSettings,
}

impl WgetFileTransport {
    pub fn locate(settings: &TransferSettings) -> Result<Self, KiraError> {
        let program =
            find_in_path("wget").ok_or_else(|| KiraError::MissingTool("wget".to_string()))?;
        Ok(Self::with_program(program, settings.clone()))
    }

    pub fn with_program(program: PathBuf, settings: TransferSettings) -> Self {
        Self { program, settings }
    }

    pub fn command_args(&self, url: &str, output: &Path) -> Vec<String> {
        vec![
            "-c".to_string(),
            "-O".to_string(),
            output.to_string_lossy().to_string(),
            url.to_string(),
            format!("--tries={}", self.settings.max_attempts),
            format!("--waitretry={}", self.settings.retry_delay.as_secs()),
            format!("--read-timeout={}", self.settings.read_timeout.as_secs()),
        ]
    }
}

impl FileTransport for WgetFileTransport {
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), KiraError> {
        if let Some(parent) = destination.parent() {
            ensure_dir(parent)?;
        }
        let partial = part_path(destination);
        let output = Command::new(&self.program)
            .args(self.command_args(url, &partial))
            .output()
            .map_err(|err| KiraError::TransferTool(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(|line| line.trim().to_string())
                .unwrap_or_else(|| format!("wget exited with {}", output.status));
            return Err(KiraError::TransferTool(format!("{url}: {message}")));
        }
        replace_file(&partial, destination)
    }
}

/// Transport chosen from configuration.
pub enum SystemTransport {
    Http(HttpFileTransport),
    Wget(WgetFileTransport),
}

impl SystemTransport {
    pub fn from_settings(settings: &TransferSettings) -> Result<Self, KiraError> {
        match settings.kind {
            TransportKind::Http => Ok(Self::Http(HttpFileTransport::new(settings)?)),
            TransportKind::Wget => Ok(Self::Wget(WgetFileTransport::locate(settings)?)),
            TransportKind::Auto => match find_in_path("wget") {
                Some(program) => Ok(Self::Wget(WgetFileTransport::with_program(
                    program,
                    settings.clone(),
                ))),
                None => Ok(Self::Http(HttpFileTransport::new(settings)?)),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Wget(_) => "wget",
        }
    }
}

impl FileTransport for SystemTransport {
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), KiraError> {
        match self {
            Self::Http(transport) => transport.fetch(url, destination),
            Self::Wget(transport) => transport.fetch(url, destination),
        }
    }
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}
