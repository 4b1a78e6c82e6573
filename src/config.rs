use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{TransportKind, UrlScheme};
use crate::error::KiraError;

pub const CONFIG_FILE_NAME: &str = "kira-readsets.json";
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_TRUNCATE_COLUMNS: usize = 22;
pub const DEFAULT_SCIENTIFIC_NAME_COLUMN: usize = 21;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_DISCOVERY_COMMAND_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_METADATA_BASE_URL: &str = "https://ngdc.cncb.ac.cn/biosample/browse";
pub const DEFAULT_METADATA_TIMEOUT_SECS: u64 = 90;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub truncate_columns: Option<usize>,
    #[serde(default)]
    pub scientific_name_column: Option<usize>,
    #[serde(default)]
    pub allowed_schemes: Option<Vec<UrlScheme>>,
    #[serde(default)]
    pub verify_gzip: Option<bool>,
    #[serde(default)]
    pub transfer: TransferEntry,
    #[serde(default)]
    pub discovery: DiscoveryEntry,
    #[serde(default)]
    pub metadata: MetadataEntry,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TransferEntry {
    #[serde(default)]
    pub kind: Option<TransportKind>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub retry_delay_secs: Option<u64>,
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DiscoveryEntry {
    #[serde(default)]
    pub command: Option<PathBuf>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    #[serde(default)]
    pub headless: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct MetadataEntry {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSettings {
    pub truncate_columns: usize,
    pub scientific_name_column: usize,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            truncate_columns: DEFAULT_TRUNCATE_COLUMNS,
            scientific_name_column: DEFAULT_SCIENTIFIC_NAME_COLUMN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    pub kind: TransportKind,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub read_timeout: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::Auto,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub command: Option<PathBuf>,
    pub poll_interval: Duration,
    /// Limit on polling for the export once the command has exited.
    pub timeout: Duration,
    /// Limit on the discovery command itself.
    pub command_timeout: Duration,
    pub headless: bool,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            command: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            timeout: Duration::from_secs(DEFAULT_DISCOVERY_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_DISCOVERY_COMMAND_TIMEOUT_SECS),
            headless: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataSettings {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_METADATA_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_METADATA_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub concurrency: usize,
    pub table: TableSettings,
    pub allowed_schemes: Vec<UrlScheme>,
    pub verify_gzip: bool,
    pub transfer: TransferSettings,
    pub discovery: DiscoverySettings,
    pub metadata: MetadataSettings,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            concurrency: DEFAULT_CONCURRENCY,
            table: TableSettings::default(),
            allowed_schemes: default_allowed_schemes(),
            verify_gzip: false,
            transfer: TransferSettings::default(),
            discovery: DiscoverySettings::default(),
            metadata: MetadataSettings::default(),
        }
    }
}

impl ResolvedConfig {
    pub fn allow_scheme(&mut self, scheme: UrlScheme) {
        if !self.allowed_schemes.contains(&scheme) {
            self.allowed_schemes.push(scheme);
            self.allowed_schemes.sort();
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path first, then `./kira-readsets.json`, then the user config
    /// directory. With no file anywhere the defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover_path(),
        };
        let Some(config_path) = config_path else {
            return Self::resolve_config(Config::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    fn discover_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("kira-readsets").join("config.json"))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let defaults = ResolvedConfig::default();

        let concurrency = config.concurrency.unwrap_or(defaults.concurrency);
        if concurrency == 0 {
            return Err(KiraError::InvalidConcurrency(concurrency));
        }

        let table = TableSettings {
            truncate_columns: config
                .truncate_columns
                .unwrap_or(defaults.table.truncate_columns),
            scientific_name_column: config
                .scientific_name_column
                .unwrap_or(defaults.table.scientific_name_column),
        };
        if table.scientific_name_column >= table.truncate_columns {
            return Err(KiraError::ConfigParse(format!(
                "scientific_name_column {} lies beyond truncate_columns {}",
                table.scientific_name_column, table.truncate_columns
            )));
        }

        let mut allowed_schemes = config
            .allowed_schemes
            .unwrap_or(defaults.allowed_schemes);
        allowed_schemes.sort();
        allowed_schemes.dedup();
        if allowed_schemes.is_empty() {
            return Err(KiraError::ConfigParse(
                "allowed_schemes must not be empty".to_string(),
            ));
        }

        let max_attempts = config
            .transfer
            .max_attempts
            .unwrap_or(defaults.transfer.max_attempts);
        if max_attempts == 0 {
            return Err(KiraError::ConfigParse(
                "transfer.max_attempts must be at least 1".to_string(),
            ));
        }
        let transfer = TransferSettings {
            kind: config.transfer.kind.unwrap_or(defaults.transfer.kind),
            max_attempts,
            retry_delay: config
                .transfer
                .retry_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.transfer.retry_delay),
            read_timeout: config
                .transfer
                .read_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.transfer.read_timeout),
        };

        let discovery = DiscoverySettings {
            command: config.discovery.command,
            poll_interval: config
                .discovery
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.discovery.poll_interval),
            timeout: config
                .discovery
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.discovery.timeout),
            command_timeout: config
                .discovery
                .command_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.discovery.command_timeout),
            headless: config.discovery.headless.unwrap_or(true),
        };

        let metadata = MetadataSettings {
            base_url: config
                .metadata
                .base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.metadata.base_url),
            timeout: config
                .metadata
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.metadata.timeout),
        };

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            concurrency,
            table,
            allowed_schemes,
            verify_gzip: config.verify_gzip.unwrap_or(false),
            transfer,
            discovery,
            metadata,
        })
    }
}

pub fn default_allowed_schemes() -> Vec<UrlScheme> {
    vec![UrlScheme::Ftp, UrlScheme::Http]
}
