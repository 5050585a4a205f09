use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Remote archive access. The upstream host throttles aggressively, so the
/// defaults are conservative.
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Ordered retry delays; one element is consumed per retry.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,
    /// Pause after every successful fetch.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            backoff_secs: default_backoff_secs(),
            request_delay_ms: default_request_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.sec.gov/".to_string()
}
fn default_user_agent() -> String {
    format!("edgar-ingest/{}", env!("CARGO_PKG_VERSION"))
}
fn default_backoff_secs() -> Vec<u64> {
    vec![1, 2, 5, 10, 30]
}
fn default_request_delay_ms() -> u64 {
    100
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_document_prefix")]
    pub document_prefix: String,
    pub local: Option<LocalStoreConfig>,
    pub s3: Option<S3StoreConfig>,
}

fn default_backend() -> String {
    "local".to_string()
}
fn default_document_prefix() -> String {
    "documents".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalStoreConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StoreConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_true")]
    pub store_raw: bool,
    #[serde(default = "default_true")]
    pub store_text: bool,
    /// Empty means every form type is ingested.
    #[serde(default)]
    pub form_types: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            store_raw: true,
            store_text: true,
            form_types: Vec::new(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_true() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if reqwest::Url::parse(&config.http.base_url).is_err() {
        bail!("http.base_url is not a valid URL: '{}'", config.http.base_url);
    }

    if config.ingest.workers == 0 {
        bail!("ingest.workers must be >= 1");
    }

    match config.storage.backend.as_str() {
        "local" => {
            if config.storage.local.is_none() {
                bail!("storage.backend is 'local' but [storage.local] is missing");
            }
        }
        "s3" => {
            if config.storage.s3.is_none() {
                bail!("storage.backend is 's3' but [storage.s3] is missing");
            }
        }
        other => bail!(
            "Unknown storage backend: '{}'. Must be local or s3.",
            other
        ),
    }

    Ok(())
}
