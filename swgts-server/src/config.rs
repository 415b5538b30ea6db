//! Server configuration.
//!
//! Values are layered, lowest precedence first: compiled defaults, an optional
//! TOML file, then `SWGTS_*` environment variables. Binaries apply their own
//! command line flags on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use swgts_core::{AlignError, FilterMode, KmerAligner};
use tracing::info;

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Align(#[from] AlignError),
}

/// Which shared store backs the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Redis,
    Memory,
}

impl std::str::FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(StoreKind::Redis),
            "memory" => Ok(StoreKind::Memory),
            other => Err(ConfigError::Invalid(format!("unknown store '{}'", other))),
        }
    }
}

/// Filter mode selector, resolved into a [`FilterMode`] at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Dummy,
    Combined,
    Negative,
}

impl std::str::FromStr for FilterKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dummy" => Ok(FilterKind::Dummy),
            "combined" => Ok(FilterKind::Combined),
            "negative" => Ok(FilterKind::Negative),
            other => Err(ConfigError::Invalid(format!("unknown filter mode '{}'", other))),
        }
    }
}

/// Filter worker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub mode: FilterKind,

    /// FASTA reference indexed by the built-in aligner
    pub reference: Option<PathBuf>,

    /// Contig whose hits are kept in combined mode
    pub positive_contig: Option<String>,

    /// Mapping quality at or above which a hit is discarded in negative mode
    pub quality_threshold: u8,

    /// Artificial per-group delay in dummy mode
    pub dummy_latency_ms: u64,

    pub kmer_size: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            mode: FilterKind::Combined,
            reference: None,
            positive_contig: None,
            quality_threshold: 20,
            dummy_latency_ms: 5,
            kmer_size: 15,
        }
    }
}

impl FilterConfig {
    /// Build the filter, indexing the reference when the mode needs one
    pub fn build(&self) -> Result<FilterMode, ConfigError> {
        match self.mode {
            FilterKind::Dummy => Ok(FilterMode::Dummy {
                latency: Duration::from_millis(self.dummy_latency_ms),
            }),
            FilterKind::Combined => {
                let positive_contig = self.positive_contig.clone().ok_or_else(|| {
                    ConfigError::Invalid("combined mode requires positive_contig".to_string())
                })?;
                Ok(FilterMode::Combined {
                    aligner: Arc::new(self.aligner()?),
                    positive_contig,
                })
            }
            FilterKind::Negative => Ok(FilterMode::Negative {
                aligner: Arc::new(self.aligner()?),
                quality_threshold: self.quality_threshold,
            }),
        }
    }

    fn aligner(&self) -> Result<KmerAligner, ConfigError> {
        let reference = self.reference.as_ref().ok_or_else(|| {
            ConfigError::Invalid(format!("{:?} mode requires a reference", self.mode))
        })?;
        Ok(KmerAligner::from_fasta(reference, self.kmer_size)?)
    }
}

/// Complete server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the API listens on
    pub port: u16,

    pub store: StoreKind,

    pub redis_url: String,

    /// Upper bound on unfiltered bytes held per context
    pub max_pending_bytes: u64,

    /// Context time-to-live, refreshed by every mutation
    pub context_timeout_secs: u64,

    /// Directory receiving one subdirectory per closed context
    pub upload_dir: PathBuf,

    /// Report saved ids without writing files
    pub hands_off: bool,

    /// Number of filter workers
    pub worker_threads: usize,

    /// Longest a worker blocks on an empty queue before checking for shutdown
    pub dequeue_timeout_secs: u64,

    /// Largest accepted request body
    pub max_body_bytes: usize,

    pub filter: FilterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            store: StoreKind::Redis,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            max_pending_bytes: 300_000,
            context_timeout_secs: 60,
            upload_dir: PathBuf::from("./output/uploads"),
            hands_off: false,
            worker_threads: 8,
            dequeue_timeout_secs: 10,
            max_body_bytes: 64 * 1024 * 1024,
            filter: FilterConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by the environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    /// Defaults, then the TOML file if any, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Override fields from `SWGTS_*` variables; unparsable values are ignored
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &str,
        ) -> Option<T> {
            lookup(name).and_then(|v| v.trim().parse().ok())
        }

        if let Some(port) = parsed(&lookup, "SWGTS_PORT") {
            self.port = port;
        }
        if let Some(store) = parsed(&lookup, "SWGTS_STORE") {
            self.store = store;
        }
        if let Some(url) = lookup("SWGTS_REDIS_URL") {
            self.redis_url = url;
        }
        if let Some(n) = parsed(&lookup, "SWGTS_MAX_PENDING_BYTES") {
            self.max_pending_bytes = n;
        }
        if let Some(n) = parsed(&lookup, "SWGTS_CONTEXT_TIMEOUT_SECS") {
            self.context_timeout_secs = n;
        }
        if let Some(dir) = lookup("SWGTS_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("SWGTS_HANDS_OFF") {
            self.hands_off = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(n) = parsed(&lookup, "SWGTS_WORKER_THREADS") {
            self.worker_threads = n;
        }
        if let Some(n) = parsed(&lookup, "SWGTS_DEQUEUE_TIMEOUT_SECS") {
            self.dequeue_timeout_secs = n;
        }
        if let Some(mode) = parsed(&lookup, "SWGTS_FILTER_MODE") {
            self.filter.mode = mode;
        }
        if let Some(path) = lookup("SWGTS_REFERENCE") {
            self.filter.reference = Some(PathBuf::from(path));
        }
        if let Some(contig) = lookup("SWGTS_POSITIVE_CONTIG") {
            self.filter.positive_contig = Some(contig);
        }
        if let Some(n) = parsed(&lookup, "SWGTS_QUALITY_THRESHOLD") {
            self.filter.quality_threshold = n;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pending_bytes == 0 {
            return Err(ConfigError::Invalid("max_pending_bytes must be positive".into()));
        }
        if self.context_timeout_secs == 0 {
            return Err(ConfigError::Invalid("context_timeout_secs must be positive".into()));
        }
        if self.dequeue_timeout_secs == 0 {
            return Err(ConfigError::Invalid("dequeue_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn context_timeout(&self) -> Duration {
        Duration::from_secs(self.context_timeout_secs)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_secs(self.dequeue_timeout_secs)
    }

    /// Log every effective value once
    pub fn log(&self) {
        info!(
            port = self.port,
            store = ?self.store,
            redis_url = %self.redis_url,
            max_pending_bytes = self.max_pending_bytes,
            context_timeout_secs = self.context_timeout_secs,
            upload_dir = %self.upload_dir.display(),
            hands_off = self.hands_off,
            worker_threads = self.worker_threads,
            dequeue_timeout_secs = self.dequeue_timeout_secs,
            max_body_bytes = self.max_body_bytes,
            "Server configuration"
        );
        info!(
            mode = ?self.filter.mode,
            reference = ?self.filter.reference,
            positive_contig = ?self.filter.positive_contig,
            quality_threshold = self.filter.quality_threshold,
            dummy_latency_ms = self.filter.dummy_latency_ms,
            kmer_size = self.filter.kmer_size,
            "Filter configuration"
        );
    }
}
