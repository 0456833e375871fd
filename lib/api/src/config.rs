use dealsim_core::{Error, RepresentationScheme, Result};
use dealsim_similarity::{FallbackConfig, RankerConfig};
use dealsim_storage::TuningConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bounds on calls to the candidate store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub timeout_ms: u64,
    /// Pause before the single retry after a timeout
    pub retry_backoff_ms: u64,
    /// Candidates requested per result slot
    pub overfetch: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            retry_backoff_ms: 100,
            overfetch: 5,
        }
    }
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepresentationConfig {
    pub version: String,
    pub struct_dim: usize,
    pub text_dim: usize,
}

impl Default for RepresentationConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            struct_dim: 8,
            text_dim: 384,
        }
    }
}

impl RepresentationConfig {
    pub fn scheme(&self) -> RepresentationScheme {
        RepresentationScheme::new(&self.version, self.struct_dim, self.text_dim)
    }
}

/// Service configuration. Every field has a default so a partial JSON file
/// only overrides what it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub http_port: u16,
    pub log_level: String,
    pub default_k: usize,
    pub max_k: usize,
    /// Result sets kept for attribution lookups and feedback snapshots
    pub result_cache_size: usize,
    pub representation: RepresentationConfig,
    pub retrieval: RetrievalConfig,
    pub ranker: RankerConfig,
    pub fallback: FallbackConfig,
    pub tuning: TuningConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            http_port: 7333,
            log_level: "info".to_string(),
            default_k: 10,
            max_k: 100,
            result_cache_size: 1024,
            representation: RepresentationConfig::default(),
            retrieval: RetrievalConfig::default(),
            ranker: RankerConfig::default(),
            fallback: FallbackConfig::default(),
            tuning: TuningConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: ServiceConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.representation.struct_dim == 0 {
            return Err(Error::InvalidConfig("representation.struct_dim must be positive".into()));
        }
        if self.default_k == 0 || self.default_k > self.max_k {
            return Err(Error::InvalidConfig(format!(
                "default_k must be in 1..={}, got {}",
                self.max_k, self.default_k
            )));
        }
        if !(0.0..=1.0).contains(&self.fallback.confidence_threshold) {
            return Err(Error::InvalidConfig("fallback.confidence_threshold must be in [0, 1]".into()));
        }
        if !(0.0..=1.0).contains(&self.ranker.diversity_factor) {
            return Err(Error::InvalidConfig("ranker.diversity_factor must be in [0, 1]".into()));
        }
        if self.retrieval.overfetch == 0 {
            return Err(Error::InvalidConfig("retrieval.overfetch must be positive".into()));
        }
        Ok(())
    }

    pub fn feedback_path(&self) -> PathBuf {
        self.data_dir.join("feedback.jsonl")
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.data_dir.join("profiles")
    }
}
