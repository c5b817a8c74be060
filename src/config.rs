use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub feasibility: FeasibilityConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
        }
    }
}

fn default_max_length() -> usize {
    crate::chunk::DEFAULT_MAX_LENGTH
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_match_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            cache_size: default_cache_size(),
            timeout_secs: default_match_timeout_secs(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.75
}
fn default_cache_size() -> usize {
    4096
}
fn default_match_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeasibilityConfig {
    #[serde(default = "default_enrollment")]
    pub default_enrollment: i64,
    #[serde(default = "default_max_patients")]
    pub max_patients: usize,
}

impl Default for FeasibilityConfig {
    fn default() -> Self {
        Self {
            default_enrollment: default_enrollment(),
            max_patients: default_max_patients(),
        }
    }
}

fn default_enrollment() -> i64 {
    100
}
fn default_max_patients() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k: default_candidate_k(),
            final_limit: default_final_limit(),
        }
    }
}

fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_length == 0 {
        anyhow::bail!("chunking.max_length must be > 0");
    }

    // Validate matching
    if !(0.0..=1.0).contains(&config.matching.similarity_threshold) {
        anyhow::bail!("matching.similarity_threshold must be in [0.0, 1.0]");
    }
    if config.matching.cache_size == 0 {
        anyhow::bail!("matching.cache_size must be > 0");
    }

    // Validate feasibility
    if config.feasibility.max_patients == 0 {
        anyhow::bail!("feasibility.max_patients must be >= 1");
    }

    // Validate retrieval
    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
