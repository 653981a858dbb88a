use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub crypto: CryptoConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,
    /// Environment variable holding the bearer token. Token acquisition
    /// itself (device flow, refresh) lives outside this tool.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_graph_base_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}
fn default_token_env() -> String {
    "GRAPH_ACCESS_TOKEN".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `ollama` or `openai`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dims")]
    pub dims: usize,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
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
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_embedding_dims(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> String {
    "all-minilm".to_string()
}
fn default_embedding_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct SynthesisConfig {
    #[serde(default = "default_synthesis_model")]
    pub model: String,
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_synthesis_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model: default_synthesis_model(),
            url: default_ollama_url(),
            timeout_secs: default_synthesis_timeout_secs(),
        }
    }
}

fn default_synthesis_model() -> String {
    "mistral".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_synthesis_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Messages per store+index commit.
    #[serde(default = "default_ingest_batch_size")]
    pub batch_size: usize,
    /// Messages per remote page fetch.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Default most-recent-N cap per folder.
    #[serde(default = "default_per_folder_limit")]
    pub per_folder_limit: usize,
    /// Minimum visible duration of the INDEXING milestone, in milliseconds.
    /// 0 folds the phase into STORING.
    #[serde(default = "default_indexing_floor_ms")]
    pub indexing_floor_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_ingest_batch_size(),
            page_size: default_page_size(),
            per_folder_limit: default_per_folder_limit(),
            indexing_floor_ms: default_indexing_floor_ms(),
        }
    }
}

fn default_ingest_batch_size() -> usize {
    25
}
fn default_page_size() -> usize {
    25
}
fn default_per_folder_limit() -> usize {
    50
}
fn default_indexing_floor_ms() -> u64 {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Sources returned per answer unless the caller overrides it.
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    /// Candidates below this cosine similarity never become sources.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// Snippet length in the citation list.
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_sources: default_max_sources(),
            min_score: default_min_score(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_max_sources() -> usize {
    4
}
fn default_min_score() -> f32 {
    0.25
}
fn default_snippet_chars() -> usize {
    240
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CryptoConfig {
    /// When true, message bodies are encrypted at rest under a passphrase.
    #[serde(default)]
    pub enabled: bool,
    /// Environment variable the passphrase is read from.
    #[serde(default = "default_passphrase_env")]
    pub passphrase_env: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            passphrase_env: default_passphrase_env(),
        }
    }
}

fn default_passphrase_env() -> String {
    "MBX_PASSPHRASE".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.embedding.provider.as_str() {
        "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be ollama or openai.",
            other
        ),
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }
    if config.ingest.page_size == 0 {
        anyhow::bail!("ingest.page_size must be > 0");
    }
    if config.ingest.per_folder_limit == 0 {
        anyhow::bail!("ingest.per_folder_limit must be > 0");
    }

    if config.retrieval.max_sources == 0 {
        anyhow::bail!("retrieval.max_sources must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.min_score) {
        anyhow::bail!("retrieval.min_score must be in [-1.0, 1.0]");
    }

    Ok(())
}
