//! TOML configuration.
//!
//! Every directory the core touches is named here and handed to components at
//! construction; nothing reads process-global paths.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub profiler: ProfilerConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub upload_root: PathBuf,
    pub plot_root: PathBuf,
    pub index_root: PathBuf,
    #[serde(default = "default_plot_url_prefix")]
    pub plot_url_prefix: String,
}

fn default_plot_url_prefix() -> String {
    "/static/plots".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Rebuild an index whose recorded source hash no longer matches the file.
    #[serde(default)]
    pub check_freshness: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            check_freshness: false,
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_max_execution_secs")]
    pub max_execution_secs: u64,
    #[serde(default = "default_agent_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_execution_secs: default_max_execution_secs(),
            max_tokens: default_agent_max_tokens(),
            preview_rows: default_preview_rows(),
        }
    }
}

/// Hard ceiling on reasoning iterations.
pub const MAX_AGENT_ITERATIONS: usize = 50;
/// Hard ceiling on the agent's wall-clock budget.
pub const MAX_AGENT_SECS: u64 = 300;

fn default_max_iterations() -> usize {
    MAX_AGENT_ITERATIONS
}
fn default_max_execution_secs() -> u64 {
    MAX_AGENT_SECS
}
fn default_agent_max_tokens() -> usize {
    256
}
fn default_preview_rows() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProfilerConfig {
    #[serde(default = "default_bar_max_cardinality")]
    pub bar_max_cardinality: usize,
    #[serde(default = "default_pie_max_cardinality")]
    pub pie_max_cardinality: usize,
    #[serde(default = "default_pie_top_values")]
    pub pie_top_values: usize,
    #[serde(default = "default_line_max_points")]
    pub line_max_points: usize,
    #[serde(default = "default_line_max_series")]
    pub line_max_series: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            bar_max_cardinality: default_bar_max_cardinality(),
            pie_max_cardinality: default_pie_max_cardinality(),
            pie_top_values: default_pie_top_values(),
            line_max_points: default_line_max_points(),
            line_max_series: default_line_max_series(),
        }
    }
}

fn default_bar_max_cardinality() -> usize {
    20
}
fn default_pie_max_cardinality() -> usize {
    10
}
fn default_pie_top_values() -> usize {
    8
}
fn default_line_max_points() -> usize {
    50
}
fn default_line_max_series() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    #[serde(default = "default_max_kpi_columns")]
    pub max_kpi_columns: usize,
    #[serde(default = "default_max_per_source")]
    pub max_kpis_per_source: usize,
    #[serde(default = "default_max_per_source")]
    pub max_charts_per_source: usize,
    #[serde(default = "default_insight_numeric_columns")]
    pub insight_numeric_columns: usize,
    #[serde(default = "default_insight_categorical_columns")]
    pub insight_categorical_columns: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            max_kpi_columns: default_max_kpi_columns(),
            max_kpis_per_source: default_max_per_source(),
            max_charts_per_source: default_max_per_source(),
            insight_numeric_columns: default_insight_numeric_columns(),
            insight_categorical_columns: default_insight_categorical_columns(),
        }
    }
}

fn default_max_kpi_columns() -> usize {
    4
}
fn default_max_per_source() -> usize {
    6
}
fn default_insight_numeric_columns() -> usize {
    3
}
fn default_insight_categorical_columns() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            max_retries: default_generation_retries(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_generation_retries() -> u32 {
    2
}
fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: default_max_concurrent_calls(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_max_concurrent_calls() -> usize {
    4
}
fn default_request_timeout() -> u64 {
    330
}

impl EmbeddingConfig {
    pub fn is_remote(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "ollama")
    }
}

impl Config {
    /// Configuration rooted at `root` with every other value defaulted.
    pub fn with_root(root: &Path) -> Self {
        Self {
            paths: PathsConfig {
                upload_root: root.join("uploads"),
                plot_root: root.join("static").join("plots"),
                index_root: root.join("vector_store"),
                plot_url_prefix: default_plot_url_prefix(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            agent: AgentConfig::default(),
            profiler: ProfilerConfig::default(),
            dashboard: DashboardConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if !(1..=MAX_AGENT_ITERATIONS).contains(&config.agent.max_iterations) {
        anyhow::bail!("agent.max_iterations must be in 1..={}", MAX_AGENT_ITERATIONS);
    }
    if !(1..=MAX_AGENT_SECS).contains(&config.agent.max_execution_secs) {
        anyhow::bail!("agent.max_execution_secs must be in 1..={}", MAX_AGENT_SECS);
    }

    if config.limits.max_concurrent_calls == 0 {
        anyhow::bail!("limits.max_concurrent_calls must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "local" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, local, openai, or ollama.",
            other
        ),
    }

    if config.embedding.is_remote() {
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

    match config.generation.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.generation.model.is_none() {
                anyhow::bail!(
                    "generation.model must be specified when provider is '{}'",
                    config.generation.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let text = format!(
            "[paths]\nupload_root = \"/tmp/u\"\nplot_root = \"/tmp/p\"\nindex_root = \"/tmp/i\"\n{}",
            extra
        );
        let config: Config = toml::from_str(&text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = parse("").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.agent.max_iterations, 50);
        assert_eq!(config.agent.max_execution_secs, 300);
        assert_eq!(config.profiler.bar_max_cardinality, 20);
        assert_eq!(config.profiler.pie_max_cardinality, 10);
        assert_eq!(config.paths.plot_url_prefix, "/static/plots");
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.generation.provider, "disabled");
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk() {
        let err = parse("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn rejects_iterations_above_ceiling() {
        assert!(parse("[agent]\nmax_iterations = 51\n").is_err());
        assert!(parse("[agent]\nmax_execution_secs = 301\n").is_err());
    }

    #[test]
    fn remote_embedding_requires_model_and_dims() {
        assert!(parse("[embedding]\nprovider = \"openai\"\n").is_err());
        assert!(parse(
            "[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n"
        )
        .is_ok());
    }

    #[test]
    fn unknown_generation_provider_rejected() {
        let err = parse("[generation]\nprovider = \"mystery\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown generation provider"));
    }
}
