//! Configuration parsing and validation.
//!
//! The retrieval core is configured via a TOML file (default: `config/rag.toml`).
//! The config defines on-disk storage paths, chunking parameters, hybrid
//! retrieval tuning, the embedding and LLM HTTP endpoints, the rolling
//! context budget, and the optional status server bind address.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub docs: DocsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub qa: QaConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub reload: ReloadConfig,
    #[serde(default)]
    pub verbose_rag_logging: bool,
}

/// Where every on-disk artifact (index, metadata, caches, reports) lives.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
}

/// The local folder this crate ingests documents from.
#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_fraction")]
    pub overlap_fraction: f64,
    #[serde(default = "default_split_trigger_tokens")]
    pub split_trigger_tokens: usize,
    #[serde(default = "default_split_window_tokens")]
    pub split_window_tokens: usize,
    #[serde(default = "default_split_overlap_tokens")]
    pub split_overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_chunk_tokens(),
            overlap_fraction: default_overlap_fraction(),
            split_trigger_tokens: default_split_trigger_tokens(),
            split_window_tokens: default_split_window_tokens(),
            split_overlap_tokens: default_split_overlap_tokens(),
        }
    }
}

fn default_chunk_tokens() -> usize {
    400
}
fn default_overlap_fraction() -> f64 {
    0.25
}
fn default_split_trigger_tokens() -> usize {
    30_000
}
fn default_split_window_tokens() -> usize {
    10_000
}
fn default_split_overlap_tokens() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_true")]
    pub hybrid_search_enabled: bool,
    #[serde(default = "default_semantic_weight")]
    pub hybrid_semantic_weight: f64,
    #[serde(default = "default_keyword_weight")]
    pub hybrid_keyword_weight: f64,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_true")]
    pub context_expansion_enabled: bool,
    #[serde(default = "default_expansion_chars")]
    pub expansion_chars: usize,
    #[serde(default = "default_max_expanded_chars")]
    pub max_expanded_chars: usize,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    #[serde(default = "default_true")]
    pub enable_citations: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_search_enabled: true,
            hybrid_semantic_weight: default_semantic_weight(),
            hybrid_keyword_weight: default_keyword_weight(),
            relevance_threshold: default_relevance_threshold(),
            top_k: default_top_k(),
            context_expansion_enabled: true,
            expansion_chars: default_expansion_chars(),
            max_expanded_chars: default_max_expanded_chars(),
            ef_construction: default_ef_construction(),
            enable_citations: true,
        }
    }
}

fn default_ef_construction() -> usize {
    200
}

fn default_semantic_weight() -> f64 {
    0.7
}
fn default_keyword_weight() -> f64 {
    0.3
}
fn default_relevance_threshold() -> f32 {
    0.35
}
fn default_top_k() -> usize {
    5
}
fn default_expansion_chars() -> usize {
    400
}
fn default_max_expanded_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_flush_count")]
    pub cache_flush_count: usize,
    #[serde(default = "default_cache_flush_secs")]
    pub cache_flush_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            dims: default_dims(),
            max_input_tokens: default_max_input_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            cache_flush_count: default_cache_flush_count(),
            cache_flush_secs: default_cache_flush_secs(),
        }
    }
}

fn default_embedding_url() -> String {
    "http://localhost:7777/embedding".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_max_input_tokens() -> usize {
    410
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_cache_flush_count() -> usize {
    50
}
fn default_cache_flush_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct QaConfig {
    #[serde(default = "default_qa_threshold")]
    pub relevance_threshold: f32,
    #[serde(default = "default_qa_top_k")]
    pub top_k: usize,
    #[serde(default = "default_qa_count_small")]
    pub qa_count_small: usize,
    #[serde(default = "default_qa_count_medium")]
    pub qa_count_medium: usize,
    #[serde(default = "default_qa_count_large")]
    pub qa_count_large: usize,
    #[serde(default = "default_dedup_threshold")]
    pub dedup_cosine_threshold: f32,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: default_qa_threshold(),
            top_k: default_qa_top_k(),
            qa_count_small: default_qa_count_small(),
            qa_count_medium: default_qa_count_medium(),
            qa_count_large: default_qa_count_large(),
            dedup_cosine_threshold: default_dedup_threshold(),
        }
    }
}

fn default_qa_threshold() -> f32 {
    0.5
}
fn default_qa_top_k() -> usize {
    5
}
fn default_qa_count_small() -> usize {
    10
}
fn default_qa_count_medium() -> usize {
    25
}
fn default_qa_count_large() -> usize {
    50
}
fn default_dedup_threshold() -> f32 {
    0.95
}

#[derive(Debug, Deserialize, Clone)]
pub struct RagConfig {
    #[serde(default = "default_rag_mode")]
    pub mode: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub rolling_budget: bool,
    #[serde(default = "default_budget_tokens")]
    pub context_budget_tokens: usize,
    #[serde(default = "default_both_mode_floor")]
    pub both_mode_chunk_floor_tokens: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            mode: default_rag_mode(),
            enabled: true,
            rolling_budget: true,
            context_budget_tokens: default_budget_tokens(),
            both_mode_chunk_floor_tokens: default_both_mode_floor(),
        }
    }
}

fn default_rag_mode() -> String {
    "both".to_string()
}
fn default_true() -> bool {
    true
}
fn default_budget_tokens() -> usize {
    4000
}
fn default_both_mode_floor() -> usize {
    1000
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
    "127.0.0.1:8088".to_string()
}

/// The external LLM chat-completion collaborator used for offline document
/// summary generation and Q&A generation. Never called from the query path.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
        }
    }
}

fn default_llm_url() -> String {
    "http://localhost:7778/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    30
}
fn default_llm_max_retries() -> u32 {
    3
}

/// Hot-reload polling cadence. The reload signal (SIGUSR1-equivalent) is
/// always active regardless of this config; this section only tunes the
/// mtime-poll fallback.
#[derive(Debug, Deserialize, Clone)]
pub struct ReloadConfig {
    #[serde(default = "default_reload_poll_secs")]
    pub poll_interval_secs: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_reload_poll_secs(),
        }
    }
}

fn default_reload_poll_secs() -> u64 {
    60
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    let weight_sum = config.retrieval.hybrid_semantic_weight + config.retrieval.hybrid_keyword_weight;
    if (weight_sum - 1.0).abs() > 1e-6 {
        anyhow::bail!(
            "retrieval.hybrid_semantic_weight + retrieval.hybrid_keyword_weight must sum to 1.0, got {}",
            weight_sum
        );
    }

    if !(0.0..=1.0).contains(&config.retrieval.relevance_threshold) {
        anyhow::bail!("retrieval.relevance_threshold must be in [0.0, 1.0]");
    }

    match config.rag.mode.as_str() {
        "qa" | "chunk" | "both" => {}
        other => anyhow::bail!("rag.mode must be one of qa, chunk, both; got '{}'", other),
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let retrieval = RetrievalConfig::default();
        assert!((retrieval.hybrid_semantic_weight + retrieval.hybrid_keyword_weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_weight_sum() {
        let toml_str = r#"
            [store]
            root = "/tmp/ragstore"
            [docs]
            root = "/tmp/docs"
            [retrieval]
            hybrid_semantic_weight = 0.9
            hybrid_keyword_weight = 0.3
        "#;
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), toml_str).unwrap();
        let result = load_config(tmp.path());
        assert!(result.is_err());
    }
}
