use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{ServiceError, ServiceResult};

/// Service configuration, loaded once at startup
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_processing")]
    pub processing: ProcessingConfig,

    #[serde(default = "default_search")]
    pub search: SearchConfig,

    #[serde(default = "default_inference")]
    pub inference: InferenceConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Job pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Number of concurrent worker loops pulling jobs off the queue
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// How long a leased job may run before the reaper requeues it
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,

    #[serde(default = "default_lease_sweep_secs")]
    pub lease_sweep_secs: u64,

    #[serde(default = "default_retry_sweep_secs")]
    pub retry_sweep_secs: u64,
}

/// Search configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Hard cap on result set size before pagination; anything beyond is
    /// dropped and the response is flagged truncated
    #[serde(default = "default_result_cap")]
    pub result_cap: usize,

    #[serde(default = "default_threshold")]
    pub default_threshold: f64,

    #[serde(default = "default_text_weight")]
    pub default_text_weight: f64,

    #[serde(default = "default_semantic_weight")]
    pub default_semantic_weight: f64,

    /// Size of the head slice handed to the reranker
    #[serde(default = "default_rerank_top_k")]
    pub rerank_top_k: usize,
}

/// Inference backend configuration (Ollama-compatible API)
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_inference_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_classify_model")]
    pub classify_model: String,

    /// Vision model for OCR (e.g., llava, moondream)
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Load configuration from file and env vars
pub fn load_config() -> ServiceResult<StaticConfig> {
    Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("QUIRE")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize config: {}", e),
        })
}

// ==================== Default Value Functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_processing() -> ProcessingConfig {
    ProcessingConfig {
        worker_count: default_worker_count(),
        default_max_retries: default_max_retries(),
        lease_secs: default_lease_secs(),
        retry_base_ms: default_retry_base_ms(),
        retry_cap_ms: default_retry_cap_ms(),
        lease_sweep_secs: default_lease_sweep_secs(),
        retry_sweep_secs: default_retry_sweep_secs(),
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_lease_secs() -> u64 {
    300
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_retry_cap_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_lease_sweep_secs() -> u64 {
    30
}

fn default_retry_sweep_secs() -> u64 {
    5
}

fn default_search() -> SearchConfig {
    SearchConfig {
        default_limit: default_search_limit(),
        max_limit: default_max_limit(),
        result_cap: default_result_cap(),
        default_threshold: default_threshold(),
        default_text_weight: default_text_weight(),
        default_semantic_weight: default_semantic_weight(),
        rerank_top_k: default_rerank_top_k(),
    }
}

fn default_search_limit() -> usize {
    20
}

fn default_max_limit() -> usize {
    100
}

fn default_result_cap() -> usize {
    1000
}

fn default_threshold() -> f64 {
    0.3
}

fn default_text_weight() -> f64 {
    0.6
}

fn default_semantic_weight() -> f64 {
    0.4
}

fn default_rerank_top_k() -> usize {
    50
}

fn default_inference() -> InferenceConfig {
    InferenceConfig {
        base_url: default_inference_url(),
        embedding_model: default_embedding_model(),
        classify_model: default_classify_model(),
        vision_model: default_vision_model(),
        request_timeout_secs: default_request_timeout_secs(),
    }
}

fn default_inference_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_classify_model() -> String {
    "llama3.2".to_string()
}

fn default_vision_model() -> String {
    "llava".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}
