//! Top-level service wiring.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::StaticConfig;
use crate::content::ContentStore;
use crate::db::Database;
use crate::error::ServiceResult;
use crate::events::EventBus;
use crate::jobs::{Dispatcher, HandlerRegistry};
use crate::ollama::OllamaClient;
use crate::search::SearchService;

/// Main service coordinator
pub struct QuireService {
    pub config: StaticConfig,
    pub ollama: Arc<OllamaClient>,
    pub dispatcher: Arc<Dispatcher>,
    pub search: Arc<SearchService>,
}

impl QuireService {
    /// Create a new service instance.
    /// Accepts a pre-opened database so callers control where it lives.
    pub async fn new(db: Arc<Database>, config: StaticConfig) -> ServiceResult<Self> {
        info!("Initializing Quire document service");

        let ollama = Arc::new(OllamaClient::new(config.inference.clone())?);

        // Inference jobs retry on their own, so an unavailable backend only warns
        if ollama.health_check().await {
            info!(url = %config.inference.base_url, "Inference backend is available");
        } else {
            warn!(url = %config.inference.base_url, "Inference backend is not available");
        }

        let content = Arc::new(ContentStore::new(&config.storage.data_dir));
        let registry = Arc::new(HandlerRegistry::new(
            ollama.clone(),
            ollama.clone(),
            ollama.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            content,
            registry,
            Arc::new(EventBus::new()),
            config.processing.clone(),
        ));
        let search = Arc::new(SearchService::new(
            db,
            ollama.clone(),
            ollama.clone(),
            config.search.clone(),
        ));

        Ok(Self {
            config,
            ollama,
            dispatcher,
            search,
        })
    }

    /// Probe the inference backend, used by the health endpoint
    pub async fn inference_available(&self) -> bool {
        self.ollama.health_check().await
    }
}
