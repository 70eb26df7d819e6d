use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::credentials::{CredentialStore, EnvCredentialStore};
use crate::llm::{KeywordExtractor, LlmClient};
use crate::merge::oracle::{LlmOracle, SimilarityOracle};
use crate::pipeline::Pipeline;
use crate::schedule::Scheduler;
use crate::sources::SourceRegistry;
use crate::store::ContextStore;

/// Everything a command needs, built once from configuration.
pub struct AppState {
    pub config: Config,
    pub store: Arc<ContextStore>,
    pub registry: Arc<SourceRegistry>,
    pub llm: Option<Arc<LlmClient>>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    /// Wire the app with credentials from the environment.
    pub async fn init(config: Config, state_dir: &Path) -> Result<Self> {
        Self::with_credentials(config, state_dir, &EnvCredentialStore::new()).await
    }

    pub async fn with_credentials(
        config: Config,
        state_dir: &Path,
        credentials: &dyn CredentialStore,
    ) -> Result<Self> {
        let store = Arc::new(
            ContextStore::open(state_dir)
                .await
                .with_context(|| format!("Failed to open state at {}", state_dir.display()))?,
        );
        info!(path = %state_dir.display(), "context store initialized");

        let registry = Arc::new(SourceRegistry::from_config(&config, credentials)?);
        if registry.is_empty() {
            info!("no sources have credentials; set ROVE_<SOURCE>_TOKEN to enable one");
        }

        let llm = LlmClient::from_config(&config.ai)?.map(Arc::new);
        let (oracle, keywords) = match &llm {
            Some(llm) => {
                info!(model = llm.model(), "LLM client initialized");
                (
                    Some(Arc::new(LlmOracle::new(llm.clone())) as Arc<dyn SimilarityOracle>),
                    Some(llm.clone() as Arc<dyn KeywordExtractor>),
                )
            }
            None => {
                info!("no [ai] endpoint configured, merging by identity only");
                (None, None)
            }
        };

        let pipeline = Arc::new(Pipeline::new(
            &config,
            registry.clone(),
            store.clone(),
            oracle,
            keywords,
        ));
        let scheduler = Arc::new(Scheduler::new(pipeline, config.scheduler.clone()));

        Ok(Self {
            config,
            store,
            registry,
            llm,
            scheduler,
        })
    }
}
