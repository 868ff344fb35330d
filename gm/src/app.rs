//! Service wiring for the command line
//!
//! An `App` owns the StateManager and prompt loader. Model clients are built
//! on demand, so commands that only read the store need no API key.

use std::path::PathBuf;
use std::sync::Arc;

use eyre::{Context, Result};
use tracing::{debug, info};

use crate::checkin::CheckInService;
use crate::config::{Config, LlmConfig};
use crate::discovery::{BlueprintAnalyzer, ConversationService, DiscoveryPipeline, ResponseStreamer};
use crate::llm::{LlmClient, LlmGateway, create_client};
use crate::prompts::PromptLoader;
use crate::roadmap::{Planner, RoadmapService};
use crate::state::StateManager;

pub struct App {
    config: Config,
    state: StateManager,
    prompts: Arc<PromptLoader>,
    client: Option<Arc<dyn LlmClient>>,
}

impl App {
    /// Open the store (`store_dir` overrides the configured one) and load prompts
    pub fn open(config: Config, store_dir: Option<PathBuf>) -> Result<Self> {
        let store_dir = store_dir.unwrap_or_else(|| config.storage.store_dir.clone());
        debug!(store_dir = %store_dir.display(), "App::open: called");
        let state = StateManager::spawn(&store_dir)
            .with_context(|| format!("Failed to open store at {}", store_dir.display()))?;
        let prompts = PromptLoader::new(config.prompts.dir.as_deref()).context("Failed to load prompt templates")?;
        Ok(Self {
            config,
            state,
            prompts: Arc::new(prompts),
            client: None,
        })
    }

    /// Builder: use `client` for every model call instead of the configured provider
    pub fn with_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    fn gateway(&self, llm: &LlmConfig) -> Result<LlmGateway> {
        let client = match self.client {
            Some(ref client) => {
                debug!("App::gateway: using injected client");
                client.clone()
            }
            None => {
                self.config.validate()?;
                info!(provider = %llm.provider, model = %llm.model, "Creating LLM client");
                create_client(llm).context("Failed to create LLM client")?
            }
        };
        Ok(LlmGateway::new(client, llm))
    }

    pub fn conversations(&self) -> ConversationService {
        ConversationService::new(self.state.clone())
    }

    pub fn pipeline(&self) -> Result<DiscoveryPipeline> {
        debug!("App::pipeline: called");
        let gateway = self.gateway(&self.config.llm)?;
        let discovery = self.config.discovery.clone();
        let analyzer = BlueprintAnalyzer::new(gateway.clone(), self.prompts.clone(), discovery.history_window);
        let responder = ResponseStreamer::new(
            gateway,
            self.prompts.clone(),
            discovery.history_window,
            discovery.response_format,
        );
        Ok(DiscoveryPipeline::new(self.state.clone(), analyzer, responder, discovery))
    }

    /// Roadmap service able to plan; uses the roadmap model override if set
    pub fn roadmaps(&self) -> Result<RoadmapService> {
        debug!(model = ?self.config.roadmap.model, "App::roadmaps: called");
        let llm = match self.config.roadmap.model {
            Some(ref model) => self.config.llm.with_model(model),
            None => self.config.llm.clone(),
        };
        let planner = Planner::new(self.gateway(&llm)?, self.prompts.clone(), self.config.roadmap.clone());
        Ok(RoadmapService::new(self.state.clone(), planner))
    }

    pub fn roadmap_records(&self) -> RoadmapService {
        RoadmapService::read_only(self.state.clone())
    }

    pub fn checkins(&self) -> Result<CheckInService> {
        debug!("App::checkins: called");
        let gateway = self.gateway(&self.config.llm)?;
        Ok(CheckInService::new(self.state.clone(), gateway, self.prompts.clone()))
    }

    pub fn checkin_records(&self) -> CheckInService {
        CheckInService::read_only(self.state.clone())
    }

    /// Stop the state actor once every queued write is done
    pub async fn shutdown(&self) -> Result<()> {
        debug!("App::shutdown: called");
        self.state.shutdown().await.context("Failed to stop state manager")
    }
}
