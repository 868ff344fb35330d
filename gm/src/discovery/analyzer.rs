//! Blueprint analyzer
//!
//! One model call per turn that reads the conversation and returns what is
//! new about the goal. Any failure leaves the Blueprint unchanged.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::merger;
use super::responder::human_turn;
use crate::domain::{Blueprint, BlueprintField, HistoryEntry};
use crate::llm::LlmGateway;
use crate::prompts::PromptLoader;

pub(crate) const ANALYSIS_PROMPT: &str = "discovery-analysis";
pub(crate) const ANALYSIS_TAG: &str = "analyze_turn";

#[derive(Debug, Serialize)]
struct AnalysisVars {
    goal: String,
    why: String,
    timeline: String,
    obstacles: String,
    resources: String,
    milestones: String,
    uncertainties: String,
}

impl AnalysisVars {
    fn from_blueprint(blueprint: &Blueprint) -> Self {
        Self {
            goal: blueprint.display_value(BlueprintField::Goal),
            why: blueprint.display_value(BlueprintField::Why),
            timeline: blueprint.display_value(BlueprintField::Timeline),
            obstacles: blueprint.display_value(BlueprintField::Obstacles),
            resources: blueprint.display_value(BlueprintField::Resources),
            milestones: blueprint.display_value(BlueprintField::Milestones),
            uncertainties: blueprint.display_uncertainties(),
        }
    }
}

#[derive(Clone)]
pub struct BlueprintAnalyzer {
    gateway: LlmGateway,
    prompts: Arc<PromptLoader>,
    history_window: usize,
}

impl BlueprintAnalyzer {
    pub fn new(gateway: LlmGateway, prompts: Arc<PromptLoader>, history_window: usize) -> Self {
        debug!(history_window, "BlueprintAnalyzer::new: called");
        Self {
            gateway,
            prompts,
            history_window,
        }
    }

    /// Analyze the turn ending `history` and return the merged Blueprint
    pub async fn analyze(&self, history: &[HistoryEntry], blueprint: &Blueprint) -> Blueprint {
        debug!(history_len = history.len(), "BlueprintAnalyzer::analyze: called");
        let system = match self.prompts.render(ANALYSIS_PROMPT, &AnalysisVars::from_blueprint(blueprint)) {
            Ok(system) => system,
            Err(e) => {
                warn!(error = %e, "BlueprintAnalyzer::analyze: prompt render failed");
                return blueprint.clone();
            }
        };

        let messages = vec![human_turn(history, self.history_window)];
        match self.gateway.complete(&system, messages, ANALYSIS_TAG).await {
            Ok(output) => merger::merge(blueprint, &output),
            Err(e) => {
                warn!(error = %e, "BlueprintAnalyzer::analyze: model call failed, keeping blueprint");
                blueprint.clone()
            }
        }
    }
}
