//! CheckInService: analyze, confirm and reject progress reports

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::discovery::require_user;
use crate::domain::{AppliedUpdate, CheckIn, Node, ProposedUpdate, Roadmap};
use crate::error::AppError;
use crate::llm::{LlmGateway, Message, parse_json_output};
use crate::prompts::PromptLoader;
use crate::state::StateManager;

const CHECKIN_PROMPT: &str = "checkin-analysis";
const CHECKIN_TAG: &str = "checkin_analysis";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub checkin_id: String,
    pub proposed_updates: Vec<ProposedUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmResponse {
    pub success: bool,
    pub updated_nodes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectResponse {
    pub success: bool,
}

fn node_context(nodes: &[Node]) -> String {
    nodes
        .iter()
        .map(|n| {
            format!(
                "- ID: {}, Label: {}, Type: {}, Current Progress: {}%",
                n.id, n.label, n.node_type, n.progress
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whole-number delta from a number or numeric string
fn delta_value(value: &Value) -> Option<i32> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok()?,
        _ => return None,
    };
    Some(number.round().clamp(-100.0, 100.0) as i32)
}

/// Proposed updates from a model reply, keeping only nodes of this roadmap
///
/// An unparseable reply yields no proposals.
fn proposals_from(text: &str, nodes: &[Node]) -> Vec<ProposedUpdate> {
    let value = match parse_json_output(text) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Check-in analysis output was not JSON, proposing nothing");
            return Vec::new();
        }
    };
    let Some(items) = value.get("updates").and_then(Value::as_array) else {
        warn!("Check-in analysis output has no updates list");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let node_id = item.get("node_id").and_then(Value::as_str)?.trim();
            if !nodes.iter().any(|n| n.id == node_id) {
                debug!(%node_id, "proposals_from: dropping unknown node");
                return None;
            }
            let delta = item.get("progress_delta").and_then(delta_value)?;
            let log_entry = item.get("log_entry").and_then(Value::as_str).unwrap_or_default();
            Some(ProposedUpdate::new(node_id, delta, log_entry.trim()))
        })
        .collect()
}

#[derive(Clone)]
pub struct CheckInService {
    state: StateManager,
    analysis: Option<(LlmGateway, Arc<PromptLoader>)>,
}

impl CheckInService {
    pub fn new(state: StateManager, gateway: LlmGateway, prompts: Arc<PromptLoader>) -> Self {
        Self {
            state,
            analysis: Some((gateway, prompts)),
        }
    }

    /// A service that confirms, rejects and lists; `analyze` fails
    pub fn read_only(state: StateManager) -> Self {
        Self { state, analysis: None }
    }

    async fn owned_roadmap(&self, user_id: &str, roadmap_id: &str) -> Result<Roadmap, AppError> {
        let user_id = require_user(user_id)?;
        let roadmap = self
            .state
            .get_roadmap(roadmap_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Roadmap {}", roadmap_id)))?;
        if !roadmap.is_owned_by(user_id) {
            return Err(AppError::Forbidden(format!("roadmap {}", roadmap_id)));
        }
        Ok(roadmap)
    }

    /// A pending or finished check-in whose roadmap `user_id` owns
    async fn owned_checkin(&self, user_id: &str, checkin_id: &str) -> Result<CheckIn, AppError> {
        debug!(%user_id, %checkin_id, "CheckInService::owned_checkin: called");
        let checkin = self
            .state
            .get_checkin(checkin_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Check-in {}", checkin_id)))?;
        self.owned_roadmap(user_id, &checkin.roadmap_id).await?;
        Ok(checkin)
    }

    /// Propose progress deltas for a report and store a pending check-in
    pub async fn analyze(&self, user_id: &str, roadmap_id: &str, user_input: &str) -> Result<AnalyzeResponse, AppError> {
        debug!(%user_id, %roadmap_id, "CheckInService::analyze: called");
        let user_input = user_input.trim();
        if user_input.is_empty() {
            return Err(AppError::Validation("check-in text is empty".to_string()));
        }
        self.owned_roadmap(user_id, roadmap_id).await?;

        let nodes = self.state.list_nodes(roadmap_id).await?;
        if nodes.is_empty() {
            return Err(AppError::Validation(format!("roadmap {} has no nodes", roadmap_id)));
        }

        let (gateway, prompts) = self
            .analysis
            .as_ref()
            .ok_or_else(|| AppError::internal("check-in analysis needs a model client"))?;
        let system = prompts
            .render(CHECKIN_PROMPT, &serde_json::json!({}))
            .map_err(AppError::internal)?;
        let human = format!(
            "User's check-in: \"{}\"\n\nAvailable nodes:\n{}",
            user_input,
            node_context(&nodes)
        );
        let text = gateway.complete(&system, vec![Message::user(human)], CHECKIN_TAG).await?;
        let proposed = proposals_from(&text, &nodes);

        let checkin = CheckIn::new(roadmap_id, user_input, proposed);
        let response = AnalyzeResponse {
            checkin_id: checkin.id.clone(),
            proposed_updates: checkin.proposed_updates.clone(),
        };
        self.state.create_checkin(checkin).await?;
        info!(checkin_id = %response.checkin_id, proposed = response.proposed_updates.len(), "Check-in analyzed");
        Ok(response)
    }

    /// Apply the proposal, or `custom` when it is not empty, and confirm
    ///
    /// Updates naming nodes that no longer exist are skipped.
    pub async fn confirm(
        &self,
        user_id: &str,
        checkin_id: &str,
        custom: Vec<ProposedUpdate>,
    ) -> Result<ConfirmResponse, AppError> {
        debug!(%user_id, %checkin_id, custom = custom.len(), "CheckInService::confirm: called");
        let mut checkin = self.owned_checkin(user_id, checkin_id).await?;
        if checkin.status.is_terminal() {
            return Err(AppError::Conflict(format!("check-in {} is already {}", checkin_id, checkin.status)));
        }
        let updates = if custom.is_empty() {
            checkin.proposed_updates.clone()
        } else {
            custom
        };

        let mut nodes: HashMap<String, Node> = self
            .state
            .list_nodes(&checkin.roadmap_id)
            .await?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        let mut applied = Vec::with_capacity(updates.len());
        let mut updated_nodes: Vec<String> = Vec::new();
        for update in updates {
            let Some(node) = nodes.get_mut(&update.node_id) else {
                warn!(node_id = %update.node_id, %checkin_id, "Check-in update names an unknown node, skipping");
                continue;
            };
            let (previous_progress, new_progress) = node.apply_progress_delta(update.progress_delta);
            if !updated_nodes.contains(&update.node_id) {
                updated_nodes.push(update.node_id.clone());
            }
            applied.push(AppliedUpdate {
                node_id: update.node_id,
                progress_delta: update.progress_delta,
                log_entry: update.log_entry,
                previous_progress,
                new_progress,
            });
        }

        checkin.confirm(applied)?;
        let changed: Vec<Node> = updated_nodes.iter().filter_map(|id| nodes.remove(id)).collect();
        self.state.apply_checkin(checkin, changed).await?;
        info!(%checkin_id, updated = updated_nodes.len(), "Check-in confirmed");
        Ok(ConfirmResponse {
            success: true,
            updated_nodes,
        })
    }

    pub async fn reject(&self, user_id: &str, checkin_id: &str) -> Result<RejectResponse, AppError> {
        debug!(%user_id, %checkin_id, "CheckInService::reject: called");
        let mut checkin = self.owned_checkin(user_id, checkin_id).await?;
        checkin.reject()?;
        self.state.apply_checkin(checkin, Vec::new()).await?;
        info!(%checkin_id, "Check-in rejected");
        Ok(RejectResponse { success: true })
    }

    /// Check-ins of a roadmap, newest first
    pub async fn list(&self, user_id: &str, roadmap_id: &str) -> Result<Vec<CheckIn>, AppError> {
        debug!(%user_id, %roadmap_id, "CheckInService::list: called");
        self.owned_roadmap(user_id, roadmap_id).await?;
        Ok(self.state.list_checkins(roadmap_id).await?)
    }

    pub async fn get(&self, user_id: &str, checkin_id: &str) -> Result<CheckIn, AppError> {
        self.owned_checkin(user_id, checkin_id).await
    }
}
