//! Discovery turn orchestrator
//!
//! One user turn runs RECEIVED -> ANALYZING -> RESPONDING -> DONE, or ends in
//! FAILED. The Blueprint is analyzed before the reply is generated so the
//! next question reflects the latest extraction. Progress is reported as
//! [`PipelineEvent`]s on a channel; a closed channel means the client left.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::analyzer::{ANALYSIS_TAG, BlueprintAnalyzer};
use super::conversations::owned_conversation;
use super::responder::{CHAT_TAG, ResponseStreamer};
use crate::config::DiscoveryConfig;
use crate::domain::{Blueprint, BlueprintUpdate, Conversation, HistoryEntry, MessageRole};
use crate::error::{AppError, ErrorBody};
use crate::state::StateManager;

const TOKEN_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnState {
    Received,
    Analyzing,
    Responding,
    Done,
    Failed,
}

/// What a turn reports while it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Status { message: String, node: String },
    Token { text: String, run_id: String },
    BlueprintUpdate(BlueprintUpdate),
    Error(ErrorBody),
}

impl PipelineEvent {
    fn status(message: &str, node: &str) -> Self {
        PipelineEvent::Status {
            message: message.to_string(),
            node: node.to_string(),
        }
    }
}

/// One user message and whatever the caller knows about its conversation
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub conversation_id: Option<String>,
    /// `None` for anonymous sessions, which are never persisted
    pub user_id: Option<String>,
    pub message: String,
    /// Prior turns; used only when the conversation is not persisted
    pub history: Vec<HistoryEntry>,
    /// Blueprint to start from when none is stored
    pub current_blueprint: Option<Blueprint>,
}

#[derive(Debug)]
pub struct TurnOutcome {
    pub state: TurnState,
    pub conversation_id: Option<String>,
    pub blueprint: Blueprint,
    pub reply: String,
    /// Set when the turn failed for a reason the client was told about
    pub error: Option<AppError>,
}

/// Where a turn's state lives
struct TurnContext {
    conversation_id: Option<String>,
    persist: bool,
    history: Vec<HistoryEntry>,
    blueprint: Blueprint,
}

impl TurnContext {
    /// The conversation to write to, if this turn is persisted
    fn persisted_id(&self) -> Option<&str> {
        self.conversation_id.as_deref().filter(|_| self.persist)
    }
}

#[derive(Clone)]
pub struct DiscoveryPipeline {
    state: StateManager,
    analyzer: BlueprintAnalyzer,
    responder: ResponseStreamer,
    config: DiscoveryConfig,
}

impl DiscoveryPipeline {
    pub fn new(state: StateManager, analyzer: BlueprintAnalyzer, responder: ResponseStreamer, config: DiscoveryConfig) -> Self {
        debug!(threshold = config.readiness_threshold, persist = config.persist, "DiscoveryPipeline::new: called");
        Self {
            state,
            analyzer,
            responder,
            config,
        }
    }

    /// Run one turn, reporting progress on `events`
    pub async fn run(&self, request: TurnRequest, events: mpsc::Sender<PipelineEvent>) -> TurnOutcome {
        debug!(
            conversation_id = ?request.conversation_id,
            user_id = ?request.user_id,
            message_len = request.message.len(),
            "DiscoveryPipeline::run: called"
        );
        let mut outcome = TurnOutcome {
            state: TurnState::Received,
            conversation_id: request.conversation_id.clone(),
            blueprint: request.current_blueprint.clone().unwrap_or_default(),
            reply: String::new(),
            error: None,
        };

        if request.message.trim().is_empty() {
            return fail(outcome, AppError::Validation("message is empty".to_string()), &events).await;
        }

        let mut ctx = match self.resolve(&request).await {
            Ok(ctx) => ctx,
            Err(e) => return fail(outcome, e, &events).await,
        };
        outcome.conversation_id = ctx.conversation_id.clone();

        // The user message is stored before any model call
        ctx.history.push(HistoryEntry::user(request.message.as_str()));
        if let Some(id) = ctx.persisted_id()
            && let Err(e) = self.state.append_message(id, MessageRole::User, request.message.as_str()).await
        {
            warn!(conversation_id = %id, error = %e, "DiscoveryPipeline::run: failed to persist user message");
        }

        outcome.state = TurnState::Analyzing;
        debug!(state = ?outcome.state, "DiscoveryPipeline::run: transition");
        if !send(&events, PipelineEvent::status("Analyzing your goal", ANALYSIS_TAG)).await {
            return disconnected(outcome);
        }
        let updated = self.analyzer.analyze(&ctx.history, &ctx.blueprint).await;
        let diff = BlueprintUpdate::between(&ctx.blueprint, &updated);
        if !diff.is_empty() && !send(&events, PipelineEvent::BlueprintUpdate(diff)).await {
            outcome.blueprint = updated;
            return disconnected(outcome);
        }
        if let Some(id) = ctx.persisted_id()
            && let Err(e) = self.state.update_blueprint(id, updated.clone()).await
        {
            warn!(conversation_id = %id, error = %e, "DiscoveryPipeline::run: failed to persist blueprint");
        }
        outcome.blueprint = updated;

        let missing = outcome.blueprint.missing_fields(self.config.readiness_threshold);

        outcome.state = TurnState::Responding;
        debug!(state = ?outcome.state, "DiscoveryPipeline::run: transition");
        if !send(&events, PipelineEvent::status("Generating response", CHAT_TAG)).await {
            return disconnected(outcome);
        }

        let run_id = Uuid::now_v7().to_string();
        let (token_tx, mut token_rx) = mpsc::channel::<String>(TOKEN_BUFFER);
        let relay_events = &events;
        // Owns the receiver so a disconnect closes the channel and stops generation
        let relay = async move {
            let mut connected = true;
            while let Some(text) = token_rx.recv().await {
                let token = PipelineEvent::Token {
                    text,
                    run_id: run_id.clone(),
                };
                if !send(relay_events, token).await {
                    connected = false;
                    break;
                }
            }
            connected
        };
        let generate = self.responder.stream(&ctx.history, &outcome.blueprint, &missing, token_tx);
        let (result, connected) = tokio::join!(generate, relay);

        if !connected {
            return disconnected(outcome);
        }
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => return fail(outcome, AppError::Upstream(e), &events).await,
        };

        if let Some(id) = ctx.persisted_id()
            && let Err(e) = self.state.append_message(id, MessageRole::Assistant, reply.as_str()).await
        {
            warn!(conversation_id = %id, error = %e, "DiscoveryPipeline::run: failed to persist reply");
        }

        outcome.reply = reply;
        outcome.state = TurnState::Done;
        info!(conversation_id = ?outcome.conversation_id, reply_len = outcome.reply.len(), "Discovery turn done");
        outcome
    }

    /// Pick stored or request-supplied state for this turn
    async fn resolve(&self, request: &TurnRequest) -> Result<TurnContext, AppError> {
        let fallback = request.current_blueprint.clone().unwrap_or_default();
        let user_id = request
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty() && self.config.persist);

        let Some(user_id) = user_id else {
            debug!("DiscoveryPipeline::resolve: stateless turn");
            return Ok(TurnContext {
                conversation_id: request.conversation_id.clone(),
                persist: false,
                history: request.history.clone(),
                blueprint: fallback,
            });
        };

        match request.conversation_id.as_deref() {
            Some(id) => {
                let conversation = owned_conversation(&self.state, user_id, id).await?;
                let history = self
                    .state
                    .list_messages(&conversation.id)
                    .await?
                    .iter()
                    .map(|m| m.to_history())
                    .collect();
                let blueprint = self.state.get_blueprint(&conversation.id).await?.unwrap_or(fallback);
                debug!(%id, "DiscoveryPipeline::resolve: resumed conversation");
                Ok(TurnContext {
                    conversation_id: Some(conversation.id),
                    persist: true,
                    history,
                    blueprint,
                })
            }
            None => {
                let conversation = Conversation::new(user_id, Conversation::title_from_message(&request.message));
                let id = self.state.create_conversation(conversation).await?;
                info!(%id, %user_id, "Conversation created for first turn");
                Ok(TurnContext {
                    conversation_id: Some(id),
                    persist: true,
                    history: request.history.clone(),
                    blueprint: fallback,
                })
            }
        }
    }
}

async fn send(events: &mpsc::Sender<PipelineEvent>, event: PipelineEvent) -> bool {
    let ok = events.send(event).await.is_ok();
    if !ok {
        debug!("send: event receiver dropped");
    }
    ok
}

async fn fail(mut outcome: TurnOutcome, error: AppError, events: &mpsc::Sender<PipelineEvent>) -> TurnOutcome {
    warn!(error = %error, state = ?outcome.state, "Discovery turn failed");
    send(events, PipelineEvent::Error(error.body())).await;
    outcome.state = TurnState::Failed;
    outcome.error = Some(error);
    outcome
}

fn disconnected(mut outcome: TurnOutcome) -> TurnOutcome {
    info!(state = ?outcome.state, "Client disconnected, abandoning turn");
    outcome.state = TurnState::Failed;
    outcome
}
