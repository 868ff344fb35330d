//! ConversationService: user-scoped conversation access

use tracing::{debug, info};

use crate::domain::{Conversation, ConversationView};
use crate::error::AppError;
use crate::state::StateManager;

/// Reject blank user ids before touching the store
pub(crate) fn require_user(user_id: &str) -> Result<&str, AppError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        debug!("require_user: anonymous caller");
        return Err(AppError::Unauthorized);
    }
    Ok(user_id)
}

/// Load a conversation, checking that `user_id` owns it
pub(crate) async fn owned_conversation(state: &StateManager, user_id: &str, id: &str) -> Result<Conversation, AppError> {
    debug!(%user_id, %id, "owned_conversation: called");
    let conversation = state
        .get_conversation(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Conversation {}", id)))?;
    if !conversation.is_owned_by(user_id) {
        debug!(%user_id, owner = %conversation.user_id, "owned_conversation: ownership mismatch");
        return Err(AppError::Forbidden(format!("conversation {}", id)));
    }
    Ok(conversation)
}

#[derive(Clone)]
pub struct ConversationService {
    state: StateManager,
}

impl ConversationService {
    pub fn new(state: StateManager) -> Self {
        Self { state }
    }

    pub async fn create(&self, user_id: &str, title: Option<String>) -> Result<Conversation, AppError> {
        debug!(%user_id, ?title, "ConversationService::create: called");
        let user_id = require_user(user_id)?;
        let title = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        let conversation = Conversation::new(user_id, title);
        self.state.create_conversation(conversation.clone()).await?;
        info!(id = %conversation.id, %user_id, "Conversation created");
        Ok(conversation)
    }

    /// Conversations of `user_id`, most recently active first
    pub async fn list(&self, user_id: &str) -> Result<Vec<Conversation>, AppError> {
        debug!(%user_id, "ConversationService::list: called");
        let user_id = require_user(user_id)?;
        Ok(self.state.list_conversations(user_id).await?)
    }

    pub async fn get(&self, user_id: &str, id: &str) -> Result<ConversationView, AppError> {
        debug!(%user_id, %id, "ConversationService::get: called");
        let user_id = require_user(user_id)?;
        let conversation = owned_conversation(&self.state, user_id, id).await?;
        let messages = self.state.list_messages(id).await?;
        let blueprint = self.state.get_blueprint(id).await?.unwrap_or_default();
        Ok(ConversationView {
            conversation,
            messages,
            blueprint,
        })
    }

    /// Delete a conversation with its messages and blueprint
    pub async fn delete(&self, user_id: &str, id: &str) -> Result<(), AppError> {
        debug!(%user_id, %id, "ConversationService::delete: called");
        let user_id = require_user(user_id)?;
        owned_conversation(&self.state, user_id, id).await?;
        if !self.state.delete_conversation(id).await? {
            return Err(AppError::not_found(format!("Conversation {}", id)));
        }
        info!(%id, "Conversation deleted");
        Ok(())
    }
}
