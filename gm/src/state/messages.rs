//! State manager messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Blueprint, ChatMessage, CheckIn, Conversation, MessageRole, Node, Roadmap};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Conversation operations
    CreateConversation {
        conversation: Conversation,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    GetConversation {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Conversation>>>,
    },
    ListConversations {
        user_id: String,
        reply: oneshot::Sender<StateResponse<Vec<Conversation>>>,
    },
    /// Cascades messages and blueprint; unlinks roadmaps
    DeleteConversation {
        id: String,
        reply: oneshot::Sender<StateResponse<bool>>,
    },

    // Message operations
    AppendMessage {
        conversation_id: String,
        role: MessageRole,
        content: String,
        reply: oneshot::Sender<StateResponse<ChatMessage>>,
    },
    ListMessages {
        conversation_id: String,
        reply: oneshot::Sender<StateResponse<Vec<ChatMessage>>>,
    },

    // Blueprint operations
    GetBlueprint {
        conversation_id: String,
        reply: oneshot::Sender<StateResponse<Option<Blueprint>>>,
    },
    UpdateBlueprint {
        conversation_id: String,
        blueprint: Blueprint,
        reply: oneshot::Sender<StateResponse<()>>,
    },

    // Roadmap operations
    /// Upsert the roadmap and replace all of its nodes
    SaveSkeleton {
        roadmap: Roadmap,
        nodes: Vec<Node>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    /// Replace every non-goal node of a draft roadmap
    UpdateMilestones {
        roadmap_id: String,
        milestones: Vec<Node>,
        reply: oneshot::Sender<StateResponse<Roadmap>>,
    },
    /// Persist actions and move the roadmap from draft to active
    AddActions {
        roadmap_id: String,
        actions: Vec<Node>,
        reply: oneshot::Sender<StateResponse<Roadmap>>,
    },
    GetRoadmap {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Roadmap>>>,
    },
    GetRoadmapByConversation {
        conversation_id: String,
        reply: oneshot::Sender<StateResponse<Option<Roadmap>>>,
    },
    ListRoadmaps {
        user_id: String,
        reply: oneshot::Sender<StateResponse<Vec<Roadmap>>>,
    },
    ListNodes {
        roadmap_id: String,
        reply: oneshot::Sender<StateResponse<Vec<Node>>>,
    },
    DeleteRoadmap {
        id: String,
        reply: oneshot::Sender<StateResponse<bool>>,
    },

    // CheckIn operations
    CreateCheckIn {
        checkin: CheckIn,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    GetCheckIn {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<CheckIn>>>,
    },
    ListCheckIns {
        roadmap_id: String,
        reply: oneshot::Sender<StateResponse<Vec<CheckIn>>>,
    },
    /// Write the resolved check-in and its node updates together
    ApplyCheckIn {
        checkin: CheckIn,
        nodes: Vec<Node>,
        reply: oneshot::Sender<StateResponse<()>>,
    },

    // Shutdown
    Shutdown,
}
