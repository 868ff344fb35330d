//! Domain types for GoalMap
//!
//! Blueprint (goal readiness record), Conversation and its Messages, Roadmap
//! with its arena of GoalNodes, and CheckIn. Persistent types implement the
//! Record trait for GoalStore.

mod blueprint;
mod checkin;
mod conversation;
mod id;
mod node;
mod roadmap;

pub use blueprint::{
    Blueprint, BlueprintField, BlueprintRecord, BlueprintUpdate, FieldScores, NOT_SET, Uncertainty, UncertaintyKind,
};
pub use checkin::{AppliedUpdate, CheckIn, CheckInStatus, ProposedUpdate};
pub use conversation::{ChatMessage, Conversation, ConversationView, HistoryEntry, MessageRole};
pub use id::generate_id;
pub use node::{GoalTree, MilestoneView, Node, NodeContent, NodeStatus, NodeType};
pub use roadmap::{GoalContext, Roadmap, RoadmapStatus, TransitionError};

// Re-export goalstore types for convenience
pub use goalstore::{Filter, FilterOp, IndexValue, Record, Store, now_ms};
