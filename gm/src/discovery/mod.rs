//! Discovery: the goal-readiness chat
//!
//! Each user turn is analyzed into the conversation's Blueprint, then the
//! coaching reply is streamed back with the updated Blueprint in view.

mod analyzer;
mod conversations;
mod extractor;
pub mod merger;
mod pipeline;
mod responder;

pub use analyzer::BlueprintAnalyzer;
pub use conversations::ConversationService;
pub(crate) use conversations::{owned_conversation, require_user};
pub use extractor::{ExtractError, ResponseExtractor};
pub use merger::BlueprintPatch;
pub use pipeline::{DiscoveryPipeline, PipelineEvent, TurnOutcome, TurnRequest, TurnState};
pub use responder::{ResponseStreamer, TurnFlags};
