//! GoalMap - conversational goal discovery and roadmap planning
//!
//! A Discovery chat fills a goal Blueprint turn by turn while streaming its
//! replies. A finished Blueprint is planned into a Roadmap of milestones,
//! reviewed as a draft, and then given actions. Check-ins map free-text
//! progress reports onto the roadmap's nodes.
//!
//! # Modules
//!
//! - [`discovery`] - Blueprint extraction, reply streaming, turn orchestration
//! - [`roadmap`] - Skeleton and action planning with the draft review flow
//! - [`checkin`] - Progress check-ins
//! - [`sse`] - Server-sent event framing for streamed operations
//! - [`state`] - StateManager actor over GoalStore
//! - [`llm`] - LLM client trait, Gemini and Anthropic clients, gateway
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod app;
pub mod checkin;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod llm;
pub mod prompts;
pub mod repl;
pub mod roadmap;
pub mod sse;
pub mod state;

pub use app::App;
pub use config::Config;
pub use error::AppError;
