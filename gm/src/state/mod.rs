//! State management with actor pattern
//!
//! StateManager owns the GoalStore and processes messages via channels,
//! providing thread-safe access to persistent state. Multi-record writes run
//! in one store transaction.

mod manager;
mod messages;

pub use manager::StateManager;
pub use messages::{StateCommand, StateError, StateResponse};
