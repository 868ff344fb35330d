//! Roadmap planning
//!
//! `Planner` makes the model calls; `RoadmapService` owns the draft review
//! flow and persistence.

mod planner;
mod service;

pub use planner::{Planner, Skeleton};
pub use service::{MilestoneEdit, RoadmapEvent, RoadmapService};
