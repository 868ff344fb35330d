//! Progress check-ins
//!
//! A free-text report is mapped to proposed node progress deltas, which the
//! user then confirms or rejects.

mod service;

pub use service::{AnalyzeResponse, CheckInService, ConfirmResponse, RejectResponse};
