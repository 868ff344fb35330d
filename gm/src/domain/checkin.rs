//! CheckIn domain type

use goalstore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use super::id::generate_id;
use super::roadmap::TransitionError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckInStatus {
    #[default]
    Pending,
    Confirmed,
    Rejected,
}

impl CheckInStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckInStatus::Pending => "pending",
            CheckInStatus::Confirmed => "confirmed",
            CheckInStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CheckInStatus::Pending)
    }
}

impl fmt::Display for CheckInStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A progress change suggested by analysis or edited by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedUpdate {
    pub node_id: String,
    pub progress_delta: i32,
    #[serde(default)]
    pub log_entry: String,
}

impl ProposedUpdate {
    pub fn new(node_id: impl Into<String>, progress_delta: i32, log_entry: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            progress_delta,
            log_entry: log_entry.into(),
        }
    }
}

/// An update as it was applied, with the progress before and after
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedUpdate {
    pub node_id: String,
    pub progress_delta: i32,
    pub log_entry: String,
    pub previous_progress: u8,
    pub new_progress: u8,
}

/// A natural-language progress report and its proposed node changes
///
/// Created pending; confirmed or rejected exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckIn {
    pub id: String,
    pub roadmap_id: String,
    pub user_input: String,
    pub proposed_updates: Vec<ProposedUpdate>,
    pub confirmed_updates: Option<Vec<AppliedUpdate>>,
    pub status: CheckInStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CheckIn {
    pub fn new(roadmap_id: impl Into<String>, user_input: impl Into<String>, proposed_updates: Vec<ProposedUpdate>) -> Self {
        let roadmap_id = roadmap_id.into();
        debug!(%roadmap_id, proposed = proposed_updates.len(), "CheckIn::new: called");
        let now = now_ms();
        Self {
            id: generate_id("ci"),
            roadmap_id,
            user_input: user_input.into(),
            proposed_updates,
            confirmed_updates: None,
            status: CheckInStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    fn finish(&mut self, next: CheckInStatus) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            debug!(id = %self.id, status = %self.status, "CheckIn::finish: already terminal");
            return Err(TransitionError {
                entity: "check-in",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now_ms();
        Ok(())
    }

    /// Record the applied updates and mark confirmed
    pub fn confirm(&mut self, applied: Vec<AppliedUpdate>) -> Result<(), TransitionError> {
        debug!(id = %self.id, applied = applied.len(), "CheckIn::confirm: called");
        self.finish(CheckInStatus::Confirmed)?;
        self.confirmed_updates = Some(applied);
        Ok(())
    }

    pub fn reject(&mut self) -> Result<(), TransitionError> {
        debug!(id = %self.id, "CheckIn::reject: called");
        self.finish(CheckInStatus::Rejected)
    }
}

impl Record for CheckIn {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "checkins"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("roadmap_id".to_string(), IndexValue::String(self.roadmap_id.clone()));
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_once() {
        let mut checkin = CheckIn::new("rm-1", "did stuff", vec![ProposedUpdate::new("n1", 10, "x")]);
        assert!(checkin.id.starts_with("ci-"));

        checkin.confirm(vec![]).unwrap();
        assert_eq!(checkin.status, CheckInStatus::Confirmed);
        assert_eq!(checkin.confirmed_updates, Some(vec![]));

        let err = checkin.confirm(vec![]).unwrap_err();
        assert_eq!(err.from, "confirmed");
        assert!(checkin.reject().is_err());
    }

    #[test]
    fn test_reject_then_confirm_fails() {
        let mut checkin = CheckIn::new("rm-1", "nothing", vec![]);
        checkin.reject().unwrap();
        assert_eq!(checkin.status, CheckInStatus::Rejected);
        assert!(checkin.confirm(vec![]).is_err());
        assert!(checkin.confirmed_updates.is_none());
    }

    #[test]
    fn test_proposed_update_log_entry_defaults() {
        let update: ProposedUpdate = serde_json::from_str(r#"{"node_id": "n1", "progress_delta": 5}"#).unwrap();
        assert_eq!(update.log_entry, "");
    }
}
