//! Roadmap domain type

use goalstore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use super::blueprint::Blueprint;
use super::id::generate_id;

/// A status change the entity does not allow
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{entity} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub to: String,
}

/// Roadmap lifecycle
///
/// Draft -> Active happens once, when actions are persisted. Nothing ever
/// returns to Draft.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoadmapStatus {
    #[default]
    Draft,
    Active,
    Completed,
    Archived,
}

impl RoadmapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoadmapStatus::Draft => "draft",
            RoadmapStatus::Active => "active",
            RoadmapStatus::Completed => "completed",
            RoadmapStatus::Archived => "archived",
        }
    }

    pub fn can_transition_to(&self, next: RoadmapStatus) -> bool {
        use RoadmapStatus::*;
        matches!(
            (self, next),
            (Draft, Active) | (Draft, Archived) | (Active, Completed) | (Active, Archived) | (Completed, Archived)
        )
    }
}

impl fmt::Display for RoadmapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the planner knows about the goal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalContext {
    pub goal: String,
    pub why: Option<String>,
    pub timeline: Option<String>,
    pub obstacles: Option<String>,
    pub resources: Option<String>,
}

impl GoalContext {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Default::default()
        }
    }

    /// Context from a blueprint; `None` if it has no goal yet
    pub fn from_blueprint(blueprint: &Blueprint) -> Option<Self> {
        let goal = blueprint.goal.as_deref().map(str::trim).filter(|g| !g.is_empty())?;
        Some(Self {
            goal: goal.to_string(),
            why: blueprint.why.clone(),
            timeline: blueprint.timeline.clone(),
            obstacles: blueprint.obstacles.clone(),
            resources: blueprint.resources.clone(),
        })
    }

    /// Line-per-field summary for prompts
    pub fn render(&self) -> String {
        let fields = [
            ("Why", self.why.as_deref()),
            ("Timeline", self.timeline.as_deref()),
            ("Obstacles", self.obstacles.as_deref()),
            ("Resources", self.resources.as_deref()),
        ];
        let lines: Vec<String> = fields
            .iter()
            .filter_map(|(label, value)| value.map(|v| format!("{}: {}", label, v)))
            .collect();

        if lines.is_empty() {
            "No additional context".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// A user's plan for one goal; owns a tree of nodes stored separately
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roadmap {
    pub id: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub title: String,
    pub status: RoadmapStatus,
    pub context: GoalContext,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Roadmap {
    pub fn new(user_id: impl Into<String>, conversation_id: Option<String>, context: GoalContext) -> Self {
        let user_id = user_id.into();
        debug!(%user_id, ?conversation_id, goal = %context.goal, "Roadmap::new: called");
        let now = now_ms();
        Self {
            id: generate_id("rm"),
            user_id,
            conversation_id,
            title: context.goal.clone(),
            status: RoadmapStatus::Draft,
            context,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn is_draft(&self) -> bool {
        self.status == RoadmapStatus::Draft
    }

    /// Move to `next` if the lifecycle allows it
    pub fn transition_to(&mut self, next: RoadmapStatus) -> Result<(), TransitionError> {
        debug!(id = %self.id, from = %self.status, to = %next, "Roadmap::transition_to: called");
        if !self.status.can_transition_to(next) {
            debug!("Roadmap::transition_to: rejected");
            return Err(TransitionError {
                entity: "roadmap",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now_ms();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}

impl Record for Roadmap {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "roadmaps"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("user_id".to_string(), IndexValue::String(self.user_id.clone()));
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        if let Some(ref conversation_id) = self.conversation_id {
            fields.insert(
                "conversation_id".to_string(),
                IndexValue::String(conversation_id.clone()),
            );
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_to_active_is_one_way() {
        let mut roadmap = Roadmap::new("alice", None, GoalContext::new("Learn piano"));
        assert!(roadmap.is_draft());

        roadmap.transition_to(RoadmapStatus::Active).unwrap();
        assert_eq!(roadmap.status, RoadmapStatus::Active);

        let err = roadmap.transition_to(RoadmapStatus::Draft).unwrap_err();
        assert_eq!(err.from, "active");
        assert_eq!(err.to, "draft");
        assert_eq!(roadmap.status, RoadmapStatus::Active);
    }

    #[test]
    fn test_no_status_returns_to_draft() {
        for status in [
            RoadmapStatus::Draft,
            RoadmapStatus::Active,
            RoadmapStatus::Completed,
            RoadmapStatus::Archived,
        ] {
            assert!(!status.can_transition_to(RoadmapStatus::Draft));
        }
    }

    #[test]
    fn test_context_from_blueprint_requires_goal() {
        let mut bp = Blueprint::default();
        assert!(GoalContext::from_blueprint(&bp).is_none());

        bp.goal = Some("  Become a backend engineer ".to_string());
        bp.timeline = Some("6 months".to_string());
        let ctx = GoalContext::from_blueprint(&bp).unwrap();
        assert_eq!(ctx.goal, "Become a backend engineer");
        assert_eq!(ctx.render(), "Timeline: 6 months");
    }

    #[test]
    fn test_indexes_include_conversation_when_linked() {
        let roadmap = Roadmap::new("alice", Some("conv-1".to_string()), GoalContext::new("x"));
        let fields = roadmap.indexed_fields();
        assert_eq!(fields.get("status"), Some(&IndexValue::String("draft".to_string())));
        assert!(fields.contains_key("conversation_id"));

        let unlinked = Roadmap::new("alice", None, GoalContext::new("x"));
        assert!(!unlinked.indexed_fields().contains_key("conversation_id"));
    }
}
