//! Server-sent event framing
//!
//! Every streamed operation reports through [`SseEvent`], written as
//! `event: <name>\ndata: <json>\n\n`. An `error` event is terminal.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::discovery::PipelineEvent;
use crate::domain::{BlueprintUpdate, GoalTree, Node};
use crate::error::ErrorBody;
use crate::roadmap::RoadmapEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SseEvent {
    Status {
        message: String,
        node: String,
    },
    Token {
        text: String,
        run_id: String,
    },
    BlueprintUpdate(BlueprintUpdate),
    RoadmapSkeleton {
        goal: GoalTree,
        roadmap_id: String,
    },
    /// `milestone_id` is null for goal-level actions
    RoadmapActions {
        milestone_id: Option<String>,
        actions: Vec<Node>,
    },
    RoadmapComplete {
        roadmap_id: String,
    },
    Error(ErrorBody),
}

impl SseEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SseEvent::Status { .. } => "status",
            SseEvent::Token { .. } => "token",
            SseEvent::BlueprintUpdate(_) => "blueprint_update",
            SseEvent::RoadmapSkeleton { .. } => "roadmap_skeleton",
            SseEvent::RoadmapActions { .. } => "roadmap_actions",
            SseEvent::RoadmapComplete { .. } => "roadmap_complete",
            SseEvent::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SseEvent::Error(_))
    }

    /// The `data` payload alone
    pub fn data(&self) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        Ok(value.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }

    /// One SSE frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let data = serde_json::to_string(&self.data()?)?;
        Ok(format!("event: {}\ndata: {}\n\n", self.name(), data))
    }
}

impl From<PipelineEvent> for SseEvent {
    fn from(event: PipelineEvent) -> Self {
        match event {
            PipelineEvent::Status { message, node } => SseEvent::Status { message, node },
            PipelineEvent::Token { text, run_id } => SseEvent::Token { text, run_id },
            PipelineEvent::BlueprintUpdate(update) => SseEvent::BlueprintUpdate(update),
            PipelineEvent::Error(body) => SseEvent::Error(body),
        }
    }
}

impl From<RoadmapEvent> for SseEvent {
    fn from(event: RoadmapEvent) -> Self {
        match event {
            RoadmapEvent::Skeleton(goal) => SseEvent::RoadmapSkeleton {
                roadmap_id: goal.roadmap_id().to_string(),
                goal,
            },
            RoadmapEvent::Actions { milestone_id, actions } => SseEvent::RoadmapActions { milestone_id, actions },
            RoadmapEvent::Complete { roadmap_id } => SseEvent::RoadmapComplete { roadmap_id },
        }
    }
}

/// Frames events for one stream; nothing is written after an error
#[derive(Debug, Default)]
pub struct SseEncoder {
    closed: bool,
}

impl SseEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` once the stream has been closed by an error
    pub fn encode(&mut self, event: &SseEvent) -> Result<Option<String>, serde_json::Error> {
        if self.closed {
            debug!(event = event.name(), "SseEncoder::encode: stream closed, dropping");
            return Ok(None);
        }
        let frame = event.encode()?;
        self.closed = event.is_terminal();
        Ok(Some(frame))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NodeContent;

    fn skeleton() -> GoalTree {
        let goal = Node::goal("rm-1", NodeContent::new("Run"));
        let ms = Node::milestone("rm-1", &goal.id, 0, NodeContent::new("10k"));
        GoalTree::from_nodes(vec![goal, ms]).unwrap()
    }

    #[test]
    fn test_token_frame_format() {
        let ev = SseEvent::Token {
            text: "안녕\n".to_string(),
            run_id: "r1".to_string(),
        };
        let frame = ev.encode().unwrap();
        let body = frame
            .strip_prefix("event: token\ndata: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .unwrap();
        assert!(!body.contains('\n'));
        let data: Value = serde_json::from_str(body).unwrap();
        assert_eq!(data["text"], "안녕\n");
        assert_eq!(data["run_id"], "r1");
    }

    #[test]
    fn test_blueprint_update_carries_only_changes() {
        let update = BlueprintUpdate {
            goal: Some("Run".to_string()),
            ..Default::default()
        };
        let frame = SseEvent::BlueprintUpdate(update).encode().unwrap();
        assert_eq!(frame, "event: blueprint_update\ndata: {\"goal\":\"Run\"}\n\n");
    }

    #[test]
    fn test_direct_actions_use_null_milestone() {
        let goal = skeleton();
        let direct = Node::action("rm-1", &goal.node.id, 0, NodeContent::new("Stretch daily"));
        let event = SseEvent::from(RoadmapEvent::Actions {
            milestone_id: None,
            actions: vec![direct],
        });
        assert_eq!(event.name(), "roadmap_actions");
        let data = event.data().unwrap();
        assert!(data["milestone_id"].is_null());
        assert_eq!(data["actions"][0]["label"], "Stretch daily");
    }

    #[test]
    fn test_skeleton_event_carries_roadmap_id() {
        let event = SseEvent::from(RoadmapEvent::Skeleton(skeleton()));
        let data = event.data().unwrap();
        assert_eq!(data["roadmap_id"], "rm-1");
        assert_eq!(data["goal"]["type"], "goal");
        assert!(data["goal"]["milestones"][0]["actions"].as_array().unwrap().is_empty());

        let done = SseEvent::from(RoadmapEvent::Complete {
            roadmap_id: "rm-1".to_string(),
        });
        assert_eq!(done.encode().unwrap(), "event: roadmap_complete\ndata: {\"roadmap_id\":\"rm-1\"}\n\n");
    }

    #[test]
    fn test_encoder_stops_after_error() {
        let mut encoder = SseEncoder::new();
        let err = SseEvent::Error(ErrorBody {
            code: "llm_error".to_string(),
            message: "try again".to_string(),
        });
        assert!(encoder.encode(&err).unwrap().is_some());
        assert!(encoder.is_closed());
        let late = SseEvent::RoadmapComplete {
            roadmap_id: "rm-1".to_string(),
        };
        assert!(encoder.encode(&late).unwrap().is_none());
    }
}
