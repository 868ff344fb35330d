//! Roadmap planner: the model calls behind skeletons and actions
//!
//! The model only writes node content. Identifiers and parent links are
//! assigned by the caller after the structure has been validated.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RoadmapConfig;
use crate::domain::{GoalContext, Node, NodeContent};
use crate::error::AppError;
use crate::llm::{LlmError, LlmGateway, Message, parse_json_output};
use crate::prompts::PromptLoader;

const MIN_MILESTONES: usize = 3;
const MIN_ACTIONS: usize = 3;

const SKELETON_TAG: &str = "roadmap_skeleton";
const ACTIONS_TAG: &str = "roadmap_actions";
const DIRECT_ACTIONS_TAG: &str = "roadmap_direct_actions";

/// Goal content and its ordered milestones, without identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skeleton {
    pub goal: NodeContent,
    pub milestones: Vec<NodeContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawNode {
    label: String,
    details: Option<String>,
    is_assumed: bool,
    start_date: Option<String>,
    end_date: Option<String>,
    completion_criteria: Option<String>,
}

impl RawNode {
    /// `None` when the model left the label blank
    fn into_content(self) -> Option<NodeContent> {
        let label = self.label.trim().to_string();
        if label.is_empty() {
            return None;
        }
        Some(NodeContent {
            label,
            details: non_blank(self.details),
            is_assumed: self.is_assumed,
            start_date: self.start_date.as_deref().and_then(parse_date),
            end_date: self.end_date.as_deref().and_then(parse_date),
            completion_criteria: non_blank(self.completion_criteria),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawGoal {
    label: String,
    details: Option<String>,
    milestones: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawSkeleton {
    goal: RawGoal,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawActions {
    actions: Vec<RawNode>,
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

#[derive(Debug, Serialize)]
struct SkeletonVars<'a> {
    goal: &'a str,
    context: String,
    min_milestones: usize,
    max_milestones: usize,
}

#[derive(Debug, Serialize)]
struct ActionVars<'a> {
    goal: &'a str,
    milestone_label: &'a str,
    milestone_details: &'a str,
    context: String,
    min_actions: usize,
    max_actions: usize,
}

#[derive(Debug, Serialize)]
struct DirectActionVars<'a> {
    goal: &'a str,
    context: String,
    milestones: String,
    max_actions: usize,
}

#[derive(Clone)]
pub struct Planner {
    gateway: LlmGateway,
    prompts: Arc<PromptLoader>,
    config: RoadmapConfig,
}

impl Planner {
    pub fn new(gateway: LlmGateway, prompts: Arc<PromptLoader>, config: RoadmapConfig) -> Self {
        debug!(?config, "Planner::new: called");
        Self {
            gateway,
            prompts,
            config,
        }
    }

    async fn call(&self, prompt: &str, vars: &impl Serialize, human: String, tag: &str) -> Result<serde_json::Value, LlmError> {
        let system = self
            .prompts
            .render(prompt, vars)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let text = self.gateway.complete(&system, vec![Message::user(human)], tag).await?;
        parse_json_output(&text)
    }

    /// Goal plus 3 to `max_milestones` milestones
    pub async fn plan_skeleton(&self, context: &GoalContext) -> Result<Skeleton, AppError> {
        debug!(goal = %context.goal, "Planner::plan_skeleton: called");
        let vars = SkeletonVars {
            goal: &context.goal,
            context: context.render(),
            min_milestones: MIN_MILESTONES.min(self.config.max_milestones),
            max_milestones: self.config.max_milestones,
        };
        let value = self
            .call("roadmap-planner", &vars, format!("Plan milestones for: {}", context.goal), SKELETON_TAG)
            .await?;

        let raw: RawSkeleton = serde_json::from_value(value).map_err(LlmError::from)?;
        let goal_label = non_blank(Some(raw.goal.label)).unwrap_or_else(|| context.goal.clone());
        let goal = NodeContent {
            label: goal_label,
            details: non_blank(raw.goal.details),
            ..Default::default()
        };
        let milestones: Vec<NodeContent> = raw
            .goal
            .milestones
            .into_iter()
            .filter_map(RawNode::into_content)
            .take(self.config.max_milestones)
            .collect();

        if milestones.is_empty() {
            warn!(goal = %context.goal, "Planner::plan_skeleton: model returned no milestones");
            return Err(AppError::Upstream(LlmError::InvalidResponse(
                "Model returned no milestones".to_string(),
            )));
        }
        debug!(count = milestones.len(), "Planner::plan_skeleton: milestones planned");
        Ok(Skeleton { goal, milestones })
    }

    /// Actions for one milestone, capped at `max_actions`
    pub async fn plan_actions(&self, context: &GoalContext, milestone: &Node) -> Result<Vec<NodeContent>, AppError> {
        debug!(milestone_id = %milestone.id, label = %milestone.label, "Planner::plan_actions: called");
        let vars = ActionVars {
            goal: &context.goal,
            milestone_label: &milestone.label,
            milestone_details: milestone.details.as_deref().unwrap_or_default(),
            context: context.render(),
            min_actions: MIN_ACTIONS.min(self.config.max_actions),
            max_actions: self.config.max_actions,
        };
        let value = self
            .call(
                "roadmap-actions",
                &vars,
                format!("Plan actions for milestone: {}", milestone.label),
                ACTIONS_TAG,
            )
            .await?;
        Ok(actions_from(value, self.config.max_actions)?)
    }

    /// Goal-level actions that span milestones, capped at `max_direct_actions`
    pub async fn plan_direct_actions(&self, context: &GoalContext, milestones: &[&Node]) -> Result<Vec<NodeContent>, AppError> {
        debug!(milestone_count = milestones.len(), "Planner::plan_direct_actions: called");
        if self.config.max_direct_actions == 0 {
            return Ok(Vec::new());
        }
        let vars = DirectActionVars {
            goal: &context.goal,
            context: context.render(),
            milestones: milestones
                .iter()
                .map(|m| format!("- {}", m.label))
                .collect::<Vec<_>>()
                .join("\n"),
            max_actions: self.config.max_direct_actions,
        };
        let value = self
            .call(
                "roadmap-direct-actions",
                &vars,
                format!("Plan cross-cutting actions for: {}", context.goal),
                DIRECT_ACTIONS_TAG,
            )
            .await?;
        Ok(actions_from(value, self.config.max_direct_actions)?)
    }
}

fn actions_from(value: serde_json::Value, cap: usize) -> Result<Vec<NodeContent>, LlmError> {
    let raw: RawActions = serde_json::from_value(value)?;
    Ok(raw.actions.into_iter().filter_map(RawNode::into_content).take(cap).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::llm::client::mock::MockLlmClient;

    fn planner(mock: Arc<MockLlmClient>, config: RoadmapConfig) -> Planner {
        let gateway = LlmGateway::new(mock, &LlmConfig::default());
        Planner::new(gateway, Arc::new(PromptLoader::embedded_only().unwrap()), config)
    }

    const SKELETON: &str = r#"```json
{"goal": {"label": "Marathon", "details": "Finish a full marathon", "milestones": [
  {"label": "Run 10k", "details": "Base", "start_date": "2026-01-01", "end_date": "soon"},
  {"label": "  ", "details": "blank label dropped"},
  {"label": "Half marathon", "is_assumed": true, "completion_criteria": "Finish under 2h30"},
  {"label": "Full marathon"}
]}}
```"#;

    #[tokio::test]
    async fn test_skeleton_parses_and_validates() {
        let mock = Arc::new(MockLlmClient::new(vec![SKELETON]));
        let p = planner(mock.clone(), RoadmapConfig::default());

        let skeleton = p.plan_skeleton(&GoalContext::new("Run a marathon")).await.unwrap();
        assert_eq!(skeleton.goal.label, "Marathon");
        assert_eq!(skeleton.milestones.len(), 3);
        assert_eq!(
            skeleton.milestones[0].start_date,
            NaiveDate::from_ymd_opt(2026, 1, 1)
        );
        assert!(skeleton.milestones[0].end_date.is_none());
        assert!(skeleton.milestones[1].is_assumed);
        assert_eq!(skeleton.milestones[1].completion_criteria.as_deref(), Some("Finish under 2h30"));

        let request = &mock.requests()[0];
        assert!(request.has_tag(SKELETON_TAG));
        assert!(request.system_prompt.contains("Break the goal into 3-5 major milestones"));
    }

    #[tokio::test]
    async fn test_skeleton_truncated_to_cap() {
        let mock = Arc::new(MockLlmClient::new(vec![SKELETON]));
        let config = RoadmapConfig {
            max_milestones: 2,
            ..Default::default()
        };
        let skeleton = planner(mock, config).plan_skeleton(&GoalContext::new("x")).await.unwrap();
        assert_eq!(skeleton.milestones.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_skeleton_is_error() {
        let mock = Arc::new(MockLlmClient::new(vec![r#"{"goal": {"label": "x", "milestones": []}}"#]));
        let err = planner(mock, RoadmapConfig::default())
            .plan_skeleton(&GoalContext::new("x"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "llm_error");
    }

    #[tokio::test]
    async fn test_actions_capped_and_tagged() {
        let mock = Arc::new(MockLlmClient::new(vec![
            r#"{"actions": [{"label": "a"}, {"label": "b"}, {"label": "c"}, {"label": "d"}, {"label": "e"}, {"label": "f"}]}"#,
            r#"{"actions": [{"label": "daily"}, {"label": "weekly"}, {"label": "monthly"}, {"label": "yearly"}]}"#,
        ]));
        let p = planner(mock.clone(), RoadmapConfig::default());
        let ctx = GoalContext::new("Run");
        let goal = Node::goal("rm-1", NodeContent::new("Run"));
        let ms = Node::milestone("rm-1", &goal.id, 0, NodeContent::new("10k").with_details("Base fitness"));

        let actions = p.plan_actions(&ctx, &ms).await.unwrap();
        assert_eq!(actions.len(), 5);
        let direct = p.plan_direct_actions(&ctx, &[&ms]).await.unwrap();
        assert_eq!(direct.len(), 3);

        let requests = mock.requests();
        assert!(requests[0].has_tag(ACTIONS_TAG));
        assert!(requests[0].system_prompt.contains("Milestone: 10k (Base fitness)"));
        assert!(requests[1].has_tag(DIRECT_ACTIONS_TAG));
        assert!(requests[1].system_prompt.contains("- 10k"));
    }

    #[tokio::test]
    async fn test_unparseable_actions_is_error() {
        let mock = Arc::new(MockLlmClient::new(vec!["no json here"]));
        let p = planner(mock, RoadmapConfig::default());
        let goal = Node::goal("rm-1", NodeContent::new("Run"));
        assert!(p.plan_actions(&GoalContext::new("Run"), &goal).await.is_err());
    }
}
