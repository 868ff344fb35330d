//! RoadmapService: skeleton, review and action generation
//!
//! A roadmap is created in draft with its goal and milestones. The user may
//! replace the milestones while it is a draft. Generating actions persists
//! them and activates the roadmap; nothing moves it back to draft.

use std::collections::HashMap;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::planner::{Planner, Skeleton};
use crate::discovery::{owned_conversation, require_user};
use crate::domain::{GoalContext, GoalTree, Node, NodeContent, Roadmap};
use crate::error::AppError;
use crate::state::StateManager;

/// Owner recorded on roadmaps planned without a user
const ANONYMOUS_USER: &str = "anonymous";

/// One milestone of a reviewed replacement list
///
/// An `id` naming a current milestone keeps that identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneEdit {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub content: NodeContent,
}

impl MilestoneEdit {
    pub fn new(content: NodeContent) -> Self {
        Self { id: None, content }
    }
}

/// Progress of a streamed plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoadmapEvent {
    /// Goal and milestones, no actions yet
    Skeleton(GoalTree),
    /// One milestone's actions as soon as they are planned; `None` marks
    /// goal-level actions, which come after every milestone
    Actions {
        milestone_id: Option<String>,
        actions: Vec<Node>,
    },
    /// Sent once everything is planned, and stored if the plan persists
    Complete { roadmap_id: String },
}

async fn report(progress: Option<&mpsc::Sender<RoadmapEvent>>, event: RoadmapEvent) {
    if let Some(tx) = progress
        && tx.send(event).await.is_err()
    {
        debug!("report: progress receiver dropped");
    }
}

#[derive(Clone)]
pub struct RoadmapService {
    state: StateManager,
    planner: Option<Planner>,
}

fn skeleton_nodes(roadmap_id: &str, skeleton: Skeleton) -> Vec<Node> {
    let goal = Node::goal(roadmap_id, skeleton.goal);
    let mut nodes = Vec::with_capacity(skeleton.milestones.len() + 1);
    let goal_id = goal.id.clone();
    nodes.push(goal);
    for (order, content) in skeleton.milestones.into_iter().enumerate() {
        nodes.push(Node::milestone(roadmap_id, &goal_id, order as u32, content));
    }
    nodes
}

fn tree_of(nodes: Vec<Node>, roadmap_id: &str) -> Result<GoalTree, AppError> {
    GoalTree::from_nodes(nodes).ok_or_else(|| AppError::internal(format!("roadmap {} has no goal node", roadmap_id)))
}

impl RoadmapService {
    pub fn new(state: StateManager, planner: Planner) -> Self {
        Self {
            state,
            planner: Some(planner),
        }
    }

    /// A service for reading and deleting roadmaps; planning calls fail
    pub fn read_only(state: StateManager) -> Self {
        Self { state, planner: None }
    }

    fn planner(&self) -> Result<&Planner, AppError> {
        self.planner
            .as_ref()
            .ok_or_else(|| AppError::internal("roadmap planning needs a model client"))
    }

    async fn owned_roadmap(&self, user_id: &str, roadmap_id: &str) -> Result<Roadmap, AppError> {
        debug!(%user_id, %roadmap_id, "RoadmapService::owned_roadmap: called");
        let user_id = require_user(user_id)?;
        let roadmap = self
            .state
            .get_roadmap(roadmap_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Roadmap {}", roadmap_id)))?;
        if !roadmap.is_owned_by(user_id) {
            debug!(owner = %roadmap.user_id, "RoadmapService::owned_roadmap: ownership mismatch");
            return Err(AppError::Forbidden(format!("roadmap {}", roadmap_id)));
        }
        Ok(roadmap)
    }

    fn require_draft(roadmap: &Roadmap) -> Result<(), AppError> {
        if !roadmap.is_draft() {
            debug!(id = %roadmap.id, status = %roadmap.status, "RoadmapService::require_draft: not a draft");
            return Err(AppError::Conflict(format!(
                "roadmap {} is {}, only drafts can be changed",
                roadmap.id, roadmap.status
            )));
        }
        Ok(())
    }

    /// Plan milestones from a conversation's Blueprint and store a draft
    ///
    /// A draft already linked to the conversation has its nodes replaced.
    pub async fn create_skeleton(&self, user_id: &str, conversation_id: &str) -> Result<GoalTree, AppError> {
        debug!(%user_id, %conversation_id, "RoadmapService::create_skeleton: called");
        let user_id = require_user(user_id)?;
        owned_conversation(&self.state, user_id, conversation_id).await?;

        let blueprint = self.state.get_blueprint(conversation_id).await?.unwrap_or_default();
        let context = GoalContext::from_blueprint(&blueprint)
            .ok_or_else(|| AppError::Validation("the conversation has no goal yet".to_string()))?;

        let existing = self.state.get_roadmap_by_conversation(conversation_id).await?;
        if let Some(ref roadmap) = existing {
            Self::require_draft(roadmap)?;
        }

        let skeleton = self.planner()?.plan_skeleton(&context).await?;
        let roadmap = match existing {
            Some(mut roadmap) => {
                debug!(id = %roadmap.id, "RoadmapService::create_skeleton: replacing draft");
                roadmap.title = context.goal.clone();
                roadmap.context = context;
                roadmap.touch();
                roadmap
            }
            None => Roadmap::new(user_id, Some(conversation_id.to_string()), context),
        };

        let roadmap_id = roadmap.id.clone();
        let nodes = skeleton_nodes(&roadmap_id, skeleton);
        self.state.save_skeleton(roadmap, nodes.clone()).await?;
        info!(%roadmap_id, milestones = nodes.len() - 1, "Roadmap skeleton saved");
        tree_of(nodes, &roadmap_id)
    }

    /// Replace the milestones of a draft, keeping the goal node
    pub async fn edit_milestones(&self, user_id: &str, roadmap_id: &str, edits: Vec<MilestoneEdit>) -> Result<GoalTree, AppError> {
        debug!(%user_id, %roadmap_id, count = edits.len(), "RoadmapService::edit_milestones: called");
        let roadmap = self.owned_roadmap(user_id, roadmap_id).await?;
        Self::require_draft(&roadmap)?;
        if edits.is_empty() || edits.iter().any(|e| e.content.label.trim().is_empty()) {
            return Err(AppError::Validation("every milestone needs a label".to_string()));
        }

        let current = tree_of(self.state.list_nodes(roadmap_id).await?, roadmap_id)?;
        let goal_id = current.node.id.clone();
        let milestones: Vec<Node> = edits
            .into_iter()
            .enumerate()
            .map(|(order, edit)| {
                let kept = edit
                    .id
                    .filter(|id| current.milestones.iter().any(|m| &m.node.id == id));
                let node = Node::milestone(roadmap_id, &goal_id, order as u32, edit.content);
                match kept {
                    Some(id) => node.with_id(id),
                    None => node,
                }
            })
            .collect();

        self.state.update_milestones(roadmap_id, milestones).await?;
        info!(%roadmap_id, "Roadmap milestones replaced");
        tree_of(self.state.list_nodes(roadmap_id).await?, roadmap_id)
    }

    /// Plan actions for every milestone plus goal-level actions
    ///
    /// Milestones are planned concurrently and reported to `progress` in
    /// the order they finish; one that fails keeps no actions. The result
    /// is in milestone order with goal-level actions last.
    async fn plan_all_actions(
        planner: &Planner,
        roadmap_id: &str,
        context: &GoalContext,
        tree: &GoalTree,
        progress: Option<&mpsc::Sender<RoadmapEvent>>,
    ) -> Vec<Node> {
        let milestones: Vec<&Node> = tree.milestones.iter().map(|m| &m.node).collect();
        let per_milestone = async {
            let mut pending: FuturesUnordered<_> = milestones
                .iter()
                .map(|ms| async move {
                    let contents = planner.plan_actions(context, ms).await.unwrap_or_else(|e| {
                        warn!(milestone_id = %ms.id, error = %e, "Action planning failed, milestone keeps no actions");
                        Vec::new()
                    });
                    let actions: Vec<Node> = contents
                        .into_iter()
                        .enumerate()
                        .map(|(order, content)| Node::action(roadmap_id, &ms.id, order as u32, content))
                        .collect();
                    (ms.id.clone(), actions)
                })
                .collect();

            let mut planned: HashMap<String, Vec<Node>> = HashMap::new();
            while let Some((milestone_id, actions)) = pending.next().await {
                debug!(%milestone_id, count = actions.len(), "plan_all_actions: milestone planned");
                let event = RoadmapEvent::Actions {
                    milestone_id: Some(milestone_id.clone()),
                    actions: actions.clone(),
                };
                report(progress, event).await;
                planned.insert(milestone_id, actions);
            }
            planned
        };
        let direct = planner.plan_direct_actions(context, &milestones);
        let (mut planned, direct) = tokio::join!(per_milestone, direct);

        let mut actions = Vec::new();
        for ms in &milestones {
            actions.extend(planned.remove(&ms.id).unwrap_or_default());
        }
        let direct: Vec<Node> = direct
            .unwrap_or_else(|e| {
                warn!(error = %e, "Goal-level action planning failed");
                Vec::new()
            })
            .into_iter()
            .enumerate()
            .map(|(order, content)| Node::action(roadmap_id, &tree.node.id, order as u32, content))
            .collect();
        let event = RoadmapEvent::Actions {
            milestone_id: None,
            actions: direct.clone(),
        };
        report(progress, event).await;
        actions.extend(direct);
        actions
    }

    /// Generate and persist actions, activating the draft
    pub async fn generate_actions(&self, user_id: &str, roadmap_id: &str) -> Result<GoalTree, AppError> {
        self.actions_with(user_id, roadmap_id, None).await
    }

    /// [`generate_actions`](Self::generate_actions), reporting each
    /// milestone's actions as they are planned and `Complete` once stored
    pub async fn stream_actions(
        &self,
        user_id: &str,
        roadmap_id: &str,
        events: mpsc::Sender<RoadmapEvent>,
    ) -> Result<GoalTree, AppError> {
        self.actions_with(user_id, roadmap_id, Some(&events)).await
    }

    async fn actions_with(
        &self,
        user_id: &str,
        roadmap_id: &str,
        progress: Option<&mpsc::Sender<RoadmapEvent>>,
    ) -> Result<GoalTree, AppError> {
        debug!(%user_id, %roadmap_id, streamed = progress.is_some(), "RoadmapService::actions_with: called");
        let roadmap = self.owned_roadmap(user_id, roadmap_id).await?;
        Self::require_draft(&roadmap)?;

        let tree = tree_of(self.state.list_nodes(roadmap_id).await?, roadmap_id)?;
        if tree.milestones.is_empty() {
            return Err(AppError::Validation("the roadmap has no milestones".to_string()));
        }
        let planner = self.planner()?;
        let actions = Self::plan_all_actions(planner, roadmap_id, &roadmap.context, &tree, progress).await;
        let count = actions.len();

        self.state.add_actions(roadmap_id, actions).await?;
        info!(%roadmap_id, count, "Roadmap actions generated");
        let tree = tree_of(self.state.list_nodes(roadmap_id).await?, roadmap_id)?;
        let roadmap_id = roadmap_id.to_string();
        report(progress, RoadmapEvent::Complete { roadmap_id }).await;
        Ok(tree)
    }

    /// One-shot plan with no review step and no persistence
    ///
    /// Uses the conversation's Blueprint when a user and conversation are
    /// given, otherwise `goal`.
    pub async fn generate_roadmap(
        &self,
        user_id: Option<&str>,
        conversation_id: Option<&str>,
        goal: Option<&str>,
    ) -> Result<GoalTree, AppError> {
        self.roadmap_with(user_id, conversation_id, goal, None).await
    }

    /// [`generate_roadmap`](Self::generate_roadmap), reporting the skeleton
    /// first, then actions as they are planned, then `Complete`
    pub async fn stream_roadmap(
        &self,
        user_id: Option<&str>,
        conversation_id: Option<&str>,
        goal: Option<&str>,
        events: mpsc::Sender<RoadmapEvent>,
    ) -> Result<GoalTree, AppError> {
        self.roadmap_with(user_id, conversation_id, goal, Some(&events)).await
    }

    async fn roadmap_with(
        &self,
        user_id: Option<&str>,
        conversation_id: Option<&str>,
        goal: Option<&str>,
        progress: Option<&mpsc::Sender<RoadmapEvent>>,
    ) -> Result<GoalTree, AppError> {
        debug!(?user_id, ?conversation_id, ?goal, "RoadmapService::roadmap_with: called");
        let user_id = user_id.map(str::trim).filter(|u| !u.is_empty());
        let context = match (user_id, conversation_id) {
            (Some(user), Some(id)) => {
                owned_conversation(&self.state, user, id).await?;
                let blueprint = self.state.get_blueprint(id).await?.unwrap_or_default();
                GoalContext::from_blueprint(&blueprint)
            }
            _ => None,
        };
        let context = match (context, goal.map(str::trim).filter(|g| !g.is_empty())) {
            (Some(context), _) => context,
            (None, Some(goal)) => GoalContext::new(goal),
            (None, None) => return Err(AppError::Validation("a goal is required".to_string())),
        };

        let roadmap = Roadmap::new(user_id.unwrap_or(ANONYMOUS_USER), None, context);
        let skeleton = self.planner()?.plan_skeleton(&roadmap.context).await?;
        let skeleton_tree = tree_of(skeleton_nodes(&roadmap.id, skeleton), &roadmap.id)?;
        report(progress, RoadmapEvent::Skeleton(skeleton_tree.clone())).await;
        let actions =
            Self::plan_all_actions(self.planner()?, &roadmap.id, &roadmap.context, &skeleton_tree, progress).await;

        let mut nodes = skeleton_tree.into_nodes();
        nodes.extend(actions);
        info!(roadmap_id = %roadmap.id, nodes = nodes.len(), "One-shot roadmap generated");
        let tree = tree_of(nodes, &roadmap.id)?;
        let roadmap_id = roadmap.id.clone();
        report(progress, RoadmapEvent::Complete { roadmap_id }).await;
        Ok(tree)
    }

    pub async fn get(&self, user_id: &str, roadmap_id: &str) -> Result<(Roadmap, GoalTree), AppError> {
        debug!(%user_id, %roadmap_id, "RoadmapService::get: called");
        let roadmap = self.owned_roadmap(user_id, roadmap_id).await?;
        let tree = tree_of(self.state.list_nodes(roadmap_id).await?, roadmap_id)?;
        Ok((roadmap, tree))
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Roadmap>, AppError> {
        debug!(%user_id, "RoadmapService::list: called");
        let user_id = require_user(user_id)?;
        Ok(self.state.list_roadmaps(user_id).await?)
    }

    /// Delete a roadmap with its nodes and check-ins
    pub async fn delete(&self, user_id: &str, roadmap_id: &str) -> Result<(), AppError> {
        debug!(%user_id, %roadmap_id, "RoadmapService::delete: called");
        self.owned_roadmap(user_id, roadmap_id).await?;
        self.state.delete_roadmap(roadmap_id).await?;
        info!(%roadmap_id, "Roadmap deleted");
        Ok(())
    }
}
