//! GoalNode arena
//!
//! Goal, Milestone and Action nodes are flat records keyed by id with an
//! explicit `parent_id`. The tree view is rebuilt on demand by one grouping
//! pass over a roadmap's nodes.

use chrono::NaiveDate;
use goalstore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use super::id::generate_id;

/// Level of a node in the goal hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Goal,
    Milestone,
    Action,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Goal => "goal",
            NodeType::Milestone => "milestone",
            NodeType::Action => "action",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            NodeType::Goal => "goal",
            NodeType::Milestone => "ms",
            NodeType::Action => "act",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl NodeStatus {
    /// Status implied by a progress value
    pub fn for_progress(progress: u8) -> Self {
        match progress {
            0 => NodeStatus::Pending,
            100.. => NodeStatus::Completed,
            _ => NodeStatus::InProgress,
        }
    }
}

/// Node content without identity, as a model or reviewer writes it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeContent {
    pub label: String,
    pub details: Option<String>,
    pub is_assumed: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub completion_criteria: Option<String>,
}

impl NodeContent {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// One node of a roadmap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub roadmap_id: String,
    /// Goal nodes have no parent; actions point at a milestone or the goal
    pub parent_id: Option<String>,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
    pub details: Option<String>,
    pub order: u32,
    pub is_assumed: bool,
    pub status: NodeStatus,
    /// Always within 0..=100
    pub progress: u8,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub completion_criteria: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Node {
    fn build(
        roadmap_id: &str,
        parent_id: Option<String>,
        node_type: NodeType,
        order: u32,
        content: NodeContent,
    ) -> Self {
        debug!(%roadmap_id, ?parent_id, %node_type, order, label = %content.label, "Node::build: called");
        let now = now_ms();
        Self {
            id: generate_id(node_type.id_prefix()),
            roadmap_id: roadmap_id.to_string(),
            parent_id,
            node_type,
            label: content.label,
            details: content.details,
            order,
            is_assumed: content.is_assumed,
            status: NodeStatus::Pending,
            progress: 0,
            start_date: content.start_date,
            end_date: content.end_date,
            completion_criteria: content.completion_criteria,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn goal(roadmap_id: &str, content: NodeContent) -> Self {
        Self::build(roadmap_id, None, NodeType::Goal, 0, content)
    }

    pub fn milestone(roadmap_id: &str, goal_id: &str, order: u32, content: NodeContent) -> Self {
        Self::build(roadmap_id, Some(goal_id.to_string()), NodeType::Milestone, order, content)
    }

    pub fn action(roadmap_id: &str, parent_id: &str, order: u32, content: NodeContent) -> Self {
        Self::build(roadmap_id, Some(parent_id.to_string()), NodeType::Action, order, content)
    }

    /// Builder: override the generated id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Replace the content fields, keeping identity and progress
    pub fn apply_content(&mut self, content: NodeContent) {
        self.label = content.label;
        self.details = content.details;
        self.is_assumed = content.is_assumed;
        self.start_date = content.start_date;
        self.end_date = content.end_date;
        self.completion_criteria = content.completion_criteria;
        self.updated_at = now_ms();
    }

    /// Add `delta` to progress, clamped to 0..=100
    ///
    /// Returns `(previous, new)` and keeps `status` consistent with the result.
    pub fn apply_progress_delta(&mut self, delta: i32) -> (u8, u8) {
        let previous = self.progress;
        let next = (i32::from(previous) + delta).clamp(0, 100) as u8;
        debug!(id = %self.id, previous, delta, next, "Node::apply_progress_delta: called");
        self.progress = next;
        self.status = NodeStatus::for_progress(next);
        self.updated_at = now_ms();
        (previous, next)
    }
}

impl Record for Node {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "nodes"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("roadmap_id".to_string(), IndexValue::String(self.roadmap_id.clone()));
        fields.insert("type".to_string(), IndexValue::String(self.node_type.to_string()));
        if let Some(ref parent_id) = self.parent_id {
            fields.insert("parent_id".to_string(), IndexValue::String(parent_id.clone()));
        }
        fields
    }
}

/// A milestone with its actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneView {
    #[serde(flatten)]
    pub node: Node,
    pub actions: Vec<Node>,
}

/// Tree view of a roadmap: the goal, its milestones, and goal-level actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalTree {
    #[serde(flatten)]
    pub node: Node,
    pub milestones: Vec<MilestoneView>,
    /// Cross-cutting actions attached straight to the goal
    pub actions: Vec<Node>,
}

impl GoalTree {
    /// Rebuild the tree from a flat node list
    ///
    /// Returns `None` when there is no goal node. Nodes whose parent is neither
    /// the goal nor one of its milestones are dropped.
    pub fn from_nodes(nodes: Vec<Node>) -> Option<Self> {
        debug!(node_count = nodes.len(), "GoalTree::from_nodes: called");
        let mut goal = None;
        let mut children: HashMap<String, Vec<Node>> = HashMap::new();

        for node in nodes {
            match (&node.parent_id, node.node_type) {
                (None, NodeType::Goal) if goal.is_none() => goal = Some(node),
                (Some(parent), _) => children.entry(parent.clone()).or_default().push(node),
                _ => debug!(id = %node.id, "GoalTree::from_nodes: dropping orphan node"),
            }
        }

        let goal = goal?;
        let mut milestones = Vec::new();
        let mut actions = Vec::new();
        for child in children.remove(&goal.id).unwrap_or_default() {
            match child.node_type {
                NodeType::Milestone => {
                    let mut ms_actions = children.remove(&child.id).unwrap_or_default();
                    ms_actions.retain(|a| a.node_type == NodeType::Action);
                    ms_actions.sort_by_key(|a| a.order);
                    milestones.push(MilestoneView {
                        node: child,
                        actions: ms_actions,
                    });
                }
                NodeType::Action => actions.push(child),
                NodeType::Goal => debug!(id = %child.id, "GoalTree::from_nodes: nested goal ignored"),
            }
        }
        milestones.sort_by_key(|m| m.node.order);
        actions.sort_by_key(|a| a.order);

        Some(Self {
            node: goal,
            milestones,
            actions,
        })
    }

    pub fn roadmap_id(&self) -> &str {
        &self.node.roadmap_id
    }

    /// Every node in the tree, goal first
    pub fn into_nodes(self) -> Vec<Node> {
        let mut nodes = vec![self.node];
        for milestone in self.milestones {
            nodes.push(milestone.node);
            nodes.extend(milestone.actions);
        }
        nodes.extend(self.actions);
        nodes
    }

    pub fn action_count(&self) -> usize {
        self.actions.len() + self.milestones.iter().map(|m| m.actions.len()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_nodes() -> Vec<Node> {
        let goal = Node::goal("rm-1", NodeContent::new("Run a marathon")).with_id("g");
        let m2 = Node::milestone("rm-1", "g", 1, NodeContent::new("Half marathon")).with_id("m2");
        let m1 = Node::milestone("rm-1", "g", 0, NodeContent::new("10k")).with_id("m1");
        let a1 = Node::action("rm-1", "m1", 1, NodeContent::new("Interval runs")).with_id("a1");
        let a0 = Node::action("rm-1", "m1", 0, NodeContent::new("Buy shoes")).with_id("a0");
        let direct = Node::action("rm-1", "g", 0, NodeContent::new("Log every run")).with_id("d");
        let orphan = Node::action("rm-1", "missing", 0, NodeContent::new("Lost")).with_id("o");
        vec![a1, m2, direct, orphan, goal, a0, m1]
    }

    #[test]
    fn test_tree_groups_and_orders() {
        let tree = GoalTree::from_nodes(sample_nodes()).unwrap();
        assert_eq!(tree.node.id, "g");

        let ms_ids: Vec<_> = tree.milestones.iter().map(|m| m.node.id.as_str()).collect();
        assert_eq!(ms_ids, vec!["m1", "m2"]);

        let a_ids: Vec<_> = tree.milestones[0].actions.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(a_ids, vec!["a0", "a1"]);
        assert!(tree.milestones[1].actions.is_empty());

        assert_eq!(tree.actions.len(), 1);
        assert_eq!(tree.actions[0].id, "d");
        assert_eq!(tree.action_count(), 3);
    }

    #[test]
    fn test_tree_without_goal_is_none() {
        let nodes = vec![Node::milestone("rm-1", "g", 0, NodeContent::new("x"))];
        assert!(GoalTree::from_nodes(nodes).is_none());
    }

    #[test]
    fn test_tree_serializes_flat_node_fields() {
        let tree = GoalTree::from_nodes(sample_nodes()).unwrap();
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["id"], "g");
        assert_eq!(json["type"], "goal");
        assert_eq!(json["milestones"][0]["label"], "10k");
        assert_eq!(json["milestones"][0]["actions"][0]["label"], "Buy shoes");
        assert_eq!(json["actions"][0]["label"], "Log every run");
    }

    #[test]
    fn test_into_nodes_excludes_orphans() {
        let nodes = GoalTree::from_nodes(sample_nodes()).unwrap().into_nodes();
        assert_eq!(nodes.len(), 6);
        assert_eq!(nodes[0].node_type, NodeType::Goal);
    }

    #[test]
    fn test_progress_delta_clamps_both_ends() {
        let mut node = Node::action("rm-1", "m1", 0, NodeContent::new("x"));
        node.progress = 80;
        assert_eq!(node.apply_progress_delta(50), (80, 100));
        assert_eq!(node.status, NodeStatus::Completed);

        assert_eq!(node.apply_progress_delta(-150), (100, 0));
        assert_eq!(node.status, NodeStatus::Pending);

        assert_eq!(node.apply_progress_delta(25), (0, 25));
        assert_eq!(node.status, NodeStatus::InProgress);
    }

    #[test]
    fn test_generated_ids_use_type_prefix() {
        assert!(Node::goal("rm", NodeContent::new("g")).id.starts_with("goal-"));
        assert!(Node::milestone("rm", "g", 0, NodeContent::new("m")).id.starts_with("ms-"));
        assert!(Node::action("rm", "g", 0, NodeContent::new("a")).id.starts_with("act-"));
    }

    #[test]
    fn test_apply_content_keeps_identity() {
        let mut node = Node::milestone("rm", "g", 0, NodeContent::new("old")).with_id("m1");
        node.progress = 30;
        node.apply_content(NodeContent::new("new").with_details("more"));
        assert_eq!(node.id, "m1");
        assert_eq!(node.label, "new");
        assert_eq!(node.details.as_deref(), Some("more"));
        assert_eq!(node.progress, 30);
    }
}
