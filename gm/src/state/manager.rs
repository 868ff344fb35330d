//! StateManager - actor that owns the GoalStore
//!
//! Processes commands via channels for thread-safe access to persistent state.
//! The actor handles one command at a time, so a read followed by a batch
//! inside one handler sees no interleaved writes.

use std::path::Path;

use goalstore::{Filter, IndexValue, Store};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::messages::{StateCommand, StateError, StateResponse};
use crate::domain::{
    Blueprint, BlueprintRecord, ChatMessage, CheckIn, Conversation, MessageRole, Node, NodeType, Roadmap,
    RoadmapStatus,
};

fn store_err(e: impl std::fmt::Display) -> StateError {
    StateError::StoreError(e.to_string())
}

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor over the store in `store_dir`
    pub fn spawn(store_dir: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(store_dir = %store_dir.as_ref().display(), "spawn: called");
        let mut store = Store::open(store_dir.as_ref())?;

        let conversations = store.rebuild_indexes::<Conversation>()?;
        let messages = store.rebuild_indexes::<ChatMessage>()?;
        let blueprints = store.rebuild_indexes::<BlueprintRecord>()?;
        let roadmaps = store.rebuild_indexes::<Roadmap>()?;
        let nodes = store.rebuild_indexes::<Node>()?;
        let checkins = store.rebuild_indexes::<CheckIn>()?;
        info!(
            conversations,
            messages, blueprints, roadmaps, nodes, checkins, "Rebuilt indexes for all record types"
        );

        Ok(Self::start(store))
    }

    /// Spawn an actor over a throwaway in-memory store
    pub fn spawn_in_memory() -> eyre::Result<Self> {
        debug!("spawn_in_memory: called");
        Ok(Self::start(Store::open_in_memory()?))
    }

    fn start(store: Store) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));
        info!("StateManager spawned");
        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Conversation operations ===

    pub async fn create_conversation(&self, conversation: Conversation) -> StateResponse<String> {
        debug!(id = %conversation.id, user_id = %conversation.user_id, "create_conversation: called");
        self.request(|reply| StateCommand::CreateConversation { conversation, reply })
            .await
    }

    pub async fn get_conversation(&self, id: &str) -> StateResponse<Option<Conversation>> {
        debug!(%id, "get_conversation: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::GetConversation { id, reply }).await
    }

    /// Conversations of a user, most recently updated first
    pub async fn list_conversations(&self, user_id: &str) -> StateResponse<Vec<Conversation>> {
        debug!(%user_id, "list_conversations: called");
        let user_id = user_id.to_string();
        self.request(|reply| StateCommand::ListConversations { user_id, reply })
            .await
    }

    pub async fn delete_conversation(&self, id: &str) -> StateResponse<bool> {
        debug!(%id, "delete_conversation: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::DeleteConversation { id, reply })
            .await
    }

    // === Message operations ===

    /// Append a message; the store assigns the next `order`
    pub async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: impl Into<String>,
    ) -> StateResponse<ChatMessage> {
        debug!(%conversation_id, %role, "append_message: called");
        let conversation_id = conversation_id.to_string();
        let content = content.into();
        self.request(|reply| StateCommand::AppendMessage {
            conversation_id,
            role,
            content,
            reply,
        })
        .await
    }

    /// Messages of a conversation in `order`
    pub async fn list_messages(&self, conversation_id: &str) -> StateResponse<Vec<ChatMessage>> {
        debug!(%conversation_id, "list_messages: called");
        let conversation_id = conversation_id.to_string();
        self.request(|reply| StateCommand::ListMessages { conversation_id, reply })
            .await
    }

    // === Blueprint operations ===

    pub async fn get_blueprint(&self, conversation_id: &str) -> StateResponse<Option<Blueprint>> {
        debug!(%conversation_id, "get_blueprint: called");
        let conversation_id = conversation_id.to_string();
        self.request(|reply| StateCommand::GetBlueprint { conversation_id, reply })
            .await
    }

    /// Create or replace the blueprint of a conversation
    pub async fn update_blueprint(&self, conversation_id: &str, blueprint: Blueprint) -> StateResponse<()> {
        debug!(%conversation_id, "update_blueprint: called");
        let conversation_id = conversation_id.to_string();
        self.request(|reply| StateCommand::UpdateBlueprint {
            conversation_id,
            blueprint,
            reply,
        })
        .await
    }

    // === Roadmap operations ===

    pub async fn save_skeleton(&self, roadmap: Roadmap, nodes: Vec<Node>) -> StateResponse<()> {
        debug!(roadmap_id = %roadmap.id, node_count = nodes.len(), "save_skeleton: called");
        self.request(|reply| StateCommand::SaveSkeleton { roadmap, nodes, reply })
            .await
    }

    pub async fn update_milestones(&self, roadmap_id: &str, milestones: Vec<Node>) -> StateResponse<Roadmap> {
        debug!(%roadmap_id, milestone_count = milestones.len(), "update_milestones: called");
        let roadmap_id = roadmap_id.to_string();
        self.request(|reply| StateCommand::UpdateMilestones {
            roadmap_id,
            milestones,
            reply,
        })
        .await
    }

    /// The only path from draft to active
    pub async fn add_actions(&self, roadmap_id: &str, actions: Vec<Node>) -> StateResponse<Roadmap> {
        debug!(%roadmap_id, action_count = actions.len(), "add_actions: called");
        let roadmap_id = roadmap_id.to_string();
        self.request(|reply| StateCommand::AddActions {
            roadmap_id,
            actions,
            reply,
        })
        .await
    }

    pub async fn get_roadmap(&self, id: &str) -> StateResponse<Option<Roadmap>> {
        debug!(%id, "get_roadmap: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::GetRoadmap { id, reply }).await
    }

    /// Most recently updated roadmap linked to a conversation
    pub async fn get_roadmap_by_conversation(&self, conversation_id: &str) -> StateResponse<Option<Roadmap>> {
        debug!(%conversation_id, "get_roadmap_by_conversation: called");
        let conversation_id = conversation_id.to_string();
        self.request(|reply| StateCommand::GetRoadmapByConversation { conversation_id, reply })
            .await
    }

    pub async fn list_roadmaps(&self, user_id: &str) -> StateResponse<Vec<Roadmap>> {
        debug!(%user_id, "list_roadmaps: called");
        let user_id = user_id.to_string();
        self.request(|reply| StateCommand::ListRoadmaps { user_id, reply }).await
    }

    pub async fn list_nodes(&self, roadmap_id: &str) -> StateResponse<Vec<Node>> {
        debug!(%roadmap_id, "list_nodes: called");
        let roadmap_id = roadmap_id.to_string();
        self.request(|reply| StateCommand::ListNodes { roadmap_id, reply }).await
    }

    pub async fn delete_roadmap(&self, id: &str) -> StateResponse<bool> {
        debug!(%id, "delete_roadmap: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::DeleteRoadmap { id, reply }).await
    }

    // === CheckIn operations ===

    pub async fn create_checkin(&self, checkin: CheckIn) -> StateResponse<String> {
        debug!(id = %checkin.id, roadmap_id = %checkin.roadmap_id, "create_checkin: called");
        self.request(|reply| StateCommand::CreateCheckIn { checkin, reply }).await
    }

    pub async fn get_checkin(&self, id: &str) -> StateResponse<Option<CheckIn>> {
        debug!(%id, "get_checkin: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::GetCheckIn { id, reply }).await
    }

    /// Check-ins of a roadmap, newest first
    pub async fn list_checkins(&self, roadmap_id: &str) -> StateResponse<Vec<CheckIn>> {
        debug!(%roadmap_id, "list_checkins: called");
        let roadmap_id = roadmap_id.to_string();
        self.request(|reply| StateCommand::ListCheckIns { roadmap_id, reply })
            .await
    }

    pub async fn apply_checkin(&self, checkin: CheckIn, nodes: Vec<Node>) -> StateResponse<()> {
        debug!(id = %checkin.id, node_count = nodes.len(), "apply_checkin: called");
        self.request(|reply| StateCommand::ApplyCheckIn { checkin, nodes, reply })
            .await
    }

    /// Shutdown the StateManager
    pub async fn shutdown(&self) -> Result<(), StateError> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

/// The actor loop that owns the Store and processes commands
async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::CreateConversation { conversation, reply } => {
                debug!(id = %conversation.id, "actor_loop: CreateConversation command");
                let _ = reply.send(store.create(conversation).map_err(store_err));
            }

            StateCommand::GetConversation { id, reply } => {
                debug!(%id, "actor_loop: GetConversation command");
                let _ = reply.send(store.get(&id).map_err(store_err));
            }

            StateCommand::ListConversations { user_id, reply } => {
                debug!(%user_id, "actor_loop: ListConversations command");
                let result = store
                    .list::<Conversation>(&[Filter::eq("user_id", user_id)])
                    .map(|mut list| {
                        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                        list
                    })
                    .map_err(store_err);
                let _ = reply.send(result);
            }

            StateCommand::DeleteConversation { id, reply } => {
                debug!(%id, "actor_loop: DeleteConversation command");
                let _ = reply.send(delete_conversation(&mut store, &id));
            }

            StateCommand::AppendMessage {
                conversation_id,
                role,
                content,
                reply,
            } => {
                debug!(%conversation_id, %role, "actor_loop: AppendMessage command");
                let _ = reply.send(append_message(&mut store, &conversation_id, role, content));
            }

            StateCommand::ListMessages { conversation_id, reply } => {
                debug!(%conversation_id, "actor_loop: ListMessages command");
                let _ = reply.send(list_messages(&store, &conversation_id));
            }

            StateCommand::GetBlueprint { conversation_id, reply } => {
                debug!(%conversation_id, "actor_loop: GetBlueprint command");
                let result = store
                    .get::<BlueprintRecord>(&conversation_id)
                    .map(|r| r.map(|r| r.blueprint))
                    .map_err(store_err);
                let _ = reply.send(result);
            }

            StateCommand::UpdateBlueprint {
                conversation_id,
                blueprint,
                reply,
            } => {
                debug!(%conversation_id, "actor_loop: UpdateBlueprint command");
                let _ = reply.send(update_blueprint(&mut store, &conversation_id, blueprint));
            }

            StateCommand::SaveSkeleton { roadmap, nodes, reply } => {
                debug!(roadmap_id = %roadmap.id, "actor_loop: SaveSkeleton command");
                let _ = reply.send(save_skeleton(&mut store, roadmap, nodes));
            }

            StateCommand::UpdateMilestones {
                roadmap_id,
                milestones,
                reply,
            } => {
                debug!(%roadmap_id, "actor_loop: UpdateMilestones command");
                let _ = reply.send(update_milestones(&mut store, &roadmap_id, milestones));
            }

            StateCommand::AddActions {
                roadmap_id,
                actions,
                reply,
            } => {
                debug!(%roadmap_id, "actor_loop: AddActions command");
                let _ = reply.send(add_actions(&mut store, &roadmap_id, actions));
            }

            StateCommand::GetRoadmap { id, reply } => {
                debug!(%id, "actor_loop: GetRoadmap command");
                let _ = reply.send(store.get(&id).map_err(store_err));
            }

            StateCommand::GetRoadmapByConversation { conversation_id, reply } => {
                debug!(%conversation_id, "actor_loop: GetRoadmapByConversation command");
                let result = store
                    .list::<Roadmap>(&[Filter::eq("conversation_id", conversation_id)])
                    .map(|list| list.into_iter().max_by_key(|r| r.updated_at))
                    .map_err(store_err);
                let _ = reply.send(result);
            }

            StateCommand::ListRoadmaps { user_id, reply } => {
                debug!(%user_id, "actor_loop: ListRoadmaps command");
                let result = store
                    .list::<Roadmap>(&[Filter::eq("user_id", user_id)])
                    .map(|mut list| {
                        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                        list
                    })
                    .map_err(store_err);
                let _ = reply.send(result);
            }

            StateCommand::ListNodes { roadmap_id, reply } => {
                debug!(%roadmap_id, "actor_loop: ListNodes command");
                let result = store
                    .list::<Node>(&[Filter::eq("roadmap_id", roadmap_id)])
                    .map_err(store_err);
                let _ = reply.send(result);
            }

            StateCommand::DeleteRoadmap { id, reply } => {
                debug!(%id, "actor_loop: DeleteRoadmap command");
                let _ = reply.send(delete_roadmap(&mut store, &id));
            }

            StateCommand::CreateCheckIn { checkin, reply } => {
                debug!(id = %checkin.id, "actor_loop: CreateCheckIn command");
                let _ = reply.send(store.create(checkin).map_err(store_err));
            }

            StateCommand::GetCheckIn { id, reply } => {
                debug!(%id, "actor_loop: GetCheckIn command");
                let _ = reply.send(store.get(&id).map_err(store_err));
            }

            StateCommand::ListCheckIns { roadmap_id, reply } => {
                debug!(%roadmap_id, "actor_loop: ListCheckIns command");
                let result = store
                    .list::<CheckIn>(&[Filter::eq("roadmap_id", roadmap_id)])
                    .map(|mut list| {
                        // Insertion order breaks ties between equal timestamps
                        list.reverse();
                        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                        list
                    })
                    .map_err(store_err);
                let _ = reply.send(result);
            }

            StateCommand::ApplyCheckIn { checkin, nodes, reply } => {
                debug!(id = %checkin.id, "actor_loop: ApplyCheckIn command");
                let _ = reply.send(apply_checkin(&mut store, checkin, nodes));
            }

            StateCommand::Shutdown => {
                debug!("actor_loop: Shutdown command");
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}

fn delete_conversation(store: &mut Store, id: &str) -> StateResponse<bool> {
    if store.get::<Conversation>(id).map_err(store_err)?.is_none() {
        debug!(%id, "delete_conversation: not found");
        return Ok(false);
    }

    let linked: Vec<Roadmap> = store
        .list(&[Filter::eq("conversation_id", id)])
        .map_err(store_err)?;

    store
        .batch(|b| {
            let removed = b.delete_by_index::<ChatMessage>("conversation_id", IndexValue::from(id))?;
            debug!(%id, removed, "delete_conversation: messages removed");
            b.delete::<BlueprintRecord>(id)?;
            for mut roadmap in linked {
                roadmap.conversation_id = None;
                roadmap.touch();
                b.update(&roadmap)?;
            }
            b.delete::<Conversation>(id)
        })
        .map_err(store_err)
}

fn append_message(
    store: &mut Store,
    conversation_id: &str,
    role: MessageRole,
    content: String,
) -> StateResponse<ChatMessage> {
    let mut conversation: Conversation = store
        .get(conversation_id)
        .map_err(store_err)?
        .ok_or_else(|| StateError::NotFound(format!("Conversation {}", conversation_id)))?;

    let next_order = list_messages(store, conversation_id)?
        .last()
        .map(|m| m.order + 1)
        .unwrap_or(1);
    debug!(%conversation_id, next_order, "append_message: assigning order");

    let message = ChatMessage::new(conversation_id, role, content, next_order);
    conversation.touch();
    store
        .batch(|b| {
            b.create(&message)?;
            b.update(&conversation)
        })
        .map_err(store_err)?;
    Ok(message)
}

fn list_messages(store: &Store, conversation_id: &str) -> StateResponse<Vec<ChatMessage>> {
    let mut messages: Vec<ChatMessage> = store
        .list(&[Filter::eq("conversation_id", conversation_id)])
        .map_err(store_err)?;
    messages.sort_by_key(|m| m.order);
    Ok(messages)
}

fn update_blueprint(store: &mut Store, conversation_id: &str, blueprint: Blueprint) -> StateResponse<()> {
    match store.get::<BlueprintRecord>(conversation_id).map_err(store_err)? {
        Some(mut record) => {
            debug!(%conversation_id, "update_blueprint: replacing existing");
            record.replace(blueprint);
            store.update(record).map_err(store_err)
        }
        None => {
            debug!(%conversation_id, "update_blueprint: creating");
            store
                .create(BlueprintRecord::new(conversation_id, blueprint))
                .map(|_| ())
                .map_err(store_err)
        }
    }
}

/// Replaces the stored draft, or creates the roadmap if it is new
///
/// An existing roadmap must still be a draft in the store.
fn save_skeleton(store: &mut Store, roadmap: Roadmap, nodes: Vec<Node>) -> StateResponse<()> {
    let exists = store.get::<Roadmap>(&roadmap.id).map_err(store_err)?.is_some();
    debug!(roadmap_id = %roadmap.id, %exists, "save_skeleton: writing");
    if exists {
        require_draft(store, &roadmap.id)?;
    } else if let Some(ref conversation_id) = roadmap.conversation_id {
        let linked: Vec<Roadmap> = store
            .list(&[Filter::eq("conversation_id", conversation_id.as_str())])
            .map_err(store_err)?;
        if let Some(other) = linked.first() {
            debug!(%conversation_id, other = %other.id, "save_skeleton: conversation already has a roadmap");
            return Err(StateError::InvalidTransition(format!(
                "conversation {} already has roadmap {}",
                conversation_id, other.id
            )));
        }
    }

    store
        .batch(|b| {
            if exists {
                let removed = b.delete_by_index::<Node>("roadmap_id", IndexValue::from(roadmap.id.as_str()))?;
                debug!(removed, "save_skeleton: previous nodes removed");
                b.update(&roadmap)?;
            } else {
                b.create(&roadmap)?;
            }
            for node in &nodes {
                b.create(node)?;
            }
            Ok(())
        })
        .map_err(store_err)
}

fn require_draft(store: &Store, roadmap_id: &str) -> StateResponse<Roadmap> {
    let roadmap: Roadmap = store
        .get(roadmap_id)
        .map_err(store_err)?
        .ok_or_else(|| StateError::NotFound(format!("Roadmap {}", roadmap_id)))?;
    if roadmap.status != RoadmapStatus::Draft {
        debug!(%roadmap_id, status = %roadmap.status, "require_draft: not a draft");
        return Err(StateError::InvalidTransition(format!(
            "roadmap {} is {}, expected draft",
            roadmap_id, roadmap.status
        )));
    }
    Ok(roadmap)
}

fn update_milestones(store: &mut Store, roadmap_id: &str, milestones: Vec<Node>) -> StateResponse<Roadmap> {
    let mut roadmap = require_draft(store, roadmap_id)?;
    let existing: Vec<Node> = store
        .list(&[Filter::eq("roadmap_id", roadmap_id)])
        .map_err(store_err)?;
    roadmap.touch();

    store
        .batch(|b| {
            for node in existing.iter().filter(|n| n.node_type != NodeType::Goal) {
                b.delete::<Node>(&node.id)?;
            }
            for node in &milestones {
                b.create(node)?;
            }
            b.update(&roadmap)
        })
        .map_err(store_err)?;
    Ok(roadmap)
}

fn add_actions(store: &mut Store, roadmap_id: &str, actions: Vec<Node>) -> StateResponse<Roadmap> {
    let mut roadmap = require_draft(store, roadmap_id)?;
    roadmap
        .transition_to(RoadmapStatus::Active)
        .map_err(|e| StateError::InvalidTransition(e.to_string()))?;

    store
        .batch(|b| {
            for action in &actions {
                b.create(action)?;
            }
            b.update(&roadmap)
        })
        .map_err(store_err)?;
    info!(%roadmap_id, action_count = actions.len(), "Roadmap activated");
    Ok(roadmap)
}

/// Writes a confirmed or rejected check-in if the stored one is still pending
fn apply_checkin(store: &mut Store, checkin: CheckIn, nodes: Vec<Node>) -> StateResponse<()> {
    let stored: CheckIn = store
        .get(&checkin.id)
        .map_err(store_err)?
        .ok_or_else(|| StateError::NotFound(format!("Check-in {}", checkin.id)))?;
    if stored.status.is_terminal() {
        debug!(id = %checkin.id, status = %stored.status, "apply_checkin: already terminal");
        return Err(StateError::InvalidTransition(format!(
            "check-in {} is already {}",
            checkin.id, stored.status
        )));
    }

    store
        .batch(|b| {
            for node in &nodes {
                b.update(node)?;
            }
            b.update(&checkin)
        })
        .map_err(store_err)
}

fn delete_roadmap(store: &mut Store, id: &str) -> StateResponse<bool> {
    store
        .batch(|b| {
            b.delete_by_index::<Node>("roadmap_id", IndexValue::from(id))?;
            b.delete_by_index::<CheckIn>("roadmap_id", IndexValue::from(id))?;
            b.delete::<Roadmap>(id)
        })
        .map_err(store_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GoalContext, NodeContent, ProposedUpdate};
    use tempfile::tempdir;

    fn skeleton(user: &str, conversation_id: Option<String>) -> (Roadmap, Vec<Node>) {
        let roadmap = Roadmap::new(user, conversation_id, GoalContext::new("Run a marathon"));
        let goal = Node::goal(&roadmap.id, NodeContent::new("Run a marathon"));
        let m1 = Node::milestone(&roadmap.id, &goal.id, 0, NodeContent::new("10k"));
        let m2 = Node::milestone(&roadmap.id, &goal.id, 1, NodeContent::new("Half"));
        (roadmap, vec![goal, m1, m2])
    }

    #[tokio::test]
    async fn test_conversation_messages_and_blueprint() {
        let temp = tempdir().unwrap();
        let manager = StateManager::spawn(temp.path()).unwrap();

        let conv = Conversation::new("alice", Some("Marathon".to_string()));
        let id = manager.create_conversation(conv).await.unwrap();

        let m1 = manager.append_message(&id, MessageRole::User, "hi").await.unwrap();
        let m2 = manager.append_message(&id, MessageRole::Assistant, "hello").await.unwrap();
        assert_eq!(m1.order, 1);
        assert_eq!(m2.order, 2);

        let messages = manager.list_messages(&id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hi");

        assert!(manager.get_blueprint(&id).await.unwrap().is_none());
        let bp = Blueprint {
            goal: Some("Run a marathon".to_string()),
            ..Default::default()
        };
        manager.update_blueprint(&id, bp.clone()).await.unwrap();
        manager.update_blueprint(&id, bp.clone()).await.unwrap();
        assert_eq!(manager.get_blueprint(&id).await.unwrap(), Some(bp));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_append_to_missing_conversation_fails() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let err = manager
            .append_message("conv-missing", MessageRole::User, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_conversation_cascades_and_unlinks() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let id = manager
            .create_conversation(Conversation::new("alice", None))
            .await
            .unwrap();
        manager.append_message(&id, MessageRole::User, "hi").await.unwrap();
        manager.update_blueprint(&id, Blueprint::default()).await.unwrap();

        let (roadmap, nodes) = skeleton("alice", Some(id.clone()));
        let roadmap_id = roadmap.id.clone();
        manager.save_skeleton(roadmap, nodes).await.unwrap();

        assert!(manager.delete_conversation(&id).await.unwrap());
        assert!(manager.get_conversation(&id).await.unwrap().is_none());
        assert!(manager.list_messages(&id).await.unwrap().is_empty());
        assert!(manager.get_blueprint(&id).await.unwrap().is_none());

        let roadmap = manager.get_roadmap(&roadmap_id).await.unwrap().unwrap();
        assert!(roadmap.conversation_id.is_none());
        assert!(manager.get_roadmap_by_conversation(&id).await.unwrap().is_none());

        assert!(!manager.delete_conversation(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_skeleton_replaces_nodes() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let (roadmap, nodes) = skeleton("alice", None);
        let roadmap_id = roadmap.id.clone();
        manager.save_skeleton(roadmap.clone(), nodes).await.unwrap();
        assert_eq!(manager.list_nodes(&roadmap_id).await.unwrap().len(), 3);

        let goal = Node::goal(&roadmap_id, NodeContent::new("Run a marathon"));
        let only = Node::milestone(&roadmap_id, &goal.id, 0, NodeContent::new("Just one"));
        manager.save_skeleton(roadmap, vec![goal, only]).await.unwrap();

        let nodes = manager.list_nodes(&roadmap_id).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().any(|n| n.label == "Just one"));
    }

    #[tokio::test]
    async fn test_update_milestones_keeps_goal() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let (roadmap, nodes) = skeleton("alice", None);
        let roadmap_id = roadmap.id.clone();
        let goal_id = nodes[0].id.clone();
        manager.save_skeleton(roadmap, nodes).await.unwrap();

        let replacement = vec![Node::milestone(&roadmap_id, &goal_id, 0, NodeContent::new("Edited"))];
        manager.update_milestones(&roadmap_id, replacement).await.unwrap();

        let nodes = manager.list_nodes(&roadmap_id).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().any(|n| n.id == goal_id));
        assert!(nodes.iter().any(|n| n.label == "Edited"));
    }

    #[tokio::test]
    async fn test_add_actions_activates_once() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let (roadmap, nodes) = skeleton("alice", None);
        let roadmap_id = roadmap.id.clone();
        let m1 = nodes[1].id.clone();
        manager.save_skeleton(roadmap, nodes).await.unwrap();

        let actions = vec![Node::action(&roadmap_id, &m1, 0, NodeContent::new("Buy shoes"))];
        let roadmap = manager.add_actions(&roadmap_id, actions).await.unwrap();
        assert_eq!(roadmap.status, RoadmapStatus::Active);

        let err = manager.add_actions(&roadmap_id, vec![]).await.unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition(_)));
        let err = manager.update_milestones(&roadmap_id, vec![]).await.unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition(_)));

        let stored = manager.get_roadmap(&roadmap_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RoadmapStatus::Active);
        assert_eq!(manager.list_nodes(&roadmap_id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_checkins_newest_first_and_apply() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let (roadmap, nodes) = skeleton("alice", None);
        let roadmap_id = roadmap.id.clone();
        let mut node = nodes[1].clone();
        manager.save_skeleton(roadmap, nodes).await.unwrap();

        let first = CheckIn::new(&roadmap_id, "first", vec![]);
        let mut second = CheckIn::new(&roadmap_id, "second", vec![ProposedUpdate::new(&node.id, 30, "x")]);
        manager.create_checkin(first).await.unwrap();
        manager.create_checkin(second.clone()).await.unwrap();

        let listed = manager.list_checkins(&roadmap_id).await.unwrap();
        assert_eq!(listed[0].user_input, "second");
        assert_eq!(listed[1].user_input, "first");

        node.apply_progress_delta(30);
        second.confirm(vec![]).unwrap();
        manager.apply_checkin(second.clone(), vec![node.clone()]).await.unwrap();

        let stored = manager.get_checkin(&second.id).await.unwrap().unwrap();
        assert!(stored.status.is_terminal());
        let nodes = manager.list_nodes(&roadmap_id).await.unwrap();
        assert_eq!(nodes.iter().find(|n| n.id == node.id).unwrap().progress, 30);
    }

    #[tokio::test]
    async fn test_save_skeleton_over_active_roadmap_fails() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let (roadmap, nodes) = skeleton("alice", Some("conv-1".to_string()));
        let roadmap_id = roadmap.id.clone();
        let stale = roadmap.clone();
        let m1 = nodes[1].id.clone();
        manager.save_skeleton(roadmap, nodes.clone()).await.unwrap();
        let actions = vec![Node::action(&roadmap_id, &m1, 0, NodeContent::new("Buy shoes"))];
        manager.add_actions(&roadmap_id, actions).await.unwrap();

        // A draft value read before activation must not overwrite it
        let err = manager.save_skeleton(stale, nodes).await.unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition(_)));
        let stored = manager.get_roadmap(&roadmap_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RoadmapStatus::Active);
        assert_eq!(manager.list_nodes(&roadmap_id).await.unwrap().len(), 4);

        let (second, second_nodes) = skeleton("alice", Some("conv-1".to_string()));
        let err = manager.save_skeleton(second, second_nodes).await.unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_apply_checkin_only_once() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let (roadmap, nodes) = skeleton("alice", None);
        let roadmap_id = roadmap.id.clone();
        let node = nodes[1].clone();
        manager.save_skeleton(roadmap, nodes).await.unwrap();

        let checkin = CheckIn::new(&roadmap_id, "ran", vec![ProposedUpdate::new(&node.id, 40, "x")]);
        manager.create_checkin(checkin.clone()).await.unwrap();

        let mut first = checkin.clone();
        first.confirm(vec![]).unwrap();
        let mut first_node = node.clone();
        first_node.apply_progress_delta(40);

        let mut second = checkin.clone();
        second.reject().unwrap();

        let (a, b) = tokio::join!(
            manager.apply_checkin(first, vec![first_node]),
            manager.apply_checkin(second, vec![])
        );
        assert!(a.is_ok());
        assert!(matches!(b, Err(StateError::InvalidTransition(_))));

        let stored = manager.get_checkin(&checkin.id).await.unwrap().unwrap();
        assert_eq!(stored.status, crate::domain::CheckInStatus::Confirmed);

        let err = manager.apply_checkin(CheckIn::new(&roadmap_id, "x", vec![]), vec![]).await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_roadmap_cascades() {
        let manager = StateManager::spawn_in_memory().unwrap();
        let (roadmap, nodes) = skeleton("alice", None);
        let roadmap_id = roadmap.id.clone();
        manager.save_skeleton(roadmap, nodes).await.unwrap();
        manager
            .create_checkin(CheckIn::new(&roadmap_id, "x", vec![]))
            .await
            .unwrap();

        assert!(manager.delete_roadmap(&roadmap_id).await.unwrap());
        assert!(manager.list_nodes(&roadmap_id).await.unwrap().is_empty());
        assert!(manager.list_checkins(&roadmap_id).await.unwrap().is_empty());
        assert!(manager.list_roadmaps("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_keeps_records() {
        let temp = tempdir().unwrap();
        let id = {
            let manager = StateManager::spawn(temp.path()).unwrap();
            let id = manager
                .create_conversation(Conversation::new("alice", None))
                .await
                .unwrap();
            manager.shutdown().await.unwrap();
            id
        };
        // Give the old actor a chance to drop its connection
        tokio::task::yield_now().await;

        let manager = StateManager::spawn(temp.path()).unwrap();
        let list = manager.list_conversations("alice").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, id);
    }
}
