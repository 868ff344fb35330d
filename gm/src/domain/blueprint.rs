//! Blueprint domain type
//!
//! The structured goal-readiness record extracted from a discovery chat: five
//! free-text fields, planning-hint milestones, per-field confidence scores,
//! tips, and the list of open uncertainties. One Blueprint per Conversation.

use goalstore::{IndexValue, Record, now_ms};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Rendered in prompts for any field with no value
pub const NOT_SET: &str = "Not set";

/// A scored Blueprint field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlueprintField {
    Goal,
    Why,
    Timeline,
    Obstacles,
    Resources,
    Milestones,
}

impl BlueprintField {
    pub const ALL: [BlueprintField; 6] = [
        BlueprintField::Goal,
        BlueprintField::Why,
        BlueprintField::Timeline,
        BlueprintField::Obstacles,
        BlueprintField::Resources,
        BlueprintField::Milestones,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlueprintField::Goal => "goal",
            BlueprintField::Why => "why",
            BlueprintField::Timeline => "timeline",
            BlueprintField::Obstacles => "obstacles",
            BlueprintField::Resources => "resources",
            BlueprintField::Milestones => "milestones",
        }
    }

    /// Parse a field name as the model writes it
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl fmt::Display for BlueprintField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Confidence score 0-100 per field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldScores {
    pub goal: u8,
    pub why: u8,
    pub timeline: u8,
    pub obstacles: u8,
    pub resources: u8,
    pub milestones: u8,
}

impl FieldScores {
    pub fn get(&self, field: BlueprintField) -> u8 {
        match field {
            BlueprintField::Goal => self.goal,
            BlueprintField::Why => self.why,
            BlueprintField::Timeline => self.timeline,
            BlueprintField::Obstacles => self.obstacles,
            BlueprintField::Resources => self.resources,
            BlueprintField::Milestones => self.milestones,
        }
    }

    /// Set a score, clamped to 100
    pub fn set(&mut self, field: BlueprintField, score: u8) {
        let score = score.min(100);
        match field {
            BlueprintField::Goal => self.goal = score,
            BlueprintField::Why => self.why = score,
            BlueprintField::Timeline => self.timeline = score,
            BlueprintField::Obstacles => self.obstacles = score,
            BlueprintField::Resources => self.resources = score,
            BlueprintField::Milestones => self.milestones = score,
        }
    }

    /// Mean score across all fields
    pub fn average(&self) -> u8 {
        let total: u32 = BlueprintField::ALL.iter().map(|f| u32::from(self.get(*f))).sum();
        (total / BlueprintField::ALL.len() as u32) as u8
    }
}

/// Category of an uncertainty
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UncertaintyKind {
    Timeline,
    Resources,
    Goal,
    Obstacles,
    #[default]
    General,
}

impl UncertaintyKind {
    /// Parse a kind name; anything unrecognized is `General`
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "timeline" => UncertaintyKind::Timeline,
            "resources" => UncertaintyKind::Resources,
            "goal" => UncertaintyKind::Goal,
            "obstacles" => UncertaintyKind::Obstacles,
            _ => UncertaintyKind::General,
        }
    }
}

/// An ambiguous statement flagged during analysis
///
/// Entries are never removed; `resolved` only ever flips from false to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uncertainty {
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: UncertaintyKind,
    #[serde(default)]
    pub resolved: bool,
}

impl Uncertainty {
    pub fn new(text: impl Into<String>, kind: UncertaintyKind) -> Self {
        Self {
            text: text.into(),
            kind,
            resolved: false,
        }
    }

    /// Case-insensitive text comparison used for deduplication
    pub fn matches(&self, text: &str) -> bool {
        normalize(&self.text) == normalize(text)
    }
}

pub(crate) fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Goal readiness record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Blueprint {
    pub goal: Option<String>,
    pub why: Option<String>,
    pub timeline: Option<String>,
    pub obstacles: Option<String>,
    pub resources: Option<String>,
    /// Free-text planning hints, not roadmap nodes
    pub milestones: Vec<String>,
    pub field_scores: FieldScores,
    pub readiness_tips: Vec<String>,
    pub success_tips: Vec<String>,
    pub uncertainties: Vec<Uncertainty>,
}

impl Blueprint {
    /// Value of a text field; `Milestones` has no single text value
    pub fn text_field(&self, field: BlueprintField) -> Option<&str> {
        match field {
            BlueprintField::Goal => self.goal.as_deref(),
            BlueprintField::Why => self.why.as_deref(),
            BlueprintField::Timeline => self.timeline.as_deref(),
            BlueprintField::Obstacles => self.obstacles.as_deref(),
            BlueprintField::Resources => self.resources.as_deref(),
            BlueprintField::Milestones => None,
        }
    }

    pub(crate) fn set_text_field(&mut self, field: BlueprintField, value: String) {
        match field {
            BlueprintField::Goal => self.goal = Some(value),
            BlueprintField::Why => self.why = Some(value),
            BlueprintField::Timeline => self.timeline = Some(value),
            BlueprintField::Obstacles => self.obstacles = Some(value),
            BlueprintField::Resources => self.resources = Some(value),
            BlueprintField::Milestones => self.milestones = vec![value],
        }
    }

    /// Prompt rendering of a field, with the `Not set` sentinel for blanks
    pub fn display_value(&self, field: BlueprintField) -> String {
        match field {
            BlueprintField::Milestones if self.milestones.is_empty() => NOT_SET.to_string(),
            BlueprintField::Milestones => self.milestones.join(", "),
            _ => match self.text_field(field) {
                Some(v) if !v.trim().is_empty() => v.to_string(),
                _ => NOT_SET.to_string(),
            },
        }
    }

    /// Fields whose score is below `threshold`
    pub fn missing_fields(&self, threshold: u8) -> Vec<BlueprintField> {
        let missing: Vec<_> = BlueprintField::ALL
            .into_iter()
            .filter(|f| self.field_scores.get(*f) < threshold)
            .collect();
        debug!(threshold, ?missing, "Blueprint::missing_fields: called");
        missing
    }

    pub fn unresolved_uncertainties(&self) -> impl Iterator<Item = &Uncertainty> {
        self.uncertainties.iter().filter(|u| !u.resolved)
    }

    /// Comma-joined unresolved uncertainty texts, or the literal "None"
    pub fn display_uncertainties(&self) -> String {
        let texts: Vec<_> = self.unresolved_uncertainties().map(|u| u.text.as_str()).collect();
        if texts.is_empty() { "None".to_string() } else { texts.join(", ") }
    }
}

/// Partial Blueprint carried by a `blueprint_update` event
///
/// Only changed fields are present. `field_scores` and the tip lists are sent
/// whole when they change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueprintUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub why: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obstacles: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestones: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_scores: Option<FieldScores>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness_tips: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_tips: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uncertainties: Option<Vec<Uncertainty>>,
}

impl BlueprintUpdate {
    /// Fields of `new` that differ from `old`
    pub fn between(old: &Blueprint, new: &Blueprint) -> Self {
        fn changed<T: PartialEq + Clone>(old: &T, new: &T) -> Option<T> {
            if old != new { Some(new.clone()) } else { None }
        }

        Self {
            goal: changed(&old.goal, &new.goal).flatten(),
            why: changed(&old.why, &new.why).flatten(),
            timeline: changed(&old.timeline, &new.timeline).flatten(),
            obstacles: changed(&old.obstacles, &new.obstacles).flatten(),
            resources: changed(&old.resources, &new.resources).flatten(),
            milestones: changed(&old.milestones, &new.milestones),
            field_scores: changed(&old.field_scores, &new.field_scores),
            readiness_tips: changed(&old.readiness_tips, &new.readiness_tips),
            success_tips: changed(&old.success_tips, &new.success_tips),
            uncertainties: changed(&old.uncertainties, &new.uncertainties),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Persisted Blueprint, keyed by its conversation id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintRecord {
    pub id: String,
    pub conversation_id: String,
    pub blueprint: Blueprint,
    pub created_at: i64,
    pub updated_at: i64,
}

impl BlueprintRecord {
    pub fn new(conversation_id: impl Into<String>, blueprint: Blueprint) -> Self {
        let conversation_id = conversation_id.into();
        debug!(%conversation_id, "BlueprintRecord::new: called");
        let now = now_ms();
        Self {
            id: conversation_id.clone(),
            conversation_id,
            blueprint,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn replace(&mut self, blueprint: Blueprint) {
        self.blueprint = blueprint;
        self.updated_at = now_ms();
    }
}

impl Record for BlueprintRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "blueprints"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert(
            "conversation_id".to_string(),
            IndexValue::String(self.conversation_id.clone()),
        );
        fields
    }
}
