//! Extraction merger
//!
//! Folds one analysis result into a Blueprint. The model output is read into
//! a typed [`BlueprintPatch`] first, so every field transition is explicit,
//! then applied to a copy of the old Blueprint.

use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{Blueprint, BlueprintField, Uncertainty, UncertaintyKind};
use crate::llm::parse_json_output;

/// Everything one analysis pass wants to change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlueprintPatch {
    /// New text values; absent fields carry no new information
    pub extracted: Vec<(BlueprintField, String)>,
    pub milestones: Option<Vec<String>>,
    pub scores: Vec<(BlueprintField, u8)>,
    /// Replaces `readiness_tips` when present, even if empty
    pub tips: Option<Vec<String>>,
    pub success_tips: Option<Vec<String>>,
    pub uncertainties: Vec<Uncertainty>,
}

impl BlueprintPatch {
    /// Read a patch out of the analysis JSON, skipping anything malformed
    pub fn from_value(value: &Value) -> Self {
        debug!("BlueprintPatch::from_value: called");
        let mut patch = Self::default();

        if let Some(extracted) = value.get("extracted").and_then(Value::as_object) {
            for (key, raw) in extracted {
                let Some(field) = BlueprintField::parse(key) else {
                    debug!(%key, "BlueprintPatch::from_value: unknown extracted field");
                    continue;
                };
                if field == BlueprintField::Milestones {
                    patch.milestones = string_list(raw).filter(|list| !list.is_empty());
                } else if let Some(text) = text_value(raw) {
                    patch.extracted.push((field, text));
                }
            }
        }

        if let Some(scores) = value.get("scores").and_then(Value::as_object) {
            for (key, raw) in scores {
                match (BlueprintField::parse(key), score_value(raw)) {
                    (Some(field), Some(score)) => patch.scores.push((field, score)),
                    _ => debug!(%key, "BlueprintPatch::from_value: skipping score"),
                }
            }
        }

        patch.tips = value.get("tips").and_then(string_list);
        patch.success_tips = value.get("success_tips").and_then(string_list);

        if let Some(items) = value.get("uncertainties").and_then(Value::as_array) {
            patch.uncertainties = items.iter().filter_map(uncertainty_value).collect();
        }

        patch
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A usable text value: non-empty, and not the model writing "null"
fn text_value(raw: &Value) -> Option<String> {
    let text = match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(text_value)
            .collect::<Vec<_>>()
            .join(", "),
        _ => return None,
    };
    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(text)
    }
}

fn string_list(raw: &Value) -> Option<Vec<String>> {
    match raw {
        Value::Array(items) => Some(items.iter().filter_map(text_value).collect()),
        Value::String(_) => text_value(raw).map(|s| vec![s]),
        _ => None,
    }
}

fn score_value(raw: &Value) -> Option<u8> {
    let score = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Some(score.round().clamp(0.0, 100.0) as u8)
}

fn uncertainty_value(raw: &Value) -> Option<Uncertainty> {
    match raw {
        Value::String(_) => text_value(raw).map(|text| Uncertainty::new(text, UncertaintyKind::General)),
        Value::Object(obj) => {
            let text = obj.get("text").and_then(text_value)?;
            let kind = obj
                .get("type")
                .and_then(Value::as_str)
                .map(UncertaintyKind::parse)
                .unwrap_or_default();
            let resolved = obj.get("resolved").and_then(Value::as_bool).unwrap_or(false);
            Some(Uncertainty { text, kind, resolved })
        }
        _ => None,
    }
}

/// Apply a patch to a copy of `old`
pub fn apply(old: &Blueprint, patch: &BlueprintPatch) -> Blueprint {
    debug!(
        extracted = patch.extracted.len(),
        scores = patch.scores.len(),
        uncertainties = patch.uncertainties.len(),
        "apply: called"
    );
    let mut next = old.clone();

    for (field, text) in &patch.extracted {
        next.set_text_field(*field, text.clone());
    }
    if let Some(ref milestones) = patch.milestones {
        next.milestones = milestones.clone();
    }

    // Scores overwrite; the prompt owns the "never lower" policy
    for (field, score) in &patch.scores {
        next.field_scores.set(*field, *score);
    }

    if let Some(ref tips) = patch.tips {
        next.readiness_tips = tips.clone();
    }
    if let Some(ref tips) = patch.success_tips {
        next.success_tips = tips.clone();
    }

    for incoming in &patch.uncertainties {
        match next.uncertainties.iter_mut().find(|u| u.matches(&incoming.text)) {
            Some(existing) => {
                if incoming.resolved && !existing.resolved {
                    debug!(text = %existing.text, "apply: uncertainty resolved");
                    existing.resolved = true;
                }
            }
            None => next.uncertainties.push(incoming.clone()),
        }
    }

    next
}

/// Merge parsed model output into `old`
pub fn merge_value(old: &Blueprint, output: &Value) -> Blueprint {
    apply(old, &BlueprintPatch::from_value(output))
}

/// Merge raw model text into `old`; unparseable text leaves it unchanged
pub fn merge(old: &Blueprint, output: &str) -> Blueprint {
    debug!(output_len = output.len(), "merge: called");
    match parse_json_output(output) {
        Ok(value) => merge_value(old, &value),
        Err(e) => {
            warn!(error = %e, "merge: unparseable analysis output, keeping blueprint");
            old.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldScores;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_extracts_goal_and_score() {
        let old = Blueprint::default();
        let out = json!({
            "extracted": {"goal": "Become a backend engineer"},
            "scores": {"goal": 60}
        });
        let merged = merge_value(&old, &out);

        assert_eq!(merged.goal.as_deref(), Some("Become a backend engineer"));
        assert_eq!(merged.field_scores.goal, 60);
        let mut expected = old.clone();
        expected.goal = merged.goal.clone();
        expected.field_scores.goal = 60;
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_null_values_never_overwrite() {
        let old = Blueprint {
            goal: Some("Learn piano".to_string()),
            why: Some("Fun".to_string()),
            ..Default::default()
        };
        let out = json!({
            "extracted": {"goal": null, "why": "null", "timeline": "   ", "obstacles": "NULL"}
        });
        assert_eq!(merge_value(&old, &out), old);
    }

    #[test]
    fn test_score_overwrites_rather_than_accumulates() {
        let mut old = Blueprint::default();
        old.field_scores.goal = 80;
        let merged = merge_value(&old, &json!({"scores": {"goal": 40}}));
        assert_eq!(merged.field_scores.goal, 40);
    }

    #[test]
    fn test_scores_clamped_and_lenient() {
        let merged = merge_value(
            &Blueprint::default(),
            &json!({"scores": {"why": 150, "timeline": -5, "resources": "70", "obstacles": null, "budget": 50}}),
        );
        assert_eq!(merged.field_scores.why, 100);
        assert_eq!(merged.field_scores.timeline, 0);
        assert_eq!(merged.field_scores.resources, 70);
        assert_eq!(merged.field_scores.obstacles, 0);
    }

    #[test]
    fn test_uncertainty_dedup_resolves_existing() {
        let old = Blueprint {
            uncertainties: vec![Uncertainty::new("a", UncertaintyKind::Timeline)],
            ..Default::default()
        };
        let out = json!({"uncertainties": [{"text": "A", "type": "timeline", "resolved": true}]});
        let merged = merge_value(&old, &out);

        assert_eq!(merged.uncertainties.len(), 1);
        assert_eq!(merged.uncertainties[0].text, "a");
        assert!(merged.uncertainties[0].resolved);
    }

    #[test]
    fn test_uncertainties_appended_and_deduped_within_batch() {
        let out = json!({"uncertainties": [
            {"text": "Busy schedule", "type": "timeline"},
            {"text": " busy schedule ", "type": "timeline"},
            {"text": "Budget", "type": "money"},
            "Unclear target"
        ]});
        let merged = merge_value(&Blueprint::default(), &out);

        assert_eq!(merged.uncertainties.len(), 3);
        assert!(!merged.uncertainties[0].resolved);
        assert_eq!(merged.uncertainties[1].kind, UncertaintyKind::General);
        assert_eq!(merged.uncertainties[2].text, "Unclear target");
    }

    #[test]
    fn test_resolved_never_flips_back() {
        let mut resolved = Uncertainty::new("x", UncertaintyKind::Goal);
        resolved.resolved = true;
        let old = Blueprint {
            uncertainties: vec![resolved],
            ..Default::default()
        };
        let merged = merge_value(&old, &json!({"uncertainties": [{"text": "X", "resolved": false}]}));
        assert!(merged.uncertainties[0].resolved);
    }

    #[test]
    fn test_tips_replace_wholesale() {
        let old = Blueprint {
            readiness_tips: vec!["old".to_string()],
            success_tips: vec!["keep".to_string()],
            ..Default::default()
        };
        let merged = merge_value(&old, &json!({"tips": ["new one", "new two"]}));
        assert_eq!(merged.readiness_tips, vec!["new one", "new two"]);
        assert_eq!(merged.success_tips, vec!["keep"]);

        let cleared = merge_value(&merged, &json!({"tips": [], "success_tips": ["s"]}));
        assert!(cleared.readiness_tips.is_empty());
        assert_eq!(cleared.success_tips, vec!["s"]);
    }

    #[test]
    fn test_milestones_accept_list_or_string() {
        let merged = merge_value(
            &Blueprint::default(),
            &json!({"extracted": {"milestones": ["10k", "", "half"]}}),
        );
        assert_eq!(merged.milestones, vec!["10k", "half"]);

        let merged = merge_value(&merged, &json!({"extracted": {"milestones": []}}));
        assert_eq!(merged.milestones, vec!["10k", "half"]);

        let merged = merge_value(&merged, &json!({"extracted": {"milestones": "Full marathon"}}));
        assert_eq!(merged.milestones, vec!["Full marathon"]);
    }

    #[test]
    fn test_malformed_text_keeps_old() {
        let old = Blueprint {
            goal: Some("Keep me".to_string()),
            ..Default::default()
        };
        assert_eq!(merge(&old, "I could not analyze that, sorry"), old);
        assert_eq!(merge(&old, "{not json"), old);
    }

    #[test]
    fn test_fenced_output_is_merged() {
        let text = "```json\n{\"extracted\": {\"timeline\": \"6 months\"}}\n```";
        let merged = merge(&Blueprint::default(), text);
        assert_eq!(merged.timeline.as_deref(), Some("6 months"));
    }

    #[test]
    fn test_patch_from_empty_object_is_empty() {
        assert!(BlueprintPatch::from_value(&json!({})).is_empty());
        assert!(BlueprintPatch::from_value(&json!({"extracted": {"goal": null}, "scores": {}})).is_empty());
    }

    fn arb_text() -> impl Strategy<Value = Option<String>> {
        proptest::option::of("[a-zA-Z가-힣 ]{0,12}")
    }

    fn arb_blueprint() -> impl Strategy<Value = Blueprint> {
        (
            (arb_text(), arb_text(), arb_text(), arb_text(), arb_text()),
            proptest::collection::vec("[a-z]{1,6}", 0..3),
            proptest::array::uniform6(0u8..=100),
            proptest::collection::vec(("[a-z]{1,6}", any::<bool>()), 0..4),
        )
            .prop_map(|((goal, why, timeline, obstacles, resources), milestones, s, unc)| Blueprint {
                goal,
                why,
                timeline,
                obstacles,
                resources,
                milestones,
                field_scores: FieldScores {
                    goal: s[0],
                    why: s[1],
                    timeline: s[2],
                    obstacles: s[3],
                    resources: s[4],
                    milestones: s[5],
                },
                readiness_tips: vec![],
                success_tips: vec![],
                uncertainties: unc
                    .into_iter()
                    .map(|(text, resolved)| Uncertainty {
                        text,
                        kind: UncertaintyKind::General,
                        resolved,
                    })
                    .collect(),
            })
    }

    proptest! {
        #[test]
        fn prop_empty_output_changes_nothing(bp in arb_blueprint()) {
            prop_assert_eq!(merge_value(&bp, &json!({})), bp.clone());
            let nulls = json!({
                "extracted": {"goal": null, "why": null, "timeline": null, "obstacles": null, "resources": null},
                "scores": {"goal": null},
                "uncertainties": []
            });
            prop_assert_eq!(merge_value(&bp, &nulls), bp);
        }

        #[test]
        fn prop_uncertainties_never_lost(bp in arb_blueprint(), texts in proptest::collection::vec("[a-zA-Z]{1,6}", 0..5)) {
            let items: Vec<Value> = texts.iter().map(|t| json!({"text": t, "resolved": true})).collect();
            let merged = merge_value(&bp, &json!({"uncertainties": items}));
            prop_assert!(merged.uncertainties.len() >= bp.uncertainties.len());
            for old in &bp.uncertainties {
                prop_assert!(merged.uncertainties.iter().any(|u| u.text == old.text && (u.resolved || !old.resolved)));
            }
        }
    }
}
