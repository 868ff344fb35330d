//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

use tracing::debug;

pub const DISCOVERY_ANALYSIS: &str = include_str!("../../prompts/discovery-analysis.pmt");

pub const DISCOVERY_CHAT: &str = include_str!("../../prompts/discovery-chat.pmt");

pub const ROADMAP_PLANNER: &str = include_str!("../../prompts/roadmap-planner.pmt");

pub const ROADMAP_ACTIONS: &str = include_str!("../../prompts/roadmap-actions.pmt");

pub const ROADMAP_DIRECT_ACTIONS: &str = include_str!("../../prompts/roadmap-direct-actions.pmt");

pub const CHECKIN_ANALYSIS: &str = include_str!("../../prompts/checkin-analysis.pmt");

/// Every template name the application renders
pub const NAMES: [&str; 6] = [
    "discovery-analysis",
    "discovery-chat",
    "roadmap-planner",
    "roadmap-actions",
    "roadmap-direct-actions",
    "checkin-analysis",
];

/// Get the embedded prompt by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    debug!(%name, "get_embedded: called");
    match name {
        "discovery-analysis" => Some(DISCOVERY_ANALYSIS),
        "discovery-chat" => Some(DISCOVERY_CHAT),
        "roadmap-planner" => Some(ROADMAP_PLANNER),
        "roadmap-actions" => Some(ROADMAP_ACTIONS),
        "roadmap-direct-actions" => Some(ROADMAP_DIRECT_ACTIONS),
        "checkin-analysis" => Some(CHECKIN_ANALYSIS),
        _ => {
            debug!("get_embedded: no match found");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_is_embedded() {
        for name in NAMES {
            assert!(get_embedded(name).is_some(), "{name} missing");
        }
    }

    #[test]
    fn test_analysis_prompt_asks_for_json_shape() {
        let prompt = get_embedded("discovery-analysis").unwrap();
        assert!(prompt.contains("\"extracted\""));
        assert!(prompt.contains("\"uncertainties\""));
        assert!(prompt.contains("{{goal}}"));
    }

    #[test]
    fn test_checkin_prompt_mentions_updates() {
        assert!(get_embedded("checkin-analysis").unwrap().contains("\"updates\""));
    }

    #[test]
    fn test_get_embedded_unknown() {
        assert!(get_embedded("unknown-template").is_none());
    }
}
