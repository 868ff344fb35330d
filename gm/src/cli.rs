//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::{NodeContent, ProposedUpdate};
use crate::roadmap::MilestoneEdit;

/// GoalMap - conversational goal discovery and roadmap planning
#[derive(Debug, Parser)]
#[command(
    name = "gm",
    about = "Discover a goal through chat, plan it as a roadmap, and check in on progress",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Store directory, overriding `storage.store-dir`
    #[arg(long, global = true, value_name = "DIR")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one discovery turn and print its SSE frames
    Chat {
        /// User id; without one the turn is not persisted
        #[arg(short, long)]
        user: Option<String>,

        /// Conversation to continue; a new one is created when missing
        #[arg(long)]
        conversation: Option<String>,

        message: String,
    },

    /// Interactive discovery session
    Discover {
        #[arg(short, long)]
        user: Option<String>,

        #[arg(long)]
        conversation: Option<String>,
    },

    /// Manage discovery conversations
    Conversation {
        #[command(subcommand)]
        command: ConversationCommand,
    },

    /// Plan and review roadmaps
    Roadmap {
        #[command(subcommand)]
        command: RoadmapCommand,
    },

    /// Report progress against a roadmap
    Checkin {
        #[command(subcommand)]
        command: CheckinCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConversationCommand {
    Create {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        title: Option<String>,
    },

    List {
        #[arg(short, long)]
        user: String,
    },

    /// Show messages and blueprint
    Show {
        #[arg(short, long)]
        user: String,

        id: String,
    },

    /// Delete with its messages and blueprint
    Delete {
        #[arg(short, long)]
        user: String,

        id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum RoadmapCommand {
    /// Plan goal and milestones from a conversation (draft)
    Skeleton {
        #[arg(short, long)]
        user: String,

        #[arg(long)]
        conversation: String,
    },

    /// Replace the milestones of a draft
    Edit {
        #[arg(short, long)]
        user: String,

        roadmap: String,

        /// Milestone as "label" or "label::details", in order; "id=ID::label" keeps an id
        #[arg(short, long = "milestone", required = true, value_parser = parse_milestone)]
        milestones: Vec<MilestoneEdit>,
    },

    /// Generate actions and activate the draft
    Actions {
        #[arg(short, long)]
        user: String,

        roadmap: String,
    },

    /// One-shot plan without review or persistence
    Generate {
        #[arg(short, long)]
        user: Option<String>,

        #[arg(long)]
        conversation: Option<String>,

        #[arg(short, long)]
        goal: Option<String>,
    },

    Show {
        #[arg(short, long)]
        user: String,

        roadmap: String,
    },

    List {
        #[arg(short, long)]
        user: String,
    },

    /// Delete with its nodes and check-ins
    Delete {
        #[arg(short, long)]
        user: String,

        roadmap: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum CheckinCommand {
    /// Propose progress updates for a free-text report
    Analyze {
        #[arg(short, long)]
        user: String,

        roadmap: String,

        text: String,
    },

    /// Apply the proposal, or the given updates instead
    Confirm {
        #[arg(short, long)]
        user: String,

        checkin: String,

        /// Update as "node:delta" or "node:delta:log entry"
        #[arg(long = "update", value_parser = parse_update)]
        updates: Vec<ProposedUpdate>,
    },

    Reject {
        #[arg(short, long)]
        user: String,

        checkin: String,
    },

    List {
        #[arg(short, long)]
        user: String,

        roadmap: String,
    },
}

/// `label`, `label::details` or `id=ID::label[::details]`
pub fn parse_milestone(s: &str) -> Result<MilestoneEdit, String> {
    let mut parts: Vec<&str> = s.split("::").map(str::trim).collect();
    let id = match parts.first().and_then(|p| p.strip_prefix("id=")) {
        Some(id) => {
            let id = id.trim().to_string();
            parts.remove(0);
            Some(id).filter(|i| !i.is_empty())
        }
        None => None,
    };
    let label = parts.first().copied().unwrap_or_default();
    if label.is_empty() {
        return Err(format!("milestone '{}' has no label", s));
    }
    let mut content = NodeContent::new(label);
    if let Some(details) = parts.get(1).filter(|d| !d.is_empty()) {
        content = content.with_details(*details);
    }
    Ok(MilestoneEdit { id, content })
}

/// `node:delta` or `node:delta:log entry`; the log may contain colons
pub fn parse_update(s: &str) -> Result<ProposedUpdate, String> {
    let mut parts = s.splitn(3, ':');
    let node_id = parts.next().map(str::trim).unwrap_or_default();
    if node_id.is_empty() {
        return Err(format!("update '{}' has no node id", s));
    }
    let delta = parts
        .next()
        .ok_or_else(|| format!("update '{}' has no delta", s))?
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("update '{}': bad delta: {}", s, e))?;
    let log_entry = parts.next().map(str::trim).unwrap_or_default();
    Ok(ProposedUpdate::new(node_id, delta, log_entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_milestone_forms() {
        let plain = parse_milestone("Run 10k").unwrap();
        assert_eq!(plain, MilestoneEdit::new(NodeContent::new("Run 10k")));

        let detailed = parse_milestone("Half marathon :: by June").unwrap();
        assert_eq!(detailed.content.details.as_deref(), Some("by June"));

        let kept = parse_milestone("id=ms-1::Full marathon").unwrap();
        assert_eq!(kept.id.as_deref(), Some("ms-1"));
        assert_eq!(kept.content.label, "Full marathon");

        assert!(parse_milestone("  ").is_err());
        assert!(parse_milestone("id=ms-1").is_err());
    }

    #[test]
    fn test_parse_update_forms() {
        assert_eq!(parse_update("n1:40").unwrap(), ProposedUpdate::new("n1", 40, ""));
        assert_eq!(
            parse_update("n1:-5:note: redo").unwrap(),
            ProposedUpdate::new("n1", -5, "note: redo")
        );
        assert!(parse_update("n1").is_err());
        assert!(parse_update("n1:lots").is_err());
        assert!(parse_update(":5").is_err());
    }

    #[test]
    fn test_store_flag_is_global() {
        let cli = Cli::try_parse_from(["gm", "conversation", "list", "--user", "alice", "--store", "/tmp/x"]).unwrap();
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/x")));
        assert!(matches!(
            cli.command,
            Command::Conversation {
                command: ConversationCommand::List { .. }
            }
        ));
    }
}
