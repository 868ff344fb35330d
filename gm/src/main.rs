//! GoalMap - conversational goal discovery and roadmap planning
//!
//! CLI entry point. Request/response commands print JSON; streaming commands
//! print SSE frames.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use eyre::{Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use goalmap::App;
use goalmap::cli::{CheckinCommand, Cli, Command, ConversationCommand, RoadmapCommand};
use goalmap::config::Config;
use goalmap::discovery::TurnRequest;
use goalmap::domain::GoalTree;
use goalmap::error::AppError;
use goalmap::repl::DiscoverySession;
use goalmap::roadmap::RoadmapEvent;
use goalmap::sse::{SseEncoder, SseEvent};

const EVENT_BUFFER: usize = 64;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("goalmap")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("goalmap.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(provider = %config.llm.provider, model = %config.llm.model, "GoalMap loaded config");

    let app = App::open(config, cli.store).context("Failed to start GoalMap")?;

    debug!(command = ?cli.command, "main: dispatching command");
    let result = match cli.command {
        Command::Chat {
            user,
            conversation,
            message,
        } => cmd_chat(&app, user, conversation, message).await,
        Command::Discover { user, conversation } => {
            let mut session = DiscoverySession::new(app.pipeline()?, user, conversation);
            session.run().await
        }
        Command::Conversation { command } => cmd_conversation(&app, command).await,
        Command::Roadmap { command } => cmd_roadmap(&app, command).await,
        Command::Checkin { command } => cmd_checkin(&app, command).await,
    };

    app.shutdown().await?;
    result
}

/// Print a JSON document, or the error body and a failure
fn emit<T: Serialize>(result: Result<T, AppError>) -> Result<()> {
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            debug!(error = %e, "emit: command failed");
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "error": e.body() }))?);
            Err(eyre::eyre!("{} ({})", e.public_message(), e.status_code()))
        }
    }
}

fn print_frame(encoder: &mut SseEncoder, event: SseEvent) {
    match encoder.encode(&event) {
        Ok(Some(frame)) => print!("{}", frame),
        Ok(None) => {}
        Err(e) => debug!(error = %e, "print_frame: failed to encode event"),
    }
}

/// Print a plan's events as SSE frames while it runs; a failure ends the
/// stream with an error event
async fn emit_roadmap(
    plan: impl Future<Output = Result<GoalTree, AppError>>,
    mut rx: mpsc::Receiver<RoadmapEvent>,
) -> Result<()> {
    let printer = async {
        let mut encoder = SseEncoder::new();
        while let Some(event) = rx.recv().await {
            print_frame(&mut encoder, SseEvent::from(event));
        }
        encoder
    };
    let (result, mut encoder) = tokio::join!(plan, printer);

    match result {
        Ok(tree) => {
            info!(roadmap_id = %tree.roadmap_id(), actions = tree.action_count(), "Roadmap stream finished");
            Ok(())
        }
        Err(e) => {
            print_frame(&mut encoder, SseEvent::Error(e.body()));
            Err(eyre::eyre!("{} ({})", e.public_message(), e.status_code()))
        }
    }
}

async fn cmd_chat(app: &App, user: Option<String>, conversation: Option<String>, message: String) -> Result<()> {
    debug!(?user, ?conversation, "cmd_chat: called");
    let pipeline = app.pipeline()?;
    let request = TurnRequest {
        conversation_id: conversation,
        user_id: user,
        message,
        ..Default::default()
    };

    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let printer = async {
        let mut encoder = SseEncoder::new();
        while let Some(event) = rx.recv().await {
            print_frame(&mut encoder, SseEvent::from(event));
        }
    };
    let (outcome, ()) = tokio::join!(pipeline.run(request, tx), printer);

    info!(state = ?outcome.state, conversation_id = ?outcome.conversation_id, "Chat turn finished");
    match outcome.error {
        Some(e) => Err(eyre::eyre!("{} ({})", e.public_message(), e.status_code())),
        None => Ok(()),
    }
}

async fn cmd_conversation(app: &App, command: ConversationCommand) -> Result<()> {
    debug!(?command, "cmd_conversation: called");
    let conversations = app.conversations();
    match command {
        ConversationCommand::Create { user, title } => emit(conversations.create(&user, title).await),
        ConversationCommand::List { user } => emit(conversations.list(&user).await),
        ConversationCommand::Show { user, id } => emit(conversations.get(&user, &id).await),
        ConversationCommand::Delete { user, id } => emit(
            conversations
                .delete(&user, &id)
                .await
                .map(|()| serde_json::json!({ "success": true })),
        ),
    }
}

async fn cmd_roadmap(app: &App, command: RoadmapCommand) -> Result<()> {
    debug!(?command, "cmd_roadmap: called");
    match command {
        RoadmapCommand::Skeleton { user, conversation } => emit(app.roadmaps()?.create_skeleton(&user, &conversation).await),
        RoadmapCommand::Edit {
            user,
            roadmap,
            milestones,
        } => emit(app.roadmaps()?.edit_milestones(&user, &roadmap, milestones).await),
        RoadmapCommand::Actions { user, roadmap } => {
            let service = app.roadmaps()?;
            let (tx, rx) = mpsc::channel(EVENT_BUFFER);
            emit_roadmap(service.stream_actions(&user, &roadmap, tx), rx).await
        }
        RoadmapCommand::Generate {
            user,
            conversation,
            goal,
        } => {
            let service = app.roadmaps()?;
            let (tx, rx) = mpsc::channel(EVENT_BUFFER);
            let plan = service.stream_roadmap(user.as_deref(), conversation.as_deref(), goal.as_deref(), tx);
            emit_roadmap(plan, rx).await
        }
        RoadmapCommand::Show { user, roadmap } => emit(
            app.roadmap_records()
                .get(&user, &roadmap)
                .await
                .map(|(roadmap, tree)| serde_json::json!({ "roadmap": roadmap, "tree": tree })),
        ),
        RoadmapCommand::List { user } => emit(app.roadmap_records().list(&user).await),
        RoadmapCommand::Delete { user, roadmap } => emit(
            app.roadmap_records()
                .delete(&user, &roadmap)
                .await
                .map(|()| serde_json::json!({ "success": true })),
        ),
    }
}

async fn cmd_checkin(app: &App, command: CheckinCommand) -> Result<()> {
    debug!(?command, "cmd_checkin: called");
    match command {
        CheckinCommand::Analyze { user, roadmap, text } => emit(app.checkins()?.analyze(&user, &roadmap, &text).await),
        CheckinCommand::Confirm { user, checkin, updates } => {
            emit(app.checkin_records().confirm(&user, &checkin, updates).await)
        }
        CheckinCommand::Reject { user, checkin } => emit(app.checkin_records().reject(&user, &checkin).await),
        CheckinCommand::List { user, roadmap } => emit(app.checkin_records().list(&user, &roadmap).await),
    }
}
