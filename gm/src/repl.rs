//! Interactive discovery session

use std::io::{self, Write};

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tracing::debug;

use crate::discovery::{DiscoveryPipeline, PipelineEvent, TurnRequest, TurnState};
use crate::domain::{Blueprint, BlueprintField, HistoryEntry};

const EVENT_BUFFER: usize = 64;

enum SlashResult {
    Continue,
    Quit,
}

/// A readline loop feeding discovery turns, replies printed as they stream
pub struct DiscoverySession {
    pipeline: DiscoveryPipeline,
    user_id: Option<String>,
    conversation_id: Option<String>,
    /// Local copies; the pipeline reads them only for unpersisted turns
    history: Vec<HistoryEntry>,
    blueprint: Blueprint,
}

impl DiscoverySession {
    pub fn new(pipeline: DiscoveryPipeline, user_id: Option<String>, conversation_id: Option<String>) -> Self {
        debug!(?user_id, ?conversation_id, "DiscoverySession::new: called");
        Self {
            pipeline,
            user_id,
            conversation_id,
            history: Vec::new(),
            blueprint: Blueprint::default(),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome();
        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;

        loop {
            match rl.readline(&format!("{} ", ">".bright_green())) {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(input);

                    if input.starts_with('/') {
                        match self.handle_slash_command(input) {
                            SlashResult::Continue => continue,
                            SlashResult::Quit => break,
                        }
                    } else {
                        self.turn(input).await?;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => return Err(eyre::eyre!("Readline error: {}", err)),
            }
        }

        if let Some(ref id) = self.conversation_id {
            println!("Conversation saved as {}", id.bright_cyan());
        }
        println!("Goodbye!");
        Ok(())
    }

    fn print_welcome(&self) {
        println!("{}", "GoalMap discovery".bright_cyan().bold());
        match (&self.user_id, &self.conversation_id) {
            (None, _) => println!("{}", "Anonymous session, nothing is saved".dimmed()),
            (Some(_), Some(id)) => println!("{} {}", "Continuing".dimmed(), id),
            (Some(_), None) => println!("{}", "A conversation is created with your first message".dimmed()),
        }
        println!("{}", "Type /blueprint to see what has been captured, /quit to leave".dimmed());
        println!();
    }

    async fn turn(&mut self, message: &str) -> Result<()> {
        debug!(len = message.len(), "DiscoverySession::turn: called");
        let request = TurnRequest {
            conversation_id: self.conversation_id.clone(),
            user_id: self.user_id.clone(),
            message: message.to_string(),
            history: self.history.clone(),
            current_blueprint: Some(self.blueprint.clone()),
        };

        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let printer = async {
            while let Some(event) = rx.recv().await {
                match event {
                    PipelineEvent::Status { message, .. } => println!("{}", message.dimmed()),
                    PipelineEvent::Token { text, .. } => {
                        print!("{}", text);
                        let _ = io::stdout().flush();
                    }
                    PipelineEvent::BlueprintUpdate(update) => debug!(?update, "DiscoverySession::turn: blueprint changed"),
                    PipelineEvent::Error(body) => eprintln!("{} {}", "Error:".bright_red(), body.message),
                }
            }
        };
        let (outcome, ()) = tokio::join!(self.pipeline.run(request, tx), printer);
        println!();
        println!();

        if outcome.state == TurnState::Done {
            self.history.push(HistoryEntry::user(message));
            self.history.push(HistoryEntry::assistant(outcome.reply));
            self.blueprint = outcome.blueprint;
        }
        if outcome.conversation_id.is_some() {
            self.conversation_id = outcome.conversation_id;
        }
        Ok(())
    }

    fn handle_slash_command(&self, input: &str) -> SlashResult {
        match input {
            "/quit" | "/exit" | "/q" => SlashResult::Quit,
            "/blueprint" | "/bp" => {
                self.print_blueprint();
                SlashResult::Continue
            }
            other => {
                println!("Unknown command {}. Try /blueprint or /quit", other);
                SlashResult::Continue
            }
        }
    }

    fn print_blueprint(&self) {
        for field in BlueprintField::ALL {
            println!(
                "{:>12} {:>3}%  {}",
                field.as_str().bright_cyan(),
                self.blueprint.field_scores.get(field),
                self.blueprint.display_value(field)
            );
        }
        println!("{:>12}       {}", "uncertain".bright_yellow(), self.blueprint.display_uncertainties());
    }
}
