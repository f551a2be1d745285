//! Chat session: readline loop around a conversation engine

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{debug, info};

use super::printer::activity_line;
use crate::conversation::{ConversationEngine, ConversationState};

/// Interactive chat for one conversation
pub struct ChatSession {
    engine: ConversationEngine,
}

impl ChatSession {
    pub fn new(engine: ConversationEngine) -> Self {
        Self { engine }
    }

    /// Start the conversation and run the prompt until it ends or the user quits
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome();

        self.engine.start().await?;
        self.wait_for_agent().await?;

        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;

        while !self.engine.state().is_terminal() {
            let readline = rl.readline(&format!("{} ", ">".bright_green()));

            match readline {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(input);

                    if input.starts_with('/') {
                        match self.handle_slash_command(input).await? {
                            SlashResult::Continue => continue,
                            SlashResult::Quit => break,
                        }
                    } else {
                        self.submit(input).await?;
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
                Err(err) => {
                    return Err(eyre::eyre!("Readline error: {}", err));
                }
            }
        }

        self.print_farewell();
        Ok(())
    }

    fn print_welcome(&self) {
        let session = self.engine.session();
        println!();
        println!(
            "{} {} {}",
            "taskpilot".bright_cyan().bold(),
            session.phase.label().bright_cyan(),
            format!("\"{}\"", session.name).bright_white()
        );
        println!("Output directory: {}", self.engine.config().output_dir.display());
        println!("Type {} for help, {} to leave", "/help".yellow(), "/quit".yellow());
        println!();
    }

    fn print_farewell(&self) {
        let session = self.engine.session();
        match self.engine.state() {
            ConversationState::Completed => {
                println!("Document: {}", session.document_path.bright_white());
            }
            ConversationState::Cancelled => {}
            _ => {
                println!(
                    "Session saved. Run {} to continue.",
                    format!("tp chat {} {}", session.phase, session.name).yellow()
                );
            }
        }
    }

    /// Wait until the agent finishes its turn; Ctrl-C cancels the conversation
    async fn wait_for_agent(&mut self) -> Result<()> {
        let interrupted = tokio::select! {
            result = self.engine.run_until_idle() => {
                result?;
                false
            }
            _ = tokio::signal::ctrl_c() => true,
        };
        if interrupted {
            info!("Interrupted while the agent was working");
            println!("^C");
            self.engine.cancel().await?;
        }
        Ok(())
    }

    async fn submit(&mut self, input: &str) -> Result<()> {
        debug!(len = input.len(), "ChatSession::submit: called");
        match self.engine.submit(input).await {
            Ok(()) => self.wait_for_agent().await,
            Err(e) => {
                if self.engine.state().is_terminal() {
                    return Err(e.into());
                }
                println!("{} {}", "!".yellow(), e);
                Ok(())
            }
        }
    }

    async fn handle_slash_command(&mut self, input: &str) -> Result<SlashResult> {
        let cmd = input.split_whitespace().next().unwrap_or("");

        match cmd {
            "/help" | "/h" => {
                self.print_help();
                Ok(SlashResult::Continue)
            }
            "/quit" | "/q" | "/exit" => Ok(SlashResult::Quit),
            "/approve" => {
                if let Err(e) = self.engine.approve().await {
                    println!("{} {}", "!".yellow(), e);
                }
                Ok(SlashResult::Continue)
            }
            "/cancel" => {
                self.engine.cancel().await?;
                Ok(SlashResult::Quit)
            }
            "/activity" => {
                self.print_activity();
                Ok(SlashResult::Continue)
            }
            _ => {
                println!("{} Unknown command: {}", "?".yellow(), cmd);
                println!("Type {} for available commands", "/help".yellow());
                Ok(SlashResult::Continue)
            }
        }
    }

    fn print_help(&self) {
        println!();
        println!("{}", "Available Commands:".bright_cyan());
        println!("  {:14} Show this help", "/help".yellow());
        println!("  {:14} Accept the reviewed document", "/approve".yellow());
        println!("  {:14} Abandon this session", "/cancel".yellow());
        println!("  {:14} Show what the agent has done", "/activity".yellow());
        println!("  {:14} Leave; the session can be resumed", "/quit".yellow());
        println!();
        println!("State: {}", self.engine.state().to_string().bright_white());
        println!();
    }

    fn print_activity(&self) {
        let timeline = self.engine.timeline();
        if timeline.is_empty() {
            println!("{}", "No activity yet.".dimmed());
            return;
        }
        println!();
        println!("{}", "Activity:".bright_cyan());
        for entry in timeline.entries() {
            println!("{}", activity_line(entry));
        }
        println!();
    }
}

/// Result of handling a slash command
enum SlashResult {
    Continue,
    Quit,
}
