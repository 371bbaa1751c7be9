//! CLI interface for Wingman.
//!
//! Non-interactive subcommands over the persisted store, plus `watch`,
//! which runs the engine against the live journal directory. Arguments
//! in, structured output out; `RUST_LOG` controls diagnostic verbosity.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::engine::{Engine, EngineOptions};
use crate::model::{Event, EventPayload, ProjectionName};
use crate::reply::Responder;
use crate::storage::Storage;

/// Wingman — keep up with the game so you don't have to.
#[derive(Debug, Parser)]
#[command(name = "wingman", after_long_help = WORKFLOW_HELP)]
pub struct Cli {
    /// State store path. Defaults to `~/.wingman/state.sqlite`.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

const WORKFLOW_HELP: &str = r#"Workflow: ride along with a session
  1. wingman watch --journal ~/games/journals
     → tails the journal; type a line to talk to the assistant
  2. wingman status
     → prints what the engine currently believes (location, docking, cargo)
  3. wingman history -n 50
     → prints the most recent persisted events
  4. wingman reset
     → clears persisted history and projections"#;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Tail the journal directory and run the reply loop.
    ///
    /// Lines typed on stdin become user events; reply context prints to
    /// stdout. Runs until stdin closes.
    Watch {
        /// Journal directory to tail. Overrides the configured one.
        #[arg(long)]
        journal: Option<PathBuf>,
    },

    /// Print the most recent persisted events, most recent first.
    History {
        /// How many events to print.
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },

    /// Print the current value of every projection.
    Status,

    /// Clear persisted history and projections.
    Reset,
}

/// Executes a parsed command.
pub fn run(cli: Cli) -> Result<(), String> {
    let config = Config::load()?;
    let store_path = cli
        .store
        .or_else(|| config.store_path.clone())
        .or_else(Storage::default_path)
        .ok_or("could not determine a store path; pass --store")?;
    let storage = Storage::new(store_path).map_err(|e| format!("failed to open store: {e}"))?;

    match cli.command {
        Command::Watch { journal } => watch(&config, storage, journal),
        Command::History { count } => history(&storage, count),
        Command::Status => status(&storage),
        Command::Reset => reset(&storage),
    }
}

/// Prints reply context to stdout when a cycle triggers.
struct ConsoleResponder;

impl Responder for ConsoleResponder {
    fn respond(&self, _history: &[Event], new_events: &[Event]) {
        println!("── reply cycle ({} new events) ──", new_events.len());
        for event in new_events {
            println!("  {}", describe(event));
        }
    }
}

fn watch(config: &Config, storage: Storage, journal: Option<PathBuf>) -> Result<(), String> {
    let journal_dir = journal
        .or_else(|| config.journal_dir.clone())
        .ok_or("no journal directory: pass --journal or set journal-dir in config")?;

    let options = EngineOptions {
        journal_dir,
        journal_prefix: config.journal_prefix(),
        journal_suffix: config.journal_suffix(),
        poll_interval: config.poll_interval(),
        reply: config.reply_policy(),
    };
    let mut engine = Engine::new(options, storage, Arc::new(ConsoleResponder))
        .map_err(|e| format!("failed to start engine: {e}"))?;
    engine.start();

    println!("watching; type to talk, Ctrl-D to quit");
    for line in io::stdin().lock().lines() {
        let line = line.map_err(|e| format!("stdin error: {e}"))?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        engine
            .append(EventPayload::User { text: text.into() })
            .map_err(|e| format!("failed to record input: {e}"))?;
        // The console responder prints synchronously; the cycle is done.
        engine.reply_finished();
    }

    engine.stop();
    Ok(())
}

fn history(storage: &Storage, count: usize) -> Result<(), String> {
    let events = storage
        .recent_events(count)
        .map_err(|e| format!("failed to load history: {e}"))?;
    if events.is_empty() {
        println!("no events recorded");
        return Ok(());
    }
    for event in events {
        println!("{:>6}  {}  {}", event.seq, event.timestamp, describe(&event));
    }
    Ok(())
}

fn status(storage: &Storage) -> Result<(), String> {
    for name in ProjectionName::ALL {
        let loaded = storage
            .load_projection(name)
            .map_err(|e| format!("failed to load projection {}: {e}", name.as_str()))?;
        match loaded {
            Some(snapshot) => {
                let value = serde_json::to_string(&snapshot.value)
                    .map_err(|e| format!("failed to render {}: {e}", name.as_str()))?;
                println!("{:<14} {value}", name.as_str());
            }
            None => println!("{:<14} (not yet folded)", name.as_str()),
        }
    }
    Ok(())
}

fn reset(storage: &Storage) -> Result<(), String> {
    storage
        .clear_events()
        .map_err(|e| format!("failed to clear history: {e}"))?;
    storage
        .clear_projections()
        .map_err(|e| format!("failed to clear projections: {e}"))?;
    println!("history and projections cleared");
    Ok(())
}

/// One-line rendering of an event for terminal output.
fn describe(event: &Event) -> String {
    match &event.payload {
        EventPayload::Game { name, .. } => format!("game: {name}"),
        EventPayload::User { text } => format!("user: {text}"),
        EventPayload::Assistant { text } => format!("assistant: {text}"),
        EventPayload::AssistantCompleted => "assistant finished speaking".to_string(),
        EventPayload::Tool { request, .. } => format!("tool: {request}"),
        EventPayload::External { source, .. } => format!("external: {source}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::Timestamp;

    #[test]
    fn describe_is_terse() {
        let event = Event {
            seq: 1,
            timestamp: "2026-01-02T03:04:05Z".parse::<Timestamp>().unwrap(),
            payload: EventPayload::Game {
                name: "Docked".into(),
                data: serde_json::Value::Null,
            },
        };
        assert_eq!(describe(&event), "game: Docked");
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["wingman", "history", "-n", "5"]).unwrap();
        assert!(matches!(cli.command, Command::History { count: 5 }));

        let cli = Cli::try_parse_from(["wingman", "watch", "--journal", "/tmp/j"]).unwrap();
        assert!(matches!(cli.command, Command::Watch { journal: Some(_) }));
    }
}
