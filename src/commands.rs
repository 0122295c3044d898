use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::manager::DownloadManager;
use crate::pool::RunSummary;
use crate::status::StatusEvent;

const HELP: &str =
    "Commands: download <url> | <url> | pause | resume | cancel | clear | status | log | help | quit";

/// One line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Download(String),
    Pause,
    Resume,
    Cancel,
    Clear,
    Status,
    Log,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word.to_ascii_lowercase().as_str() {
            "download" | "get" => Command::Download(rest.to_string()),
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "cancel" => Command::Cancel,
            "clear" => Command::Clear,
            "status" => Command::Status,
            "log" | "history" => Command::Log,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ if rest.is_empty() && looks_like_url(word) => Command::Download(word.to_string()),
            _ => Command::Unknown(line.to_string()),
        }
    }
}

fn looks_like_url(word: &str) -> bool {
    word.starts_with("http://") || word.starts_with("https://")
}

/// Reads URLs from a tasks file, one per line. Blank lines and `#` comments are skipped.
pub async fn read_tasks_file(path: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open tasks file: {:?}", path))?;
    let mut lines = BufReader::new(file).lines();
    let mut urls = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let raw = line.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        urls.push(raw.to_string());
    }
    Ok(urls)
}

/// Applies one command. Returns `false` when the operator asked to quit.
pub async fn execute(manager: &DownloadManager, command: Command) -> bool {
    match command {
        Command::Download(url) => {
            // rejection is already on the status sink
            if let Err(e) = manager.download(&url) {
                debug!(error = %e, "download not queued");
            }
        }
        Command::Pause => manager.pause(),
        Command::Resume => manager.resume(),
        Command::Cancel => manager.cancel().await,
        Command::Clear => manager.clear(),
        Command::Status => {
            let summary = manager.summary();
            manager.publish(StatusEvent::info(format!(
                "Active: {} | Queued: {} | Paused: {} | {}",
                manager.active(),
                manager.queued(),
                manager.is_paused(),
                summary
            )));
        }
        Command::Log => {
            for line in manager.history() {
                println!("{}", line);
            }
        }
        Command::Help => manager.publish(StatusEvent::info(HELP)),
        Command::Quit => return false,
        Command::Empty => {}
        Command::Unknown(input) => {
            warn!(%input, "unrecognized command");
            manager.publish(StatusEvent::info(format!(
                "Unknown command: {}. {}",
                input, HELP
            )));
        }
    }
    true
}

/// Drives the manager from line-oriented input until `quit` or end of input,
/// then waits for queued work to finish.
pub async fn run_console<R>(manager: DownloadManager, input: R) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read command")? {
        if !execute(&manager, Command::parse(&line)).await {
            break;
        }
    }

    if manager.is_paused() {
        // queued work can only drain if transfers are allowed to move
        manager.resume();
    }
    Ok(manager.shutdown().await)
}
