mod cli;
mod commands;
mod control;
mod error;
mod manager;
mod naming;
mod pool;
mod settings;
mod status;
mod transfer;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tracing::{debug, info};

use crate::cli::Args;
use crate::manager::DownloadManager;
use crate::status::{ConsoleSink, JsonSink, StatusEvent, StatusSink};

fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over -v/-q; logs go to stderr so --json output stays clean
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    debug!(?args, "arguments parsed");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let settings = args.settings();
    let sink: Arc<dyn StatusSink> = if args.json {
        Arc::new(JsonSink::new(std::io::stdout()))
    } else {
        Arc::new(ConsoleSink::new())
    };

    let manager = DownloadManager::new(&settings, Arc::clone(&sink))?;

    let mut urls = args.urls.clone();
    if let Some(tasks_file) = &args.tasks_file {
        urls.extend(crate::commands::read_tasks_file(tasks_file).await?);
    }
    for url in &urls {
        // blank entries are reported on the sink and skipped
        if let Err(e) = manager.download(url) {
            debug!(error = %e, "initial request not queued");
        }
    }
    info!(queued = urls.len(), "initial requests submitted");

    let summary = if args.no_console {
        manager.shutdown().await
    } else {
        sink.publish(&StatusEvent::info(format!(
            "Saving to {}. Type 'help' for commands.",
            settings.download_dir.display()
        )));
        let stdin = BufReader::new(tokio::io::stdin());
        crate::commands::run_console(manager, stdin).await?
    };

    sink.publish(&StatusEvent::info(summary.to_string()));
    Ok(())
}
