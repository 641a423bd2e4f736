// src/main.rs

use anyhow::Context;
use clap::Parser;
use dev_journal::cli::Args;
use dev_journal::http::{HttpTransport, ReqwestTransport, RetryPolicy};
use dev_journal::notion::NotionJournalStore;
use dev_journal::pipeline::{self, Services};
use dev_journal::summary::{OllamaSummarizer, SummaryProvider};
use dev_journal::sync::{JournalStore, MemoryJournalStore};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: dev_journal::config::Config) -> anyhow::Result<()> {
    let start_time = Instant::now();
    let policy = RetryPolicy { max_retries: config.max_retries, ..RetryPolicy::default() };
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new().context("cannot build HTTP client")?);

    let preview = Arc::new(MemoryJournalStore::new());
    let store: Arc<dyn JournalStore> = match &config.notion {
        Some(credentials) if !config.dry_run => {
            Arc::new(NotionJournalStore::connect(transport.clone(), credentials.clone(), policy))
        }
        _ => preview.clone(),
    };
    let summarizer = config.ollama.clone().map(|settings| {
        Arc::new(OllamaSummarizer::new(transport.clone(), settings)) as Arc<dyn SummaryProvider>
    });

    println!(
        "Collecting commits from {} to {}",
        config.window.since.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
        config.window.until.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
    );

    let services = Services { transport, store, summarizer };
    let report = pipeline::run(&config, &services).context("journal run aborted")?;

    if config.dry_run {
        for entry in preview.entries() {
            println!("{entry}");
        }
    }
    print!("{report}");
    println!("Total time: {:.2?}", start_time.elapsed());
    Ok(())
}
