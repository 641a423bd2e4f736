// src/cli.rs

use crate::clock::DateWindow;
use crate::config::*;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Collects the day's commits from local repositories and GitHub and writes
/// one journal page per day to a Notion database.
///
/// Every option can also be supplied through the environment variable shown
/// next to it.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Notion integration token
    #[arg(long, env = "NOTION_TOKEN", hide_env_values = true)]
    pub notion_token: Option<String>,

    /// Id of the Notion database holding the journal
    #[arg(long, env = "NOTION_DATABASE_ID")]
    pub notion_database_id: Option<String>,

    /// GitHub token; remote commits are skipped without it
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// GitHub login whose commits are collected
    #[arg(long, env = "GITHUB_USERNAME")]
    pub github_username: Option<String>,

    /// Comma-separated directories to search for repositories
    #[arg(long, env = "PROJECT_PATHS", value_delimiter = ',')]
    pub project_paths: Vec<PathBuf>,

    /// Number of calendar days to cover, today included
    #[arg(long, env = "DAYS_BACK", default_value_t = 7)]
    pub days_back: u32,

    /// Summarize each day with a local Ollama model
    #[arg(long, env = "USE_OLLAMA")]
    pub use_ollama: bool,

    /// Ollama model used for summaries
    #[arg(long, env = "OLLAMA_MODEL", default_value = "llama3.2")]
    pub ollama_model: String,

    /// Ollama server address
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    pub ollama_url: String,

    /// Seconds one summary may take
    #[arg(long, default_value_t = 60)]
    pub summary_timeout_secs: u64,

    /// How many directory levels below each project path are searched
    #[arg(long, env = "JOURNAL_MAX_DEPTH", default_value_t = 6)]
    pub max_depth: usize,

    /// Worker threads for local collection [default: CPUs, at most 8]
    #[arg(long)]
    pub workers: Option<usize>,

    /// Days summarized and written concurrently
    #[arg(long, default_value_t = 2)]
    pub sync_workers: usize,

    /// Seconds after which collection stops and what was gathered is written
    #[arg(long, env = "JOURNAL_DEADLINE_SECS", default_value_t = 300)]
    pub deadline_secs: u64,

    /// Retries for rate-limited API calls
    #[arg(long, default_value_t = 4)]
    pub max_retries: u32,

    /// Print the journal entries instead of writing them to Notion
    #[arg(long)]
    pub dry_run: bool,
}

impl Args {
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let window = DateWindow::ending_now_local(self.days_back).ok_or(ConfigError::InvalidWindow(self.days_back))?;
        self.into_config_with_window(window)
    }

    pub(crate) fn into_config_with_window(self, window: DateWindow) -> Result<Config, ConfigError> {
        let notion = match credential_pair(self.notion_token, self.notion_database_id) {
            Some((token, database_id)) => Some(NotionCredentials { token, database_id }),
            None if self.dry_run => None,
            None => return Err(ConfigError::MissingCredential("NOTION_TOKEN / NOTION_DATABASE_ID")),
        };
        let github = credential_pair(self.github_token, self.github_username)
            .map(|(token, username)| GithubCredentials { token, username });
        let ollama = self.use_ollama.then(|| OllamaSettings {
            url: self.ollama_url.trim_end_matches('/').to_string(),
            model: self.ollama_model,
            timeout: Duration::from_secs(self.summary_timeout_secs),
        });

        let workers = self
            .workers
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(4, |n| n.get()).min(8));
        if workers == 0 {
            return Err(ConfigError::ZeroWorkers { name: "--workers" });
        }
        if self.sync_workers == 0 {
            return Err(ConfigError::ZeroWorkers { name: "--sync-workers" });
        }

        Ok(Config {
            project_paths: reachable_paths(self.project_paths)?,
            window,
            max_depth: self.max_depth,
            github,
            notion,
            ollama,
            workers,
            sync_workers: self.sync_workers,
            deadline: Duration::from_secs(self.deadline_secs),
            max_retries: self.max_retries,
            dry_run: self.dry_run,
        })
    }
}
