// src/remote.rs

use crate::clock::{DateWindow, Deadline};
use crate::config::GithubCredentials;
use crate::http::{send_with_retry, HttpError, HttpRequest, HttpResponse, HttpTransport, Method, RetryPolicy};
use crate::model::*;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const GITHUB_API: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

/// How remote collection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Collected,
    /// Nothing was collected; the run continues local-only
    Skipped(String),
    /// Some commits were collected before collection had to stop
    Partial(String),
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteStatus::Collected => write!(f, "collected"),
            RemoteStatus::Skipped(reason) => write!(f, "skipped ({reason})"),
            RemoteStatus::Partial(reason) => write!(f, "partial ({reason})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteOutcome {
    pub commits: Vec<CommitRecord>,
    pub status: RemoteStatus,
}

impl RemoteOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        RemoteOutcome { commits: Vec::new(), status: RemoteStatus::Skipped(reason.into()) }
    }
}

#[derive(Debug, Deserialize)]
struct ApiRepo {
    name: String,
    full_name: String,
    pushed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    html_url: String,
    commit: ApiCommitDetail,
}

#[derive(Debug, Deserialize)]
struct ApiCommitDetail {
    message: String,
    author: Option<ApiSignature>,
}

#[derive(Debug, Deserialize)]
struct ApiSignature {
    name: Option<String>,
    date: Option<String>,
}

/// Why a paged listing stopped early
enum FetchFailure {
    /// Abandon the whole remote collection
    Fatal(String),
    /// Stop, but keep whatever was already collected
    Interrupted(String),
    /// Only the current repository is affected
    Repository(String),
}

pub struct RemoteCommitFetcher {
    transport: Arc<dyn HttpTransport>,
    credentials: Option<GithubCredentials>,
    window: DateWindow,
    policy: RetryPolicy,
    deadline: Deadline,
    api_base: String,
}

impl RemoteCommitFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        credentials: Option<GithubCredentials>,
        window: DateWindow,
        policy: RetryPolicy,
        deadline: Deadline,
    ) -> Self {
        RemoteCommitFetcher {
            transport,
            credentials,
            window,
            policy,
            deadline,
            api_base: GITHUB_API.to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.to_string();
        self
    }

    /// Collects the account's commits inside the window. Never fails: every
    /// problem degrades to a skipped or partial outcome.
    pub fn fetch(&self) -> RemoteOutcome {
        let Some(credentials) = &self.credentials else {
            info!("GitHub credentials not configured, skipping remote commits");
            return RemoteOutcome::skipped("credentials not configured");
        };

        let repos = match self.active_repositories(credentials) {
            Ok(repos) => repos,
            Err(FetchFailure::Fatal(reason)) | Err(FetchFailure::Repository(reason)) => {
                warn!(%reason, "remote commit collection skipped");
                return RemoteOutcome::skipped(reason);
            }
            Err(FetchFailure::Interrupted(reason)) => {
                warn!(%reason, "remote commit collection interrupted");
                return RemoteOutcome::skipped(reason);
            }
        };
        debug!(repos = repos.len(), "repositories pushed inside the window");

        let mut commits = Vec::new();
        for repo in &repos {
            match self.repository_commits(credentials, repo, &mut commits) {
                Ok(()) => {}
                Err(FetchFailure::Repository(reason)) => {
                    warn!(repo = %repo.full_name, %reason, "skipping remote repository");
                }
                Err(FetchFailure::Fatal(reason)) => {
                    warn!(%reason, "remote commit collection skipped");
                    return RemoteOutcome::skipped(reason);
                }
                Err(FetchFailure::Interrupted(reason)) => {
                    warn!(%reason, collected = commits.len(), "remote commit collection interrupted");
                    return RemoteOutcome { commits, status: RemoteStatus::Partial(reason) };
                }
            }
        }

        info!(commits = commits.len(), "collected remote commits");
        RemoteOutcome { commits, status: RemoteStatus::Collected }
    }

    /// Pages through the user's repositories, newest push first, stopping
    /// at the first one last pushed before the window.
    fn active_repositories(&self, credentials: &GithubCredentials) -> Result<Vec<ApiRepo>, FetchFailure> {
        let mut repos = Vec::new();
        for page in 1.. {
            let url = format!(
                "{}/user/repos?per_page={PER_PAGE}&page={page}&sort=pushed&direction=desc",
                self.api_base
            );
            let batch: Vec<ApiRepo> = self.get_page(credentials, &url)?;
            let full_page = batch.len() == PER_PAGE;

            for repo in batch {
                if repo.pushed_at.is_some_and(|pushed| pushed < self.window.since) {
                    return Ok(repos);
                }
                repos.push(repo);
            }
            if !full_page {
                break;
            }
        }
        Ok(repos)
    }

    fn repository_commits(
        &self,
        credentials: &GithubCredentials,
        repo: &ApiRepo,
        out: &mut Vec<CommitRecord>,
    ) -> Result<(), FetchFailure> {
        let since = self.window.since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let until = self.window.until.to_rfc3339_opts(SecondsFormat::Secs, true);

        for page in 1.. {
            let url = format!(
                "{}/repos/{}/commits?author={}&since={since}&until={until}&per_page={PER_PAGE}&page={page}",
                self.api_base, repo.full_name, credentials.username
            );
            let batch: Vec<ApiCommit> = self.get_page(credentials, &url)?;
            let full_page = batch.len() == PER_PAGE;

            out.extend(batch.into_iter().filter_map(|c| to_record(c, &repo.name)).filter(|c| self.window.contains(&c.timestamp)));
            if !full_page {
                break;
            }
        }
        Ok(())
    }

    fn get_page<T: for<'de> Deserialize<'de>>(
        &self,
        credentials: &GithubCredentials,
        url: &str,
    ) -> Result<Vec<T>, FetchFailure> {
        let request = HttpRequest::new(Method::Get, url)
            .bearer(&credentials.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .timeout(Duration::from_secs(30));

        let response = match send_with_retry(self.transport.as_ref(), &request, &self.policy, &self.deadline) {
            Ok(response) => response,
            Err(HttpError::DeadlineExceeded) => return Err(FetchFailure::Interrupted("run deadline exceeded".into())),
            Err(e @ HttpError::RateLimited { .. }) => return Err(FetchFailure::Fatal(e.to_string())),
            Err(HttpError::Transport(e)) => return Err(FetchFailure::Fatal(format!("GitHub unreachable: {e}"))),
        };
        classify(&response)?;

        serde_json::from_value(response.body)
            .map_err(|e| FetchFailure::Repository(format!("unexpected response shape: {e}")))
    }
}

fn classify(response: &HttpResponse) -> Result<(), FetchFailure> {
    match response.status {
        s if (200..300).contains(&s) => Ok(()),
        401 => Err(FetchFailure::Fatal(format!("authentication failed: {}", response.error_message()))),
        // 409: repository is empty
        404 | 409 | 451 => Err(FetchFailure::Repository(response.error_message())),
        s => Err(FetchFailure::Repository(format!("HTTP {s}: {}", response.error_message()))),
    }
}

fn to_record(api: ApiCommit, repo_name: &str) -> Option<CommitRecord> {
    let author = api.commit.author?;
    let timestamp = DateTime::parse_from_rfc3339(author.date.as_deref()?).ok()?;
    Some(CommitRecord {
        hash: api.sha,
        author: author.name.unwrap_or_default(),
        timestamp,
        message: api.commit.message.lines().next().unwrap_or_default().to_string(),
        repository_name: repo_name.to_string(),
        files_changed: None,
        source: CommitSource::Remote,
        remote_url: Some(api.html_url),
    })
}
