// src/pipeline.rs

use crate::aggregate::CommitAggregator;
use crate::clock::Deadline;
use crate::collector::LocalCommitCollector;
use crate::config::Config;
use crate::discovery::RepositoryDiscoverer;
use crate::http::{HttpTransport, RetryPolicy};
use crate::journal::JournalEntry;
use crate::model::*;
use crate::remote::{RemoteCommitFetcher, RemoteStatus};
use crate::summary::{summarize_or_skip, SummaryProvider};
use crate::sync::{JournalStore, JournalSynchronizer, StoreError, SyncOutcome};
use chrono::{Local, NaiveDate};
use indicatif::{ParallelProgressIterator, ProgressBar};
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_SUMMARY_BUDGET: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// External collaborators of a run
pub struct Services {
    pub transport: Arc<dyn HttpTransport>,
    pub store: Arc<dyn JournalStore>,
    pub summarizer: Option<Arc<dyn SummaryProvider>>,
}

#[derive(Debug)]
pub struct RunReport {
    pub repositories: usize,
    pub local_commits: usize,
    pub remote_commits: usize,
    pub remote_status: RemoteStatus,
    pub synced: Vec<(NaiveDate, SyncOutcome)>,
    pub failed: Vec<(NaiveDate, String)>,
}

impl RunReport {
    pub fn created(&self) -> usize {
        self.synced.iter().filter(|(_, o)| matches!(o, SyncOutcome::Created(_))).count()
    }

    pub fn updated(&self) -> usize {
        self.synced.iter().filter(|(_, o)| matches!(o, SyncOutcome::Updated(_))).count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Repositories scanned: {}", self.repositories)?;
        writeln!(f, "Local commits: {}", self.local_commits)?;
        writeln!(f, "Remote commits: {} ({})", self.remote_commits, self.remote_status)?;
        if self.synced.is_empty() && self.failed.is_empty() {
            writeln!(f, "No commits in the window, nothing to write.")?;
        }
        if !self.synced.is_empty() {
            writeln!(f, "Synchronized ({} created, {} updated):", self.created(), self.updated())?;
            for (date, outcome) in &self.synced {
                writeln!(f, "  {date}  {outcome}")?;
            }
        }
        if !self.failed.is_empty() {
            writeln!(f, "Failed:")?;
            for (date, reason) in &self.failed {
                writeln!(f, "  {date}  {reason}")?;
            }
        }
        Ok(())
    }
}

/// One complete pass: discover, collect, aggregate, summarize, write.
///
/// Only worker-pool setup can fail; every collection or write problem ends
/// up in the report instead.
pub fn run(config: &Config, services: &Services) -> Result<RunReport, RunError> {
    let deadline = Deadline::after(config.deadline);
    let policy = RetryPolicy { max_retries: config.max_retries, ..RetryPolicy::default() };

    let repos = RepositoryDiscoverer::new(config.max_depth).discover(&config.project_paths);
    info!(repos = repos.len(), "discovered repositories");

    let collector = LocalCommitCollector::new(config.window);
    let fetcher = RemoteCommitFetcher::new(
        services.transport.clone(),
        config.github.clone(),
        config.window,
        policy,
        deadline,
    );

    let collect_pool = rayon::ThreadPoolBuilder::new().num_threads(config.workers).build()?;
    let (local, remote) = collect_pool.install(|| {
        rayon::join(|| collect_local(&collector, &repos, &deadline), || fetcher.fetch())
    });
    info!(local = local.len(), remote = remote.commits.len(), "collection finished");

    let local_commits = local.len();
    let remote_commits = remote.commits.len();
    let tz = Local;
    let mut aggregator = CommitAggregator::new(tz);
    aggregator.extend(local);
    aggregator.extend(remote.commits);
    let buckets = aggregator.finish();
    info!(days = buckets.len(), "aggregated commits into days");

    let budget = config.ollama.as_ref().map_or(DEFAULT_SUMMARY_BUDGET, |o| o.timeout);
    let synchronizer = JournalSynchronizer::new(services.store.as_ref());
    let summarizer = services.summarizer.as_deref();

    let sync_pool = rayon::ThreadPoolBuilder::new().num_threads(config.sync_workers).build()?;
    let mut results: Vec<(NaiveDate, Result<SyncOutcome, StoreError>)> = sync_pool.install(|| {
        buckets
            .par_iter()
            .map(|(date, bucket)| {
                let summary = summarize_or_skip(summarizer, bucket, budget, &deadline);
                let mut entry = JournalEntry::from_bucket_in(bucket, summary, &tz);
                (*date, synchronizer.sync(&mut entry))
            })
            .collect()
    });
    results.sort_by_key(|(date, _)| *date);

    let mut synced = Vec::new();
    let mut failed = Vec::new();
    for (date, result) in results {
        match result {
            Ok(outcome) => synced.push((date, outcome)),
            Err(e) => {
                warn!(%date, error = %e, "failed to write journal page");
                failed.push((date, e.to_string()));
            }
        }
    }

    Ok(RunReport {
        repositories: repos.len(),
        local_commits,
        remote_commits,
        remote_status: remote.status,
        synced,
        failed,
    })
}

fn collect_local(collector: &LocalCommitCollector, repos: &[RepositoryRef], deadline: &Deadline) -> Vec<CommitRecord> {
    let bar = ProgressBar::new(repos.len() as u64);
    bar.set_message("Collecting commits");

    repos
        .par_iter()
        .progress_with(bar)
        .flat_map_iter(|repo| {
            if deadline.is_expired() {
                warn!(repo = %repo.name, "deadline passed, repository not scanned");
                return Vec::new();
            }
            collector.collect(repo)
        })
        .collect()
}
