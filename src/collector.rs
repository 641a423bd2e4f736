// src/collector.rs

use crate::clock::DateWindow;
use crate::model::*;
use chrono::{DateTime, FixedOffset, TimeZone};
use git2::{Commit, DiffOptions, ErrorCode, Oid, Repository};
use std::vec;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("cannot open repository: {0}")]
    Open(#[source] git2::Error),
    #[error("cannot walk history: {0}")]
    Walk(#[source] git2::Error),
}

/// How far a commit may be dated before the window and still not end the
/// walk. `Sort::TIME` is only as ordered as the committers' clocks; a commit
/// skewed into the past inside this slack is skipped, not treated as the end
/// of recent history.
const CLOCK_SKEW_SLACK_SECS: i64 = 24 * 60 * 60;

pub struct LocalCommitCollector {
    window: DateWindow,
}

impl LocalCommitCollector {
    pub fn new(window: DateWindow) -> Self {
        LocalCommitCollector { window }
    }

    /// Lazily yields the repository's commits inside the window, newest first.
    ///
    /// The revision walk runs up front (it only touches commit headers); the
    /// diff work for each commit happens as the iterator is advanced.
    pub fn history(&self, repo_ref: &RepositoryRef) -> Result<LocalHistory, CollectError> {
        let repo = Repository::open(&repo_ref.root_path).map_err(CollectError::Open)?;

        let mut oids = Vec::new();
        let mut revwalk = repo.revwalk().map_err(CollectError::Walk)?;
        match revwalk.push_head() {
            Ok(()) => {}
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                debug!(repo = %repo_ref.name, "repository has no commits yet");
                drop(revwalk);
                return Ok(LocalHistory::empty(repo, repo_ref.name.clone(), self.window));
            }
            Err(e) => return Err(CollectError::Walk(e)),
        }
        revwalk.set_sorting(git2::Sort::TIME).map_err(CollectError::Walk)?;

        let since = self.window.since.timestamp();
        let cutoff = since.saturating_sub(CLOCK_SKEW_SLACK_SECS);
        for oid in revwalk {
            let oid = oid.map_err(CollectError::Walk)?;
            let commit = repo.find_commit(oid).map_err(CollectError::Walk)?;
            let committed = commit.time().seconds();
            if committed < cutoff {
                break;
            }
            if committed < since {
                continue;
            }
            oids.push(oid);
        }

        Ok(LocalHistory {
            repo,
            repository_name: repo_ref.name.clone(),
            window: self.window,
            oids: oids.into_iter(),
        })
    }

    /// Collects every record from one repository. A broken repository
    /// contributes whatever was read before the failure and a warning.
    pub fn collect(&self, repo_ref: &RepositoryRef) -> Vec<CommitRecord> {
        let history = match self.history(repo_ref) {
            Ok(history) => history,
            Err(e) => {
                warn!(repo = %repo_ref.name, path = %repo_ref.root_path.display(), error = %e, "skipping repository");
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for record in history {
            match record {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(repo = %repo_ref.name, error = %e, "stopped reading repository history");
                    break;
                }
            }
        }
        debug!(repo = %repo_ref.name, commits = records.len(), "collected local commits");
        records
    }
}

pub struct LocalHistory {
    repo: Repository,
    repository_name: String,
    window: DateWindow,
    oids: vec::IntoIter<Oid>,
}

impl LocalHistory {
    fn empty(repo: Repository, repository_name: String, window: DateWindow) -> Self {
        LocalHistory { repo, repository_name, window, oids: Vec::new().into_iter() }
    }

    fn read(&self, oid: Oid) -> Result<Option<CommitRecord>, git2::Error> {
        let commit = self.repo.find_commit(oid)?;
        let author = commit.author();
        let Some(timestamp) = signature_time(&author.when()) else {
            return Ok(None);
        };
        if !self.window.contains(&timestamp) {
            return Ok(None);
        }

        Ok(Some(CommitRecord {
            hash: oid.to_string(),
            author: author.name().unwrap_or("Unknown").to_string(),
            timestamp,
            message: commit.summary().unwrap_or_default().to_string(),
            repository_name: self.repository_name.clone(),
            files_changed: Some(FilesChanged::Paths(changed_paths(&self.repo, &commit)?)),
            source: CommitSource::Local,
            remote_url: None,
        }))
    }
}

impl Iterator for LocalHistory {
    type Item = Result<CommitRecord, git2::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let oid = self.oids.next()?;
            match self.read(oid) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Author time with the offset the author recorded
fn signature_time(time: &git2::Time) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(time.offset_minutes() * 60)?;
    offset.timestamp_opt(time.seconds(), 0).single()
}

/// Paths touched by `commit` relative to its first parent
fn changed_paths(repo: &Repository, commit: &Commit) -> Result<Vec<String>, git2::Error> {
    let parent_tree = match commit.parent(0) {
        Ok(parent) => Some(parent.tree()?),
        Err(_) => None,
    };
    let current_tree = commit.tree()?;

    let mut diff_opts = DiffOptions::new();
    diff_opts.include_untracked(false);
    diff_opts.ignore_filemode(true);

    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&current_tree), Some(&mut diff_opts))?;
    let paths = diff
        .deltas()
        .filter_map(|delta| delta.new_file().path().or_else(|| delta.old_file().path()).map(|p| p.to_string_lossy().into_owned()))
        .collect();
    Ok(paths)
}


#[cfg(test)]
mod tests {
    use super::test_support::commit_at;
    use super::*;
    use chrono::{DateTime, Utc};
    use std::fs;
    use tempfile::TempDir;

    fn repo_ref(path: &std::path::Path, name: &str) -> RepositoryRef {
        RepositoryRef { root_path: path.to_path_buf(), name: name.to_string() }
    }

    fn window(since: &str, until: &str) -> DateWindow {
        DateWindow::new(
            DateTime::parse_from_rfc3339(since).unwrap().with_timezone(&Utc),
            DateTime::parse_from_rfc3339(until).unwrap().with_timezone(&Utc),
        )
        .unwrap()
    }

    #[test]
    fn collects_commits_inside_window_with_files() {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        let since = DateTime::parse_from_rfc3339("2024-03-05T00:00:00Z").unwrap().timestamp();
        commit_at(&repo, "old.txt", "old", "Too old", since - 1, 0);
        let at_since = commit_at(&repo, "src/a.rs", "a", "At the boundary", since, 0);
        commit_at(&repo, "src/b.rs", "b", "Add b\n\nLonger body", since + 3600, 120);

        let collector = LocalCommitCollector::new(window("2024-03-05T00:00:00Z", "2024-03-06T00:00:00Z"));
        let records = collector.collect(&repo_ref(tmp.path(), "repoA"));

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "Add b");
        assert_eq!(records[0].timestamp.offset().local_minus_utc(), 7200);
        assert_eq!(records[0].files_changed, Some(FilesChanged::Paths(vec!["src/b.rs".into()])));
        assert_eq!(records[1].hash, at_since.to_string());
        assert!(records.iter().all(|r| r.source == CommitSource::Local && r.repository_name == "repoA"));
    }

    #[test]
    fn skewed_child_does_not_hide_parents_in_window() {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        let since = DateTime::parse_from_rfc3339("2024-03-05T00:00:00Z").unwrap().timestamp();
        commit_at(&repo, "a.txt", "a", "Inside the window", since + 3600, 0);
        // committed afterwards on a machine whose clock ran two hours behind
        commit_at(&repo, "b.txt", "b", "Skewed clock", since - 7200, 0);

        let collector = LocalCommitCollector::new(window("2024-03-05T00:00:00Z", "2024-03-06T00:00:00Z"));
        let records = collector.collect(&repo_ref(tmp.path(), "repoA"));
        assert_eq!(records.iter().map(|r| r.message.as_str()).collect::<Vec<_>>(), vec!["Inside the window"]);
    }

    #[test]
    fn history_is_lazy_and_ordered() {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        let base = DateTime::parse_from_rfc3339("2024-03-05T09:00:00Z").unwrap().timestamp();
        for i in 0..3 {
            commit_at(&repo, &format!("f{i}.txt"), "x", &format!("c{i}"), base + i * 60, 0);
        }

        let collector = LocalCommitCollector::new(window("2024-03-05T00:00:00Z", "2024-03-06T00:00:00Z"));
        let mut history = collector.history(&repo_ref(tmp.path(), "r")).unwrap();
        assert_eq!(history.next().unwrap().unwrap().message, "c2");
        assert_eq!(history.count(), 2);
    }

    #[test]
    fn empty_repository_yields_nothing() {
        let tmp = TempDir::new().unwrap();
        Repository::init(tmp.path()).unwrap();
        let collector = LocalCommitCollector::new(window("2024-03-05T00:00:00Z", "2024-03-06T00:00:00Z"));
        assert!(collector.collect(&repo_ref(tmp.path(), "empty")).is_empty());
    }

    #[test]
    fn broken_repository_is_not_fatal() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join(".git/HEAD"), "garbage").unwrap();

        let collector = LocalCommitCollector::new(window("2024-03-05T00:00:00Z", "2024-03-06T00:00:00Z"));
        let broken = repo_ref(tmp.path(), "broken");
        assert!(collector.history(&broken).is_err());
        assert!(collector.collect(&broken).is_empty());
    }
}
