// src/model.rs

use chrono::{DateTime, FixedOffset, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Number of leading hash characters that identify a commit across sources
pub const HASH_PREFIX_LEN: usize = 7;

/// Shortest abbreviation git accepts; shorter keys only ever match exactly
pub const MIN_HASH_PREFIX_LEN: usize = 4;

/// A local repository found during discovery
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryRef {
    /// Canonical path of the working tree root
    pub root_path: PathBuf,
    pub name: String,
}

/// Normalized commit identity shared by local and remote records.
///
/// Git tooling prints hashes at whatever length it likes (`abc1234`,
/// `abc1234def…`, upper case from some APIs). Every hash is trimmed,
/// lower-cased and cut to [`HASH_PREFIX_LEN`] characters before it is used
/// as a key, so all of those spellings compare equal.
///
/// A source may also hand over a hash shorter than the prefix (`abc123`).
/// Such a key still names the same commit as any longer key it prefixes,
/// see [`HashKey::matches`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashKey(String);

impl HashKey {
    pub fn from_hash(hash: &str) -> Self {
        let normalized: String = hash
            .trim()
            .chars()
            .take(HASH_PREFIX_LEN)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        HashKey(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shorter than the canonical prefix
    pub fn is_abbreviated(&self) -> bool {
        self.0.len() < HASH_PREFIX_LEN
    }

    /// Whether both keys identify the same commit: equal, or the shorter one
    /// (at least [`MIN_HASH_PREFIX_LEN`] long) is a prefix of the other.
    pub fn matches(&self, other: &HashKey) -> bool {
        let (short, long) = if self.0.len() <= other.0.len() { (self, other) } else { (other, self) };
        short == long || (short.0.len() >= MIN_HASH_PREFIX_LEN && long.0.starts_with(&short.0))
    }

    /// Abbreviations of this key that could have been stored for the same
    /// commit, longest first
    pub fn abbreviations(&self) -> impl Iterator<Item = HashKey> + '_ {
        let len = self.0.chars().count();
        (MIN_HASH_PREFIX_LEN..len).rev().map(move |n| HashKey(self.0.chars().take(n).collect()))
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a commit record was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitSource {
    Local,
    Remote,
    /// Seen in a local repository and on the hosting account
    Both,
}

impl CommitSource {
    pub fn has_local(self) -> bool {
        matches!(self, CommitSource::Local | CommitSource::Both)
    }

    pub fn has_remote(self) -> bool {
        matches!(self, CommitSource::Remote | CommitSource::Both)
    }

    pub fn union(self, other: CommitSource) -> CommitSource {
        if self == other {
            self
        } else {
            CommitSource::Both
        }
    }
}

/// Files touched by a commit. Local history knows the paths; some remote
/// listings only report a count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilesChanged {
    Count(usize),
    Paths(Vec<String>),
}

impl FilesChanged {
    pub fn count(&self) -> usize {
        match self {
            FilesChanged::Count(n) => *n,
            FilesChanged::Paths(paths) => paths.len(),
        }
    }
}

/// A single commit as reported by one (or, after merging, both) sources
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    pub hash: String,
    pub author: String,
    pub timestamp: DateTime<FixedOffset>,
    pub message: String,
    pub repository_name: String,
    pub files_changed: Option<FilesChanged>,
    pub source: CommitSource,
    pub remote_url: Option<String>,
}

impl CommitRecord {
    pub fn key(&self) -> HashKey {
        HashKey::from_hash(&self.hash)
    }

    /// Folds another observation of the same commit into this one.
    ///
    /// Fields present on either side survive. Where both sides carry a value
    /// the local observation wins, except for `remote_url` which only the
    /// remote side knows, and `hash` where the longest spelling is kept.
    pub fn merge(self, other: CommitRecord) -> CommitRecord {
        let (primary, secondary) = if !self.source.has_local() && other.source.has_local() {
            (other, self)
        } else {
            (self, other)
        };

        let hash = if secondary.hash.len() > primary.hash.len() {
            secondary.hash
        } else {
            primary.hash
        };
        let files_changed = match (primary.files_changed, secondary.files_changed) {
            (Some(FilesChanged::Count(_)), Some(paths @ FilesChanged::Paths(_))) => Some(paths),
            (Some(files), _) => Some(files),
            (None, files) => files,
        };

        CommitRecord {
            hash,
            author: non_empty_or(primary.author, secondary.author),
            timestamp: primary.timestamp,
            message: non_empty_or(primary.message, secondary.message),
            repository_name: non_empty_or(primary.repository_name, secondary.repository_name),
            files_changed,
            source: primary.source.union(secondary.source),
            remote_url: primary.remote_url.or(secondary.remote_url),
        }
    }

    pub fn files_changed_count(&self) -> usize {
        self.files_changed.as_ref().map_or(0, FilesChanged::count)
    }
}

fn non_empty_or(preferred: String, fallback: String) -> String {
    if preferred.trim().is_empty() {
        fallback
    } else {
        preferred
    }
}

/// Aggregate counters for one day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayStats {
    pub commit_count: usize,
    pub repo_count: usize,
    pub files_changed_total: usize,
}

/// Deduplicated commits attributed to one local calendar day
#[derive(Debug, Clone, PartialEq)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub commits: BTreeMap<HashKey, CommitRecord>,
    pub repositories: BTreeSet<String>,
    pub stats: DayStats,
}

impl DayBucket {
    pub fn new(date: NaiveDate) -> Self {
        DayBucket {
            date,
            commits: BTreeMap::new(),
            repositories: BTreeSet::new(),
            stats: DayStats::default(),
        }
    }

    /// Rebuilds `repositories` and `stats` from the current commit set
    pub fn recompute(&mut self) {
        self.repositories = self
            .commits
            .values()
            .map(|c| c.repository_name.clone())
            .collect();
        self.stats = DayStats {
            commit_count: self.commits.len(),
            repo_count: self.repositories.len(),
            files_changed_total: self.commits.values().map(CommitRecord::files_changed_count).sum(),
        };
    }

    /// Commits in chronological order
    pub fn chronological(&self) -> Vec<&CommitRecord> {
        let mut commits: Vec<&CommitRecord> = self.commits.values().collect();
        commits.sort_by_key(|c| c.timestamp);
        commits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str, source: CommitSource) -> CommitRecord {
        CommitRecord {
            hash: hash.to_string(),
            author: "Ada".to_string(),
            timestamp: DateTime::parse_from_rfc3339("2024-03-05T10:00:00+01:00").unwrap(),
            message: "Fix parser".to_string(),
            repository_name: "repoA".to_string(),
            files_changed: None,
            source,
            remote_url: None,
        }
    }

    #[test]
    fn hash_key_tolerates_length_and_case() {
        assert_eq!(HashKey::from_hash("abc1234"), HashKey::from_hash("ABC1234def5678"));
        assert_eq!(HashKey::from_hash("  abc1234\n").as_str(), "abc1234");
        assert_eq!(HashKey::from_hash("abc").as_str(), "abc");
        assert_ne!(HashKey::from_hash("abc1234"), HashKey::from_hash("abc1235"));
    }

    #[test]
    fn abbreviated_key_matches_longer_keys_it_prefixes() {
        let short = HashKey::from_hash("abc123");
        let long = HashKey::from_hash("abc123def");
        assert!(short.is_abbreviated());
        assert!(short.matches(&long));
        assert!(long.matches(&short));
        assert!(!short.matches(&HashKey::from_hash("abc124def")));
        // too short to be trusted as an abbreviation
        assert!(!HashKey::from_hash("abc").matches(&long));
        assert_eq!(
            long.abbreviations().map(|k| k.to_string()).collect::<Vec<_>>(),
            vec!["abc123", "abc12", "abc1"]
        );
    }

    #[test]
    fn merge_prefers_local_fields_and_keeps_remote_url() {
        let mut local = record("abc1234", CommitSource::Local);
        local.files_changed = Some(FilesChanged::Paths(vec!["src/lib.rs".into()]));
        let mut remote = record("abc1234ffee", CommitSource::Remote);
        remote.repository_name = "acct-repoA".to_string();
        remote.remote_url = Some("https://github.com/ada/repoA/commit/abc1234ffee".into());

        let merged = remote.merge(local);
        assert_eq!(merged.repository_name, "repoA");
        assert_eq!(merged.hash, "abc1234ffee");
        assert_eq!(merged.files_changed_count(), 1);
        assert_eq!(merged.source, CommitSource::Both);
        assert!(merged.remote_url.is_some());
    }

    #[test]
    fn merge_fills_empty_fields_from_either_side() {
        let mut local = record("abc1234", CommitSource::Local);
        local.message = String::new();
        let mut remote = record("abc1234", CommitSource::Remote);
        remote.message = "From the API".to_string();
        remote.files_changed = Some(FilesChanged::Count(3));

        let merged = local.merge(remote);
        assert_eq!(merged.message, "From the API");
        assert_eq!(merged.files_changed, Some(FilesChanged::Count(3)));
    }

    #[test]
    fn recompute_counts_distinct_repositories() {
        let mut bucket = DayBucket::new(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        let mut a = record("aaaaaaa", CommitSource::Local);
        a.files_changed = Some(FilesChanged::Count(2));
        let mut b = record("bbbbbbb", CommitSource::Local);
        b.repository_name = "repoB".to_string();
        b.files_changed = Some(FilesChanged::Paths(vec!["a".into(), "b".into(), "c".into()]));
        let c = record("ccccccc", CommitSource::Remote);
        for commit in [a, b, c] {
            bucket.commits.insert(commit.key(), commit);
        }

        bucket.recompute();
        assert_eq!(
            bucket.stats,
            DayStats { commit_count: 3, repo_count: 2, files_changed_total: 5 }
        );
    }
}
