// src/journal.rs

use crate::model::*;
use chrono::{Local, NaiveDate, TimeZone};
use std::collections::BTreeMap;
use std::fmt;

/// One line of a commit log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitLine {
    pub short_hash: String,
    pub message: String,
    pub author: String,
    /// Wall-clock time in the journal's zone, `HH:MM`
    pub time: String,
    pub files_changed: Option<usize>,
    pub url: Option<String>,
}

impl CommitLine {
    fn from_record<Tz: TimeZone>(record: &CommitRecord, tz: &Tz) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        CommitLine {
            short_hash: record.key().to_string(),
            message: record.message.clone(),
            author: record.author.clone(),
            time: record.timestamp.with_timezone(tz).format("%H:%M").to_string(),
            files_changed: record.files_changed.as_ref().map(FilesChanged::count),
            url: record.remote_url.clone(),
        }
    }

    pub fn text(&self) -> String {
        let mut text = format!("{}: {}", self.short_hash, self.message);
        if let Some(files) = self.files_changed.filter(|n| *n > 0) {
            text.push_str(&format!(" ({files} file{})", if files == 1 { "" } else { "s" }));
        }
        if !self.author.is_empty() {
            text.push_str(&format!(" by {}", self.author));
        }
        text.push_str(&format!(" at {}", self.time));
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySection {
    pub repository: String,
    pub commits: Vec<CommitLine>,
}

/// The content written to the journal page for one date
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub date: NaiveDate,
    pub summary_text: Option<String>,
    pub stats: DayStats,
    /// Commits seen in local repositories, one section per repository
    pub commit_log_sections: Vec<RepositorySection>,
    /// Commits only the hosting account knows about
    pub remote_commits: Vec<RepositorySection>,
    pub remote_page_id: Option<String>,
}

impl JournalEntry {
    pub fn from_bucket(bucket: &DayBucket, summary_text: Option<String>) -> Self {
        Self::from_bucket_in(bucket, summary_text, &Local)
    }

    /// Builds the entry with commit times shown in `tz`, which must be the
    /// zone the bucket's date was computed in.
    pub fn from_bucket_in<Tz: TimeZone>(bucket: &DayBucket, summary_text: Option<String>, tz: &Tz) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        let mut local: BTreeMap<&str, Vec<CommitLine>> = BTreeMap::new();
        let mut remote: BTreeMap<&str, Vec<CommitLine>> = BTreeMap::new();

        for record in bucket.chronological() {
            let target = if record.source.has_local() { &mut local } else { &mut remote };
            target
                .entry(record.repository_name.as_str())
                .or_default()
                .push(CommitLine::from_record(record, tz));
        }

        let sections = |map: BTreeMap<&str, Vec<CommitLine>>| -> Vec<RepositorySection> {
            map.into_iter()
                .map(|(repository, commits)| RepositorySection { repository: repository.to_string(), commits })
                .collect()
        };

        JournalEntry {
            date: bucket.date,
            summary_text: summary_text.filter(|s| !s.trim().is_empty()),
            stats: bucket.stats,
            commit_log_sections: sections(local),
            remote_commits: sections(remote),
            remote_page_id: None,
        }
    }

    pub fn title(&self) -> String {
        format!("Journal - {}", self.date.format("%Y-%m-%d"))
    }
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# {}", self.title())?;
        if let Some(summary) = &self.summary_text {
            writeln!(f, "\n{summary}")?;
        }
        writeln!(f)?;
        writeln!(f, "- Total commits: {}", self.stats.commit_count)?;
        writeln!(f, "- Repositories worked on: {}", self.stats.repo_count)?;
        writeln!(f, "- Files changed: {}", self.stats.files_changed_total)?;

        for section in &self.commit_log_sections {
            writeln!(f, "\n## {}", section.repository)?;
            for line in &section.commits {
                writeln!(f, "- {}", line.text())?;
            }
        }
        if !self.remote_commits.is_empty() {
            writeln!(f, "\n## GitHub")?;
            for section in &self.remote_commits {
                for line in &section.commits {
                    writeln!(f, "- [{}] {} <{}>", section.repository, line.text(), line.url.as_deref().unwrap_or("-"))?;
                }
            }
        }
        Ok(())
    }
}
