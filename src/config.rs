// src/config.rs

use crate::clock::DateWindow;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingCredential(&'static str),

    #[error("no valid date window for DAYS_BACK={0}")]
    InvalidWindow(u32),

    #[error("no project paths configured (set PROJECT_PATHS)")]
    NoProjectPaths,

    #[error("none of the project paths is reachable: {0:?}")]
    NoReachableProjectPath(Vec<PathBuf>),

    #[error("{name} must be at least 1")]
    ZeroWorkers { name: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubCredentials {
    pub token: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotionCredentials {
    pub token: String,
    pub database_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OllamaSettings {
    pub url: String,
    pub model: String,
    pub timeout: Duration,
}

/// Everything a run needs, read once and handed to each component
#[derive(Debug, Clone)]
pub struct Config {
    pub project_paths: Vec<PathBuf>,
    pub window: DateWindow,
    pub max_depth: usize,
    pub github: Option<GithubCredentials>,
    /// `None` only in dry-run mode
    pub notion: Option<NotionCredentials>,
    pub ollama: Option<OllamaSettings>,
    pub workers: usize,
    pub sync_workers: usize,
    pub deadline: Duration,
    pub max_retries: u32,
    pub dry_run: bool,
}

/// Pairs two optional settings, treating blank values as absent
pub(crate) fn credential_pair(a: Option<String>, b: Option<String>) -> Option<(String, String)> {
    let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    Some((clean(a)?, clean(b)?))
}

/// Keeps the configured roots that exist; errors if none do
pub(crate) fn reachable_paths(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>, ConfigError> {
    let paths: Vec<PathBuf> = paths
        .into_iter()
        .filter(|p| !p.as_os_str().is_empty())
        .collect();
    if paths.is_empty() {
        return Err(ConfigError::NoProjectPaths);
    }

    let (reachable, unreachable): (Vec<PathBuf>, Vec<PathBuf>) =
        paths.into_iter().partition(|p| p.is_dir());
    if reachable.is_empty() {
        return Err(ConfigError::NoReachableProjectPath(unreachable));
    }
    for path in &unreachable {
        tracing::warn!(path = %path.display(), "project path not reachable, ignoring");
    }
    Ok(reachable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn blank_credentials_count_as_missing() {
        assert_eq!(credential_pair(Some("a".into()), Some(" b ".into())), Some(("a".into(), "b".into())));
        assert_eq!(credential_pair(Some("a".into()), Some("  ".into())), None);
        assert_eq!(credential_pair(None, Some("b".into())), None);
    }

    #[test]
    fn unreachable_paths_are_dropped() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing");
        let kept = reachable_paths(vec![missing.clone(), tmp.path().to_path_buf()]).unwrap();
        assert_eq!(kept, vec![tmp.path().to_path_buf()]);

        assert_eq!(
            reachable_paths(vec![missing.clone()]),
            Err(ConfigError::NoReachableProjectPath(vec![missing]))
        );
        assert_eq!(reachable_paths(vec![PathBuf::new()]), Err(ConfigError::NoProjectPaths));
    }
}
