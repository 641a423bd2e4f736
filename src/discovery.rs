// src/discovery.rs

use crate::model::RepositoryRef;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Marker whose presence makes a directory a repository. Worktrees and
/// submodules carry it as a file, regular clones as a directory.
const VCS_MARKER: &str = ".git";

/// Directories that never hold repositories worth walking into
const SKIPPED_DIRS: &[&str] = &["node_modules"];

pub struct RepositoryDiscoverer {
    max_depth: usize,
}

impl RepositoryDiscoverer {
    pub fn new(max_depth: usize) -> Self {
        RepositoryDiscoverer { max_depth }
    }

    /// Walks every root in order and returns each repository once, in the
    /// order it was first reached.
    pub fn discover(&self, roots: &[PathBuf]) -> Vec<RepositoryRef> {
        // Canonical roots of repositories already reported, so overlapping
        // roots and symlinked aliases yield one entry each.
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut repos = Vec::new();

        for root in roots {
            if let Err(e) = fs::metadata(root) {
                warn!(root = %root.display(), error = %e, "skipping unreachable project path");
                continue;
            }
            self.walk(root, &mut seen, &mut repos);
        }
        repos
    }

    fn walk(&self, root: &Path, seen: &mut HashSet<PathBuf>, repos: &mut Vec<RepositoryRef>) {
        let mut entries = WalkDir::new(root)
            .follow_links(true)
            .max_depth(self.max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped(e));

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.loop_ancestor().is_some() => {
                    debug!(error = %e, "symlink loop, not following");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "cannot read directory, skipping");
                    continue;
                }
            };
            if !entry.file_type().is_dir() || !entry.path().join(VCS_MARKER).exists() {
                continue;
            }

            // Repositories are leaves: nested clones and vendored checkouts
            // belong to the outer one.
            entries.skip_current_dir();

            let root_path = match fs::canonicalize(entry.path()) {
                Ok(path) => path,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "cannot resolve repository path");
                    continue;
                }
            };
            if !seen.insert(root_path.clone()) {
                continue;
            }
            let name = root_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| root_path.display().to_string());
            debug!(repo = %name, path = %root_path.display(), "found repository");
            repos.push(RepositoryRef { root_path, name });
        }
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mkrepo(path: &Path) {
        fs::create_dir_all(path.join(".git")).unwrap();
    }

    fn names(repos: &[RepositoryRef]) -> Vec<&str> {
        repos.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn finds_repositories_without_descending_into_them() {
        let tmp = TempDir::new().unwrap();
        mkrepo(&tmp.path().join("alpha"));
        mkrepo(&tmp.path().join("alpha/vendor/inner"));
        mkrepo(&tmp.path().join("group/beta"));
        fs::create_dir_all(tmp.path().join("plain/dir")).unwrap();

        let repos = RepositoryDiscoverer::new(6).discover(&[tmp.path().to_path_buf()]);
        assert_eq!(names(&repos), vec!["alpha", "beta"]);
    }

    #[test]
    fn root_that_is_a_repository_is_reported() {
        let tmp = TempDir::new().unwrap();
        mkrepo(tmp.path());
        let repos = RepositoryDiscoverer::new(6).discover(&[tmp.path().to_path_buf()]);
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].root_path, fs::canonicalize(tmp.path()).unwrap());
    }

    #[test]
    fn git_file_marker_counts() {
        let tmp = TempDir::new().unwrap();
        let worktree = tmp.path().join("wt");
        fs::create_dir_all(&worktree).unwrap();
        fs::write(worktree.join(".git"), "gitdir: /elsewhere/.git/worktrees/wt\n").unwrap();

        let repos = RepositoryDiscoverer::new(3).discover(&[tmp.path().to_path_buf()]);
        assert_eq!(names(&repos), vec!["wt"]);
    }

    #[test]
    fn depth_is_bounded() {
        let tmp = TempDir::new().unwrap();
        mkrepo(&tmp.path().join("a/b/c/deep"));
        assert!(RepositoryDiscoverer::new(2).discover(&[tmp.path().to_path_buf()]).is_empty());
        assert_eq!(RepositoryDiscoverer::new(4).discover(&[tmp.path().to_path_buf()]).len(), 1);
    }

    #[test]
    fn overlapping_roots_report_each_repository_once() {
        let tmp = TempDir::new().unwrap();
        mkrepo(&tmp.path().join("group/beta"));
        let roots = vec![tmp.path().to_path_buf(), tmp.path().join("group")];
        assert_eq!(names(&RepositoryDiscoverer::new(6).discover(&roots)), vec!["beta"]);
    }

    #[test]
    fn missing_root_is_skipped() {
        let tmp = TempDir::new().unwrap();
        mkrepo(&tmp.path().join("alpha"));
        let roots = vec![tmp.path().join("does-not-exist"), tmp.path().to_path_buf()];
        assert_eq!(names(&RepositoryDiscoverer::new(6).discover(&roots)), vec!["alpha"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycles_terminate() {
        let tmp = TempDir::new().unwrap();
        let loop_dir = tmp.path().join("loop");
        fs::create_dir_all(&loop_dir).unwrap();
        std::os::unix::fs::symlink(tmp.path(), loop_dir.join("back")).unwrap();
        mkrepo(&tmp.path().join("alpha"));

        let repos = RepositoryDiscoverer::new(50).discover(&[tmp.path().to_path_buf()]);
        assert_eq!(names(&repos), vec!["alpha"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_alias_is_reported_once() {
        let tmp = TempDir::new().unwrap();
        mkrepo(&tmp.path().join("alpha"));
        std::os::unix::fs::symlink(tmp.path().join("alpha"), tmp.path().join("zeta")).unwrap();

        let repos = RepositoryDiscoverer::new(6).discover(&[tmp.path().to_path_buf()]);
        assert_eq!(names(&repos), vec!["alpha"]);
    }

    #[test]
    fn hidden_root_is_walked_but_hidden_children_are_not() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join(".workspace");
        mkrepo(&root.join("alpha"));
        mkrepo(&root.join(".cache/beta"));
        mkrepo(&root.join("node_modules/pkg"));

        let repos = RepositoryDiscoverer::new(6).discover(&[root]);
        assert_eq!(names(&repos), vec!["alpha"]);
    }
}
