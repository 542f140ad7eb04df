//! Commit metadata, diffs and per-path lineage.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use gitsmart_core::{CommitInfo, DiffSummary, FileHistory, GitsmartError, Rename, Result};

use crate::{RepoAccessor, to_commit_info};

impl RepoAccessor {
    /// Metadata for the commit named by `rev` (full id, short id, ref name,
    /// `HEAD~2`, …).
    pub fn commit_info(&self, rev: &str) -> Result<CommitInfo> {
        self.with_repo(|repo| {
            let commit = repo.revparse_single(rev)?.peel_to_commit()?;
            Ok(to_commit_info(&commit))
        })
        .map_err(|err| match err {
            GitsmartError::NotFound(_) => GitsmartError::NotFound(format!("no commit named '{rev}'")),
            other => other,
        })
    }

    /// Change footprint of `rev` against its first parent, or the empty tree
    /// for a root commit.  Renames are detected by content similarity.
    pub fn diff_summary(&self, rev: &str) -> Result<DiffSummary> {
        self.with_repo(|repo| {
            let commit = repo.revparse_single(rev)?.peel_to_commit()?;
            let new_tree = commit.tree()?;
            let old_tree = match commit.parent(0) {
                Ok(parent) => Some(parent.tree()?),
                Err(_) => None,
            };

            let mut diff = repo.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), None)?;
            diff.find_similar(Some(git2::DiffFindOptions::new().renames(true)))?;
            let stats = diff.stats()?;

            let mut changed_paths = Vec::new();
            let mut renames = Vec::new();
            for delta in diff.deltas() {
                let old_path = delta.old_file().path().map(path_string);
                let new_path = delta.new_file().path().map(path_string);
                if delta.status() == git2::Delta::Renamed {
                    if let (Some(from), Some(to)) = (old_path.clone(), new_path.clone()) {
                        renames.push(Rename { from, to });
                    }
                }
                if let Some(path) = new_path.or(old_path) {
                    changed_paths.push(path);
                }
            }

            Ok(DiffSummary {
                changed_paths,
                insertions: stats.insertions(),
                deletions: stats.deletions(),
                renames,
            })
        })
    }

    /// Commits that changed `path` (file or directory), most recent first.
    /// A path with no history yields an empty vector.
    pub fn file_history(&self, path: &str, limit: Option<usize>) -> Result<Vec<CommitInfo>> {
        let rel = Path::new(path.trim_start_matches("./"));
        let limit = limit.unwrap_or(usize::MAX);
        let result = self.with_repo(|repo| {
            let mut revwalk = repo.revwalk()?;
            revwalk.push_head()?;
            revwalk.set_sorting(git2::Sort::TIME)?;

            let mut out = Vec::new();
            for oid in revwalk {
                if out.len() >= limit {
                    break;
                }
                let commit = repo.find_commit(oid?)?;
                let current = entry_id(&commit.tree()?, rel);
                let previous = match commit.parent(0) {
                    Ok(parent) => entry_id(&parent.tree()?, rel),
                    Err(_) => None,
                };
                if current != previous {
                    out.push(to_commit_info(&commit));
                }
            }
            Ok(out)
        });
        match result {
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    /// [`file_history`](Self::file_history) folded into a [`FileHistory`].
    pub fn file_summary(&self, path: &str, limit: Option<usize>) -> Result<FileHistory> {
        let commits = self.file_history(path, None)?;
        let exists = self.root().join(path).exists();
        let mut history = FileHistory::from_commits(path, exists, commits);
        if let Some(limit) = limit {
            history.commits.truncate(limit);
        }
        Ok(history)
    }

    /// Up to `count` commits reachable from HEAD, newest first.
    pub fn recent_commits(&self, count: usize) -> Result<Vec<CommitInfo>> {
        let result = self.with_repo(|repo| {
            let mut revwalk = repo.revwalk()?;
            revwalk.push_head()?;
            revwalk.set_sorting(git2::Sort::TIME)?;
            revwalk
                .take(count)
                .map(|oid| repo.find_commit(oid?).map(|c| to_commit_info(&c)))
                .collect::<std::result::Result<Vec<_>, _>>()
        });
        match result {
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    /// Lexical search over the last `window` commits' messages and changed
    /// paths.  An exact phrase hit outweighs word overlap, which outweighs a
    /// path hit.  Best match first; ties keep history order.
    pub fn search_commits(&self, query: &str, window: usize, max_results: usize) -> Result<Vec<CommitInfo>> {
        let needle = query.trim().to_lowercase();
        let query_words = words(&needle);
        if query_words.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored = Vec::new();
        for info in self.recent_commits(window)? {
            let paths = self.diff_summary(&info.id)?.changed_paths;
            let haystack = format!("{} {}", info.message, paths.join(" ")).to_lowercase();
            let haystack_words = words(&haystack);

            let mut score = 0usize;
            if haystack.contains(&needle) {
                score += 10;
            }
            score += 2 * query_words.intersection(&haystack_words).count();
            score += paths
                .iter()
                .filter(|p| {
                    let p = p.to_lowercase();
                    query_words.iter().any(|w| p.contains(w.as_str()))
                })
                .count();

            if score > 0 {
                scored.push((score, info));
            }
        }

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        debug!(query = %needle, hits = scored.len(), "repo: commit search");
        Ok(scored.into_iter().take(max_results).map(|(_, info)| info).collect())
    }
}

fn entry_id(tree: &git2::Tree<'_>, path: &Path) -> Option<git2::Oid> {
    tree.get_path(path).ok().map(|entry| entry.id())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}
