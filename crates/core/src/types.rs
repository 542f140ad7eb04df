use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only view of one commit's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    pub message: String,
    pub author: String,
    pub email: String,
    pub timestamp: DateTime<Utc>,
    pub parent_count: usize,
}

impl CommitInfo {
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }

    /// First line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("").trim()
    }

    pub fn is_merge(&self) -> bool {
        self.parent_count > 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

/// Change footprint of a commit against its first parent (or the empty tree
/// for a root commit).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub changed_paths: Vec<String>,
    pub insertions: usize,
    pub deletions: usize,
    #[serde(default)]
    pub renames: Vec<Rename>,
}

impl DiffSummary {
    pub fn total_lines(&self) -> usize {
        self.insertions + self.deletions
    }

    /// Distinct first path segments; files at the repository root count as `(root)`.
    pub fn top_level_components(&self) -> BTreeSet<String> {
        self.changed_paths
            .iter()
            .map(|path| match path.split_once('/') {
                Some((head, _)) => head.to_string(),
                None => "(root)".to_string(),
            })
            .collect()
    }
}

/// Whole-repository overview used by status output and query prompts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStats {
    pub commit_count: usize,
    pub contributor_count: usize,
    pub age_days: i64,
    pub current_branch: String,
    pub file_count: usize,
    pub languages: BTreeMap<String, usize>,
    pub primary_language: Option<String>,
}

/// Condensed lineage of one path, most recent change first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHistory {
    pub path: String,
    pub exists: bool,
    pub created: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    pub total_commits: usize,
    pub authors: BTreeSet<String>,
    pub commits: Vec<CommitInfo>,
}

impl FileHistory {
    /// Summarise `commits` (most recent first) touching `path`.
    pub fn from_commits(path: &str, exists: bool, commits: Vec<CommitInfo>) -> Self {
        Self {
            path: path.to_string(),
            exists,
            created: commits.last().map(|c| c.timestamp),
            last_modified: commits.first().map(|c| c.timestamp),
            total_commits: commits.len(),
            authors: commits.iter().map(|c| c.email.clone()).collect(),
            commits,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}
