//! Read-only view over repository history, plus the git CLI transport used to
//! move the notes ref between clones.
//!
//! Every call opens the repository afresh; nothing is cached between calls,
//! so results always reflect the current on-disk state.

mod history;
mod stats;
pub mod transport;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use gitsmart_core::{CommitInfo, GitsmartError, Result};

/// Bounded retry applied when libgit2 reports a held lock (another git
/// process is writing the same ref or index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Longest single wait between retries.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// `base * 2^attempt`, saturating and capped at [`MAX_BACKOFF`].
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
}

#[derive(Debug, Clone)]
pub struct RepoAccessor {
    git_dir: PathBuf,
    workdir: Option<PathBuf>,
    lock: LockPolicy,
}

impl RepoAccessor {
    /// Locate the repository containing `path` (walking up like `git` does).
    pub fn discover(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repo = git2::Repository::discover(path).map_err(|err| {
            GitsmartError::unavailable(format!(
                "no git repository at or above '{}': {}",
                path.display(),
                err.message()
            ))
        })?;
        Ok(Self {
            git_dir: repo.path().to_path_buf(),
            workdir: repo.workdir().map(Path::to_path_buf),
            lock: LockPolicy::default(),
        })
    }

    pub fn with_lock_policy(mut self, lock: LockPolicy) -> Self {
        self.lock = lock;
        self
    }

    /// The `.git` directory.
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Working tree root, or the git dir for bare repositories.
    pub fn root(&self) -> &Path {
        self.workdir.as_deref().unwrap_or(&self.git_dir)
    }

    /// Directory for unshared per-clone state (`.git/gitsmart`).
    pub fn local_state_dir(&self) -> PathBuf {
        self.git_dir.join(gitsmart_core::LOCAL_STATE_DIR)
    }

    pub fn open(&self) -> Result<git2::Repository> {
        git2::Repository::open(&self.git_dir).map_err(|err| {
            GitsmartError::unavailable(format!(
                "cannot open git repository at '{}': {}",
                self.git_dir.display(),
                err.message()
            ))
        })
    }

    /// Run `op` against a freshly opened repository, retrying with
    /// exponential backoff while libgit2 reports a held lock.
    pub fn with_repo<T>(
        &self,
        mut op: impl FnMut(&git2::Repository) -> std::result::Result<T, git2::Error>,
    ) -> Result<T> {
        let repo = self.open()?;
        let mut attempt = 0;
        loop {
            match op(&repo) {
                Ok(value) => return Ok(value),
                Err(err) if err.code() == git2::ErrorCode::Locked && attempt < self.lock.retries => {
                    let delay = backoff_delay(self.lock.backoff, attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "repository locked; backing off");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(map_git_error(err)),
            }
        }
    }

    /// Full id of the commit HEAD points at.
    pub fn current_head(&self) -> Result<String> {
        self.with_repo(|repo| {
            let head = repo.head()?;
            Ok(head.peel_to_commit()?.id().to_string())
        })
        .map_err(|err| match err {
            GitsmartError::NotFound(_) => GitsmartError::NotFound("HEAD has no commits yet".into()),
            other => other,
        })
    }

    /// Short branch name, `detached` when HEAD is not on a branch, or
    /// `unknown` for an unborn repository.
    pub fn current_branch(&self) -> Result<String> {
        let repo = self.open()?;
        let branch = match repo.head() {
            Ok(head) if head.is_branch() => head.shorthand().unwrap_or("unknown").to_string(),
            Ok(_) => "detached".to_string(),
            Err(err) if err.code() == git2::ErrorCode::UnbornBranch => "unknown".to_string(),
            Err(err) => return Err(map_git_error(err)),
        };
        Ok(branch)
    }

    /// `user.name` from git config, falling back to `$USER`.
    pub fn user_name(&self) -> String {
        self.open()
            .ok()
            .and_then(|repo| repo.config().ok())
            .and_then(|config| config.get_string("user.name").ok())
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Timestamp of the commit `id`, used to order records by anchor.
    pub fn commit_time(&self, id: &str) -> Result<DateTime<Utc>> {
        self.commit_info(id).map(|info| info.timestamp)
    }
}

/// libgit2 error → gitsmart taxonomy.  Missing objects and unresolvable
/// revspecs are ordinary `NotFound`; everything else means the repository
/// itself is not usable.
pub fn map_git_error(err: git2::Error) -> GitsmartError {
    match err.code() {
        git2::ErrorCode::NotFound
        | git2::ErrorCode::UnbornBranch
        | git2::ErrorCode::InvalidSpec
        | git2::ErrorCode::Ambiguous => GitsmartError::NotFound(err.message().to_string()),
        git2::ErrorCode::Locked => {
            GitsmartError::unavailable(format!("lock still held after retries: {}", err.message()))
        }
        _ => GitsmartError::unavailable(err.message()),
    }
}

/// `?`-friendly conversion for raw libgit2 results.
pub trait GitResultExt<T> {
    fn git(self) -> Result<T>;
}

impl<T> GitResultExt<T> for std::result::Result<T, git2::Error> {
    fn git(self) -> Result<T> {
        self.map_err(map_git_error)
    }
}

pub(crate) fn to_commit_info(commit: &git2::Commit<'_>) -> CommitInfo {
    let author = commit.author();
    let timestamp = DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_default();
    CommitInfo {
        id: commit.id().to_string(),
        message: commit.message().unwrap_or("").trim().to_string(),
        author: author.name().unwrap_or("unknown").to_string(),
        email: author.email().unwrap_or("").to_string(),
        timestamp,
        parent_count: commit.parent_count(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::commit_files;
    use tempfile::TempDir;

    #[test]
    fn discover_fails_outside_a_repository() {
        let dir = TempDir::new().unwrap();
        let err = RepoAccessor::discover(dir.path()).unwrap_err();
        assert!(matches!(err, GitsmartError::RepositoryUnavailable(_)));
    }

    #[test]
    fn head_of_unborn_repository_is_not_found() {
        let dir = TempDir::new().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        let accessor = RepoAccessor::discover(dir.path()).unwrap();
        assert!(accessor.current_head().unwrap_err().is_not_found());
        assert_eq!(accessor.current_branch().unwrap(), "unknown");
    }

    #[test]
    fn current_head_tracks_latest_commit() {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        commit_files(&repo, &[("a.txt", Some("one"))], "first", 1_000);
        let second = commit_files(&repo, &[("a.txt", Some("two"))], "second", 2_000);

        let accessor = RepoAccessor::discover(dir.path().join(".")).unwrap();
        assert_eq!(accessor.current_head().unwrap(), second.to_string());
        assert!(accessor.local_state_dir().ends_with(".git/gitsmart"));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_millis(50);
        assert_eq!(backoff_delay(base, 0), base);
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, 40), MAX_BACKOFF);
        assert_eq!(backoff_delay(Duration::MAX, u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn locked_operations_retry_then_surface_unavailable() {
        let dir = TempDir::new().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        let accessor = RepoAccessor::discover(dir.path()).unwrap().with_lock_policy(LockPolicy {
            retries: 2,
            backoff: Duration::from_millis(1),
        });

        let mut calls = 0;
        let err = accessor
            .with_repo(|_| -> std::result::Result<(), git2::Error> {
                calls += 1;
                Err(git2::Error::new(
                    git2::ErrorCode::Locked,
                    git2::ErrorClass::Reference,
                    "ref is locked",
                ))
            })
            .unwrap_err();
        assert_eq!(calls, 3);
        assert!(matches!(err, GitsmartError::RepositoryUnavailable(_)));

        let mut calls = 0;
        let value = accessor
            .with_repo(|_| {
                calls += 1;
                if calls < 2 {
                    Err(git2::Error::new(
                        git2::ErrorCode::Locked,
                        git2::ErrorClass::Reference,
                        "ref is locked",
                    ))
                } else {
                    Ok(42)
                }
            })
            .unwrap();
        assert_eq!(value, 42);
    }
}
