//! Ref transport over the `git` CLI.
//!
//! Fetch/push go through the user's installed git so that their credential
//! helpers, SSH agent and remote configuration apply unchanged.

use std::path::Path;

use tracing::{debug, info};

use gitsmart_core::{GitsmartError, Result};

async fn run_git(repo_path: &Path, args: &[&str]) -> Result<std::process::Output> {
    debug!(?args, "transport: git");
    tokio::process::Command::new("git")
        .args(args)
        .current_dir(repo_path)
        .output()
        .await
        .map_err(|err| GitsmartError::unavailable(format!("cannot run git: {err}")))
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn missing_remote_ref(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("couldn't find remote ref") || lower.contains("could not find remote ref")
}

/// Tip of `refname` on `remote`, or `None` when the remote does not carry it.
pub async fn ls_remote(repo_path: &Path, remote: &str, refname: &str) -> Result<Option<String>> {
    let output = run_git(repo_path, &["ls-remote", remote, refname]).await?;
    if !output.status.success() {
        return Err(GitsmartError::unavailable(format!(
            "git ls-remote {remote} failed: {}",
            stderr_of(&output)
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .find(|(_, name)| *name == refname)
        .map(|(oid, _)| oid.to_string()))
}

/// Force-fetch `remote`'s `src` ref into the local tracking ref `dst`.
/// Returns `false` when the remote has no such ref yet.
pub async fn fetch_ref(repo_path: &Path, remote: &str, src: &str, dst: &str) -> Result<bool> {
    let refspec = format!("+{src}:{dst}");
    let output = run_git(repo_path, &["fetch", "--no-tags", remote, &refspec]).await?;
    if output.status.success() {
        info!(remote, src, dst, "transport: fetched");
        return Ok(true);
    }
    let stderr = stderr_of(&output);
    if missing_remote_ref(&stderr) {
        debug!(remote, src, "transport: remote has no such ref");
        return Ok(false);
    }
    Err(GitsmartError::unavailable(format!("git fetch {remote} failed: {stderr}")))
}

/// Push local `refname` to the same name on `remote`, fast-forward only.
/// A rejection means the remote moved since the last fetch and surfaces as
/// [`GitsmartError::AnchorConflict`] so the caller can pull and retry.
pub async fn push_ref(repo_path: &Path, remote: &str, refname: &str) -> Result<()> {
    let refspec = format!("{refname}:{refname}");
    let output = run_git(repo_path, &["push", "--porcelain", remote, &refspec]).await?;
    if output.status.success() {
        info!(remote, refname, "transport: pushed");
        return Ok(());
    }
    let stderr = stderr_of(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.contains("[rejected]") || stderr.contains("non-fast-forward") || stderr.contains("fetch first") {
        return Err(GitsmartError::AnchorConflict {
            anchor: refname.to_string(),
            detail: format!("remote {remote} moved; pull before pushing"),
        });
    }
    Err(GitsmartError::unavailable(format!("git push {remote} failed: {stderr}")))
}
