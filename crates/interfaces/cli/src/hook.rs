use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::info;

use gitsmart_memory::Origin;
use gitsmart_runtime::{CaptureRequest, GitsmartRuntime, TriggerDecision};

use crate::interactive::{self, TerminalReviewer};
use crate::memory_cmds;

const HOOK_MARKER: &str = "gitsmart hook post-commit";

/// Body of the installed `post-commit` hook.  stdin is re-attached to the
/// terminal so the prompt can be answered; the hook never fails the commit.
const HOOK_SCRIPT: &str = "#!/bin/sh
# Installed by gitsmart. Prompts for a decision record after significant commits.
if [ -t 1 ] && [ -r /dev/tty ]; then
  exec < /dev/tty
fi
gitsmart hook post-commit || true
";

pub(crate) fn hook_path(git_dir: &Path) -> PathBuf {
    git_dir.join("hooks").join("post-commit")
}

pub(crate) fn is_installed(git_dir: &Path) -> bool {
    fs::read_to_string(hook_path(git_dir))
        .map(|body| body.contains(HOOK_MARKER))
        .unwrap_or(false)
}

/// Write the `post-commit` hook.  A hook gitsmart did not write is only
/// replaced with `force`.
pub(crate) fn install(git_dir: &Path, force: bool) -> Result<PathBuf> {
    let path = hook_path(git_dir);
    if let Ok(existing) = fs::read_to_string(&path) {
        if !existing.contains(HOOK_MARKER) && !force {
            bail!(
                "{} already exists and was not written by gitsmart; rerun with --force to replace it",
                path.display()
            );
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, HOOK_SCRIPT)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }

    info!(path = %path.display(), "hook installed");
    Ok(path)
}

/// Runs inside the hook.  Never returns an error for a routine commit.
pub(crate) async fn run_post_commit(runtime: &GitsmartRuntime) -> Result<()> {
    let (commit, score) = match runtime.on_commit("HEAD")? {
        TriggerDecision::NoAction { reason } => {
            info!(%reason, "post-commit: no action");
            return Ok(());
        }
        TriggerDecision::PromptDecision { commit, score, .. } => (commit, score),
    };

    if !interactive::can_prompt() {
        println!(
            "gitsmart: {} looks {} ({}). Record why with: gitsmart capture --commit {} \"...\"",
            commit.short_id(),
            score.level.label(),
            score.rationale(),
            commit.short_id()
        );
        return Ok(());
    }

    println!();
    println!("gitsmart: this commit looks {} ({:.2})", score.level.label(), score.score);
    println!("  {}", commit.summary());
    println!("  signals: {}", score.rationale());
    let content = interactive::prompt_line("Why was this change made? (empty to skip) ")?;
    if content.is_empty() {
        println!("skipped");
        return Ok(());
    }

    let request = CaptureRequest::new(content)
        .anchor(commit.id.clone())
        .origin(Origin::Automated);
    let outcome = runtime.capture(request, &mut TerminalReviewer).await?;
    memory_cmds::print_capture(&outcome);
    Ok(())
}
