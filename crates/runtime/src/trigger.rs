//! Commit-time capture trigger.  Local work only: it must return before the
//! user notices the hook ran.

use tracing::{debug, info};

use gitsmart_core::{CommitInfo, DiffSummary, Result};
use gitsmart_memory::NotesStore;
use gitsmart_repo::RepoAccessor;

use crate::significance::{SignificanceDetector, SignificanceScore};

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerDecision {
    /// Ask the author for a decision record on `commit`.
    PromptDecision {
        commit: CommitInfo,
        diff: DiffSummary,
        score: SignificanceScore,
    },
    NoAction { reason: String },
}

impl TriggerDecision {
    pub fn should_prompt(&self) -> bool {
        matches!(self, Self::PromptDecision { .. })
    }
}

pub struct CaptureTrigger<'a> {
    repo: &'a RepoAccessor,
    store: &'a NotesStore,
    detector: &'a SignificanceDetector,
    enabled: bool,
}

impl<'a> CaptureTrigger<'a> {
    pub fn new(
        repo: &'a RepoAccessor,
        store: &'a NotesStore,
        detector: &'a SignificanceDetector,
        enabled: bool,
    ) -> Self {
        Self {
            repo,
            store,
            detector,
            enabled,
        }
    }

    pub fn on_commit(&self, rev: &str) -> Result<TriggerDecision> {
        if !self.enabled {
            return Ok(no_action("prompt_on_commit is disabled"));
        }

        let commit = self.repo.commit_info(rev)?;
        if commit.is_merge() {
            debug!(commit = commit.short_id(), "trigger: merge commit");
            return Ok(no_action("merge commit"));
        }

        let diff = self.repo.diff_summary(&commit.id)?;
        let score = self.detector.score(&commit, &diff);
        if !score.is_significant {
            debug!(commit = commit.short_id(), score = score.score, "trigger: routine");
            return Ok(no_action(format!("routine change ({:.2}: {})", score.score, score.rationale())));
        }

        if !self.store.get(&commit.id)?.is_empty() {
            return Ok(no_action("commit already has a decision record"));
        }

        info!(
            commit = commit.short_id(),
            score = score.score,
            level = score.level.label(),
            "trigger: prompting for a decision record"
        );
        Ok(TriggerDecision::PromptDecision { commit, diff, score })
    }
}

fn no_action(reason: impl Into<String>) -> TriggerDecision {
    TriggerDecision::NoAction { reason: reason.into() }
}
