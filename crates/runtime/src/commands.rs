use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use gitsmart_core::{CommitInfo, DiffSummary, FileHistory, RepoStats};
use gitsmart_memory::{InsertOutcome, MemoryRecord, Origin};

use crate::query::Answer;
use crate::significance::SignificanceScore;

/// Input to [`GitsmartRuntime::capture`](crate::GitsmartRuntime::capture).
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub content: String,
    /// Record kind label; `[capture] default_type` when absent.
    pub kind: Option<String>,
    pub tags: Vec<String>,
    /// Revision to anchor on; `HEAD` when absent.
    pub anchor: Option<String>,
    pub origin: Origin,
    /// Ask the provider for an enhancement.
    pub use_ai: bool,
    /// Reported on the outcome when AI was turned off for a reason the
    /// user did not choose.
    pub skip_reason: Option<String>,
}

impl CaptureRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: None,
            tags: Vec::new(),
            anchor: None,
            origin: Origin::Manual,
            use_ai: true,
            skip_reason: None,
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    pub fn anchor(mut self, rev: impl Into<String>) -> Self {
        self.anchor = Some(rev.into());
        self
    }

    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn without_ai(mut self) -> Self {
        self.use_ai = false;
        self
    }

    /// Like [`without_ai`](Self::without_ai), but the outcome notice says why.
    pub fn without_ai_because(mut self, reason: impl Into<String>) -> Self {
        self.use_ai = false;
        self.skip_reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub provider: String,
    pub model: String,
    pub key_configured: bool,
    pub notes_ref: String,
    pub remote: String,
    pub local_tip: Option<String>,
    pub remote_tip: Option<String>,
    /// Set when the remote could not be asked.
    pub remote_error: Option<String>,
    pub total_records: usize,
    pub records_by_kind: BTreeMap<String, usize>,
    pub last_activity: Option<DateTime<Utc>>,
    pub recent_decisions: Vec<MemoryRecord>,
    pub stats: RepoStats,
}

impl StatusReport {
    pub fn in_sync(&self) -> bool {
        self.local_tip == self.remote_tip
    }
}

#[derive(Debug, Clone)]
pub struct Explanation {
    pub history: FileHistory,
    pub records: Vec<MemoryRecord>,
    /// `None` when the path has no history to explain.
    pub answer: Option<Answer>,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub commit: CommitInfo,
    pub diff: DiffSummary,
    pub score: SignificanceScore,
    pub reasoning: String,
    /// Why the generic fallback text was used instead of a provider suggestion.
    pub notice: Option<String>,
    /// Absent for `--suggest-only`.
    pub stored: Option<(MemoryRecord, InsertOutcome)>,
}
