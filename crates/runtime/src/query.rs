//! Retrieval & query engine.
//!
//! ```text
//! list_all ─┐
//!           ├─▶ rank (lexical) ─▶ select_context (char budget) ─▶ provider ─▶ AnswerResult
//! recent ───┘
//! ```
//! The gathered context is returned with every result, answered or not, so
//! the evidence survives a provider outage.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use gitsmart_config::AppConfig;
use gitsmart_core::{CommitInfo, GitsmartError, ProviderError, Result};
use gitsmart_llm::{CompletionOptions, CompletionProvider, complete_with_retry};
use gitsmart_memory::retrieval::lexical_relevance_score;
use gitsmart_memory::{MemoryRecord, NotesStore, RankedRecord, rank_records, tokenize, truncate_str};
use gitsmart_repo::RepoAccessor;

use crate::prompt_builder;
use crate::significance::{SignificanceDetector, SignificanceScore};

const MESSAGE_WEIGHT: f32 = 0.7;
const PATHS_WEIGHT: f32 = 0.3;
/// Commits included when nothing in the window matches the question.
const FALLBACK_COMMITS: usize = 3;

/// A commit as the query engine sees it.  Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitFact {
    pub info: CommitInfo,
    pub changed_paths: Vec<String>,
    pub significance: SignificanceScore,
}

#[derive(Debug, Clone)]
pub struct RankedCommit {
    pub fact: CommitFact,
    pub score: f32,
}

/// What went into the prompt.
#[derive(Debug, Clone, Default)]
pub struct SelectedContext {
    pub records: Vec<MemoryRecord>,
    pub commits: Vec<CommitFact>,
    pub rendered: String,
}

impl SelectedContext {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.commits.is_empty()
    }

    pub fn sources(&self) -> Vec<Source> {
        self.records
            .iter()
            .map(|r| Source::Record {
                id: r.id.clone(),
                anchor: r.anchor.clone(),
            })
            .chain(self.commits.iter().map(|f| Source::Commit {
                id: f.info.id.clone(),
                summary: f.info.summary().to_string(),
            }))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Source {
    Record { id: String, anchor: String },
    Commit { id: String, summary: String },
}

impl Source {
    pub fn id(&self) -> &str {
        match self {
            Self::Record { id, .. } | Self::Commit { id, .. } => id,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Record { id, anchor } => format!("record {} on {}", &id[..id.len().min(12)], &anchor[..anchor.len().min(8)]),
            Self::Commit { id, summary } => format!("commit {}: {summary}", &id[..id.len().min(8)]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Synthesized(String),
    Unavailable { reason: ProviderError },
}

#[derive(Debug, Clone)]
pub struct AnswerResult {
    pub question: String,
    pub answer: Answer,
    pub sources: Vec<Source>,
    /// Rendered evidence handed (or that would have been handed) to the provider.
    pub context: String,
}

impl AnswerResult {
    pub fn text(&self) -> Option<&str> {
        match &self.answer {
            Answer::Synthesized(text) => Some(text),
            Answer::Unavailable { .. } => None,
        }
    }

    /// The synthesized answer, or `QueryUnavailable` carrying the context.
    pub fn require_answer(self) -> Result<String> {
        match self.answer {
            Answer::Synthesized(text) => Ok(text),
            Answer::Unavailable { reason } => Err(GitsmartError::QueryUnavailable {
                reason,
                context: self.context,
            }),
        }
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.id().to_string()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub top_k: usize,
    pub max_context_chars: usize,
    pub window: usize,
    pub timeout: Duration,
    pub options: CompletionOptions,
}

impl QuerySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            top_k: config.query.top_k.max(1),
            max_context_chars: config.query.max_context_chars,
            window: config.query.recent_commit_window,
            timeout: Duration::from_secs(config.llm.timeout_secs.max(1)),
            options: CompletionOptions::from_config(config),
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

pub struct QueryEngine<'a> {
    store: &'a NotesStore,
    repo: &'a RepoAccessor,
    detector: &'a SignificanceDetector,
    provider: Option<&'a dyn CompletionProvider>,
    settings: QuerySettings,
}

impl<'a> QueryEngine<'a> {
    pub fn new(
        store: &'a NotesStore,
        repo: &'a RepoAccessor,
        detector: &'a SignificanceDetector,
        provider: Option<&'a dyn CompletionProvider>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            store,
            repo,
            detector,
            provider,
            settings,
        }
    }

    pub async fn answer(&self, question: &str) -> Result<AnswerResult> {
        let records = self.store.list_all()?.collect::<Result<Vec<_>>>()?;
        let facts = self.recent_facts()?;
        debug!(records = records.len(), commits = facts.len(), "query: candidates");

        let ranked_records = rank_records(&records, question, self.settings.top_k);
        let mut ranked_commits = rank_commits(&facts, question, self.settings.top_k);
        if ranked_commits.is_empty() && ranked_records.is_empty() {
            ranked_commits = facts
                .iter()
                .take(FALLBACK_COMMITS)
                .map(|fact| RankedCommit {
                    fact: fact.clone(),
                    score: 0.0,
                })
                .collect();
        }

        let context = select_context(
            &ranked_records,
            &ranked_commits,
            self.settings.top_k,
            self.settings.max_context_chars,
        );
        let sources = context.sources();
        info!(
            records = context.records.len(),
            commits = context.commits.len(),
            "query: context selected"
        );

        let answer = match self.provider {
            None => Answer::Unavailable {
                reason: ProviderError::Unknown("no AI provider configured".to_string()),
            },
            Some(provider) => {
                let stats = self.repo.repo_stats().ok();
                let prompt = prompt_builder::query_prompt(question, &context, stats.as_ref());
                let options = self.settings.options.clone().with_system(prompt_builder::QUERY_SYSTEM);
                match complete_with_retry(provider, &prompt, &options, self.settings.timeout).await {
                    Ok(text) if !text.trim().is_empty() => Answer::Synthesized(text.trim().to_string()),
                    Ok(_) => Answer::Unavailable {
                        reason: ProviderError::Unknown("provider returned an empty answer".to_string()),
                    },
                    Err(reason) => {
                        warn!(error = %reason, "query: provider unavailable; returning raw context");
                        Answer::Unavailable { reason }
                    }
                }
            }
        };

        Ok(AnswerResult {
            question: question.trim().to_string(),
            answer,
            sources,
            context: context.rendered,
        })
    }

    /// The last `window` commits as facts; an empty history is an empty list.
    fn recent_facts(&self) -> Result<Vec<CommitFact>> {
        let commits = match self.repo.recent_commits(self.settings.window) {
            Ok(commits) => commits,
            Err(err) if err.is_not_found() => Vec::new(),
            Err(err) => return Err(err),
        };
        commits
            .into_iter()
            .map(|info| {
                let diff = self.repo.diff_summary(&info.id)?;
                let significance = self.detector.score(&info, &diff);
                Ok(CommitFact {
                    info,
                    changed_paths: diff.changed_paths,
                    significance,
                })
            })
            .collect()
    }
}

/// Rank commit facts by term overlap with the message (0.7) and changed
/// paths (0.3).  Zero scores are dropped; ties keep history order.
pub fn rank_commits(facts: &[CommitFact], question: &str, limit: usize) -> Vec<RankedCommit> {
    let terms = tokenize(question);
    if terms.is_empty() {
        return Vec::new();
    }
    let mut ranked: Vec<RankedCommit> = facts
        .iter()
        .filter_map(|fact| {
            let score = score_commit(fact, &terms);
            (score > 0.0).then(|| RankedCommit {
                fact: fact.clone(),
                score,
            })
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(limit);
    ranked
}

fn score_commit(fact: &CommitFact, terms: &BTreeSet<String>) -> f32 {
    let message = lexical_relevance_score(&fact.info.message, terms);
    let paths = lexical_relevance_score(&fact.changed_paths.join(" "), terms);
    message * MESSAGE_WEIGHT + paths * PATHS_WEIGHT
}

/// Fill the context block up to `top_k` items and `max_chars` characters.
/// Records go first.  The first item is always kept, truncated if it alone
/// exceeds the budget.
pub fn select_context(
    records: &[RankedRecord],
    commits: &[RankedCommit],
    top_k: usize,
    max_chars: usize,
) -> SelectedContext {
    let mut selected = SelectedContext::default();
    let mut record_lines = Vec::new();
    let mut commit_lines = Vec::new();
    let mut used = 0usize;

    let candidates = records
        .iter()
        .map(|r| (Some(&r.record), None, prompt_builder::render_record(&r.record)))
        .chain(
            commits
                .iter()
                .map(|c| (None, Some(&c.fact), prompt_builder::render_fact(&c.fact))),
        )
        .take(top_k);

    for (record, fact, text) in candidates {
        let cost = text.chars().count() + 1;
        let text = if used + cost > max_chars {
            if used > 0 {
                break;
            }
            truncate_str(&text, max_chars.saturating_sub(1)).to_string()
        } else {
            text
        };
        used += text.chars().count() + 1;
        if let Some(record) = record {
            selected.records.push(record.clone());
            record_lines.push(text);
        } else if let Some(fact) = fact {
            selected.commits.push(fact.clone());
            commit_lines.push(text);
        }
    }

    selected.rendered = format!(
        "DECISION RECORDS:\n{}\n\nCOMMITS:\n{}\n",
        section(&record_lines),
        section(&commit_lines),
    );
    selected
}

fn section(lines: &[String]) -> String {
    if lines.is_empty() {
        "(none)".to_string()
    } else {
        lines.join("\n")
    }
}
