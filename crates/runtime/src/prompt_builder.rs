//! Prompt assembly for every provider call.
//!
//! Prompts carry commit metadata, changed-path lists and stored records only;
//! file contents never leave the machine.

use std::fmt::Write as _;

use gitsmart_core::{CommitInfo, DiffSummary, FileHistory, RepoStats};
use gitsmart_memory::{MemoryRecord, truncate_str};

use crate::query::{CommitFact, SelectedContext};
use crate::significance::SignificanceScore;

/// Paths listed in a prompt before the rest are summarised as a count.
const MAX_PROMPT_PATHS: usize = 40;
const MAX_MESSAGE_CHARS: usize = 1_500;

pub const ENHANCE_SYSTEM: &str = "You help engineering teams document why code changed. \
Be concrete and brief. Never invent facts that are not supported by the input.";

pub const QUERY_SYSTEM: &str = "You answer questions about a codebase's history using only the \
records and commits provided. Cite record ids or commit ids in brackets. If the context does not \
answer the question, say so plainly.";

// ─── enhancement ─────────────────────────────────────────────────────────────

pub fn enhancement_prompt(
    content: &str,
    commit: &CommitInfo,
    diff: &DiffSummary,
    significance: Option<&SignificanceScore>,
) -> String {
    let significance = significance
        .map(|s| format!("{} ({:.2}): {}", s.level.label(), s.score, s.rationale()))
        .unwrap_or_else(|| "not assessed".to_string());

    format!(
        "A developer recorded this note about a commit:\n\
         \"{content}\"\n\n\
         COMMIT:\n{commit}\n\n\
         CHANGED PATHS:\n{paths}\n\n\
         SIGNIFICANCE: {significance}\n\n\
         Elaborate the note. Reply with ONLY a JSON object:\n\
         ```json\n\
         {{\"summary\": \"one line\", \"reasoning\": \"why this change was made\", \
         \"consequences\": [\"trade-off or follow-up\"], \"related_files\": [\"path\"]}}\n\
         ```",
        content = content.trim(),
        commit = render_commit_header(commit),
        paths = render_paths(diff),
    )
}

pub fn analyze_prompt(commit: &CommitInfo, diff: &DiffSummary, significance: &SignificanceScore) -> String {
    format!(
        "Infer the most likely reason for this commit, in two or three sentences. \
         Focus on intent, not a restatement of the diff.\n\n\
         COMMIT:\n{commit}\n\n\
         CHANGED PATHS:\n{paths}\n\n\
         SIGNIFICANCE: {level} ({rationale})\n\n\
         REASONING:",
        commit = render_commit_header(commit),
        paths = render_paths(diff),
        level = significance.level.label(),
        rationale = significance.rationale(),
    )
}

// ─── query / explain ─────────────────────────────────────────────────────────

pub fn query_prompt(question: &str, context: &SelectedContext, stats: Option<&RepoStats>) -> String {
    let repo_block = stats.map(render_stats).unwrap_or_else(|| "(unavailable)".to_string());
    format!(
        "REPOSITORY:\n{repo_block}\n\n\
         {context}\n\
         QUESTION:\n{question}\n\n\
         ANSWER:",
        context = context.rendered,
        question = question.trim(),
    )
}

pub fn explain_prompt(history: &FileHistory, records: &[MemoryRecord]) -> String {
    let mut out = format!(
        "Explain the purpose and evolution of `{path}` for a new team member.\n\n\
         HISTORY: {total} commit(s) by {authors} author(s); created {created}; last changed {modified}.\n\n\
         RECENT CHANGES:\n",
        path = history.path,
        total = history.total_commits,
        authors = history.authors.len(),
        created = history
            .created
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "?".into()),
        modified = history
            .last_modified
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "?".into()),
    );
    for commit in &history.commits {
        let _ = writeln!(out, "- {}", render_commit_line(commit));
    }
    out.push_str("\nDECISION RECORDS:\n");
    if records.is_empty() {
        out.push_str("(none)\n");
    }
    for record in records {
        let _ = writeln!(out, "{}", render_record(record));
    }
    out.push_str("\nEXPLANATION:");
    out
}

// ─── shared renderers ────────────────────────────────────────────────────────

pub fn render_record(record: &MemoryRecord) -> String {
    let mut out = format!(
        "[{id}] {kind} on {anchor} by {author}, {date}",
        id = record.id_short(),
        kind = record.kind,
        anchor = record.anchor_short(),
        author = record.author,
        date = record.timestamp.format("%Y-%m-%d"),
    );
    if !record.tags.is_empty() {
        let tags: Vec<&str> = record.tags.iter().map(String::as_str).collect();
        let _ = write!(out, " [tags: {}]", tags.join(", "));
    }
    let _ = write!(out, "\n  {}", record.content.trim());
    if let Some(enhancement) = &record.enhancement {
        for line in enhancement.render().lines() {
            let _ = write!(out, "\n  > {line}");
        }
    }
    out
}

pub fn render_fact(fact: &CommitFact) -> String {
    let mut out = render_commit_line(&fact.info);
    if fact.significance.is_significant {
        let _ = write!(out, " ({})", fact.significance.level.label());
    }
    if !fact.changed_paths.is_empty() {
        let shown: Vec<&str> = fact.changed_paths.iter().take(8).map(String::as_str).collect();
        let _ = write!(out, "\n  files: {}", shown.join(", "));
        if fact.changed_paths.len() > shown.len() {
            let _ = write!(out, " (+{} more)", fact.changed_paths.len() - shown.len());
        }
    }
    out
}

pub fn render_commit_line(commit: &CommitInfo) -> String {
    format!(
        "[{}] {} {}: {}",
        commit.short_id(),
        commit.timestamp.format("%Y-%m-%d"),
        commit.author,
        commit.summary()
    )
}

fn render_commit_header(commit: &CommitInfo) -> String {
    format!(
        "{} by {} <{}> on {}\n{}",
        commit.short_id(),
        commit.author,
        commit.email,
        commit.timestamp.format("%Y-%m-%d %H:%M UTC"),
        truncate_str(commit.message.trim(), MAX_MESSAGE_CHARS),
    )
}

fn render_paths(diff: &DiffSummary) -> String {
    if diff.changed_paths.is_empty() {
        return "(none)".to_string();
    }
    let mut out = String::new();
    for path in diff.changed_paths.iter().take(MAX_PROMPT_PATHS) {
        let _ = writeln!(out, "- {path}");
    }
    if diff.changed_paths.len() > MAX_PROMPT_PATHS {
        let _ = writeln!(out, "- … and {} more", diff.changed_paths.len() - MAX_PROMPT_PATHS);
    }
    for rename in &diff.renames {
        let _ = writeln!(out, "- renamed {} → {}", rename.from, rename.to);
    }
    let _ = write!(out, "(+{} / -{} lines)", diff.insertions, diff.deletions);
    out
}

fn render_stats(stats: &RepoStats) -> String {
    format!(
        "{} commits, {} contributors, {} days old, branch {}, {} files, primary language {}",
        stats.commit_count,
        stats.contributor_count,
        stats.age_days,
        stats.current_branch,
        stats.file_count,
        stats.primary_language.as_deref().unwrap_or("unknown"),
    )
}
