use gitsmart_core::CommitInfo;
use gitsmart_memory::{InsertOutcome, MemoryRecord, QueryEvent, SyncOutcome};
use gitsmart_runtime::{AnalysisOutcome, Answer, AnswerResult, CaptureOutcome, Explanation, StatusReport};

fn print_record(record: &MemoryRecord) {
    let tags = if record.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", record.tags.iter().cloned().collect::<Vec<_>>().join(", "))
    };
    println!(
        "  {} {:<10} {} {} ({}){tags}",
        record.id_short(),
        record.kind.label(),
        record.anchor_short(),
        record.timestamp.format("%Y-%m-%d"),
        record.author,
    );
    println!("      {}", record.content.trim());
    if let Some(enhancement) = &record.enhancement {
        for line in enhancement.render().lines() {
            println!("      > {line}");
        }
    }
}

pub(crate) fn print_capture(outcome: &CaptureOutcome) {
    let verb = match outcome.insert {
        InsertOutcome::Inserted => "stored",
        InsertOutcome::Updated => "updated",
        InsertOutcome::Unchanged => "already recorded",
    };
    println!(
        "{verb} {} {} on {}",
        outcome.record.kind.label(),
        outcome.record.id_short(),
        outcome.record.anchor_short()
    );
    if let Some(score) = &outcome.significance {
        if score.is_significant {
            println!("- commit significance: {} ({})", score.level.label(), score.rationale());
        }
    }
    match (&outcome.record.enhancement, &outcome.notice) {
        (Some(_), _) => println!("- AI context: {}", outcome.resolution.label()),
        (None, Some(notice)) => println!("- {notice}"),
        (None, None) => {}
    }
}

pub(crate) fn print_answer(result: &AnswerResult) {
    match &result.answer {
        Answer::Synthesized(text) => {
            println!("{text}");
        }
        Answer::Unavailable { reason } => {
            println!("No synthesized answer ({reason}). Relevant context:");
            println!();
            println!("{}", result.context.trim_end());
        }
    }
    println!();
    println!("── sources ──────────────────────────────────────────");
    if result.sources.is_empty() {
        println!("  (none)");
    }
    for source in &result.sources {
        println!("  {}", source.label());
    }
}

pub(crate) fn print_history(events: &[QueryEvent]) {
    if events.is_empty() {
        println!("no queries recorded yet");
        return;
    }
    for event in events {
        println!(
            "{}  {}",
            event.occurred_at.format("%Y-%m-%d %H:%M"),
            event.question
        );
        match &event.answer {
            Some(answer) => println!("    {}", answer.lines().next().unwrap_or("")),
            None => println!("    (no answer)"),
        }
    }
}

pub(crate) fn print_explanation(explanation: &Explanation) {
    let history = &explanation.history;
    if history.is_empty() {
        println!("no history for '{}'", history.path);
        return;
    }
    println!("── {} ──────────────────────────────────────", history.path);
    println!("  commits      : {}", history.total_commits);
    println!("  authors      : {}", history.authors.len());
    if let Some(created) = history.created {
        println!("  created      : {}", created.format("%Y-%m-%d"));
    }
    if let Some(modified) = history.last_modified {
        println!("  last changed : {}", modified.format("%Y-%m-%d"));
    }
    if !history.exists {
        println!("  (no longer present in the working tree)");
    }
    println!();

    match &explanation.answer {
        Some(Answer::Synthesized(text)) => {
            println!("{text}");
            println!();
        }
        Some(Answer::Unavailable { reason }) => {
            println!("AI explanation unavailable ({reason}); showing raw history.");
            println!();
        }
        None => {}
    }

    println!("── recent changes ───────────────────────────────────");
    for commit in history.commits.iter().take(10) {
        print_commit(commit);
    }
    if !explanation.records.is_empty() {
        println!();
        println!("── decision records ─────────────────────────────────");
        for record in &explanation.records {
            print_record(record);
        }
    }
}

pub(crate) fn print_commit(commit: &CommitInfo) {
    println!(
        "  {} {} {:<16} {}",
        commit.short_id(),
        commit.timestamp.format("%Y-%m-%d"),
        commit.author,
        commit.summary()
    );
}

pub(crate) fn print_status(status: &StatusReport) {
    println!("── gitsmart status ──────────────────────────────────");
    println!("  branch        : {}", status.stats.current_branch);
    println!(
        "  repository    : {} commits, {} contributors, {} files",
        status.stats.commit_count, status.stats.contributor_count, status.stats.file_count
    );
    if let Some(lang) = &status.stats.primary_language {
        println!("  language      : {lang}");
    }
    println!(
        "  provider      : {} ({}){}",
        status.provider,
        status.model,
        if status.key_configured { "" } else { " – API key not set" }
    );
    println!("  records       : {}", status.total_records);
    for (kind, count) in &status.records_by_kind {
        println!("      {kind:<12}: {count}");
    }
    if let Some(last) = status.last_activity {
        println!("  last activity : {}", last.format("%Y-%m-%d %H:%M"));
    }

    let short = |tip: &Option<String>| {
        tip.as_deref()
            .map(|t| t[..t.len().min(8)].to_string())
            .unwrap_or_else(|| "(none)".to_string())
    };
    println!("  notes ref     : {}", status.notes_ref);
    println!("  local tip     : {}", short(&status.local_tip));
    match &status.remote_error {
        Some(err) => println!("  {} tip    : unknown ({err})", status.remote),
        None => println!(
            "  {} tip    : {}{}",
            status.remote,
            short(&status.remote_tip),
            if status.in_sync() { " (in sync)" } else { "" }
        ),
    }

    if !status.recent_decisions.is_empty() {
        println!();
        println!("── recent decisions ─────────────────────────────────");
        for record in &status.recent_decisions {
            print_record(record);
        }
    }
}

pub(crate) fn print_analysis(outcome: &AnalysisOutcome) {
    println!("commit {}: {}", outcome.commit.short_id(), outcome.commit.summary());
    println!(
        "- significance: {} ({:.2}; {})",
        outcome.score.level.label(),
        outcome.score.score,
        outcome.score.rationale()
    );
    println!(
        "- changed: {} file(s), +{} / -{}",
        outcome.diff.changed_paths.len(),
        outcome.diff.insertions,
        outcome.diff.deletions
    );
    if let Some(notice) = &outcome.notice {
        println!("- {notice}");
    }
    println!();
    println!("{}", outcome.reasoning);
    if let Some((record, insert)) = &outcome.stored {
        println!();
        match insert {
            InsertOutcome::Unchanged => println!("already recorded as {}", record.id_short()),
            _ => println!("stored as {} (auto-analyzed)", record.id_short()),
        }
    }
}

pub(crate) fn print_sync(direction: &str, outcome: &SyncOutcome) {
    println!("{direction}: {}", outcome.describe());
}
