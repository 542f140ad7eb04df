//! Capture state machine.
//!
//! ```text
//! Raw ─request_suggestion─▶ PromptPending ─resolve─▶ Accepted | Edited | Declined ─store─▶ Stored
//!  └──────── provider failure / no provider ───────▶ Declined (enhancement absent)
//! ```
//! Each transition is an explicit method call, so the whole flow can be
//! driven from tests without a terminal.

use std::time::Duration;

use tracing::{info, warn};

use gitsmart_core::{CommitInfo, DiffSummary, ProviderError, Result};
use gitsmart_llm::{
    CompletionOptions, CompletionProvider, StructuredEnhancement, complete_with_retry, extract_json_output,
};
use gitsmart_memory::{Enhancement, InsertOutcome, MemoryRecord, NotesStore};

use crate::prompt_builder;
use crate::significance::SignificanceScore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Raw,
    PromptPending,
    Accepted,
    Edited,
    Declined,
    Stored,
}

impl CaptureState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::PromptPending => "prompt-pending",
            Self::Accepted => "accepted",
            Self::Edited => "edited",
            Self::Declined => "declined",
            Self::Stored => "stored",
        }
    }
}

/// The reviewer's answer to a suggested enhancement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept,
    /// Replace the suggested reasoning with this text.
    Edit(String),
    Decline,
}

/// Source of review decisions: a terminal prompt, a fixed policy, a test script.
pub trait ReviewDecider {
    fn decide(&mut self, draft: &MemoryRecord, suggestion: &Enhancement) -> Decision;
}

/// Accept every suggestion (non-interactive runs with `--yes`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl ReviewDecider for AcceptAll {
    fn decide(&mut self, _: &MemoryRecord, _: &Enhancement) -> Decision {
        Decision::Accept
    }
}

/// One capture in flight.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    state: CaptureState,
    record: MemoryRecord,
    commit: CommitInfo,
    diff: DiffSummary,
    significance: Option<SignificanceScore>,
    suggestion: Option<Enhancement>,
    unavailable: Option<ProviderError>,
    skipped: Option<String>,
}

impl CaptureSession {
    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn record(&self) -> &MemoryRecord {
        &self.record
    }

    pub fn suggestion(&self) -> Option<&Enhancement> {
        self.suggestion.as_ref()
    }

    /// Why no suggestion could be produced, if the provider failed.
    pub fn unavailable(&self) -> Option<&ProviderError> {
        self.unavailable.as_ref()
    }

    pub fn significance(&self) -> Option<&SignificanceScore> {
        self.significance.as_ref()
    }
}

/// Result of a completed capture.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub record: MemoryRecord,
    pub insert: InsertOutcome,
    /// Last decision state before `Stored`.
    pub resolution: CaptureState,
    pub significance: Option<SignificanceScore>,
    /// Set whenever enhancement was skipped for a reason other than the
    /// reviewer declining it.
    pub notice: Option<String>,
}

pub struct EnhancementPipeline<'a> {
    provider: Option<&'a dyn CompletionProvider>,
    options: CompletionOptions,
    timeout: Duration,
}

impl<'a> EnhancementPipeline<'a> {
    pub fn new(provider: Option<&'a dyn CompletionProvider>, options: CompletionOptions, timeout: Duration) -> Self {
        Self {
            provider,
            options: options.with_system(prompt_builder::ENHANCE_SYSTEM),
            timeout,
        }
    }

    /// `Raw`: a draft record plus the commit context it will be enhanced from.
    pub fn start(
        &self,
        record: MemoryRecord,
        commit: CommitInfo,
        diff: DiffSummary,
        significance: Option<SignificanceScore>,
    ) -> CaptureSession {
        CaptureSession {
            state: CaptureState::Raw,
            record,
            commit,
            diff,
            significance,
            suggestion: None,
            unavailable: None,
            skipped: None,
        }
    }

    /// `Raw → PromptPending` on success.  Any provider failure (including a
    /// timeout, or no provider at all) moves straight to `Declined` with the
    /// reason kept on the session.
    pub async fn request_suggestion(&self, session: &mut CaptureSession) {
        if session.state != CaptureState::Raw {
            warn!(state = session.state.label(), "enhance: suggestion requested outside Raw; ignoring");
            return;
        }

        let result = match self.provider {
            None => Err(ProviderError::Unknown("no AI provider configured".to_string())),
            Some(provider) => {
                let prompt = prompt_builder::enhancement_prompt(
                    &session.record.content,
                    &session.commit,
                    &session.diff,
                    session.significance.as_ref(),
                );
                complete_with_retry(provider, &prompt, &self.options, self.timeout)
                    .await
                    .and_then(|text| parse_enhancement(&text, provider.name()))
            }
        };

        match result {
            Ok(enhancement) => {
                session.suggestion = Some(enhancement);
                session.state = CaptureState::PromptPending;
                info!(id = session.record.id_short(), "enhance: suggestion ready");
            }
            Err(err) => {
                warn!(id = session.record.id_short(), error = %err, "enhance: provider unavailable");
                session.unavailable = Some(err);
                session.state = CaptureState::Declined;
            }
        }
    }

    /// Skip the provider entirely: `Raw → Declined`.  A `reason` ends up in
    /// the outcome notice; an explicit `--no-ai` passes none.
    pub fn skip(&self, session: &mut CaptureSession, reason: Option<String>) {
        if session.state == CaptureState::Raw {
            session.state = CaptureState::Declined;
            session.skipped = reason;
        }
    }

    /// `PromptPending → Accepted | Edited | Declined`.
    pub fn resolve(&self, session: &mut CaptureSession, decision: Decision) {
        if session.state != CaptureState::PromptPending {
            warn!(state = session.state.label(), "enhance: nothing pending to resolve");
            return;
        }
        session.state = match decision {
            Decision::Accept => CaptureState::Accepted,
            Decision::Edit(text) if text.trim().is_empty() => {
                session.suggestion = None;
                CaptureState::Declined
            }
            Decision::Edit(text) => {
                if let Some(suggestion) = session.suggestion.as_mut() {
                    suggestion.reasoning = text.trim().to_string();
                    suggestion.summary = None;
                    suggestion.provider = None;
                }
                CaptureState::Edited
            }
            Decision::Decline => {
                session.suggestion = None;
                CaptureState::Declined
            }
        };
    }

    /// Ask `decider` when a suggestion is pending; otherwise a no-op.
    pub fn review(&self, session: &mut CaptureSession, decider: &mut dyn ReviewDecider) {
        if let (CaptureState::PromptPending, Some(suggestion)) = (session.state, session.suggestion.as_ref()) {
            let decision = decider.decide(&session.record, suggestion);
            self.resolve(session, decision);
        }
    }

    /// `Accepted | Edited | Declined → Stored`.  A session still in `Raw` or
    /// `PromptPending` is stored as declined; the original content is never
    /// dropped.
    pub fn store(&self, mut session: CaptureSession, store: &NotesStore) -> Result<CaptureOutcome> {
        let resolution = match session.state {
            CaptureState::Accepted | CaptureState::Edited => session.state,
            _ => CaptureState::Declined,
        };
        let enhancement = match resolution {
            CaptureState::Accepted | CaptureState::Edited => session.suggestion.take(),
            _ => None,
        };
        let record = session.record.clone().with_enhancement(enhancement);
        let insert = store.put(&record)?;
        session.state = CaptureState::Stored;

        let notice = match (&session.unavailable, &session.skipped) {
            (Some(err), _) => Some(format!("stored without AI enhancement ({err})")),
            (None, Some(reason)) => Some(format!("stored without AI enhancement ({reason})")),
            (None, None) => None,
        };
        info!(
            id = record.id_short(),
            resolution = resolution.label(),
            enhanced = record.enhancement.is_some(),
            "enhance: stored"
        );
        Ok(CaptureOutcome {
            record,
            insert,
            resolution,
            significance: session.significance,
            notice,
        })
    }
}

/// Structured JSON when the provider produced it, raw text otherwise.
pub fn parse_enhancement(text: &str, provider: &str) -> std::result::Result<Enhancement, ProviderError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ProviderError::Unknown("provider returned an empty suggestion".to_string()));
    }
    let enhancement = match extract_json_output::<StructuredEnhancement>(text) {
        Some(parsed) if parsed.reasoning.is_some() || parsed.summary.is_some() => Enhancement {
            reasoning: parsed
                .reasoning
                .or_else(|| parsed.summary.clone())
                .unwrap_or_default(),
            summary: parsed.summary,
            consequences: parsed.consequences,
            related_files: parsed.related_files,
            provider: Some(provider.to_string()),
        },
        _ => Enhancement {
            provider: Some(provider.to_string()),
            ..Enhancement::from_text(text)
        },
    };
    Ok(enhancement)
}
