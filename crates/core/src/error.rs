//! Error taxonomy shared by every gitsmart crate.
//!
//! Local failures (`RepositoryUnavailable`, `AnchorConflict`,
//! `IntegrityViolation`) abort the current operation. Provider failures are
//! recoverable and are normally absorbed into degraded results by the
//! runtime; they only surface as errors from the provider layer itself.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GitsmartError>;

/// Failure modes of a text-completion provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider call timed out after {0}s")]
    Timeout(u64),

    #[error("provider rate limit exceeded")]
    RateLimited,

    #[error("provider rejected credentials: {0}")]
    Unauthorized(String),

    /// Connection-level failure (DNS, refused, reset). Eligible for retry.
    #[error("provider unreachable: {0}")]
    Network(String),

    #[error("provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Whether a single retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited)
    }
}

#[derive(Error, Debug)]
pub enum GitsmartError {
    /// Local repository inaccessible, corrupted, or locked past the retry budget.
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// Anchor or path has no history. Callers usually map this to an empty result.
    #[error("not found: {0}")]
    NotFound(String),

    /// The notes ref could not be updated for this anchor after bounded retries.
    #[error("anchor conflict on {anchor}: {detail}")]
    AnchorConflict { anchor: String, detail: String },

    /// Two writers produced the same record id with different immutable fields.
    /// Both versions are carried (as JSON) so nothing is silently dropped.
    #[error("integrity violation for record {id} on {anchor}:\n  existing: {existing}\n  incoming: {incoming}")]
    IntegrityViolation {
        anchor: String,
        id: String,
        existing: String,
        incoming: String,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// No synthesized answer; `context` is the rendered evidence that was gathered.
    #[error("query unavailable ({reason}); gathered context follows:\n{context}")]
    QueryUnavailable {
        reason: ProviderError,
        context: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl GitsmartError {
    pub fn unavailable(detail: impl std::fmt::Display) -> Self {
        Self::RepositoryUnavailable(detail.to_string())
    }

    /// `NotFound` is a normal empty result, not a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
