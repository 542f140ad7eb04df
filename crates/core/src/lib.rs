//! Shared vocabulary for the gitsmart crates: the error taxonomy and the
//! derived repository value types that flow between the accessor, the
//! significance detector and the query engine.

pub mod error;
pub mod types;

pub use error::{GitsmartError, ProviderError, Result};
pub use types::{CommitInfo, DiffSummary, FileHistory, RepoStats, Rename};

/// Notes namespace used when no `[storage] notes_ref` override is configured.
pub const DEFAULT_NOTES_REF: &str = "refs/notes/gitsmart";

/// Directory under `.git/` holding local-only state (logs, query history).
pub const LOCAL_STATE_DIR: &str = "gitsmart";
