use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Open vocabulary of record kinds.  Unknown labels round-trip through
/// [`RecordKind::Other`] so older readers never reject newer records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordKind {
    Decision,
    Note,
    Bug,
    Convention,
    Other(String),
}

impl RecordKind {
    pub fn label(&self) -> &str {
        match self {
            Self::Decision => "decision",
            Self::Note => "note",
            Self::Bug => "bug",
            Self::Convention => "convention",
            Self::Other(label) => label,
        }
    }

    /// Parse a kind from its label (case-insensitive).  Never fails.
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "decision" | "decisions" => Self::Decision,
            "note" | "notes" => Self::Note,
            "bug" | "bugfix" | "fix" => Self::Bug,
            "convention" | "conventions" => Self::Convention,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for RecordKind {
    fn from(value: String) -> Self {
        Self::from_label(&value)
    }
}

impl From<RecordKind> for String {
    fn from(kind: RecordKind) -> Self {
        kind.label().to_string()
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Explicit `capture` by a person.
    Manual,
    /// Prompted by the commit hook or produced by `analyze-commit`.
    Automated,
}

impl Origin {
    pub fn label(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automated => "automated",
        }
    }
}

/// AI-produced elaboration of a record.  Set at most once per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enhancement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consequences: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_files: Vec<String>,
    /// Provider label; absent for hand-edited text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl Enhancement {
    pub fn from_text(reasoning: impl Into<String>) -> Self {
        Self {
            summary: None,
            reasoning: reasoning.into(),
            consequences: Vec::new(),
            related_files: Vec::new(),
            provider: None,
        }
    }

    /// Multi-line plain-text rendering for terminals and prompts.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(summary) = &self.summary {
            out.push_str(summary.trim());
            out.push('\n');
        }
        out.push_str(self.reasoning.trim());
        if !self.consequences.is_empty() {
            out.push_str("\nConsequences:");
            for item in &self.consequences {
                out.push_str("\n  - ");
                out.push_str(item.trim());
            }
        }
        if !self.related_files.is_empty() {
            out.push_str("\nRelated files: ");
            out.push_str(&self.related_files.join(", "));
        }
        out
    }
}

/// One unit of organisational memory, attached to the commit `anchor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhancement: Option<Enhancement>,
    pub anchor: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub origin: Origin,
}

impl MemoryRecord {
    pub fn new(
        anchor: impl Into<String>,
        content: impl Into<String>,
        kind: RecordKind,
        tags: impl IntoIterator<Item = String>,
        author: impl Into<String>,
        origin: Origin,
    ) -> Self {
        let anchor = anchor.into();
        let content = content.into();
        Self {
            id: record_id(&anchor, &content),
            kind,
            tags: normalize_tags(tags),
            content,
            enhancement: None,
            anchor,
            author: author.into(),
            timestamp: Utc::now(),
            origin,
        }
    }

    pub fn with_enhancement(mut self, enhancement: Option<Enhancement>) -> Self {
        self.enhancement = enhancement;
        self
    }

    pub fn id_short(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }

    pub fn anchor_short(&self) -> &str {
        &self.anchor[..self.anchor.len().min(8)]
    }
}

/// Deterministic record id: hex SHA-256 over anchor and content.  Capturing
/// identical text on the same commit twice therefore yields the same id.
pub fn record_id(anchor: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(anchor.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.trim().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Trim, lowercase and drop empty labels.
pub fn normalize_tags(tags: impl IntoIterator<Item = String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Truncate `s` to at most `max_chars` Unicode scalar values, returning a
/// sub-slice.
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
