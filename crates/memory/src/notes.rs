//! Per-anchor note blob: a versioned JSON map from record id to record.
//!
//! Merging two blobs is a union by id.  A shared id must agree on every
//! immutable field; the only field that may differ is an enhancement that
//! one side has and the other does not.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use gitsmart_core::{GitsmartError, Result};

use crate::schema::MemoryRecord;

pub const BLOB_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteBlob {
    pub version: u32,
    #[serde(default)]
    pub records: BTreeMap<String, MemoryRecord>,
}

impl Default for NoteBlob {
    fn default() -> Self {
        Self {
            version: BLOB_VERSION,
            records: BTreeMap::new(),
        }
    }
}

/// What [`NoteBlob::insert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// An existing record absorbed new tags or an enhancement.
    Updated,
    Unchanged,
}

impl NoteBlob {
    pub fn decode(text: &str) -> Result<Self> {
        let mut blob: Self = serde_json::from_str(text)?;
        blob.version = blob.version.max(BLOB_VERSION);
        Ok(blob)
    }

    /// Canonical encoding: keys sorted, one trailing newline.
    pub fn encode(&self) -> Result<String> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records ordered by capture time, ties broken by id.
    pub fn ordered(&self) -> Vec<MemoryRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub fn insert(&mut self, record: MemoryRecord) -> Result<InsertOutcome> {
        match self.records.get(&record.id) {
            None => {
                self.records.insert(record.id.clone(), record);
                Ok(InsertOutcome::Inserted)
            }
            Some(existing) => {
                let merged = merge_record(existing, &record)?;
                if &merged == existing {
                    Ok(InsertOutcome::Unchanged)
                } else {
                    self.records.insert(merged.id.clone(), merged);
                    Ok(InsertOutcome::Updated)
                }
            }
        }
    }
}

/// Union of two blobs for the same anchor.
pub fn merge_blobs(ours: &NoteBlob, theirs: &NoteBlob) -> Result<NoteBlob> {
    let mut merged = ours.clone();
    for record in theirs.records.values() {
        merged.insert(record.clone())?;
    }
    Ok(merged)
}

/// Reconcile two versions of the same record id.
///
/// Tags are append-only: they are unioned, so re-capturing a record with
/// extra tags is an update and dropping a tag never removes it.  The earliest
/// provenance wins.  Differing content,
/// kind or anchor, or two different enhancements, is an integrity violation
/// carrying both versions.
pub fn merge_record(existing: &MemoryRecord, incoming: &MemoryRecord) -> Result<MemoryRecord> {
    let violation = || GitsmartError::IntegrityViolation {
        anchor: existing.anchor.clone(),
        id: existing.id.clone(),
        existing: serde_json::to_string(existing).unwrap_or_default(),
        incoming: serde_json::to_string(incoming).unwrap_or_default(),
    };

    if existing.content.trim() != incoming.content.trim()
        || existing.kind != incoming.kind
        || existing.anchor != incoming.anchor
    {
        return Err(violation());
    }

    let enhancement = match (&existing.enhancement, &incoming.enhancement) {
        (Some(a), Some(b)) if a != b => return Err(violation()),
        (Some(a), _) => Some(a.clone()),
        (None, b) => b.clone(),
    };

    let (author, timestamp, origin) = if incoming.timestamp < existing.timestamp {
        (incoming.author.clone(), incoming.timestamp, incoming.origin)
    } else {
        (existing.author.clone(), existing.timestamp, existing.origin)
    };

    let mut tags = existing.tags.clone();
    tags.extend(incoming.tags.iter().cloned());

    Ok(MemoryRecord {
        id: existing.id.clone(),
        kind: existing.kind.clone(),
        tags,
        content: existing.content.clone(),
        enhancement,
        anchor: existing.anchor.clone(),
        author,
        timestamp,
        origin,
    })
}
