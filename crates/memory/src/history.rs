//! Local, unshared log of answered queries (`.git/gitsmart/queries.jsonl`).

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use gitsmart_core::Result;

pub const HISTORY_FILE: &str = "queries.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEvent {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub question: String,
    /// `None` when no answer could be synthesized.
    pub answer: Option<String>,
    /// Record ids and commit ids the answer was built from.
    #[serde(default)]
    pub sources: Vec<String>,
}

impl QueryEvent {
    pub fn new(question: impl Into<String>, answer: Option<String>, sources: Vec<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            question: question.into(),
            answer,
            sources,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryHistory {
    path: PathBuf,
    limit: usize,
}

impl QueryHistory {
    pub fn new(path: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit: limit.max(1),
        }
    }

    /// History file inside a local state directory.
    pub fn in_dir(dir: impl AsRef<Path>, limit: usize) -> Self {
        Self::new(dir.as_ref().join(HISTORY_FILE), limit)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `event`, then trim the file to the newest `limit` entries.
    pub async fn append(&self, event: &QueryEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = serde_json::to_string(event)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let events = self.load()?;
        if events.len() > self.limit {
            let keep = &events[events.len() - self.limit..];
            self.overwrite(keep).await?;
        }
        Ok(())
    }

    /// Replace the log through a `.tmp` sibling and rename, so a crash leaves
    /// either the old or the new file intact.
    async fn overwrite(&self, events: &[QueryEvent]) -> Result<()> {
        let tmp_path = {
            let filename = self
                .path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| HISTORY_FILE.to_string());
            self.path.with_file_name(format!("{filename}.tmp"))
        };

        let write_result: Result<()> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            for event in events {
                let line = serde_json::to_string(event)?;
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// All events, oldest first.  Corrupt lines are skipped with a warning.
    pub fn load(&self) -> Result<Vec<QueryEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = std::fs::File::open(&self.path)?;
        let mut events = Vec::new();
        for (line_idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<QueryEvent>(&line) {
                Ok(event) => events.push(event),
                Err(err) => tracing::warn!(
                    line = line_idx + 1,
                    error = %err,
                    path = %self.path.display(),
                    "corrupt query history line; skipping"
                ),
            }
        }
        Ok(events)
    }

    /// Newest `n` events, newest first.
    pub fn recent(&self, n: usize) -> Result<Vec<QueryEvent>> {
        let mut events = self.load()?;
        events.reverse();
        events.truncate(n);
        Ok(events)
    }
}
