//! Scratch repositories and scripted providers for runtime tests.

use std::cell::Cell;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use gitsmart_core::{CommitInfo, ProviderError};
use gitsmart_llm::{CompletionOptions, CompletionProvider};
use gitsmart_memory::{MemoryRecord, NotesStore, Origin, RecordKind, StoreOptions};
use gitsmart_repo::RepoAccessor;

pub struct Fixture {
    pub dir: TempDir,
    pub git: git2::Repository,
    pub repo: RepoAccessor,
    pub store: NotesStore,
    clock: Cell<i64>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let git = git2::Repository::init(dir.path()).unwrap();
        let repo = RepoAccessor::discover(dir.path()).unwrap();
        let store = NotesStore::new(
            repo.clone(),
            StoreOptions {
                backoff: Duration::from_millis(1),
                ..StoreOptions::default()
            },
        );
        Self {
            dir,
            git,
            repo,
            store,
            clock: Cell::new(1_700_000_000),
        }
    }

    /// Commit `files` on top of HEAD, one simulated minute after the last
    /// commit.  Returns the full commit id.
    pub fn commit(&self, message: &str, files: &[(&str, &str)]) -> String {
        let workdir = self.git.workdir().unwrap().to_path_buf();
        let mut index = self.git.index().unwrap();
        for (path, content) in files {
            let full = workdir.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&full, content).unwrap();
            index.add_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();
        let tree = self.git.find_tree(index.write_tree().unwrap()).unwrap();

        let time = self.clock.get() + 60;
        self.clock.set(time);
        let sig = git2::Signature::new("Ann", "ann@example.com", &git2::Time::new(time, 0)).unwrap();
        let parent = self.git.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        self.git
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
            .to_string()
    }
}

pub fn record_for(commit: &CommitInfo, content: &str, kind: RecordKind) -> MemoryRecord {
    MemoryRecord::new(commit.id.clone(), content, kind, Vec::new(), "ann", Origin::Manual)
}

pub fn tagged(anchor: &str, content: &str, tags: &[&str]) -> MemoryRecord {
    MemoryRecord::new(
        anchor,
        content,
        RecordKind::Decision,
        tags.iter().map(|t| t.to_string()),
        "ann",
        Origin::Manual,
    )
}

#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    Fail(ProviderError),
    /// Never answers; exercises the caller's timeout.
    Hang,
}

/// Replays one scripted outcome per call and keeps every prompt it saw.
pub struct ScriptedProvider {
    script: Vec<Scripted>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str, _: &CompletionOptions) -> Result<String, ProviderError> {
        let step = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            self.script.get(prompts.len() - 1).cloned()
        };
        match step {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Unknown("hang elapsed".into()))
            }
            None => Err(ProviderError::Unknown("script exhausted".into())),
        }
    }
}
