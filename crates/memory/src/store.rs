//! Record Store backed by a git notes ref.
//!
//! Each anchor commit owns one note blob (see [`crate::notes`]).  Writes build
//! the notes commit directly and move the ref with a compare-and-swap, so a
//! concurrent writer in another process is detected and retried rather than
//! overwritten.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use gitsmart_core::{GitsmartError, Result};
use gitsmart_repo::{GitResultExt, RepoAccessor, backoff_delay, transport};

use crate::notes::{InsertOutcome, NoteBlob, merge_blobs};
use crate::schema::{Enhancement, MemoryRecord, Origin, RecordKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub notes_ref: String,
    pub remote: String,
    /// Ref-update attempts after the first, when another writer moved the ref.
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            notes_ref: gitsmart_core::DEFAULT_NOTES_REF.to_string(),
            remote: "origin".to_string(),
            retries: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Push,
    Pull,
}

impl SyncDirection {
    pub fn label(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The other side brought nothing new.
    UpToDate,
    FastForward,
    /// A union-merge commit was written; `anchors` blobs needed reconciling.
    Merged { anchors: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    UpToDate,
    FastForwarded,
    Merged { anchors: usize },
    Pushed { tip: String },
}

impl SyncOutcome {
    pub fn describe(&self) -> String {
        match self {
            Self::UpToDate => "already up to date".to_string(),
            Self::FastForwarded => "fast-forwarded to remote notes".to_string(),
            Self::Merged { anchors } => format!("merged remote notes ({anchors} anchor(s) reconciled)"),
            Self::Pushed { tip } => format!("pushed notes ({})", &tip[..tip.len().min(8)]),
        }
    }
}

#[derive(Debug, Default)]
struct SyncState {
    last_pushed: Option<String>,
}

pub struct NotesStore {
    accessor: RepoAccessor,
    options: StoreOptions,
    sync_state: Mutex<SyncState>,
    /// Runs once, right before the next push hits the remote.
    #[cfg(test)]
    before_push: std::sync::Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl NotesStore {
    pub fn new(accessor: RepoAccessor, options: StoreOptions) -> Self {
        Self {
            accessor,
            options,
            sync_state: Mutex::new(SyncState::default()),
            #[cfg(test)]
            before_push: std::sync::Mutex::new(None),
        }
    }

    pub fn notes_ref(&self) -> &str {
        &self.options.notes_ref
    }

    pub fn remote(&self) -> &str {
        &self.options.remote
    }

    /// Local ref that `pull` fetches the remote's notes into.
    pub fn tracking_ref(&self) -> String {
        let tail = self
            .options
            .notes_ref
            .strip_prefix("refs/notes/")
            .unwrap_or(&self.options.notes_ref);
        format!("refs/gitsmart/remotes/{}/{tail}", self.options.remote)
    }

    /// Current tip of the local notes ref.
    pub fn local_tip(&self) -> Result<Option<String>> {
        let repo = self.accessor.open()?;
        Ok(ref_tip(&repo, &self.options.notes_ref)?.map(|oid| oid.to_string()))
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    /// Attach `record` to its anchor.  Re-putting an identical record is a
    /// no-op; putting a record whose id exists with different immutable
    /// fields fails with `IntegrityViolation`.
    pub fn put(&self, record: &MemoryRecord) -> Result<InsertOutcome> {
        let repo = self.accessor.open()?;
        let anchor = git2::Oid::from_str(&record.anchor)
            .map_err(|_| GitsmartError::NotFound(format!("'{}' is not a commit id", record.anchor)))?;
        repo.find_commit(anchor)
            .map_err(|_| GitsmartError::NotFound(format!("anchor commit {} not found", record.anchor)))?;
        drop(repo);

        let outcome = self.with_cas("record", &record.anchor, |repo, old_tip| {
            let mut entries = match old_tip {
                Some(tip) => note_entries(repo, tip)?,
                None => BTreeMap::new(),
            };
            let mut blob = match entries.get(&anchor) {
                Some(blob_oid) => read_blob_or_adopt(repo, anchor, *blob_oid)?,
                None => NoteBlob::default(),
            };

            let outcome = blob.insert(record.clone())?;
            if outcome == InsertOutcome::Unchanged {
                return Ok(None);
            }

            let blob_oid = repo.blob(blob.encode()?.as_bytes()).git()?;
            entries.insert(anchor, blob_oid);
            let message = format!("gitsmart: record {} on {}", record.id_short(), record.anchor_short());
            let new_tip = write_notes_commit(repo, &entries, old_tip.into_iter().collect(), &message)?;
            Ok(Some((new_tip, outcome)))
        })?;

        let outcome = outcome.unwrap_or(InsertOutcome::Unchanged);
        info!(id = record.id_short(), anchor = record.anchor_short(), ?outcome, "store: put");
        Ok(outcome)
    }

    /// Set the enhancement of a stored record that has none.  `id` may be a
    /// unique prefix.
    pub fn amend_enhancement(&self, anchor: &str, id: &str, enhancement: Enhancement) -> Result<MemoryRecord> {
        let record = self.find(anchor, id)?;
        let updated = record.with_enhancement(Some(enhancement));
        self.put(&updated)?;
        Ok(updated)
    }

    /// Union-merge the notes commit at `other_ref` into the local notes ref.
    /// Aborts without writing on any integrity violation.
    pub fn merge_notes(&self, other_ref: &str) -> Result<MergeOutcome> {
        let outcome = self.with_cas("merge", other_ref, |repo, local| {
            let Some(remote) = ref_tip(repo, other_ref)? else {
                return Ok(None);
            };
            let Some(local) = local else {
                return Ok(Some((remote, MergeOutcome::FastForward)));
            };
            if local == remote || repo.graph_descendant_of(local, remote).git()? {
                return Ok(None);
            }
            if repo.graph_descendant_of(remote, local).git()? {
                return Ok(Some((remote, MergeOutcome::FastForward)));
            }

            let mut entries = note_entries(repo, local)?;
            let mut reconciled = 0usize;
            for (anchor, theirs) in note_entries(repo, remote)? {
                match entries.get(&anchor).copied() {
                    None => {
                        entries.insert(anchor, theirs);
                    }
                    Some(ours) if ours == theirs => {}
                    Some(ours) => {
                        let merged = merge_blobs(
                            &read_blob_or_adopt(repo, anchor, ours)?,
                            &read_blob_or_adopt(repo, anchor, theirs)?,
                        )?;
                        let blob_oid = repo.blob(merged.encode()?.as_bytes()).git()?;
                        entries.insert(anchor, blob_oid);
                        reconciled += 1;
                    }
                }
            }

            let message = format!("gitsmart: merge {other_ref}");
            let new_tip = write_notes_commit(repo, &entries, vec![local, remote], &message)?;
            Ok(Some((new_tip, MergeOutcome::Merged { anchors: reconciled })))
        })?;

        let outcome = outcome.unwrap_or(MergeOutcome::UpToDate);
        info!(from = other_ref, ?outcome, "store: merge notes");
        Ok(outcome)
    }

    /// Run `attempt` against the current tip and move the notes ref to the
    /// commit it returns, retrying with backoff when another writer moved
    /// the ref in between.  `Ok(None)` from `attempt` means nothing to write.
    fn with_cas<T>(
        &self,
        what: &str,
        subject: &str,
        mut attempt: impl FnMut(&git2::Repository, Option<git2::Oid>) -> Result<Option<(git2::Oid, T)>>,
    ) -> Result<Option<T>> {
        for round in 0..=self.options.retries {
            let repo = self.accessor.open()?;
            let old_tip = ref_tip(&repo, &self.options.notes_ref)?;
            let Some((new_tip, value)) = attempt(&repo, old_tip)? else {
                return Ok(None);
            };

            let log = format!("gitsmart: {what}");
            let updated = match old_tip {
                Some(old) => repo
                    .reference_matching(&self.options.notes_ref, new_tip, true, old, &log)
                    .map(|_| ()),
                None => repo
                    .reference(&self.options.notes_ref, new_tip, false, &log)
                    .map(|_| ()),
            };
            match updated {
                Ok(()) => return Ok(Some(value)),
                Err(err) if ref_moved(&err) => {
                    let delay = backoff_delay(self.options.backoff, round);
                    warn!(what, subject, round, delay_ms = delay.as_millis() as u64, "store: notes ref moved; retrying");
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err).git(),
            }
        }
        Err(GitsmartError::AnchorConflict {
            anchor: subject.to_string(),
            detail: format!(
                "{} kept moving; gave up after {} attempts",
                self.options.notes_ref,
                self.options.retries + 1
            ),
        })
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Records attached to `anchor` (any revspec, or a full id of a commit
    /// that may not exist locally), oldest capture first.
    pub fn get(&self, anchor: &str) -> Result<Vec<MemoryRecord>> {
        let repo = self.accessor.open()?;
        let oid = match git2::Oid::from_str(anchor) {
            Ok(oid) if anchor.len() == 40 => oid,
            _ => match repo.revparse_single(anchor).and_then(|obj| obj.peel_to_commit()) {
                Ok(commit) => commit.id(),
                Err(_) => return Ok(Vec::new()),
            },
        };
        let note = match repo.find_note(Some(&self.options.notes_ref), oid) {
            Ok(note) => note,
            Err(err) if err.code() == git2::ErrorCode::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err).git(),
        };
        match NoteBlob::decode(note.message().unwrap_or_default()) {
            Ok(blob) => Ok(blob.ordered()),
            Err(err) => {
                warn!(%anchor, error = %err, "store: note is not a gitsmart blob; ignoring");
                Ok(Vec::new())
            }
        }
    }

    /// Every record, grouped by anchor in anchor commit-time order (oldest
    /// first).  Anchors whose commit is missing locally come last.  The
    /// cursor decodes one blob at a time; call again to restart.
    pub fn list_all(&self) -> Result<RecordCursor> {
        let repo = self.accessor.open()?;
        let mut anchors = Vec::new();
        if let Some(tip) = ref_tip(&repo, &self.options.notes_ref)? {
            for (anchor, blob) in note_entries(&repo, tip)? {
                let time = repo
                    .find_commit(anchor)
                    .map(|c| c.time().seconds())
                    .unwrap_or(i64::MAX);
                anchors.push((time, anchor, blob));
            }
        }
        anchors.sort();
        debug!(anchors = anchors.len(), "store: list_all");
        Ok(RecordCursor {
            repo,
            pending: anchors.into_iter().map(|(_, a, b)| (a, b)).collect(),
            buffer: VecDeque::new(),
        })
    }

    fn find(&self, anchor: &str, id: &str) -> Result<MemoryRecord> {
        let mut matches: Vec<_> = self
            .get(anchor)?
            .into_iter()
            .filter(|r| r.id.starts_with(id))
            .collect();
        match matches.len() {
            0 => Err(GitsmartError::NotFound(format!("no record {id} on {anchor}"))),
            1 => Ok(matches.remove(0)),
            n => Err(GitsmartError::NotFound(format!("record prefix {id} is ambiguous ({n} matches)"))),
        }
    }

    // ── Sync ─────────────────────────────────────────────────────────────────

    /// Exchange notes with the configured remote.  One sync runs at a time per
    /// store; reads are not blocked.
    pub async fn sync(&self, direction: SyncDirection) -> Result<SyncOutcome> {
        let mut state = self.sync_state.lock().await;
        info!(direction = direction.label(), remote = %self.options.remote, "store: sync");
        match direction {
            SyncDirection::Pull => self.pull_locked().await,
            SyncDirection::Push => self.push_locked(&mut state).await,
        }
    }

    async fn pull_locked(&self) -> Result<SyncOutcome> {
        let tracking = self.tracking_ref();
        let fetched = transport::fetch_ref(
            self.accessor.root(),
            &self.options.remote,
            &self.options.notes_ref,
            &tracking,
        )
        .await?;
        if !fetched {
            return Ok(SyncOutcome::UpToDate);
        }
        Ok(match self.merge_notes(&tracking)? {
            MergeOutcome::UpToDate => SyncOutcome::UpToDate,
            MergeOutcome::FastForward => SyncOutcome::FastForwarded,
            MergeOutcome::Merged { anchors } => SyncOutcome::Merged { anchors },
        })
    }

    #[cfg(test)]
    fn run_before_push(&self) {
        let hook = self.before_push.lock().ok().and_then(|mut slot| slot.take());
        if let Some(hook) = hook {
            hook();
        }
    }

    async fn push_locked(&self, state: &mut SyncState) -> Result<SyncOutcome> {
        let root = self.accessor.root();
        let remote = &self.options.remote;
        let notes_ref = &self.options.notes_ref;

        for round in 0..=self.options.retries {
            let Some(tip) = self.local_tip()? else {
                return Ok(SyncOutcome::UpToDate);
            };
            if state.last_pushed.as_deref() == Some(tip.as_str()) {
                debug!(%tip, "store: tip already pushed");
                return Ok(SyncOutcome::UpToDate);
            }

            let remote_tip = transport::ls_remote(root, remote, notes_ref).await?;
            if remote_tip.as_deref() == Some(tip.as_str()) {
                state.last_pushed = Some(tip);
                return Ok(SyncOutcome::UpToDate);
            }
            if remote_tip.is_some() {
                self.pull_locked().await?;
            }

            let Some(tip) = self.local_tip()? else {
                return Ok(SyncOutcome::UpToDate);
            };
            #[cfg(test)]
            self.run_before_push();
            match transport::push_ref(root, remote, notes_ref).await {
                Ok(()) => {
                    state.last_pushed = Some(tip.clone());
                    return Ok(SyncOutcome::Pushed { tip });
                }
                Err(GitsmartError::AnchorConflict { .. }) if round < self.options.retries => {
                    warn!(round, "store: push rejected; pulling and retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(GitsmartError::AnchorConflict {
            anchor: notes_ref.clone(),
            detail: format!("{remote} kept moving during push"),
        })
    }
}

/// Lazily decoded walk over every stored record.
pub struct RecordCursor {
    repo: git2::Repository,
    pending: VecDeque<(git2::Oid, git2::Oid)>,
    buffer: VecDeque<MemoryRecord>,
}

impl Iterator for RecordCursor {
    type Item = Result<MemoryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            let (anchor, blob_oid) = self.pending.pop_front()?;
            let blob = match self.repo.find_blob(blob_oid) {
                Ok(blob) => blob,
                Err(err) => return Some(Err(gitsmart_repo::map_git_error(err))),
            };
            match NoteBlob::decode(&String::from_utf8_lossy(blob.content())) {
                Ok(decoded) => self.buffer.extend(decoded.ordered()),
                Err(err) => {
                    warn!(%anchor, error = %err, "store: skipping undecodable note");
                }
            }
        }
    }
}

// ── libgit2 helpers ───────────────────────────────────────────────────────────

fn ref_tip(repo: &git2::Repository, refname: &str) -> Result<Option<git2::Oid>> {
    match repo.refname_to_id(refname) {
        Ok(oid) => Ok(Some(oid)),
        Err(err) if err.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(err) => Err(err).git(),
    }
}

fn ref_moved(err: &git2::Error) -> bool {
    matches!(
        err.code(),
        git2::ErrorCode::Modified | git2::ErrorCode::Exists | git2::ErrorCode::Locked
    )
}

/// anchor → blob for every note in the notes commit `tip`, flattening any
/// fanout directories git may have introduced.
fn note_entries(repo: &git2::Repository, tip: git2::Oid) -> Result<BTreeMap<git2::Oid, git2::Oid>> {
    let tree = repo.find_commit(tip).and_then(|c| c.tree()).git()?;
    let mut entries = BTreeMap::new();
    tree.walk(git2::TreeWalkMode::PreOrder, |dir, entry| {
        if entry.kind() == Some(git2::ObjectType::Blob) {
            let name = format!("{}{}", dir.replace('/', ""), entry.name().unwrap_or(""));
            if let Ok(anchor) = git2::Oid::from_str(&name) {
                if name.len() == 40 {
                    entries.insert(anchor, entry.id());
                }
            }
        }
        git2::TreeWalkResult::Ok
    })
    .git()?;
    Ok(entries)
}

/// Author recorded on notes written by something other than gitsmart.
pub const FOREIGN_NOTE_AUTHOR: &str = "git-notes";
pub const FOREIGN_NOTE_TAG: &str = "imported";

/// Decode the note blob for `anchor`.  A note gitsmart did not write (e.g.
/// `git notes --ref gitsmart add`) is kept as a `note` record so the next
/// write does not drop its text.
fn read_blob_or_adopt(repo: &git2::Repository, anchor: git2::Oid, oid: git2::Oid) -> Result<NoteBlob> {
    let blob = repo.find_blob(oid).git()?;
    let text = String::from_utf8_lossy(blob.content());
    match NoteBlob::decode(&text) {
        Ok(decoded) => Ok(decoded),
        Err(err) => {
            warn!(%anchor, error = %err, "store: adopting foreign note as a record");
            let mut adopted = NoteBlob::default();
            if !text.trim().is_empty() {
                let mut record = MemoryRecord::new(
                    anchor.to_string(),
                    text.trim(),
                    RecordKind::Note,
                    vec![FOREIGN_NOTE_TAG.to_string()],
                    FOREIGN_NOTE_AUTHOR,
                    Origin::Manual,
                );
                // Anchor time, so clones adopting the same note agree.
                if let Some(time) = repo
                    .find_commit(anchor)
                    .ok()
                    .and_then(|c| chrono::DateTime::from_timestamp(c.time().seconds(), 0))
                {
                    record.timestamp = time;
                }
                adopted.insert(record)?;
            }
            Ok(adopted)
        }
    }
}

fn write_notes_commit(
    repo: &git2::Repository,
    entries: &BTreeMap<git2::Oid, git2::Oid>,
    parents: Vec<git2::Oid>,
    message: &str,
) -> Result<git2::Oid> {
    let mut builder = repo.treebuilder(None).git()?;
    for (anchor, blob) in entries {
        builder.insert(anchor.to_string(), *blob, 0o100644).git()?;
    }
    let tree = repo.find_tree(builder.write().git()?).git()?;
    let parents = parents
        .into_iter()
        .map(|oid| repo.find_commit(oid))
        .collect::<std::result::Result<Vec<_>, _>>()
        .git()?;
    let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
    let sig = repo
        .signature()
        .or_else(|_| git2::Signature::now("gitsmart", "gitsmart@localhost"))
        .git()?;
    repo.commit(None, &sig, &sig, message, &tree, &parent_refs).git()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Origin, RecordKind};
    use std::path::Path;
    use tempfile::TempDir;

    /// Commit a single file at `time`, on top of HEAD if there is one.
    fn commit(repo: &git2::Repository, name: &str, time: i64) -> git2::Oid {
        let blob = repo.blob(name.as_bytes()).unwrap();
        let mut builder = repo.treebuilder(None).unwrap();
        builder.insert(name, blob, 0o100644).unwrap();
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();
        let sig = git2::Signature::new("Test", "test@test.com", &git2::Time::new(time, 0)).unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, name, &tree, &parents).unwrap()
    }

    fn store_at(path: &Path) -> NotesStore {
        let accessor = RepoAccessor::discover(path).unwrap();
        NotesStore::new(
            accessor,
            StoreOptions {
                backoff: Duration::from_millis(1),
                ..StoreOptions::default()
            },
        )
    }

    fn record(anchor: git2::Oid, content: &str) -> MemoryRecord {
        MemoryRecord::new(
            anchor.to_string(),
            content,
            RecordKind::Decision,
            vec!["redis".to_string()],
            "ann",
            Origin::Manual,
        )
    }

    fn fixture() -> (TempDir, git2::Repository, git2::Oid, git2::Oid) {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        let first = commit(&repo, "first", 1_000);
        let second = commit(&repo, "second", 2_000);
        (dir, repo, first, second)
    }

    #[test]
    fn put_is_idempotent() {
        let (dir, _repo, _, head) = fixture();
        let store = store_at(dir.path());
        let r = record(head, "Switched to async database connections for performance");

        assert_eq!(store.put(&r).unwrap(), InsertOutcome::Inserted);
        let tip = store.local_tip().unwrap();
        assert_eq!(store.put(&r).unwrap(), InsertOutcome::Unchanged);
        assert_eq!(store.local_tip().unwrap(), tip, "no-op put must not write a commit");

        let records = store.get(&head.to_string()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, r.id);
    }

    #[test]
    fn distinct_records_share_an_anchor() {
        let (dir, _repo, _, head) = fixture();
        let store = store_at(dir.path());
        store.put(&record(head, "Use Redis for sessions")).unwrap();
        store.put(&record(head, "Sessions expire after 24h")).unwrap();

        let records = store.get("HEAD").unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.anchor == head.to_string()));
    }

    #[test]
    fn conflicting_record_is_integrity_violation() {
        let (dir, _repo, _, head) = fixture();
        let store = store_at(dir.path());
        let original = record(head, "Use Redis");
        store.put(&original).unwrap();

        let mut clash = original.clone();
        clash.kind = RecordKind::Bug;
        let err = store.put(&clash).unwrap_err();
        assert!(matches!(err, GitsmartError::IntegrityViolation { .. }), "unexpected: {err}");
        assert_eq!(store.get("HEAD").unwrap(), vec![original]);
    }

    #[test]
    fn put_requires_an_existing_anchor() {
        let (dir, _repo, _, _) = fixture();
        let store = store_at(dir.path());
        let mut r = record(git2::Oid::zero(), "orphan");
        r.anchor = "1111111111111111111111111111111111111111".into();
        assert!(store.put(&r).unwrap_err().is_not_found());
        r.anchor = "not-a-sha".into();
        assert!(store.put(&r).unwrap_err().is_not_found());
    }

    #[test]
    fn get_without_notes_is_empty() {
        let (dir, _repo, first, _) = fixture();
        let store = store_at(dir.path());
        assert!(store.get("HEAD").unwrap().is_empty());
        store.put(&record(first, "only on first")).unwrap();
        assert!(store.get("HEAD").unwrap().is_empty());
        assert!(store.get("no-such-rev").unwrap().is_empty());
        assert_eq!(store.get("HEAD~1").unwrap().len(), 1);
    }

    #[test]
    fn list_all_orders_by_anchor_commit_time_and_restarts() {
        let (dir, _repo, first, second) = fixture();
        let store = store_at(dir.path());
        store.put(&record(second, "later anchor")).unwrap();
        store.put(&record(first, "earlier anchor")).unwrap();

        let contents: Vec<String> = store
            .list_all()
            .unwrap()
            .map(|r| r.unwrap().content)
            .collect();
        assert_eq!(contents, vec!["earlier anchor", "later anchor"]);

        let again: Vec<String> = store.list_all().unwrap().map(|r| r.unwrap().content).collect();
        assert_eq!(again, contents);
    }

    #[test]
    fn list_all_skips_foreign_notes() {
        let (dir, repo, first, second) = fixture();
        let store = store_at(dir.path());
        store.put(&record(second, "structured")).unwrap();
        let sig = git2::Signature::now("Human", "human@test.com").unwrap();
        repo.note(&sig, &sig, Some(store.notes_ref()), first, "hand-written note", false)
            .unwrap();

        let records: Vec<_> = store.list_all().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "structured");
    }

    #[test]
    fn foreign_note_is_ignored_by_get_and_kept_by_put() {
        let (dir, repo, _, head) = fixture();
        let store = store_at(dir.path());
        let sig = git2::Signature::now("Human", "human@test.com").unwrap();
        repo.note(&sig, &sig, Some(store.notes_ref()), head, "hand-written note", false)
            .unwrap();

        assert!(store.get("HEAD").unwrap().is_empty());
        assert_eq!(store.list_all().unwrap().count(), 0);

        let r = record(head, "Use Redis for sessions");
        assert_eq!(store.put(&r).unwrap(), InsertOutcome::Inserted);

        let records = store.get("HEAD").unwrap();
        assert_eq!(records.len(), 2);
        let adopted = records.iter().find(|rec| rec.id != r.id).unwrap();
        assert_eq!(adopted.content, "hand-written note");
        assert_eq!(adopted.kind, RecordKind::Note);
        assert!(adopted.tags.contains(FOREIGN_NOTE_TAG));
        assert_eq!(adopted.author, FOREIGN_NOTE_AUTHOR);
        assert_eq!(adopted.timestamp.timestamp(), 2_000);
        assert!(records.iter().any(|rec| rec.id == r.id));
    }

    #[test]
    fn moved_notes_ref_is_retried_then_reported_as_conflict() {
        let (dir, _repo, first, head) = fixture();
        let store = store_at(dir.path());
        let other = store_at(dir.path());
        store.put(&record(head, "Use Redis for sessions")).unwrap();

        let mut rounds = 0;
        let value = store
            .with_cas("test", "HEAD", |_, tip| {
                rounds += 1;
                if rounds == 1 {
                    other.put(&record(first, "Written in between")).unwrap();
                }
                Ok(tip.map(|tip| (tip, rounds)))
            })
            .unwrap();
        assert_eq!(value, Some(2), "stale tip must be re-read and retried");
        assert_eq!(store.get(&first.to_string()).unwrap().len(), 1, "the other write survives");

        let impatient = NotesStore::new(
            RepoAccessor::discover(dir.path()).unwrap(),
            StoreOptions {
                retries: 0,
                backoff: Duration::from_millis(1),
                ..StoreOptions::default()
            },
        );
        let mut attempts = 0;
        let err = impatient
            .with_cas("test", "HEAD", |_, tip| {
                attempts += 1;
                other.put(&record(first, &format!("Writer {attempts}"))).unwrap();
                Ok(tip.map(|tip| (tip, ())))
            })
            .unwrap_err();
        assert_eq!(attempts, 1);
        match err {
            GitsmartError::AnchorConflict { anchor, detail } => {
                assert_eq!(anchor, "HEAD");
                assert!(detail.contains("gave up after 1 attempts"), "{detail}");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn enhancement_can_be_added_once() {
        let (dir, _repo, _, head) = fixture();
        let store = store_at(dir.path());
        let r = record(head, "Use Redis");
        store.put(&r).unwrap();

        let amended = store
            .amend_enhancement("HEAD", &r.id[..10], Enhancement::from_text("sticky sessions"))
            .unwrap();
        assert_eq!(amended.content, r.content);
        assert_eq!(store.get("HEAD").unwrap()[0].enhancement, amended.enhancement);

        let err = store
            .amend_enhancement("HEAD", &r.id, Enhancement::from_text("something else"))
            .unwrap_err();
        assert!(matches!(err, GitsmartError::IntegrityViolation { .. }));
        assert!(store.amend_enhancement("HEAD", "zzzz", Enhancement::from_text("x")).unwrap_err().is_not_found());
    }

    #[test]
    fn divergent_notes_merge_as_union() {
        let (dir, repo, _, head) = fixture();
        let store = store_at(dir.path());
        let notes_ref = store.notes_ref().to_string();

        let base = record(head, "base record");
        store.put(&base).unwrap();
        let base_tip = repo.refname_to_id(&notes_ref).unwrap();

        // "Their" line of history: base + theirs.
        let theirs = record(head, "added on another clone");
        store.put(&theirs).unwrap();
        let their_tip = repo.refname_to_id(&notes_ref).unwrap();
        repo.reference("refs/test/theirs", their_tip, true, "test").unwrap();

        // Rewind and write "ours" concurrently on the same anchor.
        repo.reference(&notes_ref, base_tip, true, "test").unwrap();
        let ours = record(head, "added locally");
        store.put(&ours).unwrap();

        assert_eq!(
            store.merge_notes("refs/test/theirs").unwrap(),
            MergeOutcome::Merged { anchors: 1 }
        );
        let ids: Vec<_> = store.get("HEAD").unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 3);
        for r in [&base, &theirs, &ours] {
            assert!(ids.contains(&r.id));
        }

        let merge_commit = repo.find_commit(repo.refname_to_id(&notes_ref).unwrap()).unwrap();
        assert_eq!(merge_commit.parent_count(), 2);
        assert_eq!(store.merge_notes("refs/test/theirs").unwrap(), MergeOutcome::UpToDate);
    }

    #[test]
    fn merge_fast_forwards_when_local_is_behind_or_missing() {
        let (dir, repo, _, head) = fixture();
        let store = store_at(dir.path());
        let notes_ref = store.notes_ref().to_string();
        store.put(&record(head, "one")).unwrap();
        let tip = repo.refname_to_id(&notes_ref).unwrap();
        repo.reference("refs/test/other", tip, true, "test").unwrap();

        repo.find_reference(&notes_ref).unwrap().delete().unwrap();
        assert_eq!(store.merge_notes("refs/test/other").unwrap(), MergeOutcome::FastForward);
        assert_eq!(store.local_tip().unwrap(), Some(tip.to_string()));
        assert_eq!(store.merge_notes("refs/test/missing").unwrap(), MergeOutcome::UpToDate);
    }

    #[test]
    fn merge_aborts_on_integrity_violation() {
        let (dir, repo, _, head) = fixture();
        let store = store_at(dir.path());
        let notes_ref = store.notes_ref().to_string();

        let decision = record(head, "Use Redis");
        store.put(&decision).unwrap();
        let their_tip = repo.refname_to_id(&notes_ref).unwrap();
        repo.reference("refs/test/theirs", their_tip, true, "test").unwrap();
        repo.find_reference(&notes_ref).unwrap().delete().unwrap();

        let mut bug = decision.clone();
        bug.kind = RecordKind::Bug;
        store.put(&bug).unwrap();
        let our_tip = store.local_tip().unwrap();

        let err = store.merge_notes("refs/test/theirs").unwrap_err();
        match err {
            GitsmartError::IntegrityViolation { existing, incoming, .. } => {
                assert!(existing.contains("bug"));
                assert!(incoming.contains("decision"));
            }
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(store.local_tip().unwrap(), our_tip, "failed merge must not move the ref");
    }

    // ── sync against a bare remote (needs the git CLI) ─────────────────────

    fn git_available() -> bool {
        std::process::Command::new("git").arg("--version").output().is_ok()
    }

    /// Alice and Bob clones of one commit, both pointing at an empty bare origin.
    fn two_clones() -> (TempDir, std::path::PathBuf, std::path::PathBuf, git2::Oid) {
        let dir = TempDir::new().unwrap();
        let bare = dir.path().join("origin.git");
        git2::Repository::init_bare(&bare).unwrap();

        let a_path = dir.path().join("alice");
        let alice = git2::Repository::init(&a_path).unwrap();
        let anchor = commit(&alice, "shared", 1_000);
        alice.remote("origin", bare.to_str().unwrap()).unwrap();

        let b_path = dir.path().join("bob");
        let bob = git2::Repository::clone(a_path.to_str().unwrap(), &b_path).unwrap();
        bob.remote_set_url("origin", bare.to_str().unwrap()).unwrap();
        (dir, a_path, b_path, anchor)
    }

    #[tokio::test]
    async fn concurrent_captures_survive_sync_and_push_is_idempotent() {
        if !git_available() {
            return;
        }
        let (_dir, a_path, b_path, anchor) = two_clones();
        let store_a = store_at(&a_path);
        let store_b = store_at(&b_path);
        let from_alice = record(anchor, "Use Redis for sessions");
        let from_bob = record(anchor, "Session TTL is 24h");
        store_a.put(&from_alice).unwrap();
        store_b.put(&from_bob).unwrap();

        assert!(matches!(store_a.sync(SyncDirection::Push).await.unwrap(), SyncOutcome::Pushed { .. }));
        assert!(matches!(store_b.sync(SyncDirection::Push).await.unwrap(), SyncOutcome::Pushed { .. }));
        assert_eq!(store_b.get(&anchor.to_string()).unwrap().len(), 2);

        assert_eq!(store_a.sync(SyncDirection::Pull).await.unwrap(), SyncOutcome::FastForwarded);
        let ids: Vec<_> = store_a.get(&anchor.to_string()).unwrap().into_iter().map(|r| r.id).collect();
        assert!(ids.contains(&from_alice.id) && ids.contains(&from_bob.id));

        assert_eq!(store_a.sync(SyncDirection::Pull).await.unwrap(), SyncOutcome::UpToDate);
        assert_eq!(store_b.sync(SyncDirection::Push).await.unwrap(), SyncOutcome::UpToDate);
        assert_eq!(store_b.sync(SyncDirection::Push).await.unwrap(), SyncOutcome::UpToDate);
    }

    #[tokio::test]
    async fn rejected_push_pulls_and_retries() {
        if !git_available() {
            return;
        }
        let (_dir, a_path, b_path, anchor) = two_clones();
        let store_a = store_at(&a_path);
        let store_b = store_at(&b_path);
        let from_alice = record(anchor, "Use Redis for sessions");
        let from_bob = record(anchor, "Session TTL is 24h");
        store_a.put(&from_alice).unwrap();
        store_b.put(&from_bob).unwrap();

        // Bob pushes after Alice saw an empty remote but before her push lands.
        let notes_ref = store_b.notes_ref().to_string();
        let bob_dir = b_path.clone();
        *store_a.before_push.lock().unwrap() = Some(Box::new(move || {
            let status = std::process::Command::new("git")
                .args(["push", "origin", &format!("{notes_ref}:{notes_ref}")])
                .current_dir(&bob_dir)
                .output()
                .unwrap()
                .status;
            assert!(status.success());
        }));

        let outcome = store_a.sync(SyncDirection::Push).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Pushed { .. }), "unexpected: {outcome:?}");
        assert!(store_a.before_push.lock().unwrap().is_none());

        let ids: Vec<_> = store_a.get(&anchor.to_string()).unwrap().into_iter().map(|r| r.id).collect();
        assert!(ids.contains(&from_alice.id) && ids.contains(&from_bob.id));
        assert_eq!(store_b.sync(SyncDirection::Pull).await.unwrap(), SyncOutcome::FastForwarded);
        assert_eq!(store_b.get(&anchor.to_string()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_pushes_on_one_store_push_once() {
        if !git_available() {
            return;
        }
        let (_dir, a_path, _b_path, anchor) = two_clones();
        let store = store_at(&a_path);
        store.put(&record(anchor, "Use Redis for sessions")).unwrap();

        let (left, right) = tokio::join!(store.sync(SyncDirection::Push), store.sync(SyncDirection::Push));
        let outcomes = [left.unwrap(), right.unwrap()];
        let pushed = outcomes.iter().filter(|o| matches!(o, SyncOutcome::Pushed { .. })).count();
        let up_to_date = outcomes.iter().filter(|o| **o == SyncOutcome::UpToDate).count();
        assert_eq!((pushed, up_to_date), (1, 1), "{outcomes:?}");
    }

    #[tokio::test]
    async fn sync_with_nothing_to_exchange_is_a_no_op() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let bare = dir.path().join("origin.git");
        git2::Repository::init_bare(&bare).unwrap();
        let work = dir.path().join("work");
        let repo = git2::Repository::init(&work).unwrap();
        commit(&repo, "init", 1_000);
        repo.remote("origin", bare.to_str().unwrap()).unwrap();

        let store = store_at(&work);
        assert_eq!(store.sync(SyncDirection::Push).await.unwrap(), SyncOutcome::UpToDate);
        assert_eq!(store.sync(SyncDirection::Pull).await.unwrap(), SyncOutcome::UpToDate);
    }
}
