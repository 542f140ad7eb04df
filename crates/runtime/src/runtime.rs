use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use tracing::{info, instrument, warn};

use gitsmart_config::AppConfig;
use gitsmart_core::{GitsmartError, ProviderError, Result};
use gitsmart_llm::{
    CompletionOptions, CompletionProvider, SharedProvider, build_provider, complete_with_retry, test_connection,
};
use gitsmart_memory::{
    MemoryRecord, NotesStore, Origin, QueryEvent, QueryHistory, RecordKind, StoreOptions, SyncDirection,
    SyncOutcome,
};
use gitsmart_repo::{LockPolicy, RepoAccessor, transport};

use crate::commands::{AnalysisOutcome, CaptureRequest, Explanation, StatusReport};
use crate::enhance::{CaptureOutcome, EnhancementPipeline, ReviewDecider};
use crate::prompt_builder;
use crate::query::{Answer, AnswerResult, QueryEngine, QuerySettings};
use crate::significance::SignificanceDetector;
use crate::trigger::{CaptureTrigger, TriggerDecision};

/// Commits of a path's history shown to the provider by `explain_path`.
const EXPLAIN_COMMITS: usize = 20;
const RECENT_DECISIONS: usize = 5;
pub const AUTO_ANALYZED_TAG: &str = "auto-analyzed";

/// Every user-facing operation, bound to one repository.
pub struct GitsmartRuntime {
    config: AppConfig,
    repo: RepoAccessor,
    store: NotesStore,
    detector: SignificanceDetector,
    provider: Option<SharedProvider>,
    provider_error: Option<String>,
    history: QueryHistory,
}

impl GitsmartRuntime {
    /// Discover the repository containing `path` and load its
    /// `.gitsmart/config.toml`.  A provider that cannot be built (missing API
    /// key) leaves the runtime usable in degraded mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let repo = RepoAccessor::discover(path)?;
        let config = AppConfig::load_for_repo(repo.root()).map_err(|err| GitsmartError::Config(err.to_string()))?;
        let (provider, provider_error) = match build_provider(&config) {
            Ok(provider) => (Some(provider), None),
            Err(err) => {
                warn!(error = %err, "provider unavailable; AI features disabled");
                (None, Some(err.to_string()))
            }
        };
        let mut runtime = Self::with_provider(config, repo, provider);
        runtime.provider_error = provider_error;
        Ok(runtime)
    }

    pub fn with_provider(config: AppConfig, repo: RepoAccessor, provider: Option<SharedProvider>) -> Self {
        let backoff = Duration::from_millis(config.storage.lock_backoff_ms);
        let repo = repo.with_lock_policy(LockPolicy {
            retries: config.storage.lock_retries,
            backoff,
        });
        let store = NotesStore::new(
            repo.clone(),
            StoreOptions {
                notes_ref: config.storage.notes_ref.clone(),
                remote: config.storage.remote.clone(),
                retries: config.storage.lock_retries,
                backoff,
            },
        );
        let detector = SignificanceDetector::new(&config.capture);
        let history = QueryHistory::in_dir(repo.local_state_dir(), config.query.history_limit);
        Self {
            config,
            repo,
            store,
            detector,
            provider,
            provider_error: None,
            history,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn repo(&self) -> &RepoAccessor {
        &self.repo
    }

    pub fn store(&self) -> &NotesStore {
        &self.store
    }

    pub fn detector(&self) -> &SignificanceDetector {
        &self.detector
    }

    pub fn history(&self) -> &QueryHistory {
        &self.history
    }

    /// Why no provider is available, if it could not be built.
    pub fn provider_error(&self) -> Option<&str> {
        self.provider_error.as_deref()
    }

    fn provider(&self) -> Option<&dyn CompletionProvider> {
        self.provider.as_deref()
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.llm.timeout_secs.max(1))
    }

    pub fn pipeline(&self) -> EnhancementPipeline<'_> {
        EnhancementPipeline::new(self.provider(), CompletionOptions::from_config(&self.config), self.timeout())
    }

    fn unavailable_reason(&self) -> ProviderError {
        ProviderError::Unknown(
            self.provider_error
                .clone()
                .unwrap_or_else(|| "no AI provider configured".to_string()),
        )
    }

    // ── capture ──────────────────────────────────────────────────────────────

    #[instrument(skip(self, request, decider), fields(origin = request.origin.label(), use_ai = request.use_ai))]
    pub async fn capture(&self, request: CaptureRequest, decider: &mut dyn ReviewDecider) -> Result<CaptureOutcome> {
        let content = request.content.trim();
        if content.is_empty() {
            return Err(GitsmartError::Config("record content is empty".to_string()));
        }

        let rev = request.anchor.as_deref().unwrap_or("HEAD");
        let commit = self.repo.commit_info(rev)?;
        let diff = self.repo.diff_summary(&commit.id)?;
        let significance = self.detector.score(&commit, &diff);
        let kind = RecordKind::from_label(request.kind.as_deref().unwrap_or(&self.config.capture.default_type));
        let record = MemoryRecord::new(
            commit.id.clone(),
            content,
            kind,
            request.tags,
            self.repo.user_name(),
            request.origin,
        );

        let pipeline = self.pipeline();
        let mut session = pipeline.start(record, commit, diff, Some(significance));
        if request.use_ai {
            pipeline.request_suggestion(&mut session).await;
        } else {
            pipeline.skip(&mut session, request.skip_reason);
        }
        pipeline.review(&mut session, decider);
        pipeline.store(session, &self.store)
    }

    // ── query ────────────────────────────────────────────────────────────────

    pub fn query_engine(&self) -> QueryEngine<'_> {
        QueryEngine::new(
            &self.store,
            &self.repo,
            &self.detector,
            self.provider(),
            QuerySettings::from_config(&self.config),
        )
    }

    #[instrument(skip(self), fields(question_len = question.len()))]
    pub async fn query(&self, question: &str) -> Result<AnswerResult> {
        let mut result = self.query_engine().answer(question).await?;
        if let (Answer::Unavailable { .. }, None) = (&result.answer, &self.provider) {
            result.answer = Answer::Unavailable {
                reason: self.unavailable_reason(),
            };
        }

        if self.config.query.record_history {
            let event = QueryEvent::new(&result.question, result.text().map(str::to_string), result.source_ids());
            if let Err(err) = self.history.append(&event).await {
                warn!(error = %err, "failed to record query history");
            }
        }
        Ok(result)
    }

    pub fn query_history(&self, count: usize) -> Result<Vec<QueryEvent>> {
        self.history.recent(count)
    }

    // ── explain ──────────────────────────────────────────────────────────────

    #[instrument(skip(self))]
    pub async fn explain_path(&self, path: &str) -> Result<Explanation> {
        let mut history = self.repo.file_summary(path, None)?;
        if history.is_empty() {
            return Ok(Explanation {
                history,
                records: Vec::new(),
                answer: None,
            });
        }

        let mut records = Vec::new();
        for commit in &history.commits {
            records.extend(self.store.get(&commit.id)?);
        }
        history.commits.truncate(EXPLAIN_COMMITS);

        let answer = match self.provider() {
            None => Answer::Unavailable {
                reason: self.unavailable_reason(),
            },
            Some(provider) => {
                let prompt = prompt_builder::explain_prompt(&history, &records);
                let options = CompletionOptions::from_config(&self.config).with_system(prompt_builder::QUERY_SYSTEM);
                match complete_with_retry(provider, &prompt, &options, self.timeout()).await {
                    Ok(text) if !text.trim().is_empty() => Answer::Synthesized(text.trim().to_string()),
                    Ok(_) => Answer::Unavailable {
                        reason: ProviderError::Unknown("provider returned an empty explanation".to_string()),
                    },
                    Err(reason) => {
                        warn!(path, error = %reason, "explain: provider unavailable");
                        Answer::Unavailable { reason }
                    }
                }
            }
        };
        info!(path, commits = history.total_commits, records = records.len(), "explain: done");
        Ok(Explanation {
            history,
            records,
            answer: Some(answer),
        })
    }

    // ── status ───────────────────────────────────────────────────────────────

    /// Store and provider overview.  `check_remote` asks the remote for its
    /// notes tip, which needs the network.
    pub async fn list_status(&self, check_remote: bool) -> Result<StatusReport> {
        let mut records_by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_records = 0usize;
        let mut last_activity = None;
        let mut decisions = Vec::new();
        for record in self.store.list_all()? {
            let record = record?;
            total_records += 1;
            *records_by_kind.entry(record.kind.label().to_string()).or_default() += 1;
            if last_activity.is_none_or(|last| record.timestamp > last) {
                last_activity = Some(record.timestamp);
            }
            if record.kind == RecordKind::Decision {
                decisions.push(record);
            }
        }
        decisions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        decisions.truncate(RECENT_DECISIONS);

        let (remote_tip, remote_error) = if check_remote {
            match transport::ls_remote(self.repo.root(), self.store.remote(), self.store.notes_ref()).await {
                Ok(tip) => (tip, None),
                Err(err) => (None, Some(err.to_string())),
            }
        } else {
            (None, None)
        };

        Ok(StatusReport {
            provider: self.config.llm.provider.label().to_string(),
            model: self.config.active_model().to_string(),
            key_configured: self.config.api_key_configured(),
            notes_ref: self.store.notes_ref().to_string(),
            remote: self.store.remote().to_string(),
            local_tip: self.store.local_tip()?,
            remote_tip,
            remote_error,
            total_records,
            records_by_kind,
            last_activity,
            recent_decisions: decisions,
            stats: self.repo.repo_stats()?,
        })
    }

    // ── analyze-commit ───────────────────────────────────────────────────────

    #[instrument(skip(self))]
    pub async fn analyze_commit(&self, rev: &str, suggest_only: bool) -> Result<AnalysisOutcome> {
        let commit = self.repo.commit_info(rev)?;
        let diff = self.repo.diff_summary(&commit.id)?;
        let score = self.detector.score(&commit, &diff);

        let suggestion = match self.provider() {
            None => Err(self.unavailable_reason()),
            Some(provider) => {
                let prompt = prompt_builder::analyze_prompt(&commit, &diff, &score);
                let options = CompletionOptions::from_config(&self.config).with_system(prompt_builder::ENHANCE_SYSTEM);
                complete_with_retry(provider, &prompt, &options, self.timeout())
                    .await
                    .and_then(|text| match text.trim() {
                        "" => Err(ProviderError::Unknown("provider returned an empty suggestion".to_string())),
                        trimmed => Ok(trimmed.to_string()),
                    })
            }
        };
        let (reasoning, notice) = match suggestion {
            Ok(text) => (text, None),
            Err(err) => {
                warn!(commit = commit.short_id(), error = %err, "analyze: using generic summary");
                (
                    format!("Implemented changes related to: {}", commit.summary()),
                    Some(format!("AI analysis unavailable ({err}); used a generic summary")),
                )
            }
        };

        let stored = if suggest_only {
            None
        } else {
            let record = MemoryRecord::new(
                commit.id.clone(),
                reasoning.clone(),
                RecordKind::Decision,
                vec![AUTO_ANALYZED_TAG.to_string()],
                self.repo.user_name(),
                Origin::Automated,
            );
            let insert = self.store.put(&record)?;
            Some((record, insert))
        };

        Ok(AnalysisOutcome {
            commit,
            diff,
            score,
            reasoning,
            notice,
            stored,
        })
    }

    // ── sync / trigger / doctor ──────────────────────────────────────────────

    pub async fn sync(&self, direction: SyncDirection) -> Result<SyncOutcome> {
        self.store.sync(direction).await
    }

    pub fn on_commit(&self, rev: &str) -> Result<TriggerDecision> {
        CaptureTrigger::new(&self.repo, &self.store, &self.detector, self.config.capture.prompt_on_commit)
            .on_commit(rev)
    }

    /// Round-trip to the configured provider.
    pub async fn test_provider(&self) -> std::result::Result<String, ProviderError> {
        let provider = self.provider().ok_or_else(|| self.unavailable_reason())?;
        test_connection(provider, self.timeout()).await?;
        Ok(format!("{} ({})", provider.name(), self.config.active_model()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::enhance::{AcceptAll, CaptureState};
    use crate::testing::{Fixture, Scripted, ScriptedProvider};
    use gitsmart_memory::InsertOutcome;

    fn runtime(fx: &Fixture, provider: Option<Arc<ScriptedProvider>>) -> GitsmartRuntime {
        let mut config = AppConfig::default();
        config.storage.lock_backoff_ms = 1;
        config.llm.timeout_secs = 1;
        GitsmartRuntime::with_provider(config, fx.repo.clone(), provider.map(|p| p as SharedProvider))
    }

    #[tokio::test]
    async fn capture_twice_yields_one_record() {
        let fx = Fixture::new();
        fx.commit("Switch to async database connections", &[("src/db.rs", "async")]);
        let rt = runtime(&fx, None);

        let request = CaptureRequest::new("Switched to async database connections for performance");
        let first = rt.capture(request.clone(), &mut AcceptAll).await.unwrap();
        assert_eq!(first.insert, InsertOutcome::Inserted);
        assert_eq!(first.resolution, CaptureState::Declined);
        assert_eq!(first.record.kind, RecordKind::Decision);
        assert!(first.significance.as_ref().unwrap().is_significant);
        assert!(first.notice.is_some(), "degraded capture must say so");

        let second = rt.capture(request.without_ai(), &mut AcceptAll).await.unwrap();
        assert_eq!(second.insert, InsertOutcome::Unchanged);
        assert!(second.notice.is_none());
        assert_eq!(second.record.id, first.record.id);
        assert_eq!(rt.store().get("HEAD").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn capture_skipped_for_a_reason_says_so() {
        let fx = Fixture::new();
        fx.commit("Adopt Redis", &[("src/sessions.rs", "redis")]);
        let provider = Arc::new(ScriptedProvider::new(vec![Scripted::Reply("unused".into())]));
        let rt = runtime(&fx, Some(provider.clone()));

        let outcome = rt
            .capture(
                CaptureRequest::new("Sessions in Redis").without_ai_because("no terminal to review it; pass --yes"),
                &mut AcceptAll,
            )
            .await
            .unwrap();
        assert_eq!(provider.calls(), 0);
        assert!(outcome.record.enhancement.is_none());
        assert_eq!(
            outcome.notice.as_deref(),
            Some("stored without AI enhancement (no terminal to review it; pass --yes)")
        );

        let quiet = rt
            .capture(CaptureRequest::new("Session TTL is 24h").without_ai(), &mut AcceptAll)
            .await
            .unwrap();
        assert!(quiet.notice.is_none());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn capture_with_provider_stores_accepted_enhancement() {
        let fx = Fixture::new();
        fx.commit("Adopt Redis", &[("src/sessions.rs", "redis")]);
        let provider = Arc::new(ScriptedProvider::new(vec![Scripted::Reply(
            "{\"summary\":\"Redis sessions\",\"reasoning\":\"Stateless app servers\"}".into(),
        )]));
        let rt = runtime(&fx, Some(provider.clone()));

        let outcome = rt
            .capture(
                CaptureRequest::new("Sessions in Redis").kind("convention").tags(vec!["Redis".into()]),
                &mut AcceptAll,
            )
            .await
            .unwrap();
        assert_eq!(outcome.resolution, CaptureState::Accepted);
        assert_eq!(outcome.record.kind, RecordKind::Convention);
        assert!(outcome.record.tags.contains("redis"));
        assert_eq!(outcome.record.enhancement.unwrap().reasoning, "Stateless app servers");
        assert!(provider.prompts()[0].contains("src/sessions.rs"));
    }

    #[tokio::test]
    async fn empty_capture_is_rejected() {
        let fx = Fixture::new();
        fx.commit("init", &[("a", "a")]);
        let rt = runtime(&fx, None);
        assert!(rt.capture(CaptureRequest::new("   "), &mut AcceptAll).await.is_err());
    }

    #[tokio::test]
    async fn query_is_recorded_in_history() {
        let fx = Fixture::new();
        fx.commit("Add Redis session store", &[("src/sessions.rs", "r")]);
        let rt = runtime(&fx, None);

        let result = rt.query("Why Redis?").await.unwrap();
        assert!(result.text().is_none());
        assert!(matches!(&result.answer, Answer::Unavailable { reason } if reason.to_string().contains("no AI provider")));

        let events = rt.query_history(10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].question, "Why Redis?");
        assert_eq!(events[0].sources, result.source_ids());
        assert!(rt.history().path().starts_with(fx.repo.git_dir()));
    }

    #[tokio::test]
    async fn explain_path_collects_records_from_its_history() {
        let fx = Fixture::new();
        let first = fx.commit("Add cache", &[("src/cache.rs", "v1")]);
        fx.commit("Unrelated", &[("README.md", "x")]);
        let third = fx.commit("Tune cache eviction", &[("src/cache.rs", "v2")]);
        fx.store.put(&crate::testing::tagged(&first, "LRU keeps memory bounded", &["cache"])).unwrap();

        let provider = Arc::new(ScriptedProvider::new(vec![Scripted::Reply("It caches.".into())]));
        let rt = runtime(&fx, Some(provider.clone()));
        let explanation = rt.explain_path("src/cache.rs").await.unwrap();

        assert_eq!(explanation.history.total_commits, 2);
        assert_eq!(explanation.history.commits[0].id, third);
        assert_eq!(explanation.records.len(), 1);
        assert_eq!(explanation.answer, Some(Answer::Synthesized("It caches.".into())));
        assert!(provider.prompts()[0].contains("LRU keeps memory bounded"));

        let missing = rt.explain_path("src/nope.rs").await.unwrap();
        assert!(missing.history.is_empty());
        assert!(missing.answer.is_none());
    }

    #[tokio::test]
    async fn analyze_commit_falls_back_and_honours_suggest_only() {
        let fx = Fixture::new();
        fx.commit("Refactor billing module", &[("billing/mod.rs", "b")]);
        let rt = runtime(&fx, None);

        let preview = rt.analyze_commit("HEAD", true).await.unwrap();
        assert_eq!(preview.reasoning, "Implemented changes related to: Refactor billing module");
        assert!(preview.notice.is_some());
        assert!(preview.stored.is_none());
        assert!(rt.store().get("HEAD").unwrap().is_empty());

        let stored = rt.analyze_commit("HEAD", false).await.unwrap();
        let (record, insert) = stored.stored.unwrap();
        assert_eq!(insert, InsertOutcome::Inserted);
        assert_eq!(record.origin, Origin::Automated);
        assert!(record.tags.contains(AUTO_ANALYZED_TAG));
    }

    #[tokio::test]
    async fn analyze_commit_uses_provider_reasoning() {
        let fx = Fixture::new();
        fx.commit("Replace cron with queue", &[("jobs/queue.rs", "q")]);
        let provider = Arc::new(ScriptedProvider::new(vec![Scripted::Reply("Retries needed durability.".into())]));
        let rt = runtime(&fx, Some(provider));
        let outcome = rt.analyze_commit("HEAD", true).await.unwrap();
        assert_eq!(outcome.reasoning, "Retries needed durability.");
        assert!(outcome.notice.is_none());
        assert!(outcome.score.is_significant);
    }

    #[tokio::test]
    async fn status_counts_records_by_kind() {
        let fx = Fixture::new();
        fx.commit("init", &[("a.rs", "a")]);
        let rt = runtime(&fx, None);
        rt.capture(CaptureRequest::new("one").without_ai(), &mut AcceptAll).await.unwrap();
        rt.capture(CaptureRequest::new("two").kind("bug").without_ai(), &mut AcceptAll)
            .await
            .unwrap();

        let status = rt.list_status(false).await.unwrap();
        assert_eq!(status.total_records, 2);
        assert_eq!(status.records_by_kind.get("decision"), Some(&1));
        assert_eq!(status.records_by_kind.get("bug"), Some(&1));
        assert_eq!(status.recent_decisions.len(), 1);
        assert!(status.local_tip.is_some());
        assert!(status.remote_tip.is_none());
        assert_eq!(status.stats.commit_count, 1);
        assert_eq!(status.provider, "ollama");
    }

    #[tokio::test]
    async fn test_provider_reports_missing_provider() {
        let fx = Fixture::new();
        let rt = runtime(&fx, None);
        assert!(rt.test_provider().await.is_err());

        let ok = runtime(&fx, Some(Arc::new(ScriptedProvider::new(vec![Scripted::Reply("ok".into())]))));
        assert!(ok.test_provider().await.unwrap().starts_with("scripted"));
    }
}
