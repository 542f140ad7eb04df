use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use gitsmart_config::{AppConfig, ProviderKind};
use gitsmart_core::{GitsmartError, ProviderError};

// ── Provider contract ─────────────────────────────────────────────────────────

/// Per-call knobs.  Providers ignore what they cannot express.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            system: None,
            temperature: 0.5,
            max_tokens: 800,
        }
    }
}

impl CompletionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            system: None,
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// A text-completion backend: prompt in, completion text out.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError>;
}

pub type SharedProvider = Arc<dyn CompletionProvider>;

/// Run one provider call under `timeout`, retrying once when the first
/// failure is transient.  A timeout is reported as [`ProviderError::Timeout`]
/// and is not retried.
pub async fn complete_with_retry(
    provider: &dyn CompletionProvider,
    prompt: &str,
    options: &CompletionOptions,
    timeout: Duration,
) -> Result<String, ProviderError> {
    match complete_with_timeout(provider, prompt, options, timeout).await {
        Err(err) if err.is_transient() => {
            warn!(provider = provider.name(), error = %err, "transient provider failure; retrying once");
            complete_with_timeout(provider, prompt, options, timeout).await
        }
        other => other,
    }
}

async fn complete_with_timeout(
    provider: &dyn CompletionProvider,
    prompt: &str,
    options: &CompletionOptions,
    timeout: Duration,
) -> Result<String, ProviderError> {
    match tokio::time::timeout(timeout, provider.complete(prompt, options)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(timeout.as_secs().max(1))),
    }
}

/// Cheap round-trip used by `doctor` to check credentials and reachability.
pub async fn test_connection(provider: &dyn CompletionProvider, timeout: Duration) -> Result<(), ProviderError> {
    let options = CompletionOptions {
        max_tokens: 10,
        ..CompletionOptions::default()
    };
    let reply = complete_with_timeout(provider, "Reply with the single word: ok", &options, timeout).await?;
    if reply.trim().is_empty() {
        return Err(ProviderError::Unknown("empty completion".to_string()));
    }
    Ok(())
}

/// Construct the provider selected by `[llm] provider`.
pub fn build_provider(config: &AppConfig) -> Result<SharedProvider, GitsmartError> {
    let timeout = Duration::from_secs(config.llm.timeout_secs.max(1));
    let provider: SharedProvider = match config.llm.provider {
        ProviderKind::Ollama => Arc::new(OllamaClient::new(
            &config.llm.ollama_base_url,
            &config.llm.ollama_model,
            timeout,
        )),
        kind => {
            let api_key = config.api_key().ok_or_else(|| {
                GitsmartError::Config(format!(
                    "{} is not set; export it or switch [llm] provider",
                    kind.api_key_env().unwrap_or("API key")
                ))
            })?;
            Arc::new(OpenAiCompatClient::new(
                kind,
                config.active_model(),
                api_key,
                timeout,
            ))
        }
    };
    Ok(provider)
}

// ── HTTP status mapping ───────────────────────────────────────────────────────

fn classify_status(status: reqwest::StatusCode, body: &str) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Unauthorized(format!("{status}")),
        429 => ProviderError::RateLimited,
        502..=504 => ProviderError::Network(format!("{status}: {}", snippet(body))),
        _ => ProviderError::Unknown(format!("{status}: {}", snippet(body))),
    }
}

fn classify_transport(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout.as_secs())
    } else if err.is_connect() || err.is_request() {
        ProviderError::Network(err.to_string())
    } else {
        ProviderError::Unknown(err.to_string())
    }
}

fn snippet(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((i, _)) => &body[..i],
        None => body,
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

// ── Ollama ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl CompletionProvider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let endpoint = format!("{}/api/generate", self.base_url);

        let mut payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            }
        });
        if let Some(system) = &options.system {
            payload["system"] = json!(system);
        }

        debug!(model = %self.model, endpoint = %endpoint, "ollama: generate");
        let response = self
            .client
            .post(endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|err| classify_transport(err, self.timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| classify_transport(err, self.timeout))?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let body: serde_json::Value = serde_json::from_str(&text)
            .map_err(|err| ProviderError::Unknown(format!("malformed Ollama response: {err}")))?;
        body.get("response")
            .and_then(|value| value.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| ProviderError::Unknown(format!("Ollama response missing text: {}", snippet(&text))))
    }
}

// ── OpenAI-compatible chat completions (OpenRouter, OpenAI, DeepSeek) ────────

#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    kind: ProviderKind,
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiCompatClient {
    pub fn new(kind: ProviderKind, model: &str, api_key: String, timeout: Duration) -> Self {
        let base = match kind {
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::DeepSeek => "https://api.deepseek.com",
            _ => "https://api.openai.com/v1",
        };
        Self::with_base_url(kind, base, model, api_key, timeout)
    }

    pub fn with_base_url(
        kind: ProviderKind,
        base_url: &str,
        model: &str,
        api_key: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client: http_client(timeout),
            kind,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatClient {
    fn name(&self) -> &str {
        self.kind.label()
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let mut messages = Vec::new();
        if let Some(system) = &options.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });

        debug!(provider = self.kind.label(), model = %self.model, "chat completion");
        let mut request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload);
        if self.kind == ProviderKind::OpenRouter {
            request = request
                .header("HTTP-Referer", "https://gitsmart.local")
                .header("X-Title", "gitsmart");
        }

        let response = request
            .send()
            .await
            .map_err(|err| classify_transport(err, self.timeout))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| classify_transport(err, self.timeout))?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let body: serde_json::Value = serde_json::from_str(&text)
            .map_err(|err| ProviderError::Unknown(format!("malformed completion response: {err}")))?;
        body.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| ProviderError::Unknown(format!("completion response missing content: {}", snippet(&text))))
    }
}

// ── Structured output extraction ──────────────────────────────────────────────

/// Fields a provider is asked to return when elaborating a decision record.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StructuredEnhancement {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub consequences: Vec<String>,
    #[serde(default)]
    pub related_files: Vec<String>,
}

/// Extract the first valid JSON object from an LLM response.
///
/// Looks for ` ```json\n...\n` ``` ` delimiters first, then falls back to the
/// span between the first `{` and the last `}`.  Returns `None` when neither
/// parses.
///
/// ```rust
/// use gitsmart_llm::{extract_json_output, StructuredEnhancement};
///
/// let raw = "Sure!\n```json\n{\"reasoning\":\"latency\"}\n```";
/// let out = extract_json_output::<StructuredEnhancement>(raw).unwrap();
/// assert_eq!(out.reasoning.as_deref(), Some("latency"));
/// ```
pub fn extract_json_output<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    if let Some(fence_start) = response.find("```json") {
        let after_fence = &response[fence_start + "```json".len()..];
        if let Some(json_start) = after_fence.find(|c: char| !c.is_whitespace()) {
            let json_body = &after_fence[json_start..];
            if let Some(fence_end) = json_body.find("```") {
                let json_str = json_body[..fence_end].trim();
                if let Ok(val) = serde_json::from_str(json_str) {
                    return Some(val);
                }
            }
        }
    }

    let trimmed = response.trim();
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                let candidate = &trimmed[start..=end];
                if let Ok(val) = serde_json::from_str(candidate) {
                    return Some(val);
                }
            }
        }
    }

    None
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a fixed list of outcomes, one per call, optionally sleeping first.
    struct Scripted {
        outcomes: Vec<Result<String, ProviderError>>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                outcomes,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _: &str, _: &CompletionOptions) -> Result<String, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcomes
                .get(n)
                .cloned()
                .unwrap_or_else(|| Err(ProviderError::Unknown("script exhausted".into())))
        }
    }

    // ── retry policy ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let provider = Scripted::new(vec![
            Err(ProviderError::Network("reset".into())),
            Ok("second time lucky".into()),
        ]);
        let out = complete_with_retry(&provider, "p", &CompletionOptions::default(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, "second time lucky");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn only_one_retry_is_attempted() {
        let provider = Scripted::new(vec![
            Err(ProviderError::RateLimited),
            Err(ProviderError::RateLimited),
            Ok("never reached".into()),
        ]);
        let err = complete_with_retry(&provider, "p", &CompletionOptions::default(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::RateLimited);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let provider = Scripted::new(vec![Err(ProviderError::Unauthorized("401".into()))]);
        let err = complete_with_retry(&provider, "p", &CompletionOptions::default(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let mut provider = Scripted::new(vec![Ok("too late".into())]);
        provider.delay = Duration::from_millis(500);
        let err = complete_with_retry(&provider, "p", &CompletionOptions::default(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_rejects_empty_reply() {
        let provider = Scripted::new(vec![Ok("   ".into())]);
        assert!(test_connection(&provider, Duration::from_secs(1)).await.is_err());
        let provider = Scripted::new(vec![Ok("ok".into())]);
        assert!(test_connection(&provider, Duration::from_secs(1)).await.is_ok());
    }

    // ── status mapping ─────────────────────────────────────────────────────

    #[test]
    fn http_statuses_map_to_provider_errors() {
        use reqwest::StatusCode;
        assert!(matches!(classify_status(StatusCode::UNAUTHORIZED, ""), ProviderError::Unauthorized(_)));
        assert!(matches!(classify_status(StatusCode::FORBIDDEN, ""), ProviderError::Unauthorized(_)));
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS, ""), ProviderError::RateLimited);
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(matches!(classify_status(StatusCode::BAD_REQUEST, "bad"), ProviderError::Unknown(_)));
    }

    #[test]
    fn build_provider_requires_key_for_hosted_providers() {
        let mut config = AppConfig::default();
        config.llm.provider = ProviderKind::DeepSeek;
        // SAFETY: no other test in this crate touches DEEPSEEK_API_KEY.
        unsafe { std::env::remove_var("DEEPSEEK_API_KEY") };
        assert!(matches!(build_provider(&config), Err(GitsmartError::Config(_))));

        config.llm.provider = ProviderKind::Ollama;
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    // ── extract_json_output ────────────────────────────────────────────────

    #[test]
    fn extract_fenced_json() {
        let raw = "Here you go:\n```json\n{\"summary\":\"Moved to sqlx\",\"consequences\":[\"async everywhere\"]}\n```\nDone.";
        let out = extract_json_output::<StructuredEnhancement>(raw).unwrap();
        assert_eq!(out.summary.as_deref(), Some("Moved to sqlx"));
        assert_eq!(out.consequences, vec!["async everywhere".to_string()]);
        assert!(out.related_files.is_empty());
    }

    #[test]
    fn extract_bare_json_with_surrounding_text() {
        let raw = "preamble {\"reasoning\":\"pool exhaustion\"} epilogue";
        let out = extract_json_output::<StructuredEnhancement>(raw).unwrap();
        assert_eq!(out.reasoning.as_deref(), Some("pool exhaustion"));
    }

    #[test]
    fn extract_returns_none_for_plain_text() {
        assert!(extract_json_output::<StructuredEnhancement>("Just prose, no JSON.").is_none());
        assert!(extract_json_output::<StructuredEnhancement>("").is_none());
        assert!(extract_json_output::<StructuredEnhancement>("```json\n{not valid}\n```").is_none());
    }

    #[test]
    fn extract_fenced_takes_precedence_over_bare() {
        let raw = "Bare: {\"summary\":\"wrong\"}\n```json\n{\"summary\":\"right\"}\n```\n";
        let out = extract_json_output::<StructuredEnhancement>(raw).unwrap();
        assert_eq!(out.summary.as_deref(), Some("right"));
    }
}
