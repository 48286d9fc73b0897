//! The generate pipeline shared by every provider.
//!
//! ```text
//! Prompt ─▶ Provider::prepare_request ─▶ POST (retry, cancel) ─▶ Provider::parse_response ─▶ clean
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{LlmConfig, MemoryMode};
use crate::error::{LlmError, Result};
use crate::memory::{HeuristicTokenCounter, MemoryLlm};
use crate::providers::{Provider, ProviderRegistry};
use crate::retry::{RetryPolicy, with_retry};
use crate::types::{GenerateOptions, Message, Prompt, RequestParams};

/// Longest error body kept in [`LlmError::Api`].
const MAX_ERROR_BODY: usize = 512;

/// The text-generation capability shared by plain and memory-backed LLMs.
///
/// Memory-related methods default to "no memory"; only wrappers that keep a
/// conversation override them.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    /// Any [`LlmError`]; cancellation surfaces as [`LlmError::Cancelled`].
    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<String>;

    /// Change a construction-time request default.
    ///
    /// # Errors
    /// [`LlmError::UnknownOption`] for unrecognized keys.
    fn set_option(&mut self, key: &str, value: &Value) -> Result<()>;

    /// Name of the active provider.
    fn provider_name(&self) -> &str;

    /// Model identifier.
    fn model(&self) -> &str;

    /// Whether this generator keeps conversation history.
    fn has_memory(&self) -> bool {
        false
    }

    /// Snapshot of the retained conversation, oldest first.
    fn memory(&self) -> Vec<Message> {
        Vec::new()
    }

    /// Forget the conversation.
    fn clear_memory(&self) {}

    /// JSON Schema of [`Prompt`].
    ///
    /// # Errors
    /// [`LlmError::Config`] if the schema cannot be produced.
    fn prompt_json_schema(&self) -> Result<Value> {
        Prompt::json_schema()
    }
}

/// Strip Markdown code fences and clip to the outermost `{ … }`.
///
/// Providers often wrap JSON answers in fences or prose; downstream parsing
/// needs a bare object. Applying this twice gives the same result as once.
#[must_use]
pub fn clean_response(response: &str) -> String {
    let mut text = response.trim();

    loop {
        let before = text;
        if let Some(rest) = text.strip_prefix("```json") {
            text = rest;
        } else if let Some(rest) = text.strip_prefix("```") {
            text = rest;
        }
        if let Some(rest) = text.strip_suffix("```") {
            text = rest;
        }
        text = text.trim();
        if text.len() == before.len() {
            break;
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            text = &text[start..=end];
        }
    }

    text.trim().to_string()
}

/// The plain generate pipeline: one provider, no memory.
pub struct BaseLlm {
    provider: Box<dyn Provider>,
    http: Client,
    model: String,
    defaults: RequestParams,
    retry: RetryPolicy,
    timeout: Duration,
}

impl BaseLlm {
    /// Create a client around an already-built provider.
    #[must_use]
    pub fn new(
        provider: Box<dyn Provider>,
        model: impl Into<String>,
        defaults: RequestParams,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
            defaults,
            retry,
            timeout,
        }
    }

    /// Resolve the configured provider and build a client.
    ///
    /// # Errors
    /// [`LlmError::UnknownProvider`], [`LlmError::Config`] for invalid
    /// settings, [`LlmError::Unsupported`] when an endpoint override is
    /// requested for a provider without that capability.
    pub fn from_config(config: &LlmConfig, registry: &ProviderRegistry) -> Result<Self> {
        config.validate()?;
        let mut provider = registry.resolve(&config.provider, &config.api_key, &config.model)?;

        if let Some(endpoint) = &config.endpoint {
            let name = provider.name().to_string();
            let Some(capability) = provider.custom_endpoint() else {
                debug!(provider = %name, "endpoint override rejected");
                return Err(LlmError::Unsupported("custom endpoints"));
            };
            capability.set_endpoint(endpoint.clone());
        }

        debug!(
            provider = provider.name(),
            model = %config.model,
            endpoint = provider.endpoint(),
            max_retries = config.max_retries,
            "created LLM client"
        );

        Ok(Self::new(
            provider,
            config.model.clone(),
            config.request_params(),
            config.retry_policy(),
            Duration::from_millis(config.request_timeout_ms),
        ))
    }

    /// The active provider.
    #[must_use]
    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    /// Construction-time request defaults.
    #[must_use]
    pub fn defaults(&self) -> &RequestParams {
        &self.defaults
    }

    /// Retry policy used for every call.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Generate a completion for a whole conversation.
    ///
    /// # Errors
    /// Same as [`Generator::generate`].
    pub async fn generate_chat(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let params = options.merged_over(&self.defaults);
        let body = self.provider.prepare_chat_request(messages, &params)?;
        debug!(
            provider = self.provider.name(),
            messages = messages.len(),
            request_bytes = body.len(),
            "prepared chat request"
        );
        self.execute(&body, options, cancel).await
    }

    async fn execute(
        &self,
        body: &[u8],
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let started = Instant::now();
        let text = with_retry(self.retry, cancel, "generate", |attempt| {
            self.attempt(body, attempt, cancel)
        })
        .await?;

        let answer = if options.json_output { clean_response(&text) } else { text };
        debug!(
            provider = self.provider.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            response_chars = answer.len(),
            "generation complete"
        );
        Ok(answer)
    }

    async fn attempt(&self, body: &[u8], attempt: u32, cancel: &CancellationToken) -> Result<String> {
        let started = Instant::now();
        let mut request = self
            .http
            .post(self.provider.endpoint())
            .timeout(self.timeout)
            .body(body.to_vec());
        for (name, value) in self.provider.headers() {
            request = request.header(name, value);
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = request.send() => result.map_err(|e| self.transport_error(e))?,
        };
        let status = response.status();
        let bytes = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = response.bytes() => result.map_err(|e| self.transport_error(e))?,
        };

        debug!(
            provider = self.provider.name(),
            attempt,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            response_bytes = bytes.len(),
            "received response"
        );

        if !status.is_success() {
            let mut message = String::from_utf8_lossy(&bytes).into_owned();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            return Err(LlmError::Api { status: status.as_u16(), message });
        }

        self.provider.parse_response(&bytes)
    }

    fn transport_error(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout { after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX) }
        } else {
            LlmError::from(err)
        }
    }
}

#[async_trait]
impl Generator for BaseLlm {
    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if options.validate_prompt {
            prompt.validate()?;
        }

        let text = prompt.render();
        let params = options.merged_over(&self.defaults);
        let body = self.provider.prepare_request(&text, &params)?;
        debug!(
            provider = self.provider.name(),
            model = %self.model,
            prompt_chars = text.len(),
            request_bytes = body.len(),
            "prepared request"
        );
        self.execute(&body, options, cancel).await
    }

    fn set_option(&mut self, key: &str, value: &Value) -> Result<()> {
        self.defaults.set(key, value)?;
        debug!(key, %value, "option set");
        Ok(())
    }

    fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn model(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for BaseLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseLlm")
            .field("provider", &self.provider.name())
            .field("endpoint", &self.provider.endpoint())
            .field("model", &self.model)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// An LLM client with or without conversation memory, decided once from
/// [`MemoryMode`].
#[derive(Debug)]
pub enum Llm {
    /// Stateless calls.
    Plain(BaseLlm),
    /// Calls share a token-bounded conversation.
    WithMemory(MemoryLlm),
}

impl Llm {
    /// Build a client from configuration using the built-in providers.
    ///
    /// # Errors
    /// See [`BaseLlm::from_config`].
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Self::from_config(config, &ProviderRegistry::with_defaults())
    }

    /// Build a client from configuration and a custom registry.
    ///
    /// # Errors
    /// See [`BaseLlm::from_config`].
    pub fn from_config(config: &LlmConfig, registry: &ProviderRegistry) -> Result<Self> {
        let base = BaseLlm::from_config(config, registry)?;
        Ok(match config.memory_mode() {
            MemoryMode::None => Self::Plain(base),
            MemoryMode::Bounded { max_tokens } => {
                Self::WithMemory(MemoryLlm::new(base, max_tokens, HeuristicTokenCounter))
            }
        })
    }

    fn inner(&self) -> &dyn Generator {
        match self {
            Self::Plain(base) => base,
            Self::WithMemory(memory) => memory,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Generator {
        match self {
            Self::Plain(base) => base,
            Self::WithMemory(memory) => memory,
        }
    }
}

#[async_trait]
impl Generator for Llm {
    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.inner().generate(prompt, options, cancel).await
    }

    fn set_option(&mut self, key: &str, value: &Value) -> Result<()> {
        self.inner_mut().set_option(key, value)
    }

    fn provider_name(&self) -> &str {
        self.inner().provider_name()
    }

    fn model(&self) -> &str {
        self.inner().model()
    }

    fn has_memory(&self) -> bool {
        self.inner().has_memory()
    }

    fn memory(&self) -> Vec<Message> {
        self.inner().memory()
    }

    fn clear_memory(&self) {
        self.inner().clear_memory();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_strips_fences_and_prose() {
        let raw = "```json\n{\"score\": 0.8}\n```";
        assert_eq!(clean_response(raw), "{\"score\": 0.8}");

        let raw = "Sure! Here is the JSON you asked for:\n{\"a\": {\"b\": 1}}\nLet me know.";
        assert_eq!(clean_response(raw), "{\"a\": {\"b\": 1}}");
    }

    #[test]
    fn clean_leaves_plain_text_alone() {
        assert_eq!(clean_response("  just words  "), "just words");
        assert_eq!(clean_response("```\nplain\n```"), "plain");
    }

    #[test]
    fn clean_is_idempotent_on_nested_fences() {
        let raw = "``````json {\"x\": 1}``` ```";
        let once = clean_response(raw);
        assert_eq!(once, "{\"x\": 1}");
        assert_eq!(clean_response(&once), once);
    }

    fn config() -> LlmConfig {
        LlmConfig::default().with_provider("openai", "gpt-4o-mini").with_api_key("sk-test")
    }

    #[test]
    fn from_config_resolves_provider() {
        let llm = Llm::new(&config()).expect("client");
        assert_eq!(llm.provider_name(), "openai");
        assert_eq!(llm.model(), "gpt-4o-mini");
        assert!(!llm.has_memory());
    }

    #[test]
    fn memory_mode_selects_wrapper() {
        let llm = Llm::new(&config().with_memory(1000)).expect("client");
        assert!(matches!(llm, Llm::WithMemory(_)));
        assert!(llm.has_memory());
        assert!(llm.memory().is_empty());
    }

    #[test]
    fn unknown_provider_fails_construction() {
        let err = Llm::new(&config().with_provider("nope", "m")).expect_err("unknown");
        assert!(matches!(err, LlmError::UnknownProvider(_)));
    }

    #[test]
    fn endpoint_override_requires_capability() {
        let ok = BaseLlm::from_config(
            &config().with_endpoint("http://127.0.0.1:1/v1/chat/completions"),
            &ProviderRegistry::with_defaults(),
        )
        .expect("openai supports overrides");
        assert_eq!(ok.provider().endpoint(), "http://127.0.0.1:1/v1/chat/completions");

        let err = BaseLlm::from_config(
            &config().with_provider("anthropic", "claude").with_endpoint("http://127.0.0.1:1"),
            &ProviderRegistry::with_defaults(),
        )
        .expect_err("anthropic has a fixed endpoint");
        assert!(matches!(err, LlmError::Unsupported(_)));
    }

    #[test]
    fn set_option_rejects_unknown_keys() {
        let mut llm = Llm::new(&config()).expect("client");
        llm.set_option("temperature", &json!(0.1)).expect("known key");
        let err = llm.set_option("logit_bias", &json!({})).expect_err("unknown key");
        assert!(matches!(err, LlmError::UnknownOption(_)));

        let Llm::Plain(base) = &llm else { panic!("plain client expected") };
        assert_eq!(base.defaults().temperature, Some(0.1));
    }

    #[tokio::test]
    async fn invalid_prompt_fails_before_network() {
        // Port 1 is never listening; validation must short-circuit first.
        let llm = BaseLlm::from_config(
            &config().with_endpoint("http://127.0.0.1:1/"),
            &ProviderRegistry::with_defaults(),
        )
        .expect("client");
        let err = llm
            .generate(&Prompt::new(""), &GenerateOptions::default().validated(), &CancellationToken::new())
            .await
            .expect_err("validation");
        assert!(matches!(err, LlmError::Validation(_)));
    }
}
