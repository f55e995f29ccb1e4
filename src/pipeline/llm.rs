//! Language model interaction: summaries and grounded answers.
//!
//! This module is intentionally thin. All prompt wording lives in
//! [`crate::prompts`]; here we only build the chat request, bound it with a
//! timeout and turn failures into the fixed fallback reply.
//!
//! ## Why a `LanguageModel` trait?
//!
//! The service talks to [`LanguageModel`], not to `edgequake_llm` directly.
//! [`ProviderModel`] adapts any `LLMProvider`; tests substitute a canned
//! model so the HTTP surface can be exercised without network access.
//!
//! ## Failure policy
//!
//! A summary or answer is always produced. Any provider error or timeout is
//! logged at `warn` and replaced by [`FALLBACK_REPLY`]. There is no retry:
//! the user is waiting on the request and can simply ask again.

use crate::config::ServiceConfig;
use crate::error::BizBotError;
use crate::prompts::{answer_prompt, summary_prompt, FALLBACK_REPLY};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// A chat model that turns a system prompt and a user prompt into text.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, BizBotError>;
}

/// [`LanguageModel`] backed by an `edgequake_llm` provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout: Duration,
}

impl std::fmt::Debug for ProviderModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderModel")
            .field("temperature", &self.options.temperature)
            .field("max_tokens", &self.options.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ServiceConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve the provider from `config` and the environment.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, BizBotError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

/// Build `CompletionOptions` from the service config.
fn build_options(config: &ServiceConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

#[async_trait]
impl LanguageModel for ProviderModel {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, BizBotError> {
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user_with_images(prompt, Vec::new()),
        ];
        let start = Instant::now();

        let response = tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&self.options)))
            .await
            .map_err(|_| BizBotError::LlmApiError {
                message: format!("no reply within {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| BizBotError::LlmApiError {
                message: e.to_string(),
            })?;

        debug!(
            "LLM reply: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Summarise extracted document text. Never fails; see the module docs.
pub async fn summarize(model: &dyn LanguageModel, system: &str, document_text: &str) -> String {
    info!("Summarising {} chars of document text", document_text.len());
    complete_or_fallback(model, system, &summary_prompt(document_text)).await
}

/// Answer `question` grounded in `summary`. Never fails; see the module docs.
pub async fn answer(model: &dyn LanguageModel, system: &str, question: &str, summary: &str) -> String {
    if summary.is_empty() {
        debug!("Answering without a summary: no document analysed yet");
    }
    complete_or_fallback(model, system, &answer_prompt(question, summary)).await
}

async fn complete_or_fallback(model: &dyn LanguageModel, system: &str, prompt: &str) -> String {
    match model.complete(system, prompt).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Language model call failed, using fallback reply: {}", e);
            FALLBACK_REPLY.to_string()
        }
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, BizBotError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        BizBotError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when
///    both are set and non-empty.
/// 4. **`OPENAI_API_KEY`** present: OpenAI with the configured model.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(config: &ServiceConfig) -> Result<Arc<dyn LLMProvider>, BizBotError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        info!("Using LLM provider '{}' with model '{}'", name, model);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            info!("Using LLM provider '{}' with model '{}' from environment", prov, env_model);
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| BizBotError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
