//! Configuration for the briefing service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`]. Directory layout, model settings, speech
//! settings and the image failure policy live in one struct so the HTTP layer,
//! the binary and the tests all share the same defaults.

use crate::error::BizBotError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default public endpoint of the Google Translate speech service.
pub const DEFAULT_SPEECH_ENDPOINT: &str = "https://translate.google.com/translate_tts";

/// Configuration for a [`crate::service::BriefingService`].
///
/// # Example
/// ```rust
/// use bizbot::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .work_dir("/tmp/bizbot")
///     .temperature(0.3)
///     .build()
///     .unwrap();
/// assert_eq!(config.images_dir, std::path::PathBuf::from("/tmp/bizbot/extracted_images"));
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Directory holding staged uploads, narrated audio and rendered PDFs.
    pub work_dir: PathBuf,

    /// Root directory for extracted images. Each analyze call writes into a
    /// fresh `<images_dir>/<run-id>` subdirectory.
    pub images_dir: PathBuf,

    /// LLM model identifier. If None, the provider default is used.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.7.
    pub temperature: f32,

    /// Maximum tokens the model may generate per reply. Default: 1024.
    pub max_tokens: usize,

    /// Per-call timeout for the model in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, uses [`crate::prompts::DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Speech language code. Default: "en".
    pub speech_language: String,

    /// Speech endpoint URL. Default: [`DEFAULT_SPEECH_ENDPOINT`].
    pub speech_endpoint: String,

    /// Per-chunk speech request timeout in seconds. Default: 30.
    pub speech_timeout_secs: u64,

    /// What to do when one embedded image fails. Default: skip and warn.
    pub image_failure_policy: ImageFailurePolicy,

    /// Maximum accepted upload size in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let work_dir = PathBuf::from(".");
        Self {
            images_dir: work_dir.join("extracted_images"),
            work_dir,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.7,
            max_tokens: 1024,
            api_timeout_secs: 60,
            system_prompt: None,
            speech_language: "en".to_string(),
            speech_endpoint: DEFAULT_SPEECH_ENDPOINT.to_string(),
            speech_timeout_secs: 30,
            image_failure_policy: ImageFailurePolicy::default(),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("work_dir", &self.work_dir)
            .field("images_dir", &self.images_dir)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("speech_language", &self.speech_language)
            .field("speech_endpoint", &self.speech_endpoint)
            .field("image_failure_policy", &self.image_failure_policy)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
            images_dir_set: false,
        }
    }

    /// Where the last narrated answer is kept.
    pub fn answer_audio_path(&self) -> PathBuf {
        self.work_dir.join("last-answer-audio.mp3")
    }

    /// Where the last narrated summary is kept.
    pub fn summary_audio_path(&self) -> PathBuf {
        self.work_dir.join("summary-audio.mp3")
    }

    /// Where the last rendered summary PDF is kept.
    pub fn summary_pdf_path(&self) -> PathBuf {
        self.work_dir.join("summary.pdf")
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
    images_dir_set: bool,
}

impl ServiceConfigBuilder {
    /// Set the work directory. Unless [`Self::images_dir`] is also called,
    /// images go to `<work_dir>/extracted_images`.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        if !self.images_dir_set {
            self.config.images_dir = self.config.work_dir.join("extracted_images");
        }
        self
    }

    pub fn images_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.images_dir = dir.into();
        self.images_dir_set = true;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn speech_language(mut self, lang: impl Into<String>) -> Self {
        self.config.speech_language = lang.into();
        self
    }

    pub fn speech_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.speech_endpoint = url.into();
        self
    }

    pub fn speech_timeout_secs(mut self, secs: u64) -> Self {
        self.config.speech_timeout_secs = secs;
        self
    }

    pub fn image_failure_policy(mut self, policy: ImageFailurePolicy) -> Self {
        self.config.image_failure_policy = policy;
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, BizBotError> {
        let c = &self.config;
        if c.speech_language.trim().is_empty() {
            return Err(BizBotError::InvalidConfig(
                "Speech language must not be empty".into(),
            ));
        }
        if !(c.speech_endpoint.starts_with("http://") || c.speech_endpoint.starts_with("https://")) {
            return Err(BizBotError::InvalidConfig(format!(
                "Speech endpoint must be an HTTP(S) URL, got '{}'",
                c.speech_endpoint
            )));
        }
        if c.max_tokens == 0 {
            return Err(BizBotError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.max_upload_bytes < 1024 {
            return Err(BizBotError::InvalidConfig(format!(
                "max_upload_bytes must be at least 1 KiB, got {}",
                c.max_upload_bytes
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Containment policy for a single embedded image that fails to decode or save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageFailurePolicy {
    /// Log a warning, record an [`crate::error::ImageError`], keep going. (default)
    #[default]
    SkipAndWarn,
    /// Fail the whole extraction with [`BizBotError::Rasterize`].
    Abort,
}
