//! Extraction calls: statement text or page images → transactions.
//!
//! Both adapters build a prompt from [`crate::prompts`], send it through a
//! [`CompletionBackend`], and parse the answer with
//! [`crate::pipeline::postprocess`]. All retry and concurrency policy lives
//! in [`call_with_backoff`] so it is shared and tested once.
//!
//! ## Retry Strategy
//!
//! Only rate-limit signals are retried. The wait before retry `n` is
//! `rate_limit_backoff_ms × 2^n`; with the default 15 s base that is
//! 15 s → 30 s → 60 s → 120 s across five attempts. Any other failure is
//! returned immediately: retrying a bad request or a malformed answer only
//! burns quota.
//!
//! ## Concurrency
//!
//! Every call holds a permit from a shared `Semaphore` while it is in
//! flight, never while it is sleeping, so at most
//! `extraction_concurrency` requests reach the service at once.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::pipeline::encode::EncodedImage;
use crate::pipeline::postprocess::parse_transactions;
use crate::pipeline::Stage;
use crate::prompts::{category_block, text_prompt, truncate_chars, vision_prompt};
use crate::transaction::{CategoryHint, Transaction};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Default model for the text extraction call.
pub const DEFAULT_TEXT_MODEL: &str = "gpt-4.1-nano";
/// Default model for the vision fallback.
pub const DEFAULT_VISION_MODEL: &str = "gpt-4.1";

/// One extraction request: a prompt plus optional images.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub prompt: String,
    pub images: Vec<EncodedImage>,
}

/// A completion and its token usage.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Failures a backend reports. Only `RateLimited` is retried.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("{0}")]
    Api(String),
}

/// Anything that can answer an extraction prompt.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError>;
}

/// Does this provider error message describe a rate limit?
///
/// Only explicit wording counts. Status codes are not matched as bare
/// digits: "429" also turns up inside token counts and request ids.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
}

/// Map a provider error onto the retry taxonomy.
///
/// `LlmError::RateLimited` is authoritative. Providers that fold a 429 into
/// a generic API or provider error are caught by their message wording.
pub fn classify_llm_error(error: LlmError) -> BackendError {
    match error {
        LlmError::RateLimited(msg) => BackendError::RateLimited(msg),
        LlmError::ApiError(ref msg) | LlmError::ProviderError(ref msg) | LlmError::Unknown(ref msg)
            if is_rate_limit_message(msg) =>
        {
            BackendError::RateLimited(error.to_string())
        }
        other => BackendError::Api(other.to_string()),
    }
}

// ── edgequake-llm backend ────────────────────────────────────────────────

/// [`CompletionBackend`] over an `edgequake_llm` provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    label: String,
    options: CompletionOptions,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>, config: &IngestConfig) -> Self {
        Self {
            provider,
            label: label.into(),
            options: CompletionOptions {
                temperature: Some(config.temperature),
                max_tokens: Some(config.max_tokens),
                ..Default::default()
            },
        }
    }

    /// Build the text-extraction backend from the config.
    pub fn for_text(config: &IngestConfig) -> Result<Self, IngestError> {
        let model = config.text_model.as_deref().unwrap_or(DEFAULT_TEXT_MODEL);
        let provider = resolve_provider(config, model)?;
        Ok(Self::new(provider, format!("text:{}", model), config))
    }

    /// Build the vision backend from the config.
    pub fn for_vision(config: &IngestConfig) -> Result<Self, IngestError> {
        let model = config.vision_model.as_deref().unwrap_or(DEFAULT_VISION_MODEL);
        let provider = resolve_provider(config, model)?;
        Ok(Self::new(provider, format!("vision:{}", model), config))
    }
}

#[async_trait]
impl CompletionBackend for LlmBackend {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        let message = if request.images.is_empty() {
            ChatMessage::user(request.prompt.as_str())
        } else {
            let images = request.images.iter().map(EncodedImage::to_image_data).collect();
            ChatMessage::user_with_images(request.prompt.as_str(), images)
        };

        let response = self
            .provider
            .chat(&[message], Some(&self.options))
            .await
            .map_err(classify_llm_error)?;

        Ok(Completion {
            content: response.content,
            prompt_tokens: response.prompt_tokens as u64,
            completion_tokens: response.completion_tokens as u64,
        })
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, IngestError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        IngestError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `model`.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI key present**: `openai` with `model`.
/// 5. **Auto-detect** via [`ProviderFactory::from_env`].
fn resolve_provider(config: &IngestConfig, model: &str) -> Result<Arc<dyn LLMProvider>, IngestError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| IngestError::ProviderNotConfigured {
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

// ── Retry / concurrency ──────────────────────────────────────────────────

/// Rate-limit retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_attempts: config.rate_limit_max_attempts.max(1),
            base_delay_ms: config.rate_limit_backoff_ms,
        }
    }
}

/// Wait before retrying after failed attempt `attempt` (0-based).
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Call `backend`, retrying only on rate-limit signals.
pub async fn call_with_backoff(
    backend: &dyn CompletionBackend,
    request: &CompletionRequest,
    policy: RetryPolicy,
    limiter: &Semaphore,
    call_timeout: Duration,
    stage: Stage,
) -> Result<Completion, IngestError> {
    for attempt in 0..policy.max_attempts {
        let result = {
            let _permit = limiter
                .acquire()
                .await
                .map_err(|_| IngestError::Internal("extraction limiter closed".to_string()))?;
            tokio::time::timeout(call_timeout, backend.complete(request)).await
        };

        match result {
            Ok(Ok(completion)) => return Ok(completion),
            Ok(Err(BackendError::RateLimited(msg))) => {
                if attempt + 1 >= policy.max_attempts {
                    warn!("{}: rate limited, retry budget exhausted ({})", backend.name(), msg);
                    break;
                }
                let wait = backoff_delay(policy.base_delay_ms, attempt);
                warn!(
                    "{}: rate limited, waiting {:?} (attempt {}/{})",
                    backend.name(),
                    wait,
                    attempt + 1,
                    policy.max_attempts
                );
                tokio::time::sleep(wait).await;
            }
            Ok(Err(BackendError::Api(detail))) => {
                return Err(IngestError::ExtractionFailed { stage, detail });
            }
            Err(_elapsed) => {
                return Err(IngestError::Timeout {
                    stage,
                    secs: call_timeout.as_secs(),
                });
            }
        }
    }

    Err(IngestError::RateLimited {
        backend: backend.name().to_string(),
        attempts: policy.max_attempts,
    })
}

// ── Adapters ─────────────────────────────────────────────────────────────

/// Settings and shared limiter common to both extraction adapters.
#[derive(Clone)]
struct ExtractionCall {
    backend: Arc<dyn CompletionBackend>,
    limiter: Arc<Semaphore>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl ExtractionCall {
    async fn run(&self, request: CompletionRequest, stage: Stage) -> Result<Vec<Transaction>, IngestError> {
        let start = Instant::now();
        let completion = call_with_backoff(
            self.backend.as_ref(),
            &request,
            self.policy,
            &self.limiter,
            self.call_timeout,
            stage,
        )
        .await?;
        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            self.backend.name(),
            completion.prompt_tokens,
            completion.completion_tokens,
            start.elapsed()
        );

        parse_transactions(&completion.content)
    }
}

/// Plain text → transactions.
#[derive(Clone)]
pub struct TextExtractionAdapter {
    call: ExtractionCall,
    max_prompt_chars: usize,
}

impl TextExtractionAdapter {
    pub fn new(backend: Arc<dyn CompletionBackend>, limiter: Arc<Semaphore>, config: &IngestConfig) -> Self {
        Self {
            call: ExtractionCall {
                backend,
                limiter,
                policy: RetryPolicy::from_config(config),
                call_timeout: Duration::from_secs(config.adapter_timeout_secs),
            },
            max_prompt_chars: config.max_prompt_chars,
        }
    }

    pub async fn extract(&self, text: &str, hints: &[CategoryHint]) -> Result<Vec<Transaction>, IngestError> {
        let capped = truncate_chars(text, self.max_prompt_chars);
        if capped.len() < text.len() {
            debug!(
                "Statement text capped at {} chars for extraction",
                self.max_prompt_chars
            );
        }
        let request = CompletionRequest {
            prompt: text_prompt(&category_block(hints), capped),
            images: Vec::new(),
        };
        self.call.run(request, Stage::AiFromText).await
    }
}

/// Optimised images → transactions. Last-resort path.
#[derive(Clone)]
pub struct VisionExtractionAdapter {
    call: ExtractionCall,
}

impl VisionExtractionAdapter {
    pub fn new(backend: Arc<dyn CompletionBackend>, limiter: Arc<Semaphore>, config: &IngestConfig) -> Self {
        Self {
            call: ExtractionCall {
                backend,
                limiter,
                policy: RetryPolicy::from_config(config),
                call_timeout: Duration::from_secs(config.adapter_timeout_secs),
            },
        }
    }

    pub async fn extract(&self, images: Vec<EncodedImage>, hints: &[CategoryHint]) -> Result<Vec<Transaction>, IngestError> {
        let request = CompletionRequest {
            prompt: vision_prompt(&category_block(hints)),
            images,
        };
        self.call.run(request, Stage::VisionAttempt).await
    }
}
