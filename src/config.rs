//! Configuration types for statement ingestion.
//!
//! All pipeline behaviour is controlled through [`IngestConfig`], built via
//! its [`IngestConfigBuilder`] and injected into
//! [`crate::IngestionPipeline::new`]. Nothing in the pipeline reads ambient
//! settings, so two pipelines with different limits can run side by side.

use crate::error::IngestError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for the ingestion pipeline.
///
/// # Example
/// ```rust
/// use statement_ingest::IngestConfig;
///
/// let config = IngestConfig::builder()
///     .max_file_mb(20)
///     .image_page_multiplier(2.5)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_file_bytes, 20 * 1024 * 1024);
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Upload size ceiling in bytes. Default: 10 MiB.
    pub max_file_bytes: u64,

    /// Longest edge, in pixels, an image may have before OCR/vision. Default: 2048.
    pub max_image_dimension: u32,

    /// Contrast factor applied after grayscale conversion. Default: 1.5.
    ///
    /// 1.0 leaves the image unchanged; values above 1.0 push pixels away
    /// from the mean grey level.
    pub contrast_factor: f32,

    /// Upscale factor used when rasterising PDF pages. Default: 2.0.
    pub render_scale: f32,

    /// Characters of embedded text that mark a PDF as not scanned. Default: 50.
    pub scan_text_threshold: usize,

    /// Minimum OCR output length accepted as a real answer. Default: 50.
    pub ocr_min_chars: usize,

    /// Maximum pages per OCR request. Default: 15.
    pub ocr_page_ceiling: usize,

    /// Billable pages per physical page on the vision path. Default: 3.0.
    pub image_page_multiplier: f64,

    /// Character cap on text sent to the extraction service. Default: 100 000.
    pub max_prompt_chars: usize,

    /// Total attempts on rate-limit responses, including the first. Default: 5.
    pub rate_limit_max_attempts: u32,

    /// Base backoff in milliseconds; attempt `n` waits `base * 2^n`. Default: 15 000.
    pub rate_limit_backoff_ms: u64,

    /// In-flight external extraction calls allowed at once. Default: 1.
    pub extraction_concurrency: usize,

    /// Files of one batch processed at once. Default: 1 (sequential).
    pub file_concurrency: usize,

    /// Timeout for a single adapter call in seconds. Default: 300.
    pub adapter_timeout_secs: u64,

    /// Timeout for one whole file in seconds. Default: 900. Fatal whatever
    /// stage it interrupts.
    pub file_timeout_secs: u64,

    /// Directory for per-file scratch space. `None` uses the system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Re-label "Other" transactions with the built-in keyword table. Default: false.
    pub keyword_fallback: bool,

    /// LLM provider name (e.g. "anthropic", "openai").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Model used for text extraction.
    pub text_model: Option<String>,

    /// Model used for the vision fallback.
    pub vision_model: Option<String>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 16384.
    pub max_tokens: usize,

    /// Directory holding the pdfium shared library.
    pub pdfium_library_path: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024,
            max_image_dimension: 2048,
            contrast_factor: 1.5,
            render_scale: 2.0,
            scan_text_threshold: 50,
            ocr_min_chars: 50,
            ocr_page_ceiling: 15,
            image_page_multiplier: 3.0,
            max_prompt_chars: 100_000,
            rate_limit_max_attempts: 5,
            rate_limit_backoff_ms: 15_000,
            extraction_concurrency: 1,
            file_concurrency: 1,
            adapter_timeout_secs: 300,
            file_timeout_secs: 900,
            temp_dir: None,
            keyword_fallback: false,
            provider_name: None,
            provider: None,
            text_model: None,
            vision_model: None,
            temperature: 0.0,
            max_tokens: 16384,
            pdfium_library_path: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("max_file_bytes", &self.max_file_bytes)
            .field("max_image_dimension", &self.max_image_dimension)
            .field("contrast_factor", &self.contrast_factor)
            .field("render_scale", &self.render_scale)
            .field("scan_text_threshold", &self.scan_text_threshold)
            .field("ocr_min_chars", &self.ocr_min_chars)
            .field("ocr_page_ceiling", &self.ocr_page_ceiling)
            .field("image_page_multiplier", &self.image_page_multiplier)
            .field("rate_limit_max_attempts", &self.rate_limit_max_attempts)
            .field("rate_limit_backoff_ms", &self.rate_limit_backoff_ms)
            .field("extraction_concurrency", &self.extraction_concurrency)
            .field("file_concurrency", &self.file_concurrency)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("text_model", &self.text_model)
            .field("vision_model", &self.vision_model)
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn max_file_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_bytes = bytes;
        self
    }

    pub fn max_file_mb(mut self, mb: u64) -> Self {
        self.config.max_file_bytes = mb * 1024 * 1024;
        self
    }

    pub fn max_image_dimension(mut self, px: u32) -> Self {
        self.config.max_image_dimension = px.max(100);
        self
    }

    pub fn contrast_factor(mut self, factor: f32) -> Self {
        self.config.contrast_factor = factor;
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale;
        self
    }

    pub fn scan_text_threshold(mut self, chars: usize) -> Self {
        self.config.scan_text_threshold = chars;
        self
    }

    pub fn ocr_min_chars(mut self, chars: usize) -> Self {
        self.config.ocr_min_chars = chars;
        self
    }

    pub fn ocr_page_ceiling(mut self, pages: usize) -> Self {
        self.config.ocr_page_ceiling = pages;
        self
    }

    pub fn image_page_multiplier(mut self, multiplier: f64) -> Self {
        self.config.image_page_multiplier = multiplier;
        self
    }

    pub fn max_prompt_chars(mut self, chars: usize) -> Self {
        self.config.max_prompt_chars = chars;
        self
    }

    pub fn rate_limit_max_attempts(mut self, n: u32) -> Self {
        self.config.rate_limit_max_attempts = n;
        self
    }

    pub fn rate_limit_backoff_ms(mut self, ms: u64) -> Self {
        self.config.rate_limit_backoff_ms = ms;
        self
    }

    pub fn extraction_concurrency(mut self, n: usize) -> Self {
        self.config.extraction_concurrency = n.max(1);
        self
    }

    pub fn file_concurrency(mut self, n: usize) -> Self {
        self.config.file_concurrency = n.max(1);
        self
    }

    pub fn adapter_timeout_secs(mut self, secs: u64) -> Self {
        self.config.adapter_timeout_secs = secs;
        self
    }

    pub fn file_timeout_secs(mut self, secs: u64) -> Self {
        self.config.file_timeout_secs = secs;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn keyword_fallback(mut self, v: bool) -> Self {
        self.config.keyword_fallback = v;
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

    pub fn text_model(mut self, model: impl Into<String>) -> Self {
        self.config.text_model = Some(model.into());
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = Some(model.into());
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

    pub fn pdfium_library_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(dir.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.max_file_bytes == 0 {
            return Err(IngestError::InvalidConfig(
                "max_file_bytes must be ≥ 1".into(),
            ));
        }
        if c.ocr_page_ceiling == 0 {
            return Err(IngestError::InvalidConfig(
                "OCR page ceiling must be ≥ 1".into(),
            ));
        }
        if !(c.image_page_multiplier.is_finite() && c.image_page_multiplier > 0.0) {
            return Err(IngestError::InvalidConfig(format!(
                "Image page multiplier must be a positive number, got {}",
                c.image_page_multiplier
            )));
        }
        if !(c.render_scale > 0.0 && c.render_scale <= 8.0) {
            return Err(IngestError::InvalidConfig(format!(
                "Render scale must be in (0, 8], got {}",
                c.render_scale
            )));
        }
        if c.contrast_factor < 0.0 {
            return Err(IngestError::InvalidConfig(format!(
                "Contrast factor must be ≥ 0, got {}",
                c.contrast_factor
            )));
        }
        if c.rate_limit_max_attempts == 0 {
            return Err(IngestError::InvalidConfig(
                "rate_limit_max_attempts must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
