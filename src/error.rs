//! Error types for the statement-ingest library.
//!
//! Three error families reflect three distinct failure modes:
//!
//! * [`IngestError`]: **Fatal for one file**: the file cannot be turned into
//!   transactions (bad signature, corrupt PDF, every fallback stage
//!   exhausted, rate-limit budget spent). Returned as `Err(IngestError)` from
//!   [`crate::IngestionPipeline::ingest_file`].
//!
//! * [`FileFailure`]: **Non-fatal for the batch**: the serialisable record of
//!   an `IngestError` stored next to the successful statements of a batch so
//!   one bad upload never discards its siblings.
//!
//! * [`CategoryError`]: hard rejections raised by the similarity guard when a
//!   category name or rule pattern is an exact duplicate.
//!
//! OCR unavailability is deliberately absent from all three: it is modelled
//! as [`crate::pipeline::ocr::OcrOutcome::Unavailable`] and always recovered
//! by falling through to the next stage.

use crate::pipeline::Stage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// User-correctable problems with an uploaded file, detected before any
/// extraction cost is incurred.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ValidationError {
    /// Extension is not one of `.pdf`, `.jpg`, `.jpeg`, `.png`, `.heic`.
    #[error("Unsupported file format '{extension}' for '{filename}'. Supported: PDF, JPEG, PNG, HEIC")]
    UnsupportedFormat { filename: String, extension: String },

    /// File exceeds the configured byte ceiling.
    #[error("File '{filename}' is {size} bytes, exceeding the {limit}-byte limit")]
    FileTooLarge {
        filename: String,
        size: u64,
        limit: u64,
    },

    /// No known signature in the leading bytes.
    #[error("File '{filename}' does not appear to be a valid {expected} file")]
    CorruptFile { filename: String, expected: String },

    /// The leading bytes identify a different format than the extension claims.
    #[error("File '{filename}' extension '{extension}' doesn't match its content type ({detected})")]
    ExtensionMimeMismatch {
        filename: String,
        extension: String,
        detected: String,
    },
}

/// All fatal per-file errors returned by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Native text is empty although the document was not classified as scanned.
    #[error("Could not extract text from '{filename}': the text layer is blank but the document is not a scan")]
    NoExtractableText { filename: String },

    // ── PDF / image errors ────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Decoding, resizing or re-encoding a raster image failed.
    #[error("Image processing failed for '{path}': {detail}")]
    ImageProcessingFailed { path: PathBuf, detail: String },

    /// The HEIC → JPEG conversion step failed.
    #[error("HEIC conversion failed for '{path}': {detail}")]
    HeicConversionFailed { path: PathBuf, detail: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// A non-retryable adapter failure, or the final fallback stage failed.
    #[error("Extraction failed during {stage}: {detail}")]
    ExtractionFailed { stage: Stage, detail: String },

    /// The extraction service kept returning rate-limit signals.
    #[error("Rate limit exceeded for backend '{backend}' after {attempts} attempts")]
    RateLimited { backend: String, attempts: u32 },

    /// An adapter call or a whole file exceeded its time budget.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: Stage, secs: u64 },

    /// The extraction service answered with something that is not a
    /// transaction array.
    #[error("Extraction response could not be parsed: {detail}")]
    MalformedResponse { detail: String },

    // ── Collaborator binding errors ───────────────────────────────────────
    /// The configured LLM provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set `pdfium_library_path` (or --pdfium-lib) to a directory containing libpdfium."
    )]
    PdfiumBindingFailed(String),

    // ── Config / I/O errors ───────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not create or write a scratch or output file.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }

    /// Coarse classification used when reporting a per-file failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Validation(_) => ErrorKind::Validation,
            IngestError::RateLimited { .. } => ErrorKind::RateLimited,
            IngestError::NoExtractableText { .. }
            | IngestError::CorruptPdf { .. }
            | IngestError::RasterisationFailed { .. }
            | IngestError::ImageProcessingFailed { .. }
            | IngestError::HeicConversionFailed { .. }
            | IngestError::ExtractionFailed { .. }
            | IngestError::Timeout { .. }
            | IngestError::MalformedResponse { .. } => ErrorKind::ExtractionFailed,
            IngestError::ProviderNotConfigured { .. }
            | IngestError::PdfiumBindingFailed(_)
            | IngestError::InvalidConfig(_)
            | IngestError::Io { .. }
            | IngestError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Error taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad format, size or signature; the user can fix it.
    Validation,
    /// All fallback stages exhausted or a hard adapter error.
    ExtractionFailed,
    /// Retry budget spent on rate-limit signals.
    RateLimited,
    /// Misconfiguration or an unexpected local failure.
    Internal,
}

/// A non-fatal error for a single file of a batch.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{filename}: {message}")]
pub struct FileFailure {
    pub filename: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl FileFailure {
    pub fn new(filename: impl Into<String>, error: &IngestError) -> Self {
        Self {
            filename: filename.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Hard rejections from the similarity guard.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CategoryError {
    #[error("Category '{name}' already exists")]
    DuplicateName { name: String },

    #[error("Rule with pattern '{pattern}' already exists")]
    DuplicatePattern { pattern: String },

    #[error("Category name is required")]
    EmptyName,

    #[error("Pattern is required")]
    EmptyPattern,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_too_large_display() {
        let e = ValidationError::FileTooLarge {
            filename: "big.pdf".into(),
            size: 20,
            limit: 10,
        };
        let msg = e.to_string();
        assert!(msg.contains("big.pdf"), "got: {msg}");
        assert!(msg.contains("10-byte"), "got: {msg}");
    }

    #[test]
    fn validation_maps_to_validation_kind() {
        let e: IngestError = ValidationError::CorruptFile {
            filename: "x.png".into(),
            expected: "PNG".into(),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::Validation);
    }

    #[test]
    fn rate_limited_kind_and_display() {
        let e = IngestError::RateLimited {
            backend: "anthropic".into(),
            attempts: 5,
        };
        assert_eq!(e.kind(), ErrorKind::RateLimited);
        assert!(e.to_string().contains("5 attempts"));
    }

    #[test]
    fn timeout_display_names_stage() {
        let e = IngestError::Timeout {
            stage: Stage::VisionAttempt,
            secs: 30,
        };
        assert!(e.to_string().contains("30s"));
        assert_eq!(e.kind(), ErrorKind::ExtractionFailed);
    }

    #[test]
    fn file_failure_carries_kind() {
        let e = IngestError::NoExtractableText {
            filename: "blank.pdf".into(),
        };
        let f = FileFailure::new("blank.pdf", &e);
        assert_eq!(f.kind, ErrorKind::ExtractionFailed);
        assert!(f.to_string().starts_with("blank.pdf:"));
    }

    #[test]
    fn duplicate_name_display() {
        let e = CategoryError::DuplicateName {
            name: "groceries".into(),
        };
        assert_eq!(e.to_string(), "Category 'groceries' already exists");
    }
}
