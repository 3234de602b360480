//! # statement-ingest
//!
//! Turn bank and credit-card statements (PDF, JPEG, PNG, HEIC) into
//! categorised transactions, with page-cost accounting for billing.
//!
//! ## Why a fallback cascade?
//!
//! Most statements carry a text layer, and sending that text to a cheap
//! model is fast and accurate. Scans and phone photos do not, so the
//! pipeline falls back to a structured-OCR service and, when that is down
//! or returns near-empty text, to a vision model reading the page images
//! directly. Each step down costs more, and the billed page count says so.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Validate  extension, size, magic bytes
//!  ├─ 2. Extract   native PDF text + scan detection (pdfium, spawn_blocking)
//!  ├─ 3. OCR       structured OCR, chunked at 15 pages; advisory only
//!  ├─ 4. Raster    pdfium pages at 2×, or HEIC → JPEG
//!  ├─ 5. Optimise  downscale, grayscale, contrast boost
//!  ├─ 6. Extract   text or vision call with rate-limit backoff
//!  └─ 7. Output    transactions, totals, billable vs. actual pages
//! ```
//!
//! Downstream of extraction, [`rules::apply`] overrides categories with the
//! user's include/exclude patterns, and [`similarity`] warns about
//! near-duplicate category names and rule patterns.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use statement_ingest::{IngestConfig, IngestionPipeline, UploadedFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let pipeline = IngestionPipeline::new(IngestConfig::default())?;
//!     let file = UploadedFile::from_path("march.pdf").await?;
//!     let statement = pipeline.ingest_file(&file, &[]).await?;
//!     println!("{} transactions, {} billable pages",
//!         statement.transaction_count, statement.page_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `stmt-ingest` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod cost;
pub mod error;
pub mod export;
pub mod ingest;
pub mod keywords;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod rules;
pub mod similarity;
pub mod stream;
pub mod transaction;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{IngestConfig, IngestConfigBuilder};
pub use cost::billable_pages;
pub use error::{CategoryError, ErrorKind, FileFailure, IngestError, ValidationError};
pub use export::{to_csv_string, write_csv};
pub use ingest::{plan, IngestionPipeline, StageFailure, Strategy};
pub use output::{BatchOutcome, ExtractionResult, ProcessingType, StatementResult, UsageReport};
pub use pipeline::input::UploadedFile;
pub use pipeline::ocr::{DocumentAiBackend, DocumentAiConfig, OcrAdapter, OcrBackend, OcrOutcome};
pub use pipeline::Stage;
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use rules::{Category, CategoryRule, RuleType};
pub use similarity::{check_name_similarity, check_rule_conflict, SimilarityWarning};
pub use stream::{ingest_stream, FileOutcome, StatementStream};
pub use transaction::{CategoryHint, CategorySource, Transaction, TransactionType};
