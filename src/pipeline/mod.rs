//! Pipeline stages for statement ingestion.
//!
//! Each submodule implements exactly one transformation step, so every
//! stage is independently testable and each external collaborator sits
//! behind a trait the orchestrator in [`crate::ingest`] can swap out.
//!
//! ## Data Flow
//!
//! ```text
//! validate ──▶ input ──▶ pdf (text / scan) ──────────────▶ llm (text)
//!                          │                    ▲
//!                          ├──▶ ocr ────────────┘
//!                          └──▶ render ──▶ optimize ──▶ encode ──▶ llm (vision)
//! ```
//!
//! 1. [`validate`]: extension, size and magic-byte checks
//! 2. [`input`]   : stage the upload into a per-file scratch directory
//! 3. [`pdf`]     : native text, page count, scan detection, PDF splitting
//! 4. [`ocr`]     : structured OCR with chunking; never fatal
//! 5. [`render`]  : rasterise PDF pages; HEIC → JPEG
//! 6. [`optimize`]: downscale, grayscale, contrast boost
//! 7. [`encode`]  : image file → base64 payload
//! 8. [`llm`]     : text and vision extraction with rate-limit backoff
//! 9. [`postprocess`]: turn the service's answer into clean transactions

pub mod encode;
pub mod input;
pub mod llm;
pub mod ocr;
pub mod optimize;
pub mod pdf;
pub mod postprocess;
pub mod render;
pub mod validate;

use serde::{Deserialize, Serialize};
use std::fmt;

/// States of the per-file ingestion state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    ExtractText,
    OcrAttempt,
    AiFromText,
    Rasterize,
    Optimize,
    VisionAttempt,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validation",
            Stage::ExtractText => "text extraction",
            Stage::OcrAttempt => "OCR",
            Stage::AiFromText => "text extraction call",
            Stage::Rasterize => "rasterisation",
            Stage::Optimize => "image optimisation",
            Stage::VisionAttempt => "vision extraction call",
        };
        f.write_str(name)
    }
}
