//! Page-cost accounting: physical pages → billable pages.
//!
//! Text and OCR paths bill one page per physical page. The vision fallback
//! costs the extraction service more per page, so it bills
//! `ceil(actual × multiplier)`. Billing is always in whole pages.

use crate::output::ProcessingType;

/// Convert a physical page count into billable pages.
///
/// ```rust
/// use statement_ingest::{billable_pages, ProcessingType};
///
/// assert_eq!(billable_pages(10, ProcessingType::Image, 3.0), 30);
/// assert_eq!(billable_pages(7, ProcessingType::Text, 9.0), 7);
/// ```
pub fn billable_pages(actual_pages: u32, processing_type: ProcessingType, image_multiplier: f64) -> u32 {
    match processing_type {
        ProcessingType::Text | ProcessingType::Ocr => actual_pages,
        ProcessingType::Image => {
            let raw = f64::from(actual_pages) * image_multiplier;
            // Absorb float noise so an exact product like 10 × 2.5 never bills 26.
            let snapped = (raw * 1e9).round() / 1e9;
            snapped.ceil().max(0.0) as u32
        }
    }
}
