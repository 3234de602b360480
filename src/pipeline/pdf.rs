//! PDF access: native text, page count, scan detection, rasterisation and
//! splitting.
//!
//! All operations sit behind the synchronous [`PdfEngine`] trait. The
//! production implementation, [`PdfiumEngine`], wraps pdfium, which is not
//! async-safe; callers move engine calls onto the blocking pool with
//! `spawn_blocking`. The policy pieces ([`join_page_texts`],
//! [`scan_verdict`], [`chunk_ranges`]) are plain functions so they can be
//! tested without the native library.

use crate::error::IngestError;
use pdfium_render::prelude::*;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Embedded text and physical page count of a PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfText {
    pub text: String,
    pub page_count: usize,
}

/// Everything the pipeline needs from a PDF library.
pub trait PdfEngine: Send + Sync {
    /// Concatenated per-page text and the physical page count.
    ///
    /// Pages without extractable text contribute an empty string.
    fn extract_text(&self, pdf: &Path) -> Result<PdfText, IngestError>;

    /// `true` when fewer than `threshold` characters of text exist anywhere.
    fn is_scanned(&self, pdf: &Path, threshold: usize) -> Result<bool, IngestError>;

    /// Render every page at `scale` into `out_dir`, returning PNG paths in
    /// page order. Any page failing fails the whole document.
    fn rasterize(&self, pdf: &Path, scale: f32, out_dir: &Path) -> Result<Vec<PathBuf>, IngestError>;

    /// Split a PDF into sequential sub-documents of at most `pages_per_chunk`
    /// pages. A document within the limit comes back as a single chunk.
    fn split(&self, pdf: &[u8], pages_per_chunk: usize) -> Result<Vec<Vec<u8>>, IngestError>;
}

/// Join page texts with a blank line between pages.
pub fn join_page_texts<S: AsRef<str>>(pages: &[S]) -> String {
    pages
        .iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Scan-detection policy over lazily produced page texts.
///
/// Returns `false` as soon as the accumulated character count reaches
/// `threshold`; later pages are never pulled from the iterator.
pub fn scan_verdict<I, S>(pages: I, threshold: usize) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = 0usize;
    for page in pages {
        seen += page.as_ref().chars().count();
        if seen >= threshold {
            return false;
        }
    }
    true
}

/// Zero-based page ranges of at most `ceiling` pages covering `total` pages.
pub fn chunk_ranges(total: usize, ceiling: usize) -> Vec<Range<usize>> {
    let ceiling = ceiling.max(1);
    (0..total)
        .step_by(ceiling)
        .map(|start| start..(start + ceiling).min(total))
        .collect()
}

// ── pdfium implementation ────────────────────────────────────────────────

/// [`PdfEngine`] backed by the pdfium shared library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumEngine {
    library_dir: Option<PathBuf>,
}

impl PdfiumEngine {
    pub fn new(library_dir: Option<PathBuf>) -> Self {
        Self { library_dir }
    }

    /// Bind pdfium: configured directory first, then `./`, then the system path.
    fn bind(&self) -> Result<Pdfium, IngestError> {
        let from_config = match &self.library_dir {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")),
        };
        let bindings = from_config
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| IngestError::PdfiumBindingFailed(format!("{:?}", e)))?;
        Ok(Pdfium::new(bindings))
    }
}

fn corrupt(path: &Path, e: PdfiumError) -> IngestError {
    IngestError::CorruptPdf {
        path: path.to_path_buf(),
        detail: format!("{:?}", e),
    }
}

fn page_text(page: &PdfPage) -> String {
    page.text().map(|t| t.all()).unwrap_or_default()
}

impl PdfEngine for PdfiumEngine {
    fn extract_text(&self, pdf: &Path) -> Result<PdfText, IngestError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(pdf, None)
            .map_err(|e| corrupt(pdf, e))?;

        let pages: Vec<String> = document.pages().iter().map(|p| page_text(&p)).collect();
        let page_count = pages.len();
        let text = join_page_texts(&pages);
        debug!("Extracted {} chars from {} pages", text.len(), page_count);

        Ok(PdfText { text, page_count })
    }

    fn is_scanned(&self, pdf: &Path, threshold: usize) -> Result<bool, IngestError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(pdf, None)
            .map_err(|e| corrupt(pdf, e))?;

        let scanned = scan_verdict(document.pages().iter().map(|p| page_text(&p)), threshold);
        debug!("Scan detection for {}: scanned={}", pdf.display(), scanned);
        Ok(scanned)
    }

    fn rasterize(&self, pdf: &Path, scale: f32, out_dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(pdf, None)
            .map_err(|e| corrupt(pdf, e))?;

        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let pages = document.pages();
        let mut paths = Vec::with_capacity(pages.len() as usize);

        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                IngestError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image();
            let path = out_dir.join(format!("page-{:03}.png", idx + 1));
            image
                .save_with_format(&path, image::ImageFormat::Png)
                .map_err(|e| IngestError::RasterisationFailed {
                    page: idx + 1,
                    detail: e.to_string(),
                })?;
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            paths.push(path);
        }

        info!("Rasterised {} pages at {}x", paths.len(), scale);
        Ok(paths)
    }

    fn split(&self, pdf: &[u8], pages_per_chunk: usize) -> Result<Vec<Vec<u8>>, IngestError> {
        let pdfium = self.bind()?;
        let source = pdfium
            .load_pdf_from_byte_slice(pdf, None)
            .map_err(|e| corrupt(Path::new("<memory>"), e))?;

        let total = source.pages().len() as usize;
        if total <= pages_per_chunk {
            return Ok(vec![pdf.to_vec()]);
        }

        let mut chunks = Vec::new();
        for range in chunk_ranges(total, pages_per_chunk) {
            let mut chunk = pdfium
                .create_new_pdf()
                .map_err(|e| corrupt(Path::new("<chunk>"), e))?;
            let first = range.start as PdfPageIndex;
            let last = (range.end - 1) as PdfPageIndex;
            chunk
                .pages_mut()
                .copy_page_range_from_document(&source, first..=last, 0)
                .map_err(|e| corrupt(Path::new("<chunk>"), e))?;
            chunks.push(
                chunk
                    .save_to_bytes()
                    .map_err(|e| corrupt(Path::new("<chunk>"), e))?,
            );
        }

        info!("Split {}-page PDF into {} chunks", total, chunks.len());
        Ok(chunks)
    }
}
