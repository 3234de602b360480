//! Raster preparation: PDF pages → PNG files, HEIC → JPEG.
//!
//! ## Why spawn_blocking?
//!
//! pdfium keeps thread-local state and is CPU-bound while rendering, so the
//! [`PdfEngine`] call is moved onto Tokio's blocking pool. That keeps the
//! async worker threads free for the network-bound extraction calls running
//! for other files.
//!
//! ## HEIC
//!
//! Neither `image` nor pdfium decodes HEIC. The conversion sits behind
//! [`HeicConverter`]; the production implementation shells out to
//! `heif-convert` from libheif.

use crate::error::IngestError;
use crate::pipeline::pdf::PdfEngine;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Render every page of `pdf` into `out_dir` at `scale`.
///
/// A single failing page fails the whole document; there is no partial
/// raster fallback.
pub async fn rasterize_pdf(
    engine: Arc<dyn PdfEngine>,
    pdf: &Path,
    scale: f32,
    out_dir: &Path,
) -> Result<Vec<PathBuf>, IngestError> {
    let pdf = pdf.to_path_buf();
    let out_dir = out_dir.to_path_buf();

    tokio::task::spawn_blocking(move || engine.rasterize(&pdf, scale, &out_dir))
        .await
        .map_err(|e| IngestError::Internal(format!("Render task panicked: {}", e)))?
}

/// Converts one HEIC image into a JPEG file.
#[async_trait]
pub trait HeicConverter: Send + Sync {
    /// Write a JPEG equivalent of `input` to `output`.
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), IngestError>;
}

/// [`HeicConverter`] backed by the `heif-convert` command-line tool.
#[derive(Debug, Clone)]
pub struct HeifConvertCli {
    program: PathBuf,
    quality: u8,
}

impl Default for HeifConvertCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("heif-convert"),
            quality: 90,
        }
    }
}

impl HeifConvertCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }
}

#[async_trait]
impl HeicConverter for HeifConvertCli {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), IngestError> {
        let result = tokio::process::Command::new(&self.program)
            .arg("-q")
            .arg(self.quality.to_string())
            .arg(input.as_os_str())
            .arg(output.as_os_str())
            .output()
            .await
            .map_err(|e| IngestError::HeicConversionFailed {
                path: input.to_path_buf(),
                detail: format!(
                    "failed to run '{}' (is libheif installed?): {}",
                    self.program.display(),
                    e
                ),
            })?;

        if !result.status.success() {
            return Err(IngestError::HeicConversionFailed {
                path: input.to_path_buf(),
                detail: format!(
                    "exit code {}: {}",
                    result.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&result.stderr).trim()
                ),
            });
        }
        if !output.exists() {
            return Err(IngestError::HeicConversionFailed {
                path: input.to_path_buf(),
                detail: "converter reported success but wrote no file".to_string(),
            });
        }

        debug!("Converted {} → {}", input.display(), output.display());
        Ok(())
    }
}

/// Convert a staged HEIC upload into `converted.jpg` next to it.
pub async fn heic_to_jpeg(
    converter: &dyn HeicConverter,
    heic: &Path,
    out_dir: &Path,
) -> Result<PathBuf, IngestError> {
    let jpeg = out_dir.join("converted.jpg");
    converter.convert(heic, &jpeg).await?;
    info!("HEIC converted to JPEG");
    Ok(jpeg)
}
