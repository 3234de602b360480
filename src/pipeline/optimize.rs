//! Image normalisation before OCR or vision: downscale, grayscale, contrast.
//!
//! Phone photos arrive in every size and colour balance. Normalising them
//! keeps the extraction service's input predictable and the request bodies
//! small. The file is rewritten in place, in the format its extension names.
//!
//! Every image gets the grayscale and contrast pass, including pages that are
//! already gray. Callers run it exactly once per file: contrast compounds, so
//! a second pass is not a no-op.

use crate::error::IngestError;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Target size for an image of `w × h` so neither side exceeds `max_dim`.
///
/// Returns `None` when the image already fits.
pub fn target_size(w: u32, h: u32, max_dim: u32) -> Option<(u32, u32)> {
    if w <= max_dim && h <= max_dim {
        return None;
    }
    let ratio = f64::min(f64::from(max_dim) / f64::from(w), f64::from(max_dim) / f64::from(h));
    let nw = ((f64::from(w) * ratio) as u32).max(1);
    let nh = ((f64::from(h) * ratio) as u32).max(1);
    Some((nw, nh))
}

/// ITU-R 601 luma, the weighting photo tools use for "convert to grayscale".
fn to_gray(img: &DynamicImage) -> GrayImage {
    let rgb = img.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let p = rgb.get_pixel(x, y);
        let l = (u32::from(p[0]) * 299 + u32::from(p[1]) * 587 + u32::from(p[2]) * 114 + 500) / 1000;
        Luma([l as u8])
    })
}

/// Stretch pixel values away from the mean intensity by `factor`.
///
/// `out = mean + factor × (px − mean)`, clamped to `0..=255`; the mean is the
/// rounded average over the whole image.
pub fn apply_contrast(img: &mut GrayImage, factor: f32) {
    let n = u64::from(img.width()) * u64::from(img.height());
    if n == 0 {
        return;
    }
    let sum: u64 = img.pixels().map(|p| u64::from(p[0])).sum();
    let mean = (sum as f64 / n as f64).round() as f32;

    for p in img.pixels_mut() {
        let v = mean + factor * (f32::from(p[0]) - mean);
        p[0] = v.round().clamp(0.0, 255.0) as u8;
    }
}

/// Optimise the image at `path` in place. Returns the final dimensions.
pub fn optimize_image(path: &Path, max_dim: u32, contrast: f32) -> Result<(u32, u32), IngestError> {
    let fail = |detail: String| IngestError::ImageProcessingFailed {
        path: path.to_path_buf(),
        detail,
    };

    let mut img = image::open(path).map_err(|e| fail(e.to_string()))?;
    let (w, h) = (img.width(), img.height());

    if let Some((nw, nh)) = target_size(w, h, max_dim) {
        img = img.resize_exact(nw, nh, FilterType::Lanczos3);
        debug!("Resized {}x{} → {}x{}", w, h, nw, nh);
    }

    let mut gray = to_gray(&img);
    apply_contrast(&mut gray, contrast);

    let rgb = DynamicImage::ImageLuma8(gray).to_rgb8();
    let dims = rgb.dimensions();
    rgb.save(path).map_err(|e| fail(e.to_string()))?;
    Ok(dims)
}

/// Async wrapper: run [`optimize_image`] on the blocking pool.
pub async fn optimize_in_place(path: &Path, max_dim: u32, contrast: f32) -> Result<(u32, u32), IngestError> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || optimize_image(&path, max_dim, contrast))
        .await
        .map_err(|e| IngestError::Internal(format!("Optimise task panicked: {}", e)))?
}
