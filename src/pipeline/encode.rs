//! Image encoding: optimised image file → base64 payload for the vision call.
//!
//! The media type follows the file extension (the optimiser writes PNG for
//! rasterised pages and JPEG for converted or uploaded photos); anything
//! unrecognised is declared as PNG.
//!
//! `detail: "high"` asks GPT-4-class models for the full tile budget so
//! small print on statements stays legible.

use crate::error::IngestError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::path::Path;
use tracing::debug;

/// A base64 image plus its declared media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: String,
    pub media_type: &'static str,
}

impl EncodedImage {
    /// Wrap as an `edgequake_llm` image attachment.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.data.clone(), self.media_type).with_detail("high")
    }
}

/// Media type for an image path, by extension.
pub fn media_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "image/png",
    }
}

/// Read and base64-encode an image file.
pub async fn encode_image_file(path: &Path) -> Result<EncodedImage, IngestError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| IngestError::io(path, e))?;
    let data = STANDARD.encode(&bytes);
    debug!("Encoded {} → {} bytes base64", path.display(), data.len());

    Ok(EncodedImage {
        data,
        media_type: media_type_for(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_by_extension() {
        assert_eq!(media_type_for(Path::new("a/page-001.png")), "image/png");
        assert_eq!(media_type_for(Path::new("converted.JPG")), "image/jpeg");
        assert_eq!(media_type_for(Path::new("upload.jpeg")), "image/jpeg");
        assert_eq!(media_type_for(Path::new("mystery.bmp")), "image/png");
    }

    #[tokio::test]
    async fn encodes_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.jpg");
        std::fs::write(&p, b"hello").unwrap();

        let enc = encode_image_file(&p).await.unwrap();
        assert_eq!(enc.media_type, "image/jpeg");
        assert_eq!(STANDARD.decode(&enc.data).unwrap(), b"hello");

        let attachment = enc.to_image_data();
        assert_eq!(attachment.mime_type, "image/jpeg");
    }
}
