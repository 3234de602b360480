//! Upload validation: extension, size ceiling, magic bytes.
//!
//! Checks run cheapest-first. Size is rejected before any parser sees the
//! bytes, and a signature that disagrees with the extension is a hard
//! failure so a disguised payload never reaches pdfium or the image codecs.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Formats the pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Jpeg,
    Png,
    Heic,
}

impl FileKind {
    pub fn mime_type(self) -> &'static str {
        match self {
            FileKind::Pdf => "application/pdf",
            FileKind::Jpeg => "image/jpeg",
            FileKind::Png => "image/png",
            FileKind::Heic => "image/heic",
        }
    }

    /// Canonical extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Jpeg => "jpg",
            FileKind::Png => "png",
            FileKind::Heic => "heic",
        }
    }

    pub fn is_image(self) -> bool {
        !matches!(self, FileKind::Pdf)
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "pdf" => Some(FileKind::Pdf),
            "jpg" | "jpeg" => Some(FileKind::Jpeg),
            "png" => Some(FileKind::Png),
            "heic" => Some(FileKind::Heic),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            FileKind::Pdf => "PDF",
            FileKind::Jpeg => "JPEG",
            FileKind::Png => "PNG",
            FileKind::Heic => "HEIC",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// A file that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedFile {
    pub kind: FileKind,
    pub size: u64,
}

impl ValidatedFile {
    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }
}

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Identify a format from its leading bytes.
pub fn detect_kind(data: &[u8]) -> Option<FileKind> {
    if data.starts_with(b"%PDF-") {
        Some(FileKind::Pdf)
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(FileKind::Jpeg)
    } else if data.starts_with(PNG_SIGNATURE) {
        Some(FileKind::Png)
    } else if data.len() >= 12 && &data[4..8] == b"ftyp" {
        Some(FileKind::Heic)
    } else {
        None
    }
}

/// Lower-cased extension of `filename`, without the dot.
fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Validate an upload against the accepted formats and the size ceiling.
pub fn validate(data: &[u8], filename: &str, max_bytes: u64) -> Result<ValidatedFile, ValidationError> {
    let extension = extension_of(filename);
    let declared = FileKind::from_extension(&extension).ok_or_else(|| {
        ValidationError::UnsupportedFormat {
            filename: filename.to_string(),
            extension: if extension.is_empty() {
                "(none)".to_string()
            } else {
                format!(".{extension}")
            },
        }
    })?;

    let size = data.len() as u64;
    if size > max_bytes {
        return Err(ValidationError::FileTooLarge {
            filename: filename.to_string(),
            size,
            limit: max_bytes,
        });
    }

    let detected = detect_kind(data).ok_or_else(|| ValidationError::CorruptFile {
        filename: filename.to_string(),
        expected: declared.label().to_string(),
    })?;

    if detected != declared {
        return Err(ValidationError::ExtensionMimeMismatch {
            filename: filename.to_string(),
            extension: format!(".{extension}"),
            detected: detected.mime_type().to_string(),
        });
    }

    Ok(ValidatedFile {
        kind: declared,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDF: &[u8] = b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n";
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
    const HEIC: &[u8] = b"\x00\x00\x00\x18ftypheic\x00\x00\x00\x00";

    #[test]
    fn detects_each_signature() {
        assert_eq!(detect_kind(PDF), Some(FileKind::Pdf));
        assert_eq!(detect_kind(JPEG), Some(FileKind::Jpeg));
        assert_eq!(detect_kind(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), Some(FileKind::Png));
        assert_eq!(detect_kind(HEIC), Some(FileKind::Heic));
        assert_eq!(detect_kind(b"GIF89a"), None);
        // Too short to carry an ftyp box.
        assert_eq!(detect_kind(b"\0\0\0\0ftyp"), None);
    }

    #[test]
    fn accepts_matching_extension_case_insensitively() {
        let v = validate(JPEG, "Receipt.JPEG", 1024).unwrap();
        assert_eq!(v.kind, FileKind::Jpeg);
        assert_eq!(v.mime_type(), "image/jpeg");
        assert_eq!(v.size, JPEG.len() as u64);
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = validate(PDF, "statement.docx", 1024).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedFormat { ref extension, .. } if extension == ".docx"));
        let err = validate(PDF, "statement", 1024).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedFormat { .. }));
    }

    #[test]
    fn rejects_oversized_before_inspecting_bytes() {
        // Garbage content would be CorruptFile, but size is checked first.
        let err = validate(&[0u8; 32], "big.pdf", 16).unwrap_err();
        assert!(matches!(err, ValidationError::FileTooLarge { size: 32, limit: 16, .. }));
    }

    #[test]
    fn rejects_unrecognised_signature() {
        let err = validate(b"not a pdf at all", "fake.pdf", 1024).unwrap_err();
        assert!(matches!(err, ValidationError::CorruptFile { .. }));
    }

    #[test]
    fn rejects_disguised_payload() {
        let err = validate(PDF, "photo.png", 1024).unwrap_err();
        match err {
            ValidationError::ExtensionMimeMismatch { detected, .. } => {
                assert_eq!(detected, "application/pdf")
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
