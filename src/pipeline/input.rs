//! Upload staging: give each pipeline invocation a private scratch directory.
//!
//! pdfium and the image codecs want file-system paths. Every invocation
//! writes the upload, rasterised pages and converted images into one
//! `TempDir`; dropping the [`Workspace`] removes all of it, on success, on
//! error, and on panic alike.

use crate::error::IngestError;
use crate::pipeline::validate::FileKind;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Raw bytes of one upload plus the name the user gave it.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, keeping only its file name.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| IngestError::io(path, e))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self { filename, bytes })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Scratch directory scoped to one pipeline invocation.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a scratch directory under `parent`, or the system temp dir.
    pub fn create(parent: Option<&Path>) -> Result<Self, IngestError> {
        let dir = match parent {
            Some(p) => {
                std::fs::create_dir_all(p).map_err(|e| IngestError::io(p, e))?;
                tempfile::Builder::new()
                    .prefix("stmt-")
                    .tempdir_in(p)
                    .map_err(|e| IngestError::io(p, e))?
            }
            None => tempfile::Builder::new()
                .prefix("stmt-")
                .tempdir()
                .map_err(|e| IngestError::io(std::env::temp_dir(), e))?,
        };
        debug!("Created workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write the upload under a canonical name for its kind.
    pub async fn stage(&self, bytes: &[u8], kind: FileKind) -> Result<PathBuf, IngestError> {
        let path = self.dir.path().join(format!("upload.{}", kind.extension()));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| IngestError::io(&path, e))?;
        Ok(path)
    }

    /// A fresh sub-directory, e.g. for rasterised pages.
    pub fn subdir(&self, name: &str) -> Result<PathBuf, IngestError> {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path).map_err(|e| IngestError::io(&path, e))?;
        Ok(path)
    }
}
