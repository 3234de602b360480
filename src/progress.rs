//! Progress-callback trait for per-file ingestion events.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::IngestionPipeline::with_progress`] to receive events as the
//! pipeline works through a batch.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a channel, a WebSocket, a database record,
//! or a terminal progress bar without the library knowing how the host
//! application communicates. The trait is `Send + Sync` so it works when
//! files are processed concurrently.
//!
//! # Example
//!
//! ```rust
//! use statement_ingest::{IngestProgressCallback, Stage};
//! use std::sync::Mutex;
//!
//! #[derive(Default)]
//! struct StageLog(Mutex<Vec<Stage>>);
//!
//! impl IngestProgressCallback for StageLog {
//!     fn on_stage(&self, _file_index: usize, _filename: &str, stage: Stage) {
//!         self.0.lock().unwrap().push(stage);
//!     }
//! }
//!
//! let log = StageLog::default();
//! log.on_stage(0, "march.pdf", Stage::Validate);
//! assert_eq!(log.0.lock().unwrap().len(), 1);
//! ```

use crate::output::ProcessingType;
use crate::pipeline::Stage;
use std::sync::Arc;

/// Called by the ingestion pipeline as it processes each file.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. With `file_concurrency > 1`, per-file events for
/// different files may arrive concurrently from different threads.
pub trait IngestProgressCallback: Send + Sync {
    /// Called once before the first file of a batch starts.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a file starts processing. `file_index` is 0-based.
    fn on_file_start(&self, file_index: usize, total_files: usize, filename: &str) {
        let _ = (file_index, total_files, filename);
    }

    /// Called on entry to every state of the per-file state machine.
    fn on_stage(&self, file_index: usize, filename: &str, stage: Stage) {
        let _ = (file_index, filename, stage);
    }

    /// Called when a file produced a statement.
    fn on_file_complete(
        &self,
        file_index: usize,
        filename: &str,
        processing_type: ProcessingType,
        transaction_count: usize,
    ) {
        let _ = (file_index, filename, processing_type, transaction_count);
    }

    /// Called when a file failed. Sibling files keep going.
    fn on_file_error(&self, file_index: usize, filename: &str, error: &str) {
        let _ = (file_index, filename, error);
    }

    /// Called once after every file has been attempted.
    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        let _ = (total_files, success_count);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type stored in the pipeline.
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;
