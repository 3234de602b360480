//! Streaming batch API: emit each file's outcome as soon as it completes.
//!
//! ## Why stream?
//!
//! A batch of scanned statements can take minutes once the vision fallback
//! and rate-limit backoff kick in. [`ingest_stream`] lets callers show each
//! statement as it lands, or persist it incrementally, instead of waiting
//! for [`crate::IngestionPipeline::ingest_batch`] to finish the whole batch.
//!
//! With `file_concurrency > 1` outcomes arrive in completion order; sort by
//! [`FileOutcome::index`] if upload order matters. Per-file progress events
//! fire as usual; batch start/complete events are left to the caller, who
//! owns the stream's lifetime.

use crate::error::IngestError;
use crate::ingest::IngestionPipeline;
use crate::output::StatementResult;
use crate::pipeline::input::UploadedFile;
use crate::transaction::CategoryHint;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// What one file of a streamed batch produced.
#[derive(Debug)]
pub struct FileOutcome {
    /// 0-based position in the upload list.
    pub index: usize,
    pub filename: String,
    /// Upload size, for usage accounting.
    pub bytes: u64,
    pub result: Result<StatementResult, IngestError>,
}

/// A boxed stream of per-file outcomes.
pub type StatementStream = Pin<Box<dyn Stream<Item = FileOutcome> + Send>>;

/// Ingest `files`, yielding each outcome as it completes.
///
/// # Example
/// ```rust,no_run
/// use futures::StreamExt;
/// use statement_ingest::{ingest_stream, IngestConfig, IngestionPipeline, UploadedFile};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = Arc::new(IngestionPipeline::new(IngestConfig::default())?);
/// let files = vec![UploadedFile::from_path("march.pdf").await?];
/// let mut outcomes = ingest_stream(pipeline, files, Vec::new());
/// while let Some(outcome) = outcomes.next().await {
///     match outcome.result {
///         Ok(s) => println!("{}: {} transactions", s.filename, s.transaction_count),
///         Err(e) => eprintln!("{}: {e}", outcome.filename),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn ingest_stream(
    pipeline: Arc<IngestionPipeline>,
    files: Vec<UploadedFile>,
    hints: Vec<CategoryHint>,
) -> StatementStream {
    let total = files.len();
    let concurrency = pipeline.config().file_concurrency.max(1);
    let hints: Arc<[CategoryHint]> = hints.into();
    info!("Starting streamed batch of {} file(s)", total);

    let s = stream::iter(files.into_iter().enumerate().map(move |(index, file)| {
        let pipeline = Arc::clone(&pipeline);
        let hints = Arc::clone(&hints);
        async move {
            let result = pipeline.ingest_indexed(index, total, &file, &hints).await;
            FileOutcome {
                index,
                bytes: file.size(),
                filename: file.filename,
                result,
            }
        }
    }))
    .buffer_unordered(concurrency);

    Box::pin(s)
}
