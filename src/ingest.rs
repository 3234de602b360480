//! Per-file orchestration: bytes in, categorised transactions and page
//! costs out.
//!
//! ## State machine
//!
//! ```text
//! VALIDATE ─▶ pdf ─▶ EXTRACT_TEXT ─▶ native text ───────────────────▶ AI_FROM_TEXT  (text)
//!                                  └▶ scanned: OCR_ATTEMPT ─ ok ─────▶ AI_FROM_TEXT  (ocr)
//!                                                          └ no ─▶ RASTERIZE ─▶ OPTIMIZE ─▶ VISION_ATTEMPT (image)
//! VALIDATE ─▶ image ─▶ OPTIMIZE ─▶ OCR_ATTEMPT ─ ok ─▶ AI_FROM_TEXT  (ocr, 1 page)
//!                                             └ no ─▶ VISION_ATTEMPT (image, 1 page)
//! ```
//!
//! The fallback order is data: [`plan`] returns the ordered
//! [`Strategy`] list for a document and the orchestrator walks it until one
//! strategy produces transactions. A strategy either succeeds, reports
//! [`StageFailure::Unavailable`] (move on), or fails the file with
//! [`StageFailure::Fatal`].
//!
//! Every invocation owns a private [`Workspace`]; it is dropped on every
//! exit path, including the per-file timeout.

use crate::config::IngestConfig;
use crate::cost::billable_pages;
use crate::error::{FileFailure, IngestError};
use crate::keywords::apply_keyword_fallback;
use crate::output::{BatchOutcome, ExtractionResult, ProcessingType, StatementResult};
use crate::pipeline::encode::{encode_image_file, EncodedImage};
use crate::pipeline::input::{UploadedFile, Workspace};
use crate::pipeline::llm::{CompletionBackend, LlmBackend, TextExtractionAdapter, VisionExtractionAdapter};
use crate::pipeline::ocr::{OcrAdapter, OcrBackend, OcrOutcome};
use crate::pipeline::optimize::optimize_in_place;
use crate::pipeline::pdf::{PdfEngine, PdfiumEngine};
use crate::pipeline::render::{heic_to_jpeg, rasterize_pdf, HeicConverter, HeifConvertCli};
use crate::pipeline::validate::{validate, FileKind};
use crate::pipeline::Stage;
use crate::progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
use crate::transaction::{CategoryHint, Transaction};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

static NOOP_PROGRESS: NoopProgressCallback = NoopProgressCallback;

/// One way of turning a prepared document into transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Embedded PDF text → text extractor.
    NativeText,
    /// OCR service text → text extractor.
    Ocr,
    /// Optimised raster images → vision extractor.
    Vision,
}

/// Why a strategy produced no transactions.
#[derive(Debug)]
pub enum StageFailure {
    /// Not applicable or not available; try the next strategy.
    Unavailable,
    /// The file fails with this error.
    Fatal(IngestError),
}

impl From<IngestError> for StageFailure {
    fn from(e: IngestError) -> Self {
        StageFailure::Fatal(e)
    }
}

/// Ordered fallback strategies for a document.
///
/// A PDF with a usable text layer only ever goes through native text. Scans
/// and images try OCR first and fall back to vision.
pub fn plan(kind: FileKind, scanned: bool) -> Vec<Strategy> {
    match (kind, scanned) {
        (FileKind::Pdf, false) => vec![Strategy::NativeText],
        _ => vec![Strategy::Ocr, Strategy::Vision],
    }
}

/// A staged document ready for the strategy walk.
struct Prepared {
    /// Kind of the file at `path`; a converted HEIC is a JPEG here.
    kind: FileKind,
    path: PathBuf,
    native_text: Option<String>,
    actual_pages: u32,
}

/// Drives uploads through validation, the fallback cascade and cost
/// accounting.
///
/// Every external collaborator sits behind a trait and can be replaced with
/// the `with_*` methods, which is how the integration tests run the whole
/// state machine without pdfium or network access.
pub struct IngestionPipeline {
    config: IngestConfig,
    engine: Arc<dyn PdfEngine>,
    ocr_backend: Option<Arc<dyn OcrBackend>>,
    ocr: OcrAdapter,
    text: TextExtractionAdapter,
    vision: VisionExtractionAdapter,
    heic: Arc<dyn HeicConverter>,
    progress: Option<ProgressCallback>,
    limiter: Arc<Semaphore>,
}

impl IngestionPipeline {
    /// Build a pipeline with pdfium and LLM backends resolved from `config`.
    ///
    /// No OCR backend is attached; add one with [`Self::with_ocr_backend`].
    pub fn new(config: IngestConfig) -> Result<Self, IngestError> {
        let text: Arc<dyn CompletionBackend> = Arc::new(LlmBackend::for_text(&config)?);
        let vision: Arc<dyn CompletionBackend> = Arc::new(LlmBackend::for_vision(&config)?);
        Ok(Self::with_backends(config, text, vision))
    }

    /// Build a pipeline around explicit completion backends.
    pub fn with_backends(
        config: IngestConfig,
        text_backend: Arc<dyn CompletionBackend>,
        vision_backend: Arc<dyn CompletionBackend>,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.extraction_concurrency.max(1)));
        let engine: Arc<dyn PdfEngine> = Arc::new(PdfiumEngine::new(config.pdfium_library_path.clone()));
        let ocr = ocr_adapter(&config, None, Arc::clone(&engine));
        Self {
            text: TextExtractionAdapter::new(text_backend, Arc::clone(&limiter), &config),
            vision: VisionExtractionAdapter::new(vision_backend, Arc::clone(&limiter), &config),
            engine,
            ocr_backend: None,
            ocr,
            heic: Arc::new(HeifConvertCli::default()),
            progress: None,
            limiter,
            config,
        }
    }

    pub fn with_pdf_engine(mut self, engine: Arc<dyn PdfEngine>) -> Self {
        self.engine = engine;
        self.ocr = ocr_adapter(&self.config, self.ocr_backend.clone(), Arc::clone(&self.engine));
        self
    }

    pub fn with_ocr_backend(mut self, backend: Arc<dyn OcrBackend>) -> Self {
        self.ocr_backend = Some(backend);
        self.ocr = ocr_adapter(&self.config, self.ocr_backend.clone(), Arc::clone(&self.engine));
        self
    }

    pub fn with_text_backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.text = TextExtractionAdapter::new(backend, Arc::clone(&self.limiter), &self.config);
        self
    }

    pub fn with_vision_backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.vision = VisionExtractionAdapter::new(backend, Arc::clone(&self.limiter), &self.config);
        self
    }

    pub fn with_heic_converter(mut self, converter: Arc<dyn HeicConverter>) -> Self {
        self.heic = converter;
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    fn progress(&self) -> &dyn IngestProgressCallback {
        match &self.progress {
            Some(cb) => cb.as_ref(),
            None => &NOOP_PROGRESS,
        }
    }

    // ── Public entry points ──────────────────────────────────────────────

    /// Ingest a single upload.
    ///
    /// # Errors
    /// Validation failures, a blank text layer on a non-scanned PDF, any
    /// unrecovered adapter error, or the per-file timeout.
    ///
    /// Time budgets nest. Each OCR call is bounded by `adapter_timeout_secs`
    /// and a miss there falls back to vision like any other OCR failure. The
    /// `file_timeout_secs` budget covers the whole file and is always fatal,
    /// whichever stage it interrupts; keep it comfortably above two adapter
    /// timeouts so the vision fallback has room to run.
    pub async fn ingest_file(
        &self,
        file: &UploadedFile,
        hints: &[CategoryHint],
    ) -> Result<StatementResult, IngestError> {
        self.ingest_indexed(0, 1, file, hints).await
    }

    /// Ingest a batch. One failing file never affects its siblings.
    ///
    /// Files run `file_concurrency` at a time (sequentially by default);
    /// statements and failures are reported in upload order.
    pub async fn ingest_batch(&self, files: &[UploadedFile], hints: &[CategoryHint]) -> BatchOutcome {
        let total = files.len();
        let start = Instant::now();
        self.progress().on_batch_start(total);
        info!("Starting batch of {} file(s)", total);

        let mut results: Vec<(usize, Result<StatementResult, IngestError>)> =
            stream::iter(files.iter().enumerate().map(|(idx, file)| async move {
                (idx, self.ingest_indexed(idx, total, file, hints).await)
            }))
            .buffer_unordered(self.config.file_concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(idx, _)| *idx);

        let mut outcome = BatchOutcome::default();
        for (idx, result) in results {
            let file = &files[idx];
            match result {
                Ok(statement) => {
                    outcome.usage.record(&statement, file.size());
                    outcome.statements.push(statement);
                }
                Err(e) => outcome.failures.push(FileFailure::new(&file.filename, &e)),
            }
        }

        self.progress().on_batch_complete(total, outcome.statements.len());
        info!(
            "Batch complete: {}/{} file(s), {} billable pages, {}ms",
            outcome.statements.len(),
            total,
            outcome.usage.total_billable_pages,
            start.elapsed().as_millis()
        );
        outcome
    }

    /// Run one file under the per-file budget. An expired budget is reported
    /// as [`IngestError::Timeout`] naming the stage that was running.
    pub(crate) async fn ingest_indexed(
        &self,
        index: usize,
        total: usize,
        file: &UploadedFile,
        hints: &[CategoryHint],
    ) -> Result<StatementResult, IngestError> {
        self.progress().on_file_start(index, total, &file.filename);

        let run = FileRun {
            pipeline: self,
            index,
            filename: &file.filename,
            stage: Mutex::new(Stage::Validate),
        };
        let budget = Duration::from_secs(self.config.file_timeout_secs);
        let result = match tokio::time::timeout(budget, run.execute(file, hints)).await {
            Ok(result) => result,
            Err(_) => Err(IngestError::Timeout {
                stage: run.current_stage(),
                secs: budget.as_secs(),
            }),
        };

        match &result {
            Ok(statement) => {
                info!(
                    "{}: {} transaction(s) via {}, {} billable / {} actual page(s)",
                    file.filename,
                    statement.transaction_count,
                    statement.processing_type,
                    statement.page_count,
                    statement.actual_pages
                );
                self.progress().on_file_complete(
                    index,
                    &file.filename,
                    statement.processing_type,
                    statement.transaction_count,
                );
            }
            Err(e) => {
                warn!("{}: {}", file.filename, e);
                self.progress().on_file_error(index, &file.filename, &e.to_string());
            }
        }
        result
    }

    async fn pdf_task<T, F>(&self, f: F) -> Result<T, IngestError>
    where
        F: FnOnce(&dyn PdfEngine) -> Result<T, IngestError> + Send + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || f(engine.as_ref()))
            .await
            .map_err(|e| IngestError::Internal(format!("PDF task panicked: {}", e)))?
    }
}

fn ocr_adapter(config: &IngestConfig, backend: Option<Arc<dyn OcrBackend>>, engine: Arc<dyn PdfEngine>) -> OcrAdapter {
    OcrAdapter::new(
        backend,
        engine,
        config.ocr_page_ceiling,
        config.ocr_min_chars,
        Duration::from_secs(config.adapter_timeout_secs),
    )
}

/// One file's trip through the state machine.
struct FileRun<'a> {
    pipeline: &'a IngestionPipeline,
    index: usize,
    filename: &'a str,
    stage: Mutex<Stage>,
}

impl FileRun<'_> {
    fn enter(&self, stage: Stage) {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner()) = stage;
        debug!("{}: entering {}", self.filename, stage);
        self.pipeline.progress().on_stage(self.index, self.filename, stage);
    }

    fn current_stage(&self) -> Stage {
        *self.stage.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn config(&self) -> &IngestConfig {
        &self.pipeline.config
    }

    async fn execute(&self, file: &UploadedFile, hints: &[CategoryHint]) -> Result<StatementResult, IngestError> {
        self.enter(Stage::Validate);
        let validated = validate(&file.bytes, &file.filename, self.config().max_file_bytes)?;

        let workspace = Workspace::create(self.config().temp_dir.as_deref())?;
        let staged = workspace.stage(&file.bytes, validated.kind).await?;

        let (prepared, scanned) = match validated.kind {
            FileKind::Pdf => self.prepare_pdf(staged).await?,
            kind => (self.prepare_image(&workspace, staged, kind).await?, true),
        };

        let strategies = plan(prepared.kind, scanned);
        let mut last_stage = Stage::Validate;
        for strategy in strategies {
            let attempt = match strategy {
                Strategy::NativeText => self.run_native_text(&prepared, hints).await,
                Strategy::Ocr => self.run_ocr(&prepared, hints).await,
                Strategy::Vision => self.run_vision(&workspace, &prepared, hints).await,
            };
            last_stage = self.current_stage();
            match attempt {
                Ok((transactions, extraction)) => return Ok(self.finish(transactions, &extraction)),
                Err(StageFailure::Unavailable) => {
                    debug!("{}: {:?} unavailable, falling back", self.filename, strategy);
                }
                Err(StageFailure::Fatal(e)) => return Err(e),
            }
        }

        Err(IngestError::ExtractionFailed {
            stage: last_stage,
            detail: "every extraction strategy was unavailable".to_string(),
        })
    }

    fn finish(&self, transactions: Vec<Transaction>, extraction: &ExtractionResult) -> StatementResult {
        let transactions = if self.config().keyword_fallback {
            apply_keyword_fallback(transactions)
        } else {
            transactions
        };
        StatementResult::new(self.filename, transactions, extraction)
    }

    // ── Preparation ──────────────────────────────────────────────────────

    async fn prepare_pdf(&self, path: PathBuf) -> Result<(Prepared, bool), IngestError> {
        self.enter(Stage::ExtractText);

        let pdf = path.clone();
        let extracted = self.pipeline.pdf_task(move |e| e.extract_text(&pdf)).await?;

        let pdf = path.clone();
        let threshold = self.config().scan_text_threshold;
        let scanned = self.pipeline.pdf_task(move |e| e.is_scanned(&pdf, threshold)).await?;
        info!(
            "{}: {} page(s), {} chars of native text, scanned={}",
            self.filename,
            extracted.page_count,
            extracted.text.chars().count(),
            scanned
        );

        let prepared = Prepared {
            kind: FileKind::Pdf,
            path,
            native_text: Some(extracted.text),
            actual_pages: u32::try_from(extracted.page_count).unwrap_or(u32::MAX),
        };
        Ok((prepared, scanned))
    }

    async fn prepare_image(&self, workspace: &Workspace, staged: PathBuf, kind: FileKind) -> Result<Prepared, IngestError> {
        let (path, kind) = if kind == FileKind::Heic {
            let jpeg = heic_to_jpeg(self.pipeline.heic.as_ref(), &staged, workspace.path()).await?;
            (jpeg, FileKind::Jpeg)
        } else {
            (staged, kind)
        };

        self.enter(Stage::Optimize);
        let (w, h) = optimize_in_place(&path, self.config().max_image_dimension, self.config().contrast_factor).await?;
        debug!("{}: optimised image is {}x{}", self.filename, w, h);

        Ok(Prepared {
            kind,
            path,
            native_text: None,
            actual_pages: 1,
        })
    }

    // ── Strategies ───────────────────────────────────────────────────────

    async fn run_native_text(
        &self,
        doc: &Prepared,
        hints: &[CategoryHint],
    ) -> Result<(Vec<Transaction>, ExtractionResult), StageFailure> {
        let text = doc.native_text.as_deref().unwrap_or_default();
        if text.trim().is_empty() {
            return Err(IngestError::NoExtractableText {
                filename: self.filename.to_string(),
            }
            .into());
        }

        self.enter(Stage::AiFromText);
        let transactions = self.pipeline.text.extract(text, hints).await?;
        Ok((
            transactions,
            self.extraction(Some(text.to_string()), ProcessingType::Text, doc.actual_pages, None),
        ))
    }

    async fn run_ocr(
        &self,
        doc: &Prepared,
        hints: &[CategoryHint],
    ) -> Result<(Vec<Transaction>, ExtractionResult), StageFailure> {
        self.enter(Stage::OcrAttempt);
        let bytes = tokio::fs::read(&doc.path)
            .await
            .map_err(|e| IngestError::io(&doc.path, e))?;

        let (text, confidence) = match self.pipeline.ocr.extract(&bytes, doc.kind).await {
            OcrOutcome::Available { text, confidence } => (text, confidence),
            OcrOutcome::Unavailable => return Err(StageFailure::Unavailable),
        };

        self.enter(Stage::AiFromText);
        let transactions = self.pipeline.text.extract(&text, hints).await?;
        Ok((
            transactions,
            self.extraction(Some(text), ProcessingType::Ocr, doc.actual_pages, confidence),
        ))
    }

    async fn run_vision(
        &self,
        workspace: &Workspace,
        doc: &Prepared,
        hints: &[CategoryHint],
    ) -> Result<(Vec<Transaction>, ExtractionResult), StageFailure> {
        let images = match doc.kind {
            FileKind::Pdf => self.rasterize_and_optimize(workspace, doc).await?,
            _ => vec![doc.path.clone()],
        };
        if images.is_empty() {
            return Err(IngestError::ExtractionFailed {
                stage: Stage::Rasterize,
                detail: "document has no pages to render".to_string(),
            }
            .into());
        }

        let mut encoded: Vec<EncodedImage> = Vec::with_capacity(images.len());
        for image in &images {
            encoded.push(encode_image_file(image).await?);
        }

        self.enter(Stage::VisionAttempt);
        info!("{}: sending {} image(s) to vision extraction", self.filename, encoded.len());
        let transactions = self.pipeline.vision.extract(encoded, hints).await?;
        Ok((
            transactions,
            self.extraction(None, ProcessingType::Image, doc.actual_pages, None),
        ))
    }

    async fn rasterize_and_optimize(&self, workspace: &Workspace, doc: &Prepared) -> Result<Vec<PathBuf>, IngestError> {
        self.enter(Stage::Rasterize);
        let out_dir = workspace.subdir("pages")?;
        let pages = rasterize_pdf(
            Arc::clone(&self.pipeline.engine),
            &doc.path,
            self.config().render_scale,
            &out_dir,
        )
        .await?;
        info!("{}: rasterised {} page(s)", self.filename, pages.len());

        self.enter(Stage::Optimize);
        for page in &pages {
            optimize_in_place(page, self.config().max_image_dimension, self.config().contrast_factor).await?;
        }
        Ok(pages)
    }

    fn extraction(
        &self,
        text: Option<String>,
        processing_type: ProcessingType,
        actual_pages: u32,
        ocr_confidence: Option<f32>,
    ) -> ExtractionResult {
        ExtractionResult {
            text,
            page_count: billable_pages(actual_pages, processing_type, self.config().image_page_multiplier),
            processing_type,
            actual_pages,
            ocr_confidence,
        }
    }
}
