//! Integration tests for the ingestion state machine.
//!
//! Every external collaborator is faked in-process: the PDF engine, the OCR
//! backend, both completion backends and the HEIC converter. A tracking
//! progress callback records the exact stage path each file takes.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use futures::StreamExt;
use image::{ImageFormat, Rgb, RgbImage};
use statement_ingest::pipeline::llm::{BackendError, Completion, CompletionBackend, CompletionRequest};
use statement_ingest::pipeline::ocr::{OcrError, RecognizedText};
use statement_ingest::pipeline::pdf::{PdfEngine, PdfText};
use statement_ingest::pipeline::render::HeicConverter;
use statement_ingest::{
    ingest_stream, CategoryHint, CategorySource, ErrorKind, IngestConfig, IngestError, IngestProgressCallback,
    IngestionPipeline, OcrBackend, ProcessingType, Stage, UploadedFile, ValidationError,
};
use std::collections::VecDeque;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// ── Fakes ────────────────────────────────────────────────────────────────────

const STATEMENT_TEXT: &str = "ACME BANK  Statement March 2024\n\
    03/01 TIM HORTONS #221        4.25\n\
    03/02 PAYROLL ACME CORP    1500.00";

const TWO_TRANSACTIONS: &str = r#"```json
[
  {"date": "2024-03-01", "description": "TIM HORTONS #221", "amount": -4.25, "type": "debit", "balance": 995.75, "category": "Other"},
  {"date": "2024-03-02", "description": "PAYROLL ACME CORP", "amount": 1500, "type": "credit", "category": "Payroll & Income"}
]
```"#;

fn small_png(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 120]))
}

fn encode(img: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img.clone())
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

fn pdf_upload(name: &str) -> UploadedFile {
    UploadedFile::new(name, b"%PDF-1.7\n% fake statement body\n%%EOF".to_vec())
}

fn png_upload(name: &str) -> UploadedFile {
    UploadedFile::new(name, encode(&small_png(64, 48), ImageFormat::Png))
}

fn heic_upload(name: &str) -> UploadedFile {
    let mut bytes = vec![0x00, 0x00, 0x00, 0x18];
    bytes.extend_from_slice(b"ftypheic");
    bytes.extend_from_slice(&[0u8; 32]);
    UploadedFile::new(name, bytes)
}

/// PDF engine answering from fixed values. Rasterisation writes real PNGs so
/// the optimiser and encoder run for real.
struct FakePdf {
    text: String,
    pages: usize,
    scanned: bool,
    splits: AtomicUsize,
}

impl FakePdf {
    fn text(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            text: STATEMENT_TEXT.to_string(),
            pages,
            scanned: false,
            splits: AtomicUsize::new(0),
        })
    }

    fn scanned(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            text: String::new(),
            pages,
            scanned: true,
            splits: AtomicUsize::new(0),
        })
    }
}

impl PdfEngine for FakePdf {
    fn extract_text(&self, _pdf: &Path) -> Result<PdfText, IngestError> {
        Ok(PdfText {
            text: self.text.clone(),
            page_count: self.pages,
        })
    }

    fn is_scanned(&self, _pdf: &Path, _threshold: usize) -> Result<bool, IngestError> {
        Ok(self.scanned)
    }

    fn rasterize(&self, _pdf: &Path, _scale: f32, out_dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
        (0..self.pages)
            .map(|i| -> Result<PathBuf, IngestError> {
                let path = out_dir.join(format!("page-{:03}.png", i + 1));
                small_png(80, 100).save(&path).map_err(|e| IngestError::RasterisationFailed {
                    page: i + 1,
                    detail: e.to_string(),
                })?;
                Ok(path)
            })
            .collect()
    }

    fn split(&self, pdf: &[u8], _pages_per_chunk: usize) -> Result<Vec<Vec<u8>>, IngestError> {
        self.splits.fetch_add(1, Ordering::SeqCst);
        Ok(vec![pdf.to_vec()])
    }
}

/// Completion backend with a script of replies, then a default answer.
struct Recorder {
    name: &'static str,
    script: Mutex<VecDeque<Result<Completion, BackendError>>>,
    default_reply: String,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl Recorder {
    fn answering(name: &'static str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Mutex::new(VecDeque::new()),
            default_reply: reply.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn scripted(name: &'static str, script: Vec<Result<Completion, BackendError>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Mutex::new(script.into()),
            default_reply: TWO_TRANSACTIONS.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> CompletionRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl CompletionBackend for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(reply) = self.script.lock().unwrap().pop_front() {
            return reply;
        }
        Ok(Completion {
            content: self.default_reply.clone(),
            prompt_tokens: 100,
            completion_tokens: 40,
        })
    }
}

/// OCR backend returning fixed text, or failing.
struct FixedOcr {
    text: Option<String>,
    calls: AtomicUsize,
    mime_types: Mutex<Vec<String>>,
}

impl FixedOcr {
    fn returning(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: Some(text.to_string()),
            calls: AtomicUsize::new(0),
            mime_types: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            text: None,
            calls: AtomicUsize::new(0),
            mime_types: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl OcrBackend for FixedOcr {
    fn name(&self) -> &str {
        "fixed-ocr"
    }

    async fn process(&self, _content: &[u8], mime_type: &str) -> Result<RecognizedText, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.mime_types.lock().unwrap().push(mime_type.to_string());
        match &self.text {
            Some(text) => Ok(RecognizedText {
                text: text.clone(),
                confidence: Some(0.9),
            }),
            None => Err(OcrError::Status {
                status: 503,
                body: "backend unavailable".into(),
            }),
        }
    }
}

/// OCR backend that answers an hour late.
struct StalledOcr;

#[async_trait]
impl OcrBackend for StalledOcr {
    fn name(&self) -> &str {
        "stalled-ocr"
    }

    async fn process(&self, _content: &[u8], _mime_type: &str) -> Result<RecognizedText, OcrError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(RecognizedText {
            text: STATEMENT_TEXT.to_string(),
            confidence: Some(0.9),
        })
    }
}

/// Completion backend that answers an hour late.
struct StalledBackend;

#[async_trait]
impl CompletionBackend for StalledBackend {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, BackendError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Completion {
            content: TWO_TRANSACTIONS.to_string(),
            ..Default::default()
        })
    }
}

/// Writes a real JPEG wherever it is asked to.
#[derive(Default)]
struct FakeHeic {
    calls: AtomicUsize,
}

#[async_trait]
impl HeicConverter for FakeHeic {
    async fn convert(&self, _input: &Path, output: &Path) -> Result<(), IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        small_png(64, 48).save(output).map_err(|e| IngestError::HeicConversionFailed {
            path: output.to_path_buf(),
            detail: e.to_string(),
        })
    }
}

/// Records every progress event.
#[derive(Default)]
struct Tracker {
    stages: Mutex<Vec<(usize, Stage)>>,
    completed: Mutex<Vec<(usize, ProcessingType, usize)>>,
    errors: Mutex<Vec<usize>>,
    batch: Mutex<Option<(usize, usize)>>,
}

impl Tracker {
    fn path(&self, file_index: usize) -> Vec<Stage> {
        self.stages
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, _)| *i == file_index)
            .map(|(_, s)| *s)
            .collect()
    }
}

impl IngestProgressCallback for Tracker {
    fn on_stage(&self, file_index: usize, _filename: &str, stage: Stage) {
        self.stages.lock().unwrap().push((file_index, stage));
    }

    fn on_file_complete(&self, file_index: usize, _: &str, processing_type: ProcessingType, count: usize) {
        self.completed.lock().unwrap().push((file_index, processing_type, count));
    }

    fn on_file_error(&self, file_index: usize, _: &str, _: &str) {
        self.errors.lock().unwrap().push(file_index);
    }

    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        *self.batch.lock().unwrap() = Some((total_files, success_count));
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    pipeline: IngestionPipeline,
    text: Arc<Recorder>,
    vision: Arc<Recorder>,
    tracker: Arc<Tracker>,
    scratch: tempfile::TempDir,
}

fn config_in(scratch: &Path) -> statement_ingest::IngestConfigBuilder {
    IngestConfig::builder()
        .temp_dir(scratch)
        .rate_limit_backoff_ms(1)
        .rate_limit_max_attempts(3)
        .image_page_multiplier(3.0)
}

fn harness(pdf: Arc<FakePdf>, ocr: Option<Arc<FixedOcr>>) -> Harness {
    harness_with(pdf, ocr, |b| b, Recorder::answering("text", TWO_TRANSACTIONS))
}

fn harness_with(
    pdf: Arc<FakePdf>,
    ocr: Option<Arc<FixedOcr>>,
    tune: impl FnOnce(statement_ingest::IngestConfigBuilder) -> statement_ingest::IngestConfigBuilder,
    text: Arc<Recorder>,
) -> Harness {
    let scratch = tempfile::tempdir().unwrap();
    let config = tune(config_in(scratch.path())).build().unwrap();
    let vision = Recorder::answering("vision", TWO_TRANSACTIONS);
    let tracker = Arc::new(Tracker::default());

    let mut pipeline = IngestionPipeline::with_backends(config, text.clone(), vision.clone())
        .with_pdf_engine(pdf)
        .with_heic_converter(Arc::new(FakeHeic::default()))
        .with_progress(tracker.clone());
    if let Some(ocr) = ocr {
        pipeline = pipeline.with_ocr_backend(ocr);
    }

    Harness {
        pipeline,
        text,
        vision,
        tracker,
        scratch,
    }
}

fn scratch_is_empty(h: &Harness) -> bool {
    std::fs::read_dir(h.scratch.path()).unwrap().next().is_none()
}

// ── PDF paths ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn text_pdf_uses_native_text_and_bills_one_to_one() {
    let h = harness(FakePdf::text(3), None);

    let s = assert_ok!(h.pipeline.ingest_file(&pdf_upload("march.pdf"), &[]).await);

    assert_eq!(h.tracker.path(0), vec![Stage::Validate, Stage::ExtractText, Stage::AiFromText]);
    assert_eq!(s.processing_type, ProcessingType::Text);
    assert_eq!(s.actual_pages, 3);
    assert_eq!(s.page_count, 3);
    assert_eq!(s.transaction_count, 2);
    assert_eq!(s.total_debits, 4.25);
    assert_eq!(s.total_credits, 1500.0);
    assert!(s.transactions.iter().all(|t| t.amount >= 0.0));

    assert_eq!(h.text.calls(), 1);
    assert!(h.text.last_request().prompt.contains("TIM HORTONS #221"));
    assert!(h.text.last_request().images.is_empty());
    assert_eq!(h.vision.calls(), 0);
}

#[tokio::test]
async fn scanned_pdf_with_ocr_goes_through_text_extraction() {
    let ocr = FixedOcr::returning(STATEMENT_TEXT);
    let pdf = FakePdf::scanned(4);
    let h = harness(pdf.clone(), Some(ocr.clone()));

    let s = assert_ok!(h.pipeline.ingest_file(&pdf_upload("scan.pdf"), &[]).await);

    assert_eq!(
        h.tracker.path(0),
        vec![Stage::Validate, Stage::ExtractText, Stage::OcrAttempt, Stage::AiFromText]
    );
    assert_eq!(s.processing_type, ProcessingType::Ocr);
    assert_eq!(s.page_count, 4);
    assert_eq!(s.actual_pages, 4);
    assert_eq!(s.ocr_confidence, Some(0.9));
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pdf.splits.load(Ordering::SeqCst), 1);
    assert_eq!(ocr.mime_types.lock().unwrap()[0], "application/pdf");
    assert_eq!(h.vision.calls(), 0);
}

#[tokio::test]
async fn scanned_pdf_without_ocr_falls_back_to_vision_and_bills_multiplier() {
    let h = harness_with(
        FakePdf::scanned(3),
        None,
        |b| b.image_page_multiplier(2.5),
        Recorder::answering("text", TWO_TRANSACTIONS),
    );

    let s = assert_ok!(h.pipeline.ingest_file(&pdf_upload("scan.pdf"), &[]).await);

    assert_eq!(
        h.tracker.path(0),
        vec![
            Stage::Validate,
            Stage::ExtractText,
            Stage::OcrAttempt,
            Stage::Rasterize,
            Stage::Optimize,
            Stage::VisionAttempt,
        ]
    );
    assert_eq!(s.processing_type, ProcessingType::Image);
    assert_eq!(s.actual_pages, 3);
    // ceil(3 × 2.5)
    assert_eq!(s.page_count, 8);
    assert_eq!(s.ocr_confidence, None);

    assert_eq!(h.text.calls(), 0);
    let request = h.vision.last_request();
    assert_eq!(request.images.len(), 3);
    assert!(request.images.iter().all(|i| i.media_type == "image/png"));
}

#[tokio::test]
async fn failing_ocr_backend_is_recovered_by_vision() {
    let ocr = FixedOcr::failing();
    let h = harness(FakePdf::scanned(2), Some(ocr.clone()));

    let s = assert_ok!(h.pipeline.ingest_file(&pdf_upload("scan.pdf"), &[]).await);

    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    assert_eq!(s.processing_type, ProcessingType::Image);
    assert_eq!(s.page_count, 6);
}

#[tokio::test]
async fn near_empty_ocr_text_counts_as_unavailable() {
    let h = harness(FakePdf::scanned(1), Some(FixedOcr::returning("ACME BANK")));

    let s = assert_ok!(h.pipeline.ingest_file(&pdf_upload("scan.pdf"), &[]).await);

    assert_eq!(s.processing_type, ProcessingType::Image);
    assert_eq!(h.text.calls(), 0);
    assert_eq!(h.vision.calls(), 1);
}

#[tokio::test]
async fn blank_text_layer_on_unscanned_pdf_is_no_extractable_text() {
    let pdf = Arc::new(FakePdf {
        text: "  \n\n  ".to_string(),
        pages: 2,
        scanned: false,
        splits: AtomicUsize::new(0),
    });
    let h = harness(pdf, None);

    let err = assert_err!(h.pipeline.ingest_file(&pdf_upload("odd.pdf"), &[]).await);

    assert!(matches!(err, IngestError::NoExtractableText { ref filename } if filename == "odd.pdf"));
    assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
    assert_eq!(h.text.calls(), 0);
    assert_eq!(h.vision.calls(), 0);
    assert_eq!(h.tracker.errors.lock().unwrap().as_slice(), &[0]);
}

// ── Image paths ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn image_with_ocr_is_one_ocr_page() {
    let ocr = FixedOcr::returning(STATEMENT_TEXT);
    let h = harness(FakePdf::text(9), Some(ocr.clone()));

    let s = assert_ok!(h.pipeline.ingest_file(&png_upload("photo.png"), &[]).await);

    assert_eq!(
        h.tracker.path(0),
        vec![Stage::Validate, Stage::Optimize, Stage::OcrAttempt, Stage::AiFromText]
    );
    assert_eq!(s.processing_type, ProcessingType::Ocr);
    assert_eq!((s.actual_pages, s.page_count), (1, 1));
    assert_eq!(ocr.mime_types.lock().unwrap()[0], "image/png");
}

#[tokio::test]
async fn image_without_ocr_goes_straight_to_vision() {
    let h = harness(FakePdf::text(9), None);

    let s = assert_ok!(h.pipeline.ingest_file(&png_upload("photo.png"), &[]).await);

    assert_eq!(
        h.tracker.path(0),
        vec![Stage::Validate, Stage::Optimize, Stage::OcrAttempt, Stage::VisionAttempt]
    );
    assert_eq!(s.processing_type, ProcessingType::Image);
    assert_eq!((s.actual_pages, s.page_count), (1, 3));
    assert_eq!(h.vision.last_request().images.len(), 1);
}

#[tokio::test]
async fn heic_is_converted_to_jpeg_before_any_extraction() {
    let scratch = tempfile::tempdir().unwrap();
    let config = config_in(scratch.path()).build().unwrap();
    let vision = Recorder::answering("vision", TWO_TRANSACTIONS);
    let heic = Arc::new(FakeHeic::default());
    let pipeline = IngestionPipeline::with_backends(config, Recorder::answering("text", "[]"), vision.clone())
        .with_pdf_engine(FakePdf::text(1))
        .with_heic_converter(heic.clone());

    let s = pipeline.ingest_file(&heic_upload("IMG_0042.HEIC"), &[]).await.unwrap();

    assert_eq!(heic.calls.load(Ordering::SeqCst), 1);
    assert_eq!(s.processing_type, ProcessingType::Image);
    assert_eq!(vision.last_request().images[0].media_type, "image/jpeg");
    assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());
}

// ── Validation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn validation_failures_stop_before_any_extraction() {
    let h = harness_with(
        FakePdf::text(1),
        None,
        |b| b.max_file_bytes(20),
        Recorder::answering("text", TWO_TRANSACTIONS),
    );

    let err = h
        .pipeline
        .ingest_file(&UploadedFile::new("notes.txt", b"hello".to_vec()), &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Validation(ValidationError::UnsupportedFormat { .. })
    ));

    let err = assert_err!(h.pipeline.ingest_file(&pdf_upload("big.pdf"), &[]).await);
    assert!(matches!(err, IngestError::Validation(ValidationError::FileTooLarge { .. })));
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = h
        .pipeline
        .ingest_file(&UploadedFile::new("fake.pdf", b"\x89PNG\r\n\x1a\n....".to_vec()), &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Validation(ValidationError::ExtensionMimeMismatch { .. })
    ));

    assert!(h.tracker.path(0).iter().all(|s| *s == Stage::Validate));
    assert_eq!(h.text.calls() + h.vision.calls(), 0);
    assert!(scratch_is_empty(&h));
}

// ── Retry policy ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn rate_limits_are_retried_until_success() {
    let text = Recorder::scripted(
        "text",
        vec![
            Err(BackendError::RateLimited("429 Too Many Requests".into())),
            Err(BackendError::RateLimited("429 Too Many Requests".into())),
        ],
    );
    let h = harness_with(FakePdf::text(1), None, |b| b, text.clone());

    let s = assert_ok!(h.pipeline.ingest_file(&pdf_upload("march.pdf"), &[]).await);

    assert_eq!(s.transaction_count, 2);
    assert_eq!(text.calls(), 3);
}

#[tokio::test]
async fn exhausted_rate_limit_budget_is_reported_as_rate_limited() {
    let text = Recorder::scripted(
        "text",
        (0..5)
            .map(|_| Err(BackendError::RateLimited("rate limit reached".into())))
            .collect(),
    );
    let h = harness_with(FakePdf::text(1), None, |b| b, text.clone());

    let err = assert_err!(h.pipeline.ingest_file(&pdf_upload("march.pdf"), &[]).await);

    assert!(matches!(err, IngestError::RateLimited { attempts: 3, .. }));
    assert_eq!(err.kind(), ErrorKind::RateLimited);
    assert_eq!(text.calls(), 3);
}

#[tokio::test]
async fn other_adapter_errors_are_not_retried() {
    let text = Recorder::scripted("text", vec![Err(BackendError::Api("invalid_request_error".into()))]);
    let h = harness_with(FakePdf::text(1), None, |b| b, text.clone());

    let err = assert_err!(h.pipeline.ingest_file(&pdf_upload("march.pdf"), &[]).await);

    assert!(matches!(
        err,
        IngestError::ExtractionFailed {
            stage: Stage::AiFromText,
            ..
        }
    ));
    assert_eq!(text.calls(), 1);
}

#[tokio::test]
async fn vision_failure_is_fatal_and_still_cleans_up() {
    let scratch = tempfile::tempdir().unwrap();
    let config = config_in(scratch.path()).build().unwrap();
    let vision = Recorder::scripted("vision", vec![Err(BackendError::Api("model overloaded".into()))]);
    let pipeline = IngestionPipeline::with_backends(config, Recorder::answering("text", "[]"), vision.clone())
        .with_pdf_engine(FakePdf::scanned(2));

    let err = pipeline.ingest_file(&pdf_upload("scan.pdf"), &[]).await.unwrap_err();

    assert!(matches!(
        err,
        IngestError::ExtractionFailed {
            stage: Stage::VisionAttempt,
            ..
        }
    ));
    assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn malformed_answer_fails_the_file() {
    let h = harness_with(
        FakePdf::text(1),
        None,
        |b| b,
        Recorder::answering("text", "Sorry, I can't read this statement."),
    );

    let err = assert_err!(h.pipeline.ingest_file(&pdf_upload("march.pdf"), &[]).await);

    assert!(matches!(err, IngestError::MalformedResponse { .. }));
    assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
}

// ── Timeouts ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn ocr_timeout_falls_back_to_vision() {
    let h = harness_with(
        FakePdf::scanned(2),
        None,
        |b| b.adapter_timeout_secs(5),
        Recorder::answering("text", TWO_TRANSACTIONS),
    );
    let pipeline = h.pipeline.with_ocr_backend(Arc::new(StalledOcr));

    let s = assert_ok!(pipeline.ingest_file(&pdf_upload("scan.pdf"), &[]).await);

    assert_eq!(
        h.tracker.path(0),
        vec![
            Stage::Validate,
            Stage::ExtractText,
            Stage::OcrAttempt,
            Stage::Rasterize,
            Stage::Optimize,
            Stage::VisionAttempt,
        ]
    );
    assert_eq!(s.processing_type, ProcessingType::Image);
    assert_eq!(s.page_count, 6);
    assert_eq!(h.text.calls(), 0);
    assert_eq!(h.vision.calls(), 1);
    assert!(std::fs::read_dir(h.scratch.path()).unwrap().next().is_none());
}

#[tokio::test(start_paused = true)]
async fn vision_timeout_is_fatal_and_still_cleans_up() {
    let scratch = tempfile::tempdir().unwrap();
    let config = config_in(scratch.path()).adapter_timeout_secs(5).build().unwrap();
    let tracker = Arc::new(Tracker::default());
    let pipeline = IngestionPipeline::with_backends(config, Recorder::answering("text", "[]"), Arc::new(StalledBackend))
        .with_pdf_engine(FakePdf::scanned(2))
        .with_progress(tracker.clone());

    let err = assert_err!(pipeline.ingest_file(&pdf_upload("scan.pdf"), &[]).await);

    assert!(matches!(
        err,
        IngestError::Timeout {
            stage: Stage::VisionAttempt,
            secs: 5
        }
    ));
    assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
    assert_eq!(tracker.path(0).last(), Some(&Stage::VisionAttempt));
    assert_eq!(tracker.errors.lock().unwrap().as_slice(), &[0]);
    assert!(std::fs::read_dir(scratch.path()).unwrap().next().is_none());
}

#[tokio::test(start_paused = true)]
async fn file_timeout_names_the_stage_it_interrupted() {
    let h = harness_with(
        FakePdf::scanned(2),
        None,
        |b| b.adapter_timeout_secs(3600).file_timeout_secs(10),
        Recorder::answering("text", TWO_TRANSACTIONS),
    );
    let pipeline = h.pipeline.with_ocr_backend(Arc::new(StalledOcr));

    let err = assert_err!(pipeline.ingest_file(&pdf_upload("scan.pdf"), &[]).await);

    assert!(matches!(
        err,
        IngestError::Timeout {
            stage: Stage::OcrAttempt,
            secs: 10
        }
    ));
    assert_eq!(h.tracker.path(0).last(), Some(&Stage::OcrAttempt));
    assert_eq!(h.tracker.errors.lock().unwrap().as_slice(), &[0]);
    assert_eq!(h.vision.calls(), 0);
    assert!(std::fs::read_dir(h.scratch.path()).unwrap().next().is_none());
}

// ── Categories ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn custom_categories_reach_the_prompt() {
    let h = harness(FakePdf::text(1), None);
    let hints = vec![CategoryHint::new("Coffee").with_description("cafes and coffee shops")];

    h.pipeline.ingest_file(&pdf_upload("march.pdf"), &hints).await.unwrap();

    let prompt = h.text.last_request().prompt;
    assert!(prompt.contains("\"Coffee\": cafes and coffee shops"));
    assert!(prompt.contains("\"Other\""));
}

#[tokio::test]
async fn keyword_fallback_relabels_other_only_when_enabled() {
    let off = harness(FakePdf::text(1), None);
    let s = assert_ok!(off.pipeline.ingest_file(&pdf_upload("march.pdf"), &[]).await);
    assert_eq!(s.transactions[0].category, "Other");

    let on = harness_with(
        FakePdf::text(1),
        None,
        |b| b.keyword_fallback(true),
        Recorder::answering("text", TWO_TRANSACTIONS),
    );
    let s = assert_ok!(on.pipeline.ingest_file(&pdf_upload("march.pdf"), &[]).await);
    assert_eq!(s.transactions[0].category, "Dining");
    assert_eq!(s.transactions[0].category_source, CategorySource::Rule);
    assert_eq!(s.transactions[1].category, "Payroll & Income");
    assert_eq!(s.transactions[1].category_source, CategorySource::Ai);
}

// ── Batches ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_isolates_failures_and_reports_usage() {
    let h = harness(FakePdf::text(3), None);
    let files = vec![
        pdf_upload("march.pdf"),
        UploadedFile::new("notes.txt", b"hello".to_vec()),
        png_upload("receipt.png"),
    ];

    let outcome = h.pipeline.ingest_batch(&files, &[]).await;

    assert!(!outcome.is_complete_success());
    let names: Vec<&str> = outcome.statements.iter().map(|s| s.filename.as_str()).collect();
    assert_eq!(names, vec!["march.pdf", "receipt.png"]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].filename, "notes.txt");
    assert_eq!(outcome.failures[0].kind, ErrorKind::Validation);

    let u = outcome.usage;
    assert_eq!(u.document_count, 2);
    assert_eq!(u.total_actual_pages, 4);
    assert_eq!(u.total_billable_pages, 3 + 3);
    assert_eq!(u.total_text_pages, 3);
    assert_eq!(u.total_image_pages, 1);
    assert_eq!(u.transaction_count, 4);
    assert_eq!(u.bytes_processed, files[0].size() + files[2].size());

    assert_eq!(*h.tracker.batch.lock().unwrap(), Some((3, 2)));
    assert_eq!(h.tracker.errors.lock().unwrap().as_slice(), &[1]);
    assert_eq!(h.tracker.completed.lock().unwrap().len(), 2);
    assert!(scratch_is_empty(&h));
}

#[tokio::test]
async fn concurrent_batch_keeps_upload_order() {
    let h = harness_with(
        FakePdf::text(1),
        None,
        |b| b.file_concurrency(4).extraction_concurrency(2),
        Recorder::answering("text", TWO_TRANSACTIONS),
    );
    let files: Vec<UploadedFile> = (0..6).map(|i| pdf_upload(&format!("m{i}.pdf"))).collect();

    let outcome = h.pipeline.ingest_batch(&files, &[]).await;

    let names: Vec<String> = outcome.statements.iter().map(|s| s.filename.clone()).collect();
    let expected: Vec<String> = (0..6).map(|i| format!("m{i}.pdf")).collect();
    assert_eq!(names, expected);
    assert_eq!(h.text.calls(), 6);
}

#[tokio::test]
async fn stream_yields_every_file_once() {
    let h = harness(FakePdf::text(2), None);
    let pipeline = Arc::new(h.pipeline);
    let files = vec![pdf_upload("a.pdf"), UploadedFile::new("b.doc", b"x".to_vec()), png_upload("c.png")];

    let mut outcomes: Vec<_> = ingest_stream(pipeline, files, Vec::new()).collect().await;
    outcomes.sort_by_key(|o| o.index);

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].result.is_ok());
    assert!(outcomes[1].result.is_err());
    assert_eq!(outcomes[1].filename, "b.doc");
    assert_eq!(outcomes[2].result.as_ref().unwrap().processing_type, ProcessingType::Image);
}
