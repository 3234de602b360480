//! Structured OCR: the advisory middle stage between native text and vision.
//!
//! [`OcrAdapter::extract`] never fails. Transport errors, timeouts, a missing
//! backend and near-empty text all collapse into [`OcrOutcome::Unavailable`],
//! which the orchestrator answers by moving on to the vision fallback.
//!
//! The backend enforces a hard per-call page ceiling, so PDFs above it are
//! split into sequential sub-documents, recognised one by one, and joined in
//! page order.

use crate::pipeline::pdf::PdfEngine;
use crate::pipeline::validate::FileKind;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Result of one OCR attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum OcrOutcome {
    Available {
        text: String,
        confidence: Option<f32>,
    },
    Unavailable,
}

impl OcrOutcome {
    pub fn is_available(&self) -> bool {
        matches!(self, OcrOutcome::Available { .. })
    }
}

/// Text recognised from one backend call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecognizedText {
    pub text: String,
    pub confidence: Option<f32>,
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR transport error: {0}")]
    Transport(String),

    #[error("OCR service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("OCR response could not be parsed: {0}")]
    Malformed(String),

    #[error("OCR call timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not split PDF for OCR: {0}")]
    Split(String),
}

/// A structured-OCR service.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Recognise one document of at most the backend's page ceiling.
    async fn process(&self, content: &[u8], mime_type: &str) -> Result<RecognizedText, OcrError>;
}

/// Chunking, thresholding wrapper around an optional [`OcrBackend`].
#[derive(Clone)]
pub struct OcrAdapter {
    backend: Option<Arc<dyn OcrBackend>>,
    engine: Arc<dyn PdfEngine>,
    page_ceiling: usize,
    min_chars: usize,
    call_timeout: Duration,
}

impl OcrAdapter {
    pub fn new(
        backend: Option<Arc<dyn OcrBackend>>,
        engine: Arc<dyn PdfEngine>,
        page_ceiling: usize,
        min_chars: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            engine,
            page_ceiling: page_ceiling.max(1),
            min_chars,
            call_timeout,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    /// Run OCR over `content`. Any failure is reported as `Unavailable`.
    pub async fn extract(&self, content: &[u8], kind: FileKind) -> OcrOutcome {
        let Some(backend) = &self.backend else {
            debug!("No OCR backend configured");
            return OcrOutcome::Unavailable;
        };

        match self.recognise(backend.as_ref(), content, kind).await {
            Ok(recognised) => {
                let chars = recognised.text.chars().count();
                if chars < self.min_chars {
                    warn!(
                        "OCR via {} returned {} chars (< {}), treating as unavailable",
                        backend.name(),
                        chars,
                        self.min_chars
                    );
                    OcrOutcome::Unavailable
                } else {
                    OcrOutcome::Available {
                        text: recognised.text,
                        confidence: recognised.confidence,
                    }
                }
            }
            Err(e) => {
                warn!("OCR via {} failed, falling back: {}", backend.name(), e);
                OcrOutcome::Unavailable
            }
        }
    }

    async fn recognise(
        &self,
        backend: &dyn OcrBackend,
        content: &[u8],
        kind: FileKind,
    ) -> Result<RecognizedText, OcrError> {
        let chunks = match kind {
            FileKind::Pdf => self.split_pdf(content).await?,
            _ => vec![content.to_vec()],
        };

        let mut parts = Vec::with_capacity(chunks.len());
        let mut confidences = Vec::new();
        for chunk in &chunks {
            let recognised = tokio::time::timeout(self.call_timeout, backend.process(chunk, kind.mime_type()))
                .await
                .map_err(|_| OcrError::Timeout(self.call_timeout))??;
            if let Some(c) = recognised.confidence {
                confidences.push(c);
            }
            if !recognised.text.is_empty() {
                parts.push(recognised.text);
            }
        }

        let text = parts.join("\n\n");
        info!(
            "OCR extracted {} chars from {} chunk(s)",
            text.chars().count(),
            chunks.len()
        );
        Ok(RecognizedText {
            text,
            confidence: mean(&confidences),
        })
    }

    async fn split_pdf(&self, content: &[u8]) -> Result<Vec<Vec<u8>>, OcrError> {
        let engine = Arc::clone(&self.engine);
        let bytes = content.to_vec();
        let ceiling = self.page_ceiling;
        tokio::task::spawn_blocking(move || engine.split(&bytes, ceiling))
            .await
            .map_err(|e| OcrError::Split(e.to_string()))?
            .map_err(|e| OcrError::Split(e.to_string()))
    }
}

fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

// ── Document AI backend ──────────────────────────────────────────────────

/// Connection settings for a Google Document AI processor.
#[derive(Clone)]
pub struct DocumentAiConfig {
    pub project_id: String,
    pub location: String,
    pub processor_id: String,
    /// OAuth bearer token.
    pub access_token: String,
    /// Full `:process` URL; overrides the one derived from the ids.
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for DocumentAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentAiConfig")
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .field("processor_id", &self.processor_id)
            .field("access_token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl DocumentAiConfig {
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(url) => url.clone(),
            None => format!(
                "https://{loc}-documentai.googleapis.com/v1/projects/{project}/locations/{loc}/processors/{processor}:process",
                loc = self.location,
                project = self.project_id,
                processor = self.processor_id,
            ),
        }
    }
}

/// [`OcrBackend`] calling Document AI's online `:process` endpoint.
#[derive(Debug, Clone)]
pub struct DocumentAiBackend {
    client: reqwest::Client,
    config: DocumentAiConfig,
}

impl DocumentAiBackend {
    pub fn new(config: DocumentAiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl OcrBackend for DocumentAiBackend {
    fn name(&self) -> &str {
        "document-ai"
    }

    async fn process(&self, content: &[u8], mime_type: &str) -> Result<RecognizedText, OcrError> {
        let body = serde_json::json!({
            "rawDocument": {
                "content": STANDARD.encode(content),
                "mimeType": mime_type,
            }
        });

        let response = self
            .client
            .post(self.config.endpoint_url())
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| OcrError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OcrError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(OcrError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_process_response(&text)
    }
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    document: Option<Document>,
}

#[derive(Debug, Default, Deserialize)]
struct Document {
    #[serde(default)]
    text: String,
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    layout: Option<Layout>,
    #[serde(default)]
    tables: Vec<Table>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Table {
    #[serde(default)]
    header_rows: Vec<Row>,
    #[serde(default)]
    body_rows: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(default)]
    cells: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    layout: Option<Layout>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Layout {
    text_anchor: Option<TextAnchor>,
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextAnchor {
    #[serde(default)]
    text_segments: Vec<TextSegment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextSegment {
    start_index: Option<Index>,
    end_index: Option<Index>,
}

/// int64 fields arrive as JSON strings from the REST API.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Index {
    Num(u64),
    Str(String),
}

impl Index {
    fn value(&self) -> usize {
        match self {
            Index::Num(n) => *n as usize,
            Index::Str(s) => s.parse().unwrap_or(0),
        }
    }
}

fn parse_process_response(body: &str) -> Result<RecognizedText, OcrError> {
    let response: ProcessResponse =
        serde_json::from_str(body).map_err(|e| OcrError::Malformed(e.to_string()))?;
    let document = response.document.unwrap_or_default();

    let confidences: Vec<f32> = document
        .pages
        .iter()
        .filter_map(|p| p.layout.as_ref().and_then(|l| l.confidence))
        .collect();

    Ok(RecognizedText {
        text: format_document(&document),
        confidence: mean(&confidences),
    })
}

/// Tables as pipe-delimited Markdown after the raw text; raw text alone
/// when no tables were detected.
fn format_document(document: &Document) -> String {
    let tables: Vec<String> = document
        .pages
        .iter()
        .flat_map(|p| p.tables.iter())
        .map(|t| format_table(t, &document.text))
        .filter(|t| !t.is_empty())
        .collect();

    if tables.is_empty() {
        return document.text.clone();
    }

    let mut parts = Vec::with_capacity(tables.len() + 1);
    if !document.text.is_empty() {
        parts.push(document.text.clone());
    }
    parts.extend(tables);
    parts.join("\n\n")
}

fn format_table(table: &Table, full_text: &str) -> String {
    let rows: Vec<Vec<String>> = table
        .header_rows
        .iter()
        .chain(table.body_rows.iter())
        .map(|row| row.cells.iter().map(|c| cell_text(c, full_text)).collect())
        .collect();

    let mut lines = Vec::with_capacity(rows.len() + 1);
    for (i, row) in rows.iter().enumerate() {
        lines.push(format!("| {} |", row.join(" | ")));
        if i == 0 && !table.header_rows.is_empty() {
            let sep = vec!["---"; row.len()].join(" | ");
            lines.push(format!("| {} |", sep));
        }
    }
    lines.join("\n")
}

fn cell_text(cell: &Cell, full_text: &str) -> String {
    let Some(anchor) = cell.layout.as_ref().and_then(|l| l.text_anchor.as_ref()) else {
        return String::new();
    };
    let mut text = String::new();
    for segment in &anchor.text_segments {
        let start = segment.start_index.as_ref().map_or(0, Index::value);
        let end = segment.end_index.as_ref().map_or(0, Index::value);
        if end > start {
            text.extend(full_text.chars().skip(start).take(end - start));
        }
    }
    text.trim().replace('\n', " ")
}
