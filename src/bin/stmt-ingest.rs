//! CLI binary for statement-ingest.
//!
//! A thin shim over the library crate: maps flags to `IngestConfig`, runs
//! the pipeline or one of the category tools, and prints JSON or CSV.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use statement_ingest::pipeline::render::HeifConvertCli;
use statement_ingest::{
    billable_pages, check_name_similarity, check_rule_conflict, rules, to_csv_string, BatchOutcome, Category,
    CategoryHint, DocumentAiBackend, DocumentAiConfig, IngestConfig, IngestProgressCallback, IngestionPipeline,
    ProcessingType, ProgressCallback, Stage, Transaction, UploadedFile,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar over the batch; one log line per finished file.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:36.green/238}] {pos:>3}/{len} files  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        bar.set_prefix("Ingesting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
    }

    fn on_stage(&self, _file_index: usize, filename: &str, stage: Stage) {
        self.bar.set_message(format!("{filename}: {stage}"));
    }

    fn on_file_complete(
        &self,
        _file_index: usize,
        filename: &str,
        processing_type: ProcessingType,
        transaction_count: usize,
    ) {
        self.bar.println(format!(
            "  {} {:<32} {}",
            green("✓"),
            filename,
            dim(&format!("{transaction_count} transactions via {processing_type}")),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, _file_index: usize, filename: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!("  {} {:<32} {}", red("✗"), filename, red(&msg)));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total_files.saturating_sub(success_count);
        if failed == 0 {
            eprintln!("{} {} file(s) ingested", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} file(s) ingested  ({} failed)",
                if success_count == 0 { red("✘") } else { yellow("⚠") },
                bold(&success_count.to_string()),
                total_files,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ingest statements, JSON to stdout
  stmt-ingest ingest march.pdf april.pdf receipt.heic

  # CSV of all transactions, with your own category vocabulary and rules
  stmt-ingest ingest --format csv --categories cats.json --rules rules.json *.pdf -o out.csv

  # Re-apply rules to previously extracted transactions (manual edits kept)
  stmt-ingest apply-rules --transactions txs.json --rules rules.json --reprocess

  # Is a new category name too close to an existing one?
  stmt-ingest check-name Groceries --existing Grocery --existing Dining

  # Billable pages for a 10-page scan that fell back to vision
  stmt-ingest cost 10 --type image --multiplier 3

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  DOCAI_ACCESS_TOKEN      OAuth token for the Document AI OCR backend
"#;

/// Ingest bank statements into categorised transactions.
#[derive(Parser, Debug)]
#[command(
    name = "stmt-ingest",
    version,
    about = "Ingest bank statements (PDF, JPEG, PNG, HEIC) into categorised transactions",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "STMT_INGEST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "STMT_INGEST_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract transactions from statement files.
    Ingest(IngestArgs),

    /// Apply category rules to a JSON array of transactions.
    ApplyRules {
        /// JSON file with the transactions.
        #[arg(long)]
        transactions: PathBuf,

        /// JSON file with the categories and their rules.
        #[arg(long)]
        rules: PathBuf,

        /// Leave manually categorised transactions untouched.
        #[arg(long)]
        reprocess: bool,

        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },

    /// Check a new category name against existing ones.
    CheckName {
        name: String,

        /// An existing category name (repeatable).
        #[arg(long = "existing")]
        existing: Vec<String>,
    },

    /// Check a new rule pattern against every existing rule.
    CheckRule {
        pattern: String,

        /// Id of the category the rule is for.
        #[arg(long)]
        category: String,

        /// JSON file with the categories and their rules.
        #[arg(long)]
        rules: PathBuf,
    },

    /// Compute billable pages.
    Cost {
        pages: u32,

        #[arg(long = "type", value_enum, default_value = "text")]
        processing_type: ProcessingArg,

        #[arg(long, default_value_t = 3.0)]
        multiplier: f64,
    },
}

#[derive(clap::Args, Debug)]
struct IngestArgs {
    /// Statement files: .pdf, .jpg, .jpeg, .png, .heic.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Write output to this file instead of stdout.
    #[arg(short, long, env = "STMT_INGEST_OUTPUT")]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// JSON file with the category vocabulary: [{"name": ..., "description": ...}].
    #[arg(long)]
    categories: Option<PathBuf>,

    /// JSON file with categories and rules, applied after extraction.
    #[arg(long)]
    rules: Option<PathBuf>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Model for text extraction.
    #[arg(long, env = "STMT_INGEST_TEXT_MODEL")]
    text_model: Option<String>,

    /// Model for the vision fallback.
    #[arg(long, env = "STMT_INGEST_VISION_MODEL")]
    vision_model: Option<String>,

    /// Per-file size limit in MB.
    #[arg(long, env = "STMT_INGEST_MAX_FILE_MB", default_value_t = 10)]
    max_file_mb: u64,

    /// Billable pages per physical page on the vision path.
    #[arg(long, env = "STMT_INGEST_IMAGE_MULTIPLIER", default_value_t = 3.0)]
    image_multiplier: f64,

    /// Files processed at once.
    #[arg(long, env = "STMT_INGEST_FILE_CONCURRENCY", default_value_t = 1)]
    file_concurrency: usize,

    /// In-flight extraction calls at once.
    #[arg(long, env = "STMT_INGEST_EXTRACTION_CONCURRENCY", default_value_t = 1)]
    extraction_concurrency: usize,

    /// Base wait after a rate-limit signal, in milliseconds.
    #[arg(long, env = "STMT_INGEST_BACKOFF_MS", default_value_t = 15_000)]
    backoff_ms: u64,

    /// Re-label "Other" transactions from the built-in keyword table.
    #[arg(long)]
    keyword_fallback: bool,

    /// Parent directory for per-file scratch space.
    #[arg(long, env = "STMT_INGEST_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Directory containing libpdfium.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// heif-convert executable used for HEIC uploads.
    #[arg(long, env = "HEIF_CONVERT", default_value = "heif-convert")]
    heif_convert: PathBuf,

    /// Document AI project id; enables the OCR stage.
    #[arg(long, env = "DOCAI_PROJECT_ID")]
    docai_project: Option<String>,

    #[arg(long, env = "DOCAI_LOCATION", default_value = "us")]
    docai_location: String,

    #[arg(long, env = "DOCAI_PROCESSOR_ID")]
    docai_processor: Option<String>,

    #[arg(long, env = "DOCAI_ACCESS_TOKEN", hide_env_values = true)]
    docai_token: Option<String>,

    /// Disable progress bar.
    #[arg(long, env = "STMT_INGEST_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ProcessingArg {
    Text,
    Ocr,
    Image,
}

impl From<ProcessingArg> for ProcessingType {
    fn from(v: ProcessingArg) -> Self {
        match v {
            ProcessingArg::Text => ProcessingType::Text,
            ProcessingArg::Ocr => ProcessingType::Ocr,
            ProcessingArg::Image => ProcessingType::Image,
        }
    }
}

/// Default log level when `RUST_LOG` is unset.
fn log_filter(verbose: bool, quiet: bool, show_progress: bool) -> &'static str {
    if verbose {
        "debug"
    } else if quiet || show_progress {
        "error"
    } else {
        "info"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The progress bar replaces INFO logs while it is visible.
    let show_progress = match &cli.command {
        Command::Ingest(args) => !cli.quiet && !args.no_progress,
        _ => false,
    };
    let filter = log_filter(cli.verbose, cli.quiet, show_progress);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Ingest(args) => run_ingest(args, show_progress, cli.quiet).await,
        Command::ApplyRules {
            transactions,
            rules: rules_path,
            reprocess,
            format,
        } => {
            let txs: Vec<Transaction> = read_json(&transactions).await?;
            let categories: Vec<Category> = read_json(&rules_path).await?;
            let out = rules::apply(&txs, &categories, reprocess);
            write_transactions(&out, format, None).await
        }
        Command::CheckName { name, existing } => {
            match check_name_similarity(&name, &existing)? {
                Some(w) => println!("{} {}", yellow("⚠"), w.message),
                None => println!("{} '{}' is fine", green("✔"), name),
            }
            Ok(())
        }
        Command::CheckRule {
            pattern,
            category,
            rules: rules_path,
        } => {
            let categories: Vec<Category> = read_json(&rules_path).await?;
            match check_rule_conflict(&pattern, &category, &categories)? {
                Some(w) => println!("{} {}", yellow("⚠"), w.message),
                None => println!("{} '{}' is fine", green("✔"), pattern),
            }
            Ok(())
        }
        Command::Cost {
            pages,
            processing_type,
            multiplier,
        } => {
            println!("{}", billable_pages(pages, processing_type.into(), multiplier));
            Ok(())
        }
    }
}

async fn run_ingest(args: IngestArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let config = build_config(&args)?;
    let mut pipeline = IngestionPipeline::new(config)
        .context("Failed to set up the extraction backends")?
        .with_heic_converter(Arc::new(HeifConvertCli::new(&args.heif_convert)));

    if let Some(ocr) = document_ai(&args) {
        pipeline = pipeline.with_ocr_backend(Arc::new(DocumentAiBackend::new(ocr)));
    }
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        pipeline = pipeline.with_progress(cb);
    }

    let hints: Vec<CategoryHint> = match &args.categories {
        Some(path) => read_json(path).await?,
        None => Vec::new(),
    };
    let categories: Vec<Category> = match &args.rules {
        Some(path) => read_json(path).await?,
        None => Vec::new(),
    };

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        files.push(
            UploadedFile::from_path(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        );
    }

    let mut outcome = pipeline.ingest_batch(&files, &hints).await;
    if !categories.is_empty() {
        for statement in &mut outcome.statements {
            statement.transactions = rules::apply(&statement.transactions, &categories, false);
        }
    }

    match args.format {
        OutputFormat::Json => write_json(&outcome, args.output.as_deref()).await?,
        OutputFormat::Csv => {
            let all: Vec<Transaction> = outcome
                .statements
                .iter()
                .flat_map(|s| s.transactions.iter().cloned())
                .collect();
            write_transactions(&all, OutputFormat::Csv, args.output.as_deref()).await?;
        }
    }

    if !quiet {
        print_summary(&outcome);
    }
    if outcome.statements.is_empty() && !outcome.failures.is_empty() {
        anyhow::bail!("No file could be ingested");
    }
    Ok(())
}

fn print_summary(outcome: &BatchOutcome) {
    let u = &outcome.usage;
    eprintln!(
        "   {} document(s)  {} transactions  {} billable / {} actual pages  ({} text, {} image)",
        u.document_count,
        u.transaction_count,
        bold(&u.total_billable_pages.to_string()),
        u.total_actual_pages,
        u.total_text_pages,
        u.total_image_pages,
    );
    for failure in &outcome.failures {
        eprintln!("   {} {}", red("✗"), failure);
    }
}

/// Map CLI args to `IngestConfig`.
fn build_config(args: &IngestArgs) -> Result<IngestConfig> {
    let mut builder = IngestConfig::builder()
        .max_file_mb(args.max_file_mb)
        .image_page_multiplier(args.image_multiplier)
        .file_concurrency(args.file_concurrency)
        .extraction_concurrency(args.extraction_concurrency)
        .rate_limit_backoff_ms(args.backoff_ms)
        .keyword_fallback(args.keyword_fallback);

    if let Some(ref p) = args.provider {
        builder = builder.provider_name(p.clone());
    }
    if let Some(ref m) = args.text_model {
        builder = builder.text_model(m.clone());
    }
    if let Some(ref m) = args.vision_model {
        builder = builder.vision_model(m.clone());
    }
    if let Some(ref d) = args.temp_dir {
        builder = builder.temp_dir(d.clone());
    }
    if let Some(ref d) = args.pdfium_lib {
        builder = builder.pdfium_library_path(d.clone());
    }

    builder.build().context("Invalid configuration")
}

/// Document AI settings, when all of them are present.
fn document_ai(args: &IngestArgs) -> Option<DocumentAiConfig> {
    Some(DocumentAiConfig {
        project_id: args.docai_project.clone()?,
        location: args.docai_location.clone(),
        processor_id: args.docai_processor.clone()?,
        access_token: args.docai_token.clone()?,
        endpoint: None,
    })
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

async fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
    emit(json, output).await
}

async fn write_transactions(txs: &[Transaction], format: OutputFormat, output: Option<&Path>) -> Result<()> {
    match format {
        OutputFormat::Json => write_json(&txs, output).await,
        OutputFormat::Csv => emit(to_csv_string(txs).context("Failed to write CSV")?, output).await,
    }
}

async fn emit(mut text: String, output: Option<&Path>) -> Result<()> {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    match output {
        Some(path) => tokio::fs::write(path, text)
            .await
            .with_context(|| format!("Failed to write {}", path.display())),
        None => io::stdout()
            .lock()
            .write_all(text.as_bytes())
            .context("Failed to write to stdout"),
    }
}
