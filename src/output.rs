//! Result types produced by the ingestion pipeline.

use crate::error::FileFailure;
use crate::transaction::{Transaction, TransactionType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which stage of the fallback cascade produced the transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingType {
    /// Embedded PDF text.
    Text,
    /// Text recovered by the OCR service.
    Ocr,
    /// Raw images sent to the vision extractor.
    Image,
}

impl fmt::Display for ProcessingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingType::Text => f.write_str("text"),
            ProcessingType::Ocr => f.write_str("ocr"),
            ProcessingType::Image => f.write_str("image"),
        }
    }
}

/// What the pipeline learned about one file, before transactions are
/// aggregated. Created once per file and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Text handed to the text extractor; `None` on the vision path.
    pub text: Option<String>,
    /// Billable pages.
    pub page_count: u32,
    pub processing_type: ProcessingType,
    /// Physical pages.
    pub actual_pages: u32,
    pub ocr_confidence: Option<f32>,
}

/// Final per-file result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementResult {
    pub filename: String,
    pub transactions: Vec<Transaction>,
    pub total_debits: f64,
    pub total_credits: f64,
    pub transaction_count: usize,
    /// Billable pages.
    pub page_count: u32,
    /// Physical pages.
    pub actual_pages: u32,
    pub processing_type: ProcessingType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_confidence: Option<f32>,
}

impl StatementResult {
    /// Aggregate transactions and extraction metadata into a statement.
    pub fn new(
        filename: impl Into<String>,
        transactions: Vec<Transaction>,
        extraction: &ExtractionResult,
    ) -> Self {
        let total_debits = round2(sum_of(&transactions, TransactionType::Debit));
        let total_credits = round2(sum_of(&transactions, TransactionType::Credit));
        Self {
            filename: filename.into(),
            transaction_count: transactions.len(),
            transactions,
            total_debits,
            total_credits,
            page_count: extraction.page_count,
            actual_pages: extraction.actual_pages,
            processing_type: extraction.processing_type,
            ocr_confidence: extraction.ocr_confidence,
        }
    }
}

fn sum_of(transactions: &[Transaction], kind: TransactionType) -> f64 {
    transactions
        .iter()
        .filter(|t| t.kind == kind)
        .map(|t| t.amount)
        .sum()
}

/// Round to two decimals, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Usage figures for one batch, reported to the billing collaborator.
///
/// Only successful files contribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub document_count: usize,
    pub total_billable_pages: u64,
    pub total_actual_pages: u64,
    /// Physical pages processed via the text or OCR paths.
    pub total_text_pages: u64,
    /// Physical pages processed via the vision path.
    pub total_image_pages: u64,
    pub transaction_count: usize,
    pub bytes_processed: u64,
}

impl UsageReport {
    /// Fold one successful file into the report.
    pub fn record(&mut self, statement: &StatementResult, bytes: u64) {
        self.document_count += 1;
        self.total_billable_pages += u64::from(statement.page_count);
        self.total_actual_pages += u64::from(statement.actual_pages);
        match statement.processing_type {
            ProcessingType::Text | ProcessingType::Ocr => {
                self.total_text_pages += u64::from(statement.actual_pages)
            }
            ProcessingType::Image => self.total_image_pages += u64::from(statement.actual_pages),
        }
        self.transaction_count += statement.transaction_count;
        self.bytes_processed += bytes;
    }
}

/// Everything a batch produced: statements in upload order, the files that
/// failed, and the usage report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub statements: Vec<StatementResult>,
    pub failures: Vec<FileFailure>,
    pub usage: UsageReport,
}

impl BatchOutcome {
    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extraction(kind: ProcessingType, pages: u32, billable: u32) -> ExtractionResult {
        ExtractionResult {
            text: None,
            page_count: billable,
            processing_type: kind,
            actual_pages: pages,
            ocr_confidence: None,
        }
    }

    #[test]
    fn totals_are_split_by_type_and_rounded() {
        let txs = vec![
            Transaction::new("2025-01-01", "A", 10.0, TransactionType::Debit, "Other"),
            Transaction::new("2025-01-02", "B", 0.1, TransactionType::Debit, "Other"),
            Transaction::new("2025-01-03", "C", 0.2, TransactionType::Debit, "Other"),
            Transaction::new("2025-01-04", "Pay", 99.999, TransactionType::Credit, "Other"),
        ];
        let s = StatementResult::new("s.pdf", txs, &extraction(ProcessingType::Text, 2, 2));
        assert_eq!(s.transaction_count, 4);
        assert_eq!(s.total_debits, 10.3);
        assert_eq!(s.total_credits, 100.0);
    }

    #[test]
    fn usage_splits_text_and_image_pages() {
        let mut usage = UsageReport::default();
        let text = StatementResult::new("a.pdf", vec![], &extraction(ProcessingType::Ocr, 4, 4));
        let image = StatementResult::new("b.pdf", vec![], &extraction(ProcessingType::Image, 2, 6));
        usage.record(&text, 100);
        usage.record(&image, 50);
        assert_eq!(usage.document_count, 2);
        assert_eq!(usage.total_billable_pages, 10);
        assert_eq!(usage.total_actual_pages, 6);
        assert_eq!(usage.total_text_pages, 4);
        assert_eq!(usage.total_image_pages, 2);
        assert_eq!(usage.bytes_processed, 150);
    }
}
