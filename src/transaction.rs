//! Transaction data model shared by the extraction adapters, the rule
//! engine and the exporters.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Direction of a transaction. Amounts are always non-negative; the sign
/// lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Debit,
    Credit,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Debit => f.write_str("debit"),
            TransactionType::Credit => f.write_str("credit"),
        }
    }
}

/// Provenance of a transaction's category.
///
/// Governs whether later passes may overwrite it: `Manual` is never touched
/// by a reprocessing run of the rule engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorySource {
    /// Assigned by the extraction service.
    #[default]
    Ai,
    /// Assigned by a categorisation rule.
    Rule,
    /// Set by the user.
    Manual,
}

/// A single statement line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction date, `YYYY-MM-DD`.
    pub date: String,
    /// Posting date when the statement shows one, `YYYY-MM-DD`.
    #[serde(default)]
    pub posting_date: Option<String>,
    pub description: String,
    /// Always `>= 0`. A signed value in input is folded to its magnitude.
    #[serde(deserialize_with = "magnitude")]
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub category_source: CategorySource,
}

fn magnitude<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    f64::deserialize(deserializer).map(f64::abs)
}

fn default_category() -> String {
    OTHER_CATEGORY.to_string()
}

/// Catch-all category name.
pub const OTHER_CATEGORY: &str = "Other";

impl Transaction {
    /// Convenience constructor for an AI-categorised transaction.
    pub fn new(
        date: impl Into<String>,
        description: impl Into<String>,
        amount: f64,
        kind: TransactionType,
        category: impl Into<String>,
    ) -> Self {
        Self {
            date: date.into(),
            posting_date: None,
            description: description.into(),
            amount: amount.abs(),
            kind,
            balance: None,
            category: category.into(),
            category_source: CategorySource::Ai,
        }
    }
}

/// A caller-supplied category used to shape the extraction vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryHint {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl CategoryHint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
