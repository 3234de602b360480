//! Post-processing: deterministic cleanup of the extraction service's answer.
//!
//! Even well-prompted models occasionally wrap the JSON in a ```json fence,
//! return negative amounts despite the instructions, or leave zero-width
//! characters copied from the PDF text layer inside descriptions. These rules
//! fix those quirks without touching the content:
//!
//! 1. Unwrap an outer code fence (a missing closing fence is tolerated)
//! 2. Parse the JSON array
//! 3. Make amounts non-negative; the sign lives in `type`
//! 4. Trim descriptions and strip invisible Unicode
//! 5. Default a missing category to "Other", tag every row `source = ai`

use crate::error::IngestError;
use crate::transaction::{CategorySource, Transaction, TransactionType, OTHER_CATEGORY};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Extract the JSON payload from a response, unwrapping a code fence.
pub fn extract_json(response: &str) -> &str {
    let Some(open) = response.find("```") else {
        return response.trim();
    };
    let mut rest = &response[open + 3..];
    if let Some(stripped) = rest.strip_prefix("json") {
        rest = stripped;
    }
    match rest.find("```") {
        Some(close) => rest[..close].trim(),
        None => rest.trim(),
    }
}

static RE_INVISIBLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x{200B}\x{200C}\x{200D}\x{2060}\x{FEFF}\x{00AD}]").unwrap());

fn clean_description(input: &str) -> String {
    RE_INVISIBLE.replace_all(input, "").trim().to_string()
}

/// One row as the model writes it. Lenient where models are sloppy.
#[derive(Debug, Deserialize)]
struct RawTransaction {
    date: String,
    #[serde(default)]
    posting_date: Option<String>,
    #[serde(default)]
    description: String,
    amount: f64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    balance: Option<f64>,
    #[serde(default)]
    category: Option<String>,
}

fn parse_kind(raw: &str) -> Result<TransactionType, IngestError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "debit" => Ok(TransactionType::Debit),
        "credit" => Ok(TransactionType::Credit),
        other => Err(IngestError::MalformedResponse {
            detail: format!("unknown transaction type '{}'", other),
        }),
    }
}

/// Parse a response into AI-categorised transactions.
pub fn parse_transactions(response: &str) -> Result<Vec<Transaction>, IngestError> {
    let json = extract_json(response);
    let rows: Vec<RawTransaction> =
        serde_json::from_str(json).map_err(|e| IngestError::MalformedResponse {
            detail: e.to_string(),
        })?;

    rows.into_iter()
        .map(|row| {
            let category = row
                .category
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| OTHER_CATEGORY.to_string());
            Ok(Transaction {
                date: row.date.trim().to_string(),
                posting_date: row
                    .posting_date
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty()),
                description: clean_description(&row.description),
                amount: row.amount.abs(),
                kind: parse_kind(&row.kind)?,
                balance: row.balance,
                category,
                category_source: CategorySource::Ai,
            })
        })
        .collect()
}
