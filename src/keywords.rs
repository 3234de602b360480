//! Keyword fallback categoriser.
//!
//! A fixed merchant-keyword table for transactions the extraction service
//! left in "Other". Only "Other" is ever touched; a category the service
//! chose, or one set by a rule or by hand, is kept.

use crate::transaction::{CategorySource, Transaction, OTHER_CATEGORY};

/// Keywords per category, checked in table order.
pub const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Payroll & Income",
        &["payroll", "salary", "direct deposit", "government of canada", "e-transfer from", "etransfer from"],
    ),
    ("Rent & Mortgage", &["rent", "mortgage", "landlord", "property"]),
    (
        "Utilities",
        &[
            "hydro", "enbridge", "gas bill", "rogers", "bell canada", "telus", "fido", "koodo",
            "virgin mobile", "internet", "electric",
        ],
    ),
    (
        "Groceries",
        &[
            "loblaws", "metro", "shoppers", "costco", "no frills", "walmart", "sobeys", "food basics",
            "freshco", "farm boy", "whole foods", "longos", "t&t", "superstore",
        ],
    ),
    (
        "Dining",
        &[
            "tim hortons", "mcdonalds", "starbucks", "uber eats", "skip the dishes", "doordash",
            "swiss chalet", "restaurant", "pizza", "subway", "wendys", "burger king", "a&w",
        ],
    ),
    (
        "Transportation",
        &[
            "presto", "transit", "petro", "shell", "esso", "uber trip", "lyft", "parking", "impark",
            "gas station", "canadian tire gas",
        ],
    ),
    (
        "Insurance",
        &["insurance", "sunlife", "manulife", "intact", "desjardins", "great-west", "canada life"],
    ),
    (
        "Subscriptions",
        &[
            "netflix", "spotify", "amazon prime", "disney+", "apple.com", "adobe", "microsoft",
            "youtube premium", "crave",
        ],
    ),
    ("E-Transfer", &["interac e-transfer", "etransfer", "e-transfer to"]),
    (
        "Bank Fees",
        &["monthly fee", "account fee", "overdraft", "nsf fee", "service charge", "atm fee"],
    ),
];

/// Category for `description` by keyword, or "Other".
pub fn categorize_description(description: &str) -> &'static str {
    let lower = description.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(OTHER_CATEGORY)
}

/// Re-label "Other" transactions that hit a keyword.
pub fn apply_keyword_fallback(transactions: Vec<Transaction>) -> Vec<Transaction> {
    transactions
        .into_iter()
        .map(|mut tx| {
            if tx.category == OTHER_CATEGORY {
                let category = categorize_description(&tx.description);
                if category != OTHER_CATEGORY {
                    tx.category = category.to_string();
                    tx.category_source = CategorySource::Rule;
                }
            }
            tx
        })
        .collect()
}
