//! Prompts for the text and vision extraction calls.
//!
//! Both prompts ask for the same JSON array shape so one response parser
//! ([`crate::pipeline::postprocess`]) serves both paths. The category
//! vocabulary is injected through [`category_block`]: the caller's custom
//! categories when given, otherwise the built-in defaults.

use crate::transaction::{CategoryHint, OTHER_CATEGORY};

const TRANSACTION_SCHEMA: &str = r#"Return a JSON array of transactions. Each transaction should have:
- "date": string in YYYY-MM-DD format (the transaction date)
- "posting_date": string in YYYY-MM-DD format or null (the posting date, if available; credit card statements often show both a transaction date and a posting date)
- "description": string (the full transaction description exactly as shown, including any reference numbers, confirmation codes, or IDs; do NOT remove numbers)
- "amount": number (always positive, never negative)"#;

const CATEGORY_GUIDANCE: &str = r#"Use your best judgment based on the merchant name, description, and context. For bank transfers (e.g. "Online Banking transfer"), try to infer the purpose from any additional context. If a transfer description is generic with no clues, use "Transfers".

For credit card statements: "date" is the transaction date (when the purchase was made) and "posting_date" is the posting date (when it appeared on the account). If only one date is shown, use it as "date" and set "posting_date" to null."#;

/// Built-in category vocabulary used when the caller supplies none.
pub const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("Payroll & Income", "salary, wages, direct deposits, government payments, tax refunds"),
    ("Rent & Mortgage", "rent payments, mortgage payments, property-related"),
    ("Utilities", "hydro, gas, electric, internet, phone, cable"),
    ("Groceries", "supermarkets, grocery stores, food shopping"),
    ("Dining", "restaurants, fast food, coffee shops, food delivery"),
    ("Transportation", "transit, gas stations, parking, ride-sharing, car payments"),
    ("Insurance", "any insurance premiums"),
    ("Subscriptions", "streaming, software, memberships, recurring digital services"),
    ("E-Transfer", "Interac e-transfers (sent or received)"),
    ("Bank Fees", "account fees, service charges, overdraft fees, interest charges"),
    ("Shopping", "retail stores, online shopping, Amazon, clothing"),
    ("Health & Wellness", "pharmacy, dental, medical, gym, fitness"),
    ("Entertainment", "movies, concerts, sports, hobbies, gaming"),
    ("Business Expense", "office supplies, software, professional services, business transfers"),
    ("Transfers", "transfers between own accounts, bill payments, loan payments"),
    (OTHER_CATEGORY, "only if none of the above fit"),
];

/// Render the category list the model must choose from.
///
/// Custom hints are listed in order. A caller-supplied "Other" is dropped
/// and the catch-all is always appended last.
pub fn category_block(hints: &[CategoryHint]) -> String {
    if hints.is_empty() {
        return DEFAULT_CATEGORIES
            .iter()
            .map(|(name, desc)| format!("  - \"{}\": {}", name, desc))
            .collect::<Vec<_>>()
            .join("\n");
    }

    let mut lines: Vec<String> = hints
        .iter()
        .filter(|h| h.name != OTHER_CATEGORY)
        .map(|h| match h.description.as_deref() {
            Some(desc) if !desc.is_empty() => format!("  - \"{}\": {}", h.name, desc),
            _ => format!("  - \"{}\"", h.name),
        })
        .collect();
    lines.push(format!(
        "  - \"{}\": anything that doesn't fit the above categories",
        OTHER_CATEGORY
    ));
    lines.join("\n")
}

const TEXT_TYPE_RULES: &str = r#"- "type": "debit" or "credit", determined by the sign or context:
  - For chequing/savings: withdrawals = "debit", deposits = "credit"
  - For credit cards: purchases/charges (positive amounts) = "debit", payments/refunds/credits (negative amounts, amounts with a minus sign, or marked CR) = "credit""#;

const VISION_TYPE_RULES: &str = r#"- "type": "debit" or "credit"; pay close attention to the sign of each amount:
  - For chequing/savings: withdrawals = "debit", deposits = "credit"
  - For credit cards: purchases/charges (positive amounts) = "debit", payments/refunds/credits (negative amounts, amounts with a minus sign, or marked CR) = "credit""#;

const BALANCE_AND_CATEGORY: &str = r#"- "balance": number or null (running balance if available)
- "category": string; classify each transaction into exactly one of these categories:"#;

const SIGN_WARNING: &str = r#"IMPORTANT: Look carefully at each amount's sign. A minus sign (-) or "CR" prefix/suffix means the transaction is a "credit" (payment or refund), NOT a "debit"."#;

const JSON_ONLY: &str = "Return ONLY the JSON array, no other text.";

/// Prompt for extracting transactions from statement text.
pub fn text_prompt(categories: &str, statement_text: &str) -> String {
    format!(
        "You are a bank statement parser. Extract all transactions from the following bank statement text.\n\n{}\n{}\n{}\n{}\n\n{}\n\n{}\n\nBank statement text:\n{}",
        TRANSACTION_SCHEMA,
        TEXT_TYPE_RULES,
        BALANCE_AND_CATEGORY,
        categories,
        CATEGORY_GUIDANCE,
        JSON_ONLY,
        statement_text
    )
}

/// Prompt accompanying the page images on the vision fallback.
pub fn vision_prompt(categories: &str) -> String {
    format!(
        "You are a bank statement parser. Carefully read all visible text in the images and extract all transactions.\n\n{}\n{}\n{}\n{}\n\n{}\n\n{}\n\n{}",
        TRANSACTION_SCHEMA,
        VISION_TYPE_RULES,
        BALANCE_AND_CATEGORY,
        categories,
        CATEGORY_GUIDANCE,
        SIGN_WARNING,
        JSON_ONLY
    )
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
