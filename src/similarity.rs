//! Near-duplicate detection for category names and rule patterns.
//!
//! Exact duplicates are hard errors ([`CategoryError`]). Near misses are
//! surfaced as a [`SimilarityWarning`] and never block the change: two
//! categories called "Grocery" and "Groceries" are probably a mistake, but
//! the user decides.
//!
//! Every candidate is checked for an exact duplicate before any warning is
//! produced, so a near miss early in the list can never hide an exact
//! duplicate later in it.

use crate::error::CategoryError;
use crate::rules::Category;
use serde::{Deserialize, Serialize};

/// Largest edit distance still reported as "very similar".
pub const MAX_SIMILAR_DISTANCE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarityWarning {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_pattern: Option<String>,
}

/// Single-character-edit distance between `a` and `b`, over `char`s.
///
/// Keeps one row of the DP table sized to the shorter input.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return long.len();
    }

    let mut row: Vec<usize> = (0..=short.len()).collect();
    for (i, lc) in long.iter().enumerate() {
        let mut diag = row[0];
        row[0] = i + 1;
        for (j, sc) in short.iter().enumerate() {
            let above = row[j + 1];
            let cost = usize::from(lc != sc);
            row[j + 1] = (above + 1).min(row[j] + 1).min(diag + cost);
            diag = above;
        }
    }
    row[short.len()]
}

/// Crude English singular: "groceries" → "grocery", "fees" → "fee".
fn singular(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{stem}y")
    } else if word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

fn names_are_similar(a: &str, b: &str) -> bool {
    levenshtein(a, b) <= MAX_SIMILAR_DISTANCE
        || levenshtein(&singular(a), &singular(b)) <= MAX_SIMILAR_DISTANCE
}

/// Check a new category name against the existing ones.
///
/// Fails on an exact case-insensitive match; warns when a name is within
/// edit distance two, comparing singular forms as well.
pub fn check_name_similarity<S: AsRef<str>>(
    new_name: &str,
    existing: &[S],
) -> Result<Option<SimilarityWarning>, CategoryError> {
    let lower = new_name.trim().to_lowercase();
    if lower.is_empty() {
        return Err(CategoryError::EmptyName);
    }

    if let Some(dup) = existing
        .iter()
        .map(AsRef::as_ref)
        .find(|name| name.trim().to_lowercase() == lower)
    {
        return Err(CategoryError::DuplicateName {
            name: dup.to_string(),
        });
    }

    Ok(existing
        .iter()
        .map(AsRef::as_ref)
        .find(|name| names_are_similar(&lower, &name.trim().to_lowercase()))
        .map(|name| SimilarityWarning {
            message: format!("Very similar to existing category '{}'", name),
            conflicting_name: Some(name.to_string()),
            conflicting_pattern: None,
        }))
}

/// Check a new rule pattern for `category_id` against every existing rule.
///
/// Fails on an exact duplicate inside the same category. Warns on substring
/// overlap or edit distance two against a rule in any category, since
/// overlapping patterns make categorisation order-dependent.
pub fn check_rule_conflict(
    pattern: &str,
    category_id: &str,
    categories: &[Category],
) -> Result<Option<SimilarityWarning>, CategoryError> {
    let lower = pattern.trim().to_lowercase();
    if lower.is_empty() {
        return Err(CategoryError::EmptyPattern);
    }

    let rules = || {
        categories
            .iter()
            .flat_map(|cat| cat.rules.iter().map(move |rule| (cat, rule)))
    };

    if let Some((_, rule)) = rules()
        .find(|(cat, rule)| cat.id == category_id && rule.pattern.trim().to_lowercase() == lower)
    {
        return Err(CategoryError::DuplicatePattern {
            pattern: rule.pattern.clone(),
        });
    }

    for (cat, rule) in rules() {
        let existing = rule.pattern.trim().to_lowercase();
        if existing.is_empty() {
            continue;
        }
        if lower.contains(&existing) || existing.contains(&lower) {
            return Ok(Some(SimilarityWarning {
                message: format!(
                    "Pattern overlaps with rule '{}' on category '{}'",
                    rule.pattern, cat.name
                ),
                conflicting_name: Some(cat.name.clone()),
                conflicting_pattern: Some(rule.pattern.clone()),
            }));
        }
        if levenshtein(&lower, &existing) <= MAX_SIMILAR_DISTANCE {
            return Ok(Some(SimilarityWarning {
                message: format!(
                    "Very similar to rule '{}' on category '{}'",
                    rule.pattern, cat.name
                ),
                conflicting_name: Some(cat.name.clone()),
                conflicting_pattern: Some(rule.pattern.clone()),
            }));
        }
    }
    Ok(None)
}
