//! Category rule engine: include/exclude patterns that override the
//! extraction service's category choice.
//!
//! Categories are scanned in ascending `sort_order` (stable, so equal orders
//! keep caller order). Within one category an exclude match skips that
//! category only; an include match assigns it and stops the scan. Matching is
//! case-insensitive substring containment, never regex, so historical
//! categorisations reproduce exactly.
//!
//! [`apply`] returns a new list and leaves its input untouched.

use crate::transaction::{CategoryHint, CategorySource, Transaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Include,
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub rule_type: RuleType,
    pub pattern: String,
}

impl CategoryRule {
    pub fn include(pattern: impl Into<String>) -> Self {
        Self {
            rule_type: RuleType::Include,
            pattern: pattern.into(),
        }
    }

    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self {
            rule_type: RuleType::Exclude,
            pattern: pattern.into(),
        }
    }

    fn matches(&self, description_lower: &str) -> bool {
        description_lower.contains(&self.pattern.to_lowercase())
    }
}

/// A user category with its rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub rules: Vec<CategoryRule>,
}

impl Category {
    pub fn new(id: impl Into<String>, name: impl Into<String>, sort_order: i32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            sort_order,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: CategoryRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// The vocabulary entry handed to the extraction prompt.
    pub fn hint(&self) -> CategoryHint {
        CategoryHint {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

/// First category (in `sort_order`) whose rules claim `description`.
fn matching_category<'a>(description: &str, ordered: &[&'a Category]) -> Option<&'a Category> {
    let desc_lower = description.to_lowercase();
    ordered.iter().copied().find(|cat| {
        if cat.rules.is_empty() {
            return false;
        }
        let excluded = cat
            .rules
            .iter()
            .any(|r| r.rule_type == RuleType::Exclude && r.matches(&desc_lower));
        !excluded
            && cat
                .rules
                .iter()
                .any(|r| r.rule_type == RuleType::Include && r.matches(&desc_lower))
    })
}

/// Apply category rules to `transactions`.
///
/// With `reprocess`, transactions whose category was set by hand are
/// returned unchanged.
pub fn apply(transactions: &[Transaction], categories: &[Category], reprocess: bool) -> Vec<Transaction> {
    let mut ordered: Vec<&Category> = categories.iter().collect();
    ordered.sort_by_key(|c| c.sort_order);

    transactions
        .iter()
        .map(|tx| {
            if reprocess && tx.category_source == CategorySource::Manual {
                return tx.clone();
            }
            match matching_category(&tx.description, &ordered) {
                Some(cat) => {
                    debug!(
                        "Rule match: '{}' → '{}' (was '{}')",
                        tx.description.chars().take(50).collect::<String>(),
                        cat.name,
                        tx.category
                    );
                    Transaction {
                        category: cat.name.clone(),
                        category_source: CategorySource::Rule,
                        ..tx.clone()
                    }
                }
                None => tx.clone(),
            }
        })
        .collect()
}
