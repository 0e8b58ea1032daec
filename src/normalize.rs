//! Recipient identifier normalization.
//!
//! Raw recipient input (one number per line, or a pre-split list) is reduced
//! to a deduplicated set of canonical digit-only identifiers in the
//! provider's addressing scheme.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Country-code prefix applied to bare local-format numbers.
pub const COUNTRY_PREFIX: &str = "55";

/// Digit count of a bare local-format number (area code + subscriber).
pub const LOCAL_NUMBER_LEN: usize = 11;

/// Canonicalize one raw candidate. Returns `None` when no digits survive.
///
/// Strips every non-digit character; a result of [`LOCAL_NUMBER_LEN`] digits
/// without the country prefix gets the prefix prepended, anything else passes
/// through unchanged.
pub fn canonicalize(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    if !digits.starts_with(COUNTRY_PREFIX) && digits.len() == LOCAL_NUMBER_LEN {
        return Some(format!("{COUNTRY_PREFIX}{digits}"));
    }
    Some(digits)
}

/// Normalize a pre-split list of candidates: canonicalize each, drop
/// invalids, deduplicate on the canonical string keeping first-seen order.
pub fn normalize_list<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let Some(digits) = canonicalize(item.as_ref()) else {
            continue;
        };
        if seen.insert(digits.clone()) {
            out.push(digits);
        }
    }
    out
}

/// Normalize a multi-line block: trimmed non-empty lines, then [`normalize_list`].
pub fn normalize_block(text: &str) -> Vec<String> {
    normalize_list(text.lines().map(str::trim).filter(|l| !l.is_empty()))
}

/// Report for the read-only validate operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub total: usize,
    pub valid: usize,
    pub items: Vec<String>,
}

/// Validate a raw recipient block without touching any campaign state.
pub fn validate(text: &str) -> ValidationReport {
    let items = normalize_block(text);
    ValidationReport {
        total: items.len(),
        valid: items.len(),
        items,
    }
}
