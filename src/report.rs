// src/report.rs
//! Aggregations over stored certificates

use std::fmt;

/// Number of groups shown before the tail is folded into "Others"
pub const MAX_GROUPS: usize = 6;

/// Certificates by VAT search outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VatSummary {
    pub found: u64,
    pub not_found: u64,
    pub not_searched: u64,
}

impl VatSummary {
    pub fn total(&self) -> u64 {
        self.found + self.not_found + self.not_searched
    }
}

impl fmt::Display for VatSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} with VAT | {} without VAT | {} not searched yet",
            self.found, self.not_found, self.not_searched
        )
    }
}

/// Sort groups by count, highest first, and keep at most `max_groups`.
///
/// When there are more groups than that, the first `max_groups - 1` are kept
/// and the remainder is summed into a trailing "Others" group. Ties keep their
/// input order.
pub fn top_with_others(mut counts: Vec<(String, u64)>, max_groups: usize) -> Vec<(String, u64)> {
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    if max_groups == 0 || counts.len() <= max_groups {
        return counts;
    }

    let others: u64 = counts[max_groups - 1..].iter().map(|(_, n)| n).sum();
    counts.truncate(max_groups - 1);
    counts.push(("Others".to_string(), others));
    counts
}
