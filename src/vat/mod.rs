// src/vat/mod.rs
//! Belgian VAT number recognition
//!
//! A VAT number is "BE" followed by 10 digits. The last two digits are a
//! mod-97 check over the first eight.

use regex::Regex;
use std::sync::LazyLock;

pub mod crawler;

pub use crawler::{CrawlOutcome, VatCrawler};

/// Loose pattern for VAT tokens as they appear in page text
static VAT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(BE)?0[. -]?[0-9]{3}[. -]?[0-9]{3}[. -]?[0-9]{3}").expect("VAT pattern is valid")
});

/// Canonical form: uppercase, separators removed, "BE" prefixed
pub fn normalize(token: &str) -> String {
    let compact: String = token
        .chars()
        .filter(|c| !matches!(c, '.' | '-' | ' '))
        .collect::<String>()
        .to_uppercase();

    if compact.starts_with("BE") {
        compact
    } else {
        format!("BE{}", compact)
    }
}

/// Checksum test on a normalized VAT number
pub fn is_valid(vat: &str) -> bool {
    let Some(digits) = vat.strip_prefix("BE") else {
        return false;
    };
    if digits.len() != 10 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let (Ok(head), Ok(tail)) = (digits[..8].parse::<u64>(), digits[8..].parse::<u64>()) else {
        return false;
    };

    97 - head % 97 == tail
}

/// First VAT-shaped token in `text`, normalized but not yet validated
pub fn find_candidate(text: &str) -> Option<String> {
    VAT_PATTERN.find(text).map(|m| normalize(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_variants() {
        for raw in [
            "BE0123 456 346",
            "BE0123.456.346",
            "BE0123-456-346",
            "be0123456346",
            "0123.456.346",
            "0123 456 346",
            "0123456346",
        ] {
            assert_eq!(normalize(raw), "BE0123456346", "input {:?}", raw);
        }
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["be 0666.679.317", "0457-741-515", "BE0843370953"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_valid_numbers() {
        assert!(is_valid("BE0666679317"));
        assert!(is_valid("BE0457741515"));
        assert!(is_valid("BE0843370953"));
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(!is_valid("BE0666679300"));
        assert!(!is_valid("BE0457741542"));
        assert!(!is_valid("BE0843370973"));
    }

    #[test]
    fn test_malformed_numbers_are_invalid() {
        assert!(!is_valid("0666679317"));
        assert!(!is_valid("BE066667931"));
        assert!(!is_valid("BE06666793170"));
        assert!(!is_valid("BE06666793AB"));
        assert!(!is_valid(""));
    }

    #[test]
    fn test_find_candidate_in_text() {
        let text = "Contact us | TVA: be 0666.679.317 | Tel 02 123 45 67";
        assert_eq!(find_candidate(text).as_deref(), Some("BE0666679317"));
    }

    #[test]
    fn test_find_candidate_returns_first_match_only() {
        let text = "BTW 0666679300 en later BE0666679317";
        assert_eq!(find_candidate(text).as_deref(), Some("BE0666679300"));
    }

    #[test]
    fn test_find_candidate_ignores_non_ascii_digits() {
        let text = "Ref 0٦٦٦.٦٧٩.٣١٧ BTW BE0666679317";
        assert_eq!(find_candidate(text).as_deref(), Some("BE0666679317"));
    }

    #[test]
    fn test_find_candidate_without_match() {
        assert_eq!(find_candidate("no numbers here"), None);
        assert_eq!(find_candidate("1234 567 890"), None);
    }
}
