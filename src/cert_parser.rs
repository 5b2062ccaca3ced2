// src/cert_parser.rs
//! Decoding of CT log entries into certificate records
//!
//! Only `x509_entry` leaves are decoded. The issuing root is located by
//! scanning the `extra_data` chain backwards for the last certificate that
//! parses and carries a common name.

use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::trace;
use x509_parser::prelude::*;

use crate::ct_log::types::RawLogEntry;
use crate::types::{Certificate, LogEntry};

/// Offset of the 3-byte certificate length inside an `x509_entry` leaf
const LEAF_HEADER_LEN: usize = 15;

/// Outcome of decoding an entry that was well-formed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Accepted(Certificate),
    Skipped(SkipReason),
}

/// Why a well-formed entry was not recorded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("unsupported entry type {0}")]
    UnsupportedEntryType(u16),

    #[error("certificate subject has no common name")]
    MissingCommonName,

    #[error("{0} is outside the allowed domains")]
    DomainNotAllowed(String),
}

/// A malformed entry
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("leaf input too short: {0} bytes")]
    LeafTooShort(usize),

    #[error("certificate truncated: {declared} bytes declared, {available} available")]
    Truncated { declared: usize, available: usize },

    #[error("failed to parse certificate: {0}")]
    Certificate(String),

    #[error("no CA found in certificate chain")]
    NoCaFound,
}

impl LogEntry {
    /// Decode the base64 payloads of a raw `get-entries` item
    pub fn from_raw(index: u64, raw: &RawLogEntry) -> Result<Self, DecodeError> {
        let engine = base64::engine::general_purpose::STANDARD;
        Ok(Self {
            index,
            leaf: engine.decode(raw.leaf_input.trim())?,
            chain: engine.decode(raw.extra_data.trim())?,
        })
    }
}

/// Turns log entries into [`Certificate`] records for allowed domains
#[derive(Debug, Clone)]
pub struct CertificateDecoder {
    allowed_suffixes: Vec<String>,
}

impl CertificateDecoder {
    pub fn new(allowed_suffixes: Vec<String>) -> Self {
        Self { allowed_suffixes }
    }

    pub fn allowed_suffixes(&self) -> &[String] {
        &self.allowed_suffixes
    }

    /// True when `subject` ends with one of the allowed suffixes
    pub fn is_allowed(&self, subject: &str) -> bool {
        self.allowed_suffixes
            .iter()
            .any(|suffix| subject.ends_with(suffix.as_str()))
    }

    /// Decode one entry. Skips are not errors; only malformed input is.
    pub fn decode(&self, entry: &LogEntry) -> Result<DecodeOutcome, DecodeError> {
        let leaf = &entry.leaf;
        if leaf.len() < 12 {
            return Err(DecodeError::LeafTooShort(leaf.len()));
        }

        let entry_type = u16::from_be_bytes([leaf[10], leaf[11]]);
        if entry_type != 0 {
            return Ok(DecodeOutcome::Skipped(SkipReason::UnsupportedEntryType(entry_type)));
        }

        if leaf.len() < LEAF_HEADER_LEN {
            return Err(DecodeError::LeafTooShort(leaf.len()));
        }

        let declared = u24_length(&leaf[12..LEAF_HEADER_LEN]);
        let body_end = LEAF_HEADER_LEN + declared;
        if body_end > leaf.len() {
            return Err(DecodeError::Truncated {
                declared,
                available: leaf.len() - LEAF_HEADER_LEN,
            });
        }
        let der = &leaf[LEAF_HEADER_LEN..body_end];

        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| DecodeError::Certificate(format!("{:?}", e)))?;

        let Some(subject) = common_name(cert.subject()) else {
            return Ok(DecodeOutcome::Skipped(SkipReason::MissingCommonName));
        };

        if !self.is_allowed(&subject) {
            trace!("Entry {}: {} not in allowed domains", entry.index, subject);
            return Ok(DecodeOutcome::Skipped(SkipReason::DomainNotAllowed(subject)));
        }

        let issuer = search_root(&entry.chain)?;

        let validity = cert.validity();
        let not_before = to_utc(validity.not_before.timestamp())?;
        let not_after = to_utc(validity.not_after.timestamp())?;

        let fingerprint = {
            let mut hasher = Sha256::new();
            hasher.update(der);
            hex::encode(hasher.finalize())
        };

        Ok(DecodeOutcome::Accepted(Certificate {
            id: None,
            subject,
            issuer,
            not_before,
            not_after,
            signature_algorithm: signature_algorithm_name(
                &cert.signature_algorithm.algorithm.to_id_string(),
            ),
            version: cert.version().0 + 1,
            fingerprint,
            vat: None,
            vat_searched: false,
        }))
    }
}

/// Find the common name of the root CA in an `extra_data` chain.
///
/// Walks start positions from the end of the buffer toward the front. At each
/// position the 3 bytes at `start + 2` are read as a body length, and the body
/// following them is tried as a DER certificate. The first one with a subject
/// common name wins.
pub fn search_root(chain: &[u8]) -> Result<String, DecodeError> {
    let Some(last) = chain.len().checked_sub(5) else {
        return Err(DecodeError::NoCaFound);
    };

    for start in (0..=last).rev() {
        let declared = u24_length(&chain[start + 2..start + 5]);
        let body_start = start + 5;
        let body_end = (body_start + declared).min(chain.len());

        if let Ok((_, cert)) = X509Certificate::from_der(&chain[body_start..body_end]) {
            if let Some(cn) = common_name(cert.subject()) {
                return Ok(cn);
            }
        }
    }

    Err(DecodeError::NoCaFound)
}

/// Big-endian 24-bit length; the top nibble of the first byte is ignored
fn u24_length(bytes: &[u8]) -> usize {
    (((bytes[0] & 0x0F) as usize) << 16) | ((bytes[1] as usize) << 8) | bytes[2] as usize
}

fn common_name(name: &X509Name) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(|cn| cn.to_string())
}

fn to_utc(timestamp: i64) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| DecodeError::Certificate(format!("validity out of range: {}", timestamp)))
}

/// Conventional display name for a signature algorithm OID
fn signature_algorithm_name(oid: &str) -> String {
    let name = match oid {
        "1.2.840.113549.1.1.4" => "MD5WITHRSA",
        "1.2.840.113549.1.1.5" => "SHA1WITHRSA",
        "1.2.840.113549.1.1.10" => "RSASSA-PSS",
        "1.2.840.113549.1.1.11" => "SHA256WITHRSA",
        "1.2.840.113549.1.1.12" => "SHA384WITHRSA",
        "1.2.840.113549.1.1.13" => "SHA512WITHRSA",
        "1.2.840.113549.1.1.14" => "SHA224WITHRSA",
        "1.2.840.10040.4.3" => "SHA1WITHDSA",
        "2.16.840.1.101.3.4.3.2" => "SHA256WITHDSA",
        "1.2.840.10045.4.1" => "SHA1WITHECDSA",
        "1.2.840.10045.4.3.1" => "SHA224WITHECDSA",
        "1.2.840.10045.4.3.2" => "SHA256WITHECDSA",
        "1.2.840.10045.4.3.3" => "SHA384WITHECDSA",
        "1.2.840.10045.4.3.4" => "SHA512WITHECDSA",
        "1.3.101.112" => "ED25519",
        "1.3.101.113" => "ED448",
        other => return other.to_string(),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF: &str = include_str!("../tests/fixtures/vprmedia_leaf.b64");
    const CHAIN: &str = include_str!("../tests/fixtures/vprmedia_chain.b64");

    fn fixture() -> LogEntry {
        let raw = RawLogEntry {
            leaf_input: LEAF.to_string(),
            extra_data: CHAIN.to_string(),
        };
        LogEntry::from_raw(42, &raw).unwrap()
    }

    fn be_decoder() -> CertificateDecoder {
        CertificateDecoder::new(vec![".be".to_string()])
    }

    #[test]
    fn test_decodes_known_entry() {
        let outcome = be_decoder().decode(&fixture()).unwrap();

        let DecodeOutcome::Accepted(cert) = outcome else {
            panic!("expected accepted certificate, got {:?}", outcome);
        };
        assert_eq!(cert.subject, "www.vprmedia.be");
        assert_eq!(cert.issuer, "COMODO RSA Certification Authority");
        assert_eq!(cert.signature_algorithm, "SHA256WITHRSA");
        assert_eq!(cert.version, 3);
        assert_eq!(cert.fingerprint.len(), 64);
        assert!(cert.not_before < cert.not_after);
        assert!(!cert.vat_searched);
        assert!(cert.vat.is_none());
    }

    #[test]
    fn test_rejects_domain_outside_allow_list() {
        let decoder = CertificateDecoder::new(vec![".com".to_string()]);
        let outcome = decoder.decode(&fixture()).unwrap();
        assert_eq!(
            outcome,
            DecodeOutcome::Skipped(SkipReason::DomainNotAllowed("www.vprmedia.be".to_string()))
        );
    }

    #[test]
    fn test_skips_precert_entries() {
        let mut leaf = vec![0u8; 20];
        leaf[11] = 1;
        let entry = LogEntry {
            index: 0,
            leaf,
            chain: Vec::new(),
        };

        let outcome = be_decoder().decode(&entry).unwrap();
        assert_eq!(outcome, DecodeOutcome::Skipped(SkipReason::UnsupportedEntryType(1)));
    }

    #[test]
    fn test_short_leaf_is_malformed() {
        let entry = LogEntry {
            index: 0,
            leaf: vec![0u8; 14],
            chain: Vec::new(),
        };
        assert!(matches!(
            be_decoder().decode(&entry),
            Err(DecodeError::LeafTooShort(14))
        ));
    }

    #[test]
    fn test_truncated_body_is_malformed() {
        let mut entry = fixture();
        entry.leaf.truncate(200);
        assert!(matches!(
            be_decoder().decode(&entry),
            Err(DecodeError::Truncated { available: 185, .. })
        ));
    }

    #[test]
    fn test_length_ignores_high_nibble() {
        let mut leaf = vec![0u8; LEAF_HEADER_LEN];
        leaf[12] = 0xF0;
        leaf[14] = 4;
        leaf.extend_from_slice(&[1, 2, 3, 4]);
        let entry = LogEntry {
            index: 0,
            leaf,
            chain: Vec::new(),
        };

        // 4 declared bytes fit, so the failure is in the DER itself
        assert!(matches!(
            be_decoder().decode(&entry),
            Err(DecodeError::Certificate(_))
        ));
    }

    #[test]
    fn test_missing_chain_has_no_ca() {
        let mut entry = fixture();
        entry.chain.clear();
        assert!(matches!(be_decoder().decode(&entry), Err(DecodeError::NoCaFound)));
    }

    #[test]
    fn test_search_root_on_garbage() {
        assert!(matches!(search_root(&[0u8; 64]), Err(DecodeError::NoCaFound)));
        assert!(matches!(search_root(&[1, 2, 3]), Err(DecodeError::NoCaFound)));
    }

    #[test]
    fn test_invalid_base64_is_malformed() {
        let raw = RawLogEntry {
            leaf_input: "not base64!".to_string(),
            extra_data: String::new(),
        };
        assert!(matches!(
            LogEntry::from_raw(0, &raw),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(signature_algorithm_name("1.2.840.113549.1.1.11"), "SHA256WITHRSA");
        assert_eq!(signature_algorithm_name("1.2.840.10045.4.3.2"), "SHA256WITHECDSA");
        assert_eq!(signature_algorithm_name("1.2.3.4"), "1.2.3.4");
    }
}
