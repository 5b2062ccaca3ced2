// src/export.rs
//! CSV export of stored certificates

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;

use crate::database::Storage;
use crate::types::{Certificate, VatStatus};

/// Rows fetched from storage per query
const EXPORT_PAGE_SIZE: u64 = 500;

#[derive(Serialize)]
struct CertificateRow<'a> {
    id: i64,
    subject: &'a str,
    issuer: &'a str,
    not_before: String,
    not_after: String,
    signature_algorithm: &'a str,
    version: u32,
    fingerprint: &'a str,
    vat: &'a str,
    vat_status: &'static str,
}

impl<'a> From<&'a Certificate> for CertificateRow<'a> {
    fn from(cert: &'a Certificate) -> Self {
        Self {
            id: cert.id.unwrap_or_default(),
            subject: &cert.subject,
            issuer: &cert.issuer,
            not_before: cert.not_before.to_rfc3339(),
            not_after: cert.not_after.to_rfc3339(),
            signature_algorithm: &cert.signature_algorithm,
            version: cert.version,
            fingerprint: &cert.fingerprint,
            vat: cert.vat.as_deref().unwrap_or(""),
            vat_status: match cert.vat_status() {
                VatStatus::Found => "found",
                VatStatus::NotFound => "not_found",
                VatStatus::NotSearched => "not_searched",
            },
        }
    }
}

/// Write every certificate as CSV with a header row. Returns the row count.
pub async fn export_certificates<W: Write>(storage: &dyn Storage, out: W, vat_only: bool) -> Result<u64> {
    let mut writer = csv::Writer::from_writer(out);
    let mut written = 0;
    let mut page = 0;

    loop {
        let certificates = storage
            .list_certificates(page, EXPORT_PAGE_SIZE, vat_only)
            .await?;
        if certificates.is_empty() {
            break;
        }

        for cert in &certificates {
            writer
                .serialize(CertificateRow::from(cert))
                .context("Failed to write CSV row")?;
            written += 1;
        }
        page += 1;
    }

    writer.flush().context("Failed to flush CSV output")?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStorage;
    use chrono::DateTime;

    fn certificate(subject: &str, vat: Option<&str>) -> Certificate {
        let mut cert = Certificate {
            id: None,
            subject: subject.to_string(),
            issuer: "Test CA, Inc".to_string(),
            not_before: DateTime::from_timestamp(1_500_000_000, 0).unwrap(),
            not_after: DateTime::from_timestamp(1_600_000_000, 0).unwrap(),
            signature_algorithm: "SHA256WITHRSA".to_string(),
            version: 3,
            fingerprint: "ab".repeat(32),
            vat: None,
            vat_searched: false,
        };
        if let Some(vat) = vat {
            cert.record_vat_search(Some(vat.to_string()));
        }
        cert
    }

    #[tokio::test]
    async fn test_export_writes_header_and_rows() {
        let storage = MemoryStorage::new();
        storage.upsert_certificate(&certificate("a.be", Some("BE0666679317"))).await.unwrap();
        storage.upsert_certificate(&certificate("b.be", None)).await.unwrap();

        let mut out = Vec::new();
        let rows = export_certificates(&storage, &mut out, false).await.unwrap();
        assert_eq!(rows, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("id,subject,issuer,not_before"));
        assert!(lines[1].contains("\"Test CA, Inc\""));
        assert!(lines[1].ends_with("BE0666679317,found"));
        assert!(lines[2].ends_with(",not_searched"));
    }

    #[tokio::test]
    async fn test_export_vat_only() {
        let storage = MemoryStorage::new();
        storage.upsert_certificate(&certificate("a.be", None)).await.unwrap();
        storage.upsert_certificate(&certificate("b.be", Some("BE0457741515"))).await.unwrap();

        let mut out = Vec::new();
        let rows = export_certificates(&storage, &mut out, true).await.unwrap();
        assert_eq!(rows, 1);
        assert!(String::from_utf8(out).unwrap().contains("b.be"));
    }
}
