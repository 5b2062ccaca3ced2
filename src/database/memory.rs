// src/database/memory.rs
//! Process-local storage backend
//!
//! Nothing survives a restart. Used by the test-suite and for dry runs
//! where no PostgreSQL instance is configured.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{SliceOrder, Storage};
use crate::report::VatSummary;
use crate::types::{Certificate, LogServer, Slice, VatStatus};

#[derive(Default)]
struct Tables {
    next_id: i64,
    servers: BTreeMap<i64, LogServer>,
    slices: BTreeMap<i64, Slice>,
    certificates: BTreeMap<i64, Certificate>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn count_by<F>(&self, key: F) -> Vec<(String, u64)>
    where
        F: Fn(&Certificate) -> String,
    {
        let tables = self.tables.lock().unwrap();
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for cert in tables.certificates.values() {
            *counts.entry(key(cert)).or_default() += 1;
        }
        counts.into_iter().collect()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upsert_server(&self, server: &LogServer) -> Result<LogServer> {
        let mut tables = self.tables.lock().unwrap();
        let mut saved = server.clone();
        let id = match saved.id {
            Some(id) => id,
            None => tables.allocate_id(),
        };
        saved.id = Some(id);
        tables.servers.insert(id, saved.clone());
        Ok(saved)
    }

    async fn find_server(&self, id: i64) -> Result<Option<LogServer>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.servers.get(&id).cloned())
    }

    async fn find_server_by_url(&self, url: &str) -> Result<Option<LogServer>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.servers.values().find(|s| s.url == url).cloned())
    }

    async fn list_servers(&self) -> Result<Vec<LogServer>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.servers.values().cloned().collect())
    }

    async fn upsert_slice(&self, slice: &Slice) -> Result<Slice> {
        let mut tables = self.tables.lock().unwrap();
        let mut saved = slice.clone();
        let id = match saved.id {
            Some(id) => id,
            None => tables.allocate_id(),
        };
        saved.id = Some(id);
        tables.slices.insert(id, saved.clone());
        Ok(saved)
    }

    async fn list_slices_by_server(&self, server_id: i64, order: SliceOrder) -> Result<Vec<Slice>> {
        let tables = self.tables.lock().unwrap();
        let mut slices: Vec<Slice> = tables
            .slices
            .values()
            .filter(|s| s.server_id == server_id)
            .cloned()
            .collect();

        match order {
            SliceOrder::StartAsc => slices.sort_by_key(|s| s.start),
            SliceOrder::EndDesc => slices.sort_by(|a, b| b.end.cmp(&a.end)),
        }

        Ok(slices)
    }

    async fn delete_slice(&self, id: i64) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.slices.remove(&id);
        Ok(())
    }

    async fn slice_exists(&self, id: i64) -> Result<bool> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.slices.contains_key(&id))
    }

    async fn upsert_certificate(&self, certificate: &Certificate) -> Result<Certificate> {
        let mut tables = self.tables.lock().unwrap();
        let mut saved = certificate.clone();
        let id = match saved.id {
            Some(id) => id,
            None => tables.allocate_id(),
        };
        saved.id = Some(id);
        tables.certificates.insert(id, saved.clone());
        Ok(saved)
    }

    async fn list_certificates_not_vat_searched(&self) -> Result<Vec<Certificate>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .certificates
            .values()
            .filter(|c| !c.vat_searched)
            .cloned()
            .collect())
    }

    async fn list_certificates(&self, page: u64, size: u64, vat_only: bool) -> Result<Vec<Certificate>> {
        let tables = self.tables.lock().unwrap();
        let total = tables.certificates.len() as u64;
        if total < page.saturating_mul(size) {
            return Ok(Vec::new());
        }

        Ok(tables
            .certificates
            .values()
            .filter(|c| !vat_only || c.vat.is_some())
            .skip((page * size) as usize)
            .take(size as usize)
            .cloned()
            .collect())
    }

    async fn count_certificates(&self) -> Result<u64> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.certificates.len() as u64)
    }

    async fn count_by_issuer(&self) -> Result<Vec<(String, u64)>> {
        Ok(self.count_by(|c| c.issuer.clone()))
    }

    async fn count_by_algorithm(&self) -> Result<Vec<(String, u64)>> {
        Ok(self.count_by(|c| c.signature_algorithm.clone()))
    }

    async fn vat_summary(&self) -> Result<VatSummary> {
        let tables = self.tables.lock().unwrap();
        let mut summary = VatSummary::default();
        for cert in tables.certificates.values() {
            match cert.vat_status() {
                VatStatus::Found => summary.found += 1,
                VatStatus::NotFound => summary.not_found += 1,
                VatStatus::NotSearched => summary.not_searched += 1,
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn certificate(subject: &str, issuer: &str) -> Certificate {
        Certificate {
            id: None,
            subject: subject.to_string(),
            issuer: issuer.to_string(),
            not_before: DateTime::from_timestamp(0, 0).unwrap(),
            not_after: DateTime::from_timestamp(0, 0).unwrap(),
            signature_algorithm: "SHA256WITHRSA".to_string(),
            version: 3,
            fingerprint: String::new(),
            vat: None,
            vat_searched: false,
        }
    }

    #[tokio::test]
    async fn test_slice_ordering() {
        let storage = MemoryStorage::new();
        storage.upsert_slice(&Slice::new(1, 1000, 1999)).await.unwrap();
        storage.upsert_slice(&Slice::new(1, 0, 999)).await.unwrap();
        storage.upsert_slice(&Slice::new(2, 0, 10)).await.unwrap();

        let asc = storage.list_slices_by_server(1, SliceOrder::StartAsc).await.unwrap();
        assert_eq!(asc.iter().map(|s| s.start).collect::<Vec<_>>(), vec![0, 1000]);

        let desc = storage.list_slices_by_server(1, SliceOrder::EndDesc).await.unwrap();
        assert_eq!(desc[0].end, 1999);
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_row() {
        let storage = MemoryStorage::new();
        let mut slice = storage.upsert_slice(&Slice::new(1, 0, 999)).await.unwrap();
        slice.advance_to(500);
        storage.upsert_slice(&slice).await.unwrap();

        let slices = storage.list_slices_by_server(1, SliceOrder::StartAsc).await.unwrap();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].next, 500);
    }

    #[tokio::test]
    async fn test_delete_slice() {
        let storage = MemoryStorage::new();
        let slice = storage.upsert_slice(&Slice::new(1, 0, 999)).await.unwrap();
        let id = slice.id.unwrap();

        assert!(storage.slice_exists(id).await.unwrap());
        storage.delete_slice(id).await.unwrap();
        assert!(!storage.slice_exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_certificate_queries() {
        let storage = MemoryStorage::new();
        let mut found = storage.upsert_certificate(&certificate("a.be", "CA 1")).await.unwrap();
        found.record_vat_search(Some("BE0666679317".to_string()));
        storage.upsert_certificate(&found).await.unwrap();

        let mut missing = storage.upsert_certificate(&certificate("b.be", "CA 1")).await.unwrap();
        missing.record_vat_search(None);
        storage.upsert_certificate(&missing).await.unwrap();

        storage.upsert_certificate(&certificate("c.be", "CA 2")).await.unwrap();

        let pending = storage.list_certificates_not_vat_searched().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].subject, "c.be");

        let summary = storage.vat_summary().await.unwrap();
        assert_eq!((summary.found, summary.not_found, summary.not_searched), (1, 1, 1));

        let issuers = storage.count_by_issuer().await.unwrap();
        assert_eq!(issuers, vec![("CA 1".to_string(), 2), ("CA 2".to_string(), 1)]);

        let with_vat = storage.list_certificates(0, 10, true).await.unwrap();
        assert_eq!(with_vat.len(), 1);
        assert_eq!(with_vat[0].subject, "a.be");

        assert!(storage.list_certificates(5, 10, false).await.unwrap().is_empty());
    }
}
