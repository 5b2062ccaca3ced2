// src/stats.rs
//! Pipeline counters shared by every stage

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Default)]
struct Counters {
    entries_fetched: AtomicU64,
    certificates_saved: AtomicU64,
    entries_skipped: AtomicU64,
    entries_malformed: AtomicU64,
    vat_found: AtomicU64,
    vat_not_found: AtomicU64,
}

/// Thread-safe statistics collector
#[derive(Clone)]
pub struct StatsCollector {
    counters: Arc<Counters>,
    start_time: Instant,
}

/// Snapshot of statistics at a point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub entries_fetched: u64,
    pub certificates_saved: u64,
    pub entries_skipped: u64,
    pub entries_malformed: u64,
    pub vat_found: u64,
    pub vat_not_found: u64,
    pub entries_per_minute: f64,
    pub uptime_secs: u64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            start_time: Instant::now(),
        }
    }

    pub fn add_fetched(&self, count: u64) {
        self.counters.entries_fetched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_saved(&self) {
        self.counters.certificates_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_skipped(&self) {
        self.counters.entries_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_malformed(&self) {
        self.counters.entries_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_vat(&self, found: bool) {
        let counter = if found {
            &self.counters.vat_found
        } else {
            &self.counters.vat_not_found
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.start_time.elapsed();
        let c = &self.counters;
        let fetched = c.entries_fetched.load(Ordering::Relaxed);

        let rate = if elapsed.as_secs() > 0 {
            (fetched as f64 / elapsed.as_secs() as f64) * 60.0
        } else {
            0.0
        };

        StatsSnapshot {
            entries_fetched: fetched,
            certificates_saved: c.certificates_saved.load(Ordering::Relaxed),
            entries_skipped: c.entries_skipped.load(Ordering::Relaxed),
            entries_malformed: c.entries_malformed.load(Ordering::Relaxed),
            vat_found: c.vat_found.load(Ordering::Relaxed),
            vat_not_found: c.vat_not_found.load(Ordering::Relaxed),
            entries_per_minute: rate,
            uptime_secs: elapsed.as_secs(),
        }
    }

    /// One-line human-readable summary
    pub fn format_stats(&self) -> String {
        let s = self.snapshot();
        format!(
            "{} fetched | {} saved | {} skipped | {} malformed | VAT {}/{} | {:.1} entries/min | uptime: {}",
            s.entries_fetched,
            s.certificates_saved,
            s.entries_skipped,
            s.entries_malformed,
            s.vat_found,
            s.vat_found + s.vat_not_found,
            s.entries_per_minute,
            Self::format_uptime(s.uptime_secs)
        )
    }

    pub fn format_uptime(secs: u64) -> String {
        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_collector_new() {
        let snapshot = StatsCollector::new().snapshot();
        assert_eq!(snapshot.entries_fetched, 0);
        assert_eq!(snapshot.certificates_saved, 0);
    }

    #[test]
    fn test_counters() {
        let stats = StatsCollector::new();

        stats.add_fetched(1000);
        stats.increment_saved();
        stats.increment_skipped();
        stats.increment_skipped();
        stats.increment_malformed();
        stats.record_vat(true);
        stats.record_vat(false);
        stats.record_vat(false);

        let s = stats.snapshot();
        assert_eq!(s.entries_fetched, 1000);
        assert_eq!(s.certificates_saved, 1);
        assert_eq!(s.entries_skipped, 2);
        assert_eq!(s.entries_malformed, 1);
        assert_eq!(s.vat_found, 1);
        assert_eq!(s.vat_not_found, 2);
    }

    #[test]
    fn test_clone_shares_state() {
        let stats1 = StatsCollector::new();
        let stats2 = stats1.clone();

        stats1.increment_saved();
        stats2.increment_saved();

        assert_eq!(stats1.snapshot().certificates_saved, 2);
        assert_eq!(stats2.snapshot().certificates_saved, 2);
    }

    #[test]
    fn test_format_stats() {
        let stats = StatsCollector::new();
        stats.add_fetched(10);
        stats.record_vat(true);
        let line = stats.format_stats();
        assert!(line.starts_with("10 fetched | 0 saved"));
        assert!(line.contains("VAT 1/1"));
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(StatsCollector::format_uptime(30), "30s");
        assert_eq!(StatsCollector::format_uptime(90), "1m 30s");
        assert_eq!(StatsCollector::format_uptime(3661), "1h 1m 1s");
    }
}
