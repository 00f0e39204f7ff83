//! Per-sync outcome reports and a bounded history of them

use std::collections::{BTreeMap, VecDeque};

use crate::api::Timestamp;
use crate::store::InsertMetrics;

/// What one `sync` did.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Address we dialed, as `location[/sublocation]:port`
    pub peer: String,
    pub node_id: String,
    pub address_type: u8,
    pub started_at: Timestamp,
    pub duration_ms: u64,
    /// Entities and addresses received, by endpoint
    pub received: BTreeMap<String, usize>,
    pub written: usize,
    pub rejected: usize,
    pub purgatory_admitted: usize,
    pub purgatory_dropped: usize,
    /// Checkpoints after the sync
    pub checkpoints: BTreeMap<String, Timestamp>,
    /// Endpoint-level failures the sync carried on past
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn record_insert(&mut self, metrics: &InsertMetrics) {
        self.written += metrics.total_written() + metrics.addresses_added;
    }

    pub fn record_received(&mut self, endpoint: &str, count: usize) {
        *self.received.entry(endpoint.to_string()).or_default() += count;
    }

    pub fn total_received(&self) -> usize {
        self.received.values().sum()
    }
}

/// Most recent reports, oldest evicted first.
#[derive(Debug, Clone)]
pub struct ReportHistory {
    reports: VecDeque<SyncReport>,
    max_reports: usize,
}

impl ReportHistory {
    pub fn new(max_reports: usize) -> Self {
        Self {
            reports: VecDeque::with_capacity(max_reports),
            max_reports,
        }
    }

    pub fn record(&mut self, report: SyncReport) {
        self.reports.push_back(report);
        while self.reports.len() > self.max_reports {
            self.reports.pop_front();
        }
    }

    /// Newest first.
    pub fn recent(&self, n: usize) -> Vec<SyncReport> {
        self.reports.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

impl Default for ReportHistory {
    fn default() -> Self {
        Self::new(100)
    }
}
