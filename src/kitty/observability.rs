use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilitySnapshot {
    pub created: u64,
    pub updated: u64,
    pub reads: u64,
    pub not_modified: u64,
    pub deleted: u64,
    pub rate_limited: u64,
    pub rebased_currencies: u64,
    pub cas_retries: u64,
    pub swept: u64,
    pub sweep_failures: u64,
}

#[derive(Debug, Default)]
pub struct Observability {
    created: AtomicU64,
    updated: AtomicU64,
    reads: AtomicU64,
    not_modified: AtomicU64,
    deleted: AtomicU64,
    rate_limited: AtomicU64,
    rebased_currencies: AtomicU64,
    cas_retries: AtomicU64,
    swept: AtomicU64,
    sweep_failures: AtomicU64,
}

impl Observability {
    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_updated(&self, rebased_currencies: usize) {
        self.updated.fetch_add(1, Ordering::Relaxed);
        self.rebased_currencies
            .fetch_add(rebased_currencies as u64, Ordering::Relaxed);
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_modified(&self) {
        self.not_modified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cas_retry(&self) {
        self.cas_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swept(&self, deleted: u64) {
        self.swept.fetch_add(deleted, Ordering::Relaxed);
    }

    pub fn record_sweep_failure(&self) {
        self.sweep_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            created: self.created.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            not_modified: self.not_modified.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            rebased_currencies: self.rebased_currencies.load(Ordering::Relaxed),
            cas_retries: self.cas_retries.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
            sweep_failures: self.sweep_failures.load(Ordering::Relaxed),
        }
    }
}
