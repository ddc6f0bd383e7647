//! Shared kitty ledgers: lock-free balance merging, rate limiting and expiration.

pub mod config;
pub mod expiry;
pub mod limits;
pub mod memory_store;
pub mod merge;
pub mod name;
pub mod observability;
pub mod service;
pub mod store;
mod store_types;

#[cfg(feature = "server")]
pub mod http;
#[cfg(feature = "store-sqlite")]
pub mod sqlite_store;
#[cfg(feature = "server")]
pub mod telemetry;

use std::sync::atomic::{AtomicU64, Ordering};

pub use config::{ConfigError, HttpConfig, KittyConfig, NamesConfig, StorageConfig};
pub use expiry::{ExpirationSweeper, ExpiryConfig, SweepTrigger};
pub use limits::{LimitsConfig, RateLimitDecision, RateLimiter};
pub use memory_store::MemoryStore;
pub use merge::{ConflictError, Resolution, resolve};
pub use name::{DictionaryNameAllocator, KittyName, NameAllocator, NameListError};
pub use observability::{Observability, ObservabilitySnapshot};
pub use service::{CreatedKitty, KittyLookup, KittyService, KittyUpdate, NewKitty, UpdatedKitty};
pub use store::{LedgerStore, RateLimitCheck, RateLimitStore, StoreError};
pub use store_types::{Balances, KittyRecord, RateLimitAction, RateLimitEntry, StoredKitty};

#[cfg(feature = "server")]
pub use http::KittyHttpState;
#[cfg(feature = "store-sqlite")]
pub use sqlite_store::SqliteStore;

pub trait Clock: Send + Sync {
    fn now_epoch_seconds(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0));
        now.as_secs()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_seconds(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
