use async_trait::async_trait;
use thiserror::Error;

use crate::KittyError;

use super::{KittyName, KittyRecord, RateLimitAction, StoredKitty};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("kitty already exists: {name}")]
    AlreadyExists { name: String },
    #[error("storage read timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    /// The write may still commit after the caller gave up.
    #[error("storage write timed out after {timeout_ms}ms; outcome unknown")]
    WriteTimeout { timeout_ms: u64 },
    #[cfg(feature = "store-sqlite")]
    #[error("sqlite join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[cfg(feature = "store-sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt row: {reason}")]
    Corrupt { reason: String },
}

impl From<StoreError> for KittyError {
    fn from(err: StoreError) -> Self {
        KittyError::StorageUnavailable {
            message: err.to_string(),
        }
    }
}

/// Persistence for kitty records keyed by name.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load(&self, name: &KittyName) -> Result<Option<StoredKitty>, StoreError>;

    /// Inserts a new record at revision 0; fails with `AlreadyExists` if the name is taken.
    async fn insert(&self, record: &KittyRecord) -> Result<(), StoreError>;

    /// Replaces the stored record only if its revision still equals `expected_revision`.
    /// Returns `false` when the record changed or vanished in the meantime.
    async fn replace_if_revision(
        &self,
        record: &KittyRecord,
        expected_revision: u64,
    ) -> Result<bool, StoreError>;

    /// Sets `last_view`; returns `false` if the record does not exist.
    async fn touch_view(&self, name: &KittyName, now: u64) -> Result<bool, StoreError>;

    async fn delete(&self, name: &KittyName) -> Result<bool, StoreError>;

    /// Deletes every record with `last_update < update_cutoff` and `last_view < view_cutoff`.
    async fn delete_inactive(
        &self,
        update_cutoff: u64,
        view_cutoff: u64,
    ) -> Result<u64, StoreError>;
}

#[derive(Clone, Copy, Debug)]
pub struct RateLimitCheck<'a> {
    pub ip: &'a str,
    pub action: RateLimitAction,
    pub kitty_name: Option<&'a KittyName>,
    pub now: u64,
    /// Entries with `ts < window_start` are expired before counting.
    pub window_start: u64,
    pub limit: u32,
}

/// Shared sliding-window counters.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Expires old entries, counts `(ip, action)` entries not for `kitty_name`, and
    /// records the action if the count is below `limit`. Must be atomic per `(ip, action)`.
    async fn check_and_record(&self, check: &RateLimitCheck<'_>) -> Result<bool, StoreError>;
}
