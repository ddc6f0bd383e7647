use serde::{Deserialize, Serialize};

use super::store::{LedgerStore, StoreError};

const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    pub update_ttl_secs: u64,
    pub view_ttl_secs: u64,
    pub sweep_after_create: bool,
    pub sweep_after_update: bool,
    pub sweep_after_read: bool,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            update_ttl_secs: 90 * DAY_SECS,
            view_ttl_secs: 30 * DAY_SECS,
            sweep_after_create: true,
            sweep_after_update: false,
            sweep_after_read: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepTrigger {
    Create,
    Update,
    Read,
}

impl SweepTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Read => "read",
        }
    }
}

/// Deletes kitties that have been neither updated nor viewed recently.
#[derive(Clone, Debug, Default)]
pub struct ExpirationSweeper {
    config: ExpiryConfig,
}

impl ExpirationSweeper {
    pub fn new(config: ExpiryConfig) -> Self {
        Self { config }
    }

    pub fn runs_after(&self, trigger: SweepTrigger) -> bool {
        match trigger {
            SweepTrigger::Create => self.config.sweep_after_create,
            SweepTrigger::Update => self.config.sweep_after_update,
            SweepTrigger::Read => self.config.sweep_after_read,
        }
    }

    /// `(update_cutoff, view_cutoff)`: a record is expired when both timestamps are older.
    pub fn cutoffs(&self, now: u64) -> (u64, u64) {
        (
            now.saturating_sub(self.config.update_ttl_secs),
            now.saturating_sub(self.config.view_ttl_secs),
        )
    }

    pub async fn sweep(&self, store: &dyn LedgerStore, now: u64) -> Result<u64, StoreError> {
        let (update_cutoff, view_cutoff) = self.cutoffs(now);
        store.delete_inactive(update_cutoff, view_cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kitty::{Balances, KittyName, KittyRecord, MemoryStore};

    fn record(name: &str, last_update: u64, last_view: u64) -> KittyRecord {
        KittyRecord {
            name: KittyName::parse(name).expect("name"),
            balances: Balances::new(),
            party_size: 1,
            split_ratio: 1,
            config: serde_json::Value::Null,
            last_update,
            last_view,
        }
    }

    fn sweeper() -> ExpirationSweeper {
        ExpirationSweeper::new(ExpiryConfig {
            update_ttl_secs: 100,
            view_ttl_secs: 50,
            ..ExpiryConfig::default()
        })
    }

    #[tokio::test]
    async fn only_records_stale_by_both_thresholds_are_deleted() {
        let store = MemoryStore::new();
        let now = 1_000;
        let kitties = [
            record("stale-stale", 800, 900),
            record("stale-viewed", 800, 990),
            record("fresh-unseen", 950, 900),
        ];
        for kitty in &kitties {
            store.insert(kitty).await.expect("insert");
        }

        let deleted = sweeper().sweep(&store, now).await.expect("sweep");
        assert_eq!(deleted, 1);
        let [stale, viewed, fresh] = &kitties;
        assert!(store.load(&stale.name).await.expect("load").is_none());
        assert!(store.load(&viewed.name).await.expect("load").is_some());
        assert!(store.load(&fresh.name).await.expect("load").is_some());
    }

    #[tokio::test]
    async fn second_sweep_without_activity_deletes_nothing() {
        let store = MemoryStore::new();
        let old = record("old-kitty", 1, 1);
        store.insert(&old).await.expect("insert");
        let sweeper = sweeper();
        assert_eq!(sweeper.sweep(&store, 1_000).await.expect("sweep"), 1);
        assert_eq!(sweeper.sweep(&store, 1_000).await.expect("sweep"), 0);
    }

    #[test]
    fn cutoffs_saturate_near_epoch() {
        assert_eq!(sweeper().cutoffs(10), (0, 0));
        assert_eq!(sweeper().cutoffs(1_000), (900, 950));
    }

    #[test]
    fn triggers_follow_config() {
        let sweeper = ExpirationSweeper::default();
        assert!(sweeper.runs_after(SweepTrigger::Create));
        assert!(!sweeper.runs_after(SweepTrigger::Update));
        assert!(!sweeper.runs_after(SweepTrigger::Read));
    }
}
