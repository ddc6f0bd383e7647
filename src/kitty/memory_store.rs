use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::store::{LedgerStore, RateLimitCheck, RateLimitStore, StoreError};
use super::{KittyName, KittyRecord, RateLimitEntry, StoredKitty};

/// Process-local store. Each table sits behind its own lock, which makes
/// compare-and-swap and rate-limit check-and-record atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    kitties: Mutex<HashMap<KittyName, StoredKitty>>,
    rate_limits: Mutex<Vec<RateLimitEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.kitties.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.kitties.lock().await.is_empty()
    }

    pub async fn rate_limit_entries(&self) -> Vec<RateLimitEntry> {
        self.rate_limits.lock().await.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load(&self, name: &KittyName) -> Result<Option<StoredKitty>, StoreError> {
        Ok(self.kitties.lock().await.get(name).cloned())
    }

    async fn insert(&self, record: &KittyRecord) -> Result<(), StoreError> {
        let mut kitties = self.kitties.lock().await;
        if kitties.contains_key(&record.name) {
            return Err(StoreError::AlreadyExists {
                name: record.name.to_string(),
            });
        }
        kitties.insert(
            record.name.clone(),
            StoredKitty {
                record: record.clone(),
                revision: 0,
            },
        );
        Ok(())
    }

    async fn replace_if_revision(
        &self,
        record: &KittyRecord,
        expected_revision: u64,
    ) -> Result<bool, StoreError> {
        let mut kitties = self.kitties.lock().await;
        let Some(stored) = kitties.get_mut(&record.name) else {
            return Ok(false);
        };
        if stored.revision != expected_revision {
            return Ok(false);
        }
        stored.record = record.clone();
        stored.revision = expected_revision.wrapping_add(1);
        Ok(true)
    }

    async fn touch_view(&self, name: &KittyName, now: u64) -> Result<bool, StoreError> {
        let mut kitties = self.kitties.lock().await;
        let Some(stored) = kitties.get_mut(name) else {
            return Ok(false);
        };
        stored.record.last_view = now;
        Ok(true)
    }

    async fn delete(&self, name: &KittyName) -> Result<bool, StoreError> {
        Ok(self.kitties.lock().await.remove(name).is_some())
    }

    async fn delete_inactive(
        &self,
        update_cutoff: u64,
        view_cutoff: u64,
    ) -> Result<u64, StoreError> {
        let mut kitties = self.kitties.lock().await;
        let before = kitties.len();
        kitties.retain(|_, stored| {
            stored.record.last_update >= update_cutoff || stored.record.last_view >= view_cutoff
        });
        Ok((before - kitties.len()) as u64)
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn check_and_record(&self, check: &RateLimitCheck<'_>) -> Result<bool, StoreError> {
        let mut entries = self.rate_limits.lock().await;
        entries.retain(|entry| entry.ts >= check.window_start);

        let counted = entries
            .iter()
            .filter(|entry| entry.ip == check.ip && entry.action == check.action)
            .filter(|entry| !same_kitty(entry, check.kitty_name))
            .count();
        if counted >= check.limit as usize {
            return Ok(false);
        }

        let existing = check.kitty_name.and_then(|name| {
            entries.iter_mut().find(|entry| {
                entry.ip == check.ip
                    && entry.action == check.action
                    && entry.kitty_name.as_ref() == Some(name)
            })
        });
        match existing {
            Some(entry) => entry.ts = check.now,
            None => entries.push(RateLimitEntry {
                ip: check.ip.to_string(),
                action: check.action,
                kitty_name: check.kitty_name.cloned(),
                ts: check.now,
            }),
        }
        Ok(true)
    }
}

/// Nameless entries never match, like SQL NULLs.
fn same_kitty(entry: &RateLimitEntry, requested: Option<&KittyName>) -> bool {
    matches!((&entry.kitty_name, requested), (Some(a), Some(b)) if a == b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kitty::{Balances, RateLimitAction};

    fn record(name: &str) -> KittyRecord {
        KittyRecord {
            name: KittyName::parse(name).expect("name"),
            balances: Balances::from([("USD".to_string(), 5)]),
            party_size: 3,
            split_ratio: 1,
            config: serde_json::json!({"theme": "dark"}),
            last_update: 10,
            last_view: 10,
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_names() {
        let store = MemoryStore::new();
        store.insert(&record("happy-otter")).await.expect("insert");
        let err = store.insert(&record("happy-otter")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn replace_requires_matching_revision() {
        let store = MemoryStore::new();
        let mut kitty = record("happy-otter");
        store.insert(&kitty).await.expect("insert");

        kitty.balances.insert("USD".to_string(), 7);
        assert!(store.replace_if_revision(&kitty, 0).await.expect("cas"));
        assert!(
            !store
                .replace_if_revision(&kitty, 0)
                .await
                .expect("stale cas")
        );

        let stored = store
            .load(&kitty.name)
            .await
            .expect("load")
            .expect("present");
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.record.balances["USD"], 7);
    }

    #[tokio::test]
    async fn replace_of_missing_record_reports_false() {
        let store = MemoryStore::new();
        let swapped = store.replace_if_revision(&record("happy-otter"), 0).await;
        assert!(!swapped.expect("cas"));
    }

    #[tokio::test]
    async fn touch_view_updates_only_last_view() {
        let store = MemoryStore::new();
        let kitty = record("happy-otter");
        store.insert(&kitty).await.expect("insert");
        assert!(store.touch_view(&kitty.name, 99).await.expect("touch"));
        let stored = store
            .load(&kitty.name)
            .await
            .expect("load")
            .expect("present");
        assert_eq!(stored.record.last_view, 99);
        assert_eq!(stored.record.last_update, 10);
        assert_eq!(stored.revision, 0);

        let missing = KittyName::parse("sleepy-walrus").expect("name");
        assert!(!store.touch_view(&missing, 99).await.expect("touch"));
    }

    #[tokio::test]
    async fn update_entries_are_refreshed_not_duplicated() {
        let store = MemoryStore::new();
        let kitty = KittyName::parse("happy-otter").expect("name");
        for now in [1, 2, 3] {
            let check = RateLimitCheck {
                ip: "a",
                action: RateLimitAction::Update,
                kitty_name: Some(&kitty),
                now,
                window_start: 0,
                limit: 5,
            };
            assert!(store.check_and_record(&check).await.expect("check"));
        }
        let entries = store.rate_limit_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ts, 3);
    }

    #[tokio::test]
    async fn concurrent_checks_at_the_boundary_admit_one() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let check = RateLimitCheck {
                    ip: "a",
                    action: RateLimitAction::Create,
                    kitty_name: None,
                    now: 5,
                    window_start: 0,
                    limit: 1,
                };
                store.check_and_record(&check).await.expect("check")
            }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await.expect("join") {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 1);
    }
}
