use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{KittyError, Result};

use super::expiry::{ExpirationSweeper, SweepTrigger};
use super::limits::{RateLimitDecision, RateLimiter};
use super::merge;
use super::store::{LedgerStore, RateLimitStore, StoreError};
use super::{
    Balances, Clock, KittyConfig, KittyName, KittyRecord, NameAllocator, Observability,
    ObservabilitySnapshot, RateLimitAction, StorageConfig, SystemClock,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewKitty {
    pub balances: Balances,
    pub party_size: u32,
    pub split_ratio: i64,
    pub config: serde_json::Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KittyUpdate {
    pub name: String,
    /// Balances the client last saw.
    pub baseline: Balances,
    /// `last_update` of the state the baseline was taken from.
    pub baseline_timestamp: u64,
    pub target: Balances,
    pub party_size: u32,
    pub split_ratio: i64,
    pub config: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreatedKitty {
    pub name: KittyName,
    pub balances: Balances,
    pub last_update: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdatedKitty {
    pub name: KittyName,
    pub balances: Balances,
    pub last_update: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum KittyLookup {
    Found(KittyRecord),
    NotModified,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Per-request orchestration: validate, rate limit, merge, persist, sweep.
pub struct KittyService {
    ledger: Arc<dyn LedgerStore>,
    rate_limits: Arc<dyn RateLimitStore>,
    names: Arc<dyn NameAllocator>,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    sweeper: ExpirationSweeper,
    storage: StorageConfig,
    max_name_attempts: u32,
    observability: Observability,
}

impl KittyService {
    pub fn new<S>(config: &KittyConfig, store: Arc<S>, names: Arc<dyn NameAllocator>) -> Self
    where
        S: LedgerStore + RateLimitStore + 'static,
    {
        Self::with_stores(config, store.clone(), store, names)
    }

    pub fn with_stores(
        config: &KittyConfig,
        ledger: Arc<dyn LedgerStore>,
        rate_limits: Arc<dyn RateLimitStore>,
        names: Arc<dyn NameAllocator>,
    ) -> Self {
        Self {
            ledger,
            rate_limits,
            names,
            clock: Arc::new(SystemClock),
            limiter: RateLimiter::new(config.limits.clone()),
            sweeper: ExpirationSweeper::new(config.expiry.clone()),
            storage: config.storage.clone(),
            max_name_attempts: config.names.max_attempts.max(1),
            observability: Observability::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn observability(&self) -> ObservabilitySnapshot {
        self.observability.snapshot()
    }

    pub async fn create_kitty(&self, new: NewKitty, client_ip: &str) -> Result<CreatedKitty> {
        validate_party_size(new.party_size)?;
        validate_currencies(&new.balances)?;

        let now = self.clock.now_epoch_seconds();
        self.check_rate_limit(client_ip, RateLimitAction::Create, None, now)
            .await?;

        for _ in 0..self.max_name_attempts {
            let name = self.names.next_name()?;
            let record = KittyRecord {
                name,
                balances: new.balances.clone(),
                party_size: new.party_size,
                split_ratio: new.split_ratio,
                config: new.config.clone(),
                last_update: now,
                last_view: now,
            };

            let insert = self.ledger.insert(&record);
            match self.timed(Access::Write, insert).await {
                Ok(()) => {}
                Err(StoreError::AlreadyExists { name }) => {
                    debug!(kitty = %name, "kitty name taken");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }

            self.observability.record_created();
            info!(kitty = %record.name, party_size = record.party_size, "kitty created");
            self.sweep_after(SweepTrigger::Create, now).await;
            return Ok(CreatedKitty {
                name: record.name,
                balances: record.balances,
                last_update: now,
            });
        }

        Err(KittyError::NameExhausted)
    }

    pub async fn update_kitty(&self, update: KittyUpdate, client_ip: &str) -> Result<UpdatedKitty> {
        let name = KittyName::parse(&update.name)?;
        validate_party_size(update.party_size)?;
        validate_currencies(&update.target)?;

        let now = self.clock.now_epoch_seconds();
        self.check_rate_limit(client_ip, RateLimitAction::Update, Some(&name), now)
            .await?;

        let attempts = self.storage.max_update_retries.saturating_add(1);
        for attempt in 0..attempts {
            let stored = self
                .timed(Access::Read, self.ledger.load(&name))
                .await?
                .ok_or_else(|| KittyError::NotFound {
                    name: name.to_string(),
                })?;

            let resolution = merge::resolve(
                &stored.record,
                &update.baseline,
                &update.target,
                update.baseline_timestamp,
            )?;

            let record = KittyRecord {
                name: name.clone(),
                balances: resolution.balances,
                party_size: update.party_size,
                split_ratio: update.split_ratio,
                config: update.config.clone(),
                last_update: now,
                last_view: now,
            };

            let replaced = self
                .timed(
                    Access::Write,
                    self.ledger.replace_if_revision(&record, stored.revision),
                )
                .await?;
            if replaced {
                self.observability.record_updated(resolution.rebased.len());
                info!(
                    kitty = %name,
                    rebased = resolution.rebased.len(),
                    retries = attempt,
                    "kitty updated"
                );
                self.sweep_after(SweepTrigger::Update, now).await;
                return Ok(UpdatedKitty {
                    name,
                    balances: record.balances,
                    last_update: now,
                });
            }

            self.observability.record_cas_retry();
            debug!(kitty = %name, attempt, "kitty changed during update; retrying");
        }

        Err(KittyError::StorageUnavailable {
            message: format!("kitty {name} changed concurrently on {attempts} attempts"),
        })
    }

    /// Full record, or `NotModified` when `if_not_modified_since` equals the last update.
    pub async fn get_kitty(
        &self,
        name: &str,
        if_not_modified_since: Option<u64>,
    ) -> Result<KittyLookup> {
        let name = KittyName::parse(name)?;
        let not_found = || KittyError::NotFound {
            name: name.to_string(),
        };

        let stored = self
            .timed(Access::Read, self.ledger.load(&name))
            .await?
            .ok_or_else(not_found)?;

        let now = self.clock.now_epoch_seconds();
        if let Some(since) = if_not_modified_since {
            let last_update = stored.record.last_update;
            if since > last_update {
                return Err(KittyError::FutureTimestamp { since, last_update });
            }
            if since == last_update {
                self.observability.record_not_modified();
                self.sweep_after(SweepTrigger::Read, now).await;
                return Ok(KittyLookup::NotModified);
            }
        }

        let touch = self.ledger.touch_view(&name, now);
        if !self.timed(Access::Write, touch).await? {
            return Err(not_found());
        }

        let mut record = stored.record;
        record.last_view = now;
        self.observability.record_read();
        self.sweep_after(SweepTrigger::Read, now).await;
        Ok(KittyLookup::Found(record))
    }

    pub async fn delete_kitty(&self, name: &str) -> Result<()> {
        let name = KittyName::parse(name)?;
        let delete = self.ledger.delete(&name);
        if !self.timed(Access::Write, delete).await? {
            return Err(KittyError::NotFound {
                name: name.to_string(),
            });
        }
        self.observability.record_deleted();
        info!(kitty = %name, "kitty deleted");
        Ok(())
    }

    /// Runs the expiration policy now; unlike triggered sweeps, failures are returned.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let now = self.clock.now_epoch_seconds();
        let deleted = self
            .timed(Access::Write, self.sweeper.sweep(self.ledger.as_ref(), now))
            .await?;
        self.observability.record_swept(deleted);
        Ok(deleted)
    }

    async fn sweep_after(&self, trigger: SweepTrigger, now: u64) {
        if !self.sweeper.runs_after(trigger) {
            return;
        }
        let swept = self
            .timed(Access::Write, self.sweeper.sweep(self.ledger.as_ref(), now))
            .await;
        match swept {
            Ok(deleted) => {
                self.observability.record_swept(deleted);
                debug!(
                    trigger = trigger.as_str(),
                    deleted,
                    "expiration sweep finished"
                );
            }
            Err(err) => {
                self.observability.record_sweep_failure();
                warn!(trigger = trigger.as_str(), error = %err, "expiration sweep failed");
            }
        }
    }

    async fn check_rate_limit(
        &self,
        client_ip: &str,
        action: RateLimitAction,
        kitty_name: Option<&KittyName>,
        now: u64,
    ) -> Result<()> {
        let check = self.limiter.check_and_record(
            self.rate_limits.as_ref(),
            client_ip,
            action,
            kitty_name,
            now,
        );
        match self.timed(Access::Write, check).await? {
            RateLimitDecision::Allowed => Ok(()),
            RateLimitDecision::Denied { retry_after_secs } => {
                self.observability.record_rate_limited();
                info!(ip = client_ip, %action, "rate limit exceeded");
                Err(KittyError::RateLimited { retry_after_secs })
            }
        }
    }

    /// Bounds a storage call. Blocking backends keep running after the deadline, so a
    /// timed-out write is reported as having an unknown outcome.
    async fn timed<T, F>(&self, access: Access, operation: F) -> std::result::Result<T, StoreError>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        let timeout_ms = self.storage.timeout_ms;
        match tokio::time::timeout(self.storage.timeout(), operation).await {
            Ok(result) => result,
            Err(_) if access == Access::Write => {
                warn!(timeout_ms, "storage write timed out; outcome unknown");
                Err(StoreError::WriteTimeout { timeout_ms })
            }
            Err(_) => {
                warn!(timeout_ms, "storage read timed out");
                Err(StoreError::Timeout { timeout_ms })
            }
        }
    }
}

fn validate_party_size(party_size: u32) -> Result<()> {
    if party_size == 0 {
        return Err(KittyError::InvalidRequest {
            reason: "partySize must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn validate_currencies(balances: &Balances) -> Result<()> {
    if balances.keys().any(|currency| currency.trim().is_empty()) {
        return Err(KittyError::InvalidRequest {
            reason: "currency codes must not be empty".to_string(),
        });
    }
    Ok(())
}
