use serde::{Deserialize, Serialize};

use super::store::{RateLimitCheck, RateLimitStore, StoreError};
use super::{KittyName, RateLimitAction};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub window_secs: u64,
    /// Creates allowed per IP per window; 0 disables the limit.
    pub create_limit: u32,
    /// Updates allowed per IP per window, not counting repeat edits of one kitty; 0 disables.
    pub update_limit: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            window_secs: 60 * 60,
            create_limit: 10,
            update_limit: 60,
        }
    }
}

impl LimitsConfig {
    pub fn disabled() -> Self {
        Self {
            window_secs: 0,
            create_limit: 0,
            update_limit: 0,
        }
    }

    pub fn limit_for(&self, action: RateLimitAction) -> u32 {
        match action {
            RateLimitAction::Create => self.create_limit,
            RateLimitAction::Update => self.update_limit,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Denied { retry_after_secs: u64 },
}

#[derive(Clone, Debug, Default)]
pub struct RateLimiter {
    config: LimitsConfig,
}

impl RateLimiter {
    pub fn new(config: LimitsConfig) -> Self {
        Self { config }
    }

    pub async fn check_and_record(
        &self,
        store: &dyn RateLimitStore,
        ip: &str,
        action: RateLimitAction,
        kitty_name: Option<&KittyName>,
        now: u64,
    ) -> Result<RateLimitDecision, StoreError> {
        let limit = self.config.limit_for(action);
        if limit == 0 {
            return Ok(RateLimitDecision::Allowed);
        }

        let check = RateLimitCheck {
            ip,
            action,
            kitty_name,
            now,
            window_start: now.saturating_sub(self.config.window_secs),
            limit,
        };
        if store.check_and_record(&check).await? {
            Ok(RateLimitDecision::Allowed)
        } else {
            Ok(RateLimitDecision::Denied {
                retry_after_secs: self.config.window_secs,
            })
        }
    }
}
