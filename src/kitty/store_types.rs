use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::KittyName;

/// Signed amount per currency code.
pub type Balances = BTreeMap<String, i64>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KittyRecord {
    pub name: KittyName,
    pub balances: Balances,
    pub party_size: u32,
    pub split_ratio: i64,
    /// Client-owned settings, stored and returned verbatim.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Epoch seconds (UTC) of the last successful mutation.
    pub last_update: u64,
    /// Epoch seconds (UTC) of the last successful full read.
    pub last_view: u64,
}

/// A record as held by a store, with the revision used for compare-and-swap.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredKitty {
    pub record: KittyRecord,
    pub revision: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAction {
    Create,
    Update,
}

impl RateLimitAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

impl fmt::Display for RateLimitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One counted action. Entries without a kitty name (creates) never supersede each other.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub ip: String,
    pub action: RateLimitAction,
    pub kitty_name: Option<KittyName>,
    pub ts: u64,
}
