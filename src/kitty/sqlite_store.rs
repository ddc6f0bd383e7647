use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::OptionalExtension;

use super::store::{LedgerStore, RateLimitCheck, RateLimitStore, StoreError};
use super::{Balances, KittyName, KittyRecord, RateLimitAction, RateLimitEntry, StoredKitty};

#[derive(Clone, Debug)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            Ok(())
        })
        .await?
    }

    pub async fn list_rate_limit_entries(&self) -> Result<Vec<RateLimitEntry>, StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<RateLimitEntry>, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let mut stmt = conn.prepare(
                "SELECT ip, action, kitty_name, ts
                 FROM rate_limits ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (ip, action, kitty_name, ts) = row?;
                let action = RateLimitAction::parse(&action).ok_or_else(|| StoreError::Corrupt {
                    reason: format!("unknown rate limit action {action:?}"),
                })?;
                let kitty_name = kitty_name.map(|name| parse_stored_name(&name)).transpose()?;
                out.push(RateLimitEntry {
                    ip,
                    action,
                    kitty_name,
                    ts: i64_to_u64(ts),
                });
            }
            Ok(out)
        })
        .await?
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn load(&self, name: &KittyName) -> Result<Option<StoredKitty>, StoreError> {
        let path = self.path.clone();
        let name = name.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<StoredKitty>, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let row = conn
                .query_row(
                    "SELECT balances_json, party_size, split_ratio, config_json,
                            last_update, last_view, revision
                     FROM kitties WHERE name = ?1",
                    rusqlite::params![name.as_str()],
                    |row| {
                        Ok(LoadedRow {
                            balances_json: row.get(0)?,
                            party_size: row.get(1)?,
                            split_ratio: row.get(2)?,
                            config_json: row.get(3)?,
                            last_update: row.get(4)?,
                            last_view: row.get(5)?,
                            revision: row.get(6)?,
                        })
                    },
                )
                .optional()?;

            match row {
                Some(row) => row.decode(name).map(Some),
                None => Ok(None),
            }
        })
        .await?
    }

    async fn insert(&self, record: &KittyRecord) -> Result<(), StoreError> {
        let path = self.path.clone();
        let row = KittyRow::encode(record)?;

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let inserted = conn.execute(
                "INSERT OR IGNORE INTO kitties
                    (name, balances_json, party_size, split_ratio, config_json,
                     last_update, last_view, revision)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
                rusqlite::params![
                    row.name,
                    row.balances_json,
                    row.party_size,
                    row.split_ratio,
                    row.config_json,
                    row.last_update,
                    row.last_view,
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::AlreadyExists { name: row.name });
            }
            Ok(())
        })
        .await?
    }

    async fn replace_if_revision(
        &self,
        record: &KittyRecord,
        expected_revision: u64,
    ) -> Result<bool, StoreError> {
        let path = self.path.clone();
        let row = KittyRow::encode(record)?;
        let expected = u64_to_i64(expected_revision);

        tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let updated = conn.execute(
                "UPDATE kitties
                 SET balances_json = ?2,
                     party_size = ?3,
                     split_ratio = ?4,
                     config_json = ?5,
                     last_update = ?6,
                     last_view = ?7,
                     revision = revision + 1
                 WHERE name = ?1 AND revision = ?8",
                rusqlite::params![
                    row.name,
                    row.balances_json,
                    row.party_size,
                    row.split_ratio,
                    row.config_json,
                    row.last_update,
                    row.last_view,
                    expected,
                ],
            )?;
            Ok(updated == 1)
        })
        .await?
    }

    async fn touch_view(&self, name: &KittyName, now: u64) -> Result<bool, StoreError> {
        let path = self.path.clone();
        let name = name.to_string();
        let now = u64_to_i64(now);

        tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let updated = conn.execute(
                "UPDATE kitties SET last_view = ?2 WHERE name = ?1",
                rusqlite::params![name, now],
            )?;
            Ok(updated == 1)
        })
        .await?
    }

    async fn delete(&self, name: &KittyName) -> Result<bool, StoreError> {
        let path = self.path.clone();
        let name = name.to_string();

        tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let deleted = conn.execute(
                "DELETE FROM kitties WHERE name = ?1",
                rusqlite::params![name],
            )?;
            Ok(deleted == 1)
        })
        .await?
    }

    async fn delete_inactive(
        &self,
        update_cutoff: u64,
        view_cutoff: u64,
    ) -> Result<u64, StoreError> {
        let path = self.path.clone();
        let update_cutoff = u64_to_i64(update_cutoff);
        let view_cutoff = u64_to_i64(view_cutoff);

        tokio::task::spawn_blocking(move || -> Result<u64, StoreError> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            let deleted = conn.execute(
                "DELETE FROM kitties WHERE last_update < ?1 AND last_view < ?2",
                rusqlite::params![update_cutoff, view_cutoff],
            )?;
            Ok(deleted as u64)
        })
        .await?
    }
}

#[async_trait]
impl RateLimitStore for SqliteStore {
    async fn check_and_record(&self, check: &RateLimitCheck<'_>) -> Result<bool, StoreError> {
        let path = self.path.clone();
        let ip = check.ip.to_string();
        let action = check.action.as_str();
        let kitty_name = check.kitty_name.map(|name| name.to_string());
        let now = u64_to_i64(check.now);
        let window_start = u64_to_i64(check.window_start);
        let limit = i64::from(check.limit);

        tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            // IMMEDIATE takes the write lock up front so concurrent checks serialize.
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

            tx.execute(
                "DELETE FROM rate_limits WHERE ts < ?1",
                rusqlite::params![window_start],
            )?;

            // Nameless create entries are always counted, matching the in-memory store.
            let counted: i64 = tx.query_row(
                "SELECT COUNT(*) FROM rate_limits
                 WHERE ip = ?1 AND action = ?2 AND (kitty_name IS NULL OR kitty_name IS NOT ?3)",
                rusqlite::params![ip, action, kitty_name],
                |row| row.get(0),
            )?;
            if counted >= limit {
                return Ok(false);
            }

            let refreshed = match kitty_name.as_deref() {
                Some(name) => tx.execute(
                    "UPDATE rate_limits SET ts = ?4
                     WHERE ip = ?1 AND action = ?2 AND kitty_name = ?3",
                    rusqlite::params![ip, action, name, now],
                )?,
                None => 0,
            };
            if refreshed == 0 {
                tx.execute(
                    "INSERT INTO rate_limits (ip, action, kitty_name, ts) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![ip, action, kitty_name, now],
                )?;
            }

            tx.commit()?;
            Ok(true)
        })
        .await?
    }
}

struct KittyRow {
    name: String,
    balances_json: String,
    party_size: i64,
    split_ratio: i64,
    config_json: String,
    last_update: i64,
    last_view: i64,
}

impl KittyRow {
    fn encode(record: &KittyRecord) -> Result<Self, StoreError> {
        Ok(Self {
            name: record.name.to_string(),
            balances_json: serde_json::to_string(&record.balances)?,
            party_size: i64::from(record.party_size),
            split_ratio: record.split_ratio,
            config_json: serde_json::to_string(&record.config)?,
            last_update: u64_to_i64(record.last_update),
            last_view: u64_to_i64(record.last_view),
        })
    }
}

struct LoadedRow {
    balances_json: String,
    party_size: i64,
    split_ratio: i64,
    config_json: String,
    last_update: i64,
    last_view: i64,
    revision: i64,
}

impl LoadedRow {
    fn decode(self, name: KittyName) -> Result<StoredKitty, StoreError> {
        let balances: Balances = serde_json::from_str(&self.balances_json)?;
        let config = serde_json::from_str(&self.config_json)?;
        let party_size = u32::try_from(self.party_size).map_err(|_| StoreError::Corrupt {
            reason: format!("party_size {} out of range for {name}", self.party_size),
        })?;

        Ok(StoredKitty {
            record: KittyRecord {
                name,
                balances,
                party_size,
                split_ratio: self.split_ratio,
                config,
                last_update: i64_to_u64(self.last_update),
                last_view: i64_to_u64(self.last_view),
            },
            revision: i64_to_u64(self.revision),
        })
    }
}

fn init_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kitties (
            name TEXT PRIMARY KEY NOT NULL,
            balances_json TEXT NOT NULL,
            party_size INTEGER NOT NULL,
            split_ratio INTEGER NOT NULL,
            config_json TEXT NOT NULL,
            last_update INTEGER NOT NULL,
            last_view INTEGER NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_kitties_activity
            ON kitties(last_update, last_view);

        CREATE TABLE IF NOT EXISTS rate_limits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ip TEXT NOT NULL,
            action TEXT NOT NULL,
            kitty_name TEXT,
            ts INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rate_limits_ip_action
            ON rate_limits(ip, action);
        CREATE INDEX IF NOT EXISTS idx_rate_limits_ts
            ON rate_limits(ts);",
    )?;
    Ok(())
}

fn open_connection(path: PathBuf) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(path)?;
    let _ = conn.busy_timeout(Duration::from_secs(5));
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
    Ok(conn)
}

fn parse_stored_name(raw: &str) -> Result<KittyName, StoreError> {
    KittyName::parse(raw).map_err(|_| StoreError::Corrupt {
        reason: format!("invalid stored kitty name {raw:?}"),
    })
}

fn u64_to_i64(value: u64) -> i64 {
    if value > i64::MAX as u64 {
        i64::MAX
    } else {
        value as i64
    }
}

fn i64_to_u64(value: i64) -> u64 {
    if value <= 0 { 0 } else { value as u64 }
}
