// ============================================================================
// LedgerDb — Embedded Credit Ledger (redb)
// ============================================================================
// Durable storage for user accounts, usage logs, channel requirements and
// operators. Default path: ~/.gatekeeper/ledger.redb (override via
// GATEKEEPER_DB_PATH env var).
//
// Each account row is the unit of mutual exclusion: every balance mutation is
// a read-modify-write inside a single redb write transaction, so two
// concurrent debits cannot both observe a stale sufficient balance.
// ============================================================================

pub mod types;

pub use types::{ChannelRequirement, LedgerStats, OperatorRecord, UsageRecord, UserAccount};

use anyhow::{anyhow, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::GateConfig;

// Table definitions
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
const USAGE: TableDefinition<&str, &[u8]> = TableDefinition::new("usage");
const CHANNELS: TableDefinition<&str, &[u8]> = TableDefinition::new("channels");
const OPERATORS: TableDefinition<&str, &[u8]> = TableDefinition::new("operators");

/// Maximum stored length of a usage-log result summary.
const RESULT_SUMMARY_MAX: usize = 500;

/// Embedded credit ledger.
pub struct LedgerDb {
    db: Database,
    path: PathBuf,
    config: GateConfig,
}

impl LedgerDb {
    /// Open (or create) the ledger at the given path.
    /// If `path` is None, uses GATEKEEPER_DB_PATH env var or
    /// ~/.gatekeeper/ledger.redb
    pub fn open(path: Option<&str>, config: GateConfig) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("GATEKEEPER_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let dir = home.join(".gatekeeper");
            std::fs::create_dir_all(&dir)
                .map_err(|e| anyhow!("Failed to create .gatekeeper directory: {}", e))?;
            dir.join("ledger.redb")
        };

        info!("Opening ledger at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open ledger: {}", e))?;

        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn.open_table(USERS).map_err(|e| anyhow!("Failed to create users table: {}", e))?;
            let _ = write_txn.open_table(USAGE).map_err(|e| anyhow!("Failed to create usage table: {}", e))?;
            let _ = write_txn.open_table(CHANNELS).map_err(|e| anyhow!("Failed to create channels table: {}", e))?;
            let _ = write_txn.open_table(OPERATORS).map_err(|e| anyhow!("Failed to create operators table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        info!("Ledger ready");

        Ok(Self { db, path: db_path, config })
    }

    /// Get the ledger file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The credit policy this ledger was opened with
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    // ========================================================================
    // Account Operations
    // ========================================================================

    /// Idempotent account upsert.
    ///
    /// Creates the row with the configured starting balance if absent; on
    /// creation, a valid `referred_by` (present, not self, referrer exists)
    /// credits the referrer the referral bonus and bumps their
    /// `referral_count` in the same transaction. The bonus can therefore
    /// apply at most once per newly registered account.
    ///
    /// On an existing row only display fields and `last_seen_at` change.
    /// Returns the stored account and whether this was a fresh registration.
    pub fn upsert_account(
        &self,
        user_id: i64,
        handle: &str,
        given_name: &str,
        family_name: &str,
        referred_by: Option<i64>,
    ) -> Result<(UserAccount, bool)> {
        let now = chrono::Utc::now().timestamp();
        let key = user_id.to_string();

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let (account, is_new) = {
            let mut table = write_txn.open_table(USERS)
                .map_err(|e| anyhow!("Failed to open users table: {}", e))?;

            let existing = table.get(key.as_str())
                .map_err(|e| anyhow!("Failed to get account: {}", e))?
                .map(|v| v.value().to_vec());

            match existing {
                Some(bytes) => {
                    let mut account: UserAccount = bincode::deserialize(&bytes)
                        .map_err(|e| anyhow!("Failed to deserialize account: {}", e))?;
                    account.handle = handle.to_string();
                    account.given_name = given_name.to_string();
                    account.family_name = family_name.to_string();
                    account.last_seen_at = now;

                    let value = bincode::serialize(&account)
                        .map_err(|e| anyhow!("Failed to serialize account: {}", e))?;
                    table.insert(key.as_str(), value.as_slice())
                        .map_err(|e| anyhow!("Failed to update account: {}", e))?;
                    (account, false)
                }
                None => {
                    let referred_by = referred_by.filter(|r| *r != user_id);
                    let account = UserAccount {
                        user_id,
                        handle: handle.to_string(),
                        given_name: given_name.to_string(),
                        family_name: family_name.to_string(),
                        balance: self.config.start_balance,
                        last_grant_at: now,
                        registered_at: now,
                        last_seen_at: now,
                        referred_by,
                        referral_count: 0,
                        lifetime_action_count: 0,
                        suspended: false,
                        suspend_reason: None,
                    };
                    let value = bincode::serialize(&account)
                        .map_err(|e| anyhow!("Failed to serialize account: {}", e))?;
                    table.insert(key.as_str(), value.as_slice())
                        .map_err(|e| anyhow!("Failed to insert account: {}", e))?;

                    // Referral bonus, same transaction as the registration.
                    if let Some(referrer_id) = referred_by {
                        let referrer_key = referrer_id.to_string();
                        let referrer = table.get(referrer_key.as_str())
                            .map_err(|e| anyhow!("Failed to get referrer: {}", e))?
                            .map(|v| v.value().to_vec());
                        if let Some(bytes) = referrer {
                            let mut referrer: UserAccount = bincode::deserialize(&bytes)
                                .map_err(|e| anyhow!("Failed to deserialize referrer: {}", e))?;
                            referrer.balance = referrer.balance.saturating_add(self.config.referral_bonus);
                            referrer.referral_count += 1;
                            let value = bincode::serialize(&referrer)
                                .map_err(|e| anyhow!("Failed to serialize referrer: {}", e))?;
                            table.insert(referrer_key.as_str(), value.as_slice())
                                .map_err(|e| anyhow!("Failed to update referrer: {}", e))?;
                            debug!(
                                "Referral bonus: +{} to {} (referred {})",
                                self.config.referral_bonus, referrer_id, user_id
                            );
                        }
                    }

                    (account, true)
                }
            }
        };
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        if is_new {
            info!("Registered account {} (referred_by: {:?})", user_id, account.referred_by);
        }
        Ok((account, is_new))
    }

    pub fn get_account(&self, user_id: i64) -> Result<Option<UserAccount>> {
        let key = user_id.to_string();

        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(USERS)
            .map_err(|e| anyhow!("Failed to open users table: {}", e))?;

        match table.get(key.as_str()).map_err(|e| anyhow!("Failed to get account: {}", e))? {
            Some(value) => {
                let account: UserAccount = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize account: {}", e))?;
                Ok(Some(account))
            }
            None => Ok(None),
        }
    }

    /// Current balance; 0 for unknown accounts.
    pub fn read_balance(&self, user_id: i64) -> Result<u32> {
        Ok(self.get_account(user_id)?.map(|a| a.balance).unwrap_or(0))
    }

    /// Atomic check-and-decrement. Succeeds only if `balance >= amount`;
    /// returns false with no mutation otherwise (also for unknown or
    /// suspended accounts).
    pub fn debit(&self, user_id: i64, amount: u32) -> Result<bool> {
        let key = user_id.to_string();

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let debited = {
            let mut table = write_txn.open_table(USERS)
                .map_err(|e| anyhow!("Failed to open users table: {}", e))?;

            let existing = table.get(key.as_str())
                .map_err(|e| anyhow!("Failed to get account: {}", e))?
                .map(|v| v.value().to_vec());

            match existing {
                Some(bytes) => {
                    let mut account: UserAccount = bincode::deserialize(&bytes)
                        .map_err(|e| anyhow!("Failed to deserialize account: {}", e))?;
                    if account.suspended || account.balance < amount {
                        false
                    } else {
                        account.balance -= amount;
                        let value = bincode::serialize(&account)
                            .map_err(|e| anyhow!("Failed to serialize account: {}", e))?;
                        table.insert(key.as_str(), value.as_slice())
                            .map_err(|e| anyhow!("Failed to update account: {}", e))?;
                        true
                    }
                }
                None => false,
            }
        };
        write_txn.commit().map_err(|e| anyhow!("Failed to commit debit: {}", e))?;

        if debited {
            debug!("Debited {} credit(s) from {}", amount, user_id);
        }
        Ok(debited)
    }

    /// Operator top-up. Returns false if the account is unknown.
    pub fn credit(&self, user_id: i64, amount: u32) -> Result<bool> {
        let key = user_id.to_string();

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let credited = {
            let mut table = write_txn.open_table(USERS)
                .map_err(|e| anyhow!("Failed to open users table: {}", e))?;

            let existing = table.get(key.as_str())
                .map_err(|e| anyhow!("Failed to get account: {}", e))?
                .map(|v| v.value().to_vec());

            match existing {
                Some(bytes) => {
                    let mut account: UserAccount = bincode::deserialize(&bytes)
                        .map_err(|e| anyhow!("Failed to deserialize account: {}", e))?;
                    account.balance = account.balance.saturating_add(amount);
                    let value = bincode::serialize(&account)
                        .map_err(|e| anyhow!("Failed to serialize account: {}", e))?;
                    table.insert(key.as_str(), value.as_slice())
                        .map_err(|e| anyhow!("Failed to update account: {}", e))?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit().map_err(|e| anyhow!("Failed to commit credit: {}", e))?;

        if credited {
            info!("Credited {} credit(s) to {}", amount, user_id);
        }
        Ok(credited)
    }

    /// Daily grant evaluation at time `now` (UTC epoch seconds).
    ///
    /// Credits `config.daily_grant` and resets `last_grant_at` to `now`,
    /// atomically, iff at least `config.grant_interval_secs` have elapsed
    /// since the last grant. At most once per window; no-op for unknown
    /// accounts.
    pub fn maybe_grant_daily(&self, user_id: i64, now: i64) -> Result<bool> {
        let key = user_id.to_string();

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let granted = {
            let mut table = write_txn.open_table(USERS)
                .map_err(|e| anyhow!("Failed to open users table: {}", e))?;

            let existing = table.get(key.as_str())
                .map_err(|e| anyhow!("Failed to get account: {}", e))?
                .map(|v| v.value().to_vec());

            match existing {
                Some(bytes) => {
                    let mut account: UserAccount = bincode::deserialize(&bytes)
                        .map_err(|e| anyhow!("Failed to deserialize account: {}", e))?;
                    if now - account.last_grant_at >= self.config.grant_interval_secs {
                        account.balance = account.balance.saturating_add(self.config.daily_grant);
                        account.last_grant_at = now;
                        let value = bincode::serialize(&account)
                            .map_err(|e| anyhow!("Failed to serialize account: {}", e))?;
                        table.insert(key.as_str(), value.as_slice())
                            .map_err(|e| anyhow!("Failed to update account: {}", e))?;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        write_txn.commit().map_err(|e| anyhow!("Failed to commit grant: {}", e))?;

        if granted {
            debug!("Daily grant: +{} to {}", self.config.daily_grant, user_id);
        }
        Ok(granted)
    }

    /// Suspend or reinstate an account. Returns false if unknown.
    pub fn set_suspended(&self, user_id: i64, suspended: bool, reason: Option<String>) -> Result<bool> {
        let key = user_id.to_string();

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let updated = {
            let mut table = write_txn.open_table(USERS)
                .map_err(|e| anyhow!("Failed to open users table: {}", e))?;

            let existing = table.get(key.as_str())
                .map_err(|e| anyhow!("Failed to get account: {}", e))?
                .map(|v| v.value().to_vec());

            match existing {
                Some(bytes) => {
                    let mut account: UserAccount = bincode::deserialize(&bytes)
                        .map_err(|e| anyhow!("Failed to deserialize account: {}", e))?;
                    account.suspended = suspended;
                    account.suspend_reason = if suspended { reason.clone() } else { None };
                    let value = bincode::serialize(&account)
                        .map_err(|e| anyhow!("Failed to serialize account: {}", e))?;
                    table.insert(key.as_str(), value.as_slice())
                        .map_err(|e| anyhow!("Failed to update account: {}", e))?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit().map_err(|e| anyhow!("Failed to commit suspension: {}", e))?;

        if updated {
            info!("Account {} suspended={} ({:?})", user_id, suspended, reason);
        }
        Ok(updated)
    }

    pub fn list_accounts(&self) -> Result<Vec<UserAccount>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(USERS)
            .map_err(|e| anyhow!("Failed to open users table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate accounts: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let account: UserAccount = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize account: {}", e))?;
            results.push(account);
        }
        Ok(results)
    }

    // ========================================================================
    // Usage Log Operations
    // ========================================================================

    /// Append a usage entry and bump the account's lifetime action count.
    ///
    /// Callers treat failure here as non-fatal: the command flow never
    /// aborts because the audit trail could not be written.
    pub fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        let mut record = record.clone();
        if record.result_summary.len() > RESULT_SUMMARY_MAX {
            record.result_summary = record
                .result_summary
                .chars()
                .take(RESULT_SUMMARY_MAX)
                .collect();
        }
        // Zero-padded timestamp prefix keeps entries time-ordered for pruning.
        let key = format!("{:020}:{}", record.timestamp, record.entry_id);
        let value = bincode::serialize(&record)
            .map_err(|e| anyhow!("Failed to serialize usage entry: {}", e))?;

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(USAGE)
                .map_err(|e| anyhow!("Failed to open usage table: {}", e))?;
            table.insert(key.as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert usage entry: {}", e))?;

            let mut users = write_txn.open_table(USERS)
                .map_err(|e| anyhow!("Failed to open users table: {}", e))?;
            let user_key = record.user_id.to_string();
            let existing = users.get(user_key.as_str())
                .map_err(|e| anyhow!("Failed to get account: {}", e))?
                .map(|v| v.value().to_vec());
            if let Some(bytes) = existing {
                let mut account: UserAccount = bincode::deserialize(&bytes)
                    .map_err(|e| anyhow!("Failed to deserialize account: {}", e))?;
                account.lifetime_action_count += 1;
                account.last_seen_at = record.timestamp;
                let value = bincode::serialize(&account)
                    .map_err(|e| anyhow!("Failed to serialize account: {}", e))?;
                users.insert(user_key.as_str(), value.as_slice())
                    .map_err(|e| anyhow!("Failed to update account: {}", e))?;
            }
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit usage entry: {}", e))?;

        debug!("Logged usage: {} by {}", record.action_label, record.user_id);
        Ok(())
    }

    /// Usage entries, most recent first. Keys are zero-padded timestamps,
    /// so reverse key order is reverse chronological.
    pub fn list_usage(&self, limit: Option<usize>) -> Result<Vec<UsageRecord>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(USAGE)
            .map_err(|e| anyhow!("Failed to open usage table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate usage: {}", e))?;
        for entry in iter.rev() {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let record: UsageRecord = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize usage entry: {}", e))?;
            results.push(record);
            if let Some(limit) = limit {
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }

    /// One user's usage entries, most recent first.
    pub fn usage_for_user(&self, user_id: i64, limit: Option<usize>) -> Result<Vec<UsageRecord>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(USAGE)
            .map_err(|e| anyhow!("Failed to open usage table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate usage: {}", e))?;
        for entry in iter.rev() {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let record: UsageRecord = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize usage entry: {}", e))?;
            if record.user_id != user_id {
                continue;
            }
            results.push(record);
            if let Some(limit) = limit {
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }

    /// Prune usage entries older than the given number of days.
    /// Returns the number of entries deleted.
    pub fn prune_usage(&self, older_than_days: i64) -> Result<usize> {
        let cutoff = chrono::Utc::now().timestamp() - (older_than_days * 86400);

        let stale: Vec<String> = {
            let read_txn = self.db.begin_read()
                .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
            let table = read_txn.open_table(USAGE)
                .map_err(|e| anyhow!("Failed to open usage table: {}", e))?;
            let mut keys = Vec::new();
            let iter = table.range::<&str>(..)
                .map_err(|e| anyhow!("Failed to iterate usage: {}", e))?;
            for entry in iter {
                let (key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
                let record: UsageRecord = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize usage entry: {}", e))?;
                if record.timestamp < cutoff {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };

        let deleted = stale.len();
        if deleted > 0 {
            let write_txn = self.db.begin_write()
                .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
            {
                let mut table = write_txn.open_table(USAGE)
                    .map_err(|e| anyhow!("Failed to open usage table: {}", e))?;
                for key in &stale {
                    table.remove(key.as_str())
                        .map_err(|e| anyhow!("Failed to remove usage entry: {}", e))?;
                }
            }
            write_txn.commit().map_err(|e| anyhow!("Failed to commit prune: {}", e))?;
            info!("Pruned {} usage entries older than {} days", deleted, older_than_days);
        }
        Ok(deleted)
    }

    // ========================================================================
    // Channel Requirement Operations
    // ========================================================================

    pub fn add_channel(&self, channel: &ChannelRequirement) -> Result<()> {
        let value = bincode::serialize(channel)
            .map_err(|e| anyhow!("Failed to serialize channel: {}", e))?;

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(CHANNELS)
                .map_err(|e| anyhow!("Failed to open channels table: {}", e))?;
            table.insert(channel.username.as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert channel: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        info!("Stored channel requirement: @{}", channel.username);
        Ok(())
    }

    pub fn remove_channel(&self, username: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut table = write_txn.open_table(CHANNELS)
                .map_err(|e| anyhow!("Failed to open channels table: {}", e))?;
            removed = table.remove(username)
                .map_err(|e| anyhow!("Failed to remove channel: {}", e))?
                .is_some();
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        if removed {
            info!("Removed channel requirement: @{}", username);
        }
        Ok(removed)
    }

    pub fn list_channels(&self) -> Result<Vec<ChannelRequirement>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(CHANNELS)
            .map_err(|e| anyhow!("Failed to open channels table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate channels: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let channel: ChannelRequirement = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize channel: {}", e))?;
            results.push(channel);
        }
        Ok(results)
    }

    // ========================================================================
    // Operator Operations
    // ========================================================================

    pub fn add_operator(&self, user_id: i64, added_by: i64) -> Result<()> {
        let record = OperatorRecord {
            user_id,
            added_by,
            added_at: chrono::Utc::now().timestamp(),
        };
        let key = user_id.to_string();
        let value = bincode::serialize(&record)
            .map_err(|e| anyhow!("Failed to serialize operator: {}", e))?;

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(OPERATORS)
                .map_err(|e| anyhow!("Failed to open operators table: {}", e))?;
            table.insert(key.as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert operator: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        info!("Added operator {}", user_id);
        Ok(())
    }

    pub fn remove_operator(&self, user_id: i64) -> Result<bool> {
        let key = user_id.to_string();

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut table = write_txn.open_table(OPERATORS)
                .map_err(|e| anyhow!("Failed to open operators table: {}", e))?;
            removed = table.remove(key.as_str())
                .map_err(|e| anyhow!("Failed to remove operator: {}", e))?
                .is_some();
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        if removed {
            info!("Removed operator {}", user_id);
        }
        Ok(removed)
    }

    pub fn is_operator(&self, user_id: i64) -> Result<bool> {
        let key = user_id.to_string();

        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(OPERATORS)
            .map_err(|e| anyhow!("Failed to open operators table: {}", e))?;

        Ok(table.get(key.as_str())
            .map_err(|e| anyhow!("Failed to get operator: {}", e))?
            .is_some())
    }

    pub fn list_operators(&self) -> Result<Vec<OperatorRecord>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(OPERATORS)
            .map_err(|e| anyhow!("Failed to open operators table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate operators: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let record: OperatorRecord = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize operator: {}", e))?;
            results.push(record);
        }
        Ok(results)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&self) -> Result<LedgerStats> {
        let accounts = self.list_accounts()?;
        let channels = self.list_channels()?;
        let operators = self.list_operators()?;

        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(USAGE)
            .map_err(|e| anyhow!("Failed to open usage table: {}", e))?;
        let usage_count = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate usage: {}", e))?
            .count();

        Ok(LedgerStats {
            total_users: accounts.len(),
            suspended_users: accounts.iter().filter(|a| a.suspended).count(),
            total_usage_entries: usage_count,
            total_channels: channels.len(),
            total_operators: operators.len(),
            total_credits_outstanding: accounts.iter().map(|a| a.balance as u64).sum(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Throwaway ledger under the OS temp dir.
    pub(crate) fn temp_ledger(config: GateConfig) -> LedgerDb {
        let path = std::env::temp_dir().join(format!(
            "gatekeeper-test-{}.redb",
            uuid::Uuid::new_v4()
        ));
        LedgerDb::open(Some(path.to_str().unwrap()), config).unwrap()
    }

    fn register(db: &LedgerDb, id: i64) -> (UserAccount, bool) {
        db.upsert_account(id, "handle", "Given", "Family", None).unwrap()
    }

    #[test]
    fn test_upsert_creates_with_start_balance() {
        let db = temp_ledger(GateConfig::default());
        let (account, is_new) = register(&db, 100);
        assert!(is_new);
        assert_eq!(account.balance, 5);
        assert_eq!(account.referral_count, 0);

        // Second upsert refreshes display fields only
        let (account, is_new) = db
            .upsert_account(100, "newhandle", "New", "Name", None)
            .unwrap();
        assert!(!is_new);
        assert_eq!(account.handle, "newhandle");
        assert_eq!(account.balance, 5);
    }

    #[test]
    fn test_referral_bonus_applied_once() {
        let db = temp_ledger(GateConfig::default());
        register(&db, 1); // referrer

        let (_, is_new) = db
            .upsert_account(2, "u2", "U", "Two", Some(1))
            .unwrap();
        assert!(is_new);
        let referrer = db.get_account(1).unwrap().unwrap();
        assert_eq!(referrer.balance, 15); // 5 + 10
        assert_eq!(referrer.referral_count, 1);

        // Duplicate registration of the referred account: no further bonus
        let (_, is_new) = db
            .upsert_account(2, "u2", "U", "Two", Some(1))
            .unwrap();
        assert!(!is_new);
        let referrer = db.get_account(1).unwrap().unwrap();
        assert_eq!(referrer.balance, 15);
        assert_eq!(referrer.referral_count, 1);
    }

    #[test]
    fn test_self_referral_ignored() {
        let db = temp_ledger(GateConfig::default());
        let (account, _) = db
            .upsert_account(7, "u7", "U", "Seven", Some(7))
            .unwrap();
        assert_eq!(account.referred_by, None);
        assert_eq!(account.balance, 5);
    }

    #[test]
    fn test_referral_to_unknown_referrer_is_noop() {
        let db = temp_ledger(GateConfig::default());
        let (account, is_new) = db
            .upsert_account(2, "u2", "U", "Two", Some(999))
            .unwrap();
        assert!(is_new);
        assert_eq!(account.referred_by, Some(999));
        assert!(db.get_account(999).unwrap().is_none());
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let db = temp_ledger(GateConfig::default());
        register(&db, 1);

        assert!(db.debit(1, 3).unwrap());
        assert_eq!(db.read_balance(1).unwrap(), 2);
        // Would go negative: rejected, balance unchanged
        assert!(!db.debit(1, 3).unwrap());
        assert_eq!(db.read_balance(1).unwrap(), 2);
        assert!(db.debit(1, 2).unwrap());
        assert_eq!(db.read_balance(1).unwrap(), 0);
        assert!(!db.debit(1, 1).unwrap());
    }

    #[test]
    fn test_debit_unknown_account() {
        let db = temp_ledger(GateConfig::default());
        assert!(!db.debit(42, 1).unwrap());
        assert_eq!(db.read_balance(42).unwrap(), 0);
    }

    #[test]
    fn test_debit_suspended_account() {
        let db = temp_ledger(GateConfig::default());
        register(&db, 1);
        db.set_suspended(1, true, Some("abuse".into())).unwrap();
        assert!(!db.debit(1, 1).unwrap());
        assert_eq!(db.read_balance(1).unwrap(), 5);

        db.set_suspended(1, false, None).unwrap();
        assert!(db.debit(1, 1).unwrap());
        let account = db.get_account(1).unwrap().unwrap();
        assert_eq!(account.suspend_reason, None);
    }

    #[test]
    fn test_daily_grant_at_most_once_per_window() {
        let db = temp_ledger(GateConfig::default());
        let (account, _) = register(&db, 1);
        let registered = account.last_grant_at;

        // Same window: no grant, twice
        assert!(!db.maybe_grant_daily(1, registered + 100).unwrap());
        assert!(!db.maybe_grant_daily(1, registered + 86_399).unwrap());
        assert_eq!(db.read_balance(1).unwrap(), 5);

        // Window boundary crossed: exactly one grant
        assert!(db.maybe_grant_daily(1, registered + 86_400).unwrap());
        assert_eq!(db.read_balance(1).unwrap(), 10);
        assert!(!db.maybe_grant_daily(1, registered + 86_401).unwrap());
        assert_eq!(db.read_balance(1).unwrap(), 10);
    }

    #[test]
    fn test_daily_grant_unknown_account() {
        let db = temp_ledger(GateConfig::default());
        assert!(!db.maybe_grant_daily(42, 1_000_000_000).unwrap());
    }

    #[test]
    fn test_record_usage_increments_lifetime_count() {
        let db = temp_ledger(GateConfig::default());
        register(&db, 1);

        let record = UsageRecord {
            entry_id: uuid::Uuid::new_v4().to_string(),
            user_id: 1,
            action_label: "vehicle".into(),
            query_text: "KA01AB1234".into(),
            result_summary: "x".repeat(800),
            context_kind: "private".into(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        db.record_usage(&record).unwrap();

        let account = db.get_account(1).unwrap().unwrap();
        assert_eq!(account.lifetime_action_count, 1);
        let stored = db.usage_for_user(1, None).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].result_summary.len(), 500);
    }

    #[test]
    fn test_usage_listing_is_newest_first() {
        let db = temp_ledger(GateConfig::default());
        register(&db, 1);
        let now = chrono::Utc::now().timestamp();

        for i in 0..3i64 {
            let record = UsageRecord {
                entry_id: format!("e{}", i),
                user_id: 1,
                action_label: format!("a{}", i),
                query_text: "q".into(),
                result_summary: String::new(),
                context_kind: "private".into(),
                timestamp: now + i,
            };
            db.record_usage(&record).unwrap();
        }

        let recent = db.usage_for_user(1, Some(2)).unwrap();
        let stamps: Vec<_> = recent.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![now + 2, now + 1]);

        let all = db.list_usage(None).unwrap();
        assert_eq!(all[0].action_label, "a2");
        assert_eq!(all[2].action_label, "a0");
    }

    #[test]
    fn test_prune_usage() {
        let db = temp_ledger(GateConfig::default());
        register(&db, 1);
        let now = chrono::Utc::now().timestamp();

        for (i, age_days) in [0i64, 10, 40].iter().enumerate() {
            let record = UsageRecord {
                entry_id: format!("e{}", i),
                user_id: 1,
                action_label: "ip".into(),
                query_text: "q".into(),
                result_summary: String::new(),
                context_kind: "private".into(),
                timestamp: now - age_days * 86_400,
            };
            db.record_usage(&record).unwrap();
        }

        assert_eq!(db.prune_usage(30).unwrap(), 1);
        assert_eq!(db.list_usage(None).unwrap().len(), 2);
    }

    #[test]
    fn test_channel_crud() {
        let db = temp_ledger(GateConfig::default());
        let channel = ChannelRequirement {
            name: "Portal".into(),
            username: "portal".into(),
            invite_link: "https://example.org/portal".into(),
            is_private: false,
            button_text: None,
        };
        db.add_channel(&channel).unwrap();
        assert_eq!(db.list_channels().unwrap(), vec![channel]);
        assert!(db.remove_channel("portal").unwrap());
        assert!(!db.remove_channel("portal").unwrap());
        assert!(db.list_channels().unwrap().is_empty());
    }

    #[test]
    fn test_operator_crud() {
        let db = temp_ledger(GateConfig::default());
        assert!(!db.is_operator(9).unwrap());
        db.add_operator(9, 1).unwrap();
        assert!(db.is_operator(9).unwrap());
        assert_eq!(db.list_operators().unwrap().len(), 1);
        assert!(db.remove_operator(9).unwrap());
        assert!(!db.is_operator(9).unwrap());
    }

    #[test]
    fn test_stats() {
        let db = temp_ledger(GateConfig::default());
        register(&db, 1);
        register(&db, 2);
        db.set_suspended(2, true, None).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_users, 2);
        assert_eq!(stats.suspended_users, 1);
        assert_eq!(stats.total_credits_outstanding, 10);
    }
}
