//! ============================================================================
//! Ledger Types - Serializable records for redb storage
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Per-user ledger row. The `LedgerDb` is the only mutator of `balance`,
/// `last_grant_at` and `referral_count`; everything else reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    /// Platform-assigned identifier, immutable.
    pub user_id: i64,
    /// Display fields, refreshed on every interaction.
    pub handle: String,
    pub given_name: String,
    pub family_name: String,
    /// Credit balance. Never goes negative: debits are checked decrements.
    pub balance: u32,
    /// UTC epoch seconds of the last daily-grant evaluation.
    pub last_grant_at: i64,
    /// UTC epoch seconds, set once at first registration.
    pub registered_at: i64,
    /// UTC epoch seconds, refreshed on every interaction.
    pub last_seen_at: i64,
    /// Referrer set only at first registration, immutable thereafter.
    pub referred_by: Option<i64>,
    /// Successful referrals attributed to this account.
    pub referral_count: u32,
    /// Billable actions performed over the account's lifetime.
    pub lifetime_action_count: u64,
    /// Operator-settable soft flag; suspended accounts are refused at the gate.
    pub suspended: bool,
    pub suspend_reason: Option<String>,
}

impl UserAccount {
    pub fn display_name(&self) -> String {
        if self.family_name.is_empty() {
            self.given_name.clone()
        } else {
            format!("{} {}", self.given_name, self.family_name)
        }
    }
}

/// Immutable usage-log entry, appended per billable action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// UUID key for the entry.
    pub entry_id: String,
    pub user_id: i64,
    /// What the user ran (e.g. "vehicle", "ip").
    pub action_label: String,
    pub query_text: String,
    /// Truncated to 500 chars at record time.
    pub result_summary: String,
    /// "private" or "group".
    pub context_kind: String,
    pub timestamp: i64,
}

/// A channel the membership gate must verify before any gated action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRequirement {
    pub name: String,
    /// Handle without the leading '@'. Unique key for the channel table.
    pub username: String,
    pub invite_link: String,
    pub is_private: bool,
    /// Join-button label shown in remediation messages.
    pub button_text: Option<String>,
}

impl ChannelRequirement {
    pub fn button_label(&self) -> String {
        self.button_text
            .clone()
            .unwrap_or_else(|| format!("Join {}", self.name))
    }
}

/// Operator entry: exempt from the membership gate, allowed admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorRecord {
    pub user_id: i64,
    pub added_by: i64,
    pub added_at: i64,
}

/// Aggregate counters for the inspection CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_users: usize,
    pub suspended_users: usize,
    pub total_usage_entries: usize,
    pub total_channels: usize,
    pub total_operators: usize,
    pub total_credits_outstanding: u64,
}
