//! ============================================================================
//! GATEKEEPER-CORE: Credit & Access Gate
//! ============================================================================
//! This crate handles the access-control core for a credit-metered chat bot:
//! - Durable per-user credit ledger via redb
//! - Daily grant / referral / spend policies
//! - Channel-membership gate (fail-closed) over a pluggable oracle
//! - Gated command dispatch with append-only usage audit
//! ============================================================================

pub mod config;
pub mod db;
pub mod dispatch;
pub mod membership;
pub mod session;
pub mod spend;
pub mod types;

// Re-export main types for convenience
pub use config::GateConfig;
pub use db::{ChannelRequirement, LedgerDb, LedgerStats, UsageRecord, UserAccount};
pub use dispatch::{AuditNotifier, GateKeeper, LookupExecutor, TracingNotifier};
pub use membership::{MembershipGate, MembershipOracle, MembershipReport, MembershipStatus};
pub use session::{PendingAction, SessionTracker};
pub use spend::{SpendDecision, SpendGate};
pub use types::{ContextKind, GateError, GateOutcome};
