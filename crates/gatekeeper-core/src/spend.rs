//! ============================================================================
//! Spend Gate - Single authorization point for billable actions
//! ============================================================================
//! Group contexts are never metered. Private spends refresh the daily grant
//! first, then atomically debit; insufficient balance is a hard precondition
//! failure — nothing downstream runs.
//! ============================================================================

use std::sync::Arc;
use tracing::debug;

use crate::db::LedgerDb;
use crate::types::{ContextKind, GateError};

/// Outcome of a successful spend authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendDecision {
    /// Group/shared context: allowed without touching any balance.
    Unmetered,
    /// Private context: the debit committed; `remaining` is the new balance.
    Debited { remaining: u32 },
}

pub struct SpendGate {
    db: Arc<LedgerDb>,
}

impl SpendGate {
    pub fn new(db: Arc<LedgerDb>) -> Self {
        Self { db }
    }

    /// Authorize a spend of `cost` credits in the given context.
    pub fn authorize(
        &self,
        user_id: i64,
        cost: u32,
        context: ContextKind,
    ) -> Result<SpendDecision, GateError> {
        self.authorize_at(user_id, cost, context, chrono::Utc::now().timestamp())
    }

    /// Authorization against an explicit clock (UTC epoch seconds).
    pub fn authorize_at(
        &self,
        user_id: i64,
        cost: u32,
        context: ContextKind,
        now: i64,
    ) -> Result<SpendDecision, GateError> {
        if !context.is_private() {
            return Ok(SpendDecision::Unmetered);
        }

        // Suspended accounts are refused outright and accrue no grants.
        let account = self
            .db
            .get_account(user_id)
            .map_err(GateError::StoreWriteFailure)?;
        if let Some(account) = &account {
            if account.suspended {
                return Err(GateError::Suspended {
                    reason: account.suspend_reason.clone(),
                });
            }
        }

        // Refresh a stale balance before the spend check.
        self.db
            .maybe_grant_daily(user_id, now)
            .map_err(GateError::StoreWriteFailure)?;

        if self
            .db
            .debit(user_id, cost)
            .map_err(GateError::StoreWriteFailure)?
        {
            let remaining = self
                .db
                .read_balance(user_id)
                .map_err(GateError::StoreWriteFailure)?;
            debug!("Spend authorized: {} paid {}, {} left", user_id, cost, remaining);
            Ok(SpendDecision::Debited { remaining })
        } else {
            let balance = self
                .db
                .read_balance(user_id)
                .map_err(GateError::StoreWriteFailure)?;
            Err(GateError::InsufficientBalance { balance })
        }
    }

    /// Balance as the user sees it: private reads refresh the daily grant
    /// first (unless the account is suspended); group contexts report `None`
    /// (unmetered).
    pub fn balance(&self, user_id: i64, context: ContextKind) -> Result<Option<u32>, GateError> {
        if !context.is_private() {
            return Ok(None);
        }
        let suspended = self
            .db
            .get_account(user_id)
            .map_err(GateError::StoreWriteFailure)?
            .map(|a| a.suspended)
            .unwrap_or(false);
        if !suspended {
            self.db
                .maybe_grant_daily(user_id, chrono::Utc::now().timestamp())
                .map_err(GateError::StoreWriteFailure)?;
        }
        self.db
            .read_balance(user_id)
            .map(Some)
            .map_err(GateError::StoreWriteFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use crate::db::tests::temp_ledger;

    fn setup() -> (Arc<LedgerDb>, SpendGate, i64) {
        let db = Arc::new(temp_ledger(GateConfig::default()));
        let (account, _) = db
            .upsert_account(1, "u1", "U", "One", None)
            .unwrap();
        let gate = SpendGate::new(db.clone());
        (db, gate, account.last_grant_at)
    }

    #[test]
    fn test_group_context_never_metered() {
        let (db, gate, _) = setup();
        for _ in 0..10 {
            let decision = gate.authorize(1, 100, ContextKind::Group).unwrap();
            assert_eq!(decision, SpendDecision::Unmetered);
        }
        // Unknown account too
        assert_eq!(
            gate.authorize(999, 100, ContextKind::Group).unwrap(),
            SpendDecision::Unmetered
        );
        assert_eq!(db.read_balance(1).unwrap(), 5);
    }

    #[test]
    fn test_five_spends_then_insufficient() {
        let (db, gate, t0) = setup();
        for i in 0..5u32 {
            let decision = gate
                .authorize_at(1, 1, ContextKind::Private, t0 + 1)
                .unwrap();
            assert_eq!(decision, SpendDecision::Debited { remaining: 4 - i });
        }
        let err = gate
            .authorize_at(1, 1, ContextKind::Private, t0 + 1)
            .unwrap_err();
        assert!(matches!(err, GateError::InsufficientBalance { balance: 0 }));
        assert_eq!(db.read_balance(1).unwrap(), 0);
    }

    #[test]
    fn test_stale_balance_refreshed_before_spend() {
        let (db, gate, t0) = setup();
        // Drain the starting balance
        for _ in 0..5 {
            gate.authorize_at(1, 1, ContextKind::Private, t0 + 1).unwrap();
        }
        assert_eq!(db.read_balance(1).unwrap(), 0);

        // Two days later: the grant lands before the spend check
        let decision = gate
            .authorize_at(1, 1, ContextKind::Private, t0 + 2 * 86_400)
            .unwrap();
        assert_eq!(decision, SpendDecision::Debited { remaining: 4 });
    }

    #[test]
    fn test_suspended_account_refused() {
        let (db, gate, t0) = setup();
        db.set_suspended(1, true, Some("tos".into())).unwrap();
        let err = gate
            .authorize_at(1, 1, ContextKind::Private, t0 + 1)
            .unwrap_err();
        assert!(matches!(err, GateError::Suspended { .. }));
        assert_eq!(db.read_balance(1).unwrap(), 5);
    }

    #[test]
    fn test_suspension_blocks_daily_grant() {
        let (db, gate, t0) = setup();
        db.set_suspended(1, true, None).unwrap();

        // Refused attempts while suspended accrue nothing, however stale
        let err = gate
            .authorize_at(1, 1, ContextKind::Private, t0 + 2 * 86_400)
            .unwrap_err();
        assert!(matches!(err, GateError::Suspended { .. }));
        assert_eq!(db.read_balance(1).unwrap(), 5);

        // Reinstated: the grant window applies again
        db.set_suspended(1, false, None).unwrap();
        let decision = gate
            .authorize_at(1, 1, ContextKind::Private, t0 + 2 * 86_400)
            .unwrap();
        assert_eq!(decision, SpendDecision::Debited { remaining: 9 });
    }

    #[test]
    fn test_unknown_account_insufficient() {
        let (_, gate, _) = setup();
        let err = gate.authorize(42, 1, ContextKind::Private).unwrap_err();
        assert!(matches!(err, GateError::InsufficientBalance { balance: 0 }));
    }

    #[test]
    fn test_balance_group_is_unmetered() {
        let (_, gate, _) = setup();
        assert_eq!(gate.balance(1, ContextKind::Group).unwrap(), None);
        assert_eq!(gate.balance(1, ContextKind::Private).unwrap(), Some(5));
    }
}
