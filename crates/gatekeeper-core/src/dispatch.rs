//! ============================================================================
//! Gated Command Dispatch - Membership -> Spend -> Execute -> Log
//! ============================================================================
//! Single entry point every billable command goes through:
//!
//!   START -> MEMBERSHIP_CHECK -> SPEND_CHECK -> EXECUTE -> LOGGED
//!
//! Membership is always resolved before any balance is touched, and the
//! balance is debited before the lookup executes: a failing lookup does not
//! refund the credit (pay-before-attempt). Usage is recorded regardless of
//! the lookup outcome once the debit has occurred, and an audit failure is
//! never surfaced to the command flow.
//! ============================================================================

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::{LedgerDb, UsageRecord, UserAccount};
use crate::membership::MembershipGate;
use crate::spend::SpendGate;
use crate::types::{ContextKind, GateError, GateOutcome};

/// Downstream lookup collaborator. Transport, formatting and the catalogue
/// of actions all live behind this seam; the gate treats it as a single
/// fallible call with no retries.
#[async_trait]
pub trait LookupExecutor: Send + Sync {
    async fn execute(&self, action_label: &str, query: &str) -> Result<String>;
}

/// Operator-facing error channel. Fire-and-forget: implementations must not
/// let their own failures propagate.
#[async_trait]
pub trait AuditNotifier: Send + Sync {
    async fn report_error(&self, context: &str, error: &anyhow::Error);
}

/// Default notifier: structured log only.
pub struct TracingNotifier;

#[async_trait]
impl AuditNotifier for TracingNotifier {
    async fn report_error(&self, context: &str, error: &anyhow::Error) {
        error!("[audit] {}: {:#}", context, error);
    }
}

/// The combined credit-and-access gate.
pub struct GateKeeper {
    db: Arc<LedgerDb>,
    membership: Arc<MembershipGate>,
    spend: SpendGate,
    executor: Arc<dyn LookupExecutor>,
    notifier: Arc<dyn AuditNotifier>,
}

impl GateKeeper {
    pub fn new(
        db: Arc<LedgerDb>,
        membership: Arc<MembershipGate>,
        executor: Arc<dyn LookupExecutor>,
        notifier: Arc<dyn AuditNotifier>,
    ) -> Self {
        let spend = SpendGate::new(db.clone());
        Self {
            db,
            membership,
            spend,
            executor,
            notifier,
        }
    }

    pub fn ledger(&self) -> &Arc<LedgerDb> {
        &self.db
    }

    pub fn membership(&self) -> &Arc<MembershipGate> {
        &self.membership
    }

    pub fn spend(&self) -> &SpendGate {
        &self.spend
    }

    /// Registration entry point for the bot's start command.
    ///
    /// Idempotent upsert; the returned flag tells the caller whether to fire
    /// one-time welcome/registration side effects. Referral credit happens
    /// here (inside the store) and only on first creation.
    pub fn register(
        &self,
        user_id: i64,
        handle: &str,
        given_name: &str,
        family_name: &str,
        referred_by: Option<i64>,
    ) -> Result<(UserAccount, bool), GateError> {
        self.db
            .upsert_account(user_id, handle, given_name, family_name, referred_by)
            .map_err(GateError::StoreWriteFailure)
    }

    /// Run one gated command through the full state machine.
    pub async fn run(
        &self,
        actor_id: i64,
        context: ContextKind,
        action_label: &str,
        query: &str,
        cost: u32,
    ) -> GateOutcome {
        self.run_at(actor_id, context, action_label, query, cost, chrono::Utc::now().timestamp())
            .await
    }

    /// `run` against an explicit clock (UTC epoch seconds).
    pub async fn run_at(
        &self,
        actor_id: i64,
        context: ContextKind,
        action_label: &str,
        query: &str,
        cost: u32,
        now: i64,
    ) -> GateOutcome {
        // MEMBERSHIP_CHECK — before any balance is touched. A store failure
        // while resolving exemption is treated as "not exempt" and reported.
        let exempt = match self.db.is_operator(actor_id) {
            Ok(exempt) => exempt,
            Err(e) => {
                self.notifier.report_error("operator lookup", &e).await;
                false
            }
        };
        let report = self.membership.check_all(actor_id, exempt).await;
        for (username, source) in report.failures {
            let err = anyhow::Error::new(GateError::OracleUnavailable(source));
            self.notifier
                .report_error(&format!("membership oracle @{}", username), &err)
                .await;
        }
        if !report.satisfied {
            info!(
                "Blocked {} on {}: {} channel(s) missing",
                actor_id,
                action_label,
                report.missing.len()
            );
            return GateOutcome::Blocked(GateError::MembershipUnsatisfied {
                missing: report.missing,
            });
        }

        // SPEND_CHECK — a refusal here means no lookup and no usage entry.
        if let Err(e) = self.spend.authorize_at(actor_id, cost, context, now) {
            if !e.is_user_refusal() {
                if let GateError::StoreWriteFailure(source) = &e {
                    self.notifier.report_error("spend authorization", source).await;
                }
            }
            return GateOutcome::Blocked(e);
        }

        // EXECUTE — fallible, no retries, not cancelled once started.
        let result = self.executor.execute(action_label, query).await;
        if let Err(e) = &result {
            warn!("Lookup {} failed for {}: {:#}", action_label, actor_id, e);
        }

        // LOGGED — always, once the debit has occurred. Failures are
        // swallowed and reported out of band.
        let record = UsageRecord {
            entry_id: uuid::Uuid::new_v4().to_string(),
            user_id: actor_id,
            action_label: action_label.to_string(),
            query_text: query.to_string(),
            result_summary: match &result {
                Ok(summary) => summary.clone(),
                Err(e) => format!("error: {}", e),
            },
            context_kind: context.as_str().to_string(),
            timestamp: now,
        };
        if let Err(e) = self.db.record_usage(&record) {
            self.notifier.report_error("usage log append", &e).await;
        }

        GateOutcome::Executed { result }
    }
}
